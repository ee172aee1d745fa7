//! Builds normalized event envelopes and canonical ecommerce items,
//! cross-referencing the campaign catalog for authoritative product data.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use campaign_cart_core::dom::SharedDocument;
use campaign_cart_core::storage::StorageAdapter;
use campaign_cart_core::stores::{CampaignStore, CheckoutStore};
use campaign_cart_core::types::{CartItem, OrderLine, PackageId};

use crate::events::{EcommerceItem, EventEnvelope};
use crate::list_attribution::{ListAttributionTracker, ListContext};

pub(crate) const USER_DATA_KEY: &str = "user-data";

/// Whatever a caller knows about a line before catalog resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemInput {
    pub package_id: Option<PackageId>,
    pub name: Option<String>,
    pub price: Option<f64>,
    pub quantity: u32,
    pub sku: Option<String>,
    pub image: Option<String>,
    pub product_id: Option<u32>,
    pub product_name: Option<String>,
    pub variant_id: Option<u32>,
    pub variant_name: Option<String>,
}

impl ItemInput {
    pub fn package(package_id: PackageId, quantity: u32) -> Self {
        Self {
            package_id: Some(package_id),
            quantity,
            ..Self::default()
        }
    }
}

impl From<&CartItem> for ItemInput {
    fn from(item: &CartItem) -> Self {
        Self {
            package_id: Some(item.package_id),
            name: Some(item.title.clone()),
            price: Some(item.price),
            quantity: item.quantity,
            sku: item.sku.clone(),
            image: item.image.clone(),
            product_id: item.product_id,
            product_name: item.product_name.clone(),
            variant_id: item.variant_id,
            variant_name: item.variant_name.clone(),
        }
    }
}

impl From<&OrderLine> for ItemInput {
    fn from(line: &OrderLine) -> Self {
        Self {
            package_id: line.package_id,
            name: line.product_title.clone(),
            price: line.price_incl_tax,
            quantity: line.quantity,
            sku: line.product_sku.clone(),
            image: line.image.clone(),
            ..Self::default()
        }
    }
}

/// List placement for an item (`item_list_*` and `index`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPlacement {
    pub list_id: Option<String>,
    pub list_name: Option<String>,
}

impl From<ListContext> for ListPlacement {
    fn from(ctx: ListContext) -> Self {
        Self {
            list_id: ctx.list_id,
            list_name: ctx.list_name,
        }
    }
}

pub struct EventBuilder {
    campaign: Arc<dyn CampaignStore>,
    checkout: Arc<dyn CheckoutStore>,
    session: StorageAdapter,
    lists: Arc<ListAttributionTracker>,
    document: SharedDocument,
    store_name: String,
}

impl EventBuilder {
    pub fn new(
        campaign: Arc<dyn CampaignStore>,
        checkout: Arc<dyn CheckoutStore>,
        session: StorageAdapter,
        lists: Arc<ListAttributionTracker>,
        document: SharedDocument,
        store_name: impl Into<String>,
    ) -> Self {
        Self {
            campaign,
            checkout,
            session,
            lists,
            document,
            store_name: store_name.into(),
        }
    }

    pub fn currency(&self) -> String {
        self.campaign.currency()
    }

    pub fn store_name(&self) -> String {
        self.campaign
            .store_name()
            .unwrap_or_else(|| self.store_name.clone())
    }

    pub fn lists(&self) -> &ListAttributionTracker {
        &self.lists
    }

    pub fn session_storage(&self) -> &StorageAdapter {
        &self.session
    }

    /// Base envelope for `name` with caller fields merged on top. Caller
    /// fields win over computed context; `_metadata` is ignored because the
    /// dispatcher always computes it.
    pub fn create_event(&self, name: &str, fields: Map<String, Value>) -> EventEnvelope {
        let mut event = EventEnvelope::named(name);
        event.event_id = Uuid::new_v4().to_string();
        event.event_time = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        event.user_properties = self.user_properties();
        event.extra = self.page_context();

        for (key, value) in fields {
            match key.as_str() {
                "user_properties" => match value {
                    Value::Object(props) => event.user_properties.extend(props),
                    other => warn!(event = name, value = %other, "ignoring non-object user_properties"),
                },
                "ecommerce" => match serde_json::from_value(value) {
                    Ok(ecommerce) => event.ecommerce = Some(ecommerce),
                    Err(e) => warn!(event = name, error = %e, "ignoring malformed ecommerce block"),
                },
                "attribution" => {
                    if let Value::Object(attr) = value {
                        event.attribution = Some(attr);
                    }
                }
                "_willRedirect" => event.will_redirect = value.as_bool().unwrap_or(false),
                "_metadata" => debug!(event = name, "caller-supplied _metadata ignored"),
                "event_id" | "event_time" => {
                    if let Value::String(s) = value {
                        if key == "event_id" {
                            event.event_id = s;
                        } else {
                            event.event_time = s;
                        }
                    }
                }
                "event" => {}
                _ => {
                    event.extra.insert(key, value);
                }
            }
        }
        event
    }

    fn page_context(&self) -> Map<String, Value> {
        let doc = self.document.read();
        let mut ctx = Map::new();
        ctx.insert("page_location".into(), Value::String(doc.location.to_string()));
        if !doc.title.is_empty() {
            ctx.insert("page_title".into(), Value::String(doc.title.clone()));
        }
        if let Some(referrer) = &doc.referrer {
            ctx.insert("page_referrer".into(), Value::String(referrer.clone()));
        }
        ctx
    }

    /// Persisted user data merged with live checkout form state.
    pub fn user_properties(&self) -> Map<String, Value> {
        let mut props: Map<String, Value> = self.session.get(USER_DATA_KEY).unwrap_or_default();
        let snapshot = self.checkout.snapshot();

        let form_fields = [
            ("email", "customer_email"),
            ("fname", "customer_first_name"),
            ("lname", "customer_last_name"),
            ("phone", "customer_phone"),
            ("address1", "customer_address_1"),
            ("city", "customer_city"),
            ("province", "customer_province"),
            ("postal", "customer_zip"),
            ("country", "customer_country"),
        ];
        for (form_key, prop_key) in form_fields {
            if let Some(v) = snapshot.form_data.get(form_key).filter(|v| !v.is_empty()) {
                props.insert(prop_key.into(), Value::String(v.clone()));
            }
        }
        if let Some(billing) = snapshot.billing_address {
            let billing_fields = [
                ("customer_first_name", billing.first_name),
                ("customer_last_name", billing.last_name),
                ("customer_address_1", billing.address1),
                ("customer_city", billing.city),
                ("customer_province", billing.province),
                ("customer_zip", billing.postcode),
                ("customer_country", billing.country),
                ("customer_phone", billing.phone),
            ];
            for (key, value) in billing_fields {
                if let Some(v) = value {
                    props.entry(key).or_insert(Value::String(v));
                }
            }
        }

        let visitor = if props.contains_key("customer_id") {
            "logged_in"
        } else {
            "guest"
        };
        props.insert("visitor_type".into(), Value::String(visitor.into()));
        props
    }

    /// Remember customer fields for later pages in this session.
    pub fn remember_user(&self, fields: Map<String, Value>) {
        let mut stored: Map<String, Value> = self.session.get(USER_DATA_KEY).unwrap_or_default();
        stored.extend(fields);
        self.session.set(USER_DATA_KEY, &stored);
    }

    /// Canonical ecommerce item. Catalog data wins over caller data; a
    /// catalog miss degrades to whatever the input carries.
    pub fn format_ecommerce_item(
        &self,
        input: &ItemInput,
        index: Option<usize>,
        list: Option<&ListPlacement>,
    ) -> EcommerceItem {
        let package = input.package_id.and_then(|id| self.campaign.package(id));
        if package.is_none() {
            warn!(package_id = ?input.package_id, "catalog lookup miss, using item fields");
        }

        let list = match list {
            Some(l) => Some(l.clone()),
            None => self.lists.current().map(ListPlacement::from),
        };

        let quantity = input.quantity.max(1);
        let mut item = EcommerceItem {
            item_id: input
                .package_id
                .map(|id| id.to_string())
                .or_else(|| input.sku.clone())
                .unwrap_or_default(),
            item_name: input.name.clone().unwrap_or_default(),
            price: input.price.unwrap_or_default(),
            quantity,
            currency: Some(self.currency()),
            item_brand: input.product_name.clone(),
            item_category: Some(self.store_name()),
            item_variant: input.variant_name.clone(),
            item_sku: input.sku.clone(),
            item_image: input.image.clone(),
            item_list_id: list.as_ref().and_then(|l| l.list_id.clone()),
            item_list_name: list.as_ref().and_then(|l| l.list_name.clone()),
            index,
            item_product_id: input.product_id.map(|id| id.to_string()),
            item_variant_id: input.variant_id.map(|id| id.to_string()),
        };

        if let Some(pkg) = package {
            item.item_id = pkg.ref_id.to_string();
            item.item_name = pkg.name.clone();
            if let Some(price) = pkg.unit_price() {
                item.price = price;
            }
            item.item_brand = pkg.product_name.clone().or(item.item_brand);
            item.item_variant = pkg.product_variant_name.clone().or(item.item_variant);
            item.item_sku = pkg.product_sku.clone().or(item.item_sku);
            item.item_image = pkg.image.clone().or(item.item_image);
            item.item_product_id = pkg.product_id.map(|id| id.to_string()).or(item.item_product_id);
            item.item_variant_id = pkg
                .product_variant_id
                .map(|id| id.to_string())
                .or(item.item_variant_id);
        }
        item
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use campaign_cart_core::dom::Document;
    use campaign_cart_core::stores::{InMemoryCampaignStore, InMemoryCheckoutStore};
    use campaign_cart_core::types::{Address, CheckoutSnapshot, PackageData};

    pub(crate) fn package(ref_id: PackageId, price: &str) -> PackageData {
        PackageData {
            ref_id,
            name: format!("Package {ref_id}"),
            price: price.into(),
            price_total: None,
            retail_price: None,
            qty: 1,
            image: Some(format!("https://cdn.example.com/{ref_id}.png")),
            product_id: Some(500 + ref_id),
            product_name: Some("Grounding Drops".into()),
            product_sku: Some(format!("SKU-{ref_id}")),
            product_variant_id: None,
            product_variant_name: None,
            is_recurring: false,
        }
    }

    pub(crate) struct Fixture {
        pub builder: Arc<EventBuilder>,
        pub checkout: Arc<InMemoryCheckoutStore>,
        pub session: StorageAdapter,
        pub lists: Arc<ListAttributionTracker>,
    }

    pub(crate) fn fixture() -> Fixture {
        let campaign = InMemoryCampaignStore::new("USD")
            .with_packages([package(1, "10.00"), package(2, "19.99"), package(3, "29.99")]);
        let checkout = Arc::new(InMemoryCheckoutStore::new());
        let session = StorageAdapter::memory();
        let lists = Arc::new(ListAttributionTracker::new(session.clone(), 30 * 60 * 1000));
        let mut doc = Document::at("https://shop.example.com/checkout").unwrap();
        doc.title = "Checkout".into();
        let builder = EventBuilder::new(
            Arc::new(campaign),
            checkout.clone(),
            session.clone(),
            lists.clone(),
            doc.into_shared(),
            "Example Store",
        );
        Fixture {
            builder: Arc::new(builder),
            checkout,
            session,
            lists,
        }
    }

    #[test]
    fn test_catalog_price_string_becomes_number() {
        let f = fixture();
        let item = f.builder.format_ecommerce_item(&ItemInput::package(2, 1), None, None);
        assert_eq!(item.price, 19.99);
        assert_eq!(item.quantity, 1);
        assert_eq!(item.item_id, "2");
        assert_eq!(item.item_sku.as_deref(), Some("SKU-2"));
        assert_eq!(item.currency.as_deref(), Some("USD"));
    }

    #[test]
    fn test_catalog_overrides_caller_price() {
        let f = fixture();
        let input = ItemInput {
            price: Some(1.0),
            name: Some("Tampered".into()),
            ..ItemInput::package(1, 3)
        };
        let item = f.builder.format_ecommerce_item(&input, Some(0), None);
        assert_eq!(item.price, 10.0);
        assert_eq!(item.item_name, "Package 1");
        assert_eq!(item.quantity, 3);
        assert_eq!(item.index, Some(0));
    }

    #[test]
    fn test_catalog_miss_falls_back_to_input() {
        let f = fixture();
        let input = ItemInput {
            name: Some("Legacy Bundle".into()),
            price: Some(5.5),
            sku: Some("LEG-1".into()),
            ..ItemInput::package(77, 0)
        };
        let item = f.builder.format_ecommerce_item(&input, None, None);
        assert_eq!(item.item_id, "77");
        assert_eq!(item.item_name, "Legacy Bundle");
        assert_eq!(item.price, 5.5);
        assert_eq!(item.quantity, 1);
    }

    #[test]
    fn test_create_event_merges_caller_fields() {
        let f = fixture();
        let mut fields = Map::new();
        fields.insert("page_title".into(), Value::String("Custom".into()));
        fields.insert("search_term".into(), Value::String("drops".into()));
        fields.insert("_metadata".into(), serde_json::json!({"sequence_number": 999}));
        let event = f.builder.create_event("dl_view_search_results", fields);

        assert_eq!(event.event, "dl_view_search_results");
        assert!(!event.event_id.is_empty());
        assert!(event.event_time.ends_with('Z'));
        assert_eq!(event.field("page_title"), Some(&Value::String("Custom".into())));
        assert_eq!(event.field("search_term"), Some(&Value::String("drops".into())));
        assert!(event.metadata.is_none());
        assert_eq!(event.user_properties["visitor_type"], "guest");
    }

    #[test]
    fn test_user_properties_merge_storage_and_checkout() {
        let f = fixture();
        let mut stored = Map::new();
        stored.insert("customer_id".into(), Value::String("c-1".into()));
        f.builder.remember_user(stored);
        f.checkout.set_snapshot(CheckoutSnapshot {
            form_data: [("email".to_string(), "ada@example.com".to_string())].into(),
            billing_address: Some(Address {
                city: Some("Austin".into()),
                ..Address::default()
            }),
        });

        let props = f.builder.user_properties();
        assert_eq!(props["customer_email"], "ada@example.com");
        assert_eq!(props["customer_city"], "Austin");
        assert_eq!(props["visitor_type"], "logged_in");
        assert!(f.session.get::<Map<String, Value>>(USER_DATA_KEY).is_some());
    }
}
