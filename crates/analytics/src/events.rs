//! Normalized analytics event model. The serialized field names are a wire
//! contract with tag managers reading the delivered data layer directly.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DL_USER_DATA: &str = "dl_user_data";
pub const DL_VIEW_ITEM_LIST: &str = "dl_view_item_list";
pub const DL_VIEW_ITEM: &str = "dl_view_item";
pub const DL_ADD_TO_CART: &str = "dl_add_to_cart";
pub const DL_REMOVE_FROM_CART: &str = "dl_remove_from_cart";
pub const DL_VIEW_CART: &str = "dl_view_cart";
pub const DL_BEGIN_CHECKOUT: &str = "dl_begin_checkout";
pub const DL_ADD_SHIPPING_INFO: &str = "dl_add_shipping_info";
pub const DL_ADD_PAYMENT_INFO: &str = "dl_add_payment_info";
pub const DL_PURCHASE: &str = "dl_purchase";
pub const DL_PACKAGE_SWAPPED: &str = "dl_package_swapped";
pub const DL_VIEW_SEARCH_RESULTS: &str = "dl_view_search_results";
pub const DL_LOGIN: &str = "dl_login";
pub const DL_SIGN_UP: &str = "dl_sign_up";
pub const DL_VIEWED_UPSELL: &str = "dl_viewed_upsell";
pub const DL_ACCEPTED_UPSELL: &str = "dl_accepted_upsell";
pub const DL_SKIPPED_UPSELL: &str = "dl_skipped_upsell";
pub const DL_SCROLL_DEPTH: &str = "dl_scroll_depth";

/// Dispatcher-owned block. Producers never set it; the data layer manager
/// overwrites it on every push.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventMetadata {
    pub session_id: String,
    pub sequence_number: u64,
    pub pushed_at: i64,
    pub debug_mode: bool,
    pub source: String,
    pub version: String,
}

/// One catalog line in canonical ecommerce shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EcommerceItem {
    pub item_id: String,
    pub item_name: String,
    pub price: f64,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_variant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_sku: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_list_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_list_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_product_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_variant_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Ecommerce {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default)]
    pub items: Vec<EcommerceItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_list_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_list_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_removed: Option<Vec<EcommerceItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_added: Option<Vec<EcommerceItem>>,
}

impl Ecommerce {
    pub fn new(currency: impl Into<String>, value: f64, items: Vec<EcommerceItem>) -> Self {
        Self {
            currency: Some(currency.into()),
            value: Some(value),
            items,
            ..Self::default()
        }
    }
}

/// The canonical unit moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub event: String,
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub event_time: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub user_properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecommerce: Option<Ecommerce>,
    #[serde(rename = "_metadata", default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EventMetadata>,
    #[serde(rename = "_willRedirect", default, skip_serializing_if = "is_false")]
    pub will_redirect: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<Map<String, Value>>,
    /// Event-specific top-level fields (`search_term`, `upsell`, `order_id`,
    /// page context).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl EventEnvelope {
    /// A bare envelope; ids and times are back-filled by the dispatcher.
    pub fn named(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            event_id: String::new(),
            event_time: String::new(),
            user_properties: Map::new(),
            ecommerce: None,
            metadata: None,
            will_redirect: false,
            attribution: None,
            extra: Map::new(),
        }
    }

    pub fn with_ecommerce(mut self, ecommerce: Ecommerce) -> Self {
        self.ecommerce = Some(ecommerce);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn redirecting(mut self) -> Self {
        self.will_redirect = true;
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    pub fn is_ecommerce(&self) -> bool {
        self.ecommerce.is_some()
    }

    pub fn sequence_number(&self) -> Option<u64> {
        self.metadata.as_ref().map(|m| m.sequence_number)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({ "event": self.event }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_field_names() {
        let event = EventEnvelope::named(DL_ADD_TO_CART)
            .with_ecommerce(Ecommerce::new(
                "USD",
                19.99,
                vec![EcommerceItem {
                    item_id: "SKU-2".into(),
                    item_name: "Two Pack".into(),
                    price: 19.99,
                    quantity: 1,
                    ..EcommerceItem::default()
                }],
            ))
            .with_field("page_location", serde_json::json!("https://shop.example.com/"));

        let json = event.to_value();
        assert_eq!(json["event"], "dl_add_to_cart");
        assert_eq!(json["ecommerce"]["items"][0]["item_id"], "SKU-2");
        assert_eq!(json["ecommerce"]["items"][0]["price"], 19.99);
        assert_eq!(json["ecommerce"]["items"][0]["quantity"], 1);
        assert_eq!(json["page_location"], "https://shop.example.com/");
        assert!(json.get("_willRedirect").is_none());
        assert!(json.get("_metadata").is_none());
        assert!(json["ecommerce"]["items"][0].get("item_brand").is_none());
    }

    #[test]
    fn test_will_redirect_serialized_only_when_set() {
        let json = EventEnvelope::named(DL_PURCHASE).redirecting().to_value();
        assert_eq!(json["_willRedirect"], true);

        let parsed: EventEnvelope = serde_json::from_value(json).unwrap();
        assert!(parsed.will_redirect);
        assert!(parsed.extra.is_empty());
    }
}
