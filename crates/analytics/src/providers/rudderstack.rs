//! RudderStack adapter. Translates `dl_*` events to RudderStack's ecommerce
//! event names and identifies the shopper once an email is known.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tracing::debug;

use campaign_cart_core::config::RudderStackProviderConfig;

use super::{Provider, ProviderGate};
use crate::events::{self, EventEnvelope};

/// The page's `rudderanalytics` object.
pub trait RudderApi: Send + Sync {
    fn is_ready(&self) -> bool;
    fn track(&self, event: &str, properties: Value);
    fn identify(&self, user_id: &str, traits: Value);
    fn page(&self, properties: Value);
}

pub fn map_event(name: &str) -> Option<&'static str> {
    Some(match name {
        events::DL_VIEW_ITEM_LIST => "Product List Viewed",
        events::DL_VIEW_ITEM => "Product Viewed",
        events::DL_ADD_TO_CART => "Product Added",
        events::DL_REMOVE_FROM_CART => "Product Removed",
        events::DL_VIEW_CART => "Cart Viewed",
        events::DL_BEGIN_CHECKOUT => "Checkout Started",
        events::DL_ADD_SHIPPING_INFO => "Checkout Step Completed",
        events::DL_ADD_PAYMENT_INFO => "Payment Info Entered",
        events::DL_PURCHASE => "Order Completed",
        events::DL_VIEW_SEARCH_RESULTS => "Products Searched",
        events::DL_LOGIN => "Signed In",
        events::DL_SIGN_UP => "Signed Up",
        events::DL_VIEWED_UPSELL => "Upsell Viewed",
        events::DL_ACCEPTED_UPSELL => "Upsell Accepted",
        events::DL_SKIPPED_UPSELL => "Upsell Skipped",
        events::DL_PACKAGE_SWAPPED => "Product Swapped",
        _ => return None,
    })
}

pub struct RudderStackAdapter {
    gate: ProviderGate,
    api: Arc<dyn RudderApi>,
    identified: Arc<Mutex<Option<String>>>,
}

impl RudderStackAdapter {
    pub fn new(config: RudderStackProviderConfig, api: Arc<dyn RudderApi>) -> Self {
        Self {
            gate: ProviderGate::new("rudderstack", config.enabled, &config.blocked_events, config.timeout_ms),
            api,
            identified: Arc::new(Mutex::new(None)),
        }
    }

    pub fn transform(&self, event: &EventEnvelope) -> Value {
        let mut props = Map::new();
        if let Some(ecommerce) = &event.ecommerce {
            let products: Vec<Value> = ecommerce
                .items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    json!({
                        "product_id": item.item_id,
                        "sku": item.item_sku,
                        "name": item.item_name,
                        "brand": item.item_brand,
                        "price": item.price,
                        "quantity": item.quantity,
                        "position": item.index.unwrap_or(i) + 1,
                        "image_url": item.item_image,
                    })
                })
                .collect();
            props.insert("products".into(), json!(products));
            if let Some(currency) = &ecommerce.currency {
                props.insert("currency".into(), json!(currency));
            }
            if let Some(value) = ecommerce.value {
                props.insert("value".into(), json!(value));
                props.insert("revenue".into(), json!(value));
            }
            if let Some(id) = &ecommerce.transaction_id {
                props.insert("order_id".into(), json!(id));
            }
            if let Some(tax) = ecommerce.tax {
                props.insert("tax".into(), json!(tax));
            }
            if let Some(shipping) = ecommerce.shipping {
                props.insert("shipping".into(), json!(shipping));
            }
            if let Some(list) = &ecommerce.item_list_id {
                props.insert("list_id".into(), json!(list));
            }
        }
        for key in ["search_term", "order_id", "upsell", "method"] {
            if let Some(v) = event.field(key) {
                props.entry(key).or_insert(v.clone());
            }
        }
        props.insert("event_id".into(), json!(event.event_id));
        Value::Object(props)
    }

    fn identity(event: &EventEnvelope) -> Option<(String, Value)> {
        let props = &event.user_properties;
        let email = props.get("customer_email").and_then(Value::as_str)?;
        let user_id = props
            .get("customer_id")
            .and_then(Value::as_str)
            .unwrap_or(email)
            .to_string();
        let mut traits = Map::new();
        traits.insert("email".into(), json!(email));
        for (prop, trait_name) in [
            ("customer_first_name", "firstName"),
            ("customer_last_name", "lastName"),
            ("customer_phone", "phone"),
            ("customer_city", "city"),
            ("customer_country", "country"),
        ] {
            if let Some(v) = props.get(prop) {
                traits.insert(trait_name.into(), v.clone());
            }
        }
        Some((user_id, Value::Object(traits)))
    }
}

impl Provider for RudderStackAdapter {
    fn name(&self) -> &str {
        "rudderstack"
    }

    fn is_enabled(&self) -> bool {
        self.gate.is_enabled()
    }

    fn set_enabled(&self, enabled: bool) {
        self.gate.set_enabled(enabled);
    }

    fn track_event(&self, event: &EventEnvelope) -> Result<()> {
        if !self.gate.allows(&event.event) {
            return Ok(());
        }
        let identity = Self::identity(event);
        let track = map_event(&event.event).map(|name| (name, self.transform(event)));
        // dl_user_data fires once per page load.
        let page = (event.event == events::DL_USER_DATA).then(|| {
            json!({
                "url": event.field("page_location"),
                "title": event.field("page_title"),
                "referrer": event.field("page_referrer"),
            })
        });
        if identity.is_none() && track.is_none() && page.is_none() {
            debug!(event = %event.event, "no RudderStack mapping");
            return Ok(());
        }

        let ready_api = self.api.clone();
        let api = self.api.clone();
        let identified = self.identified.clone();
        self.gate.deliver_when_ready(
            &event.event,
            move || ready_api.is_ready(),
            move || {
                if let Some((user_id, traits)) = identity {
                    let mut last = identified.lock();
                    if last.as_deref() != Some(user_id.as_str()) {
                        api.identify(&user_id, traits);
                        *last = Some(user_id);
                    }
                }
                if let Some(props) = page {
                    api.page(props);
                }
                if let Some((name, props)) = track {
                    api.track(name, props);
                }
            },
        );
        Ok(())
    }
}

/// Records calls instead of sending them.
#[derive(Default)]
pub struct RecordingRudder {
    ready: AtomicBool,
    tracked: Mutex<Vec<(String, Value)>>,
    identified: Mutex<Vec<(String, Value)>>,
    pages: Mutex<Vec<Value>>,
}

impl RecordingRudder {
    pub fn ready() -> Self {
        let api = Self::default();
        api.ready.store(true, Ordering::Release);
        api
    }

    pub fn tracked(&self) -> Vec<(String, Value)> {
        self.tracked.lock().clone()
    }

    pub fn identified(&self) -> Vec<(String, Value)> {
        self.identified.lock().clone()
    }

    pub fn pages(&self) -> Vec<Value> {
        self.pages.lock().clone()
    }
}

impl RudderApi for RecordingRudder {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn track(&self, event: &str, properties: Value) {
        self.tracked.lock().push((event.to_string(), properties));
    }

    fn identify(&self, user_id: &str, traits: Value) {
        self.identified.lock().push((user_id.to_string(), traits));
    }

    fn page(&self, properties: Value) {
        self.pages.lock().push(properties);
    }
}
