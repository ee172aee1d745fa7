//! Facebook Pixel adapter. Maps `dl_*` events onto the pixel's standard
//! events where one exists and sends everything else as a custom event.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::debug;

use campaign_cart_core::config::FacebookProviderConfig;

use super::{Provider, ProviderGate};
use crate::events::{self, EventEnvelope};

/// The page's `fbq` function.
pub trait PixelApi: Send + Sync {
    fn is_loaded(&self) -> bool;
    fn track(&self, event: &str, params: Value, options: Option<Value>);
    fn track_custom(&self, event: &str, params: Value, options: Option<Value>);
}

#[derive(Debug, Clone, PartialEq)]
pub enum PixelEvent {
    Standard(&'static str),
    Custom(String),
}

pub fn map_event(name: &str) -> PixelEvent {
    match name {
        events::DL_VIEW_ITEM => PixelEvent::Standard("ViewContent"),
        events::DL_ADD_TO_CART => PixelEvent::Standard("AddToCart"),
        events::DL_BEGIN_CHECKOUT => PixelEvent::Standard("InitiateCheckout"),
        events::DL_ADD_PAYMENT_INFO => PixelEvent::Standard("AddPaymentInfo"),
        events::DL_PURCHASE => PixelEvent::Standard("Purchase"),
        events::DL_VIEW_SEARCH_RESULTS => PixelEvent::Standard("Search"),
        events::DL_SIGN_UP => PixelEvent::Standard("CompleteRegistration"),
        events::DL_VIEW_ITEM_LIST => PixelEvent::Custom("ViewCategory".into()),
        other => PixelEvent::Custom(pascal_case(other.strip_prefix("dl_").unwrap_or(other))),
    }
}

fn pascal_case(name: &str) -> String {
    name.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            chars
                .next()
                .map(|c| c.to_uppercase().chain(chars).collect::<String>())
                .unwrap_or_default()
        })
        .collect()
}

/// Deduplication id shared with server-side conversions.
pub fn purchase_event_id(store_name: &str, order_id: &str) -> String {
    let store: String = store_name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("{}-{}", store.trim_matches('-'), order_id)
}

pub struct FacebookAdapter {
    config: FacebookProviderConfig,
    gate: ProviderGate,
    pixel: Arc<dyn PixelApi>,
    store_name: String,
}

impl FacebookAdapter {
    pub fn new(config: FacebookProviderConfig, pixel: Arc<dyn PixelApi>, store_name: impl Into<String>) -> Self {
        let gate = ProviderGate::new("facebook", config.enabled, &config.blocked_events, config.timeout_ms);
        Self {
            config,
            gate,
            pixel,
            store_name: store_name.into(),
        }
    }

    pub fn validate_config(&self) -> Result<()> {
        if self.config.pixel_id.is_empty() {
            return Err(anyhow!("Facebook pixel_id must not be empty"));
        }
        if !self.config.pixel_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(anyhow!("Facebook pixel_id must be numeric, got '{}'", self.config.pixel_id));
        }
        Ok(())
    }

    /// Pixel parameters plus optional `{eventID}` options.
    pub fn transform(&self, event: &EventEnvelope) -> (Value, Option<Value>) {
        let mut params = json!({});
        if let Some(ecommerce) = &event.ecommerce {
            let ids: Vec<&str> = ecommerce.items.iter().map(|i| i.item_id.as_str()).collect();
            let contents: Vec<Value> = ecommerce
                .items
                .iter()
                .map(|i| json!({ "id": i.item_id, "quantity": i.quantity, "item_price": i.price }))
                .collect();
            params["content_ids"] = json!(ids);
            params["content_type"] = json!("product");
            params["contents"] = json!(contents);
            params["num_items"] = json!(ecommerce.items.iter().map(|i| i.quantity).sum::<u32>());
            if let Some(value) = ecommerce.value {
                params["value"] = json!(value);
            }
            if let Some(currency) = &ecommerce.currency {
                params["currency"] = json!(currency);
            }
            if let [only] = ecommerce.items.as_slice() {
                params["content_name"] = json!(only.item_name);
            }
        }
        if let Some(term) = event.field("search_term") {
            params["search_string"] = term.clone();
        }

        let order_id = match event.event.as_str() {
            events::DL_PURCHASE => event
                .ecommerce
                .as_ref()
                .and_then(|e| e.transaction_id.clone()),
            events::DL_ACCEPTED_UPSELL => event
                .field("order_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        };
        let options = order_id.map(|id| json!({ "eventID": purchase_event_id(&self.store_name, &id) }));
        (params, options)
    }
}

impl Provider for FacebookAdapter {
    fn name(&self) -> &str {
        "facebook"
    }

    fn is_enabled(&self) -> bool {
        self.gate.is_enabled()
    }

    fn set_enabled(&self, enabled: bool) {
        self.gate.set_enabled(enabled);
    }

    fn track_event(&self, event: &EventEnvelope) -> Result<()> {
        if event.event == events::DL_USER_DATA || !self.gate.allows(&event.event) {
            return Ok(());
        }
        let mapped = map_event(&event.event);
        let (params, options) = self.transform(event);
        let ready_pixel = self.pixel.clone();
        let pixel = self.pixel.clone();
        self.gate.deliver_when_ready(
            &event.event,
            move || ready_pixel.is_loaded(),
            move || {
                match &mapped {
                    PixelEvent::Standard(name) => pixel.track(name, params, options),
                    PixelEvent::Custom(name) => pixel.track_custom(name, params, options),
                }
                debug!(event = ?mapped, "pixel event sent");
            },
        );
        Ok(())
    }
}

/// Records pixel calls instead of sending them.
#[derive(Default)]
pub struct RecordingPixel {
    loaded: std::sync::atomic::AtomicBool,
    calls: Mutex<Vec<(String, Value, Option<Value>)>>,
}

impl RecordingPixel {
    pub fn loaded() -> Self {
        let pixel = Self::default();
        pixel.set_loaded(true);
        pixel
    }

    pub fn set_loaded(&self, loaded: bool) {
        self.loaded.store(loaded, std::sync::atomic::Ordering::Release);
    }

    pub fn calls(&self) -> Vec<(String, Value, Option<Value>)> {
        self.calls.lock().clone()
    }
}

impl PixelApi for RecordingPixel {
    fn is_loaded(&self) -> bool {
        self.loaded.load(std::sync::atomic::Ordering::Acquire)
    }

    fn track(&self, event: &str, params: Value, options: Option<Value>) {
        self.calls.lock().push((event.to_string(), params, options));
    }

    fn track_custom(&self, event: &str, params: Value, options: Option<Value>) {
        self.calls.lock().push((format!("custom:{event}"), params, options));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Ecommerce, EcommerceItem};

    fn config() -> FacebookProviderConfig {
        FacebookProviderConfig {
            enabled: true,
            blocked_events: vec![],
            pixel_id: "123456789".into(),
            timeout_ms: 5000,
        }
    }

    fn purchase() -> EventEnvelope {
        let mut ecommerce = Ecommerce::new(
            "USD",
            39.98,
            vec![EcommerceItem {
                item_id: "2".into(),
                item_name: "Two Pack".into(),
                price: 19.99,
                quantity: 2,
                ..EcommerceItem::default()
            }],
        );
        ecommerce.transaction_id = Some("ORD-9".into());
        EventEnvelope::named(events::DL_PURCHASE).with_ecommerce(ecommerce)
    }

    #[test]
    fn test_event_mapping() {
        assert_eq!(map_event("dl_add_to_cart"), PixelEvent::Standard("AddToCart"));
        assert_eq!(map_event("dl_view_item_list"), PixelEvent::Custom("ViewCategory".into()));
        assert_eq!(map_event("dl_accepted_upsell"), PixelEvent::Custom("AcceptedUpsell".into()));
    }

    #[test]
    fn test_purchase_carries_dedup_id() {
        let pixel = Arc::new(RecordingPixel::loaded());
        let fb = FacebookAdapter::new(config(), pixel.clone(), "Example Store");
        fb.track_event(&purchase()).unwrap();

        let calls = pixel.calls();
        assert_eq!(calls.len(), 1);
        let (name, params, options) = &calls[0];
        assert_eq!(name, "Purchase");
        assert_eq!(params["value"], 39.98);
        assert_eq!(params["num_items"], 2);
        assert_eq!(params["content_ids"][0], "2");
        assert_eq!(options.as_ref().unwrap()["eventID"], "example-store-ORD-9");
    }

    #[test]
    fn test_user_data_not_sent() {
        let pixel = Arc::new(RecordingPixel::loaded());
        let fb = FacebookAdapter::new(config(), pixel.clone(), "Example Store");
        fb.track_event(&EventEnvelope::named(events::DL_USER_DATA)).unwrap();
        assert!(pixel.calls().is_empty());
    }

    #[test]
    fn test_unloaded_pixel_without_runtime_drops() {
        let pixel = Arc::new(RecordingPixel::default());
        let fb = FacebookAdapter::new(config(), pixel.clone(), "Example Store");
        assert!(fb.track_event(&purchase()).is_ok());
        assert!(pixel.calls().is_empty());
    }

    #[test]
    fn test_validate_config() {
        let pixel = Arc::new(RecordingPixel::default());
        assert!(FacebookAdapter::new(config(), pixel.clone(), "s").validate_config().is_ok());
        let bad = FacebookProviderConfig {
            pixel_id: "abc".into(),
            ..config()
        };
        assert!(FacebookAdapter::new(bad, pixel, "s").validate_config().is_err());
    }
}
