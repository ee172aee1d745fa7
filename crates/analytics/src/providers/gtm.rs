//! Google Tag Manager adapter: pushes events onto the page's `dataLayer`
//! array, clearing the previous ecommerce object first so GTM does not merge
//! stale items into the next event.

use anyhow::{anyhow, Result};
use serde_json::Value;
use tracing::debug;

use campaign_cart_core::config::GtmProviderConfig;

use super::{Provider, ProviderGate};
use crate::events::EventEnvelope;
use crate::global::GlobalArray;

pub struct GtmAdapter {
    config: GtmProviderConfig,
    gate: ProviderGate,
    data_layer: GlobalArray,
}

impl GtmAdapter {
    pub fn new(config: GtmProviderConfig, data_layer: GlobalArray) -> Self {
        let gate = ProviderGate::new("gtm", config.enabled, &config.blocked_events, config.timeout_ms);
        Self {
            config,
            gate,
            data_layer,
        }
    }

    pub fn data_layer(&self) -> &GlobalArray {
        &self.data_layer
    }

    /// The `dataLayer` pushes for one event, in order.
    pub fn transform(&self, event: &EventEnvelope) -> Vec<Value> {
        let mut payload = event.to_value();
        if let Some(obj) = payload.as_object_mut() {
            obj.remove("_metadata");
            if let Some(container) = &self.config.container_id {
                obj.insert("gtm_container".into(), Value::String(container.clone()));
            }
        }
        if event.is_ecommerce() {
            vec![serde_json::json!({ "ecommerce": null }), payload]
        } else {
            vec![payload]
        }
    }

    pub fn validate_config(&self) -> Result<()> {
        match &self.config.container_id {
            Some(id) if !id.starts_with("GTM-") => Err(anyhow!(
                "GTM container_id must start with 'GTM-', got '{id}'"
            )),
            _ => Ok(()),
        }
    }
}

impl Provider for GtmAdapter {
    fn name(&self) -> &str {
        "gtm"
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
        let pushes = self.transform(event);
        let ready_layer = self.data_layer.clone();
        let target = self.data_layer.clone();
        let name = event.event.clone();
        self.gate.deliver_when_ready(
            &event.event,
            move || ready_layer.is_loaded(),
            move || {
                for push in pushes {
                    target.push(push);
                }
                debug!(event = %name, "GTM dataLayer push");
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Ecommerce, DL_ADD_TO_CART, DL_USER_DATA};

    fn adapter(blocked: Vec<String>) -> GtmAdapter {
        let config = GtmProviderConfig {
            container_id: Some("GTM-ABC1234".into()),
            blocked_events: blocked,
            ..GtmProviderConfig::default()
        };
        GtmAdapter::new(config, GlobalArray::new("dataLayer"))
    }

    #[test]
    fn test_ecommerce_event_clears_previous_object() {
        let gtm = adapter(vec![]);
        let event = EventEnvelope::named(DL_ADD_TO_CART).with_ecommerce(Ecommerce::new("USD", 10.0, vec![]));
        gtm.track_event(&event).unwrap();

        let pushed = gtm.data_layer().snapshot();
        assert_eq!(pushed.len(), 2);
        assert!(pushed[0]["ecommerce"].is_null());
        assert_eq!(pushed[1]["event"], "dl_add_to_cart");
        assert_eq!(pushed[1]["ecommerce"]["currency"], "USD");
        assert!(pushed[1].get("_metadata").is_none());
    }

    #[test]
    fn test_non_ecommerce_event_single_push() {
        let gtm = adapter(vec![]);
        gtm.track_event(&EventEnvelope::named(DL_USER_DATA)).unwrap();
        assert_eq!(gtm.data_layer().len(), 1);
    }

    #[test]
    fn test_blocked_event_skipped() {
        let gtm = adapter(vec![DL_USER_DATA.to_string()]);
        gtm.track_event(&EventEnvelope::named(DL_USER_DATA)).unwrap();
        assert!(gtm.data_layer().is_empty());
    }

    #[test]
    fn test_validate_config() {
        assert!(adapter(vec![]).validate_config().is_ok());
        let bad = GtmAdapter::new(
            GtmProviderConfig {
                container_id: Some("UA-1".into()),
                ..GtmProviderConfig::default()
            },
            GlobalArray::new("dataLayer"),
        );
        assert!(bad.validate_config().is_err());
    }
}
