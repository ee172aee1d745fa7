//! First-party campaign adapter: forwards commerce events to the campaign
//! API so conversions can be attributed server side.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use tracing::{debug, warn};

use campaign_cart_core::config::CampaignProviderConfig;

use super::transport::HttpTransport;
use super::{Provider, ProviderGate};
use crate::events::{self, EventEnvelope};

const FORWARDED: &[&str] = &[
    events::DL_VIEW_ITEM,
    events::DL_ADD_TO_CART,
    events::DL_REMOVE_FROM_CART,
    events::DL_BEGIN_CHECKOUT,
    events::DL_PURCHASE,
    events::DL_ACCEPTED_UPSELL,
    events::DL_PACKAGE_SWAPPED,
];

pub struct CampaignAdapter {
    gate: ProviderGate,
    url: String,
    headers: HashMap<String, String>,
    transport: Arc<dyn HttpTransport>,
}

impl CampaignAdapter {
    pub fn new(config: CampaignProviderConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let url = format!("{}/events", config.api_endpoint.trim_end_matches('/'));
        let mut headers = HashMap::new();
        headers.insert("X-API-Key".to_string(), config.api_key.clone());
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self {
            gate: ProviderGate::new("campaign", config.enabled, &config.blocked_events, 0),
            url,
            headers,
            transport,
        }
    }

    pub fn validate_config(&self) -> Result<()> {
        if self.headers.get("X-API-Key").map_or(true, |k| k.is_empty()) {
            return Err(anyhow!("campaign api_key must not be empty"));
        }
        Ok(())
    }

    pub fn forwards(event: &str) -> bool {
        FORWARDED.contains(&event)
    }

    pub fn transform(&self, event: &EventEnvelope) -> Value {
        json!({
            "event_type": event.event,
            "event_id": event.event_id,
            "occurred_at": event.event_time,
            "session_id": event.metadata.as_ref().map(|m| m.session_id.clone()),
            "data": event.ecommerce,
            "attribution": event.attribution,
        })
    }
}

impl Provider for CampaignAdapter {
    fn name(&self) -> &str {
        "campaign"
    }

    fn is_enabled(&self) -> bool {
        self.gate.is_enabled()
    }

    fn set_enabled(&self, enabled: bool) {
        self.gate.set_enabled(enabled);
    }

    fn track_event(&self, event: &EventEnvelope) -> Result<()> {
        if !Self::forwards(&event.event) || !self.gate.allows(&event.event) {
            return Ok(());
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(event = %event.event, "no runtime, campaign event not sent");
            return Ok(());
        };
        let body = self.transform(event);
        let url = self.url.clone();
        let headers = self.headers.clone();
        let transport = self.transport.clone();
        let name = event.event.clone();
        handle.spawn(async move {
            match transport.post_json(&url, &headers, &body).await {
                Ok(status) if (200..300).contains(&status) => debug!(event = %name, "campaign event sent"),
                Ok(status) => warn!(event = %name, status, "campaign API rejected event"),
                Err(e) => warn!(event = %name, error = %e, "campaign API request failed"),
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::transport::RecordingTransport;
    use std::time::Duration;

    fn adapter() -> (CampaignAdapter, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::new());
        let config = CampaignProviderConfig {
            enabled: true,
            blocked_events: vec![],
            api_endpoint: "https://campaigns.example.com/api/v1/".into(),
            api_key: "pk_test".into(),
        };
        (CampaignAdapter::new(config, transport.clone()), transport)
    }

    #[tokio::test]
    async fn test_forwards_commerce_events_with_api_key() {
        let (campaign, transport) = adapter();
        campaign.track_event(&EventEnvelope::named(events::DL_PURCHASE)).unwrap();
        campaign.track_event(&EventEnvelope::named(events::DL_USER_DATA)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "https://campaigns.example.com/api/v1/events");
        assert_eq!(requests[0].headers["X-API-Key"], "pk_test");
        assert_eq!(requests[0].body["event_type"], "dl_purchase");
    }

    #[test]
    fn test_validate_config() {
        let (campaign, _) = adapter();
        assert!(campaign.validate_config().is_ok());
    }
}
