//! Generic webhook adapter: buffers events and posts them in batches, either
//! when the buffer reaches `batch_size` or on the flush interval.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use campaign_cart_core::config::WebhookProviderConfig;

use super::transport::HttpTransport;
use super::{Provider, ProviderGate};
use crate::events::EventEnvelope;

pub struct WebhookAdapter {
    config: WebhookProviderConfig,
    gate: ProviderGate,
    transport: Arc<dyn HttpTransport>,
    buffer: Mutex<Vec<Value>>,
    session_id: Mutex<Option<String>>,
    full: Notify,
}

impl WebhookAdapter {
    pub fn new(config: WebhookProviderConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let gate = ProviderGate::new("webhook", config.enabled, &config.blocked_events, 0);
        Self {
            config,
            gate,
            transport,
            buffer: Mutex::new(Vec::new()),
            session_id: Mutex::new(None),
            full: Notify::new(),
        }
    }

    pub fn validate_config(&self) -> Result<()> {
        url::Url::parse(&self.config.endpoint)
            .map_err(|e| anyhow!("invalid webhook endpoint '{}': {e}", self.config.endpoint))?;
        if self.config.batch_size == 0 {
            return Err(anyhow!("webhook batch_size must be at least 1"));
        }
        Ok(())
    }

    pub fn queued(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Spawn the background flusher on the current runtime.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let adapter = self.clone();
        info!(
            endpoint = %self.config.endpoint,
            batch_size = self.config.batch_size,
            "webhook flusher started"
        );
        Some(handle.spawn(async move { adapter.run().await }))
    }

    async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.batch_interval_ms.max(1)));
        loop {
            tokio::select! {
                _ = self.full.notified() => {
                    self.flush().await;
                }
                _ = interval.tick() => {
                    if self.queued() > 0 {
                        self.flush().await;
                    }
                }
            }
        }
    }

    /// Send everything queued right now, one request per `batch_size` chunk.
    /// Returns the number of events delivered.
    pub async fn flush(&self) -> usize {
        let drained: Vec<Value> = std::mem::take(&mut *self.buffer.lock());
        if drained.is_empty() {
            return 0;
        }
        let mut delivered = 0;
        for chunk in drained.chunks(self.config.batch_size.max(1)) {
            if self.send_batch(chunk).await {
                delivered += chunk.len();
            }
        }
        delivered
    }

    async fn send_batch(&self, events: &[Value]) -> bool {
        let session_id = self.session_id.lock().clone();
        let body = json!({
            "events": events,
            "batch_size": events.len(),
            "sent_at": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "session_id": session_id,
        });

        let max_attempts = self.config.max_retries.max(1);
        for attempt in 1..=max_attempts {
            match self
                .transport
                .post_json(&self.config.endpoint, &self.config.headers, &body)
                .await
            {
                Ok(status) if (200..300).contains(&status) => {
                    debug!(count = events.len(), attempt, "webhook batch delivered");
                    return true;
                }
                Ok(status) => warn!(status, attempt, "webhook rejected batch"),
                Err(e) => warn!(error = %e, attempt, "webhook request failed"),
            }
            if attempt < max_attempts {
                tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms * u64::from(attempt))).await;
            }
        }
        error!(count = events.len(), attempts = max_attempts, "webhook batch dropped");
        false
    }
}

impl Provider for WebhookAdapter {
    fn name(&self) -> &str {
        "webhook"
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
        if let Some(meta) = &event.metadata {
            *self.session_id.lock() = Some(meta.session_id.clone());
        }
        let len = {
            let mut buffer = self.buffer.lock();
            buffer.push(event.to_value());
            buffer.len()
        };
        if len >= self.config.batch_size {
            self.full.notify_one();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::transport::RecordingTransport;

    fn config(batch_size: usize) -> WebhookProviderConfig {
        let mut config = WebhookProviderConfig::new("https://hooks.example.com/collect");
        config.batch_size = batch_size;
        config.retry_delay_ms = 10;
        config.headers.insert("Authorization".into(), "Bearer t".into());
        config
    }

    #[tokio::test]
    async fn test_flush_sends_batches_with_headers() {
        let transport = Arc::new(RecordingTransport::new());
        let hook = WebhookAdapter::new(config(2), transport.clone());
        for name in ["dl_view_item", "dl_add_to_cart", "dl_begin_checkout"] {
            hook.track_event(&EventEnvelope::named(name)).unwrap();
        }
        assert_eq!(hook.flush().await, 3);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].body["batch_size"], 2);
        assert_eq!(requests[0].body["events"][1]["event"], "dl_add_to_cart");
        assert_eq!(requests[1].body["events"][0]["event"], "dl_begin_checkout");
        assert_eq!(requests[0].headers["Authorization"], "Bearer t");
        assert_eq!(hook.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let transport = Arc::new(RecordingTransport::failing_first(2));
        let hook = WebhookAdapter::new(config(10), transport.clone());
        hook.track_event(&EventEnvelope::named("dl_purchase")).unwrap();
        assert_eq!(hook.flush().await, 1);
        assert_eq!(transport.attempts(), 3);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_drop_batch() {
        let transport = Arc::new(RecordingTransport::with_status(503));
        let hook = WebhookAdapter::new(config(10), transport.clone());
        hook.track_event(&EventEnvelope::named("dl_purchase")).unwrap();
        assert_eq!(hook.flush().await, 0);
        assert_eq!(transport.attempts(), 3);
        assert_eq!(hook.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_buffer_triggers_background_flush() {
        let transport = Arc::new(RecordingTransport::new());
        let hook = Arc::new(WebhookAdapter::new(config(2), transport.clone()));
        let task = hook.start().unwrap();
        // Let the first interval tick pass on an empty buffer.
        tokio::time::sleep(Duration::from_millis(1)).await;

        hook.track_event(&EventEnvelope::named("dl_view_item")).unwrap();
        hook.track_event(&EventEnvelope::named("dl_add_to_cart")).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(transport.requests().len(), 1);
        task.abort();
    }

    #[test]
    fn test_validate_config() {
        let transport = Arc::new(RecordingTransport::new());
        assert!(WebhookAdapter::new(config(5), transport.clone()).validate_config().is_ok());
        let bad = WebhookProviderConfig::new("not a url");
        assert!(WebhookAdapter::new(bad, transport).validate_config().is_err());
    }
}
