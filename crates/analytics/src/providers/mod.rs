//! Provider adapters: each turns the normalized [`EventEnvelope`] into a call
//! on one third-party destination (tag manager, pixel, webhook).
//!
//! Every adapter implements [`Provider`] and owns a [`ProviderGate`] that
//! enforces its enable flag and event blocklist and defers delivery until
//! the destination's script has loaded.

pub mod campaign;
pub mod facebook;
pub mod gtm;
pub mod rudderstack;
pub mod transport;
pub mod webhook;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::events::EventEnvelope;

/// Contract the data layer manager fans events out through.
pub trait Provider: Send + Sync {
    /// Provider identifier (e.g. "gtm", "facebook").
    fn name(&self) -> &str;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);

    /// Hand one delivered event to the provider. Must not block; errors are
    /// logged by the caller and never affect other providers.
    fn track_event(&self, event: &EventEnvelope) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Waiting for the destination to load.
    Deferred,
    Dropped,
}

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Enable flag, blocklist and wait-for-script logic shared by all adapters.
pub struct ProviderGate {
    name: &'static str,
    enabled: AtomicBool,
    blocked: HashSet<String>,
    timeout: Duration,
}

impl ProviderGate {
    pub fn new(name: &'static str, enabled: bool, blocked: &[String], timeout_ms: u64) -> Self {
        Self {
            name,
            enabled: AtomicBool::new(enabled),
            blocked: blocked.iter().cloned().collect(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_blocked(&self, event: &str) -> bool {
        self.blocked.contains(event)
    }

    /// True when the event should reach this provider at all.
    pub fn allows(&self, event: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        if self.is_blocked(event) {
            debug!(provider = self.name, event, "event blocked for provider");
            return false;
        }
        true
    }

    /// Run `send` now if `ready()`, otherwise poll on the tokio runtime until
    /// ready or the timeout passes. Without a runtime the event is dropped.
    pub fn deliver_when_ready<R, S>(&self, event: &str, ready: R, send: S) -> Delivery
    where
        R: Fn() -> bool + Send + 'static,
        S: FnOnce() + Send + 'static,
    {
        if ready() {
            send();
            return Delivery::Sent;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(provider = self.name, event, "provider not loaded, dropping event");
            return Delivery::Dropped;
        };
        let name = self.name;
        let event = event.to_string();
        let timeout = self.timeout;
        handle.spawn(async move {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                tokio::time::sleep(POLL_INTERVAL).await;
                if ready() {
                    send();
                    return;
                }
                if tokio::time::Instant::now() >= deadline {
                    warn!(provider = name, event = %event, "provider never loaded, event dropped");
                    return;
                }
            }
        });
        Delivery::Deferred
    }
}

/// In-memory provider that records what it receives and can be told to fail.
pub struct CaptureProvider {
    name: String,
    enabled: AtomicBool,
    fail: AtomicBool,
    events: Mutex<Vec<EventEnvelope>>,
}

impl CaptureProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: AtomicBool::new(true),
            fail: AtomicBool::new(false),
            events: Mutex::new(Vec::new()),
        }
    }

    /// A provider whose `track_event` always errors.
    pub fn failing(name: impl Into<String>) -> Self {
        let provider = Self::new(name);
        provider.fail.store(true, Ordering::Release);
        provider
    }

    pub fn events(&self) -> Vec<EventEnvelope> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.event.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Provider for CaptureProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    fn track_event(&self, event: &EventEnvelope) -> Result<()> {
        if self.fail.load(Ordering::Acquire) {
            anyhow::bail!("{} rejected {}", self.name, event.event);
        }
        self.events.lock().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_gate_blocklist_and_enable() {
        let gate = ProviderGate::new("gtm", true, &["dl_user_data".to_string()], 5000);
        assert!(gate.allows("dl_add_to_cart"));
        assert!(!gate.allows("dl_user_data"));
        gate.set_enabled(false);
        assert!(!gate.allows("dl_add_to_cart"));
    }

    #[test]
    fn test_ready_target_sends_immediately() {
        let gate = ProviderGate::new("gtm", true, &[], 5000);
        let sent = Arc::new(AtomicUsize::new(0));
        let s = sent.clone();
        let result = gate.deliver_when_ready("dl_view_item", || true, move || {
            s.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(result, Delivery::Sent);
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_runtime_drops() {
        let gate = ProviderGate::new("facebook", true, &[], 5000);
        let result = gate.deliver_when_ready("dl_view_item", || false, || panic!("must not send"));
        assert_eq!(result, Delivery::Dropped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_until_loaded() {
        let gate = ProviderGate::new("facebook", true, &[], 5000);
        let loaded = Arc::new(AtomicBool::new(false));
        let sent = Arc::new(AtomicUsize::new(0));

        let l = loaded.clone();
        let s = sent.clone();
        let result = gate.deliver_when_ready(
            "dl_purchase",
            move || l.load(Ordering::SeqCst),
            move || {
                s.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert_eq!(result, Delivery::Deferred);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(sent.load(Ordering::SeqCst), 0);
        loaded.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_gives_up_after_timeout() {
        let gate = ProviderGate::new("rudderstack", true, &[], 500);
        let sent = Arc::new(AtomicUsize::new(0));
        let s = sent.clone();
        gate.deliver_when_ready("dl_purchase", || false, move || {
            s.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sent.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_capture_provider_failure_mode() {
        let ok = CaptureProvider::new("ok");
        let bad = CaptureProvider::failing("bad");
        let event = EventEnvelope::named("dl_view_item");
        assert!(ok.track_event(&event).is_ok());
        assert!(bad.track_event(&event).is_err());
        assert_eq!(ok.names(), vec!["dl_view_item".to_string()]);
        assert_eq!(bad.count(), 0);
    }
}
