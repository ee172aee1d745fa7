//! The single funnel for outbound analytics events:
//! validate → enrich → transform → queue-or-dispatch.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use campaign_cart_core::config::AnalyticsConfig;
use campaign_cart_core::dom::SharedDocument;
use campaign_cart_core::storage::StorageAdapter;
use campaign_cart_core::stores::AttributionStore;

use crate::builder::USER_DATA_KEY;
use crate::events::{EventEnvelope, EventMetadata, DL_USER_DATA};
use crate::global::GlobalArray;
use crate::pending::PendingEventsQueue;
use crate::providers::Provider;
use crate::schema::{EventValidator, SchemaRegistry};

const SESSION_KEY: &str = "analytics-session";
const DEBUG_KEY: &str = "analytics-debug";
const SOURCE: &str = "campaign-cart";

/// Global hook applied to every enriched event; `None` filters it out.
pub type EventTransform = Arc<dyn Fn(EventEnvelope) -> Option<EventEnvelope> + Send + Sync>;

/// What `push` decided for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// Parked for the next page load.
    Queued,
    /// Dropped by the transform hook.
    Filtered,
    /// Failed validation.
    Invalid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSession {
    id: String,
    last_activity: i64,
}

#[derive(Debug, Clone, Default)]
struct PageContext {
    location: Option<String>,
    title: Option<String>,
    referrer: Option<String>,
    viewport: Option<(u32, u32)>,
}

pub struct DataLayerManager {
    data_layer: GlobalArray,
    providers: RwLock<Vec<Arc<dyn Provider>>>,
    validator: RwLock<EventValidator>,
    validation: AtomicBool,
    transform: RwLock<Option<EventTransform>>,
    sequence: AtomicU64,
    debug: AtomicBool,
    local: StorageAdapter,
    session: StorageAdapter,
    pending: PendingEventsQueue,
    session_timeout_ms: i64,
    /// Last session seen; authoritative when storage writes are lost.
    current_session: RwLock<Option<StoredSession>>,
    attribution: Option<Arc<dyn AttributionStore>>,
    document: Option<SharedDocument>,
    context: RwLock<PageContext>,
    user_data_delivered: AtomicBool,
}

impl DataLayerManager {
    pub fn new(config: &AnalyticsConfig, local: StorageAdapter, session: StorageAdapter) -> Self {
        let persisted_debug: bool = local.get_or(DEBUG_KEY, false);
        Self {
            data_layer: GlobalArray::new("NextDataLayer"),
            providers: RwLock::new(Vec::new()),
            validator: RwLock::new(EventValidator::new(SchemaRegistry::default())),
            validation: AtomicBool::new(config.validate_events || config.debug),
            transform: RwLock::new(None),
            sequence: AtomicU64::new(0),
            debug: AtomicBool::new(config.debug || persisted_debug),
            pending: PendingEventsQueue::new(session.clone(), config.pending_stale_ms),
            local,
            session,
            session_timeout_ms: i64::try_from(config.session_timeout_ms).unwrap_or(i64::MAX),
            current_session: RwLock::new(None),
            attribution: None,
            document: None,
            context: RwLock::new(PageContext::default()),
            user_data_delivered: AtomicBool::new(false),
        }
    }

    pub fn with_attribution(mut self, attribution: Arc<dyn AttributionStore>) -> Self {
        self.attribution = Some(attribution);
        self
    }

    pub fn with_document(mut self, document: SharedDocument) -> Self {
        self.document = Some(document);
        self.invalidate_context();
        self
    }

    pub fn with_validator(self, validator: EventValidator) -> Self {
        *self.validator.write() = validator;
        self
    }

    /// The delivered array (`window.NextDataLayer`).
    pub fn data_layer(&self) -> &GlobalArray {
        &self.data_layer
    }

    pub fn pending(&self) -> &PendingEventsQueue {
        &self.pending
    }

    pub fn events(&self) -> Vec<Value> {
        self.data_layer.snapshot()
    }

    pub fn register_provider(&self, provider: Arc<dyn Provider>) {
        info!(provider = provider.name(), "analytics provider registered");
        self.providers.write().push(provider);
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.read().iter().map(|p| p.name().to_string()).collect()
    }

    pub fn set_transform<F>(&self, transform: F)
    where
        F: Fn(EventEnvelope) -> Option<EventEnvelope> + Send + Sync + 'static,
    {
        *self.transform.write() = Some(Arc::new(transform));
    }

    pub fn clear_transform(&self) {
        *self.transform.write() = None;
    }

    pub fn set_validation(&self, enabled: bool) {
        self.validation.store(enabled, Ordering::Release);
    }

    pub fn is_debug(&self) -> bool {
        self.debug.load(Ordering::Acquire)
    }

    pub fn set_debug_mode(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::Release);
        self.local.set(DEBUG_KEY, &enabled);
        info!(enabled, "analytics debug mode");
    }

    /// Current session id; the rolling window restarts on every read.
    pub fn session_id(&self) -> String {
        let now = Utc::now().timestamp_millis();
        let mut current = self.current_session.write();
        let known = current
            .clone()
            .or_else(|| self.local.get::<StoredSession>(SESSION_KEY));
        let id = match known {
            Some(s) if now - s.last_activity <= self.session_timeout_ms => s.id,
            _ => {
                let id = Uuid::new_v4().to_string();
                debug!(session_id = %id, "analytics session started");
                id
            }
        };
        let session = StoredSession {
            id: id.clone(),
            last_activity: now,
        };
        if !self.local.set(SESSION_KEY, &session) {
            debug!(session_id = %id, "session kept in memory only");
        }
        *current = Some(session);
        id
    }

    /// Re-capture page context after an in-app navigation. Session id and
    /// sequence counter are untouched.
    pub fn invalidate_context(&self) {
        let Some(document) = &self.document else {
            return;
        };
        let doc = document.read();
        *self.context.write() = PageContext {
            location: Some(doc.location.to_string()),
            title: (!doc.title.is_empty()).then(|| doc.title.clone()),
            referrer: doc.referrer.clone(),
            viewport: Some((doc.viewport.width, doc.viewport.height)),
        };
    }

    /// Empty the delivered array and restart the sequence.
    pub fn clear(&self) {
        self.data_layer.clear();
        self.sequence.store(0, Ordering::SeqCst);
        self.user_data_delivered.store(false, Ordering::SeqCst);
    }

    pub fn user_data_delivered(&self) -> bool {
        self.user_data_delivered.load(Ordering::Acquire)
    }

    pub fn push(&self, event: EventEnvelope) -> PushOutcome {
        // Drawn before validation so a dropped event still consumes its slot.
        let sequence = self.next_sequence();

        if event.event.is_empty() {
            warn!(sequence, "event without a name dropped");
            return PushOutcome::Invalid;
        }
        if self.validation.load(Ordering::Acquire) {
            let result = self.validator.read().validate_event(&event);
            if !result.valid {
                warn!(event = %event.event, errors = ?result.errors, "event failed validation, dropped");
                return PushOutcome::Invalid;
            }
            if self.is_debug() && !result.warnings.is_empty() {
                debug!(event = %event.event, warnings = ?result.warnings, "validation warnings");
            }
        }
        self.dispatch(event, sequence)
    }

    /// Replay events parked by a previous page. Validation is skipped; the
    /// events get fresh metadata but keep their ids, times and payload.
    pub fn process_pending_events(&self) -> usize {
        if !self.user_data_delivered() {
            warn!("processing pending events before this page's dl_user_data was delivered");
        }
        let drained = self.pending.drain();
        let mut delivered = 0;
        for mut event in drained.deliver {
            event.will_redirect = false;
            let sequence = self.next_sequence();
            if self.dispatch(event, sequence) == PushOutcome::Delivered {
                delivered += 1;
            }
        }
        delivered
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn dispatch(&self, mut event: EventEnvelope, sequence: u64) -> PushOutcome {
        self.enrich(&mut event, sequence);
        let metadata = event.metadata.clone();

        let transform = self.transform.read().clone();
        if let Some(transform) = transform {
            match transform(event) {
                Some(mut transformed) => {
                    transformed.metadata = metadata;
                    event = transformed;
                }
                None => {
                    debug!(sequence, "event filtered by transform");
                    return PushOutcome::Filtered;
                }
            }
        }

        if std::mem::take(&mut event.will_redirect) {
            self.pending.queue_event(event);
            return PushOutcome::Queued;
        }
        self.deliver(event);
        PushOutcome::Delivered
    }

    fn enrich(&self, event: &mut EventEnvelope, sequence: u64) {
        event.metadata = Some(EventMetadata {
            session_id: self.session_id(),
            sequence_number: sequence,
            pushed_at: Utc::now().timestamp_millis(),
            debug_mode: self.is_debug(),
            source: SOURCE.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        });

        if event.event_id.is_empty() {
            event.event_id = Uuid::new_v4().to_string();
        }
        if event.event_time.is_empty() {
            event.event_time = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        }

        if event.attribution.is_none() {
            let attribution = self
                .attribution
                .as_ref()
                .and_then(|store| store.attribution_for_api())
                .and_then(|data| match serde_json::to_value(data) {
                    Ok(Value::Object(map)) if !map.is_empty() => Some(map),
                    _ => None,
                });
            event.attribution = attribution;
        }

        let stored: Map<String, Value> = self.session.get(USER_DATA_KEY).unwrap_or_default();
        for (key, value) in stored {
            event.user_properties.entry(key).or_insert(value);
        }

        let context = self.context.read().clone();
        let page = [
            ("page_location", context.location),
            ("page_title", context.title),
            ("page_referrer", context.referrer),
        ];
        for (key, value) in page {
            if let Some(v) = value {
                event.extra.entry(key).or_insert(Value::String(v));
            }
        }
        if let Some((w, h)) = context.viewport {
            event
                .extra
                .entry("viewport")
                .or_insert(Value::String(format!("{w}x{h}")));
        }

        if self.is_debug() {
            debug!(event = %event.event, sequence, "event enriched");
        }
    }

    fn deliver(&self, event: EventEnvelope) {
        if event.event == DL_USER_DATA {
            self.user_data_delivered.store(true, Ordering::Release);
        }
        self.data_layer.push(event.to_value());

        let providers = self.providers.read().clone();
        for provider in providers {
            if !provider.is_enabled() {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| provider.track_event(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(provider = provider.name(), event = %event.event, error = %e, "provider failed"),
                Err(_) => error!(provider = provider.name(), event = %event.event, "provider panicked"),
            }
        }
        debug!(event = %event.event, sequence = ?event.sequence_number(), "event delivered");
    }
}
