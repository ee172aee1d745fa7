//! Redirect-safe delivery: events flagged `_willRedirect` are parked in
//! session storage and replayed on the next page load.

use chrono::Utc;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use campaign_cart_core::storage::StorageAdapter;

use crate::events::{EventEnvelope, DL_USER_DATA};

const STORAGE_KEY: &str = "analytics-pending-events";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingEvent {
    pub event: EventEnvelope,
    /// Milliseconds since the epoch when the event was queued.
    pub timestamp: i64,
    pub id: String,
}

/// What one `drain` pass decided.
#[derive(Debug, Default)]
pub struct DrainedEvents {
    /// Fresh events to deliver, oldest first.
    pub deliver: Vec<EventEnvelope>,
    pub dropped_user_data: usize,
    pub expired: usize,
}

pub struct PendingEventsQueue {
    storage: StorageAdapter,
    stale_after_ms: i64,
    /// Events whose write was refused; they survive only this page.
    unpersisted: Mutex<Vec<PendingEvent>>,
}

impl PendingEventsQueue {
    pub fn new(storage: StorageAdapter, stale_after_ms: u64) -> Self {
        Self {
            storage,
            stale_after_ms: i64::try_from(stale_after_ms).unwrap_or(i64::MAX),
            unpersisted: Mutex::new(Vec::new()),
        }
    }

    fn stored(&self) -> Vec<PendingEvent> {
        self.storage.get(STORAGE_KEY).unwrap_or_default()
    }

    /// Persisted entries followed by any held in memory.
    pub fn pending(&self) -> Vec<PendingEvent> {
        let mut queue = self.stored();
        queue.extend(self.unpersisted.lock().iter().cloned());
        queue
    }

    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }

    pub fn queue_event(&self, event: EventEnvelope) -> String {
        let timestamp = Utc::now().timestamp_millis();
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(9)
            .map(char::from)
            .collect();
        let id = format!("{}-{}-{}", event.event, timestamp, suffix);
        let entry = PendingEvent {
            event,
            timestamp,
            id: id.clone(),
        };
        debug!(event = %entry.event.event, id = %id, "queueing event for next page");
        let mut queue = self.stored();
        queue.push(entry.clone());
        if !self.storage.set(STORAGE_KEY, &queue) {
            warn!(id = %id, "pending event could not be persisted, holding it in memory");
            self.unpersisted.lock().push(entry);
        }
        id
    }

    /// Take everything out of the queue: user-data entries are dropped (the
    /// current page fires its own), stale entries are discarded, the rest
    /// comes back oldest first. Processed ids are removed from storage;
    /// entries queued concurrently under other ids survive.
    pub fn drain(&self) -> DrainedEvents {
        let mut queue = self.pending();
        if queue.is_empty() {
            return DrainedEvents::default();
        }
        queue.sort_by_key(|p| p.timestamp);

        let now = Utc::now().timestamp_millis();
        let mut drained = DrainedEvents::default();
        let mut processed = Vec::with_capacity(queue.len());
        for pending in queue {
            processed.push(pending.id.clone());
            if pending.event.event == DL_USER_DATA {
                drained.dropped_user_data += 1;
            } else if now - pending.timestamp > self.stale_after_ms {
                drained.expired += 1;
            } else {
                drained.deliver.push(pending.event);
            }
        }

        self.unpersisted.lock().retain(|p| !processed.contains(&p.id));
        let remaining: Vec<PendingEvent> = self
            .stored()
            .into_iter()
            .filter(|p| !processed.contains(&p.id))
            .collect();
        if remaining.is_empty() {
            self.storage.remove(STORAGE_KEY);
        } else {
            self.storage.set(STORAGE_KEY, &remaining);
        }

        info!(
            deliver = drained.deliver.len(),
            dropped_user_data = drained.dropped_user_data,
            expired = drained.expired,
            "pending events drained"
        );
        drained
    }

    pub fn clear(&self) {
        self.unpersisted.lock().clear();
        self.storage.remove(STORAGE_KEY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use campaign_cart_core::storage::MemoryBackend;

    fn queue() -> (PendingEventsQueue, StorageAdapter) {
        let storage = StorageAdapter::memory();
        (PendingEventsQueue::new(storage.clone(), 5 * 60 * 1000), storage)
    }

    #[test]
    fn test_queue_ids_are_unique() {
        let (q, _) = queue();
        let a = q.queue_event(EventEnvelope::named("dl_purchase"));
        let b = q.queue_event(EventEnvelope::named("dl_purchase"));
        assert_ne!(a, b);
        assert!(a.starts_with("dl_purchase-"));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_drain_filters_user_data_and_stale() {
        let (q, storage) = queue();
        let now = Utc::now().timestamp_millis();
        let entries = vec![
            PendingEvent {
                event: EventEnvelope::named("dl_accepted_upsell"),
                timestamp: now - 1_000,
                id: "b".into(),
            },
            PendingEvent {
                event: EventEnvelope::named("dl_user_data"),
                timestamp: now - 2_000,
                id: "u".into(),
            },
            PendingEvent {
                event: EventEnvelope::named("dl_purchase"),
                timestamp: now - 10 * 60 * 1000,
                id: "old".into(),
            },
            PendingEvent {
                event: EventEnvelope::named("dl_purchase"),
                timestamp: now - 3_000,
                id: "a".into(),
            },
        ];
        storage.set(STORAGE_KEY, &entries);

        let drained = q.drain();
        let names: Vec<_> = drained.deliver.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(names, vec!["dl_purchase", "dl_accepted_upsell"]);
        assert_eq!(drained.dropped_user_data, 1);
        assert_eq!(drained.expired, 1);
        assert!(q.is_empty());
    }

    #[test]
    fn test_refused_write_keeps_event_in_memory() {
        let denied = StorageAdapter::new(Arc::new(MemoryBackend::unavailable()), "next-");
        let q = PendingEventsQueue::new(denied, 5 * 60 * 1000);
        let id = q.queue_event(EventEnvelope::named("dl_purchase"));
        assert_eq!(q.len(), 1);
        assert_eq!(q.pending()[0].id, id);

        let drained = q.drain();
        assert_eq!(drained.deliver.len(), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn test_over_quota_write_merges_with_stored_entries() {
        // Room for one entry only.
        let storage = StorageAdapter::new(Arc::new(MemoryBackend::with_quota(240)), "next-");
        let q = PendingEventsQueue::new(storage.clone(), 5 * 60 * 1000);
        q.queue_event(EventEnvelope::named("dl_purchase"));
        for _ in 0..3 {
            q.queue_event(EventEnvelope::named("dl_accepted_upsell"));
        }
        let stored: Vec<PendingEvent> = storage.get(STORAGE_KEY).unwrap_or_default();
        assert_eq!(stored.len(), 1);
        assert_eq!(q.len(), 4);

        let names: Vec<String> = q.drain().deliver.into_iter().map(|e| e.event).collect();
        assert_eq!(names[0], "dl_purchase");
        assert_eq!(names.len(), 4);
        assert!(q.is_empty());
    }

    #[test]
    fn test_drain_twice_is_noop() {
        let (q, _) = queue();
        q.queue_event(EventEnvelope::named("dl_purchase"));
        assert_eq!(q.drain().deliver.len(), 1);
        let second = q.drain();
        assert!(second.deliver.is_empty());
        assert_eq!(second.expired + second.dropped_user_data, 0);
    }
}
