//! Tracks which product list the shopper was browsing so later item events
//! can carry `item_list_id` / `item_list_name`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use campaign_cart_core::dom::Document;
use campaign_cart_core::storage::StorageAdapter;

const STORAGE_KEY: &str = "analytics-list-context";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListContext {
    #[serde(default)]
    pub list_id: Option<String>,
    #[serde(default)]
    pub list_name: Option<String>,
    /// Milliseconds since the epoch when the context was recorded.
    pub timestamp: i64,
    pub url: String,
}

/// Session-persisted list context with a TTL.
pub struct ListAttributionTracker {
    storage: StorageAdapter,
    ttl_ms: i64,
}

impl ListAttributionTracker {
    pub fn new(storage: StorageAdapter, ttl_ms: u64) -> Self {
        Self {
            storage,
            ttl_ms: i64::try_from(ttl_ms).unwrap_or(i64::MAX),
        }
    }

    /// Derive list context from page meta overrides or the URL path and store
    /// it. Pages that are not list pages leave the current context alone.
    pub fn detect(&self, doc: &Document) -> Option<ListContext> {
        let meta_id = doc.meta("next-analytics-list-id").map(str::to_string);
        let meta_name = doc.meta("next-analytics-list-name").map(str::to_string);
        let (list_id, list_name) = if meta_id.is_some() || meta_name.is_some() {
            (meta_id, meta_name)
        } else {
            let (id, name) = list_from_url(&doc.location)?;
            (Some(id), Some(name))
        };
        let context = ListContext {
            list_id,
            list_name,
            timestamp: Utc::now().timestamp_millis(),
            url: doc.location.to_string(),
        };
        debug!(list_id = ?context.list_id, "list attribution detected");
        self.storage.set(STORAGE_KEY, &context);
        Some(context)
    }

    pub fn set_list(&self, list_id: Option<String>, list_name: Option<String>, url: &str) {
        let context = ListContext {
            list_id,
            list_name,
            timestamp: Utc::now().timestamp_millis(),
            url: url.to_string(),
        };
        self.storage.set(STORAGE_KEY, &context);
    }

    /// The stored context, unless it has outlived the TTL (then it is cleared).
    pub fn current(&self) -> Option<ListContext> {
        let context: ListContext = self.storage.get(STORAGE_KEY)?;
        let age = Utc::now().timestamp_millis() - context.timestamp;
        if age > self.ttl_ms {
            debug!(age_ms = age, "list attribution expired");
            self.clear();
            return None;
        }
        Some(context)
    }

    pub fn clear(&self) {
        self.storage.remove(STORAGE_KEY);
    }
}

fn title_case(handle: &str) -> String {
    handle
        .split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Map list-page URL shapes to `(list_id, list_name)`.
pub fn list_from_url(url: &Url) -> Option<(String, String)> {
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    match segments.as_slice() {
        ["collections", handle, ..] | ["category", handle, ..] | ["categories", handle, ..] => {
            Some((handle.to_string(), title_case(handle)))
        }
        ["products"] | ["shop"] => Some(("all_products".into(), "All Products".into())),
        ["search", ..] => Some(("search_results".into(), "Search Results".into())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ListAttributionTracker {
        ListAttributionTracker::new(StorageAdapter::memory(), 30 * 60 * 1000)
    }

    #[test]
    fn test_url_patterns() {
        let url = Url::parse("https://shop.example.com/collections/summer-sale").unwrap();
        assert_eq!(
            list_from_url(&url),
            Some(("summer-sale".into(), "Summer Sale".into()))
        );
        let url = Url::parse("https://shop.example.com/search?q=drops").unwrap();
        assert_eq!(list_from_url(&url).unwrap().0, "search_results");
        let url = Url::parse("https://shop.example.com/checkout").unwrap();
        assert_eq!(list_from_url(&url), None);
    }

    #[test]
    fn test_meta_overrides_url() {
        let t = tracker();
        let mut doc = Document::at("https://shop.example.com/collections/summer").unwrap();
        doc.set_meta("next-analytics-list-id", "hero-grid");
        doc.set_meta("next-analytics-list-name", "Hero Grid");
        let ctx = t.detect(&doc).unwrap();
        assert_eq!(ctx.list_id.as_deref(), Some("hero-grid"));
        assert_eq!(t.current().unwrap().list_name.as_deref(), Some("Hero Grid"));
    }

    #[test]
    fn test_non_list_page_keeps_existing_context() {
        let t = tracker();
        t.detect(&Document::at("https://shop.example.com/collections/summer").unwrap());
        assert!(t.detect(&Document::at("https://shop.example.com/checkout").unwrap()).is_none());
        assert_eq!(t.current().unwrap().list_id.as_deref(), Some("summer"));
    }

    #[test]
    fn test_expired_context_is_cleared() {
        let storage = StorageAdapter::memory();
        let t = ListAttributionTracker::new(storage.clone(), 1000);
        storage.set(
            STORAGE_KEY,
            &ListContext {
                list_id: Some("old".into()),
                list_name: None,
                timestamp: Utc::now().timestamp_millis() - 5000,
                url: "https://shop.example.com/collections/old".into(),
            },
        );
        assert!(t.current().is_none());
        assert!(storage.get::<ListContext>(STORAGE_KEY).is_none());
    }
}
