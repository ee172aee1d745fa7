//! Page-global arrays that third-party scripts read directly
//! (`window.NextDataLayer`, `window.dataLayer`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

/// Shared append-only JSON array plus a "script loaded" flag for the
/// consumer that owns it.
#[derive(Clone)]
pub struct GlobalArray {
    name: &'static str,
    items: Arc<RwLock<Vec<Value>>>,
    loaded: Arc<AtomicBool>,
}

impl GlobalArray {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            items: Arc::new(RwLock::new(Vec::new())),
            loaded: Arc::new(AtomicBool::new(true)),
        }
    }

    /// An array whose owning script has not loaded yet.
    pub fn pending(name: &'static str) -> Self {
        let array = Self::new(name);
        array.set_loaded(false);
        array
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn push(&self, value: Value) {
        self.items.write().push(value);
    }

    pub fn snapshot(&self) -> Vec<Value> {
        self.items.read().clone()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn clear(&self) {
        self.items.write().clear();
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn set_loaded(&self, loaded: bool) {
        self.loaded.store(loaded, Ordering::Release);
    }
}
