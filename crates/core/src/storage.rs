//! Key/value persistence over session/local storage with serde hooks.
//!
//! [`StorageAdapter`] never returns an error: every backend failure (quota,
//! privacy mode, corrupt JSON) is logged and degrades to the caller's default.

use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::StorageError;

/// Raw string storage, the shape of the browser's `Storage` interface.
pub trait StorageBackend: Send + Sync {
    fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_raw(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// In-memory backend with an optional byte quota.
#[derive(Default)]
pub struct MemoryBackend {
    entries: DashMap<String, String>,
    quota_bytes: usize,
    unavailable: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that rejects writes pushing the total above `quota_bytes`.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            quota_bytes,
            ..Self::default()
        }
    }

    /// A backend that fails every call, like storage in a locked-down
    /// private browsing window.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    fn used_bytes(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.key().len() + e.value().len())
            .sum()
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.unavailable {
            return Err(StorageError::Unavailable("storage disabled".into()));
        }
        Ok(())
    }
}

impl StorageBackend for MemoryBackend {
    fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set_raw(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check()?;
        if self.quota_bytes > 0 {
            let existing = self
                .entries
                .get(key)
                .map_or(0, |v| key.len() + v.value().len());
            let projected = self.used_bytes() - existing + key.len() + value.len();
            if projected > self.quota_bytes {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    bytes: value.len(),
                });
            }
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.check()?;
        Ok(self.entries.iter().map(|e| e.key().clone()).collect())
    }
}

/// Namespaced, serde-aware view over a [`StorageBackend`].
#[derive(Clone)]
pub struct StorageAdapter {
    backend: Arc<dyn StorageBackend>,
    prefix: String,
}

impl StorageAdapter {
    pub fn new(backend: Arc<dyn StorageBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    /// Adapter over a fresh [`MemoryBackend`] with the default `next-` prefix.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), "next-")
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let full = self.full_key(key);
        let raw = match self.backend.get_raw(&full) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key = %full, error = %e, "storage read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %full, error = %e, "discarding unreadable storage entry");
                None
            }
        }
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// Serialize and store `value`. Returns `false` when the write was lost.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        let full = self.full_key(key);
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %full, error = %e, "storage serialization failed");
                return false;
            }
        };
        match self.backend.set_raw(&full, &raw) {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %full, error = %e, "storage write failed");
                false
            }
        }
    }

    pub fn remove(&self, key: &str) {
        let full = self.full_key(key);
        if let Err(e) = self.backend.remove(&full) {
            warn!(key = %full, error = %e, "storage remove failed");
        }
    }

    /// Remove every key under this adapter's prefix.
    pub fn clear_namespace(&self) {
        let keys = match self.backend.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(prefix = %self.prefix, error = %e, "storage key listing failed");
                return;
            }
        };
        for key in keys.into_iter().filter(|k| k.starts_with(&self.prefix)) {
            if let Err(e) = self.backend.remove(&key) {
                warn!(key = %key, error = %e, "storage remove failed");
            }
        }
    }
}
