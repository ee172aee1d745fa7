//! HTTP seam for adapters that post to servers (webhook, campaign API).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::info;

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// POST a JSON body; returns the HTTP status code.
    async fn post_json(&self, url: &str, headers: &HashMap<String, String>, body: &Value) -> Result<u16>;
}

/// Writes every request to the log and reports success.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTransport;

#[async_trait]
impl HttpTransport for LoggingTransport {
    async fn post_json(&self, url: &str, headers: &HashMap<String, String>, body: &Value) -> Result<u16> {
        info!(url, headers = headers.len(), body = %body, "HTTP POST");
        Ok(200)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

/// Records requests; the first `failures` calls fail with a transport error.
#[derive(Default)]
pub struct RecordingTransport {
    requests: Mutex<Vec<RecordedRequest>>,
    attempts: AtomicU32,
    failures: AtomicU32,
    status: Option<u16>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(failures: u32) -> Self {
        let transport = Self::default();
        transport.failures.store(failures, Ordering::SeqCst);
        transport
    }

    /// Every request is answered with `status`.
    pub fn with_status(status: u16) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for RecordingTransport {
    async fn post_json(&self, url: &str, headers: &HashMap<String, String>, body: &Value) -> Result<u16> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures.load(Ordering::SeqCst) {
            bail!("connection refused ({url})");
        }
        self.requests.lock().push(RecordedRequest {
            url: url.to_string(),
            headers: headers.clone(),
            body: body.clone(),
        });
        Ok(self.status.unwrap_or(200))
    }
}
