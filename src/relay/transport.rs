//! Delivery mechanisms for serialized event records
//!
//! A [`Transport`] takes one serialized record and hands it somewhere:
//! the diagnostic log, a one-shot HTTP request, or the persistent socket
//! relay in [`super::socket`]. `send` must never block the caller.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use crate::error::{Error, Result};

/// A delivery mechanism for serialized event records
pub trait Transport: Send + Sync {
    /// Short name for log lines
    fn name(&self) -> &'static str;

    /// Hand one serialized record to this mechanism. Must not block.
    fn send(&self, frame: &str) -> Result<()>;
}

/// Mirrors every record to the diagnostic log. Cannot fail.
pub struct ConsoleMirror;

impl Transport for ConsoleMirror {
    fn name(&self) -> &'static str {
        "console"
    }

    fn send(&self, frame: &str) -> Result<()> {
        tracing::info!(target: "inkstream::mirror", "{}", frame);
        Ok(())
    }
}

/// One outbound HTTP request per record, fire-and-forget.
///
/// No retry, no response handling: a failed request is logged at debug
/// level and dropped. Reliability for this transport is an explicit
/// non-goal; the socket relay is the reliable path.
pub struct HttpSender {
    client: reqwest::Client,
    url: String,
}

impl HttpSender {
    pub fn new(url: String) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, url })
    }
}

impl Transport for HttpSender {
    fn name(&self) -> &'static str {
        "http"
    }

    fn send(&self, frame: &str) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            Error::Transport("http sender requires a running tokio runtime".to_string())
        })?;

        let client = self.client.clone();
        let url = self.url.clone();
        let body = frame.to_owned();

        handle.spawn(async move {
            if let Err(error) = client.post(&url).body(body).send().await {
                tracing::debug!(url = %url, error = %error, "HTTP send dropped");
            }
        });
        Ok(())
    }
}
