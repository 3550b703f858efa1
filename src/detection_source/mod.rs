//! DetectionSource - Upstream Plate-Read API Adapter
//!
//! ## Responsibilities
//!
//! - Fetch the current detection list (JSON array) from the recogniser API
//! - Bound every request with a per-call timeout
//! - Map transport, status and body failures onto crate errors

use crate::error::{Error, Result};
use crate::models::RawDetection;
use async_trait::async_trait;
use std::time::Duration;

/// Default per-request timeout
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of raw detections, polled by the orchestrator
#[async_trait]
pub trait DetectionSource: Send + Sync {
    /// Fetch the detections currently published by the source, in response order
    async fn fetch(&self) -> Result<Vec<RawDetection>>;

    /// Cheap reachability probe
    async fn test_connection(&self) -> bool {
        self.fetch().await.is_ok()
    }
}

/// HTTP GET source
pub struct HttpDetectionSource {
    client: reqwest::Client,
    api_url: String,
}

impl HttpDetectionSource {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url: api_url.into(),
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

#[async_trait]
impl DetectionSource for HttpDetectionSource {
    async fn fetch(&self) -> Result<Vec<RawDetection>> {
        let resp = self.client.get(&self.api_url).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Api(format!(
                "{} returned {}",
                self.api_url,
                resp.status()
            )));
        }

        let body = resp.text().await?;
        parse_detections(&body)
    }

    async fn test_connection(&self) -> bool {
        match self.client.get(&self.api_url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(url = %self.api_url, error = %e, "Connection probe failed");
                false
            }
        }
    }
}

/// Parse a response body. A JSON `null` is an empty list; anything that is not
/// an array of detection objects is an error.
pub fn parse_detections(body: &str) -> Result<Vec<RawDetection>> {
    let parsed: Option<Vec<RawDetection>> = serde_json::from_str(body)?;
    Ok(parsed.unwrap_or_default())
}
