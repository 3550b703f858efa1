//! ImageResolver - Evidence Image Fetch with Candidate Fallback
//!
//! ## Responsibilities
//!
//! - Compose absolute image URLs from the configured API base
//! - Try candidates strictly in priority order, first non-empty payload wins
//! - No retry within a call (the next poll cycle supplies fresh detections)

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Default per-image timeout
pub const DEFAULT_IMAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Fetches one image by (possibly relative) URL
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Image bytes and the candidate that produced them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub data: Vec<u8>,
    pub url: String,
}

/// HTTP image fetcher rooted at the API base URL
pub struct HttpImageFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpImageFetcher {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn full_url(&self, path: &str) -> String {
        full_url(&self.base_url, path)
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let url = self.full_url(url);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Api(format!("Image {} returned {}", url, resp.status())));
        }

        let bytes = resp.bytes().await?;
        Ok(bytes.to_vec())
    }
}

/// Absolute URLs pass through; relative paths are joined to `base_url`
/// with exactly one `/` between them.
pub fn full_url(base_url: &str, path: &str) -> String {
    let path = path.trim();
    if path.is_empty() {
        return String::new();
    }
    let lower = path.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return path.to_string();
    }

    let base = base_url.trim().trim_end_matches('/');
    let path = path.replace('\\', "/");
    format!("{}/{}", base, path.trim_start_matches('/'))
}

/// Resolve the first fetchable candidate.
///
/// Empty payloads count as failures. When every candidate fails the result is
/// [`Error::ImageUnavailable`].
pub async fn resolve(fetcher: &dyn ImageFetcher, candidates: &[String]) -> Result<ResolvedImage> {
    for url in candidates {
        match fetcher.fetch(url).await {
            Ok(data) if !data.is_empty() => {
                tracing::debug!(url = %url, size = data.len(), "Evidence image resolved");
                return Ok(ResolvedImage {
                    data,
                    url: url.clone(),
                });
            }
            Ok(_) => {
                tracing::debug!(url = %url, "Evidence image empty, trying next candidate");
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Evidence image fetch failed, trying next candidate");
            }
        }
    }

    Err(Error::ImageUnavailable {
        attempted: candidates.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves fixed payloads and records the order of requests
    struct FakeFetcher {
        images: HashMap<String, Vec<u8>>,
        requested: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        fn new(images: &[(&str, &[u8])]) -> Self {
            Self {
                images: images
                    .iter()
                    .map(|(url, data)| (url.to_string(), data.to_vec()))
                    .collect(),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ImageFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.requested.lock().unwrap().push(url.to_string());
            self.images
                .get(url)
                .cloned()
                .ok_or_else(|| Error::Api(format!("{} returned 404 Not Found", url)))
        }
    }

    fn candidates(urls: &[&str]) -> Vec<String> {
        urls.iter().map(|u| u.to_string()).collect()
    }

    #[tokio::test]
    async fn test_second_candidate_used_when_first_fails() {
        let fetcher = FakeFetcher::new(&[("/raw.jpg", b"raw-bytes")]);
        let resolved = resolve(&fetcher, &candidates(&["/processed.jpg", "/raw.jpg"]))
            .await
            .unwrap();

        assert_eq!(resolved.url, "/raw.jpg");
        assert_eq!(resolved.data, b"raw-bytes");
        assert_eq!(
            *fetcher.requested.lock().unwrap(),
            vec!["/processed.jpg".to_string(), "/raw.jpg".to_string()]
        );
    }

    #[tokio::test]
    async fn test_first_success_stops_the_search() {
        let fetcher = FakeFetcher::new(&[("/processed.jpg", b"p"), ("/raw.jpg", b"r")]);
        let resolved = resolve(&fetcher, &candidates(&["/processed.jpg", "/raw.jpg"]))
            .await
            .unwrap();

        assert_eq!(resolved.url, "/processed.jpg");
        assert_eq!(fetcher.requested.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_all_candidates_failing_is_unavailable() {
        let fetcher = FakeFetcher::new(&[("/empty.jpg", b"")]);
        let result = resolve(&fetcher, &candidates(&["/missing.jpg", "/empty.jpg"])).await;
        assert!(matches!(result, Err(Error::ImageUnavailable { attempted: 2 })));
    }

    #[tokio::test]
    async fn test_no_candidates_is_unavailable() {
        let fetcher = FakeFetcher::new(&[]);
        let result = resolve(&fetcher, &[]).await;
        assert!(matches!(result, Err(Error::ImageUnavailable { attempted: 0 })));
    }

    #[test]
    fn test_full_url_composition() {
        assert_eq!(
            full_url("http://api:8000/", "/site/a.jpg"),
            "http://api:8000/site/a.jpg"
        );
        assert_eq!(full_url("http://api:8000", "site/a.jpg"), "http://api:8000/site/a.jpg");
        assert_eq!(
            full_url("http://api:8000", "HTTP://other/a.jpg"),
            "HTTP://other/a.jpg"
        );
        assert_eq!(full_url("http://api:8000", r"\site\a.jpg"), "http://api:8000/site/a.jpg");
        assert_eq!(full_url("http://api:8000", ""), "");
    }
}
