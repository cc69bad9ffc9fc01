//! Resolution of source URLs through the remote lookup API.
//!
//! `GET {base}/{endpoint}?url={url}` answers with
//! `{"success": bool, "result": {"title", "quality", "download_url", "thumbnail"}}`.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::MediaError;

/// Fields of a successful lookup; any of them may be absent
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResolvedMedia {
    /// Display title
    pub title: Option<String>,
    /// Quality tag, e.g. `720p`
    pub quality: Option<String>,
    /// Direct download URL
    pub download_url: Option<String>,
    /// Thumbnail URL
    pub thumbnail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    success: Option<bool>,
    #[serde(default)]
    result: Option<ResolvedMedia>,
}

/// Looks up download information for a source URL
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Resolve `url` through `endpoint` (e.g. `youtube/audio`).
    ///
    /// Only transport and envelope checks happen here; which fields are
    /// required depends on the caller's cache state.
    async fn resolve(&self, endpoint: &str, url: &str) -> Result<ResolvedMedia, MediaError>;
}

/// [`MediaResolver`] backed by the HTTP lookup API
#[derive(Debug, Clone)]
pub struct HttpResolver {
    client: reqwest::Client,
    base: String,
}

impl HttpResolver {
    /// Resolver against `base` (no trailing slash needed)
    #[must_use]
    pub fn new(client: reqwest::Client, base: impl Into<String>) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self { client, base }
    }
}

#[async_trait]
impl MediaResolver for HttpResolver {
    #[instrument(skip(self))]
    async fn resolve(&self, endpoint: &str, url: &str) -> Result<ResolvedMedia, MediaError> {
        let api_url = format!("{}/{endpoint}", self.base);
        let response = self
            .client
            .get(&api_url)
            .query(&[("url", url)])
            .send()
            .await
            .map_err(|e| MediaError::Resolution(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "Lookup API returned an error status");
            return Err(MediaError::Resolution(format!(
                "Server responded with status {}",
                status.as_u16()
            )));
        }

        let body: LookupResponse = response
            .json()
            .await
            .map_err(|e| MediaError::Resolution(format!("invalid response: {e}")))?;
        if body.success != Some(true) {
            return Err(MediaError::Resolution("Could not process the URL.".to_string()));
        }
        let resolved = body.result.unwrap_or_default();
        debug!(title = ?resolved.title, quality = ?resolved.quality, "URL resolved");
        Ok(resolved)
    }
}
