//! Streaming downloads of resolved media.

use std::path::Path;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use super::MediaError;
use crate::config::{HTTP_CONNECT_TIMEOUT, HTTP_READ_TIMEOUT};

/// Build the HTTP client shared by the resolver and the fetcher.
///
/// Connect and per-read idle timeouts are set; there is no overall deadline,
/// so a large but steady transfer is never cut short.
///
/// # Errors
///
/// Returns [`MediaError::Download`] if the TLS backend cannot be initialized.
pub fn media_http_client() -> Result<reqwest::Client, MediaError> {
    reqwest::Client::builder()
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .read_timeout(HTTP_READ_TIMEOUT)
        .build()
        .map_err(|e| MediaError::Download(format!("Failed to build HTTP client: {e}")))
}

/// Downloads a URL to a local file
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Stream `url` into `dest` (created or truncated), returning the bytes written.
    ///
    /// On error `dest` may hold a partial file; the caller owns cleanup.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, MediaError>;
}

/// [`MediaFetcher`] over reqwest
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Fetcher using `client`
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    #[instrument(skip(self, dest), fields(dest = %dest.display()))]
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, MediaError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| MediaError::Download(e.to_string()))?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| MediaError::Download(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        debug!(bytes = written, "Download finished");
        Ok(written)
    }
}
