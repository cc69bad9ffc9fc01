//! The media acquisition pipeline.
//!
//! One job runs: admission, resolve, fetch (on a cache miss), size check,
//! metadata, delivery, completion. Every step can fail on its own and every
//! failure ends the job with the status message replaced by an error.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::admission::{AdmissionGuard, AdmissionPermit};
use super::cache::MediaCache;
use super::caption::build_caption;
use super::fetch::MediaFetcher;
use super::metadata;
use super::progress;
use super::resolver::MediaResolver;
use super::{
    endpoint_for, DeliveryArtifact, MediaAttributes, MediaError, MediaFormat, MediaJob,
    MediaSource, OutputChannel,
};
use crate::config::{CAPTION_LIMIT, DONE_MARKER_LINGER, PROGRESS_INTERVAL};

const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// A request to fetch one URL for one requester
#[derive(Debug, Clone)]
pub struct MediaRequest {
    /// Who asked; the admission key
    pub requester: i64,
    /// Source URL
    pub url: String,
    /// Platform
    pub source: MediaSource,
    /// Requested format
    pub format: MediaFormat,
}

/// Shared pipeline state: cache, admission set and collaborators
pub struct MediaPipeline {
    cache: MediaCache,
    admission: AdmissionGuard,
    resolver: Arc<dyn MediaResolver>,
    fetcher: Arc<dyn MediaFetcher>,
    max_file_size: u64,
    progress_interval: Duration,
    done_linger: Duration,
}

impl MediaPipeline {
    /// Pipeline over `cache` with a fixed size ceiling
    #[must_use]
    pub fn new(
        cache: MediaCache,
        resolver: Arc<dyn MediaResolver>,
        fetcher: Arc<dyn MediaFetcher>,
        max_file_size: u64,
    ) -> Self {
        Self {
            cache,
            admission: AdmissionGuard::new(),
            resolver,
            fetcher,
            max_file_size,
            progress_interval: PROGRESS_INTERVAL,
            done_linger: DONE_MARKER_LINGER,
        }
    }

    /// Override the progress interval and the "done" marker linger
    #[must_use]
    pub const fn with_timings(mut self, progress_interval: Duration, done_linger: Duration) -> Self {
        self.progress_interval = progress_interval;
        self.done_linger = done_linger;
        self
    }

    /// Admission set shared by all jobs
    #[must_use]
    pub const fn admission(&self) -> &AdmissionGuard {
        &self.admission
    }

    /// The cache
    #[must_use]
    pub const fn cache(&self) -> &MediaCache {
        &self.cache
    }

    /// Active size ceiling in bytes
    #[must_use]
    pub const fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Run a full job for `request`, claiming its admission slot first.
    ///
    /// # Errors
    ///
    /// [`MediaError::Busy`] if the requester already has a job in flight;
    /// otherwise whatever step failed. The status has already been updated.
    pub async fn run(
        &self,
        request: &MediaRequest,
        output: &dyn OutputChannel,
    ) -> Result<MediaJob, MediaError> {
        let Some(permit) = self.admission.try_acquire(request.requester) else {
            let busy = MediaError::Busy;
            set_status(output, &busy.user_message()).await;
            return Err(busy);
        };
        self.run_admitted(permit, request, output).await
    }

    /// Run a full job under an already claimed slot. The slot is released on return.
    ///
    /// # Errors
    ///
    /// Returns the error of the failing step; the status shows it.
    #[instrument(skip(self, _permit, request, output), fields(requester = request.requester, url = %request.url))]
    pub async fn run_admitted(
        &self,
        _permit: AdmissionPermit,
        request: &MediaRequest,
        output: &dyn OutputChannel,
    ) -> Result<MediaJob, MediaError> {
        let result = match self.acquire(request, output).await {
            Ok(job) => self.deliver(&job, output).await.map(|()| job),
            Err(e) => Err(e),
        };

        match &result {
            Ok(job) => {
                info!(path = %job.path.display(), cached = job.from_cache, "Media job finished");
                set_status(output, "✅ <b>Done!</b>").await;
                tokio::time::sleep(self.done_linger).await;
                if let Err(e) = output.delete_status().await {
                    debug!(error = %e, "Could not remove status message");
                }
            }
            Err(e) => {
                warn!(error = %e, "Media job failed");
                set_status(output, &e.user_message()).await;
            }
        }
        result
    }

    /// Resolve, fetch on a miss and enforce the size ceiling.
    ///
    /// Metadata is re-resolved on every call; on a hit the download URL is
    /// not needed and no network fetch happens.
    ///
    /// # Errors
    ///
    /// [`MediaError::Resolution`], [`MediaError::Download`] or
    /// [`MediaError::SizeExceeded`]; the cache is left without partial or
    /// oversized files.
    pub async fn acquire(
        &self,
        request: &MediaRequest,
        output: &dyn OutputChannel,
    ) -> Result<MediaJob, MediaError> {
        let endpoint = endpoint_for(request.source, request.format)?;
        let key = MediaCache::key_for(&request.url);
        let path = self.cache.path_for(&key, request.format.extension());
        let from_cache = MediaCache::exists(&path).await;

        let resolved = self.resolver.resolve(endpoint, &request.url).await?;
        let title = resolved
            .title
            .ok_or_else(|| MediaError::Resolution("Response has no title".to_string()))?;
        let quality = resolved
            .quality
            .ok_or_else(|| MediaError::Resolution("Response has no quality".to_string()))?;

        let size = if from_cache {
            info!(key = %key, "Cache hit");
            set_status(output, "✅ <b>Using cached file. Preparing to upload...</b>").await;
            let size = tokio::fs::metadata(&path).await?.len();
            self.enforce_ceiling(&path, size).await?;
            size
        } else {
            let download_url = resolved
                .download_url
                .filter(|u| !u.is_empty())
                .ok_or_else(|| MediaError::Resolution("Could not find a download URL.".to_string()))?;
            set_status(
                output,
                &format!("📥 Downloading <code>{}</code>...", html_escape::encode_text(&title)),
            )
            .await;
            self.download_into_cache(&key, &download_url, &path).await?
        };

        Ok(MediaJob {
            url: request.url.clone(),
            source: request.source,
            format: request.format,
            key,
            title,
            quality,
            thumbnail_url: resolved.thumbnail.filter(|u| !u.is_empty()),
            path,
            size,
            from_cache,
        })
    }

    /// Hand a cached job to the output channel with progress reporting.
    ///
    /// # Errors
    ///
    /// [`MediaError::Delivery`] if the channel rejects the upload.
    pub async fn deliver(&self, job: &MediaJob, output: &dyn OutputChannel) -> Result<(), MediaError> {
        set_status(
            output,
            &format!("📤 Uploading <code>{}</code>...", html_escape::encode_text(&job.title)),
        )
        .await;

        let meta = metadata::probe(&job.path).await;
        let attributes = match job.format {
            MediaFormat::Mp3 => MediaAttributes::Audio {
                duration: meta.duration,
                title: job.title.clone(),
                performer: job.source.display_name().to_string(),
            },
            MediaFormat::Mp4 => MediaAttributes::Video {
                duration: meta.duration,
                width: meta.width,
                height: meta.height,
                supports_streaming: true,
            },
        };
        let thumbnail = match &job.thumbnail_url {
            Some(url) => self.fetch_thumbnail(&job.key, url).await,
            None => None,
        };

        let artifact = DeliveryArtifact {
            path: job.path.clone(),
            file_name: format!("{}.{}", sanitize_file_name(&job.title), job.format.extension()),
            caption: build_caption(&job.title, &job.quality, CAPTION_LIMIT),
            thumbnail,
            attributes,
            size: job.size,
        };

        let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let (sent, ()) = tokio::join!(
            output.send_file(&artifact, tx),
            progress::relay(rx, output, &job.title, self.progress_interval)
        );

        if let Some(thumb) = &artifact.thumbnail {
            if let Err(e) = self.cache.evict(thumb).await {
                warn!(error = %e, "Failed to remove thumbnail");
            }
        }
        sent.map_err(|e| MediaError::Delivery(e.to_string()))
    }

    async fn download_into_cache(&self, key: &str, url: &str, target: &Path) -> Result<u64, MediaError> {
        let temp = self.cache.temp_path_for(key);
        let fetched = self.fetcher.fetch(url, &temp).await;
        let checked = match fetched {
            Ok(_) => match tokio::fs::metadata(&temp).await {
                Ok(meta) => self.enforce_ceiling(&temp, meta.len()).await.map(|()| meta.len()),
                Err(e) => Err(e.into()),
            },
            Err(e) => Err(e),
        };

        match checked {
            Ok(size) => {
                self.cache.commit(&temp, target).await?;
                info!(key, size, "Downloaded into cache");
                Ok(size)
            }
            Err(e) => {
                if let Err(cleanup) = self.cache.evict(&temp).await {
                    warn!(error = %cleanup, "Failed to remove partial download");
                }
                Err(e)
            }
        }
    }

    /// Evicts `path` and fails if `size` is over the ceiling
    async fn enforce_ceiling(&self, path: &Path, size: u64) -> Result<(), MediaError> {
        if size <= self.max_file_size {
            return Ok(());
        }
        warn!(size, limit = self.max_file_size, "Artifact over size ceiling");
        self.cache.evict(path).await?;
        Err(MediaError::SizeExceeded {
            size,
            limit: self.max_file_size,
        })
    }

    async fn fetch_thumbnail(&self, key: &str, url: &str) -> Option<PathBuf> {
        let path = self.cache.thumbnail_path(key);
        match self.fetcher.fetch(url, &path).await {
            Ok(_) => Some(path),
            Err(e) => {
                debug!(error = %e, "Thumbnail unavailable");
                if let Err(cleanup) = self.cache.evict(&path).await {
                    warn!(error = %cleanup, "Failed to remove partial thumbnail");
                }
                None
            }
        }
    }
}

async fn set_status(output: &dyn OutputChannel, text: &str) {
    if let Err(e) = output.edit_status(text).await {
        debug!(error = %e, "Status update failed");
    }
}

fn sanitize_file_name(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    let cleaned = crate::utils::truncate_str(cleaned.trim(), 200);
    if cleaned.is_empty() {
        "media".to_string()
    } else {
        cleaned
    }
}
