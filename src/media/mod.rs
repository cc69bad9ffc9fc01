//! Media acquisition: resolve a source URL, cache the payload, deliver it.
//!
//! The pipeline is transport-agnostic. Everything it needs from the chat
//! side goes through [`OutputChannel`]; the Telegram implementation lives in
//! `bot::transport`.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use lazy_regex::{lazy_regex, Lazy, Regex};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::utils::human_readable_size;

/// Per-requester mutual exclusion.
pub mod admission;
/// Content-addressed media cache.
pub mod cache;
/// Caption assembly.
pub mod caption;
/// Streaming HTTP downloads.
pub mod fetch;
/// Container metadata extraction.
pub mod metadata;
/// The acquisition pipeline.
pub mod pipeline;
/// Progress throttling and rendering.
pub mod progress;
/// Remote URL resolution.
pub mod resolver;
/// Search for `/play`.
pub mod search;

pub use admission::{AdmissionGuard, AdmissionPermit};
pub use cache::MediaCache;
pub use fetch::{media_http_client, HttpFetcher, MediaFetcher};
pub use pipeline::{MediaPipeline, MediaRequest};
pub use progress::ProgressEvent;
pub use resolver::{HttpResolver, MediaResolver, ResolvedMedia};

/// Errors produced by media jobs. All of them end the job; none is retried.
#[derive(Error, Debug)]
pub enum MediaError {
    /// The requester already has a job in flight
    #[error("A download is already in progress for this user")]
    Busy,
    /// The lookup API failed or returned unusable data
    #[error("API Error: {0}")]
    Resolution(String),
    /// Transport failure while fetching the payload
    #[error("Download failed: {0}")]
    Download(String),
    /// Artifact is larger than the active account allows
    #[error("File too large: {size} bytes (limit: {limit} bytes)")]
    SizeExceeded {
        /// Artifact size in bytes
        size: u64,
        /// Active ceiling in bytes
        limit: u64,
    },
    /// The output channel rejected the artifact
    #[error("Upload failed: {0}")]
    Delivery(String),
    /// No endpoint exists for this source and format
    #[error("Unsupported download source: {tag}/{format}")]
    UnsupportedSource {
        /// Source tag
        tag: MediaSource,
        /// Requested format
        format: MediaFormat,
    },
    /// Local filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Text shown to the requester in place of the status message
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Busy => "⏳ You already have a download in progress. Please wait.".to_string(),
            Self::SizeExceeded { size, limit } => format!(
                "🚫 File too large: {} (limit: {}).\n🗑️ Removed from cache.",
                human_readable_size(*size as f64),
                human_readable_size(*limit as f64)
            ),
            other => format!("🚫 {}", html_escape::encode_text(&other.to_string())),
        }
    }
}

/// Platform a URL comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaSource {
    /// YouTube
    Youtube,
    /// Facebook
    Facebook,
    /// TikTok
    Tiktok,
    /// Instagram
    Instagram,
}

static YOUTUBE_URL: Lazy<Regex> = lazy_regex!(
    r"^(?:https?://)?(?:www\.|m\.)?(?:youtube\.com/(?:watch\?v=|embed/|v/)|youtu\.be/)([\w-]{11})(?:\S+)?"
);
static FACEBOOK_URL: Lazy<Regex> = lazy_regex!(
    r"^(?:https?://)?(?:www\.|m\.|web\.)?(facebook\.com|fb\.watch)/(?:video\.php\?v=\d+|\S+/videos/\d+|\S+/reel/\d+|watch/\?v=\d+|reel/\d+|\d{15,})/?"
);
static TIKTOK_URL: Lazy<Regex> = lazy_regex!(r"^(?:https?://)?(?:www\.|vm\.|vt\.)?tiktok\.com/.+");
static INSTAGRAM_URL: Lazy<Regex> =
    lazy_regex!(r"^(?:https?://)?(?:www\.)?instagram\.com/(?:p|reel|tv)/[\w\-]+");

impl MediaSource {
    /// Whether `url` looks like a link this source can serve
    #[must_use]
    pub fn matches_url(self, url: &str) -> bool {
        let re: &Regex = match self {
            Self::Youtube => &YOUTUBE_URL,
            Self::Facebook => &FACEBOOK_URL,
            Self::Tiktok => &TIKTOK_URL,
            Self::Instagram => &INSTAGRAM_URL,
        };
        re.is_match(url)
    }

    /// Human name, also used as the audio performer
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Youtube => "YouTube",
            Self::Facebook => "Facebook",
            Self::Tiktok => "TikTok",
            Self::Instagram => "Instagram",
        }
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Youtube => "youtube",
            Self::Facebook => "facebook",
            Self::Tiktok => "tiktok",
            Self::Instagram => "instagram",
        };
        f.write_str(tag)
    }
}

/// Requested output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaFormat {
    /// Audio
    Mp3,
    /// Video
    Mp4,
}

impl MediaFormat {
    /// File extension without the dot
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Mp4 => "mp4",
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Lookup API endpoint for a (source, format) pair.
///
/// # Errors
///
/// Returns [`MediaError::UnsupportedSource`] for pairs the API does not serve.
///
/// # Examples
///
/// ```
/// use oxide_courier::media::{endpoint_for, MediaFormat, MediaSource};
/// assert_eq!(endpoint_for(MediaSource::Youtube, MediaFormat::Mp3).ok(), Some("youtube/audio"));
/// assert!(endpoint_for(MediaSource::Tiktok, MediaFormat::Mp3).is_err());
/// ```
pub fn endpoint_for(source: MediaSource, format: MediaFormat) -> Result<&'static str, MediaError> {
    match (source, format) {
        (MediaSource::Youtube, MediaFormat::Mp4) => Ok("youtube/videofhd"),
        (MediaSource::Youtube, MediaFormat::Mp3) => Ok("youtube/audio"),
        (MediaSource::Facebook, MediaFormat::Mp4) => Ok("facebook/video"),
        (MediaSource::Tiktok, MediaFormat::Mp4) => Ok("tiktok/video"),
        (MediaSource::Instagram, MediaFormat::Mp4) => Ok("instagram/video"),
        (tag, format) => Err(MediaError::UnsupportedSource { tag, format }),
    }
}

/// A resolved, cached media item ready for delivery. Never persisted.
#[derive(Debug, Clone)]
pub struct MediaJob {
    /// Source URL as requested
    pub url: String,
    /// Platform
    pub source: MediaSource,
    /// Requested format
    pub format: MediaFormat,
    /// Cache key of the URL
    pub key: String,
    /// Display title
    pub title: String,
    /// Quality tag reported by the lookup API
    pub quality: String,
    /// Thumbnail URL, if the API returned one
    pub thumbnail_url: Option<String>,
    /// Cached file
    pub path: PathBuf,
    /// Size of the cached file in bytes
    pub size: u64,
    /// Whether the payload was already cached
    pub from_cache: bool,
}

/// Type-specific attributes sent along with the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaAttributes {
    /// Audio track
    Audio {
        /// Duration in seconds
        duration: u32,
        /// Track title
        title: String,
        /// Performer shown by clients
        performer: String,
    },
    /// Video clip
    Video {
        /// Duration in seconds
        duration: u32,
        /// Width in pixels
        width: u32,
        /// Height in pixels
        height: u32,
        /// Whether clients may start playback before the download finishes
        supports_streaming: bool,
    },
}

/// Everything the output channel needs to deliver a job
#[derive(Debug, Clone)]
pub struct DeliveryArtifact {
    /// File to upload
    pub path: PathBuf,
    /// File name shown to the recipient
    pub file_name: String,
    /// Caption (HTML)
    pub caption: String,
    /// Optional local thumbnail
    pub thumbnail: Option<PathBuf>,
    /// Type-specific attributes
    pub attributes: MediaAttributes,
    /// Total size in bytes, for progress reporting
    pub size: u64,
}

/// The chat-side collaborator a media job reports to.
///
/// Status texts are HTML.
#[async_trait]
pub trait OutputChannel: Send + Sync {
    /// Replace the status indicator text
    async fn edit_status(&self, text: &str) -> anyhow::Result<()>;

    /// Remove the status indicator
    async fn delete_status(&self) -> anyhow::Result<()>;

    /// Upload the artifact, reporting progress on `progress`.
    ///
    /// Implementations must not block on a full progress channel.
    async fn send_file(
        &self,
        artifact: &DeliveryArtifact,
        progress: mpsc::Sender<ProgressEvent>,
    ) -> anyhow::Result<()>;
}
