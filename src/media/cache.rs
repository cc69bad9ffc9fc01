//! Content-addressed media cache.
//!
//! A flat directory of `<sha256(url)>.<ext>` files. A file at the
//! deterministic path is the only hit signal: there is no expiry and no
//! content check. Writers go through a hidden temp file in the same directory
//! and [`MediaCache::commit`] renames it into place, so an interrupted
//! download can never masquerade as a hit.

use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Handle on the cache directory
#[derive(Debug, Clone)]
pub struct MediaCache {
    dir: PathBuf,
}

impl MediaCache {
    /// Cache rooted at `dir` (not created until [`Self::init`])
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the cache directory if needed and sweep leftovers of
    /// interrupted jobs (`.*.part` downloads and staged thumbnails).
    ///
    /// Returns the number of files removed. Call before any job starts.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or read.
    pub async fn init(&self) -> io::Result<usize> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let stale = (name.starts_with('.') && name.ends_with(".part"))
                || (name.starts_with("thumb_") && name.ends_with(".jpg"));
            if stale && entry.file_type().await?.is_file() {
                self.evict(&entry.path()).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Swept leftovers of interrupted jobs");
        }
        Ok(removed)
    }

    /// Cache directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stable key for a source URL: hex SHA-256 of the raw string.
    ///
    /// # Examples
    ///
    /// ```
    /// use oxide_courier::media::MediaCache;
    /// let a = MediaCache::key_for("https://youtu.be/abc?t=1");
    /// assert_eq!(a, MediaCache::key_for("https://youtu.be/abc?t=1"));
    /// assert_ne!(a, MediaCache::key_for("https://youtu.be/abc?t=2"));
    /// assert_eq!(a.len(), 64);
    /// ```
    #[must_use]
    pub fn key_for(url: &str) -> String {
        format!("{:x}", Sha256::digest(url.as_bytes()))
    }

    /// Final location of a cached payload
    #[must_use]
    pub fn path_for(&self, key: &str, extension: &str) -> PathBuf {
        self.dir.join(format!("{key}.{extension}"))
    }

    /// Unique temp file for an in-progress write of `key`.
    ///
    /// Lives in the cache directory so the final rename stays on one filesystem.
    #[must_use]
    pub fn temp_path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!(".{key}.{}.part", uuid::Uuid::new_v4().as_simple()))
    }

    /// Where one job stages the thumbnail for `key` during its upload.
    ///
    /// Unique per call, so concurrent jobs for the same URL never share it.
    #[must_use]
    pub fn thumbnail_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("thumb_{key}.{}.jpg", uuid::Uuid::new_v4().as_simple()))
    }

    /// Whether a cached payload exists at `path`
    pub async fn exists(path: &Path) -> bool {
        tokio::fs::metadata(path).await.is_ok_and(|m| m.is_file())
    }

    /// Atomically move a finished temp file to its final path.
    ///
    /// # Errors
    ///
    /// Returns an error if the rename fails.
    pub async fn commit(&self, temp: &Path, target: &Path) -> io::Result<()> {
        tokio::fs::rename(temp, target).await?;
        debug!(path = %target.display(), "Cache entry committed");
        Ok(())
    }

    /// Delete a cache entry or temp file; a missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns any other filesystem error.
    pub async fn evict(&self, path: &Path) -> io::Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                info!(path = %path.display(), "Evicted cache file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
