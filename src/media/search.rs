//! YouTube search through the `yt-dlp` binary, used by `/play`.

use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{info, instrument, warn};

use super::MediaError;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(60);

/// First search result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    /// Video title
    pub title: String,
    /// Watch URL
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: Option<String>,
    title: Option<String>,
    webpage_url: Option<String>,
    url: Option<String>,
}

/// Search YouTube for `query` and return the top hit, if any.
///
/// # Errors
///
/// Returns [`MediaError::Resolution`] if `yt-dlp` cannot be run, fails or times out.
#[instrument]
pub async fn search_first(query: &str) -> Result<Option<SearchHit>, MediaError> {
    let output = Command::new("yt-dlp")
        .args(["-j", "--flat-playlist", "--no-warnings"])
        .arg(format!("ytsearch1:{query}"))
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();
    let output = tokio::time::timeout(SEARCH_TIMEOUT, output)
        .await
        .map_err(|_| MediaError::Resolution("Search timed out".to_string()))?
        .map_err(|e| MediaError::Resolution(format!("Failed to run yt-dlp: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(status = ?output.status, "yt-dlp search failed");
        return Err(MediaError::Resolution(format!(
            "Search failed: {}",
            crate::utils::truncate_str(stderr.trim(), 300)
        )));
    }

    let hit = parse_search_output(&String::from_utf8_lossy(&output.stdout));
    info!(found = hit.is_some(), "Search finished");
    Ok(hit)
}

/// First usable entry of `yt-dlp -j --flat-playlist` NDJSON output
#[must_use]
pub fn parse_search_output(stdout: &str) -> Option<SearchHit> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<FlatEntry>(line).ok())
        .find_map(|entry| {
            let url = entry
                .webpage_url
                .or(entry.url)
                .or_else(|| entry.id.map(|id| format!("https://www.youtube.com/watch?v={id}")))?;
            Some(SearchHit {
                title: entry.title.unwrap_or_else(|| "Unknown Title".to_string()),
                url,
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prefers_webpage_url() {
        let out = r#"{"id": "abc12345678", "title": "Song", "url": "https://www.youtube.com/watch?v=abc12345678", "webpage_url": "https://youtube.com/watch?v=abc12345678"}"#;
        assert_eq!(
            parse_search_output(out),
            Some(SearchHit {
                title: "Song".to_string(),
                url: "https://youtube.com/watch?v=abc12345678".to_string()
            })
        );
    }

    #[test]
    fn test_parse_builds_url_from_id() {
        let out = "\n{\"id\": \"xyz98765432\"}\n";
        let hit = parse_search_output(out);
        assert_eq!(
            hit.map(|h| (h.title, h.url)),
            Some((
                "Unknown Title".to_string(),
                "https://www.youtube.com/watch?v=xyz98765432".to_string()
            ))
        );
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(parse_search_output(""), None);
        assert_eq!(parse_search_output("garbage\n{}"), None);
    }
}
