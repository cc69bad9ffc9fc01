//! Best-effort container metadata via `ffprobe`.

use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

/// Duration and dimensions of a media file; unknown fields are zero
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaMetadata {
    /// Duration in whole seconds
    pub duration: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

/// Read metadata from `path`. Never fails: a missing `ffprobe`, an
/// unreadable container or absent fields all yield zeros.
pub async fn probe(path: &Path) -> MediaMetadata {
    let output = Command::new("ffprobe")
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => parse_probe_output(&out.stdout),
        Ok(out) => {
            debug!(status = ?out.status, "ffprobe failed, using empty metadata");
            MediaMetadata::default()
        }
        Err(e) => {
            debug!(error = %e, "ffprobe unavailable, using empty metadata");
            MediaMetadata::default()
        }
    }
}

/// Extract metadata from `ffprobe -print_format json` output
#[must_use]
pub fn parse_probe_output(json: &[u8]) -> MediaMetadata {
    let parsed: ProbeOutput = serde_json::from_slice(json).unwrap_or_default();
    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    let duration = parsed
        .format
        .duration
        .as_deref()
        .or_else(|| parsed.streams.iter().find_map(|s| s.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .map_or(0, |d| d as u32);

    MediaMetadata {
        duration,
        width: video.and_then(|v| v.width).unwrap_or(0),
        height: video.and_then(|v| v.height).unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_video() {
        let json = br#"{
            "streams": [
                {"codec_type": "audio", "duration": "212.1"},
                {"codec_type": "video", "width": 1280, "height": 720}
            ],
            "format": {"duration": "212.480000"}
        }"#;
        assert_eq!(
            parse_probe_output(json),
            MediaMetadata {
                duration: 212,
                width: 1280,
                height: 720
            }
        );
    }

    #[test]
    fn test_parse_audio_falls_back_to_stream_duration() {
        let json = br#"{"streams": [{"codec_type": "audio", "duration": "61.9"}], "format": {}}"#;
        let meta = parse_probe_output(json);
        assert_eq!(meta.duration, 61);
        assert_eq!((meta.width, meta.height), (0, 0));
    }

    #[test]
    fn test_garbage_is_zero() {
        assert_eq!(parse_probe_output(b"not json"), MediaMetadata::default());
        assert_eq!(
            parse_probe_output(br#"{"format": {"duration": "N/A"}}"#),
            MediaMetadata::default()
        );
    }

    #[tokio::test]
    async fn test_probe_never_fails() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("noise.mp4");
        tokio::fs::write(&path, b"definitely not a container").await?;
        assert_eq!(probe(&path).await, MediaMetadata::default());
        Ok(())
    }
}
