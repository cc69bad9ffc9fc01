//! Utility functions for text truncation, size/time formatting and Telegram retries.

use anyhow::Result;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

/// Safely truncates a string to a maximum character length (not bytes).
///
/// This is UTF-8 safe and will not panic on multi-byte characters.
///
/// # Examples
///
/// ```
/// use oxide_courier::utils::truncate_str;
/// let s = "Привет, мир!";
/// assert_eq!(truncate_str(s, 6), "Привет");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Shortens `s` to at most `max_chars` characters, ending it with `...` when cut.
///
/// Cuts on grapheme boundaries so emoji and combined characters stay intact.
///
/// # Examples
///
/// ```
/// use oxide_courier::utils::ellipsize;
/// assert_eq!(ellipsize("abcdefgh", 6), "abc...");
/// assert_eq!(ellipsize("abc", 6), "abc");
/// ```
#[must_use]
pub fn ellipsize(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let budget = max_chars.saturating_sub(3);
    let mut out = String::new();
    let mut used = 0;
    for grapheme in s.graphemes(true) {
        let width = grapheme.chars().count();
        if used + width > budget {
            break;
        }
        out.push_str(grapheme);
        used += width;
    }
    out.push_str("...");
    out
}

/// Formats a byte count with binary units and two decimals.
///
/// # Examples
///
/// ```
/// use oxide_courier::utils::human_readable_size;
/// assert_eq!(human_readable_size(512.0), "512.00 B");
/// assert_eq!(human_readable_size(2048.0), "2.00 KB");
/// ```
#[must_use]
pub fn human_readable_size(bytes: f64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{size:.2} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.2} PB")
}

/// Formats a duration as "1 day, 2 hours, 5 seconds".
///
/// # Examples
///
/// ```
/// use oxide_courier::utils::readable_duration;
/// assert_eq!(readable_duration(3661), "1 hour, 1 minute, 1 second");
/// assert_eq!(readable_duration(0), "a moment");
/// ```
#[must_use]
pub fn readable_duration(seconds: u64) -> String {
    const PERIODS: &[(&str, u64)] = &[("day", 86_400), ("hour", 3600), ("minute", 60), ("second", 1)];
    let mut remaining = seconds;
    let mut parts = Vec::new();
    for (name, secs) in PERIODS {
        if remaining >= *secs {
            let value = remaining / secs;
            remaining %= secs;
            let unit = if value == 1 {
                (*name).to_string()
            } else {
                format!("{name}s")
            };
            parts.push(format!("{value} {unit}"));
        }
    }
    if parts.is_empty() {
        "a moment".to_string()
    } else {
        parts.join(", ")
    }
}

/// Keeps at most `max_chars` characters of command output, marking the cut.
#[must_use]
pub fn truncate_output(output: &str, max_chars: usize) -> String {
    let total = output.chars().count();
    if total <= max_chars {
        return output.to_string();
    }
    format!(
        "{}\n\n... (truncated, {total} chars total)",
        truncate_str(output, max_chars)
    )
}

/// Retry a Telegram API operation with exponential backoff.
///
/// - Initial delay: 500ms
/// - Max delay: 4s
/// - Max attempts: 3 (constants in `config.rs`)
///
/// Used only for chat plumbing (status edits, plain replies); media jobs are never retried.
///
/// # Errors
///
/// Returns the last error if all attempts fail.
pub async fn retry_telegram_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    use crate::config::{
        TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
    };

    let retry_strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TELEGRAM_API_MAX_RETRIES);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            "Telegram API operation failed after {} attempts: {}",
            TELEGRAM_API_MAX_RETRIES, e
        );
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_str_unicode() {
        let s = "Привет, мир!";
        assert_eq!(truncate_str(s, 6), "Привет");
        assert_eq!(truncate_str(s, 50), "Привет, мир!");
    }

    #[test]
    fn test_ellipsize_keeps_graphemes() {
        let flags = "🇩🇪🇫🇷🇮🇹🇪🇸";
        let cut = ellipsize(flags, 7);
        assert!(cut.ends_with("..."));
        assert!(cut.chars().count() <= 7);
        assert!(!cut.contains('\u{FFFD}'));
    }

    #[test]
    fn test_human_readable_size_units() {
        assert_eq!(human_readable_size(0.0), "0.00 B");
        assert_eq!(human_readable_size(1536.0), "1.50 KB");
        assert_eq!(human_readable_size(2.0 * 1024.0 * 1024.0 * 1024.0), "2.00 GB");
        assert_eq!(human_readable_size(1024f64.powi(5)), "1.00 PB");
    }

    #[test]
    fn test_readable_duration_plurals() {
        assert_eq!(readable_duration(1), "1 second");
        assert_eq!(readable_duration(120), "2 minutes");
        assert_eq!(readable_duration(90_061), "1 day, 1 hour, 1 minute, 1 second");
    }

    #[test]
    fn test_truncate_output_marks_cut() {
        let long = "x".repeat(50);
        let out = truncate_output(&long, 10);
        assert!(out.starts_with("xxxxxxxxxx\n"));
        assert!(out.contains("50 chars total"));
        assert_eq!(truncate_output("short", 10), "short");
    }
}
