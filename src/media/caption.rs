//! Upload captions.

use crate::utils::ellipsize;

/// Caption showing title and quality (HTML).
///
/// `limit` applies to the visible text, which is what the transport counts;
/// the title is shortened with an ellipsis when the whole would not fit.
///
/// # Examples
///
/// ```
/// use oxide_courier::media::caption::build_caption;
/// let caption = build_caption("T", "720p", 1024);
/// assert!(caption.contains("<code>T</code>"));
/// assert!(caption.contains("<code>720p</code>"));
/// ```
#[must_use]
pub fn build_caption(title: &str, quality: &str, limit: usize) -> String {
    let frame = visible_text("", quality).chars().count();
    let title = ellipsize(title, limit.saturating_sub(frame));
    format!(
        "<b>Title:</b> <code>{}</code>\n<b>Quality:</b> <code>{}</code>",
        html_escape::encode_text(&title),
        html_escape::encode_text(quality)
    )
}

fn visible_text(title: &str, quality: &str) -> String {
    format!("Title: {title}\nQuality: {quality}")
}
