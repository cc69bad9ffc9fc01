//! Telegram calls with retry on transient failures.
//!
//! Only chat plumbing goes through here (status messages and replies).
//! Media uploads are never retried.

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ChatId, Message, MessageId, ParseMode};
use tracing::debug;

use crate::config::OUTPUT_INLINE_LIMIT;

const ERROR_NOT_MODIFIED: &str = "message is not modified";

/// Send an HTML message, retrying with backoff.
///
/// # Errors
///
/// Returns the last error once all attempts fail.
pub async fn send_html(bot: &Bot, chat_id: ChatId, text: impl Into<String>) -> Result<Message> {
    let text = fit_message(&text.into());
    crate::utils::retry_telegram_operation(|| async {
        bot.send_message(chat_id, text.clone())
            .parse_mode(ParseMode::Html)
            .await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Replace the text of an HTML message, retrying with backoff.
///
/// Editing to identical text is treated as success.
///
/// # Errors
///
/// Returns the last error once all attempts fail (e.g. the message was deleted).
pub async fn edit_html(bot: &Bot, chat_id: ChatId, msg_id: MessageId, text: &str) -> Result<()> {
    let text = fit_message(text);
    crate::utils::retry_telegram_operation(|| async {
        match bot
            .edit_message_text(chat_id, msg_id, text.clone())
            .parse_mode(ParseMode::Html)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains(ERROR_NOT_MODIFIED) => {
                debug!("Status unchanged, edit skipped");
                Ok(())
            }
            Err(e) => Err(anyhow::anyhow!("Telegram edit error: {e}")),
        }
    })
    .await
}

fn fit_message(text: &str) -> String {
    if text.chars().count() <= OUTPUT_INLINE_LIMIT {
        return text.to_string();
    }
    format!(
        "{}...\n\n<i>(message truncated)</i>",
        crate::utils::truncate_str(text, OUTPUT_INLINE_LIMIT)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_message() {
        assert_eq!(fit_message("short"), "short");
        let long = "a".repeat(OUTPUT_INLINE_LIMIT + 10);
        let fitted = fit_message(&long);
        assert!(fitted.ends_with("<i>(message truncated)</i>"));
        assert!(fitted.starts_with(&"a".repeat(OUTPUT_INLINE_LIMIT)));
    }
}
