//! Telegram implementation of the media output channel.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use anyhow::Result;
use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatId, Document, InputFile, MessageId, ParseMode};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::media::{DeliveryArtifact, MediaAttributes, OutputChannel, ProgressEvent};

/// Output channel bound to one chat and one status message
pub struct TelegramOutput {
    bot: Bot,
    chat_id: ChatId,
    status_msg_id: MessageId,
}

impl TelegramOutput {
    /// Channel editing `status_msg_id` in `chat_id`
    #[must_use]
    pub const fn new(bot: Bot, chat_id: ChatId, status_msg_id: MessageId) -> Self {
        Self {
            bot,
            chat_id,
            status_msg_id,
        }
    }

    async fn counting_file(
        path: &Path,
        file_name: &str,
        total: u64,
        progress: mpsc::Sender<ProgressEvent>,
    ) -> io::Result<InputFile> {
        let file = tokio::fs::File::open(path).await?;
        let reader = CountingReader {
            inner: file,
            sent: 0,
            total,
            progress,
        };
        Ok(InputFile::read(reader).file_name(file_name.to_string()))
    }
}

#[async_trait]
impl OutputChannel for TelegramOutput {
    async fn edit_status(&self, text: &str) -> Result<()> {
        super::resilient::edit_html(&self.bot, self.chat_id, self.status_msg_id, text).await
    }

    async fn delete_status(&self) -> Result<()> {
        self.bot
            .delete_message(self.chat_id, self.status_msg_id)
            .await?;
        Ok(())
    }

    async fn send_file(
        &self,
        artifact: &DeliveryArtifact,
        progress: mpsc::Sender<ProgressEvent>,
    ) -> Result<()> {
        let file = Self::counting_file(
            &artifact.path,
            &artifact.file_name,
            artifact.size,
            progress.clone(),
        )
        .await?;
        let thumbnail = artifact.thumbnail.as_ref().map(InputFile::file);

        let sent = match &artifact.attributes {
            MediaAttributes::Audio {
                duration,
                title,
                performer,
            } => {
                let mut req = self
                    .bot
                    .send_audio(self.chat_id, file)
                    .caption(artifact.caption.clone())
                    .parse_mode(ParseMode::Html)
                    .duration(*duration)
                    .title(title.clone())
                    .performer(performer.clone());
                if let Some(thumb) = thumbnail {
                    req = req.thumbnail(thumb);
                }
                req.await
            }
            MediaAttributes::Video {
                duration,
                width,
                height,
                supports_streaming,
            } => {
                let mut req = self
                    .bot
                    .send_video(self.chat_id, file)
                    .caption(artifact.caption.clone())
                    .parse_mode(ParseMode::Html)
                    .duration(*duration)
                    .width(*width)
                    .height(*height)
                    .supports_streaming(*supports_streaming);
                if let Some(thumb) = thumbnail {
                    req = req.thumbnail(thumb);
                }
                req.await
            }
        };

        match sent {
            Ok(_) => {
                info!(file = %artifact.file_name, size = artifact.size, "Media delivered");
                Ok(())
            }
            Err(e) => {
                warn!(
                    file = %artifact.file_name,
                    error = %e,
                    "Failed to send as native media; falling back to document"
                );
                let file = Self::counting_file(
                    &artifact.path,
                    &artifact.file_name,
                    artifact.size,
                    progress,
                )
                .await?;
                self.bot
                    .send_document(self.chat_id, file)
                    .caption(artifact.caption.clone())
                    .parse_mode(ParseMode::Html)
                    .await?;
                Ok(())
            }
        }
    }
}

/// Reader that reports how many bytes have been handed to the uploader.
///
/// Reports are `try_send`s: a full or closed channel drops the event and
/// never stalls the upload.
struct CountingReader {
    inner: tokio::fs::File,
    sent: u64,
    total: u64,
    progress: mpsc::Sender<ProgressEvent>,
}

impl AsyncRead for CountingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let read = (buf.filled().len() - before) as u64;
            if read > 0 {
                self.sent += read;
                let _ = self.progress.try_send(ProgressEvent {
                    sent: self.sent,
                    total: self.total,
                });
            }
        }
        poll
    }
}

/// Download an incoming document into memory, retrying transient failures.
///
/// # Errors
///
/// Returns an error if the file cannot be fetched from Telegram.
pub async fn download_document(bot: &Bot, document: &Document) -> Result<Vec<u8>> {
    crate::utils::retry_telegram_operation(|| async {
        let file = bot.get_file(document.file.id.clone()).await?;
        let mut buf = Vec::new();
        bot.download_file(&file.path, &mut buf).await?;
        Ok(buf)
    })
    .await
}
