//! Command handlers.
//!
//! Each handler renders its own failures to the chat; the returned error is
//! only for logging. Media jobs run on their own task so the dispatcher can
//! keep serving the chat (and the admission guard can turn away overlaps).

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use html_escape::encode_text;
use teloxide::prelude::*;
use teloxide::types::InputFile;
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};

use super::commands::{split_first, Command};
use super::resilient::{edit_html, send_html};
use super::state::BotState;
use super::transport::{download_document, TelegramOutput};
use super::views;
use crate::config::{OUTPUT_INLINE_LIMIT, SHELL_TIMEOUT};
use crate::media::search::search_first;
use crate::media::{MediaFormat, MediaRequest, MediaSource, OutputChannel};
use crate::utils::readable_duration;
use crate::worker::WorkerError;

/// Safe extraction of the sender id; 0 if the message has no sender.
#[must_use]
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

/// Route one parsed command.
///
/// # Errors
///
/// Returns an error if a reply cannot be sent.
pub async fn handle_command(bot: Bot, msg: Message, cmd: Command, state: Arc<BotState>) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    if cmd.sudo_only() && !state.auth.is_sudo(user_id) {
        info!(user_id, ?cmd, "Sudo command refused");
        send_html(&bot, msg.chat.id, "⛔️ This command is reserved for the bot owner.").await?;
        return Ok(());
    }

    match cmd {
        Command::Start | Command::Menu => {
            send_html(&bot, msg.chat.id, encode_text(&Command::descriptions().to_string())).await?;
        }
        Command::Ping => ping(&bot, &msg).await?,
        Command::Uptime => {
            let uptime = readable_duration(state.started_at.elapsed().as_secs());
            send_html(&bot, msg.chat.id, format!("⏱️ <b>Uptime:</b> {uptime}")).await?;
        }
        Command::Ytmp3(url) => media(bot, msg, state, MediaSource::Youtube, MediaFormat::Mp3, url).await?,
        Command::Ytmp4(url) => media(bot, msg, state, MediaSource::Youtube, MediaFormat::Mp4, url).await?,
        Command::Fbmp4(url) => media(bot, msg, state, MediaSource::Facebook, MediaFormat::Mp4, url).await?,
        Command::Ttmp4(url) => media(bot, msg, state, MediaSource::Tiktok, MediaFormat::Mp4, url).await?,
        Command::Igmp4(url) => media(bot, msg, state, MediaSource::Instagram, MediaFormat::Mp4, url).await?,
        Command::Play(query) => play(bot, msg, state, query).await?,
        Command::Shell(command) => shell_prepare(&bot, &msg, &state, command).await?,
        Command::Confirm => shell_confirm(&bot, &msg, &state).await?,
        Command::Cancel => shell_cancel(&bot, &msg, &state).await?,
        Command::Adduser(arg) => add_user(&bot, &msg, &state, &arg).await?,
        Command::Deluser(arg) => del_user(&bot, &msg, &state, &arg).await?,
        Command::Listusers => {
            let users = state.auth.list().await;
            send_html(&bot, msg.chat.id, views::user_list(&users, state.auth.sudo_user())).await?;
        }
        worker_cmd => worker_command(&bot, &msg, &state, worker_cmd).await?,
    }
    Ok(())
}

async fn ping(bot: &Bot, msg: &Message) -> Result<()> {
    let start = Instant::now();
    let sent = send_html(bot, msg.chat.id, "🏓 Pong!").await?;
    let ms = start.elapsed().as_millis();
    edit_html(bot, msg.chat.id, sent.id, &format!("🏓 <b>Pong!</b> <code>{ms} ms</code>")).await
}

async fn media(
    bot: Bot,
    msg: Message,
    state: Arc<BotState>,
    source: MediaSource,
    format: MediaFormat,
    url: String,
) -> Result<()> {
    let url = url.trim().to_string();
    if url.is_empty() {
        send_html(&bot, msg.chat.id, "ℹ️ Please provide a URL after the command.").await?;
        return Ok(());
    }

    let status = send_html(&bot, msg.chat.id, "⏳ <b>Processing URL...</b>").await?;
    let output = TelegramOutput::new(bot, msg.chat.id, status.id);
    if !source.matches_url(&url) {
        output
            .edit_status(&format!("🚫 Invalid {} URL.", source.display_name()))
            .await?;
        return Ok(());
    }

    let request = MediaRequest {
        requester: get_user_id_safe(&msg),
        url,
        source,
        format,
    };
    tokio::spawn(async move {
        if let Err(e) = state.pipeline.run(&request, &output).await {
            info!(requester = request.requester, error = %e, "Media request ended with error");
        }
    });
    Ok(())
}

async fn play(bot: Bot, msg: Message, state: Arc<BotState>, query: String) -> Result<()> {
    let query = query.trim().to_string();
    if query.is_empty() {
        send_html(&bot, msg.chat.id, "ℹ️ Usage: /play &lt;song name&gt;").await?;
        return Ok(());
    }
    let requester = get_user_id_safe(&msg);
    let Some(permit) = state.pipeline.admission().try_acquire(requester) else {
        send_html(&bot, msg.chat.id, "⏳ You already have a download in progress. Please wait.").await?;
        return Ok(());
    };

    let status = send_html(
        &bot,
        msg.chat.id,
        format!("🔎 <b>Searching for:</b> <code>{}</code>", encode_text(&query)),
    )
    .await?;
    let output = TelegramOutput::new(bot, msg.chat.id, status.id);

    tokio::spawn(async move {
        let hit = match search_first(&query).await {
            Ok(Some(hit)) => hit,
            Ok(None) => {
                let _ = output.edit_status("🚫 No search results found.").await;
                return;
            }
            Err(e) => {
                warn!(error = %e, "Search failed");
                let _ = output.edit_status(&e.user_message()).await;
                return;
            }
        };
        let _ = output
            .edit_status(&format!(
                "✅ <b>Found:</b> <code>{}</code>\n\nNow processing...",
                encode_text(&hit.title)
            ))
            .await;

        let request = MediaRequest {
            requester,
            url: hit.url,
            source: MediaSource::Youtube,
            format: MediaFormat::Mp3,
        };
        if let Err(e) = state.pipeline.run_admitted(permit, &request, &output).await {
            info!(requester, error = %e, "Play request ended with error");
        }
    });
    Ok(())
}

async fn shell_prepare(bot: &Bot, msg: &Message, state: &BotState, command: String) -> Result<()> {
    let command = command.trim().to_string();
    if command.is_empty() {
        send_html(bot, msg.chat.id, "ℹ️ Usage: /shell &lt;command&gt;").await?;
        return Ok(());
    }
    let text = format!(
        "⚠️ <b>Confirm Execution?</b>\n\n💻 <code>{}</code>\n\nSend /confirm or /cancel.",
        encode_text(&command)
    );
    state.pending_shell.park(msg.chat.id.0, command).await;
    send_html(bot, msg.chat.id, text).await?;
    Ok(())
}

async fn shell_confirm(bot: &Bot, msg: &Message, state: &BotState) -> Result<()> {
    let Some(command) = state.pending_shell.take(msg.chat.id.0).await else {
        send_html(bot, msg.chat.id, "ℹ️ No pending command in this chat to confirm.").await?;
        return Ok(());
    };
    send_html(bot, msg.chat.id, format!("🚀 Executing <code>{}</code>...", encode_text(&command))).await?;

    let output = match crate::shell::run_shell_command(&command, SHELL_TIMEOUT).await {
        Ok(out) => out,
        Err(e) => format!("Error: {e}"),
    };
    let transcript = views::shell_transcript(&command, &output);
    if transcript.chars().count() > OUTPUT_INLINE_LIMIT {
        bot.send_document(
            msg.chat.id,
            InputFile::memory(transcript.into_bytes()).file_name("shell_output.txt"),
        )
        .caption("💻 Shell Output (too long)")
        .await?;
    } else {
        send_html(bot, msg.chat.id, format!("<pre>{}</pre>", encode_text(&transcript))).await?;
    }
    Ok(())
}

async fn shell_cancel(bot: &Bot, msg: &Message, state: &BotState) -> Result<()> {
    let text = match state.pending_shell.take(msg.chat.id.0).await {
        Some(command) => format!("❌ Cancelled execution of <code>{}</code>.", encode_text(&command)),
        None => "ℹ️ No pending command to cancel in this chat.".to_string(),
    };
    send_html(bot, msg.chat.id, text).await?;
    Ok(())
}

fn parse_user_id(msg: &Message, arg: &str) -> Option<i64> {
    arg.trim().parse().ok().or_else(|| {
        msg.reply_to_message()
            .and_then(|reply| reply.from.as_ref())
            .map(|u| u.id.0.cast_signed())
    })
}

async fn add_user(bot: &Bot, msg: &Message, state: &BotState, arg: &str) -> Result<()> {
    let Some(id) = parse_user_id(msg, arg) else {
        send_html(bot, msg.chat.id, "ℹ️ Usage: /adduser &lt;id&gt; (or reply to a user)").await?;
        return Ok(());
    };
    let text = match state.auth.add(id).await {
        Ok(true) => format!("✅ User <code>{id}</code> authorized."),
        Ok(false) => format!("ℹ️ User <code>{id}</code> is already authorized."),
        Err(e) => format!("🚫 {}", encode_text(&e.to_string())),
    };
    send_html(bot, msg.chat.id, text).await?;
    Ok(())
}

async fn del_user(bot: &Bot, msg: &Message, state: &BotState, arg: &str) -> Result<()> {
    let Some(id) = parse_user_id(msg, arg) else {
        send_html(bot, msg.chat.id, "ℹ️ Usage: /deluser &lt;id&gt; (or reply to a user)").await?;
        return Ok(());
    };
    let text = match state.auth.remove(id).await {
        Ok(true) => format!("✅ User <code>{id}</code> removed."),
        Ok(false) => format!("ℹ️ User <code>{id}</code> was not authorized."),
        Err(e) => format!("🚫 {}", encode_text(&e.to_string())),
    };
    send_html(bot, msg.chat.id, text).await?;
    Ok(())
}

async fn worker_command(bot: &Bot, msg: &Message, state: &BotState, cmd: Command) -> Result<()> {
    let reply = match run_worker_command(bot, msg, state, cmd).await {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "Worker command failed");
            format!("🚫 {}", encode_text(&e.to_string()))
        }
    };
    send_html(bot, msg.chat.id, reply).await?;
    Ok(())
}

fn usage(text: &str) -> Result<String, WorkerError> {
    Ok(format!("ℹ️ Usage: {}", encode_text(text)))
}

async fn run_worker_command(
    bot: &Bot,
    msg: &Message,
    state: &BotState,
    cmd: Command,
) -> Result<String, WorkerError> {
    let sup = &state.supervisor;
    match cmd {
        Command::Newworker(args) => {
            let (name, _) = split_first(&args);
            if name.is_empty() {
                return usage("/newworker <name>");
            }
            sup.create(name).await?;
            Ok(format!(
                "✅ Worker <b>{}</b> created. Upload a script with /wupload.",
                encode_text(name)
            ))
        }
        Command::Delworker(args) => {
            let (name, _) = split_first(&args);
            if name.is_empty() {
                return usage("/delworker <name>");
            }
            sup.delete(name).await?;
            Ok(format!("🗑️ Worker <b>{}</b> deleted.", encode_text(name)))
        }
        Command::Startworker(args) => {
            let (name, script) = split_first(&args);
            if name.is_empty() || script.is_empty() {
                return usage("/startworker <name> <script>");
            }
            let pid = sup.start(name, script).await?;
            Ok(format!(
                "▶️ Worker <b>{}</b> started (pid <code>{pid}</code>).",
                encode_text(name)
            ))
        }
        Command::Stopworker(args) => {
            let (name, _) = split_first(&args);
            if name.is_empty() {
                return usage("/stopworker <name>");
            }
            sup.stop(name).await?;
            Ok(format!("⏹️ Worker <b>{}</b> stopped.", encode_text(name)))
        }
        Command::Restartworker(args) => {
            let (name, _) = split_first(&args);
            if name.is_empty() {
                return usage("/restartworker <name>");
            }
            let pid = sup.restart(name).await?;
            Ok(format!(
                "🔄 Worker <b>{}</b> restarted (pid <code>{pid}</code>).",
                encode_text(name)
            ))
        }
        Command::Workerstatus(args) => {
            let (name, _) = split_first(&args);
            if name.is_empty() {
                return usage("/workerstatus <name>");
            }
            Ok(views::worker_line(&sup.status(name).await?))
        }
        Command::Workers => Ok(views::worker_list(&sup.status_all().await?)),
        Command::Pip(args) => {
            let (name, package) = split_first(&args);
            if name.is_empty() || package.is_empty() {
                return usage("/pip <name> <package>");
            }
            let output = sup.install_package(name, package).await?;
            let body = if output.is_empty() { "No output." } else { &output };
            Ok(format!(
                "📦 <b>pip install {}</b>\n\n<pre>{}</pre>",
                encode_text(package),
                encode_text(body)
            ))
        }
        Command::Wls(args) => {
            let (name, path) = split_first(&args);
            if name.is_empty() {
                return usage("/wls <name> [path]");
            }
            let entries = sup.list(name, path).await?;
            Ok(views::listing(name, path, &entries))
        }
        Command::Wrm(args) => {
            let (name, path) = split_first(&args);
            if name.is_empty() || path.is_empty() {
                return usage("/wrm <name> <path>");
            }
            sup.remove(name, path).await?;
            Ok(format!("🗑️ Removed <code>{}</code>.", encode_text(path)))
        }
        Command::Wupload(args) => wupload(bot, msg, state, &args).await,
        other => {
            error!(?other, "Command routed to worker handler by mistake");
            Ok("🚫 Unknown command.".to_string())
        }
    }
}

async fn wupload(bot: &Bot, msg: &Message, state: &BotState, args: &str) -> Result<String, WorkerError> {
    let (name, path) = split_first(args);
    let document = msg.reply_to_message().and_then(Message::document);
    let Some(document) = document.filter(|_| !name.is_empty()) else {
        return usage("reply to a document with /wupload <name> [path]");
    };

    let target = if path.is_empty() {
        document.file_name.clone().unwrap_or_else(|| "upload.bin".to_string())
    } else {
        path.to_string()
    };
    let content = download_document(bot, document)
        .await
        .map_err(|e| WorkerError::Io(std::io::Error::other(e.to_string())))?;
    state.supervisor.upload(name, &target, &content).await?;
    Ok(format!(
        "📤 Uploaded <code>{}</code> to <b>{}</b> ({} bytes).",
        encode_text(&target),
        encode_text(name),
        content.len()
    ))
}
