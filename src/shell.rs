//! Shell commands for the bot owner.
//!
//! A command is first parked per chat in [`PendingCommands`] and only runs
//! after an explicit confirmation. Execution goes through `sh -c` with a
//! hard timeout; the child is killed if the timeout fires.

use std::process::Stdio;
use std::time::Duration;

use moka::future::Cache;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, instrument, warn};

/// Errors from shell execution
#[derive(Error, Debug)]
pub enum ShellError {
    /// The shell could not be spawned
    #[error("Failed to start shell: {0}")]
    Spawn(#[from] std::io::Error),
    /// The command ran past its deadline and was killed
    #[error("Command timed out after {0}s")]
    Timeout(u64),
}

/// Run `command` with `sh -c`, returning combined stdout and stderr.
///
/// A non-zero exit is not an error; its output is returned like any other.
///
/// # Errors
///
/// Fails if the shell cannot be started or `timeout` elapses.
#[instrument(skip(timeout))]
pub async fn run_shell_command(command: &str, timeout: Duration) -> Result<String, ShellError> {
    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();
    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| {
            warn!("Shell command timed out");
            ShellError::Timeout(timeout.as_secs())
        })??;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }
    info!(status = ?output.status, bytes = text.len(), "Shell command finished");
    Ok(text.trim_end().to_string())
}

/// Commands awaiting confirmation, one per chat, forgotten after a TTL
#[derive(Clone)]
pub struct PendingCommands {
    cache: Cache<i64, String>,
}

impl PendingCommands {
    /// Store with entries expiring after `ttl`
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(1_000)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    /// Park `command` for `chat`, replacing any earlier one
    pub async fn park(&self, chat: i64, command: String) {
        self.cache.insert(chat, command).await;
    }

    /// Take the parked command for `chat`, if still valid
    pub async fn take(&self, chat: i64) -> Option<String> {
        let command = self.cache.get(&chat).await;
        if command.is_some() {
            self.cache.invalidate(&chat).await;
        }
        command
    }
}
