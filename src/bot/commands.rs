//! Bot command definitions and argument helpers.

use teloxide::utils::command::BotCommands;

/// Supported commands
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Show the command list
    #[command(description = "show this menu.")]
    Start,
    /// Show the command list
    #[command(description = "show this menu.")]
    Menu,
    /// Round-trip latency
    #[command(description = "check the bot is alive.")]
    Ping,
    /// Time since start
    #[command(description = "show bot uptime.")]
    Uptime,
    /// YouTube audio
    #[command(description = "<url> download YouTube audio.")]
    Ytmp3(String),
    /// YouTube video
    #[command(description = "<url> download YouTube video.")]
    Ytmp4(String),
    /// Facebook video
    #[command(description = "<url> download Facebook video.")]
    Fbmp4(String),
    /// TikTok video
    #[command(description = "<url> download TikTok video.")]
    Ttmp4(String),
    /// Instagram video
    #[command(description = "<url> download Instagram video.")]
    Igmp4(String),
    /// Search and download audio
    #[command(description = "<query> search YouTube and send the audio.")]
    Play(String),
    /// Park a shell command for confirmation
    #[command(description = "<cmd> run a shell command (sudo).")]
    Shell(String),
    /// Run the parked shell command
    #[command(description = "run the pending shell command.")]
    Confirm,
    /// Drop the parked shell command
    #[command(description = "cancel the pending shell command.")]
    Cancel,
    /// Authorize a user
    #[command(description = "<id> authorize a user (sudo).")]
    Adduser(String),
    /// Revoke a user
    #[command(description = "<id> revoke a user (sudo).")]
    Deluser(String),
    /// List authorized users
    #[command(description = "list authorized users (sudo).")]
    Listusers,
    /// Create a worker sandbox
    #[command(description = "<name> create a worker.")]
    Newworker(String),
    /// Delete a worker and its sandbox
    #[command(description = "<name> delete a worker.")]
    Delworker(String),
    /// Start a script inside a worker
    #[command(description = "<name> <script> start a worker script.")]
    Startworker(String),
    /// Stop a worker
    #[command(description = "<name> stop a worker.")]
    Stopworker(String),
    /// Restart the last script of a worker
    #[command(description = "<name> restart a worker.")]
    Restartworker(String),
    /// Status of one worker
    #[command(description = "<name> show worker status.")]
    Workerstatus(String),
    /// Status of all workers
    #[command(description = "list all workers.")]
    Workers,
    /// Install a package into a worker
    #[command(description = "<name> <package> install a package for a worker.")]
    Pip(String),
    /// List files inside a worker
    #[command(description = "<name> [path] list worker files.")]
    Wls(String),
    /// Remove a file inside a worker
    #[command(description = "<name> <path> remove a worker file.")]
    Wrm(String),
    /// Upload the replied-to document into a worker
    #[command(description = "<name> [path] upload the replied document to a worker.")]
    Wupload(String),
}

impl Command {
    /// Whether only the sudo user may run this command
    #[must_use]
    pub const fn sudo_only(&self) -> bool {
        matches!(
            self,
            Self::Shell(_)
                | Self::Confirm
                | Self::Cancel
                | Self::Adduser(_)
                | Self::Deluser(_)
                | Self::Listusers
                | Self::Newworker(_)
                | Self::Delworker(_)
                | Self::Startworker(_)
                | Self::Stopworker(_)
                | Self::Restartworker(_)
                | Self::Workerstatus(_)
                | Self::Workers
                | Self::Pip(_)
                | Self::Wls(_)
                | Self::Wrm(_)
                | Self::Wupload(_)
        )
    }
}

/// Split command arguments into the first word and the trimmed remainder.
///
/// # Examples
///
/// ```
/// use oxide_courier::bot::commands::split_first;
/// assert_eq!(split_first("  bot1 run.py  "), ("bot1", "run.py"));
/// assert_eq!(split_first("bot1"), ("bot1", ""));
/// ```
#[must_use]
pub fn split_first(args: &str) -> (&str, &str) {
    let args = args.trim();
    match args.split_once(char::is_whitespace) {
        Some((first, rest)) => (first, rest.trim()),
        None => (args, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() -> Result<(), Box<dyn std::error::Error>> {
        assert_eq!(
            Command::parse("/ytmp4 https://youtu.be/abc", "bot")?,
            Command::Ytmp4("https://youtu.be/abc".to_string())
        );
        assert_eq!(
            Command::parse("/startworker bot1 main.py", "bot")?,
            Command::Startworker("bot1 main.py".to_string())
        );
        assert_eq!(Command::parse("/workers", "bot")?, Command::Workers);
        Ok(())
    }

    #[test]
    fn test_sudo_only() {
        assert!(Command::Workers.sudo_only());
        assert!(Command::Shell("ls".to_string()).sudo_only());
        assert!(!Command::Ping.sudo_only());
        assert!(!Command::Play("song".to_string()).sudo_only());
    }

    #[test]
    fn test_split_first() {
        assert_eq!(split_first(""), ("", ""));
        assert_eq!(split_first("a  b c"), ("a", "b c"));
    }
}
