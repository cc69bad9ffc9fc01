/// Command definitions and argument parsing
pub mod commands;
/// Command handlers
pub mod handlers;
/// Telegram calls with retry
pub mod resilient;
/// Shared handler state
pub mod state;
/// Telegram output channel for media jobs
pub mod transport;
/// HTML views for worker and admin replies
pub mod views;

pub use commands::Command;
pub use handlers::{get_user_id_safe, handle_command};
pub use state::BotState;
pub use transport::TelegramOutput;
