use std::sync::Arc;
use std::time::Instant;

use crate::auth::AuthStore;
use crate::config::Settings;
use crate::media::MediaPipeline;
use crate::shell::PendingCommands;
use crate::worker::WorkerSupervisor;

/// Process-wide state shared by every handler
pub struct BotState {
    /// Loaded configuration
    pub settings: Arc<Settings>,
    /// Authorized users
    pub auth: AuthStore,
    /// Media pipeline (cache and admission set)
    pub pipeline: MediaPipeline,
    /// Worker supervisor (registry and child processes)
    pub supervisor: WorkerSupervisor,
    /// Shell commands awaiting confirmation
    pub pending_shell: PendingCommands,
    /// When the bot started
    pub started_at: Instant,
}
