//! Worker sandboxes and their supervised processes.
//!
//! A worker is a named directory under the workers root plus at most one
//! child process running a user script inside it. State lives in the
//! [`registry::WorkerRegistry`]; all process handling goes through
//! [`supervisor::WorkerSupervisor`].

use thiserror::Error;

/// Sandbox-relative path resolution.
pub mod path;
/// Durable worker registry.
pub mod registry;
/// Worker lifecycle operations.
pub mod supervisor;

pub use registry::{RegistryError, WorkerRecord, WorkerRegistry, WorkerStatus};
pub use supervisor::{DirEntry, WorkerHealth, WorkerReport, WorkerSupervisor};

/// Errors returned by worker operations
#[derive(Error, Debug)]
pub enum WorkerError {
    /// No worker with this name exists
    #[error("Worker `{0}` not found")]
    NotFound(String),
    /// A worker with this name already exists
    #[error("Worker `{0}` already exists")]
    AlreadyExists(String),
    /// Worker name cannot be used as a directory name
    #[error("Invalid worker name `{0}`")]
    InvalidName(String),
    /// The worker already has a live process
    #[error("Worker `{name}` is already running (pid {pid})")]
    AlreadyRunning {
        /// Worker name
        name: String,
        /// Live process id
        pid: u32,
    },
    /// The worker has no live process
    #[error("Worker `{0}` is not running")]
    NotRunning(String),
    /// A caller-supplied path resolves outside the sandbox
    #[error("Path `{0}` escapes the worker sandbox")]
    PathTraversal(String),
    /// Script to start does not exist in the sandbox
    #[error("Script `{0}` not found in the worker sandbox")]
    ScriptNotFound(String),
    /// Restart requested before any script was ever started
    #[error("Worker `{0}` has never been started; use start with a script first")]
    NoScriptRecorded(String),
    /// A path that must be a file or directory is neither
    #[error("Nothing at `{0}` in the worker sandbox")]
    MissingPath(String),
    /// Package installation exceeded its timeout
    #[error("Package installation timed out after {0}s")]
    InstallTimeout(u64),
    /// Child process could not be spawned
    #[error("Failed to spawn process: {0}")]
    Spawn(std::io::Error),
    /// Signal delivery failed
    #[error("Failed to signal pid {pid}: {errno}")]
    Signal {
        /// Target process id
        pid: u32,
        /// OS error
        errno: nix::errno::Errno,
    },
    /// Registry persistence failed
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
    /// Standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
