#![deny(missing_docs)]
//! Oxide Courier library.
//!
//! Media acquisition with a content-addressed cache, per-requester admission,
//! and a supervisor for sandboxed worker scripts, fronted by a Telegram bot.

/// Authorized-user store.
pub mod auth;
/// Telegram front end: commands, handlers and the output channel.
pub mod bot;
/// Configuration management.
pub mod config;
/// Media acquisition pipeline and its primitives.
pub mod media;
/// OS process helpers (liveness probe, termination).
pub mod process;
/// Shell command execution with a timeout.
pub mod shell;
/// Utility functions.
pub mod utils;
/// Worker sandboxes, registry and process supervision.
pub mod worker;
