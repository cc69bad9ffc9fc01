//! Authorized-user store.
//!
//! A plain text file with one Telegram id per line, loaded once at startup
//! and rewritten after every change. The sudo user is always authorized and
//! cannot be removed.

use std::collections::BTreeSet;
use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Errors from the user store
#[derive(Error, Debug)]
pub enum AuthError {
    /// Reading or writing the store failed
    #[error("IO error on {path}: {source}")]
    Io {
        /// Store file
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
    /// The sudo user is permanent
    #[error("The sudo user cannot be removed")]
    CannotRemoveSudo,
}

/// Set of authorized Telegram users persisted to a file
#[derive(Debug)]
pub struct AuthStore {
    file: PathBuf,
    sudo_user: i64,
    users: Mutex<BTreeSet<i64>>,
}

impl AuthStore {
    /// Load the store, merging in `seed` (ids from configuration).
    ///
    /// A missing file is an empty store. Unparsable lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub async fn load(
        file: impl Into<PathBuf>,
        sudo_user: i64,
        seed: impl IntoIterator<Item = i64>,
    ) -> Result<Self, AuthError> {
        let file = file.into();
        let mut users: BTreeSet<i64> = match tokio::fs::read_to_string(&file).await {
            Ok(text) => text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .filter_map(|line| match line.parse::<i64>() {
                    Ok(id) => Some(id),
                    Err(_) => {
                        warn!(line, "Skipping invalid user id in auth file");
                        None
                    }
                })
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(source) => return Err(AuthError::Io { path: file, source }),
        };
        users.extend(seed);
        users.insert(sudo_user);
        info!(users = users.len(), "Authorized users loaded");

        Ok(Self {
            file,
            sudo_user,
            users: Mutex::new(users),
        })
    }

    /// The bot owner
    #[must_use]
    pub const fn sudo_user(&self) -> i64 {
        self.sudo_user
    }

    /// Whether `user` is the bot owner
    #[must_use]
    pub const fn is_sudo(&self, user: i64) -> bool {
        user == self.sudo_user
    }

    /// Whether `user` may use the bot
    pub async fn is_authorized(&self, user: i64) -> bool {
        user == self.sudo_user || self.users.lock().await.contains(&user)
    }

    /// Authorize `user`; returns `false` if already authorized.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub async fn add(&self, user: i64) -> Result<bool, AuthError> {
        let mut users = self.users.lock().await;
        if !users.insert(user) {
            return Ok(false);
        }
        self.save(&users).await?;
        info!(user, "User authorized");
        Ok(true)
    }

    /// Revoke `user`; returns `false` if they were not authorized.
    ///
    /// # Errors
    ///
    /// Fails for the sudo user, or if the store cannot be saved.
    pub async fn remove(&self, user: i64) -> Result<bool, AuthError> {
        if user == self.sudo_user {
            return Err(AuthError::CannotRemoveSudo);
        }
        let mut users = self.users.lock().await;
        if !users.remove(&user) {
            return Ok(false);
        }
        self.save(&users).await?;
        info!(user, "User deauthorized");
        Ok(true)
    }

    /// All authorized ids in ascending order
    pub async fn list(&self) -> Vec<i64> {
        self.users.lock().await.iter().copied().collect()
    }

    async fn save(&self, users: &BTreeSet<i64>) -> Result<(), AuthError> {
        let io_err = |source| AuthError::Io {
            path: self.file.clone(),
            source,
        };
        let body: String = users.iter().map(|id| format!("{id}\n")).collect();
        if let Some(parent) = self.file.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let tmp = self.file.with_extension("tmp");
        tokio::fs::write(&tmp, body).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.file).await.map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_skips_garbage() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("auth_users.txt");
        tokio::fs::write(&file, "100\nnot-a-number\n\n  200  \n").await?;

        let store = AuthStore::load(&file, 1, [300]).await?;
        assert_eq!(store.list().await, vec![1, 100, 200, 300]);
        assert!(store.is_authorized(200).await);
        assert!(!store.is_authorized(999).await);
        Ok(())
    }

    #[tokio::test]
    async fn test_mutations_persist() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("auth_users.txt");
        let store = AuthStore::load(&file, 1, []).await?;

        assert!(store.add(42).await?);
        assert!(!store.add(42).await?);
        let reloaded = AuthStore::load(&file, 1, []).await?;
        assert!(reloaded.is_authorized(42).await);

        assert!(store.remove(42).await?);
        assert!(!store.remove(42).await?);
        assert!(matches!(store.remove(1).await, Err(AuthError::CannotRemoveSudo)));

        let reloaded = AuthStore::load(&file, 1, []).await?;
        assert!(!reloaded.is_authorized(42).await);
        assert!(reloaded.is_authorized(1).await);
        Ok(())
    }
}
