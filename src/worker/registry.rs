//! Durable mapping of worker name to its record.
//!
//! The registry is a JSON object keyed by worker name, rewritten atomically
//! after every mutation. Loading reconciles `running` records against the OS
//! process table so a crash of the bot never leaves stale entries behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Errors that can occur while loading or saving the registry
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Reading or writing the registry file failed
    #[error("IO error on {path}: {source}")]
    Io {
        /// Registry file
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
    /// The registry file is not a valid registry document
    #[error("Malformed registry {path}: {source}")]
    Json {
        /// Registry file
        path: PathBuf,
        /// Underlying error
        source: serde_json::Error,
    },
}

/// Lifecycle status of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// No process is supervised
    Stopped,
    /// A process was started and not yet observed to exit
    Running,
}

/// Persisted state of one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Sandbox directory; fixed at creation
    pub path: PathBuf,
    /// Process id of the last started script, cleared when stopped
    pub pid: Option<u32>,
    /// Lifecycle status
    pub status: WorkerStatus,
    /// Script used by the last start, remembered for restart
    pub main_script: Option<String>,
    /// When the current process was started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl WorkerRecord {
    /// New stopped worker rooted at `path`
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self {
            path,
            pid: None,
            status: WorkerStatus::Stopped,
            main_script: None,
            started_at: None,
        }
    }

    /// Pid of the process this record claims is running, if any
    #[must_use]
    pub const fn running_pid(&self) -> Option<u32> {
        match (self.status, self.pid) {
            (WorkerStatus::Running, Some(pid)) => Some(pid),
            _ => None,
        }
    }

    /// Record a freshly spawned process
    pub fn mark_running(&mut self, pid: u32, script: &str) {
        self.pid = Some(pid);
        self.status = WorkerStatus::Running;
        self.main_script = Some(script.to_string());
        self.started_at = Some(Utc::now());
    }

    /// Clear the process, keeping the remembered script
    pub fn mark_stopped(&mut self) {
        self.pid = None;
        self.status = WorkerStatus::Stopped;
        self.started_at = None;
    }
}

/// Worker registry persisted as JSON
#[derive(Debug)]
pub struct WorkerRegistry {
    file: PathBuf,
    records: BTreeMap<String, WorkerRecord>,
}

impl WorkerRegistry {
    /// Load the registry and reconcile it against live processes.
    ///
    /// A missing file yields an empty registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is malformed, or the
    /// corrected registry cannot be written back.
    pub async fn load(file: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        Self::load_with_probe(file, crate::process::is_alive).await
    }

    /// Same as [`Self::load`] with an injectable liveness probe.
    ///
    /// # Errors
    ///
    /// See [`Self::load`].
    pub async fn load_with_probe(
        file: impl Into<PathBuf>,
        probe: impl Fn(u32) -> bool,
    ) -> Result<Self, RegistryError> {
        let file = file.into();
        let records = match tokio::fs::read(&file).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| RegistryError::Json {
                path: file.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(RegistryError::Io {
                    path: file.clone(),
                    source,
                })
            }
        };

        let mut registry = Self { file, records };
        let corrected = registry.reconcile(probe);
        if corrected > 0 {
            registry.save().await?;
        }
        info!(
            workers = registry.records.len(),
            corrected, "Worker registry loaded"
        );
        Ok(registry)
    }

    /// Downgrade every `running` record whose process is gone.
    ///
    /// Returns the number of corrected records.
    pub fn reconcile(&mut self, probe: impl Fn(u32) -> bool) -> usize {
        let mut corrected = 0;
        for (name, record) in &mut self.records {
            if record.status != WorkerStatus::Running {
                continue;
            }
            let alive = record.pid.is_some_and(&probe);
            if !alive {
                warn!(worker = %name, pid = ?record.pid, "Stale running record, marking stopped");
                record.mark_stopped();
                corrected += 1;
            }
        }
        corrected
    }

    /// Write the registry atomically (temp file + rename).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any filesystem step fails.
    pub async fn save(&self) -> Result<(), RegistryError> {
        let io_err = |source| RegistryError::Io {
            path: self.file.clone(),
            source,
        };
        let body = serde_json::to_vec_pretty(&self.records).map_err(|source| RegistryError::Json {
            path: self.file.clone(),
            source,
        })?;

        if let Some(parent) = self.file.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let tmp = tmp_sibling(&self.file);
        tokio::fs::write(&tmp, body).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.file).await.map_err(io_err)?;
        Ok(())
    }

    /// Record for `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&WorkerRecord> {
        self.records.get(name)
    }

    /// Whether `name` is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    /// Insert or replace a record and persist.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be saved.
    pub async fn put(&mut self, name: &str, record: WorkerRecord) -> Result<(), RegistryError> {
        self.records.insert(name.to_string(), record);
        self.save().await
    }

    /// Remove a record and persist.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be saved.
    pub async fn remove(&mut self, name: &str) -> Result<Option<WorkerRecord>, RegistryError> {
        let removed = self.records.remove(name);
        if removed.is_some() {
            self.save().await?;
        }
        Ok(removed)
    }

    /// All records, ordered by name
    pub fn all(&self) -> impl Iterator<Item = (&String, &WorkerRecord)> {
        self.records.iter()
    }

    /// Number of registered workers
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no worker is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn tmp_sibling(file: &Path) -> PathBuf {
    let mut name = file.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}.tmp", uuid::Uuid::new_v4().as_simple()));
    file.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_empty() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let registry = WorkerRegistry::load(dir.path().join("workers.json")).await?;
        assert!(registry.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_put_persists_in_wire_format() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("workers.json");
        let mut registry = WorkerRegistry::load(&file).await?;

        let mut record = WorkerRecord::new(dir.path().join("bot1"));
        record.mark_running(4242, "run.py");
        registry.put("bot1", record).await?;

        let raw: serde_json::Value = serde_json::from_slice(&tokio::fs::read(&file).await?)?;
        assert_eq!(raw["bot1"]["pid"], 4242);
        assert_eq!(raw["bot1"]["status"], "running");
        assert_eq!(raw["bot1"]["main_script"], "run.py");
        assert!(raw["bot1"]["path"].as_str().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_load_reconciles_dead_processes() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("workers.json");
        let doc = serde_json::json!({
            "alive": {"path": "/w/alive", "pid": 10, "status": "running", "main_script": "a.py"},
            "dead": {"path": "/w/dead", "pid": 11, "status": "running", "main_script": "b.py"},
            "idle": {"path": "/w/idle", "pid": null, "status": "stopped", "main_script": null}
        });
        tokio::fs::write(&file, serde_json::to_vec(&doc)?).await?;

        let registry = WorkerRegistry::load_with_probe(&file, |pid| pid == 10).await?;
        assert_eq!(registry.get("alive").and_then(WorkerRecord::running_pid), Some(10));

        let dead = registry.get("dead").ok_or("dead missing")?;
        assert_eq!(dead.status, WorkerStatus::Stopped);
        assert_eq!(dead.pid, None);
        assert_eq!(dead.main_script.as_deref(), Some("b.py"));

        // Correction was written back immediately
        let reread = WorkerRegistry::load_with_probe(&file, |_| true).await?;
        assert_eq!(
            reread.get("dead").map(|r| r.status),
            Some(WorkerStatus::Stopped)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_record_fails_loudly() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("workers.json");
        tokio::fs::write(&file, br#"{"bot1": {"pid": 1, "status": "running"}}"#).await?;

        let err = WorkerRegistry::load(&file).await.err().ok_or("expected error")?;
        assert!(matches!(err, RegistryError::Json { .. }));

        tokio::fs::write(&file, br#"{"bot1": {"path": "/w", "pid": 1, "status": "zombie"}}"#)
            .await?;
        assert!(WorkerRegistry::load(&file).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_persists() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("workers.json");
        let mut registry = WorkerRegistry::load(&file).await?;
        registry.put("a", WorkerRecord::new("/w/a".into())).await?;
        registry.put("b", WorkerRecord::new("/w/b".into())).await?;

        assert!(registry.remove("a").await?.is_some());
        assert!(registry.remove("a").await?.is_none());

        let reread = WorkerRegistry::load(&file).await?;
        let names: Vec<&String> = reread.all().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b"]);
        Ok(())
    }
}
