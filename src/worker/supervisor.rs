//! Worker process supervisor.
//!
//! Owns the registry and the child handles of every script it started.
//! Liveness is checked lazily: whenever status is read or a start/stop is
//! attempted. For children spawned by this process a non-blocking
//! `try_wait` runs first so exited scripts are reaped instead of lingering
//! as zombies (which would still answer the signal-0 probe).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::path::{ensure_confined, resolve_in_root};
use super::registry::{WorkerRecord, WorkerRegistry};
use super::WorkerError;
use crate::config::{
    OUTPUT_INLINE_LIMIT, PACKAGE_INSTALL_TIMEOUT, RESTART_SETTLE_DELAY, WORKER_LOG_FILE,
};
use crate::process;

/// Observed health of a worker after a liveness re-check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerHealth {
    /// Process is alive
    Running,
    /// No process was supervised
    Stopped,
    /// Registry said running but the process was gone; the record has been corrected
    Crashed,
}

/// Worker record together with its freshly checked health
#[derive(Debug, Clone)]
pub struct WorkerReport {
    /// Worker name
    pub name: String,
    /// Registry record after correction
    pub record: WorkerRecord,
    /// Result of the liveness check
    pub health: WorkerHealth,
}

/// One entry of a sandbox directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// File or directory name
    pub name: String,
    /// Whether the entry is a directory
    pub is_dir: bool,
    /// Size in bytes (0 for directories)
    pub size: u64,
}

struct SupervisorState {
    registry: WorkerRegistry,
    children: HashMap<String, Child>,
}

impl SupervisorState {
    /// Liveness of `name`'s process, reaping our own child if it exited.
    fn probe(&mut self, name: &str, pid: u32) -> bool {
        if let Some(child) = self.children.get_mut(name) {
            match child.try_wait() {
                Ok(Some(exit)) => {
                    debug!(worker = %name, pid, ?exit, "Reaped exited worker process");
                    self.children.remove(name);
                    return false;
                }
                Ok(None) => return true,
                Err(e) => {
                    warn!(worker = %name, pid, error = %e, "try_wait failed, falling back to signal probe");
                }
            }
        }
        process::is_alive(pid)
    }

    fn record(&self, name: &str) -> Result<WorkerRecord, WorkerError> {
        self.registry
            .get(name)
            .cloned()
            .ok_or_else(|| WorkerError::NotFound(name.to_string()))
    }

    /// Terminate the process and hand its child handle to a reaper task.
    fn kill(&mut self, name: &str, pid: u32) -> Result<(), WorkerError> {
        process::terminate(pid).map_err(|errno| WorkerError::Signal { pid, errno })?;
        if let Some(mut child) = self.children.remove(name) {
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
        }
        info!(worker = %name, pid, "Sent SIGTERM to worker");
        Ok(())
    }
}

/// Creates, runs and tears down worker sandboxes
pub struct WorkerSupervisor {
    root: PathBuf,
    interpreter: String,
    state: Mutex<SupervisorState>,
}

impl WorkerSupervisor {
    /// Create a supervisor over `root` using an already loaded registry.
    ///
    /// `interpreter` runs scripts (`<interpreter> <script>`) and package
    /// installs (`<interpreter> -m pip install <spec>`).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, interpreter: impl Into<String>, registry: WorkerRegistry) -> Self {
        Self {
            root: root.into(),
            interpreter: interpreter.into(),
            state: Mutex::new(SupervisorState {
                registry,
                children: HashMap::new(),
            }),
        }
    }

    /// Directory holding all sandboxes
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a sandbox directory and a stopped record.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken or unusable, or the directory cannot be created.
    #[instrument(skip(self))]
    pub async fn create(&self, name: &str) -> Result<WorkerRecord, WorkerError> {
        let path = self.sandbox_path(name)?;
        let mut state = self.state.lock().await;
        if state.registry.contains(name) {
            return Err(WorkerError::AlreadyExists(name.to_string()));
        }

        tokio::fs::create_dir_all(&path).await?;
        let record = WorkerRecord::new(path);
        state.registry.put(name, record.clone()).await?;
        info!(worker = %name, path = %record.path.display(), "Worker created");
        Ok(record)
    }

    /// Kill any live process, remove the sandbox recursively and forget the worker.
    ///
    /// # Errors
    ///
    /// Fails if the worker is unknown or the sandbox cannot be removed.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<(), WorkerError> {
        let mut state = self.state.lock().await;
        let record = state.record(name)?;

        if let Some(pid) = record.running_pid() {
            state.kill(name, pid)?;
        }
        state.children.remove(name);

        match tokio::fs::remove_dir_all(&record.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(worker = %name, "Sandbox directory already missing");
            }
            Err(e) => return Err(e.into()),
        }
        state.registry.remove(name).await?;
        info!(worker = %name, "Worker deleted");
        Ok(())
    }

    /// Spawn `script` inside the sandbox and return its pid.
    ///
    /// # Errors
    ///
    /// Fails if the worker is unknown, already has a live process, or the
    /// script is missing or escapes the sandbox.
    #[instrument(skip(self))]
    pub async fn start(&self, name: &str, script: &str) -> Result<u32, WorkerError> {
        let mut state = self.state.lock().await;
        self.start_locked(&mut state, name, script).await
    }

    /// Terminate the worker's process.
    ///
    /// # Errors
    ///
    /// Fails with [`WorkerError::NotRunning`] if nothing is running, including
    /// when the process already died on its own (the record is corrected).
    #[instrument(skip(self))]
    pub async fn stop(&self, name: &str) -> Result<(), WorkerError> {
        let mut state = self.state.lock().await;
        let mut record = state.record(name)?;
        let Some(pid) = record.running_pid() else {
            return Err(WorkerError::NotRunning(name.to_string()));
        };

        if state.probe(name, pid) {
            state.kill(name, pid)?;
        } else {
            info!(worker = %name, pid, "Process already gone at stop, correcting record");
            record.mark_stopped();
            state.registry.put(name, record).await?;
            return Err(WorkerError::NotRunning(name.to_string()));
        }

        record.mark_stopped();
        state.registry.put(name, record).await?;
        Ok(())
    }

    /// Re-run the last started script, terminating a live process first.
    ///
    /// # Errors
    ///
    /// Fails with [`WorkerError::NoScriptRecorded`] if the worker was never
    /// started, or [`WorkerError::AlreadyRunning`] if the old process is still
    /// alive after the settle delay (the record keeps tracking it).
    #[instrument(skip(self))]
    pub async fn restart(&self, name: &str) -> Result<u32, WorkerError> {
        let mut state = self.state.lock().await;
        let mut record = state.record(name)?;
        let script = record
            .main_script
            .clone()
            .ok_or_else(|| WorkerError::NoScriptRecorded(name.to_string()))?;

        if let Some(pid) = record.running_pid() {
            if state.probe(name, pid) {
                state.kill(name, pid)?;
                tokio::time::sleep(RESTART_SETTLE_DELAY).await;
                if state.probe(name, pid) {
                    warn!(worker = %name, pid, "Process survived SIGTERM, restart aborted");
                    return Err(WorkerError::AlreadyRunning {
                        name: name.to_string(),
                        pid,
                    });
                }
            }
            record.mark_stopped();
            state.registry.put(name, record).await?;
        }

        self.start_locked(&mut state, name, &script).await
    }

    /// Record with a fresh liveness check; a vanished process is reported as
    /// [`WorkerHealth::Crashed`] and the record is downgraded and persisted.
    ///
    /// # Errors
    ///
    /// Fails if the worker is unknown or the registry cannot be saved.
    pub async fn status(&self, name: &str) -> Result<WorkerReport, WorkerError> {
        let mut state = self.state.lock().await;
        Self::status_locked(&mut state, name).await
    }

    /// Status of every worker, ordered by name.
    ///
    /// # Errors
    ///
    /// Fails if a corrected record cannot be saved.
    pub async fn status_all(&self) -> Result<Vec<WorkerReport>, WorkerError> {
        let mut state = self.state.lock().await;
        let names: Vec<String> = state.registry.all().map(|(n, _)| n.clone()).collect();
        let mut reports = Vec::with_capacity(names.len());
        for name in names {
            reports.push(Self::status_locked(&mut state, &name).await?);
        }
        Ok(reports)
    }

    /// Install a package with the worker's interpreter, returning its output.
    ///
    /// Runs with the sandbox as working directory only; the installer itself
    /// is not confined.
    ///
    /// # Errors
    ///
    /// Fails if the worker is unknown, the installer cannot be spawned, or it
    /// exceeds [`PACKAGE_INSTALL_TIMEOUT`].
    #[instrument(skip(self))]
    pub async fn install_package(&self, name: &str, spec: &str) -> Result<String, WorkerError> {
        let path = self.state.lock().await.record(name)?.path;

        let output = Command::new(&self.interpreter)
            .args(["-m", "pip", "install", spec])
            .current_dir(&path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(PACKAGE_INSTALL_TIMEOUT, output)
            .await
            .map_err(|_| WorkerError::InstallTimeout(PACKAGE_INSTALL_TIMEOUT.as_secs()))?
            .map_err(WorkerError::Spawn)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", stdout.trim_end(), stderr.trim_end()),
            (false, true) => stdout.trim_end().to_string(),
            (true, false) => stderr.trim_end().to_string(),
            (true, true) => String::new(),
        };
        info!(worker = %name, spec, status = ?output.status, "Package install finished");
        Ok(crate::utils::truncate_output(&combined, OUTPUT_INLINE_LIMIT))
    }

    /// List a directory inside the sandbox.
    ///
    /// # Errors
    ///
    /// Fails on sandbox escape (before touching the filesystem), or if the path does not exist.
    pub async fn list(&self, name: &str, relative: &str) -> Result<Vec<DirEntry>, WorkerError> {
        let (root, target) = self.resolve_with_root(name, relative).await?;
        ensure_confined(&root, &target, relative).await?;
        let meta = tokio::fs::metadata(&target)
            .await
            .map_err(|_| WorkerError::MissingPath(relative.to_string()))?;

        if meta.is_file() {
            let file_name = target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Ok(vec![DirEntry {
                name: file_name,
                is_dir: false,
                size: meta.len(),
            }]);
        }

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&target).await?;
        while let Some(entry) = dir.next_entry().await? {
            let meta = entry.metadata().await?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Remove a file or directory (recursively) inside the sandbox.
    ///
    /// # Errors
    ///
    /// Fails on sandbox escape, when targeting the sandbox root, or if nothing exists there.
    pub async fn remove(&self, name: &str, relative: &str) -> Result<(), WorkerError> {
        let (root, target) = self.resolve_with_root(name, relative).await?;
        if target == root {
            return Err(WorkerError::PathTraversal(relative.to_string()));
        }
        // The entry itself may be a symlink; removing it never touches its target
        if let Some(parent) = target.parent() {
            ensure_confined(&root, parent, relative).await?;
        }

        let meta = tokio::fs::symlink_metadata(&target)
            .await
            .map_err(|_| WorkerError::MissingPath(relative.to_string()))?;
        if meta.is_dir() {
            tokio::fs::remove_dir_all(&target).await?;
        } else {
            tokio::fs::remove_file(&target).await?;
        }
        info!(worker = %name, path = %relative, "Removed sandbox entry");
        Ok(())
    }

    /// Write `content` to a file inside the sandbox, creating parent directories.
    ///
    /// # Errors
    ///
    /// Fails on sandbox escape, when targeting the sandbox root, or on I/O errors.
    pub async fn upload(
        &self,
        name: &str,
        relative: &str,
        content: &[u8],
    ) -> Result<PathBuf, WorkerError> {
        let (root, target) = self.resolve_with_root(name, relative).await?;
        if target == root {
            return Err(WorkerError::PathTraversal(relative.to_string()));
        }
        ensure_confined(&root, &target, relative).await?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&target).await?;
        file.write_all(content).await?;
        file.flush().await?;
        info!(worker = %name, path = %relative, size = content.len(), "Uploaded file to sandbox");
        Ok(target)
    }

    /// Terminate every worker still alive. Called once on clean shutdown.
    ///
    /// Returns the number of processes signalled.
    pub async fn shutdown(&self) -> usize {
        let mut state = self.state.lock().await;
        let running: Vec<(String, WorkerRecord)> = state
            .registry
            .all()
            .filter(|(_, r)| r.running_pid().is_some())
            .map(|(n, r)| (n.clone(), r.clone()))
            .collect();

        let mut signalled = 0;
        for (name, mut record) in running {
            let Some(pid) = record.running_pid() else {
                continue;
            };
            if state.probe(&name, pid) {
                match state.kill(&name, pid) {
                    Ok(()) => signalled += 1,
                    Err(e) => warn!(worker = %name, error = %e, "Failed to stop worker on shutdown"),
                }
            }
            record.mark_stopped();
            if let Err(e) = state.registry.put(&name, record).await {
                warn!(worker = %name, error = %e, "Failed to persist worker on shutdown");
            }
        }
        info!(signalled, "Worker supervisor shut down");
        signalled
    }

    fn sandbox_path(&self, name: &str) -> Result<PathBuf, WorkerError> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\'])
            && !name.chars().any(char::is_whitespace);
        if !valid {
            return Err(WorkerError::InvalidName(name.to_string()));
        }
        resolve_in_root(&self.root, name)
    }

    async fn resolve_with_root(
        &self,
        name: &str,
        relative: &str,
    ) -> Result<(PathBuf, PathBuf), WorkerError> {
        let root = self.state.lock().await.record(name)?.path;
        let target = resolve_in_root(&root, relative)?;
        Ok((root, target))
    }

    async fn start_locked(
        &self,
        state: &mut SupervisorState,
        name: &str,
        script: &str,
    ) -> Result<u32, WorkerError> {
        let mut record = state.record(name)?;
        if let Some(pid) = record.running_pid() {
            if state.probe(name, pid) {
                return Err(WorkerError::AlreadyRunning {
                    name: name.to_string(),
                    pid,
                });
            }
        }

        let script_path = resolve_in_root(&record.path, script)?;
        ensure_confined(&record.path, &script_path, script).await?;
        let is_file = tokio::fs::metadata(&script_path)
            .await
            .is_ok_and(|m| m.is_file());
        if !is_file {
            return Err(WorkerError::ScriptNotFound(script.to_string()));
        }

        let log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(record.path.join(WORKER_LOG_FILE))
            .await?
            .into_std()
            .await;
        let log_err = log.try_clone()?;

        let child = Command::new(&self.interpreter)
            .arg(&script_path)
            .current_dir(&record.path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(WorkerError::Spawn)?;
        let pid = child
            .id()
            .ok_or_else(|| WorkerError::Spawn(std::io::Error::other("process exited before its pid was read")))?;

        record.mark_running(pid, script);
        state.registry.put(name, record).await?;
        state.children.insert(name.to_string(), child);
        info!(worker = %name, pid, script, "Worker started");
        Ok(pid)
    }

    async fn status_locked(
        state: &mut SupervisorState,
        name: &str,
    ) -> Result<WorkerReport, WorkerError> {
        let mut record = state.record(name)?;
        let health = match record.running_pid() {
            None => WorkerHealth::Stopped,
            Some(pid) if state.probe(name, pid) => WorkerHealth::Running,
            Some(pid) => {
                info!(worker = %name, pid, "Crash detected, marking worker stopped");
                record.mark_stopped();
                state.registry.put(name, record.clone()).await?;
                WorkerHealth::Crashed
            }
        };
        Ok(WorkerReport {
            name: name.to_string(),
            record,
            health,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn supervisor(dir: &Path) -> Result<WorkerSupervisor, Box<dyn std::error::Error>> {
        let registry = WorkerRegistry::load(dir.join("workers.json")).await?;
        Ok(WorkerSupervisor::new(dir.join("workers"), "sh", registry))
    }

    async fn with_script(
        sup: &WorkerSupervisor,
        name: &str,
        body: &str,
    ) -> Result<(), Box<dyn std::error::Error>> {
        sup.create(name).await?;
        sup.upload(name, "run.sh", body.as_bytes()).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_create_twice_fails() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let sup = supervisor(dir.path()).await?;
        let record = sup.create("bot1").await?;
        assert!(record.path.is_dir());
        assert!(matches!(
            sup.create("bot1").await,
            Err(WorkerError::AlreadyExists(_))
        ));
        assert!(matches!(
            sup.create("../evil").await,
            Err(WorkerError::InvalidName(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_start_status_external_kill() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let sup = supervisor(dir.path()).await?;
        with_script(&sup, "bot1", "exec sleep 30\n").await?;

        let pid = sup.start("bot1", "run.sh").await?;
        let report = sup.status("bot1").await?;
        assert_eq!(report.health, WorkerHealth::Running);
        assert_eq!(report.record.pid, Some(pid));

        process::terminate(pid)?;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let report = sup.status("bot1").await?;
        assert_eq!(report.health, WorkerHealth::Crashed);
        assert_eq!(report.record.pid, None);

        // The correction is persisted and the next read is a plain stop
        let report = sup.status("bot1").await?;
        assert_eq!(report.health, WorkerHealth::Stopped);
        Ok(())
    }

    #[tokio::test]
    async fn test_start_rejects_running_and_missing_script() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let sup = supervisor(dir.path()).await?;
        with_script(&sup, "bot1", "exec sleep 30\n").await?;

        assert!(matches!(
            sup.start("bot1", "missing.sh").await,
            Err(WorkerError::ScriptNotFound(_))
        ));
        assert!(matches!(
            sup.start("bot1", "../../etc/passwd").await,
            Err(WorkerError::PathTraversal(_))
        ));

        sup.start("bot1", "run.sh").await?;
        assert!(matches!(
            sup.start("bot1", "run.sh").await,
            Err(WorkerError::AlreadyRunning { .. })
        ));
        sup.stop("bot1").await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_then_stop_again() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let sup = supervisor(dir.path()).await?;
        with_script(&sup, "bot1", "exec sleep 30\n").await?;

        let pid = sup.start("bot1", "run.sh").await?;
        sup.stop("bot1").await?;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!process::is_alive(pid));

        let report = sup.status("bot1").await?;
        assert_eq!(report.health, WorkerHealth::Stopped);
        assert_eq!(report.record.main_script.as_deref(), Some("run.sh"));
        assert!(matches!(sup.stop("bot1").await, Err(WorkerError::NotRunning(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_restart_requires_script_and_replaces_pid() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let sup = supervisor(dir.path()).await?;
        with_script(&sup, "bot1", "exec sleep 30\n").await?;

        assert!(matches!(
            sup.restart("bot1").await,
            Err(WorkerError::NoScriptRecorded(_))
        ));

        let first = sup.start("bot1", "run.sh").await?;
        let second = sup.restart("bot1").await?;
        assert_ne!(first, second);
        assert!(!process::is_alive(first));
        assert_eq!(sup.status("bot1").await?.health, WorkerHealth::Running);
        sup.stop("bot1").await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_restart_keeps_tracking_process_that_ignores_sigterm(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let sup = supervisor(dir.path()).await?;
        with_script(&sup, "stubborn", "trap '' TERM\nexec sleep 30\n").await?;
        let pid = sup.start("stubborn", "run.sh").await?;

        match sup.restart("stubborn").await {
            Err(WorkerError::AlreadyRunning { pid: running, .. }) => assert_eq!(running, pid),
            other => panic!("expected AlreadyRunning, got {other:?}"),
        }
        let report = sup.status("stubborn").await?;
        assert_eq!(report.health, WorkerHealth::Running);
        assert_eq!(report.record.pid, Some(pid));

        let raw = i32::try_from(pid)?;
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), nix::sys::signal::Signal::SIGKILL)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_output_is_captured_to_log() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let sup = supervisor(dir.path()).await?;
        with_script(&sup, "bot1", "echo out\necho err >&2\n").await?;

        sup.start("bot1", "run.sh").await?;
        tokio::time::sleep(Duration::from_millis(300)).await;

        let log = tokio::fs::read_to_string(dir.path().join("workers/bot1").join(WORKER_LOG_FILE)).await?;
        assert!(log.contains("out"));
        assert!(log.contains("err"));
        // The script exited on its own: the next status reaps it
        assert_eq!(sup.status("bot1").await?.health, WorkerHealth::Crashed);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_kills_and_removes_sandbox() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let sup = supervisor(dir.path()).await?;
        with_script(&sup, "bot1", "exec sleep 30\n").await?;
        let pid = sup.start("bot1", "run.sh").await?;

        sup.delete("bot1").await?;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!process::is_alive(pid));
        assert!(!dir.path().join("workers/bot1").exists());
        assert!(matches!(sup.status("bot1").await, Err(WorkerError::NotFound(_))));
        assert!(matches!(sup.delete("bot1").await, Err(WorkerError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_file_operations_stay_in_sandbox() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let sup = supervisor(dir.path()).await?;
        sup.create("bot1").await?;
        sup.create("bot2").await?;
        sup.upload("bot2", "secret.txt", b"top secret").await?;

        sup.upload("bot1", "data/notes.txt", b"hello").await?;
        let listing = sup.list("bot1", "").await?;
        assert_eq!(
            listing,
            vec![DirEntry {
                name: "data".to_string(),
                is_dir: true,
                size: 0
            }]
        );
        let listing = sup.list("bot1", "data").await?;
        assert_eq!(listing[0].size, 5);

        for bad in ["../bot2", "../bot2/secret.txt", "/etc"] {
            assert!(matches!(sup.list("bot1", bad).await, Err(WorkerError::PathTraversal(_))));
            assert!(matches!(sup.remove("bot1", bad).await, Err(WorkerError::PathTraversal(_))));
            assert!(matches!(
                sup.upload("bot1", bad, b"x").await,
                Err(WorkerError::PathTraversal(_))
            ));
        }
        assert_eq!(
            tokio::fs::read(dir.path().join("workers/bot2/secret.txt")).await?,
            b"top secret"
        );

        assert!(matches!(sup.remove("bot1", ".").await, Err(WorkerError::PathTraversal(_))));
        sup.remove("bot1", "data").await?;
        assert!(sup.list("bot1", "").await?.is_empty());
        assert!(matches!(sup.remove("bot1", "data").await, Err(WorkerError::MissingPath(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_symlink_out_of_sandbox_is_refused() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let sup = supervisor(dir.path()).await?;
        sup.create("bot1").await?;
        let outside = dir.path().join("outside");
        tokio::fs::create_dir_all(&outside).await?;
        tokio::fs::write(outside.join("secret.txt"), b"s").await?;
        tokio::fs::write(outside.join("evil.sh"), b"exit 0\n").await?;
        std::os::unix::fs::symlink(&outside, dir.path().join("workers/bot1/link"))?;

        assert!(matches!(sup.list("bot1", "link").await, Err(WorkerError::PathTraversal(_))));
        assert!(matches!(
            sup.upload("bot1", "link/pwned.txt", b"x").await,
            Err(WorkerError::PathTraversal(_))
        ));
        assert!(!outside.join("pwned.txt").exists());
        assert!(matches!(
            sup.remove("bot1", "link/secret.txt").await,
            Err(WorkerError::PathTraversal(_))
        ));
        assert!(outside.join("secret.txt").exists());
        assert!(matches!(
            sup.start("bot1", "link/evil.sh").await,
            Err(WorkerError::PathTraversal(_))
        ));

        // Removing the link itself leaves its target alone
        sup.remove("bot1", "link").await?;
        assert!(outside.join("secret.txt").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_terminates_live_workers() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let sup = supervisor(dir.path()).await?;
        with_script(&sup, "a", "exec sleep 30\n").await?;
        with_script(&sup, "b", "exec sleep 30\n").await?;
        sup.create("idle").await?;
        let pa = sup.start("a", "run.sh").await?;
        let pb = sup.start("b", "run.sh").await?;

        assert_eq!(sup.shutdown().await, 2);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!process::is_alive(pa));
        assert!(!process::is_alive(pb));

        let reloaded = WorkerRegistry::load(dir.path().join("workers.json")).await?;
        assert!(reloaded.all().all(|(_, r)| r.running_pid().is_none()));
        Ok(())
    }
}
