//! In-memory bookkeeping of supervised processes.
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    process::Child,
    sync::Mutex,
};

use chrono::{DateTime, Local};

use crate::error::ProcessError;

/// How the liveness of a managed process is determined.
#[derive(Debug)]
pub enum Tracking {
    /// Liveness comes from the PID recorded in this file.
    PidFile(PathBuf),
    /// Liveness comes from polling an owned child handle.
    Handle(Child),
}

impl Tracking {
    /// PID file path when tracked by file.
    pub fn pid_file(&self) -> Option<&Path> {
        match self {
            Tracking::PidFile(path) => Some(path),
            Tracking::Handle(_) => None,
        }
    }
}

/// A logical service instance under supervision.
#[derive(Debug)]
pub struct ManagedProcess {
    /// Stable key, e.g. `internal-proxy` or `php-fpm-8.3`.
    pub id: String,
    /// Argument vector used to launch the process. Empty when re-adopted.
    pub command: Vec<String>,
    pub tracking: Tracking,
    /// Cached for display; revalidated before signaling.
    pub last_known_pid: Option<i32>,
    /// Where stdout/stderr are captured.
    pub log_path: Option<PathBuf>,
    pub started_at: DateTime<Local>,
}

impl ManagedProcess {
    pub fn new(
        id: &str,
        command: Vec<String>,
        tracking: Tracking,
        pid: Option<i32>,
        log_path: Option<PathBuf>,
    ) -> Self {
        Self {
            id: id.to_string(),
            command,
            tracking,
            last_known_pid: pid,
            log_path,
            started_at: Local::now(),
        }
    }
}

/// Read-only view of a registry entry.
#[derive(Debug, Clone)]
pub struct ProcessSummary {
    pub id: String,
    pub command: Vec<String>,
    pub pid_file: Option<PathBuf>,
    pub last_known_pid: Option<i32>,
    pub log_path: Option<PathBuf>,
    pub started_at: DateTime<Local>,
}

/// Map from process id to its managed entry. Owns no policy.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    entries: Mutex<HashMap<String, ManagedProcess>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the entry for `process.id`.
    pub fn insert(&self, process: ManagedProcess) -> Result<(), ProcessError> {
        self.entries.lock()?.insert(process.id.clone(), process);
        Ok(())
    }

    /// Removes and returns the entry for `id`.
    pub fn take(&self, id: &str) -> Result<Option<ManagedProcess>, ProcessError> {
        Ok(self.entries.lock()?.remove(id))
    }

    pub fn contains(&self, id: &str) -> Result<bool, ProcessError> {
        Ok(self.entries.lock()?.contains_key(id))
    }

    /// Runs `f` against the entry for `id` while holding the registry lock.
    pub fn with_entry<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut ManagedProcess) -> R,
    ) -> Result<Option<R>, ProcessError> {
        let mut guard = self.entries.lock()?;
        Ok(guard.get_mut(id).map(f))
    }

    /// Ids of every tracked process, sorted.
    pub fn ids(&self) -> Result<Vec<String>, ProcessError> {
        let mut ids: Vec<String> = self.entries.lock()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    pub fn summary(&self, id: &str) -> Result<Option<ProcessSummary>, ProcessError> {
        let guard = self.entries.lock()?;
        Ok(guard.get(id).map(|entry| ProcessSummary {
            id: entry.id.clone(),
            command: entry.command.clone(),
            pid_file: entry.tracking.pid_file().map(Path::to_path_buf),
            last_known_pid: entry.last_known_pid,
            log_path: entry.log_path.clone(),
            started_at: entry.started_at,
        }))
    }
}
