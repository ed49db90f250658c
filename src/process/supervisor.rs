//! Start/stop/status policy over the process registry.
//!
//! Processes launched with a PID file are detached into their own session and are
//! expected to outlive devhost; on the next run they are re-adopted from that file.
//! Processes launched without one are tracked through their child handle. If the id
//! has a conventional PID file, the supervisor records the child's PID there so a
//! later session can still see and stop it.
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs::{self, File, OpenOptions},
    io,
    os::unix::process::CommandExt,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use tracing::{debug, error, info, warn};

use crate::config::TimingSettings;
use crate::constants::LOG_TAIL_LINES;
use crate::error::ProcessError;
use crate::logs;
use crate::paths::Layout;
use crate::process::pid_file;
use crate::process::registry::{ManagedProcess, ProcessRegistry, ProcessSummary, Tracking};

/// Polling and escalation intervals used by the supervisor.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorTiming {
    pub poll_interval: Duration,
    pub launch_check: Duration,
    pub stop_timeout: Duration,
    pub kill_grace: Duration,
}

impl From<&TimingSettings> for SupervisorTiming {
    fn from(timing: &TimingSettings) -> Self {
        Self {
            poll_interval: timing.poll_interval,
            launch_check: timing.launch_check,
            stop_timeout: timing.stop_timeout,
            kill_grace: timing.kill_grace,
        }
    }
}

impl Default for SupervisorTiming {
    fn default() -> Self {
        Self::from(&TimingSettings::default())
    }
}

/// Launch parameters for [`ProcessSupervisor::start`].
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// When set, liveness is tracked through this file instead of the child handle.
    pub pid_file: Option<PathBuf>,
    /// Extra environment for the child.
    pub env: BTreeMap<String, String>,
    /// Where stdout/stderr go. A unique temp file is used when absent.
    pub log_file: Option<PathBuf>,
}

impl StartOptions {
    pub fn with_pid_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pid_file = Some(path.into());
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Result of a successful start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new process was launched.
    Spawned { pid: i32 },
    /// The process was already tracked and alive.
    AlreadyRunning { pid: i32 },
    /// A live process from a previous session was found via its PID file.
    Adopted { pid: i32 },
}

impl StartOutcome {
    pub fn pid(&self) -> i32 {
        match self {
            StartOutcome::Spawned { pid }
            | StartOutcome::AlreadyRunning { pid }
            | StartOutcome::Adopted { pid } => *pid,
        }
    }

    /// User-facing line, e.g. `Nginx started (PID 42)`.
    pub fn describe(&self, service: &str) -> String {
        match self {
            StartOutcome::Spawned { pid } => format!("{service} started (PID {pid})"),
            StartOutcome::AlreadyRunning { pid } => {
                format!("{service} is already running (PID {pid})")
            }
            StartOutcome::Adopted { pid } => {
                format!("{service} was already running (PID {pid}), now tracked")
            }
        }
    }
}

/// Result of a successful stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited after the requested signal.
    Stopped,
    /// Needed SIGKILL after the graceful timeout.
    Killed,
    /// Nothing was running.
    AlreadyStopped,
}

impl StopOutcome {
    pub fn describe(&self, service: &str) -> String {
        match self {
            StopOutcome::Stopped => format!("{service} stopped"),
            StopOutcome::Killed => format!("{service} killed after graceful stop timed out"),
            StopOutcome::AlreadyStopped => format!("{service} was not running"),
        }
    }
}

/// Liveness of a process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running { pid: i32 },
    Stopped,
}

impl ProcessStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Running { .. })
    }

    pub fn pid(&self) -> Option<i32> {
        match self {
            ProcessStatus::Running { pid } => Some(*pid),
            ProcessStatus::Stopped => None,
        }
    }
}

/// One entry of a [`ProcessSupervisor::stop_all`] sweep.
#[derive(Debug, Clone)]
pub struct StopRequest {
    pub id: String,
    pub signal: Signal,
    pub timeout: Duration,
}

impl StopRequest {
    pub fn new(id: impl Into<String>, signal: Signal, timeout: Duration) -> Self {
        Self {
            id: id.into(),
            signal,
            timeout,
        }
    }
}

/// Aggregate result of a stop-all sweep.
#[derive(Debug, Default)]
pub struct StopAllReport {
    pub stopped: Vec<(String, StopOutcome)>,
    pub failures: Vec<(String, String)>,
}

impl StopAllReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        let stopped = self
            .stopped
            .iter()
            .filter(|(_, outcome)| *outcome != StopOutcome::AlreadyStopped)
            .count();
        if self.failures.is_empty() {
            format!("Stopped {stopped} service(s)")
        } else {
            let failed: Vec<String> = self
                .failures
                .iter()
                .map(|(id, reason)| format!("{id}: {reason}"))
                .collect();
            format!(
                "Stopped {stopped} service(s); failed to stop {}",
                failed.join("; ")
            )
        }
    }
}

/// Single source of truth for "is process X running, and how do I stop it".
pub struct ProcessSupervisor {
    layout: Layout,
    registry: ProcessRegistry,
    id_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    timing: SupervisorTiming,
}

impl ProcessSupervisor {
    pub fn new(layout: Layout, timing: SupervisorTiming) -> Self {
        Self {
            layout,
            registry: ProcessRegistry::new(),
            id_locks: Mutex::new(HashMap::new()),
            timing,
        }
    }

    pub fn timing(&self) -> SupervisorTiming {
        self.timing
    }

    /// Serializes start/stop for one id; different ids never contend.
    fn id_lock(&self, id: &str) -> Result<Arc<Mutex<()>>, ProcessError> {
        let mut locks = self.id_locks.lock()?;
        Ok(Arc::clone(locks.entry(id.to_string()).or_default()))
    }

    /// Launches `command` under `id` unless it is already running.
    ///
    /// Does not wait for readiness; callers that care poll [`Self::status`].
    pub fn start(
        &self,
        id: &str,
        command: &[String],
        options: StartOptions,
    ) -> Result<StartOutcome, ProcessError> {
        let Some((program, args)) = command.split_first() else {
            return Err(ProcessError::EmptyCommand { id: id.to_string() });
        };

        let lock = self.id_lock(id)?;
        let _serial = lock.lock()?;

        if let ProcessStatus::Running { pid } = self.probe(id, options.pid_file.as_deref())? {
            if self.registry.contains(id)? {
                debug!("'{id}' already running (PID {pid})");
                return Ok(StartOutcome::AlreadyRunning { pid });
            }

            if let Some(path) = options
                .pid_file
                .clone()
                .or_else(|| self.layout.conventional_pid_file(id))
            {
                info!("Re-adopting '{id}' (PID {pid}) from {}", path.display());
                self.registry.insert(ManagedProcess::new(
                    id,
                    command.to_vec(),
                    Tracking::PidFile(path),
                    Some(pid),
                    options.log_file.clone(),
                ))?;
                return Ok(StartOutcome::Adopted { pid });
            }
        }

        if let Some(path) = options.pid_file.as_deref()
            && pid_file::is_stale(path)
        {
            info!("Removing stale PID file {} for '{id}'", path.display());
            pid_file::remove(path).map_err(|source| io_error(id, source))?;
        }

        let record = match &options.pid_file {
            Some(_) => None,
            None => self.layout.conventional_pid_file(id),
        };
        if let Some(path) = record.as_deref()
            && pid_file::is_stale(path)
        {
            info!("Removing stale PID record {} for '{id}'", path.display());
            pid_file::remove(path).map_err(|source| io_error(id, source))?;
        }

        let (log, log_path) = open_log(id, options.log_file.as_deref())?;
        let log_err = log.try_clone().map_err(|source| io_error(id, source))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&options.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        unsafe {
            cmd.pre_exec(|| {
                // New session: the service must survive devhost exiting.
                if libc::setsid() < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        debug!("Launching '{id}': {command:?} (log: {})", log_path.display());
        let mut child = cmd.spawn().map_err(|source| {
            error!("Failed to launch '{id}': {source}");
            ProcessError::SpawnError {
                id: id.to_string(),
                source,
            }
        })?;
        let pid = child.id() as i32;

        if let Some(path) = record.as_deref()
            && let Err(source) = pid_file::write_pid(path, pid)
        {
            error!("Failed to record PID of '{id}' in {}: {source}", path.display());
            let _ = child.kill();
            let _ = child.wait();
            return Err(io_error(id, source));
        }

        let tracking = match &options.pid_file {
            Some(path) => {
                reap_in_background(id, child);
                Tracking::PidFile(path.clone())
            }
            None => Tracking::Handle(child),
        };
        let tracked_by_handle = matches!(tracking, Tracking::Handle(_));

        self.registry.insert(ManagedProcess::new(
            id,
            command.to_vec(),
            tracking,
            Some(pid),
            Some(log_path.clone()),
        ))?;

        thread::sleep(self.timing.launch_check);

        if tracked_by_handle {
            let exited = self
                .registry
                .with_entry(id, |entry| match &mut entry.tracking {
                    Tracking::Handle(child) => child.try_wait().ok().flatten(),
                    Tracking::PidFile(_) => None,
                })?
                .flatten();

            if let Some(status) = exited {
                if let Some(entry) = self.registry.take(id)? {
                    self.clear_pid_file(id, &entry.tracking)?;
                }
                let log_tail = logs::failure_context(&log_path, LOG_TAIL_LINES);
                warn!("'{id}' exited immediately after launch ({status})");
                return Err(ProcessError::ExitedImmediately {
                    id: id.to_string(),
                    status,
                    log_tail,
                });
            }
        }

        info!("Started '{id}' (PID {pid})");
        Ok(StartOutcome::Spawned { pid })
    }

    /// Stops `id`: `signal`, wait up to `timeout`, then SIGKILL and wait the kill grace.
    ///
    /// On failure the entry stays tracked so the caller may retry.
    pub fn stop(
        &self,
        id: &str,
        signal: Signal,
        timeout: Duration,
    ) -> Result<StopOutcome, ProcessError> {
        let lock = self.id_lock(id)?;
        let _serial = lock.lock()?;

        let Some(mut entry) = self.registry.take(id)? else {
            return self.stop_untracked(id, signal, timeout);
        };

        let pid = match &mut entry.tracking {
            Tracking::PidFile(path) => pid_file::live_pid(path),
            Tracking::Handle(child) => match child.try_wait() {
                Ok(None) => Some(child.id() as i32),
                _ => None,
            },
        };

        let Some(pid) = pid else {
            debug!("'{id}' has no live process; clearing tracking state");
            self.clear_pid_file(id, &entry.tracking)?;
            return Ok(StopOutcome::AlreadyStopped);
        };

        let child = match &mut entry.tracking {
            Tracking::Handle(child) => Some(child),
            Tracking::PidFile(_) => None,
        };

        match self.terminate(id, pid, child, signal, timeout) {
            Ok(outcome) => {
                self.clear_pid_file(id, &entry.tracking)?;
                info!("Stopped '{id}' (PID {pid})");
                Ok(outcome)
            }
            Err(err) => {
                self.registry.insert(entry)?;
                Err(err)
            }
        }
    }

    /// Removes the PID file of `tracking`, or the PID record of a handle launch.
    fn clear_pid_file(&self, id: &str, tracking: &Tracking) -> Result<(), ProcessError> {
        let path = match tracking {
            Tracking::PidFile(path) => Some(path.clone()),
            Tracking::Handle(_) => self.layout.conventional_pid_file(id),
        };
        if let Some(path) = path {
            pid_file::remove(&path).map_err(|source| io_error(id, source))?;
        }
        Ok(())
    }

    /// Untracked ids are stopped through their conventional PID file, if any.
    fn stop_untracked(
        &self,
        id: &str,
        signal: Signal,
        timeout: Duration,
    ) -> Result<StopOutcome, ProcessError> {
        let Some(path) = self.layout.conventional_pid_file(id) else {
            debug!("'{id}' is not tracked; nothing to stop");
            return Ok(StopOutcome::AlreadyStopped);
        };

        match pid_file::live_pid(&path) {
            None => {
                if pid_file::remove(&path).map_err(|source| io_error(id, source))? {
                    debug!("Removed stale PID file {} for '{id}'", path.display());
                }
                Ok(StopOutcome::AlreadyStopped)
            }
            Some(pid) => {
                info!(
                    "Stopping untracked '{id}' (PID {pid}) found via {}",
                    path.display()
                );
                let outcome = self.terminate(id, pid, None, signal, timeout)?;
                pid_file::remove(&path).map_err(|source| io_error(id, source))?;
                Ok(outcome)
            }
        }
    }

    fn terminate(
        &self,
        id: &str,
        pid: i32,
        mut child: Option<&mut Child>,
        signal: Signal,
        timeout: Duration,
    ) -> Result<StopOutcome, ProcessError> {
        let target = Pid::from_raw(pid);

        match signal::kill(target, signal) {
            Ok(()) => debug!("Sent {} to '{id}' (PID {pid})", signal.as_str()),
            Err(Errno::ESRCH) => {
                debug!("'{id}' (PID {pid}) exited before {} was delivered", signal.as_str());
                return Ok(StopOutcome::Stopped);
            }
            Err(err) => return Err(signal_error(id, pid, err)),
        }

        if self.wait_for_exit(pid, child.as_deref_mut(), timeout) {
            return Ok(StopOutcome::Stopped);
        }

        warn!(
            "'{id}' (PID {pid}) did not exit within {timeout:?} after {}; sending SIGKILL",
            signal.as_str()
        );
        match signal::kill(target, Signal::SIGKILL) {
            Ok(()) => {}
            Err(Errno::ESRCH) => return Ok(StopOutcome::Stopped),
            Err(err) => return Err(signal_error(id, pid, err)),
        }

        if self.wait_for_exit(pid, child, self.timing.kill_grace) {
            Ok(StopOutcome::Killed)
        } else {
            error!("'{id}' (PID {pid}) survived SIGKILL");
            Err(ProcessError::StopTimeout {
                id: id.to_string(),
                pid,
            })
        }
    }

    fn wait_for_exit(&self, pid: i32, mut child: Option<&mut Child>, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let gone = match child.as_deref_mut() {
                Some(child) => !matches!(child.try_wait(), Ok(None)),
                None => !pid_file::is_alive(pid),
            };
            if gone {
                return true;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            thread::sleep(self.timing.poll_interval.min(remaining));
        }
    }

    /// Liveness of `id`. Untracked ids are probed via their conventional PID file
    /// without being adopted.
    pub fn status(&self, id: &str) -> Result<ProcessStatus, ProcessError> {
        self.probe(id, None)
    }

    /// Current PID of `id`, revalidated against the PID file or handle.
    pub fn live_pid(&self, id: &str) -> Result<Option<i32>, ProcessError> {
        Ok(self.status(id)?.pid())
    }

    fn probe(&self, id: &str, pid_file_hint: Option<&Path>) -> Result<ProcessStatus, ProcessError> {
        let tracked = self.registry.with_entry(id, |entry| match &mut entry.tracking {
            Tracking::PidFile(path) => {
                let pid = pid_file::live_pid(path);
                if pid.is_some() && pid != entry.last_known_pid {
                    debug!("'{id}' PID changed from {:?} to {pid:?}", entry.last_known_pid);
                    entry.last_known_pid = pid;
                }
                pid
            }
            Tracking::Handle(child) => match child.try_wait() {
                Ok(None) => Some(child.id() as i32),
                Ok(Some(status)) => {
                    debug!("'{id}' exited ({status})");
                    None
                }
                Err(err) => {
                    warn!("Failed to poll '{id}': {err}");
                    None
                }
            },
        })?;

        match tracked {
            Some(Some(pid)) => Ok(ProcessStatus::Running { pid }),
            Some(None) => {
                debug!("'{id}' is gone; dropping it from the registry");
                if let Some(entry) = self.registry.take(id)?
                    && let Tracking::Handle(_) = entry.tracking
                {
                    self.clear_pid_file(id, &entry.tracking)?;
                }
                Ok(ProcessStatus::Stopped)
            }
            None => {
                let path = pid_file_hint
                    .map(Path::to_path_buf)
                    .or_else(|| self.layout.conventional_pid_file(id));
                Ok(path
                    .and_then(|path| pid_file::live_pid(&path))
                    .map_or(ProcessStatus::Stopped, |pid| ProcessStatus::Running { pid }))
            }
        }
    }

    /// Best-effort shutdown of every id in `plan` plus every other tracked id.
    ///
    /// Individual failures are logged and collected; the sweep always completes.
    pub fn stop_all(&self, plan: &[StopRequest]) -> StopAllReport {
        let mut requests = plan.to_vec();
        let planned: HashSet<String> = plan.iter().map(|request| request.id.clone()).collect();
        match self.registry.ids() {
            Ok(ids) => requests.extend(
                ids.into_iter()
                    .filter(|id| !planned.contains(id))
                    .map(|id| StopRequest::new(id, Signal::SIGTERM, self.timing.stop_timeout)),
            ),
            Err(err) => warn!("Unable to enumerate tracked processes: {err}"),
        }

        let mut report = StopAllReport::default();
        for request in requests {
            match self.stop(&request.id, request.signal, request.timeout) {
                Ok(outcome) => report.stopped.push((request.id, outcome)),
                Err(err) => {
                    error!("Failed to stop '{}': {err}", request.id);
                    report.failures.push((request.id, err.to_string()));
                }
            }
        }
        report
    }

    /// Ids currently tracked in memory.
    pub fn tracked_ids(&self) -> Result<Vec<String>, ProcessError> {
        self.registry.ids()
    }

    pub fn summary(&self, id: &str) -> Result<Option<ProcessSummary>, ProcessError> {
        self.registry.summary(id)
    }
}

fn io_error(id: &str, source: io::Error) -> ProcessError {
    ProcessError::Io {
        id: id.to_string(),
        source,
    }
}

fn signal_error(id: &str, pid: i32, err: Errno) -> ProcessError {
    if err == Errno::EPERM {
        ProcessError::PermissionDenied {
            id: id.to_string(),
            pid,
        }
    } else {
        ProcessError::SignalError {
            id: id.to_string(),
            pid,
            source: err,
        }
    }
}

fn open_log(id: &str, path: Option<&Path>) -> Result<(File, PathBuf), ProcessError> {
    match path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|source| io_error(id, source))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| io_error(id, source))?;
            Ok((file, path.to_path_buf()))
        }
        None => {
            let temp = tempfile::Builder::new()
                .prefix(&format!("devhost-{id}-"))
                .suffix(".log")
                .tempfile()
                .map_err(|source| io_error(id, source))?;
            temp.keep()
                .map_err(|err| io_error(id, err.error))
        }
    }
}

/// PID-file tracked children are not kept in the registry; a detached thread reaps
/// them so an exited process never lingers as a zombie that still answers `kill(0)`.
fn reap_in_background(id: &str, mut child: Child) {
    let name = format!("reap-{id}");
    let label = id.to_string();
    let spawned = thread::Builder::new().name(name).spawn(move || match child.wait() {
        Ok(status) => debug!("Launcher process for '{label}' exited ({status})"),
        Err(err) => debug!("Failed to reap launcher process for '{label}': {err}"),
    });

    if let Err(err) = spawned {
        warn!("Unable to spawn reaper thread for '{id}': {err}");
    }
}
