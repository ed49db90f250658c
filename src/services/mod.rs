//! Configuration generators and lifecycle wrappers for the bundled services.
//!
//! Each generator renders its own config files, checks its binary and hands the
//! launch to the [`ProcessSupervisor`]. The helpers below are shared by all of them.
use std::{
    env,
    fs::{self, OpenOptions},
    io::{self, Write},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::constants::LOG_TAIL_LINES;
use crate::error::ServiceError;
use crate::logs;
use crate::paths::Layout;
use crate::process::{ProcessStatus, ProcessSupervisor, StartOutcome, StopOutcome};

pub mod certificates;
pub mod database;
pub mod dns;
pub mod object_store;
pub mod php_fpm;
pub mod proxy;

pub use certificates::{CertificateProvider, CertificateRecord};
pub use database::Database;
pub use dns::DnsResolver;
pub use object_store::ObjectStore;
pub use php_fpm::{PhpFpm, PhpRuntime};
pub use proxy::{ProxyControl, ReverseProxy};

/// Collaborators every generator needs.
#[derive(Clone)]
pub struct ServiceContext {
    pub layout: Arc<Layout>,
    pub settings: Arc<Settings>,
    pub supervisor: Arc<ProcessSupervisor>,
}

impl ServiceContext {
    pub fn new(
        layout: Arc<Layout>,
        settings: Arc<Settings>,
        supervisor: Arc<ProcessSupervisor>,
    ) -> Self {
        Self {
            layout,
            settings,
            supervisor,
        }
    }
}

/// Common lifecycle of a single-instance bundled service.
pub trait BundledService: Send + Sync {
    /// Supervisor id.
    fn id(&self) -> &'static str;

    /// Name used in messages.
    fn display_name(&self) -> &'static str;

    /// Creates directories and config files; rewrites only settings-synced files.
    fn ensure_config(&self) -> Result<(), ServiceError>;

    fn start(&self) -> Result<StartOutcome, ServiceError>;

    fn stop(&self) -> Result<StopOutcome, ServiceError>;

    fn status(&self) -> Result<ProcessStatus, ServiceError>;

    /// Log worth showing when the service misbehaves.
    fn log_path(&self) -> PathBuf;
}

pub(crate) fn config_error(service: &str, path: &Path, source: io::Error) -> ServiceError {
    ServiceError::ConfigWrite {
        service: service.to_string(),
        path: path.to_path_buf(),
        source,
    }
}

pub(crate) fn ensure_dir(service: &str, path: &Path) -> Result<(), ServiceError> {
    fs::create_dir_all(path).map_err(|source| config_error(service, path, source))
}

/// Replaces `path` atomically: write a sibling temp file, then rename it over the target.
pub(crate) fn write_atomic(service: &str, path: &Path, contents: &str) -> Result<(), ServiceError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    ensure_dir(service, parent)?;

    let mut temp =
        NamedTempFile::new_in(parent).map_err(|source| config_error(service, path, source))?;
    temp.write_all(contents.as_bytes())
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|source| config_error(service, path, source))?;
    temp.persist(path)
        .map_err(|err| config_error(service, path, err.error))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))
        .map_err(|source| config_error(service, path, source))?;

    debug!("Wrote {}", path.display());
    Ok(())
}

/// Writes `contents` only when `path` does not exist yet. Returns whether it wrote.
pub(crate) fn write_if_absent(
    service: &str,
    path: &Path,
    contents: &str,
) -> Result<bool, ServiceError> {
    if path.exists() {
        return Ok(false);
    }
    write_atomic(service, path, contents)?;
    Ok(true)
}

/// Fails unless `path` is a regular file with an execute bit set.
pub(crate) fn ensure_executable(service: &str, path: &Path) -> Result<(), ServiceError> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => {
            return Err(ServiceError::BinaryMissing {
                service: service.to_string(),
                path: path.to_path_buf(),
            });
        }
    };

    if metadata.permissions().mode() & 0o111 == 0 {
        return Err(ServiceError::NotExecutable {
            service: service.to_string(),
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(target_os = "macos")]
const LIBRARY_PATH_VAR: &str = "DYLD_LIBRARY_PATH";
#[cfg(not(target_os = "macos"))]
const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";

/// Library search path pointing at a bundle's private shared libraries, if it ships any.
pub(crate) fn library_env(lib_dir: &Path) -> Option<(String, String)> {
    if !lib_dir.is_dir() {
        return None;
    }

    let mut value = lib_dir.display().to_string();
    if let Ok(existing) = env::var(LIBRARY_PATH_VAR)
        && !existing.is_empty()
    {
        value = format!("{value}:{existing}");
    }
    Some((LIBRARY_PATH_VAR.to_string(), value))
}

/// Removes a unix socket left behind by an unclean shutdown.
pub(crate) fn remove_stale_socket(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed leftover socket {}", path.display()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!("Failed to remove socket {}: {err}", path.display()),
    }
}

/// Waits `settle`, then requires `id` to be running.
///
/// Catches services that die asynchronously after the supervisor's own launch check.
pub(crate) fn confirm_running(
    supervisor: &ProcessSupervisor,
    id: &str,
    service: &str,
    settle: Duration,
    logs_to_tail: &[PathBuf],
) -> Result<ProcessStatus, ServiceError> {
    thread::sleep(settle);
    let status = supervisor.status(id)?;
    if status.is_running() {
        return Ok(status);
    }

    let log_tail = logs_to_tail
        .iter()
        .find_map(|path| logs::failure_context(path, LOG_TAIL_LINES));
    Err(ServiceError::NotRunning {
        service: service.to_string(),
        log_tail,
    })
}

/// Polls `child` until it exits or `timeout` elapses. `None` means it is still running.
pub(crate) fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }

        if Instant::now() >= deadline {
            return Ok(None);
        }

        thread::sleep(Duration::from_millis(50));
    }
}

/// Runs a short-lived tool with output appended to `log_path`, bounded by `timeout`.
///
/// A tool that overruns is killed and reported as failed.
pub(crate) fn run_bounded(
    tool: &str,
    command: &mut Command,
    timeout: Duration,
    log_path: &Path,
) -> Result<(), ServiceError> {
    let tool_error = |reason: String| ServiceError::ToolFailed {
        tool: tool.to_string(),
        reason,
    };

    if let Some(parent) = log_path.parent() {
        ensure_dir(tool, parent)?;
    }
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|source| config_error(tool, log_path, source))?;
    let log_err = log
        .try_clone()
        .map_err(|source| config_error(tool, log_path, source))?;

    debug!("Running {tool}: {command:?}");
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .spawn()
        .map_err(|err| tool_error(format!("failed to launch: {err}")))?;

    match wait_with_timeout(&mut child, timeout) {
        Ok(Some(status)) if status.success() => Ok(()),
        Ok(Some(status)) => {
            let tail = logs::tail_lines(log_path, LOG_TAIL_LINES)
                .unwrap_or_else(|| "no output".to_string());
            Err(tool_error(format!("{status}\n{tail}")))
        }
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            Err(tool_error(format!("timed out after {timeout:?}")))
        }
        Err(err) => Err(tool_error(format!("failed to wait: {err}"))),
    }
}
