//! PID file parsing and liveness probing.
//!
//! A PID file holds a single positive decimal integer. Anything else (missing file,
//! empty, garbage, zero, negative) means "not running".
use std::{fs, io, path::Path};

use nix::{errno::Errno, sys::signal, unistd::Pid};
use tracing::debug;

/// Reads the PID recorded in `path`.
pub fn read_pid(path: &Path) -> Option<i32> {
    let contents = fs::read_to_string(path).ok()?;
    parse_pid(&contents)
}

/// Parses PID file contents.
pub fn parse_pid(contents: &str) -> Option<i32> {
    contents.trim().parse::<i32>().ok().filter(|pid| *pid > 0)
}

/// Writes `pid` to `path`, creating parent directories.
pub fn write_pid(path: &Path, pid: i32) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{pid}\n"))
}

/// Whether a process with `pid` exists and is not a zombie.
///
/// `EPERM` counts as alive: the process exists but belongs to someone else.
pub fn is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }

    match signal::kill(Pid::from_raw(pid), None) {
        Ok(()) => !is_zombie(pid),
        Err(Errno::EPERM) => true,
        Err(Errno::ESRCH) => false,
        Err(err) => {
            debug!("Liveness probe for PID {pid} failed: {err}");
            false
        }
    }
}

/// Reads `path` and returns the PID only if that process is alive.
pub fn live_pid(path: &Path) -> Option<i32> {
    read_pid(path).filter(|pid| is_alive(*pid))
}

/// Deletes `path` if it exists. Returns whether a file was removed.
pub fn remove(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Whether `path` exists but does not name a live process.
pub fn is_stale(path: &Path) -> bool {
    path.exists() && live_pid(path).is_none()
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: i32) -> bool {
    let Ok(contents) = fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };

    // The command name is wrapped in parentheses and may contain spaces; the state
    // character is the first field after the closing ')'.
    contents
        .rfind(')')
        .and_then(|idx| contents[idx + 1..].trim_start().chars().next())
        .is_some_and(|state| matches!(state, 'Z' | 'X'))
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: i32) -> bool {
    false
}
