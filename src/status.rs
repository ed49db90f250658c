//! Status reporting for the bundled services.
use std::path::PathBuf;

use strum::IntoEnumIterator;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::debug;

use crate::paths::php_fpm_id;
use crate::process::ProcessStatus;
use crate::stack::{ServiceKind, Stack};

const GREEN_BOLD: &str = "\x1b[1;32m"; // Bright Green
const RED_BOLD: &str = "\x1b[1;31m"; // Bright Red
const MAGENTA_BOLD: &str = "\x1b[1;35m"; // Magenta
const YELLOW_BOLD: &str = "\x1b[1;33m"; // Yellow/Gold
const RESET: &str = "\x1b[0m"; // Reset color

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceState {
    Running { pid: i32 },
    Stopped,
    /// Status could not be determined.
    Unknown(String),
}

/// Point-in-time view of one service.
#[derive(Debug, Clone)]
pub struct ServiceSnapshot {
    pub id: String,
    pub name: String,
    pub state: ServiceState,
    pub memory_bytes: Option<u64>,
    pub uptime_secs: Option<u64>,
    pub log_path: PathBuf,
}

impl ServiceSnapshot {
    pub fn is_running(&self) -> bool {
        matches!(self.state, ServiceState::Running { .. })
    }
}

/// Collects a snapshot for every single-instance service and every known PHP version.
pub fn collect(stack: &Stack) -> Vec<ServiceSnapshot> {
    let mut snapshots: Vec<ServiceSnapshot> = ServiceKind::iter()
        .map(|kind| {
            let service = stack.service(kind);
            snapshot(
                service.id().to_string(),
                service.display_name().to_string(),
                service.status().map_err(|err| err.to_string()),
                service.log_path(),
            )
        })
        .collect();

    for version in stack.known_php_versions() {
        let runtime = stack.php().runtime(&version);
        snapshots.push(snapshot(
            php_fpm_id(&version),
            format!("PHP-FPM {version}"),
            stack.php().status(&version).map_err(|err| err.to_string()),
            runtime.log_path,
        ));
    }

    let pids: Vec<Pid> = snapshots
        .iter()
        .filter_map(|snapshot| match snapshot.state {
            ServiceState::Running { pid } => Some(Pid::from_u32(pid as u32)),
            _ => None,
        })
        .collect();
    if pids.is_empty() {
        return snapshots;
    }

    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&pids), true);
    for snapshot in &mut snapshots {
        if let ServiceState::Running { pid } = snapshot.state
            && let Some(process) = system.process(Pid::from_u32(pid as u32))
        {
            snapshot.memory_bytes = Some(process.memory());
            snapshot.uptime_secs = Some(process.run_time());
        }
    }
    snapshots
}

fn snapshot(
    id: String,
    name: String,
    status: Result<ProcessStatus, String>,
    log_path: PathBuf,
) -> ServiceSnapshot {
    debug!("Checking status for service: {id}");
    let state = match status {
        Ok(ProcessStatus::Running { pid }) => ServiceState::Running { pid },
        Ok(ProcessStatus::Stopped) => ServiceState::Stopped,
        Err(reason) => ServiceState::Unknown(reason),
    };
    ServiceSnapshot {
        id,
        name,
        state,
        memory_bytes: None,
        uptime_secs: None,
        log_path,
    }
}

pub fn print_report(snapshots: &[ServiceSnapshot]) {
    if snapshots.is_empty() {
        println!("No managed services.");
        return;
    }

    println!("Service statuses:");
    for snapshot in snapshots {
        match &snapshot.state {
            ServiceState::Running { pid } => {
                println!("{}● {} Running{}", GREEN_BOLD, snapshot.name, RESET);
                println!("       Id: {}", snapshot.id);
                println!(" Main PID: {}", pid);
                if let Some(uptime) = snapshot.uptime_secs {
                    println!("   Active: started {}", format_elapsed(uptime));
                }
                if let Some(memory) = snapshot.memory_bytes {
                    println!("   {}Memory: {}{}", MAGENTA_BOLD, format_memory(memory), RESET);
                }
            }
            ServiceState::Stopped => {
                println!("● {} - Not running", snapshot.name);
            }
            ServiceState::Unknown(reason) => {
                println!(
                    "● {} - {}Status unknown ({}){}",
                    snapshot.name, RED_BOLD, reason, RESET
                );
            }
        }
        println!("      {}Log:{} {}", YELLOW_BOLD, RESET, snapshot.log_path.display());
    }
}

fn format_elapsed(total_seconds: u64) -> String {
    match total_seconds {
        0..=59 => format!("{} secs ago", total_seconds),
        60..=3_599 => format!("{} mins ago", total_seconds / 60),
        3_600..=86_399 => format!("{} hours ago", total_seconds / 3_600),
        86_400..=604_799 => format!("{} days ago", total_seconds / 86_400),
        _ => format!("{} weeks ago", total_seconds / 604_800),
    }
}

fn format_memory(bytes: u64) -> String {
    format!("{:.1}M", bytes as f64 / (1024.0 * 1024.0))
}
