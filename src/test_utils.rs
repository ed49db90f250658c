use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::Path,
    sync::{Arc, Mutex, OnceLock},
    time::Duration,
};

use crate::config::{Settings, TimingSettings};
use crate::paths::Layout;
use crate::process::{ProcessSupervisor, SupervisorTiming};
use crate::services::ServiceContext;

/// Global lock for environment variable modifications in tests.
/// All tests that modify environment variables (especially HOME) should acquire this lock
/// to prevent race conditions between parallel test executions.
pub static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Writes an executable shell script at `path`, creating parent directories.
pub fn fake_binary(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// Settings with timings short enough for tests.
pub fn fast_settings() -> Settings {
    Settings {
        timing: TimingSettings {
            poll_interval: Duration::from_millis(50),
            launch_check: Duration::from_millis(100),
            stop_timeout: Duration::from_secs(2),
            kill_grace: Duration::from_secs(1),
            database_stop_timeout: Duration::from_secs(3),
            database_init_timeout: Duration::from_secs(5),
            certificate_timeout: Duration::from_secs(5),
            proxy_settle: Duration::from_millis(50),
            php_settle: Duration::from_millis(50),
            dns_settle: Duration::from_millis(50),
            database_settle: Duration::from_millis(50),
            object_store_settle: Duration::from_millis(50),
        },
        ..Settings::default()
    }
}

/// Service context with every path below `root`.
pub fn test_context(root: &Path) -> ServiceContext {
    let layout = Layout::rooted(root);
    let settings = fast_settings();
    let supervisor = ProcessSupervisor::new(layout.clone(), SupervisorTiming::from(&settings.timing));
    ServiceContext::new(Arc::new(layout), Arc::new(settings), Arc::new(supervisor))
}
