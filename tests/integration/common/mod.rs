#![allow(dead_code)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::Path,
    thread,
    time::{Duration, Instant},
};

use devhost::config::{ProxySettings, Settings, TimingSettings};
use devhost::paths::Layout;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Writes an executable `/bin/sh` script at `path`.
pub fn fake_binary(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create script dir");
    }
    fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("failed to write script");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .expect("failed to chmod script");
}

/// Script body for a foreground daemon that writes `pid_file`, appends `HUP` to
/// `events` on reload and exits cleanly on TERM or QUIT.
pub fn daemon_script(pid_file: &Path, events: &Path) -> String {
    format!(
        r#"echo $$ > "{pid}"
trap 'echo HUP >> "{events}"' HUP
trap 'rm -f "{pid}"; exit 0' TERM QUIT
while true; do sleep 0.1; done"#,
        pid = pid_file.display(),
        events = events.display(),
    )
}

/// Installs fake reverse-proxy and PHP-FPM binaries into the layout's bundle tree.
pub fn install_fake_stack(layout: &Layout, php_versions: &[&str], events: &Path) {
    fake_binary(
        &layout.proxy_binary(),
        &daemon_script(&layout.proxy_pid_file(), events),
    );
    for version in php_versions {
        fake_binary(
            &layout.php_fpm_binary(version),
            &daemon_script(&layout.php_pid_file(version), events),
        );
    }
}

pub fn test_settings() -> Settings {
    Settings {
        proxy: ProxySettings {
            http_port: 8080,
            https_port: 8443,
            port_helper: None,
        },
        timing: TimingSettings {
            poll_interval: Duration::from_millis(50),
            launch_check: Duration::from_millis(100),
            stop_timeout: Duration::from_secs(2),
            kill_grace: Duration::from_secs(1),
            database_stop_timeout: Duration::from_secs(3),
            database_init_timeout: Duration::from_secs(5),
            certificate_timeout: Duration::from_secs(5),
            proxy_settle: Duration::from_millis(100),
            php_settle: Duration::from_millis(100),
            dns_settle: Duration::from_millis(100),
            database_settle: Duration::from_millis(100),
            object_store_settle: Duration::from_millis(100),
        },
        ..Settings::default()
    }
}

pub fn test_settings_yaml() -> &'static str {
    r#"proxy:
  http_port: 8080
  https_port: 8443
timing:
  poll_interval: 50ms
  launch_check: 100ms
  stop_timeout: 2s
  proxy_settle: 100ms
  php_settle: 100ms
  dns_settle: 100ms
"#
}

pub fn wait_for_path(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("Timed out waiting for {:?} to exist", path);
}

pub fn wait_for_lines(path: &Path, expected: usize) -> Vec<String> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(content) = fs::read_to_string(path) {
            let lines: Vec<_> = content.lines().map(|line| line.to_string()).collect();
            if lines.len() >= expected {
                return lines;
            }
        }

        if Instant::now() >= deadline {
            panic!("Timed out waiting for {expected} lines in {:?}", path);
        }

        thread::sleep(Duration::from_millis(100));
    }
}

pub fn read_pid(path: &Path) -> u32 {
    fs::read_to_string(path)
        .expect("failed to read pid file")
        .trim()
        .parse()
        .expect("pid file is not numeric")
}

/// Alive and not a zombie.
pub fn is_process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system
        .process(Pid::from_u32(pid))
        .is_some_and(|process| process.status() != sysinfo::ProcessStatus::Zombie)
}

pub fn wait_for_process_exit(pid: u32) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if !is_process_alive(pid) {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("Timed out waiting for PID {} to exit", pid);
}
