#[path = "common/mod.rs"]
mod common;

use std::{
    fs,
    path::Path,
    process::Command,
    thread,
    time::{Duration, Instant},
};

use common::{
    daemon_script, fake_binary, is_process_alive, read_pid, wait_for_path,
    wait_for_process_exit,
};
use devhost::error::ProcessError;
use devhost::paths::Layout;
use devhost::process::{
    ProcessStatus, ProcessSupervisor, StartOptions, StartOutcome, StopOutcome, StopRequest,
    SupervisorTiming,
};
use nix::sys::signal::Signal;
use tempfile::tempdir;

fn supervisor(root: &Path) -> ProcessSupervisor {
    ProcessSupervisor::new(
        Layout::rooted(root),
        SupervisorTiming {
            poll_interval: Duration::from_millis(50),
            launch_check: Duration::from_millis(100),
            stop_timeout: Duration::from_secs(2),
            kill_grace: Duration::from_secs(1),
        },
    )
}

fn argv(script: &Path) -> Vec<String> {
    vec![script.display().to_string()]
}

#[test]
fn start_twice_reports_already_running() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let pid_file = dir.join("run/worker.pid");
    let script = dir.join("bin/worker");
    fake_binary(&script, &daemon_script(&pid_file, &dir.join("events")));

    let supervisor = supervisor(dir);
    let options = StartOptions::default().with_pid_file(&pid_file);
    let first = supervisor
        .start("worker", &argv(&script), options.clone())
        .expect("first start failed");
    assert!(matches!(first, StartOutcome::Spawned { .. }));
    wait_for_path(&pid_file);

    let second = supervisor
        .start("worker", &argv(&script), options)
        .expect("second start failed");
    assert!(matches!(second, StartOutcome::AlreadyRunning { .. }));

    let pid = read_pid(&pid_file);
    assert_eq!(supervisor.status("worker").unwrap(), ProcessStatus::Running { pid: pid as i32 });

    assert_eq!(
        supervisor.stop("worker", Signal::SIGTERM, Duration::from_secs(2)).unwrap(),
        StopOutcome::Stopped
    );
    wait_for_process_exit(pid);
    assert_eq!(
        supervisor.stop("worker", Signal::SIGTERM, Duration::from_secs(2)).unwrap(),
        StopOutcome::AlreadyStopped
    );
    assert_eq!(supervisor.status("worker").unwrap(), ProcessStatus::Stopped);
}

#[test]
fn live_process_from_previous_session_is_adopted() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let layout = Layout::rooted(dir);
    let pid_file = layout.dns_pid_file();
    fs::create_dir_all(pid_file.parent().unwrap()).unwrap();

    let mut orphan = Command::new("sleep").arg("30").spawn().expect("spawn sleep");
    fs::write(&pid_file, orphan.id().to_string()).unwrap();

    let supervisor = supervisor(dir);
    assert_eq!(
        supervisor.status("internal-dns").unwrap(),
        ProcessStatus::Running { pid: orphan.id() as i32 }
    );

    let outcome = supervisor
        .start(
            "internal-dns",
            &["/bin/false".to_string()],
            StartOptions::default().with_pid_file(&pid_file),
        )
        .expect("adopt failed");
    assert_eq!(outcome, StartOutcome::Adopted { pid: orphan.id() as i32 });
    assert_eq!(supervisor.tracked_ids().unwrap(), vec!["internal-dns".to_string()]);

    let stopped = supervisor
        .stop("internal-dns", Signal::SIGTERM, Duration::from_secs(2))
        .unwrap();
    assert_eq!(stopped, StopOutcome::Stopped);
    let _ = orphan.wait();
}

#[test]
fn stale_pid_file_is_replaced_on_start() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let pid_file = dir.join("run/worker.pid");
    fs::create_dir_all(pid_file.parent().unwrap()).unwrap();
    fs::write(&pid_file, "999999").unwrap();

    let script = dir.join("bin/worker");
    fake_binary(&script, &daemon_script(&pid_file, &dir.join("events")));

    let supervisor = supervisor(dir);
    let outcome = supervisor
        .start(
            "worker",
            &argv(&script),
            StartOptions::default().with_pid_file(&pid_file),
        )
        .expect("start failed");
    assert!(matches!(outcome, StartOutcome::Spawned { .. }));

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let current = fs::read_to_string(&pid_file).unwrap_or_default();
        if let Ok(pid) = current.trim().parse::<u32>()
            && pid != 999_999
        {
            assert!(is_process_alive(pid));
            break;
        }
        assert!(Instant::now() < deadline, "PID file never rewritten");
        thread::sleep(Duration::from_millis(50));
    }

    let report = supervisor.stop_all(&[]);
    assert!(report.is_success(), "{}", report.summary());
}

#[test]
fn stop_of_untracked_id_cleans_stale_pid_file() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let layout = Layout::rooted(dir);
    let pid_file = layout.php_pid_file("8.3");
    fs::create_dir_all(pid_file.parent().unwrap()).unwrap();
    fs::write(&pid_file, "999999").unwrap();

    let supervisor = supervisor(dir);
    let outcome = supervisor
        .stop("php-fpm-8.3", Signal::SIGTERM, Duration::from_secs(1))
        .expect("stop failed");
    assert_eq!(outcome, StopOutcome::AlreadyStopped);
    assert!(!pid_file.exists());
}

#[test]
fn stop_escalates_to_kill_after_timeout() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let script = dir.join("bin/stubborn");
    fake_binary(&script, "trap '' TERM\nwhile true; do sleep 0.1; done");

    let supervisor = supervisor(dir);
    let outcome = supervisor
        .start("stubborn", &argv(&script), StartOptions::default())
        .expect("start failed");
    let pid = outcome.pid() as u32;

    let timeout = Duration::from_millis(500);
    let started = Instant::now();
    let stopped = supervisor
        .stop("stubborn", Signal::SIGTERM, timeout)
        .expect("stop failed");
    assert_eq!(stopped, StopOutcome::Killed);
    assert!(started.elapsed() >= timeout);
    assert!(!is_process_alive(pid));
}

#[test]
fn immediate_exit_reports_log_tail() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let script = dir.join("bin/crasher");
    fake_binary(
        &script,
        "echo 'bind() to 0.0.0.0:80 failed (98: Address already in use)' >&2\nexit 1",
    );

    let supervisor = supervisor(dir);
    let err = supervisor
        .start(
            "crasher",
            &argv(&script),
            StartOptions::default().with_log_file(dir.join("logs/crasher.log")),
        )
        .unwrap_err();

    match err {
        ProcessError::ExitedImmediately { id, log_tail, .. } => {
            assert_eq!(id, "crasher");
            let tail = log_tail.expect("missing log tail");
            assert!(tail.contains("port already in use"));
            assert!(tail.contains("Address already in use"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(supervisor.tracked_ids().unwrap().is_empty());
}

#[test]
fn stop_all_reports_every_planned_service() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let first = dir.join("bin/first");
    let second = dir.join("bin/second");
    fake_binary(&first, "while true; do sleep 0.1; done");
    fake_binary(&second, "while true; do sleep 0.1; done");

    let supervisor = supervisor(dir);
    supervisor
        .start("first", &argv(&first), StartOptions::default())
        .unwrap();
    supervisor
        .start("second", &argv(&second), StartOptions::default())
        .unwrap();

    let report = supervisor.stop_all(&[StopRequest::new(
        "first",
        Signal::SIGTERM,
        Duration::from_secs(2),
    )]);
    assert!(report.is_success());
    let ids: Vec<&str> = report.stopped.iter().map(|(id, _)| id.as_str()).collect();
    assert!(ids.contains(&"first"));
    assert!(ids.contains(&"second"));
    assert_eq!(report.summary(), "Stopped 2 service(s)");
    assert!(supervisor.tracked_ids().unwrap().is_empty());
}
