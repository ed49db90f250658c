#[path = "common/mod.rs"]
mod common;

use std::fs;

use common::{
    daemon_script, fake_binary, install_fake_stack, is_process_alive, read_pid, test_settings,
    wait_for_lines, wait_for_process_exit,
};
use devhost::error::ServiceError;
use devhost::paths::Layout;
use devhost::process::{ProcessStatus, StartOutcome, StopOutcome};
use devhost::stack::{ServiceKind, Stack};
use devhost::status::ServiceState;
use tempfile::tempdir;

fn open_stack(root: &std::path::Path) -> (Layout, Stack) {
    let layout = Layout::rooted(root);
    let stack = Stack::with_settings(layout.clone(), test_settings()).expect("stack");
    (layout, stack)
}

#[test]
fn dns_resolver_lifecycle() {
    let temp = tempdir().expect("failed to create tempdir");
    let (layout, stack) = open_stack(temp.path());
    fake_binary(
        &layout.dns_binary(),
        &daemon_script(&layout.dns_pid_file(), &temp.path().join("events")),
    );

    let dns = stack.service(ServiceKind::Dns);
    let outcome = dns.start().expect("dns start");
    assert!(matches!(outcome, StartOutcome::Spawned { .. }));

    let config = fs::read_to_string(layout.dns_config()).unwrap();
    assert!(config.contains("port=5353"));
    assert!(config.contains("address=/.test/127.0.0.1"));

    let pid = read_pid(&layout.dns_pid_file());
    assert_eq!(dns.status().unwrap(), ProcessStatus::Running { pid: pid as i32 });
    assert!(matches!(dns.start().unwrap(), StartOutcome::AlreadyRunning { .. }));

    assert_eq!(dns.stop().unwrap(), StopOutcome::Stopped);
    wait_for_process_exit(pid);
    assert_eq!(dns.status().unwrap(), ProcessStatus::Stopped);
}

#[test]
fn database_initializes_data_directory_once() {
    let temp = tempdir().expect("failed to create tempdir");
    let (layout, stack) = open_stack(temp.path());
    let init_marker = temp.path().join("init-runs");
    fake_binary(
        &layout.database_binary(),
        &format!(
            r#"if [ "$2" = "--initialize-insecure" ]; then
  echo init >> "{marker}"
  mkdir -p "{data}/mysql"
  exit 0
fi
{daemon}"#,
            marker = init_marker.display(),
            data = layout.database_data_dir().display(),
            daemon = daemon_script(&layout.database_pid_file(), &temp.path().join("events")),
        ),
    );

    let database = stack.service(ServiceKind::Mysql);
    database.start().expect("database start");
    assert_eq!(wait_for_lines(&init_marker, 1), vec!["init"]);
    assert!(layout.database_data_dir().join("mysql").is_dir());
    assert!(
        fs::read_to_string(layout.database_config())
            .unwrap()
            .contains(&format!("socket={}", layout.database_socket().display()))
    );

    assert_eq!(database.stop().unwrap(), StopOutcome::Stopped);
    database.start().expect("second start");
    assert_eq!(fs::read_to_string(&init_marker).unwrap().lines().count(), 1);
    database.stop().unwrap();
}

#[test]
fn failed_database_init_leaves_no_data_directory() {
    let temp = tempdir().expect("failed to create tempdir");
    let (layout, stack) = open_stack(temp.path());
    fake_binary(
        &layout.database_binary(),
        &format!(
            "touch \"{}/partial\"\necho 'mysqld: Can not create directory' >&2\nexit 1",
            layout.database_data_dir().display()
        ),
    );

    let err = stack.service(ServiceKind::Mysql).start().unwrap_err();
    assert!(matches!(err, ServiceError::DataDirInit { .. }), "{err}");
    assert!(!layout.database_data_dir().exists());
    assert_eq!(
        stack.service(ServiceKind::Mysql).status().unwrap(),
        ProcessStatus::Stopped
    );
}

#[test]
fn object_store_is_tracked_by_handle_with_credentials() {
    let temp = tempdir().expect("failed to create tempdir");
    let (layout, stack) = open_stack(temp.path());
    let env_dump = temp.path().join("minio-env");
    fake_binary(
        &layout.object_store_binary(),
        &format!(
            "echo \"$MINIO_ROOT_USER:$MINIO_CONFIG_DIR\" > \"{}\"\nwhile true; do sleep 0.1; done",
            env_dump.display()
        ),
    );

    let store = stack.service(ServiceKind::Minio);
    let pid = store.start().expect("minio start").pid() as u32;
    let line = wait_for_lines(&env_dump, 1).remove(0);
    assert_eq!(
        line,
        format!(
            "{}:{}",
            stack.settings().object_store.root_user,
            layout.object_store_config_dir().display()
        )
    );

    assert!(is_process_alive(pid));
    assert_eq!(read_pid(&layout.object_store_pid_file()), pid);
    assert_eq!(store.stop().unwrap(), StopOutcome::Stopped);
    assert!(!is_process_alive(pid));
    assert!(!layout.object_store_pid_file().exists());
}

#[test]
fn object_store_is_found_again_after_the_stack_is_reopened() {
    let temp = tempdir().expect("failed to create tempdir");
    let layout = Layout::rooted(temp.path());
    fake_binary(
        &layout.object_store_binary(),
        "while true; do sleep 0.1; done",
    );

    let pid = {
        let (_, stack) = open_stack(temp.path());
        let outcome = stack.service(ServiceKind::Minio).start().expect("minio start");
        assert!(matches!(outcome, StartOutcome::Spawned { .. }));
        outcome.pid()
    };
    assert!(is_process_alive(pid as u32));

    {
        let (_, stack) = open_stack(temp.path());
        let store = stack.service(ServiceKind::Minio);
        assert_eq!(store.status().unwrap(), ProcessStatus::Running { pid });
        assert_eq!(
            store.start().expect("second start"),
            StartOutcome::Adopted { pid }
        );
        let snapshot = stack
            .status_report()
            .into_iter()
            .find(|snapshot| snapshot.id == "internal-minio")
            .unwrap();
        assert!(snapshot.is_running());
    }

    {
        let (_, stack) = open_stack(temp.path());
        assert_eq!(
            stack.service(ServiceKind::Minio).stop().unwrap(),
            StopOutcome::Stopped
        );
        wait_for_process_exit(pid as u32);
        assert!(!layout.object_store_pid_file().exists());
    }

    let (_, stack) = open_stack(temp.path());
    let restarted = stack.service(ServiceKind::Minio).start().expect("restart");
    assert!(matches!(restarted, StartOutcome::Spawned { .. }));
    assert_ne!(restarted.pid(), pid);
    drop(stack);

    let (_, stack) = open_stack(temp.path());
    let report = stack.stop_all();
    assert!(report.is_success(), "{}", report.summary());
    assert_eq!(report.summary(), "Stopped 1 service(s)");
    wait_for_process_exit(restarted.pid() as u32);
}

#[test]
fn php_fpm_versions_run_side_by_side() {
    let temp = tempdir().expect("failed to create tempdir");
    let (layout, stack) = open_stack(temp.path());
    install_fake_stack(&layout, &["8.2", "8.3"], &temp.path().join("events"));

    assert_eq!(stack.php().detected_versions(), vec!["8.2", "8.3"]);
    assert_eq!(stack.php().default_version().as_deref(), Some("8.3"));

    stack.php().start("8.2").expect("start 8.2");
    stack.php().start("8.3").expect("start 8.3");
    let pool = fs::read_to_string(layout.php_pool_config("8.2")).unwrap();
    assert!(pool.contains(&layout.php_socket("8.2").display().to_string()));

    let report = stack.status_report();
    let running: Vec<&str> = report
        .iter()
        .filter(|snapshot| snapshot.is_running())
        .map(|snapshot| snapshot.id.as_str())
        .collect();
    assert_eq!(running, vec!["php-fpm-8.2", "php-fpm-8.3"]);

    let stop = stack.stop_all();
    assert!(stop.is_success(), "{}", stop.summary());
    assert_eq!(stop.summary(), "Stopped 2 service(s)");
    assert!(
        stack
            .status_report()
            .iter()
            .all(|snapshot| snapshot.state == ServiceState::Stopped)
    );
}

#[test]
fn missing_php_version_is_reported() {
    let temp = tempdir().expect("failed to create tempdir");
    let (_layout, stack) = open_stack(temp.path());
    assert!(matches!(
        stack.php().start("7.4"),
        Err(ServiceError::PhpVersionMissing { version }) if version == "7.4"
    ));
}
