#[path = "common/mod.rs"]
mod common;

use std::{fs, sync::Arc, time::Duration};

use common::{fake_binary, install_fake_stack, test_settings};
use devhost::config::{HelperSettings, Settings};
use devhost::paths::Layout;
use devhost::sites::SiteConfig;
use devhost::stack::Stack;
use devhost::tasks::{TaskRequest, TaskWorker, execute};
use tempfile::tempdir;

#[test]
fn install_and_uninstall_site_through_worker() {
    let temp = tempdir().expect("failed to create tempdir");
    let layout = Layout::rooted(&temp.path().join("devhost"));
    install_fake_stack(&layout, &["8.3"], &temp.path().join("events"));

    let site = temp.path().join("shop");
    fs::create_dir_all(&site).unwrap();
    let stack = Arc::new(Stack::with_settings(layout.clone(), test_settings()).unwrap());
    stack
        .sites()
        .upsert(SiteConfig::new(&site, "shop.test"))
        .unwrap();

    let worker = TaskWorker::spawn(stack.clone());
    let path = site.display().to_string();
    worker
        .submit(TaskRequest::new("install_site").with("path", &path))
        .unwrap();
    worker
        .submit(TaskRequest::new("uninstall_site").with("path", &path))
        .unwrap();
    worker.submit(TaskRequest::new("stop_all")).unwrap();

    let install = worker.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(install.name, "install_site");
    assert!(install.success, "{}", install.message);
    assert_eq!(install.message, "Installed http://shop.test (PHP 8.3)");
    assert_eq!(install.payload.get("path"), Some(&path));

    let uninstall = worker.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(uninstall.success, "{}", uninstall.message);
    assert_eq!(uninstall.message, "Uninstalled shop.test");

    let stop = worker.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(stop.success, "{}", stop.message);
    assert!(!layout.site_available_path("shop.test").exists());
}

#[test]
fn reload_without_proxy_is_a_failed_result() {
    let temp = tempdir().expect("failed to create tempdir");
    let stack = Stack::with_settings(Layout::rooted(temp.path()), test_settings()).unwrap();

    let result = execute(&stack, &TaskRequest::new("reload_internal_proxy"));
    assert!(!result.success);
    assert!(result.message.contains("not running"), "{}", result.message);
}

#[test]
fn helper_tasks_report_confirmation_and_declines() {
    let temp = tempdir().expect("failed to create tempdir");
    let helper = temp.path().join("helper");
    fake_binary(
        &helper,
        r#"if [ "$2" = "add_host_entry" ]; then echo "Added $4 -> $6"; exit 0; fi
exit 127"#,
    );

    let settings = Settings {
        helper: HelperSettings {
            program: vec![helper.display().to_string()],
        },
        ..test_settings()
    };
    let stack = Stack::with_settings(Layout::rooted(temp.path()), settings).unwrap();

    let added = execute(
        &stack,
        &TaskRequest::new("add_host_entry")
            .with("domain", "blog.test")
            .with("ip", "127.0.0.1"),
    );
    assert!(added.success, "{}", added.message);
    assert_eq!(added.message, "Added blog.test -> 127.0.0.1");

    let declined = execute(
        &stack,
        &TaskRequest::new("control_system_service")
            .with("action", "restart")
            .with("service", "nginx"),
    );
    assert!(!declined.success);
    assert_eq!(declined.message, "Authentication failed or cancelled");

    let refused = execute(
        &stack,
        &TaskRequest::new("control_system_service")
            .with("action", "stop")
            .with("service", "sshd"),
    );
    assert!(!refused.success);
    assert_eq!(refused.message, "System service 'sshd' is not allowed");
}

#[test]
fn certificate_tasks_use_private_ca_root() {
    let temp = tempdir().expect("failed to create tempdir");
    let layout = Layout::rooted(temp.path());
    fake_binary(
        &layout.certificate_tool(),
        r#"[ -n "$CAROOT" ] || exit 3
echo cert > "$2"
echo key > "$4""#,
    );
    let stack = Stack::with_settings(layout.clone(), test_settings()).unwrap();

    let generated = execute(
        &stack,
        &TaskRequest::new("generate_certificate").with("domain", "blog.test"),
    );
    assert!(generated.success, "{}", generated.message);
    assert!(stack.certificates().exists("blog.test"));

    let removed = execute(
        &stack,
        &TaskRequest::new("remove_certificate").with("domain", "blog.test"),
    );
    assert_eq!(removed.message, "Removed certificate for blog.test");
    assert!(!layout.certificate_path("blog.test").exists());
}
