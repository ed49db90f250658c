#[path = "common/mod.rs"]
mod common;

use std::{fs, path::Path};

use assert_cmd::Command;
use common::{install_fake_stack, test_settings_yaml};
use devhost::paths::Layout;
use predicates::boolean::PredicateBooleanExt;
use predicates::str::contains;
use tempfile::tempdir;

fn devhost(root: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("devhost"));
    cmd.arg("--root").arg(root).env("RUST_LOG", "off");
    cmd
}

fn write_settings(root: &Path) {
    let layout = Layout::rooted(root);
    fs::create_dir_all(layout.config_root()).unwrap();
    fs::write(layout.settings_file(), test_settings_yaml()).unwrap();
}

#[test]
fn status_lists_every_service_as_stopped() {
    let temp = tempdir().expect("failed to create tempdir");
    devhost(temp.path())
        .arg("status")
        .assert()
        .success()
        .stdout(contains("Service statuses:"))
        .stdout(contains("● Nginx - Not running"))
        .stdout(contains("● MinIO - Not running"));
}

#[test]
fn link_then_list_sites() {
    let temp = tempdir().expect("failed to create tempdir");
    let root = temp.path().join("devhost");
    let site = temp.path().join("Blog");
    fs::create_dir_all(&site).unwrap();

    devhost(&root)
        .args(["link", site.to_str().unwrap(), "--php", "8.2", "--https"])
        .assert()
        .success()
        .stdout(contains("as blog.test"));

    devhost(&root)
        .arg("sites")
        .assert()
        .success()
        .stdout(contains("https://blog.test  PHP 8.2"));

    devhost(&root)
        .args(["link", site.to_str().unwrap(), "--domain", "blog.local"])
        .assert()
        .failure()
        .stderr(contains("must be a valid hostname ending in '.test'"));

    devhost(&root)
        .args(["unlink", site.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("(blog.test)"));

    devhost(&root)
        .arg("sites")
        .assert()
        .success()
        .stdout(contains("No sites linked."));
}

#[test]
fn install_and_down_with_fake_binaries() {
    let temp = tempdir().expect("failed to create tempdir");
    let root = temp.path().join("devhost");
    write_settings(&root);
    install_fake_stack(&Layout::rooted(&root), &["8.3"], &temp.path().join("events"));

    let site = temp.path().join("blog");
    fs::create_dir_all(site.join("public")).unwrap();

    devhost(&root)
        .args(["link", site.to_str().unwrap()])
        .assert()
        .success();
    devhost(&root)
        .args(["install", site.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("Installed http://blog.test (PHP 8.3)"));

    devhost(&root)
        .arg("status")
        .assert()
        .success()
        .stdout(contains("● Nginx Running").and(contains("● PHP-FPM 8.3 Running")));

    devhost(&root)
        .arg("down")
        .assert()
        .success()
        .stdout(contains("Stopped 2 service(s)"));
}

#[test]
fn unknown_task_fails() {
    let temp = tempdir().expect("failed to create tempdir");
    devhost(temp.path())
        .args(["task", "launch_rockets", "count=3"])
        .assert()
        .failure()
        .stdout(contains("Unknown task 'launch_rockets'"));
}

#[test]
fn install_of_unlinked_site_fails() {
    let temp = tempdir().expect("failed to create tempdir");
    let site = temp.path().join("orphan");
    fs::create_dir_all(&site).unwrap();
    devhost(&temp.path().join("devhost"))
        .args(["install", site.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("No site settings found"));
}

#[test]
fn invalid_log_level_is_rejected() {
    let temp = tempdir().expect("failed to create tempdir");
    devhost(temp.path())
        .args(["--log-level", "9", "status"])
        .assert()
        .failure()
        .stderr(contains("expected 0-5"));
}

#[test]
fn php_list_marks_default() {
    let temp = tempdir().expect("failed to create tempdir");
    install_fake_stack(&Layout::rooted(temp.path()), &["8.1", "8.3"], &temp.path().join("events"));
    devhost(temp.path())
        .args(["php", "list"])
        .assert()
        .success()
        .stdout(contains("8.1\n8.3 (default)"));
}
