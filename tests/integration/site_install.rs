#[path = "common/mod.rs"]
mod common;

use std::{fs, os::unix::fs::symlink, path::Path, sync::Arc};

use common::{install_fake_stack, read_pid, test_settings, wait_for_lines};
use devhost::error::{ProcessError, ServiceError, SiteError};
use devhost::paths::Layout;
use devhost::process::{ProcessSupervisor, SupervisorTiming};
use devhost::services::{BundledService, PhpFpm, ProxyControl, ServiceContext};
use devhost::sites::{JsonSiteRegistry, SiteConfig, SiteInstaller, UninstallOutcome};
use devhost::stack::Stack;
use tempfile::tempdir;

struct Sandbox {
    _temp: tempfile::TempDir,
    layout: Layout,
    stack: Stack,
    events: std::path::PathBuf,
    site: std::path::PathBuf,
}

fn sandbox(php_versions: &[&str]) -> Sandbox {
    let temp = tempdir().expect("failed to create tempdir");
    let layout = Layout::rooted(&temp.path().join("devhost"));
    let events = temp.path().join("events");
    install_fake_stack(&layout, php_versions, &events);

    let site = temp.path().join("sites/blog");
    fs::create_dir_all(site.join("public")).unwrap();
    fs::write(site.join("public/index.php"), "<?php echo 'hi';").unwrap();

    let stack = Stack::with_settings(layout.clone(), test_settings()).expect("stack");
    Sandbox {
        _temp: temp,
        layout,
        stack,
        events,
        site,
    }
}

fn link(sandbox: &Sandbox, path: &Path, domain: &str) -> SiteConfig {
    let site = SiteConfig::new(path, domain);
    sandbox.stack.sites().upsert(site.clone()).expect("upsert");
    site
}

#[test]
fn install_starts_php_and_proxy_and_serves_public_dir() {
    let sandbox = sandbox(&["8.3"]);
    link(&sandbox, &sandbox.site, "blog.test");

    let report = sandbox.stack.installer().install(&sandbox.site).expect("install");
    assert_eq!(report.domain, "blog.test");
    assert_eq!(report.php_version, "8.3");
    assert!(!report.https_enabled);
    assert_eq!(report.message(), "Installed http://blog.test (PHP 8.3)");

    let layout = &sandbox.layout;
    let config = fs::read_to_string(layout.site_available_path("blog.test")).unwrap();
    assert!(config.starts_with("# devhost site: blog.test (https: false)"));
    assert!(config.contains("listen 8080;"));
    assert!(config.contains(&format!("root {};", sandbox.site.join("public").display())));
    assert!(config.contains(&format!("fastcgi_pass unix:{};", layout.php_socket("8.3").display())));
    assert_eq!(
        fs::read_link(layout.site_enabled_path("blog.test")).unwrap(),
        layout.site_available_path("blog.test")
    );

    let pool = fs::read_to_string(layout.php_pool_config("8.3")).unwrap();
    assert!(pool.contains(&format!("listen = {}", layout.php_socket("8.3").display())));

    assert!(sandbox.stack.php().status("8.3").unwrap().is_running());
    assert!(sandbox.stack.proxy().status().unwrap().is_running());

    let stop = sandbox.stack.stop_all();
    assert!(stop.is_success(), "{}", stop.summary());
}

#[test]
fn second_install_reloads_running_proxy() {
    let sandbox = sandbox(&["8.3"]);
    link(&sandbox, &sandbox.site, "blog.test");
    sandbox.stack.installer().install(&sandbox.site).expect("first install");
    let proxy_pid = read_pid(&sandbox.layout.proxy_pid_file());

    sandbox.stack.installer().install(&sandbox.site).expect("second install");
    assert_eq!(wait_for_lines(&sandbox.events, 1), vec!["HUP"]);
    assert_eq!(read_pid(&sandbox.layout.proxy_pid_file()), proxy_pid);

    sandbox.stack.stop_all();
}

#[test]
fn https_falls_back_to_http_until_certificates_exist() {
    let sandbox = sandbox(&["8.3"]);
    let site = SiteConfig::new(&sandbox.site, "blog.test").with_https(true);
    sandbox.stack.sites().upsert(site).unwrap();

    let report = sandbox.stack.installer().install(&sandbox.site).unwrap();
    assert!(!report.https_enabled);
    let config = fs::read_to_string(&report.config_path).unwrap();
    assert!(!config.contains("return 301"));
    assert!(!config.contains("ssl_certificate"));

    let layout = &sandbox.layout;
    fs::create_dir_all(layout.certificate_dir()).unwrap();
    fs::write(layout.certificate_path("blog.test"), "cert").unwrap();
    fs::write(layout.certificate_key_path("blog.test"), "key").unwrap();

    let report = sandbox.stack.installer().install(&sandbox.site).unwrap();
    assert!(report.https_enabled);
    let config = fs::read_to_string(&report.config_path).unwrap();
    assert!(config.starts_with("# devhost site: blog.test (https: true)"));
    assert!(config.contains("return 301 https://$host:8443$request_uri;"));
    assert!(config.contains("listen 8443 ssl;"));
    assert!(config.contains(&format!(
        "ssl_certificate {};",
        layout.certificate_path("blog.test").display()
    )));

    sandbox.stack.stop_all();
}

#[test]
fn regular_file_in_enabled_dir_is_replaced_by_symlink() {
    let sandbox = sandbox(&["8.3"]);
    link(&sandbox, &sandbox.site, "blog.test");

    let enabled = sandbox.layout.site_enabled_path("blog.test");
    fs::create_dir_all(enabled.parent().unwrap()).unwrap();
    fs::write(&enabled, "server { listen 1; }").unwrap();

    sandbox.stack.installer().install(&sandbox.site).unwrap();
    let metadata = fs::symlink_metadata(&enabled).unwrap();
    assert!(metadata.file_type().is_symlink());

    sandbox.stack.stop_all();
}

#[test]
fn install_without_settings_fails_before_touching_disk() {
    let sandbox = sandbox(&["8.3"]);
    let err = sandbox.stack.installer().install(&sandbox.site).unwrap_err();
    assert!(matches!(err, SiteError::SettingsMissing(_)));
    assert!(!err.is_partial());
    assert!(!sandbox.layout.site_available_path("blog.test").exists());
    assert!(!sandbox.stack.proxy().status().unwrap().is_running());
}

#[test]
fn install_without_php_runtime_fails() {
    let sandbox = sandbox(&[]);
    link(&sandbox, &sandbox.site, "blog.test");
    let err = sandbox.stack.installer().install(&sandbox.site).unwrap_err();
    assert!(matches!(err, SiteError::NoPhpVersion));
}

#[test]
fn broken_proxy_is_reported_as_partial_install() {
    let sandbox = sandbox(&["8.3"]);
    common::fake_binary(
        &sandbox.layout.proxy_binary(),
        "echo 'nginx: [emerg] unknown directive' >&2\nexit 1",
    );
    link(&sandbox, &sandbox.site, "blog.test");

    let err = sandbox.stack.installer().install(&sandbox.site).unwrap_err();
    assert!(matches!(err, SiteError::ReloadFailed { .. }), "{err}");
    assert!(err.is_partial());
    assert!(sandbox.layout.site_available_path("blog.test").exists());

    sandbox.stack.stop_all();
}

#[test]
fn uninstall_only_reloads_a_running_proxy() {
    let sandbox = sandbox(&["8.3"]);
    link(&sandbox, &sandbox.site, "blog.test");
    sandbox.stack.installer().install(&sandbox.site).unwrap();

    sandbox.stack.proxy().stop().unwrap();
    let outcome = sandbox.stack.installer().uninstall(&sandbox.site).unwrap();
    assert_eq!(
        outcome,
        UninstallOutcome::Removed {
            domain: "blog.test".into()
        }
    );
    assert!(!sandbox.stack.proxy().status().unwrap().is_running());
    assert!(!sandbox.layout.site_available_path("blog.test").exists());
    assert!(fs::symlink_metadata(sandbox.layout.site_enabled_path("blog.test")).is_err());

    let again = sandbox.stack.installer().uninstall(&sandbox.site).unwrap();
    assert!(matches!(again, UninstallOutcome::NothingToRemove { .. }));

    sandbox.stack.stop_all();
}

#[test]
fn uninstall_reloads_running_proxy_and_guesses_domain_without_settings() {
    let sandbox = sandbox(&["8.3"]);
    link(&sandbox, &sandbox.site, "blog.test");
    sandbox.stack.installer().install(&sandbox.site).unwrap();
    sandbox.stack.sites().remove(&sandbox.site).unwrap();

    let outcome = sandbox.stack.installer().uninstall(&sandbox.site).unwrap();
    assert_eq!(outcome.message(), "Uninstalled blog.test");
    assert_eq!(wait_for_lines(&sandbox.events, 1), vec!["HUP"]);
    assert!(sandbox.stack.proxy().status().unwrap().is_running());

    sandbox.stack.stop_all();
}

#[test]
fn dangling_enabled_link_is_removed_on_uninstall() {
    let sandbox = sandbox(&["8.3"]);
    let enabled = sandbox.layout.site_enabled_path("blog.test");
    fs::create_dir_all(enabled.parent().unwrap()).unwrap();
    symlink(sandbox.layout.site_available_path("blog.test"), &enabled).unwrap();

    let outcome = sandbox.stack.installer().uninstall(&sandbox.site).unwrap();
    assert!(matches!(outcome, UninstallOutcome::Removed { .. }));
    assert!(fs::symlink_metadata(&enabled).is_err());
}

/// Reports a running proxy that refuses the reload signal.
struct SignalRefusingProxy;

impl ProxyControl for SignalRefusingProxy {
    fn ensure_structure(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    fn is_running(&self) -> bool {
        true
    }

    fn reload(&self) -> Result<i32, ServiceError> {
        Err(ProcessError::PermissionDenied {
            id: "internal-proxy".into(),
            pid: 4242,
        }
        .into())
    }

    fn apply_config(&self) -> Result<(), ServiceError> {
        self.reload().map(|_| ())
    }
}

fn installer_with_proxy(sandbox: &Sandbox, proxy: Arc<dyn ProxyControl>) -> SiteInstaller {
    let layout = Arc::new(sandbox.layout.clone());
    let settings = Arc::new(test_settings());
    let supervisor = Arc::new(ProcessSupervisor::new(
        sandbox.layout.clone(),
        SupervisorTiming::from(&settings.timing),
    ));
    let ctx = ServiceContext::new(layout.clone(), settings.clone(), supervisor);
    SiteInstaller::new(
        layout.clone(),
        settings,
        Arc::new(JsonSiteRegistry::new(layout.sites_file(), "test")),
        Arc::new(PhpFpm::new(ctx)),
        proxy,
    )
}

#[test]
fn uninstall_succeeds_with_warning_when_running_proxy_cannot_reload() {
    let sandbox = sandbox(&["8.3"]);
    link(&sandbox, &sandbox.site, "blog.test");
    sandbox.stack.installer().install(&sandbox.site).unwrap();

    let installer = installer_with_proxy(&sandbox, Arc::new(SignalRefusingProxy));
    let outcome = installer.uninstall(&sandbox.site).expect("uninstall is not a failure");
    match &outcome {
        UninstallOutcome::RemovedReloadFailed { domain, warning } => {
            assert_eq!(domain, "blog.test");
            assert!(warning.contains("Permission denied"), "{warning}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(outcome.message().starts_with("Uninstalled blog.test, but reverse proxy reload failed"));
    assert!(!sandbox.layout.site_available_path("blog.test").exists());
    assert!(fs::symlink_metadata(sandbox.layout.site_enabled_path("blog.test")).is_err());

    // The same failure on install is a partial failure, not a success.
    link(&sandbox, &sandbox.site, "blog.test");
    let err = installer.install(&sandbox.site).unwrap_err();
    assert!(matches!(err, SiteError::ReloadFailed { .. }));
    assert!(err.is_partial());
    assert!(sandbox.layout.site_available_path("blog.test").exists());

    sandbox.stack.stop_all();
}
