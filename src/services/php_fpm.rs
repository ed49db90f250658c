//! PHP-FPM, one supervised instance per bundled PHP version.
use std::{fs, path::PathBuf, sync::OnceLock};

use nix::sys::signal::Signal;
use regex::Regex;
use tracing::{debug, info};

use crate::constants::{DEFAULT_PHP_SENTINEL, PHP_FPM_ID_PREFIX};
use crate::error::ServiceError;
use crate::paths::{Layout, php_fpm_id};
use crate::process::{ProcessStatus, StartOptions, StartOutcome, StopOutcome};
use crate::services::{
    ServiceContext, confirm_running, ensure_dir, ensure_executable, library_env,
    remove_stale_socket, write_atomic, write_if_absent,
};

const SERVICE: &str = "PHP-FPM";

static VERSION_DIR: OnceLock<Regex> = OnceLock::new();

fn version_dir() -> &'static Regex {
    VERSION_DIR.get_or_init(|| Regex::new(r"^\d+\.\d+$").expect("static regex"))
}

/// Paths of one PHP version. Every field is derived from the version alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhpRuntime {
    pub version: String,
    pub fpm_binary: PathBuf,
    pub socket_path: PathBuf,
    pub pid_file: PathBuf,
    pub config_dir: PathBuf,
    pub log_path: PathBuf,
}

impl PhpRuntime {
    pub fn resolve(layout: &Layout, version: &str) -> Self {
        Self {
            version: version.to_string(),
            fpm_binary: layout.php_fpm_binary(version),
            socket_path: layout.php_socket(version),
            pid_file: layout.php_pid_file(version),
            config_dir: layout.php_config_dir(version),
            log_path: layout.php_error_log(version),
        }
    }

    pub fn id(&self) -> String {
        php_fpm_id(&self.version)
    }
}

pub struct PhpFpm {
    ctx: ServiceContext,
}

impl PhpFpm {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub fn runtime(&self, version: &str) -> PhpRuntime {
        PhpRuntime::resolve(&self.ctx.layout, version)
    }

    /// Bundled versions that ship an FPM binary, oldest first.
    pub fn detected_versions(&self) -> Vec<String> {
        let dir = self.ctx.layout.php_bundles_dir();
        let Ok(entries) = fs::read_dir(&dir) else {
            debug!("No PHP bundles at {}", dir.display());
            return Vec::new();
        };

        let pattern = version_dir();
        let mut versions: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| pattern.is_match(name))
            .filter(|name| self.ctx.layout.php_fpm_binary(name).is_file())
            .collect();
        versions.sort_by_key(|version| version_key(version));
        versions
    }

    /// Highest detected version.
    pub fn default_version(&self) -> Option<String> {
        self.detected_versions().pop()
    }

    /// Resolves the "default" sentinel; explicit versions pass through unchanged.
    pub fn resolve_version(&self, requested: &str) -> Option<String> {
        let requested = requested.trim();
        if requested.is_empty() || requested == DEFAULT_PHP_SENTINEL {
            self.default_version()
        } else {
            Some(requested.to_string())
        }
    }

    /// Versions with a supervisor entry in this session.
    pub fn tracked_versions(&self) -> Vec<String> {
        self.ctx
            .supervisor
            .tracked_ids()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|id| id.strip_prefix(PHP_FPM_ID_PREFIX).map(str::to_string))
            .collect()
    }

    /// The FPM config and pool are rewritten every time so the socket and PID paths
    /// always match the layout; php.ini is seeded once and then left to the user.
    pub fn ensure_config(&self, version: &str) -> Result<(), ServiceError> {
        let layout = &self.ctx.layout;
        ensure_dir(SERVICE, &layout.php_pool_dir(version))?;
        ensure_dir(SERVICE, &layout.php_ini_scan_dir(version))?;
        ensure_dir(SERVICE, layout.run_dir())?;
        ensure_dir(SERVICE, layout.log_dir())?;

        write_atomic(
            SERVICE,
            &layout.php_fpm_config(version),
            &self.render_fpm_config(version),
        )?;
        write_atomic(
            SERVICE,
            &layout.php_pool_config(version),
            &self.render_pool_config(version),
        )?;
        if write_if_absent(SERVICE, &layout.php_ini(version), &self.render_php_ini(version))? {
            info!("Created php.ini for PHP {version}");
        }
        Ok(())
    }

    fn render_fpm_config(&self, version: &str) -> String {
        let layout = &self.ctx.layout;
        format!(
            "; Managed by devhost; rewritten on every start.\n\
             [global]\n\
             pid = {pid}\n\
             error_log = {log}\n\
             daemonize = no\n\
             \n\
             include = {pool_dir}/*.conf\n",
            pid = layout.php_pid_file(version).display(),
            log = layout.php_error_log(version).display(),
            pool_dir = layout.php_pool_dir(version).display(),
        )
    }

    fn render_pool_config(&self, version: &str) -> String {
        format!(
            "; Managed by devhost; rewritten on every start.\n\
             [www]\n\
             listen = {socket}\n\
             listen.mode = 0660\n\
             pm = dynamic\n\
             pm.max_children = 10\n\
             pm.start_servers = 2\n\
             pm.min_spare_servers = 1\n\
             pm.max_spare_servers = 4\n\
             catch_workers_output = yes\n\
             clear_env = no\n",
            socket = self.ctx.layout.php_socket(version).display(),
        )
    }

    fn render_php_ini(&self, version: &str) -> String {
        let php = &self.ctx.settings.php;
        format!(
            "; Created by devhost. Edit freely; this file is not regenerated.\n\
             memory_limit = {memory}\n\
             upload_max_filesize = {upload}\n\
             post_max_size = {upload}\n\
             max_execution_time = 300\n\
             display_errors = On\n\
             error_reporting = E_ALL\n\
             date.timezone = UTC\n\
             extension_dir = \"{extensions}\"\n",
            memory = php.memory_limit,
            upload = php.upload_max_filesize,
            extensions = self.ctx.layout.php_extension_dir(version).display(),
        )
    }

    pub fn start(&self, version: &str) -> Result<StartOutcome, ServiceError> {
        let layout = &self.ctx.layout;
        let runtime = self.runtime(version);
        if !runtime.fpm_binary.exists() {
            return Err(ServiceError::PhpVersionMissing {
                version: version.to_string(),
            });
        }
        ensure_executable(SERVICE, &runtime.fpm_binary)?;
        self.ensure_config(version)?;

        let command = vec![
            runtime.fpm_binary.display().to_string(),
            "--nodaemonize".to_string(),
            "--fpm-config".to_string(),
            layout.php_fpm_config(version).display().to_string(),
            "-c".to_string(),
            layout.php_ini(version).display().to_string(),
        ];

        let mut options = StartOptions::default()
            .with_pid_file(&runtime.pid_file)
            .with_log_file(layout.process_log(&runtime.id()))
            .with_env("PHPRC", runtime.config_dir.display().to_string())
            .with_env(
                "PHP_INI_SCAN_DIR",
                layout.php_ini_scan_dir(version).display().to_string(),
            );
        if let Some((key, value)) = library_env(&layout.php_lib_dir(version)) {
            options = options.with_env(key, value);
        }

        let id = runtime.id();
        let outcome = self.ctx.supervisor.start(&id, &command, options)?;
        if let StartOutcome::Spawned { .. } = outcome {
            confirm_running(
                &self.ctx.supervisor,
                &id,
                &format!("{SERVICE} {version}"),
                self.ctx.settings.timing.php_settle,
                &[runtime.log_path.clone(), layout.process_log(&id)],
            )?;
        }
        Ok(outcome)
    }

    pub fn stop(&self, version: &str) -> Result<StopOutcome, ServiceError> {
        let runtime = self.runtime(version);
        let outcome = self.ctx.supervisor.stop(
            &runtime.id(),
            Signal::SIGTERM,
            self.ctx.settings.timing.stop_timeout,
        )?;
        remove_stale_socket(&runtime.socket_path);
        Ok(outcome)
    }

    pub fn status(&self, version: &str) -> Result<ProcessStatus, ServiceError> {
        Ok(self.ctx.supervisor.status(&php_fpm_id(version))?)
    }
}

fn version_key(version: &str) -> Vec<u32> {
    version
        .split('.')
        .map(|part| part.parse().unwrap_or(0))
        .collect()
}
