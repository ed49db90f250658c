//! Path resolution for every file devhost and its bundled services touch.
//!
//! All paths are pure functions of the layout roots plus a PHP version, a domain or a
//! service id. The PHP-FPM generator and the reverse-proxy renderer both derive socket
//! and PID paths from here, so they cannot disagree.
use std::{
    env,
    path::{Path, PathBuf},
};

use crate::constants::{
    DATABASE_ID, DNS_ID, OBJECT_STORE_ID, PHP_FPM_ID_PREFIX, PROXY_ID,
    SETTINGS_FILE_NAME, SITE_CONFIG_EXTENSION, SITES_FILE_NAME,
};
use crate::error::ConfigError;

/// Root directories from which every other path is derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    config_root: PathBuf,
    data_root: PathBuf,
    bundle_root: PathBuf,
    run_dir: PathBuf,
    log_dir: PathBuf,
}

impl Layout {
    /// User layout under `$HOME`.
    pub fn user() -> Result<Self, ConfigError> {
        let home = env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingHome)?;
        Ok(Self::from_user_home(&home))
    }

    /// Layout rooted at `~/.config/devhost` and `~/.local/share/devhost`.
    pub fn from_user_home(home: &Path) -> Self {
        let data_root = home.join(".local/share/devhost");
        Self {
            config_root: home.join(".config/devhost"),
            bundle_root: data_root.join("bundles"),
            run_dir: data_root.join("run"),
            log_dir: data_root.join("logs"),
            data_root,
        }
    }

    /// Layout with everything below a single directory.
    pub fn rooted(root: &Path) -> Self {
        Self {
            config_root: root.join("config"),
            data_root: root.join("data"),
            bundle_root: root.join("bundles"),
            run_dir: root.join("run"),
            log_dir: root.join("logs"),
        }
    }

    /// User configuration root.
    pub fn config_root(&self) -> &Path {
        &self.config_root
    }

    /// Persistent data root.
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// Where bundled binaries are unpacked.
    pub fn bundle_root(&self) -> &Path {
        &self.bundle_root
    }

    /// Sockets and PID files.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Service logs.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Directories that must exist before any service is launched.
    pub fn base_dirs(&self) -> [&Path; 4] {
        [&self.config_root, &self.data_root, &self.run_dir, &self.log_dir]
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_root.join(SETTINGS_FILE_NAME)
    }

    pub fn sites_file(&self) -> PathBuf {
        self.config_root.join(SITES_FILE_NAME)
    }

    /// Captured stdout/stderr of a supervised process.
    pub fn process_log(&self, id: &str) -> PathBuf {
        self.log_dir.join(format!("{id}.log"))
    }

    /// PID file the supervisor probes for `id` when nothing is tracked in memory.
    pub fn conventional_pid_file(&self, id: &str) -> Option<PathBuf> {
        match id {
            PROXY_ID => Some(self.proxy_pid_file()),
            DNS_ID => Some(self.dns_pid_file()),
            DATABASE_ID => Some(self.database_pid_file()),
            OBJECT_STORE_ID => Some(self.object_store_pid_file()),
            _ => id
                .strip_prefix(PHP_FPM_ID_PREFIX)
                .filter(|version| !version.is_empty())
                .map(|version| self.php_pid_file(version)),
        }
    }

    // ------------------------------------------------------------------
    // Reverse proxy
    // ------------------------------------------------------------------

    pub fn proxy_bundle_dir(&self) -> PathBuf {
        self.bundle_root.join("nginx")
    }

    pub fn proxy_binary(&self) -> PathBuf {
        self.proxy_bundle_dir().join("sbin/nginx")
    }

    pub fn proxy_lib_dir(&self) -> PathBuf {
        self.proxy_bundle_dir().join("lib")
    }

    /// Stock `fastcgi_params`/`mime.types` shipped with the bundle.
    pub fn proxy_bundled_conf_dir(&self) -> PathBuf {
        self.proxy_bundle_dir().join("conf")
    }

    pub fn proxy_config_dir(&self) -> PathBuf {
        self.config_root.join("nginx")
    }

    pub fn proxy_main_config(&self) -> PathBuf {
        self.proxy_config_dir().join("nginx.conf")
    }

    pub fn proxy_fastcgi_params(&self) -> PathBuf {
        self.proxy_config_dir().join("fastcgi_params")
    }

    pub fn proxy_mime_types(&self) -> PathBuf {
        self.proxy_config_dir().join("mime.types")
    }

    pub fn sites_available_dir(&self) -> PathBuf {
        self.proxy_config_dir().join("sites-available")
    }

    pub fn sites_enabled_dir(&self) -> PathBuf {
        self.proxy_config_dir().join("sites-enabled")
    }

    /// Config unit for `domain` in the available directory.
    pub fn site_available_path(&self, domain: &str) -> PathBuf {
        self.sites_available_dir()
            .join(format!("{domain}.{SITE_CONFIG_EXTENSION}"))
    }

    /// Activation symlink for `domain` in the enabled directory.
    pub fn site_enabled_path(&self, domain: &str) -> PathBuf {
        self.sites_enabled_dir()
            .join(format!("{domain}.{SITE_CONFIG_EXTENSION}"))
    }

    pub fn proxy_pid_file(&self) -> PathBuf {
        self.run_dir.join("nginx.pid")
    }

    pub fn proxy_error_log(&self) -> PathBuf {
        self.log_dir.join("nginx-error.log")
    }

    pub fn proxy_access_log(&self) -> PathBuf {
        self.log_dir.join("nginx-access.log")
    }

    pub fn site_access_log(&self, domain: &str) -> PathBuf {
        self.log_dir.join(format!("{domain}-access.log"))
    }

    pub fn site_error_log(&self, domain: &str) -> PathBuf {
        self.log_dir.join(format!("{domain}-error.log"))
    }

    /// One of the proxy's request-buffering temp directories.
    pub fn proxy_temp_dir(&self, kind: &str) -> PathBuf {
        self.data_root.join("nginx/temp").join(kind)
    }

    // ------------------------------------------------------------------
    // PHP-FPM
    // ------------------------------------------------------------------

    pub fn php_bundles_dir(&self) -> PathBuf {
        self.bundle_root.join("php")
    }

    pub fn php_bundle_dir(&self, version: &str) -> PathBuf {
        self.php_bundles_dir().join(version)
    }

    pub fn php_fpm_binary(&self, version: &str) -> PathBuf {
        self.php_bundle_dir(version).join("sbin/php-fpm")
    }

    pub fn php_lib_dir(&self, version: &str) -> PathBuf {
        self.php_bundle_dir(version).join("lib")
    }

    pub fn php_extension_dir(&self, version: &str) -> PathBuf {
        self.php_bundle_dir(version).join("lib/php/extensions")
    }

    pub fn php_config_dir(&self, version: &str) -> PathBuf {
        self.config_root.join("php").join(version)
    }

    pub fn php_fpm_config(&self, version: &str) -> PathBuf {
        self.php_config_dir(version).join("php-fpm.conf")
    }

    pub fn php_pool_dir(&self, version: &str) -> PathBuf {
        self.php_config_dir(version).join("pool.d")
    }

    pub fn php_pool_config(&self, version: &str) -> PathBuf {
        self.php_pool_dir(version).join("www.conf")
    }

    pub fn php_ini(&self, version: &str) -> PathBuf {
        self.php_config_dir(version).join("php.ini")
    }

    pub fn php_ini_scan_dir(&self, version: &str) -> PathBuf {
        self.php_config_dir(version).join("conf.d")
    }

    /// `{run}/php{version}-fpm.sock`
    pub fn php_socket(&self, version: &str) -> PathBuf {
        self.run_dir.join(format!("php{version}-fpm.sock"))
    }

    /// `{run}/php{version}-fpm.pid`
    pub fn php_pid_file(&self, version: &str) -> PathBuf {
        self.run_dir.join(format!("php{version}-fpm.pid"))
    }

    pub fn php_error_log(&self, version: &str) -> PathBuf {
        self.log_dir.join(format!("php{version}-fpm.log"))
    }

    // ------------------------------------------------------------------
    // DNS resolver
    // ------------------------------------------------------------------

    pub fn dns_binary(&self) -> PathBuf {
        self.bundle_root.join("dnsmasq/sbin/dnsmasq")
    }

    pub fn dns_config(&self) -> PathBuf {
        self.config_root.join("dnsmasq/dnsmasq.conf")
    }

    pub fn dns_pid_file(&self) -> PathBuf {
        self.run_dir.join("dnsmasq.pid")
    }

    pub fn dns_log(&self) -> PathBuf {
        self.log_dir.join("dnsmasq.log")
    }

    // ------------------------------------------------------------------
    // Database
    // ------------------------------------------------------------------

    pub fn database_bundle_dir(&self) -> PathBuf {
        self.bundle_root.join("mysql")
    }

    pub fn database_binary(&self) -> PathBuf {
        self.database_bundle_dir().join("sbin/mysqld")
    }

    pub fn database_lib_dir(&self) -> PathBuf {
        self.database_bundle_dir().join("lib")
    }

    pub fn database_config(&self) -> PathBuf {
        self.config_root.join("mysql/my.cnf")
    }

    pub fn database_data_dir(&self) -> PathBuf {
        self.data_root.join("mysql/data")
    }

    pub fn database_socket(&self) -> PathBuf {
        self.run_dir.join("mysqld.sock")
    }

    pub fn database_pid_file(&self) -> PathBuf {
        self.run_dir.join("mysqld.pid")
    }

    pub fn database_error_log(&self) -> PathBuf {
        self.log_dir.join("mysql-error.log")
    }

    // ------------------------------------------------------------------
    // Object store
    // ------------------------------------------------------------------

    pub fn object_store_binary(&self) -> PathBuf {
        self.bundle_root.join("minio/minio")
    }

    pub fn object_store_config_dir(&self) -> PathBuf {
        self.config_root.join("minio")
    }

    pub fn object_store_data_dir(&self) -> PathBuf {
        self.data_root.join("minio/data")
    }

    /// Written by the supervisor at launch; MinIO itself keeps no PID file.
    pub fn object_store_pid_file(&self) -> PathBuf {
        self.run_dir.join("minio.pid")
    }

    // ------------------------------------------------------------------
    // Certificates
    // ------------------------------------------------------------------

    pub fn certificate_tool(&self) -> PathBuf {
        self.bundle_root.join("mkcert/mkcert")
    }

    /// Private root CA store handed to the certificate tool as `CAROOT`.
    pub fn certificate_ca_root(&self) -> PathBuf {
        self.data_root.join("mkcert")
    }

    pub fn certificate_dir(&self) -> PathBuf {
        self.data_root.join("certs")
    }

    /// `{certs}/{domain}.pem`
    pub fn certificate_path(&self, domain: &str) -> PathBuf {
        self.certificate_dir().join(format!("{domain}.pem"))
    }

    /// `{certs}/{domain}-key.pem`
    pub fn certificate_key_path(&self, domain: &str) -> PathBuf {
        self.certificate_dir().join(format!("{domain}-key.pem"))
    }
}

/// Supervisor id of the PHP-FPM instance for `version`.
pub fn php_fpm_id(version: &str) -> String {
    format!("{PHP_FPM_ID_PREFIX}{version}")
}
