//! Install/uninstall of a site into the reverse proxy.
//!
//! Install is not transactional. A failure after the config file is written leaves
//! it on disk; the next successful install or reload converges.
use std::{
    fs,
    io::{self, Write},
    os::unix::fs::{PermissionsExt, symlink},
    path::{Path, PathBuf},
    sync::Arc,
};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::constants::SITE_CONFIG_MODE;
use crate::error::SiteError;
use crate::paths::Layout;
use crate::services::{PhpFpm, ProxyControl};
use crate::sites::registry::SiteRegistry;
use crate::sites::render::{RenderContext, render_site_config};

/// What an install put on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub domain: String,
    pub php_version: String,
    pub https_enabled: bool,
    pub config_path: PathBuf,
    pub enabled_path: PathBuf,
}

impl InstallReport {
    pub fn message(&self) -> String {
        let scheme = if self.https_enabled { "https" } else { "http" };
        format!(
            "Installed {scheme}://{} (PHP {})",
            self.domain, self.php_version
        )
    }
}

/// Result of an uninstall that did not hit a filesystem error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UninstallOutcome {
    /// Files removed and the proxy no longer serves the domain.
    Removed { domain: String },
    /// Files removed but the running proxy could not be reloaded.
    RemovedReloadFailed { domain: String, warning: String },
    /// Nothing was installed for this site.
    NothingToRemove { domain: String },
}

impl UninstallOutcome {
    pub fn message(&self) -> String {
        match self {
            UninstallOutcome::Removed { domain } => format!("Uninstalled {domain}"),
            UninstallOutcome::RemovedReloadFailed { domain, warning } => {
                format!("Uninstalled {domain}, but reverse proxy reload failed: {warning}")
            }
            UninstallOutcome::NothingToRemove { domain } => {
                format!("{domain} was not installed")
            }
        }
    }
}

pub struct SiteInstaller {
    layout: Arc<Layout>,
    settings: Arc<Settings>,
    registry: Arc<dyn SiteRegistry>,
    php: Arc<PhpFpm>,
    proxy: Arc<dyn ProxyControl>,
}

impl SiteInstaller {
    pub fn new(
        layout: Arc<Layout>,
        settings: Arc<Settings>,
        registry: Arc<dyn SiteRegistry>,
        php: Arc<PhpFpm>,
        proxy: Arc<dyn ProxyControl>,
    ) -> Self {
        Self {
            layout,
            settings,
            registry,
            php,
            proxy,
        }
    }

    /// Installs the site at `path`. A reload failure is returned as
    /// [`SiteError::ReloadFailed`] even though the files are already in place.
    pub fn install(&self, path: &Path) -> Result<InstallReport, SiteError> {
        self.proxy.ensure_structure().map_err(SiteError::Structure)?;

        let site = self
            .registry
            .get(path)?
            .ok_or_else(|| SiteError::SettingsMissing(path.to_path_buf()))?;
        debug!("Installing {} as {}", site.path.display(), site.domain);

        let version = self
            .php
            .resolve_version(&site.php_version)
            .ok_or(SiteError::NoPhpVersion)?;

        self.php
            .start(&version)
            .map_err(|source| SiteError::PhpUnavailable {
                version: version.clone(),
                source,
            })?;

        let runtime = self.php.runtime(&version);
        let ctx = RenderContext {
            layout: &self.layout,
            http_port: self.settings.proxy.http_port,
            https_port: self.settings.proxy.https_port,
        };
        let rendered = render_site_config(&site, &runtime.socket_path, &ctx)?;
        if site.https && !rendered.https_enabled {
            warn!(
                "HTTPS requested for {} but no certificate found; serving over HTTP",
                site.domain
            );
        }

        let config_path = self.layout.site_available_path(&site.domain);
        write_site_config(&config_path, &rendered.text).map_err(|source| SiteError::FileOp {
            path: config_path.clone(),
            source,
        })?;

        let enabled_path = self.layout.site_enabled_path(&site.domain);
        link_enabled(&config_path, &enabled_path)?;

        self.proxy
            .apply_config()
            .map_err(|source| SiteError::ReloadFailed {
                domain: site.domain.clone(),
                source,
            })?;

        let report = InstallReport {
            domain: site.domain,
            php_version: version,
            https_enabled: rendered.https_enabled,
            config_path,
            enabled_path,
        };
        info!("{}", report.message());
        Ok(report)
    }

    /// Removes the site's config unit and symlink. Only filesystem errors fail.
    pub fn uninstall(&self, path: &Path) -> Result<UninstallOutcome, SiteError> {
        let domain = self.domain_for(path)?;
        let enabled_path = self.layout.site_enabled_path(&domain);
        let config_path = self.layout.site_available_path(&domain);

        let removed_link = remove_entry(&enabled_path)?;
        let removed_file = remove_entry(&config_path)?;
        if !removed_link && !removed_file {
            debug!("Nothing installed for {domain}");
            return Ok(UninstallOutcome::NothingToRemove { domain });
        }

        if !self.proxy.is_running() {
            info!("Uninstalled {domain}");
            return Ok(UninstallOutcome::Removed { domain });
        }

        match self.proxy.reload() {
            Ok(_) => {
                info!("Uninstalled {domain}");
                Ok(UninstallOutcome::Removed { domain })
            }
            Err(err) => {
                warn!("Uninstalled {domain} but reload failed: {err}");
                Ok(UninstallOutcome::RemovedReloadFailed {
                    domain,
                    warning: err.to_string(),
                })
            }
        }
    }

    /// Registered domain, or `{directory name}.{tld}` when the settings are gone.
    fn domain_for(&self, path: &Path) -> Result<String, SiteError> {
        match self.registry.get(path) {
            Ok(Some(site)) => return Ok(site.domain),
            Ok(None) => {}
            Err(err) => warn!("Site settings unavailable, guessing domain: {err}"),
        }

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_ascii_lowercase())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| SiteError::SettingsMissing(path.to_path_buf()))?;
        Ok(format!("{name}.{}", self.settings.tld))
    }
}

/// Replaces the config unit atomically and makes it world-readable.
fn write_site_config(path: &Path, text: &str) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(text.as_bytes())?;
    temp.persist(path).map_err(|err| err.error)?;
    fs::set_permissions(path, fs::Permissions::from_mode(SITE_CONFIG_MODE))
}

/// Points `enabled` at `available`, replacing a wrong symlink or a regular file.
fn link_enabled(available: &Path, enabled: &Path) -> Result<(), SiteError> {
    let file_op = |source: io::Error| SiteError::FileOp {
        path: enabled.to_path_buf(),
        source,
    };

    match fs::symlink_metadata(enabled) {
        Ok(metadata) if metadata.file_type().is_symlink() => {
            if fs::read_link(enabled).map_err(file_op)? == available {
                return Ok(());
            }
            debug!("Repointing {}", enabled.display());
            fs::remove_file(enabled).map_err(file_op)?;
        }
        Ok(_) => {
            warn!(
                "Replacing non-symlink {} with a link to {}",
                enabled.display(),
                available.display()
            );
            fs::remove_file(enabled).map_err(file_op)?;
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(file_op(err)),
    }

    if let Some(parent) = enabled.parent() {
        fs::create_dir_all(parent).map_err(file_op)?;
    }
    symlink(available, enabled).map_err(file_op)
}

/// Removes a file or symlink (dangling included). Returns whether it existed.
fn remove_entry(path: &Path) -> Result<bool, SiteError> {
    match fs::symlink_metadata(path) {
        Ok(_) => fs::remove_file(path)
            .map(|_| true)
            .map_err(|source| SiteError::FileOp {
                path: path.to_path_buf(),
                source,
            }),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(SiteError::FileOp {
            path: path.to_path_buf(),
            source,
        }),
    }
}
