//! Site settings: which project directory is served under which domain.
use std::{
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::OnceLock,
};

use fs2::FileExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::constants::DEFAULT_PHP_SENTINEL;
use crate::error::RegistryError;

/// Settings of one site, keyed by `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub path: PathBuf,
    pub domain: String,
    /// Explicit version such as `8.3`, or `default`.
    #[serde(default = "default_php_version")]
    pub php_version: String,
    #[serde(default)]
    pub https: bool,
}

fn default_php_version() -> String {
    DEFAULT_PHP_SENTINEL.to_string()
}

impl SiteConfig {
    pub fn new(path: impl Into<PathBuf>, domain: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            domain: domain.into(),
            php_version: default_php_version(),
            https: false,
        }
    }

    pub fn with_php_version(mut self, version: impl Into<String>) -> Self {
        self.php_version = version.into();
        self
    }

    pub fn with_https(mut self, https: bool) -> Self {
        self.https = https;
        self
    }
}

/// Read access to site settings.
pub trait SiteRegistry: Send + Sync {
    /// Settings for the site rooted at `path`, if registered.
    fn get(&self, path: &Path) -> Result<Option<SiteConfig>, RegistryError>;

    /// All registered sites.
    fn list(&self) -> Result<Vec<SiteConfig>, RegistryError>;
}

static HOSTNAME_LABEL: OnceLock<Regex> = OnceLock::new();

fn hostname_label() -> &'static Regex {
    HOSTNAME_LABEL.get_or_init(|| {
        Regex::new(r"^[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?$").expect("static regex")
    })
}

/// Whether `domain` is a hostname (labels of letters, digits and inner hyphens).
pub fn is_valid_hostname(domain: &str) -> bool {
    let label = hostname_label();
    !domain.is_empty()
        && domain.len() <= 253
        && domain.split('.').all(|part| label.is_match(part))
}

/// Requires a hostname with at least one label in front of `.{tld}`.
pub fn validate_domain(domain: &str, tld: &str) -> Result<(), RegistryError> {
    let suffix = format!(".{tld}");
    let valid = is_valid_hostname(domain)
        && domain.len() > suffix.len()
        && domain.ends_with(&suffix);

    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidDomain {
            domain: domain.to_string(),
            tld: tld.to_string(),
        })
    }
}

fn same_path(left: &Path, right: &Path) -> bool {
    if left == right {
        return true;
    }
    match (fs::canonicalize(left), fs::canonicalize(right)) {
        (Ok(left), Ok(right)) => left == right,
        _ => false,
    }
}

/// `sites.json` backed registry. Readers take a shared lock on a sibling lock file,
/// writers an exclusive one, and the JSON itself is replaced atomically.
#[derive(Debug, Clone)]
pub struct JsonSiteRegistry {
    path: PathBuf,
    tld: String,
}

impl JsonSiteRegistry {
    pub fn new(path: impl Into<PathBuf>, tld: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            tld: tld.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_file(&self) -> Result<File, RegistryError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock_path = self.path.with_extension("json.lock");
        Ok(OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path)?)
    }

    fn read_unlocked(&self) -> Result<Vec<SiteConfig>, RegistryError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write_unlocked(&self, sites: &[SiteConfig]) -> Result<(), RegistryError> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&mut temp, sites)?;
        temp.write_all(b"\n")?;
        temp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }

    fn read_locked(&self) -> Result<Vec<SiteConfig>, RegistryError> {
        let lock = self.lock_file()?;
        FileExt::lock_shared(&lock)?;
        let result = self.read_unlocked();
        FileExt::unlock(&lock)?;
        result
    }

    fn modify<R>(
        &self,
        change: impl FnOnce(&mut Vec<SiteConfig>) -> Result<R, RegistryError>,
    ) -> Result<R, RegistryError> {
        let lock = self.lock_file()?;
        FileExt::lock_exclusive(&lock)?;
        let result = self.read_unlocked().and_then(|mut sites| {
            let value = change(&mut sites)?;
            self.write_unlocked(&sites)?;
            Ok(value)
        });
        FileExt::unlock(&lock)?;
        result
    }

    /// Adds or replaces the entry for `site.path`. Domains must be unique.
    pub fn upsert(&self, site: SiteConfig) -> Result<(), RegistryError> {
        validate_domain(&site.domain, &self.tld)?;
        self.modify(|sites| {
            sites.retain(|existing| {
                !same_path(&existing.path, &site.path) && existing.domain != site.domain
            });
            debug!("Registering {} as {}", site.path.display(), site.domain);
            sites.push(site);
            sites.sort_by(|a, b| a.domain.cmp(&b.domain));
            Ok(())
        })
    }

    /// Removes and returns the entry for `path`.
    pub fn remove(&self, path: &Path) -> Result<SiteConfig, RegistryError> {
        self.modify(|sites| {
            let index = sites
                .iter()
                .position(|site| same_path(&site.path, path))
                .ok_or(RegistryError::SiteNotFound)?;
            Ok(sites.remove(index))
        })
    }
}

impl SiteRegistry for JsonSiteRegistry {
    fn get(&self, path: &Path) -> Result<Option<SiteConfig>, RegistryError> {
        Ok(self
            .read_locked()?
            .into_iter()
            .find(|site| same_path(&site.path, path)))
    }

    fn list(&self) -> Result<Vec<SiteConfig>, RegistryError> {
        self.read_locked()
    }
}
