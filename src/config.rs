//! Settings management for devhost.
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{env, fs, io::ErrorKind, path::Path, sync::OnceLock, time::Duration};
use tracing::debug;

use crate::constants::{
    CERTIFICATE_TOOL_TIMEOUT, DATABASE_INIT_TIMEOUT, DATABASE_SETTLE_DELAY,
    DATABASE_STOP_TIMEOUT, DNS_SETTLE_DELAY, KILL_GRACE, LAUNCH_CHECK_WINDOW,
    OBJECT_STORE_SETTLE_DELAY, PHP_SETTLE_DELAY, PROCESS_POLL_INTERVAL,
    PROXY_SETTLE_DELAY, STOP_TIMEOUT,
};
use crate::error::ConfigError;

/// Represents the structure of the settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Local top-level domain every site domain must end in.
    pub tld: String,
    /// Reverse proxy listener settings.
    pub proxy: ProxySettings,
    /// DNS resolver settings.
    pub dns: DnsSettings,
    /// Database server settings.
    pub database: DatabaseSettings,
    /// Object store settings.
    pub object_store: ObjectStoreSettings,
    /// Defaults written into freshly generated php.ini files.
    pub php: PhpSettings,
    /// Privileged helper invocation.
    pub helper: HelperSettings,
    /// Delays and timeouts used by the supervisor and the generators.
    pub timing: TimingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tld: "test".into(),
            proxy: ProxySettings::default(),
            dns: DnsSettings::default(),
            database: DatabaseSettings::default(),
            object_store: ObjectStoreSettings::default(),
            php: PhpSettings::default(),
            helper: HelperSettings::default(),
            timing: TimingSettings::default(),
        }
    }
}

/// Reverse proxy listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Plain HTTP port.
    pub http_port: u16,
    /// TLS port.
    pub https_port: u16,
    /// Command prepended to the proxy launch when binding a privileged port
    /// without `CAP_NET_BIND_SERVICE` (e.g. `["authbind", "--deep"]`).
    pub port_helper: Option<Vec<String>>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            http_port: 80,
            https_port: 443,
            port_helper: None,
        }
    }
}

/// DNS resolver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsSettings {
    /// Address the resolver binds to.
    pub listen_address: String,
    /// Port the resolver listens on.
    pub port: u16,
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1".into(),
            port: 5353,
        }
    }
}

/// Database server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Address the server binds to.
    pub bind_address: String,
    /// TCP port.
    pub port: u16,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".into(),
            port: 3306,
        }
    }
}

/// Object store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStoreSettings {
    /// S3 API port.
    pub api_port: u16,
    /// Web console port.
    pub console_port: u16,
    /// Root access key.
    pub root_user: String,
    /// Root secret key.
    pub root_password: String,
}

impl Default for ObjectStoreSettings {
    fn default() -> Self {
        Self {
            api_port: 9000,
            console_port: 9001,
            root_user: "devhost".into(),
            root_password: "devhost-secret".into(),
        }
    }
}

/// Values seeded into new php.ini files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhpSettings {
    /// `memory_limit` directive.
    pub memory_limit: String,
    /// `upload_max_filesize` and `post_max_size` directives.
    pub upload_max_filesize: String,
}

impl Default for PhpSettings {
    fn default() -> Self {
        Self {
            memory_limit: "512M".into(),
            upload_max_filesize: "128M".into(),
        }
    }
}

/// How the privileged helper is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperSettings {
    /// Argument vector prefix, e.g. `["pkexec", "/usr/libexec/devhost-helper"]`.
    pub program: Vec<String>,
}

impl Default for HelperSettings {
    fn default() -> Self {
        Self {
            program: vec!["pkexec".into(), "/usr/libexec/devhost-helper".into()],
        }
    }
}

/// Delays and timeouts. Accepts `150ms`, `5s`, `2m`, `1h` or bare seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Liveness polling granularity.
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,
    /// Window after spawn in which an exit is a launch failure.
    #[serde(with = "duration_str")]
    pub launch_check: Duration,
    /// Time allowed for a graceful stop before SIGKILL.
    #[serde(with = "duration_str")]
    pub stop_timeout: Duration,
    /// Time allowed for SIGKILL to take effect.
    #[serde(with = "duration_str")]
    pub kill_grace: Duration,
    /// Graceful stop allowance for the database server.
    #[serde(with = "duration_str")]
    pub database_stop_timeout: Duration,
    /// Bound for the one-time database initialization.
    #[serde(with = "duration_str")]
    pub database_init_timeout: Duration,
    /// Bound for certificate tool invocations.
    #[serde(with = "duration_str")]
    pub certificate_timeout: Duration,
    /// Delay before verifying the reverse proxy after start.
    #[serde(with = "duration_str")]
    pub proxy_settle: Duration,
    /// Delay before verifying PHP-FPM after start.
    #[serde(with = "duration_str")]
    pub php_settle: Duration,
    /// Delay before verifying the DNS resolver after start.
    #[serde(with = "duration_str")]
    pub dns_settle: Duration,
    /// Delay before verifying the database after start.
    #[serde(with = "duration_str")]
    pub database_settle: Duration,
    /// Delay before verifying the object store after start.
    #[serde(with = "duration_str")]
    pub object_store_settle: Duration,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            poll_interval: PROCESS_POLL_INTERVAL,
            launch_check: LAUNCH_CHECK_WINDOW,
            stop_timeout: STOP_TIMEOUT,
            kill_grace: KILL_GRACE,
            database_stop_timeout: DATABASE_STOP_TIMEOUT,
            database_init_timeout: DATABASE_INIT_TIMEOUT,
            certificate_timeout: CERTIFICATE_TOOL_TIMEOUT,
            proxy_settle: PROXY_SETTLE_DELAY,
            php_settle: PHP_SETTLE_DELAY,
            dns_settle: DNS_SETTLE_DELAY,
            database_settle: DATABASE_SETTLE_DELAY,
            object_store_settle: OBJECT_STORE_SETTLE_DELAY,
        }
    }
}

/// Parses a user-facing duration string in the format `<number>[ms|s|m|h]`.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    if let Some(millis) = value.strip_suffix("ms") {
        return millis.trim().parse().ok().map(Duration::from_millis);
    }

    let (amount_str, multiplier) = if let Some(stripped) = value.strip_suffix('s') {
        (stripped.trim(), 1)
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped.trim(), 60)
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped.trim(), 3600)
    } else {
        (value, 1)
    };

    let amount: u64 = amount_str.parse().ok()?;
    Some(Duration::from_secs(amount.saturating_mul(multiplier)))
}

fn format_duration(duration: &Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

mod duration_str {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Seconds(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => parse_duration(&text).ok_or_else(|| {
                serde::de::Error::custom(format!("invalid duration value: '{text}'"))
            }),
        }
    }
}

static ENV_REFERENCE: OnceLock<Regex> = OnceLock::new();

/// Expands `$VAR` and `${VAR}` references within a string.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = ENV_REFERENCE.get_or_init(|| {
        Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").expect("static regex")
    });
    let mut missing = None;
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(var) => Err(ConfigError::MissingEnvVar(var)),
        None => Ok(result.into_owned()),
    }
}

/// Loads settings from `path`, falling back to defaults when the file does not exist.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!("No settings file at {}; using defaults", path.display());
            return Ok(Settings::default());
        }
        Err(err) => {
            return Err(ConfigError::ConfigReadError(std::io::Error::new(
                err.kind(),
                format!("{} ({})", err, path.display()),
            )));
        }
    };

    let expanded = expand_env_vars(&content)?;
    if expanded.trim().is_empty() {
        return Ok(Settings::default());
    }

    let settings: Settings = serde_yaml::from_str(&expanded)?;
    Ok(settings)
}
