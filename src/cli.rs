//! Command-line interface for devhost.
use std::{path::PathBuf, str::FromStr};

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::constants::DEFAULT_LOG_LINES;
use crate::stack::ServiceKind;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let level = match trimmed.to_ascii_lowercase().as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Parses `key=value` task payload entries.
fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Command-line interface for devhost.
#[derive(Parser)]
#[command(name = "devhost", version, author)]
#[command(about = "Rootless local PHP development stack", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Keep all state below this directory instead of the home directory.
    #[arg(long, value_name = "DIR", global = true)]
    pub root: Option<PathBuf>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the reverse proxy, DNS resolver and default PHP-FPM, then wait for Ctrl-C.
    Up,

    /// Stop every bundled service.
    Down,

    /// Show the status of every bundled service.
    Status,

    /// Install a registered site into the reverse proxy.
    Install {
        /// Site directory (defaults to the current directory).
        path: Option<PathBuf>,
    },

    /// Remove a site from the reverse proxy.
    Uninstall {
        /// Site directory (defaults to the current directory).
        path: Option<PathBuf>,
    },

    /// Register a site directory.
    Link {
        /// Site directory (defaults to the current directory).
        path: Option<PathBuf>,

        /// Domain to serve the site on (defaults to `<directory>.<tld>`).
        #[arg(short, long)]
        domain: Option<String>,

        /// PHP version, or "default".
        #[arg(long, value_name = "VERSION", default_value = "default")]
        php: String,

        /// Serve over HTTPS when a certificate exists.
        #[arg(long)]
        https: bool,
    },

    /// Forget a registered site directory.
    Unlink {
        /// Site directory (defaults to the current directory).
        path: Option<PathBuf>,
    },

    /// List registered sites.
    Sites,

    /// Control the reverse proxy.
    Proxy {
        #[command(subcommand)]
        action: ProxyAction,
    },

    /// Control PHP-FPM runtimes.
    Php {
        #[command(subcommand)]
        action: PhpAction,
    },

    /// Control the DNS resolver, database or object store.
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },

    /// Manage locally trusted certificates.
    Cert {
        #[command(subcommand)]
        action: CertAction,
    },

    /// Show the log of a service.
    Logs {
        /// Service id, e.g. `internal-proxy` or `php-fpm-8.3`.
        id: String,

        /// Number of lines to show.
        #[arg(short, long, default_value_t = DEFAULT_LOG_LINES)]
        lines: usize,
    },

    /// Run a named task with `key=value` payload entries.
    Task {
        /// Task name, e.g. `install_site`.
        name: String,

        /// Payload entries.
        #[arg(value_parser = parse_key_value)]
        payload: Vec<(String, String)>,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyAction {
    Start,
    Stop,
    Reload,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum PhpAction {
    /// Start PHP-FPM for a version (defaults to the newest installed).
    Start { version: Option<String> },
    /// Stop PHP-FPM for a version (defaults to the newest installed).
    Stop { version: Option<String> },
    /// List installed PHP versions.
    List,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start {
        /// One of dns, mysql, minio (or proxy).
        kind: ServiceKind,
    },
    Stop {
        /// One of dns, mysql, minio (or proxy).
        kind: ServiceKind,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CertAction {
    /// Issue a certificate for a domain.
    Generate { domain: String },
    /// Delete a domain's certificate.
    Remove { domain: String },
    /// Install the private root CA into the system trust stores.
    InstallCa,
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
