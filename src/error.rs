//! Error handling for devhost.
use std::{path::PathBuf, process::ExitStatus};

use thiserror::Error;

/// Errors raised while supervising external processes.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The command vector was empty.
    #[error("No command given for '{id}'")]
    EmptyCommand {
        /// Process id that was being started.
        id: String,
    },

    /// Error spawning a process.
    #[error("Failed to start '{id}': {source}")]
    SpawnError {
        /// Process id that failed to start.
        id: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The process exited inside the launch window.
    #[error("'{id}' exited immediately ({status}){}", format_log_tail(.log_tail))]
    ExitedImmediately {
        /// Process id that exited.
        id: String,
        /// Exit status reported by the OS.
        status: ExitStatus,
        /// Last lines of the process log, when readable.
        log_tail: Option<String>,
    },

    /// Signal delivery was refused by the kernel.
    #[error("Permission denied while signaling '{id}' (PID {pid})")]
    PermissionDenied {
        /// Process id being signaled.
        id: String,
        /// OS process id.
        pid: i32,
    },

    /// Signal delivery failed for another reason.
    #[error("Failed to signal '{id}' (PID {pid}): {source}")]
    SignalError {
        /// Process id being signaled.
        id: String,
        /// OS process id.
        pid: i32,
        /// The errno reported by the kernel.
        #[source]
        source: nix::errno::Errno,
    },

    /// The process survived both the graceful and the forceful signal.
    #[error("'{id}' (PID {pid}) did not terminate after SIGKILL")]
    StopTimeout {
        /// Process id being stopped.
        id: String,
        /// OS process id.
        pid: i32,
    },

    /// Error preparing log or PID files.
    #[error("I/O error for '{id}': {source}")]
    Io {
        /// Process id the I/O belonged to.
        id: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error for poisoned mutex.
    #[error("Mutex is poisoned: {0}")]
    MutexPoisonError(String),
}

/// Implement the `From` trait to convert a `std::sync::PoisonError` into a `ProcessError`.
impl<T> From<std::sync::PoisonError<T>> for ProcessError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        ProcessError::MutexPoisonError(err.to_string())
    }
}

/// Errors raised by the per-service configuration generators.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The bundled binary is not present.
    #[error("{service} binary not found at {}", .path.display())]
    BinaryMissing {
        /// Human readable service name.
        service: String,
        /// Expected binary location.
        path: PathBuf,
    },

    /// The bundled binary exists but cannot be executed.
    #[error("{service} binary at {} is not executable", .path.display())]
    NotExecutable {
        /// Human readable service name.
        service: String,
        /// Binary location.
        path: PathBuf,
    },

    /// Writing configuration or creating directories failed.
    #[error("Failed to prepare {service} configuration at {}: {source}", .path.display())]
    ConfigWrite {
        /// Human readable service name.
        service: String,
        /// Path that could not be written.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The supervisor refused or failed the request.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// The service was launched but is not alive after its settle delay.
    #[error("{service} is not running after start{}", format_log_tail(.log_tail))]
    NotRunning {
        /// Human readable service name.
        service: String,
        /// Last lines of the service error log.
        log_tail: Option<String>,
    },

    /// The service needs to be running for this operation.
    #[error("{service} is not running")]
    NotStarted {
        /// Human readable service name.
        service: String,
    },

    /// One-time data directory initialization failed.
    #[error("{service} data directory initialization failed: {reason}{}", format_log_tail(.log_tail))]
    DataDirInit {
        /// Human readable service name.
        service: String,
        /// Short description of the failure.
        reason: String,
        /// Last lines of the initialization log.
        log_tail: Option<String>,
    },

    /// An auxiliary tool (certificate generator, config test) failed.
    #[error("{tool} failed: {reason}")]
    ToolFailed {
        /// Tool name.
        tool: String,
        /// Diagnostic output or description.
        reason: String,
    },

    /// No PHP runtime is available.
    #[error("PHP {version} is not installed")]
    PhpVersionMissing {
        /// Requested version.
        version: String,
    },
}

/// Errors raised by the site installer. Each variant names the step that failed.
#[derive(Debug, Error)]
pub enum SiteError {
    /// The reverse-proxy directory structure could not be created.
    #[error("Reverse proxy structure check failed: {0}")]
    Structure(#[source] ServiceError),

    /// The site registry has no entry for this path.
    #[error("No site settings found for {}", .0.display())]
    SettingsMissing(PathBuf),

    /// The site registry could not be read.
    #[error("Site settings unavailable: {0}")]
    Registry(#[from] RegistryError),

    /// No PHP runtime is installed to satisfy the "default" sentinel.
    #[error("No PHP version detected; install a PHP runtime first")]
    NoPhpVersion,

    /// PHP-FPM for the site's version could not be started.
    #[error("PHP-FPM {version} could not be started: {source}")]
    PhpUnavailable {
        /// Resolved PHP version.
        version: String,
        /// The generator error.
        #[source]
        source: ServiceError,
    },

    /// The site configuration could not be rendered.
    #[error("Failed to render site configuration: {0}")]
    Render(#[from] RenderError),

    /// Writing, linking or removing configuration files failed.
    #[error("File operation failed on {}: {source}", .path.display())]
    FileOp {
        /// Path being written or removed.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Configuration is on disk but the reverse proxy did not pick it up.
    #[error("Configuration for {domain} written but reverse proxy reload failed: {source}")]
    ReloadFailed {
        /// Domain whose configuration was written.
        domain: String,
        /// The reload error.
        #[source]
        source: ServiceError,
    },
}

impl SiteError {
    /// Whether disk state changed even though the operation failed.
    pub fn is_partial(&self) -> bool {
        matches!(self, SiteError::ReloadFailed { .. })
    }
}

/// Errors raised while rendering a reverse-proxy site block.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The site path does not exist or is not a directory.
    #[error("Site path {} is not an existing directory", .0.display())]
    InvalidSitePath(PathBuf),

    /// The domain is not a valid hostname.
    #[error("Invalid domain '{0}'")]
    InvalidDomain(String),
}

/// Error type for site registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Error reading the registry file.
    #[error("Failed to read site registry: {0}")]
    ReadError(#[from] std::io::Error),

    /// Error parsing the registry file.
    #[error("Failed to parse site registry: {0}")]
    ParseError(#[from] serde_json::Error),

    /// The domain does not satisfy hostname rules or the local TLD.
    #[error("Domain '{domain}' must be a valid hostname ending in '.{tld}'")]
    InvalidDomain {
        /// Rejected domain.
        domain: String,
        /// Configured local TLD.
        tld: String,
    },

    /// Attempted to remove a non-existent entry.
    #[error("Site not found in registry")]
    SiteNotFound,
}

/// Errors raised by the configuration loader.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading the settings file.
    #[error("Failed to read config file: {0}")]
    ConfigReadError(#[from] std::io::Error),

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    ConfigParseError(#[from] serde_yaml::Error),

    /// A `${VAR}` reference had no value in the environment.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// No home directory to derive the layout from.
    #[error("HOME environment variable not set")]
    MissingHome,
}

/// Errors raised while invoking the privileged helper.
#[derive(Debug, Error)]
pub enum HelperError {
    /// The requested system service is not on the allow-list.
    #[error("System service '{0}' is not allowed")]
    ServiceNotAllowed(String),

    /// The action needs an argument that was not supplied.
    #[error("Action '{action}' requires --{argument}")]
    MissingArgument {
        /// Action name.
        action: String,
        /// Missing argument name.
        argument: &'static str,
    },

    /// The `--ip` argument is not an IP address.
    #[error("Invalid IP address '{0}'")]
    InvalidIp(String),

    /// The `--domain` argument is not a hostname.
    #[error("Invalid domain '{0}'")]
    InvalidDomain(String),

    /// The helper program could not be launched.
    #[error("Failed to launch privileged helper: {0}")]
    Spawn(#[from] std::io::Error),

    /// The user declined or cancelled authorization.
    #[error("Authentication failed or cancelled")]
    AuthorizationDeclined,

    /// The helper ran and reported a failure.
    #[error("Privileged helper failed (exit code {code:?}): {stderr}")]
    Failed {
        /// Exit code, absent when killed by a signal.
        code: Option<i32>,
        /// Diagnostics printed by the helper.
        stderr: String,
    },
}

/// Errors raised while decoding a task request.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task name is not known.
    #[error("Unknown task '{0}'")]
    UnknownTask(String),

    /// A payload key the task depends on is missing.
    #[error("Task '{task}' requires payload key '{key}'")]
    MissingPayload {
        /// Task name.
        task: String,
        /// Missing key.
        key: &'static str,
    },

    /// A payload value could not be interpreted.
    #[error("Task '{task}' has invalid value for '{key}': {value}")]
    InvalidPayload {
        /// Task name.
        task: String,
        /// Offending key.
        key: &'static str,
        /// Offending value.
        value: String,
    },

    /// The worker thread has shut down.
    #[error("Task worker is not running")]
    WorkerStopped,
}

/// Errors raised while wiring the orchestrator together.
#[derive(Debug, Error)]
pub enum StackError {
    /// Settings could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A runtime directory could not be created.
    #[error("Failed to create {}: {source}", .path.display())]
    Directory {
        /// Directory path.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },
}

fn format_log_tail(tail: &Option<String>) -> String {
    match tail {
        Some(tail) if !tail.trim().is_empty() => format!("\n--- log tail ---\n{}", tail.trim_end()),
        _ => String::new(),
    }
}
