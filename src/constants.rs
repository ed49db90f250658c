//! Constants shared across the supervisor, the service generators and the CLI.
//!
//! Timing values that callers may want to tune live in [`crate::config::TimingSettings`];
//! the values here are their defaults plus identifiers and file names that several
//! modules must agree on.

use std::time::Duration;

// ============================================================================
// Service Identifiers
// ============================================================================

/// Supervisor id of the bundled reverse proxy.
pub const PROXY_ID: &str = "internal-proxy";

/// Supervisor id of the bundled DNS resolver.
pub const DNS_ID: &str = "internal-dns";

/// Supervisor id of the bundled database server.
pub const DATABASE_ID: &str = "internal-mysql";

/// Supervisor id of the bundled object store.
pub const OBJECT_STORE_ID: &str = "internal-minio";

/// Prefix of every per-version PHP-FPM supervisor id.
pub const PHP_FPM_ID_PREFIX: &str = "php-fpm-";

/// Sentinel site setting meaning "highest detected PHP version".
pub const DEFAULT_PHP_SENTINEL: &str = "default";

// ============================================================================
// File System Constants
// ============================================================================

/// Name of the settings file inside the config root.
pub const SETTINGS_FILE_NAME: &str = "config.yaml";

/// Name of the site registry file inside the config root.
pub const SITES_FILE_NAME: &str = "sites.json";

/// Extension used for per-domain reverse-proxy config units.
pub const SITE_CONFIG_EXTENSION: &str = "conf";

/// Temp directories declared by the reverse proxy's top-level config.
pub const PROXY_TEMP_DIRS: [&str; 5] = ["client_body", "proxy", "fastcgi", "uwsgi", "scgi"];

/// Permission bits for rendered site configuration files.
pub const SITE_CONFIG_MODE: u32 = 0o644;

// ============================================================================
// Process Management Timing
// ============================================================================

/// Interval between liveness checks while waiting for a process to exit.
pub const PROCESS_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Window after spawning during which an exit counts as a launch failure.
pub const LAUNCH_CHECK_WINDOW: Duration = Duration::from_millis(200);

/// Default time a process gets to honour its graceful stop signal.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Time a process gets to disappear after SIGKILL.
pub const KILL_GRACE: Duration = Duration::from_secs(1);

/// Stop timeout for database-like services, which flush to disk on shutdown.
pub const DATABASE_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for the one-time database data directory initialization.
pub const DATABASE_INIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Upper bound for a single certificate tool invocation.
pub const CERTIFICATE_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Settle delay after starting the reverse proxy.
pub const PROXY_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Settle delay after starting a PHP-FPM instance.
pub const PHP_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Settle delay after starting the DNS resolver.
pub const DNS_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Settle delay after starting the database server.
pub const DATABASE_SETTLE_DELAY: Duration = Duration::from_millis(2500);

/// Settle delay after starting the object store.
pub const OBJECT_STORE_SETTLE_DELAY: Duration = Duration::from_secs(1);

// ============================================================================
// Logging and Output Constants
// ============================================================================

/// Number of log lines appended to launch failure messages.
pub const LOG_TAIL_LINES: usize = 15;

/// Default number of lines shown by `devhost logs`.
pub const DEFAULT_LOG_LINES: usize = 50;

// ============================================================================
// Privileged Helper Constants
// ============================================================================

/// Exit codes the helper (via pkexec) uses for declined or cancelled authorization.
pub const HELPER_AUTH_EXIT_CODES: [i32; 2] = [126, 127];

/// System services the privileged helper may control.
pub const ALLOWED_SYSTEM_SERVICES: [&str; 8] = [
    "nginx",
    "apache2",
    "mysql",
    "mariadb",
    "postgresql",
    "redis-server",
    "dnsmasq",
    "systemd-resolved",
];
