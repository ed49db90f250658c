//! devhost runs a rootless local PHP development stack: a reverse proxy, one PHP-FPM
//! pool per installed PHP version, a DNS resolver for the local TLD and optional
//! database and object-store servers. It renders their configuration, supervises the
//! processes and installs sites into the reverse proxy.

/// CLI interface.
pub mod cli;

/// Settings loading.
pub mod config;

/// Service ids, file names and default timings.
pub mod constants;

/// Error handling.
pub mod error;

/// Privileged helper client.
pub mod helper;

/// Log helpers.
pub mod logs;

/// Path resolution.
pub mod paths;

/// Process supervision.
pub mod process;

/// Per-service configuration generators.
pub mod services;

/// Site registry, rendering and installation.
pub mod sites;

/// Orchestrator wiring every component together.
pub mod stack;

/// Status reporting.
pub mod status;

/// Task interface.
pub mod tasks;

#[cfg(test)]
mod test_utils;
