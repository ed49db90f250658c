//! Bundled MySQL-compatible database server.
use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use nix::sys::signal::Signal;
use tracing::{info, warn};

use crate::constants::{DATABASE_ID, LOG_TAIL_LINES};
use crate::error::ServiceError;
use crate::logs;
use crate::process::{ProcessStatus, StartOptions, StartOutcome, StopOutcome};
use crate::services::{
    BundledService, ServiceContext, confirm_running, ensure_dir, ensure_executable, library_env,
    remove_stale_socket, run_bounded, write_atomic,
};

const SERVICE: &str = "MySQL";

pub struct Database {
    ctx: ServiceContext,
}

impl Database {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn render_config(&self) -> String {
        let layout = &self.ctx.layout;
        let database = &self.ctx.settings.database;
        format!(
            "# Managed by devhost; rewritten on every start.\n\
             [mysqld]\n\
             datadir={data}\n\
             socket={socket}\n\
             pid-file={pid}\n\
             port={port}\n\
             bind-address={address}\n\
             log-error={log}\n\
             mysqlx=OFF\n\
             \n\
             [client]\n\
             socket={socket}\n\
             port={port}\n",
            data = layout.database_data_dir().display(),
            socket = layout.database_socket().display(),
            pid = layout.database_pid_file().display(),
            port = database.port,
            address = database.bind_address,
            log = layout.database_error_log().display(),
        )
    }

    /// Runs the one-time `--initialize-insecure` step when the data directory is empty.
    ///
    /// Bounded by the init timeout. On failure the half-written directory is cleared
    /// so a later attempt starts clean, and the error is returned to the caller.
    pub fn ensure_data_directory(&self) -> Result<bool, ServiceError> {
        let layout = &self.ctx.layout;
        let data_dir = layout.database_data_dir();
        if !is_empty_dir(&data_dir) {
            return Ok(false);
        }

        ensure_dir(SERVICE, &data_dir)?;
        info!(
            "Initializing {SERVICE} data directory at {} (this can take a while)",
            data_dir.display()
        );

        let binary = layout.database_binary();
        let mut command = Command::new(&binary);
        command
            .arg(format!("--defaults-file={}", layout.database_config().display()))
            .arg("--initialize-insecure")
            .arg(format!("--datadir={}", data_dir.display()));
        if let Some((key, value)) = library_env(&layout.database_lib_dir()) {
            command.env(key, value);
        }

        let init_log = layout.process_log(&format!("{DATABASE_ID}-init"));
        if let Err(err) = run_bounded(
            "mysqld --initialize-insecure",
            &mut command,
            self.ctx.settings.timing.database_init_timeout,
            &init_log,
        ) {
            if let Err(cleanup) = fs::remove_dir_all(&data_dir) {
                warn!("Failed to clear {}: {cleanup}", data_dir.display());
            }
            return Err(ServiceError::DataDirInit {
                service: SERVICE.to_string(),
                reason: err.to_string(),
                log_tail: logs::tail_lines(&layout.database_error_log(), LOG_TAIL_LINES),
            });
        }

        info!("{SERVICE} data directory initialized");
        Ok(true)
    }
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}

impl BundledService for Database {
    fn id(&self) -> &'static str {
        DATABASE_ID
    }

    fn display_name(&self) -> &'static str {
        SERVICE
    }

    fn ensure_config(&self) -> Result<(), ServiceError> {
        let layout = &self.ctx.layout;
        ensure_dir(SERVICE, layout.run_dir())?;
        ensure_dir(SERVICE, layout.log_dir())?;
        write_atomic(SERVICE, &layout.database_config(), &self.render_config())
    }

    fn start(&self) -> Result<StartOutcome, ServiceError> {
        let layout = &self.ctx.layout;
        let binary = layout.database_binary();
        ensure_executable(SERVICE, &binary)?;
        self.ensure_config()?;
        self.ensure_data_directory()?;

        let command = vec![
            binary.display().to_string(),
            format!("--defaults-file={}", layout.database_config().display()),
        ];
        let mut options = StartOptions::default()
            .with_pid_file(layout.database_pid_file())
            .with_log_file(layout.process_log(DATABASE_ID));
        if let Some((key, value)) = library_env(&layout.database_lib_dir()) {
            options = options.with_env(key, value);
        }

        let outcome = self.ctx.supervisor.start(DATABASE_ID, &command, options)?;
        if let StartOutcome::Spawned { .. } = outcome {
            confirm_running(
                &self.ctx.supervisor,
                DATABASE_ID,
                SERVICE,
                self.ctx.settings.timing.database_settle,
                &[layout.database_error_log(), layout.process_log(DATABASE_ID)],
            )?;
        }
        Ok(outcome)
    }

    /// Uses the long stop timeout; the server flushes to disk on shutdown.
    fn stop(&self) -> Result<StopOutcome, ServiceError> {
        let layout = &self.ctx.layout;
        let outcome = self.ctx.supervisor.stop(
            DATABASE_ID,
            Signal::SIGTERM,
            self.ctx.settings.timing.database_stop_timeout,
        )?;

        let socket = layout.database_socket();
        remove_stale_socket(&socket);
        remove_stale_socket(&PathBuf::from(format!("{}.lock", socket.display())));
        Ok(outcome)
    }

    fn status(&self) -> Result<ProcessStatus, ServiceError> {
        Ok(self.ctx.supervisor.status(DATABASE_ID)?)
    }

    fn log_path(&self) -> PathBuf {
        self.ctx.layout.database_error_log()
    }
}
