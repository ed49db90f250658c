//! Bundled S3-compatible object store. It writes no PID file of its own, so it is tracked
//! by handle and the supervisor records its PID under the run directory.
use std::path::PathBuf;

use nix::sys::signal::Signal;

use crate::constants::OBJECT_STORE_ID;
use crate::error::ServiceError;
use crate::process::{ProcessStatus, StartOptions, StartOutcome, StopOutcome};
use crate::services::{BundledService, ServiceContext, confirm_running, ensure_dir, ensure_executable};

pub struct ObjectStore {
    ctx: ServiceContext,
}

impl ObjectStore {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn command(&self) -> Vec<String> {
        let layout = &self.ctx.layout;
        let store = &self.ctx.settings.object_store;
        vec![
            layout.object_store_binary().display().to_string(),
            "server".to_string(),
            layout.object_store_data_dir().display().to_string(),
            "--address".to_string(),
            format!("127.0.0.1:{}", store.api_port),
            "--console-address".to_string(),
            format!("127.0.0.1:{}", store.console_port),
        ]
    }
}

impl BundledService for ObjectStore {
    fn id(&self) -> &'static str {
        OBJECT_STORE_ID
    }

    fn display_name(&self) -> &'static str {
        "MinIO"
    }

    fn ensure_config(&self) -> Result<(), ServiceError> {
        let layout = &self.ctx.layout;
        ensure_dir(self.display_name(), &layout.object_store_config_dir())?;
        ensure_dir(self.display_name(), &layout.object_store_data_dir())?;
        ensure_dir(self.display_name(), layout.log_dir())
    }

    fn start(&self) -> Result<StartOutcome, ServiceError> {
        let layout = &self.ctx.layout;
        ensure_executable(self.display_name(), &layout.object_store_binary())?;
        self.ensure_config()?;

        let store = &self.ctx.settings.object_store;
        let options = StartOptions::default()
            .with_log_file(layout.process_log(OBJECT_STORE_ID))
            .with_env("MINIO_ROOT_USER", &store.root_user)
            .with_env("MINIO_ROOT_PASSWORD", &store.root_password)
            .with_env(
                "MINIO_CONFIG_DIR",
                layout.object_store_config_dir().display().to_string(),
            );

        let outcome = self
            .ctx
            .supervisor
            .start(OBJECT_STORE_ID, &self.command(), options)?;
        if let StartOutcome::Spawned { .. } = outcome {
            confirm_running(
                &self.ctx.supervisor,
                OBJECT_STORE_ID,
                self.display_name(),
                self.ctx.settings.timing.object_store_settle,
                &[layout.process_log(OBJECT_STORE_ID)],
            )?;
        }
        Ok(outcome)
    }

    fn stop(&self) -> Result<StopOutcome, ServiceError> {
        Ok(self.ctx.supervisor.stop(
            OBJECT_STORE_ID,
            Signal::SIGTERM,
            self.ctx.settings.timing.stop_timeout,
        )?)
    }

    fn status(&self) -> Result<ProcessStatus, ServiceError> {
        Ok(self.ctx.supervisor.status(OBJECT_STORE_ID)?)
    }

    fn log_path(&self) -> PathBuf {
        self.ctx.layout.process_log(OBJECT_STORE_ID)
    }
}
