//! Bundled DNS resolver answering the local TLD.
use std::path::PathBuf;

use nix::sys::signal::Signal;

use crate::constants::DNS_ID;
use crate::error::ServiceError;
use crate::process::{ProcessStatus, StartOptions, StartOutcome, StopOutcome};
use crate::services::{
    BundledService, ServiceContext, confirm_running, ensure_dir, ensure_executable, write_atomic,
};

pub struct DnsResolver {
    ctx: ServiceContext,
}

impl DnsResolver {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn render_config(&self) -> String {
        let layout = &self.ctx.layout;
        let dns = &self.ctx.settings.dns;
        format!(
            "# Managed by devhost; rewritten on every start.\n\
             port={port}\n\
             listen-address={address}\n\
             bind-interfaces\n\
             no-resolv\n\
             no-hosts\n\
             address=/.{tld}/127.0.0.1\n\
             pid-file={pid}\n\
             log-facility={log}\n",
            port = dns.port,
            address = dns.listen_address,
            tld = self.ctx.settings.tld,
            pid = layout.dns_pid_file().display(),
            log = layout.dns_log().display(),
        )
    }
}

impl BundledService for DnsResolver {
    fn id(&self) -> &'static str {
        DNS_ID
    }

    fn display_name(&self) -> &'static str {
        "DNS resolver"
    }

    /// The config carries the listening port, so it always tracks the settings.
    fn ensure_config(&self) -> Result<(), ServiceError> {
        let layout = &self.ctx.layout;
        ensure_dir(self.display_name(), layout.run_dir())?;
        ensure_dir(self.display_name(), layout.log_dir())?;
        write_atomic(self.display_name(), &layout.dns_config(), &self.render_config())
    }

    fn start(&self) -> Result<StartOutcome, ServiceError> {
        let layout = &self.ctx.layout;
        let binary = layout.dns_binary();
        ensure_executable(self.display_name(), &binary)?;
        self.ensure_config()?;

        let command = vec![
            binary.display().to_string(),
            "--keep-in-foreground".to_string(),
            format!("--conf-file={}", layout.dns_config().display()),
        ];
        let options = StartOptions::default()
            .with_pid_file(layout.dns_pid_file())
            .with_log_file(layout.process_log(DNS_ID));

        let outcome = self.ctx.supervisor.start(DNS_ID, &command, options)?;
        if let StartOutcome::Spawned { .. } = outcome {
            confirm_running(
                &self.ctx.supervisor,
                DNS_ID,
                self.display_name(),
                self.ctx.settings.timing.dns_settle,
                &[layout.dns_log(), layout.process_log(DNS_ID)],
            )?;
        }
        Ok(outcome)
    }

    fn stop(&self) -> Result<StopOutcome, ServiceError> {
        Ok(self.ctx.supervisor.stop(
            DNS_ID,
            Signal::SIGTERM,
            self.ctx.settings.timing.stop_timeout,
        )?)
    }

    fn status(&self) -> Result<ProcessStatus, ServiceError> {
        Ok(self.ctx.supervisor.status(DNS_ID)?)
    }

    fn log_path(&self) -> PathBuf {
        self.ctx.layout.dns_log()
    }
}
