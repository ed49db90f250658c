//! Per-domain TLS certificates issued by the bundled mkcert.
//!
//! The filesystem is the source of truth: a certificate exists when both files exist.
use std::{fs, io, path::PathBuf, process::Command};

use tracing::{debug, info};

use crate::error::ServiceError;
use crate::paths::Layout;
use crate::services::{ServiceContext, config_error, ensure_dir, ensure_executable, run_bounded};

const TOOL: &str = "mkcert";

/// Certificate and key location for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRecord {
    pub domain: String,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl CertificateRecord {
    pub fn for_domain(layout: &Layout, domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            cert_path: layout.certificate_path(domain),
            key_path: layout.certificate_key_path(domain),
        }
    }

    pub fn exists(&self) -> bool {
        self.cert_path.is_file() && self.key_path.is_file()
    }
}

pub struct CertificateProvider {
    ctx: ServiceContext,
}

impl CertificateProvider {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub fn record(&self, domain: &str) -> CertificateRecord {
        CertificateRecord::for_domain(&self.ctx.layout, domain)
    }

    pub fn exists(&self, domain: &str) -> bool {
        self.record(domain).exists()
    }

    fn tool_command(&self) -> Result<Command, ServiceError> {
        let layout = &self.ctx.layout;
        let tool = layout.certificate_tool();
        ensure_executable(TOOL, &tool)?;
        ensure_dir(TOOL, &layout.certificate_ca_root())?;

        let mut command = Command::new(tool);
        command.env("CAROOT", layout.certificate_ca_root());
        Ok(command)
    }

    /// Issues a certificate for `domain`. Existing files are overwritten.
    pub fn generate(&self, domain: &str) -> Result<CertificateRecord, ServiceError> {
        let record = self.record(domain);
        ensure_dir(TOOL, &self.ctx.layout.certificate_dir())?;

        let mut command = self.tool_command()?;
        command
            .arg("-cert-file")
            .arg(&record.cert_path)
            .arg("-key-file")
            .arg(&record.key_path)
            .arg(domain);

        run_bounded(
            TOOL,
            &mut command,
            self.ctx.settings.timing.certificate_timeout,
            &self.ctx.layout.process_log(TOOL),
        )?;

        if !record.exists() {
            return Err(ServiceError::ToolFailed {
                tool: TOOL.to_string(),
                reason: format!("no certificate written for {domain}"),
            });
        }

        info!("Issued certificate for {domain}");
        Ok(record)
    }

    /// Deletes both files. Returns whether anything was removed.
    pub fn remove(&self, domain: &str) -> Result<bool, ServiceError> {
        let record = self.record(domain);
        let mut removed = false;
        for path in [&record.cert_path, &record.key_path] {
            match fs::remove_file(path) {
                Ok(()) => removed = true,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(config_error(TOOL, path, err)),
            }
        }

        if removed {
            info!("Removed certificate for {domain}");
        } else {
            debug!("No certificate to remove for {domain}");
        }
        Ok(removed)
    }

    /// Creates the private root CA if needed and installs it into the trust stores.
    pub fn install_root_ca(&self) -> Result<(), ServiceError> {
        let mut command = self.tool_command()?;
        command.arg("-install");
        run_bounded(
            TOOL,
            &mut command,
            self.ctx.settings.timing.certificate_timeout,
            &self.ctx.layout.process_log(TOOL),
        )?;
        info!(
            "Root CA installed from {}",
            self.ctx.layout.certificate_ca_root().display()
        );
        Ok(())
    }
}
