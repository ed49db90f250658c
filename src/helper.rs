//! Client for the privileged helper that performs system-level actions
//! (systemd service control, `/etc/hosts` edits).
//!
//! Requests are validated before anything is spawned. Exit code 0 is success with a
//! one-line confirmation on stdout, 126/127 mean authorization was declined, anything
//! else is a failure described on stderr.
use std::{net::IpAddr, process::Command, str::FromStr};

use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use tracing::{debug, info, warn};

use crate::constants::{ALLOWED_SYSTEM_SERVICES, HELPER_AUTH_EXIT_CODES};
use crate::error::HelperError;
use crate::sites::registry::is_valid_hostname;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum HelperAction {
    Start,
    Stop,
    Restart,
    Reload,
    Enable,
    Disable,
    AddHostEntry,
    RemoveHostEntry,
}

impl HelperAction {
    /// Whether the action controls a system service.
    pub fn is_service_control(&self) -> bool {
        !matches!(self, HelperAction::AddHostEntry | HelperAction::RemoveHostEntry)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperRequest {
    pub action: HelperAction,
    pub service: Option<String>,
    pub domain: Option<String>,
    pub ip: Option<IpAddr>,
}

impl HelperRequest {
    pub fn service_control(action: HelperAction, service: &str) -> Self {
        Self {
            action,
            service: Some(service.to_string()),
            domain: None,
            ip: None,
        }
    }

    pub fn add_host_entry(domain: &str, ip: &str) -> Result<Self, HelperError> {
        let ip = IpAddr::from_str(ip.trim()).map_err(|_| HelperError::InvalidIp(ip.to_string()))?;
        Ok(Self {
            action: HelperAction::AddHostEntry,
            service: None,
            domain: Some(domain.to_string()),
            ip: Some(ip),
        })
    }

    pub fn remove_host_entry(domain: &str) -> Self {
        Self {
            action: HelperAction::RemoveHostEntry,
            service: None,
            domain: Some(domain.to_string()),
            ip: None,
        }
    }

    fn missing(&self, argument: &'static str) -> HelperError {
        HelperError::MissingArgument {
            action: self.action.to_string(),
            argument,
        }
    }

    /// Checks the allow-list and the arguments each action needs.
    pub fn validate(&self) -> Result<(), HelperError> {
        if self.action.is_service_control() {
            let service = self.service.as_deref().ok_or_else(|| self.missing("service"))?;
            if !ALLOWED_SYSTEM_SERVICES.contains(&service) {
                return Err(HelperError::ServiceNotAllowed(service.to_string()));
            }
            return Ok(());
        }

        let domain = self.domain.as_deref().ok_or_else(|| self.missing("domain"))?;
        if !is_valid_hostname(domain) {
            return Err(HelperError::InvalidDomain(domain.to_string()));
        }
        if self.action == HelperAction::AddHostEntry && self.ip.is_none() {
            return Err(self.missing("ip"));
        }
        Ok(())
    }

    /// `--action X [--service S] [--domain D] [--ip I]`
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["--action".to_string(), self.action.to_string()];
        if let Some(service) = &self.service {
            args.extend(["--service".to_string(), service.clone()]);
        }
        if let Some(domain) = &self.domain {
            args.extend(["--domain".to_string(), domain.clone()]);
        }
        if let Some(ip) = &self.ip {
            args.extend(["--ip".to_string(), ip.to_string()]);
        }
        args
    }
}

/// Invokes the helper through a configurable argv prefix (normally `pkexec <helper>`).
#[derive(Debug, Clone)]
pub struct PrivilegedHelper {
    program: Vec<String>,
}

impl PrivilegedHelper {
    pub fn new(program: Vec<String>) -> Self {
        Self { program }
    }

    /// Runs `request`, returning the helper's confirmation line.
    pub fn run(&self, request: &HelperRequest) -> Result<String, HelperError> {
        request.validate()?;

        let Some((program, prefix)) = self.program.split_first() else {
            return Err(HelperError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no privileged helper configured",
            )));
        };

        let args = request.to_args();
        debug!("Invoking privileged helper: {program} {prefix:?} {args:?}");
        let output = Command::new(program).args(prefix).args(&args).output()?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match output.status.code() {
            Some(0) => {
                let confirmation = stdout.lines().next().unwrap_or("").trim().to_string();
                info!("Privileged helper: {}", confirmation);
                Ok(confirmation)
            }
            Some(code) if HELPER_AUTH_EXIT_CODES.contains(&code) => {
                warn!("Privileged helper authorization declined (exit {code})");
                Err(HelperError::AuthorizationDeclined)
            }
            code => Err(HelperError::Failed { code, stderr }),
        }
    }
}
