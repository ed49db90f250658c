//! Named tasks with a key/value payload, the contract front-ends drive the core through.
//!
//! Every task resolves to a [`TaskResult`] carrying the original name and payload.
//! Decoding and execution errors become a failed result; nothing here panics on input.
use std::{
    collections::BTreeMap,
    path::PathBuf,
    str::FromStr,
    sync::{
        Arc,
        mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use tracing::{debug, error, info, warn};

use crate::error::TaskError;
use crate::helper::{HelperAction, HelperRequest};
use crate::sites::UninstallOutcome;
use crate::stack::{ServiceKind, Stack};

const DEFAULT_HOST_IP: &str = "127.0.0.1";

pub type Payload = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub name: String,
    #[serde(default)]
    pub payload: Payload,
}

impl TaskRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: Payload::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub name: String,
    pub payload: Payload,
    pub success: bool,
    pub message: String,
}

impl TaskResult {
    fn finish(request: &TaskRequest, outcome: Result<String, String>) -> Self {
        let (success, message) = match outcome {
            Ok(message) => (true, message),
            Err(message) => (false, message),
        };
        Self {
            name: request.name.clone(),
            payload: request.payload.clone(),
            success,
            message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum TaskKind {
    InstallSite,
    UninstallSite,
    StartInternalProxy,
    StopInternalProxy,
    ReloadInternalProxy,
    StartPhpFpm,
    StopPhpFpm,
    StartInternalDns,
    StopInternalDns,
    StartInternalMysql,
    StopInternalMysql,
    StartInternalMinio,
    StopInternalMinio,
    GenerateCertificate,
    RemoveCertificate,
    AddHostEntry,
    RemoveHostEntry,
    ControlSystemService,
    StopAll,
}

/// A decoded task with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    InstallSite(PathBuf),
    UninstallSite(PathBuf),
    StartService(ServiceKind),
    StopService(ServiceKind),
    ReloadProxy,
    /// `None` means the default PHP version.
    StartPhpFpm(Option<String>),
    StopPhpFpm(Option<String>),
    GenerateCertificate(String),
    RemoveCertificate(String),
    Helper(HelperRequest),
    StopAll,
}

impl Task {
    pub fn from_request(request: &TaskRequest) -> Result<Self, TaskError> {
        let kind = TaskKind::from_str(&request.name)
            .map_err(|_| TaskError::UnknownTask(request.name.clone()))?;
        let payload = PayloadReader {
            task: &request.name,
            payload: &request.payload,
        };

        let task = match kind {
            TaskKind::InstallSite => Task::InstallSite(payload.required("path")?.into()),
            TaskKind::UninstallSite => Task::UninstallSite(payload.required("path")?.into()),
            TaskKind::StartInternalProxy => Task::StartService(ServiceKind::Proxy),
            TaskKind::StopInternalProxy => Task::StopService(ServiceKind::Proxy),
            TaskKind::ReloadInternalProxy => Task::ReloadProxy,
            TaskKind::StartPhpFpm => Task::StartPhpFpm(payload.optional("version")),
            TaskKind::StopPhpFpm => Task::StopPhpFpm(payload.optional("version")),
            TaskKind::StartInternalDns => Task::StartService(ServiceKind::Dns),
            TaskKind::StopInternalDns => Task::StopService(ServiceKind::Dns),
            TaskKind::StartInternalMysql => Task::StartService(ServiceKind::Mysql),
            TaskKind::StopInternalMysql => Task::StopService(ServiceKind::Mysql),
            TaskKind::StartInternalMinio => Task::StartService(ServiceKind::Minio),
            TaskKind::StopInternalMinio => Task::StopService(ServiceKind::Minio),
            TaskKind::GenerateCertificate => {
                Task::GenerateCertificate(payload.required("domain")?.to_string())
            }
            TaskKind::RemoveCertificate => {
                Task::RemoveCertificate(payload.required("domain")?.to_string())
            }
            TaskKind::AddHostEntry => {
                let domain = payload.required("domain")?;
                let ip = payload
                    .optional("ip")
                    .unwrap_or_else(|| DEFAULT_HOST_IP.to_string());
                let request = HelperRequest::add_host_entry(domain, &ip)
                    .map_err(|_| payload.invalid("ip", &ip))?;
                Task::Helper(request)
            }
            TaskKind::RemoveHostEntry => {
                Task::Helper(HelperRequest::remove_host_entry(payload.required("domain")?))
            }
            TaskKind::ControlSystemService => {
                let action = payload.required("action")?;
                let service = payload.required("service")?;
                let action = HelperAction::from_str(action)
                    .ok()
                    .filter(HelperAction::is_service_control)
                    .ok_or_else(|| payload.invalid("action", action))?;
                Task::Helper(HelperRequest::service_control(action, service))
            }
            TaskKind::StopAll => Task::StopAll,
        };
        Ok(task)
    }

    /// Runs the task; `Err` carries the message of a failed result.
    pub fn run(&self, stack: &Stack) -> Result<String, String> {
        match self {
            Task::InstallSite(path) => stack
                .installer()
                .install(path)
                .map(|report| report.message())
                .map_err(|err| err.to_string()),
            Task::UninstallSite(path) => {
                let outcome = stack.installer().uninstall(path).map_err(|err| err.to_string())?;
                if let UninstallOutcome::RemovedReloadFailed { .. } = outcome {
                    warn!("{}", outcome.message());
                }
                Ok(outcome.message())
            }
            Task::StartService(kind) => {
                let service = stack.service(*kind);
                service
                    .start()
                    .map(|outcome| outcome.describe(service.display_name()))
                    .map_err(|err| err.to_string())
            }
            Task::StopService(kind) => {
                let service = stack.service(*kind);
                service
                    .stop()
                    .map(|outcome| outcome.describe(service.display_name()))
                    .map_err(|err| err.to_string())
            }
            Task::ReloadProxy => stack
                .proxy()
                .reload()
                .map(|pid| format!("Nginx reloaded (PID {pid})"))
                .map_err(|err| err.to_string()),
            Task::StartPhpFpm(version) => {
                let version = php_version(stack, version.as_deref())?;
                stack
                    .php()
                    .start(&version)
                    .map(|outcome| outcome.describe(&format!("PHP-FPM {version}")))
                    .map_err(|err| err.to_string())
            }
            Task::StopPhpFpm(version) => {
                let version = php_version(stack, version.as_deref())?;
                stack
                    .php()
                    .stop(&version)
                    .map(|outcome| outcome.describe(&format!("PHP-FPM {version}")))
                    .map_err(|err| err.to_string())
            }
            Task::GenerateCertificate(domain) => stack
                .certificates()
                .generate(domain)
                .map(|record| format!("Certificate written to {}", record.cert_path.display()))
                .map_err(|err| err.to_string()),
            Task::RemoveCertificate(domain) => match stack.certificates().remove(domain) {
                Ok(true) => Ok(format!("Removed certificate for {domain}")),
                Ok(false) => Ok(format!("No certificate for {domain}")),
                Err(err) => Err(err.to_string()),
            },
            Task::Helper(request) => stack.helper().run(request).map_err(|err| err.to_string()),
            Task::StopAll => {
                let report = stack.stop_all();
                if report.is_success() {
                    Ok(report.summary())
                } else {
                    Err(report.summary())
                }
            }
        }
    }
}

fn php_version(stack: &Stack, requested: Option<&str>) -> Result<String, String> {
    match requested {
        Some(version) => Ok(version.to_string()),
        None => stack
            .php()
            .default_version()
            .ok_or_else(|| "No PHP version detected".to_string()),
    }
}

struct PayloadReader<'a> {
    task: &'a str,
    payload: &'a Payload,
}

impl PayloadReader<'_> {
    fn required(&self, key: &'static str) -> Result<&str, TaskError> {
        self.payload
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| TaskError::MissingPayload {
                task: self.task.to_string(),
                key,
            })
    }

    fn optional(&self, key: &str) -> Option<String> {
        self.payload
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn invalid(&self, key: &'static str, value: &str) -> TaskError {
        TaskError::InvalidPayload {
            task: self.task.to_string(),
            key,
            value: value.to_string(),
        }
    }
}

/// Decodes and runs `request` synchronously.
pub fn execute(stack: &Stack, request: &TaskRequest) -> TaskResult {
    debug!("Executing task '{}' with {:?}", request.name, request.payload);
    let outcome = Task::from_request(request)
        .map_err(|err| err.to_string())
        .and_then(|task| task.run(stack));

    let result = TaskResult::finish(request, outcome);
    if result.success {
        info!("Task '{}' succeeded: {}", result.name, result.message);
    } else {
        error!("Task '{}' failed: {}", result.name, result.message);
    }
    result
}

/// Runs tasks one at a time on a background thread.
pub struct TaskWorker {
    requests: Option<Sender<TaskRequest>>,
    results: Receiver<TaskResult>,
    handle: Option<JoinHandle<()>>,
}

impl TaskWorker {
    pub fn spawn(stack: Arc<Stack>) -> Self {
        let (request_tx, request_rx) = mpsc::channel::<TaskRequest>();
        let (result_tx, result_rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            debug!("Task worker started");
            for request in request_rx {
                let result = execute(&stack, &request);
                if result_tx.send(result).is_err() {
                    break;
                }
            }
            debug!("Task worker exiting");
        });

        Self {
            requests: Some(request_tx),
            results: result_rx,
            handle: Some(handle),
        }
    }

    pub fn submit(&self, request: TaskRequest) -> Result<(), TaskError> {
        self.requests
            .as_ref()
            .ok_or(TaskError::WorkerStopped)?
            .send(request)
            .map_err(|_| TaskError::WorkerStopped)
    }

    /// Blocks for the next result. `None` once the worker is gone and drained.
    pub fn recv(&self) -> Option<TaskResult> {
        self.results.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<TaskResult, RecvTimeoutError> {
        self.results.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Result<TaskResult, TryRecvError> {
        self.results.try_recv()
    }

    /// Stops accepting requests and waits for the queued ones to finish.
    pub fn shutdown(&mut self) {
        self.requests.take();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("Task worker panicked");
        }
    }
}

impl Drop for TaskWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
