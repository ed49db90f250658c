//! Bundled reverse proxy (nginx): directory structure, lifecycle and reload.
use std::{
    fs,
    path::{Path, PathBuf},
};

use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::{Pid, geteuid},
};
use tracing::{debug, info, warn};

use crate::constants::{PROXY_ID, PROXY_TEMP_DIRS};
use crate::error::{ProcessError, ServiceError};
use crate::process::{ProcessStatus, StartOptions, StartOutcome, StopOutcome};
use crate::services::{
    BundledService, ServiceContext, confirm_running, config_error, ensure_dir, ensure_executable,
    library_env, write_if_absent,
};

const SERVICE: &str = "Nginx";

const DEFAULT_FASTCGI_PARAMS: &str = "\
fastcgi_param  QUERY_STRING       $query_string;
fastcgi_param  REQUEST_METHOD     $request_method;
fastcgi_param  CONTENT_TYPE       $content_type;
fastcgi_param  CONTENT_LENGTH     $content_length;

fastcgi_param  SCRIPT_NAME        $fastcgi_script_name;
fastcgi_param  REQUEST_URI        $request_uri;
fastcgi_param  DOCUMENT_URI       $document_uri;
fastcgi_param  DOCUMENT_ROOT      $document_root;
fastcgi_param  SERVER_PROTOCOL    $server_protocol;
fastcgi_param  REQUEST_SCHEME     $scheme;
fastcgi_param  HTTPS              $https if_not_empty;

fastcgi_param  GATEWAY_INTERFACE  CGI/1.1;
fastcgi_param  SERVER_SOFTWARE    nginx/$nginx_version;

fastcgi_param  REMOTE_ADDR        $remote_addr;
fastcgi_param  REMOTE_PORT        $remote_port;
fastcgi_param  SERVER_ADDR        $server_addr;
fastcgi_param  SERVER_PORT        $server_port;
fastcgi_param  SERVER_NAME        $server_name;

fastcgi_param  REDIRECT_STATUS    200;
";

const DEFAULT_MIME_TYPES: &str = "\
types {
    text/html                                        html htm shtml;
    text/css                                         css;
    text/xml                                         xml;
    text/plain                                       txt;
    application/javascript                           js mjs;
    application/json                                 json;
    image/gif                                        gif;
    image/jpeg                                       jpeg jpg;
    image/png                                        png;
    image/svg+xml                                    svg svgz;
    image/webp                                       webp;
    image/x-icon                                     ico;
    font/woff                                        woff;
    font/woff2                                       woff2;
    application/pdf                                  pdf;
    application/zip                                  zip;
    application/wasm                                 wasm;
    video/mp4                                        mp4;
}
";

pub struct ReverseProxy {
    ctx: ServiceContext,
}

impl ReverseProxy {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Creates the available/enabled directories, temp dirs and the top-level config.
    ///
    /// Existing files are left alone.
    pub fn ensure_structure(&self) -> Result<(), ServiceError> {
        let layout = &self.ctx.layout;
        for dir in [
            layout.proxy_config_dir(),
            layout.sites_available_dir(),
            layout.sites_enabled_dir(),
        ] {
            ensure_dir(SERVICE, &dir)?;
        }
        ensure_dir(SERVICE, layout.run_dir())?;
        ensure_dir(SERVICE, layout.log_dir())?;
        for kind in PROXY_TEMP_DIRS {
            ensure_dir(SERVICE, &layout.proxy_temp_dir(kind))?;
        }

        if write_if_absent(SERVICE, &layout.proxy_main_config(), &self.render_main_config())? {
            info!("Created {}", layout.proxy_main_config().display());
        }
        self.seed_from_bundle(
            "fastcgi_params",
            &layout.proxy_fastcgi_params(),
            DEFAULT_FASTCGI_PARAMS,
        )?;
        self.seed_from_bundle(
            "mime.types",
            &layout.proxy_mime_types(),
            DEFAULT_MIME_TYPES,
        )?;
        Ok(())
    }

    /// Copies a stock file from the bundle, or writes the built-in default.
    fn seed_from_bundle(
        &self,
        name: &str,
        target: &Path,
        fallback: &str,
    ) -> Result<(), ServiceError> {
        if target.exists() {
            return Ok(());
        }

        let bundled = self.ctx.layout.proxy_bundled_conf_dir().join(name);
        if bundled.is_file() {
            fs::copy(&bundled, target).map_err(|source| config_error(SERVICE, target, source))?;
            debug!("Copied {} from the bundle", name);
            return Ok(());
        }

        write_if_absent(SERVICE, target, fallback)?;
        Ok(())
    }

    pub fn render_main_config(&self) -> String {
        let layout = &self.ctx.layout;
        let temp = |kind: &str| layout.proxy_temp_dir(kind).display().to_string();
        format!(
            "# Created by devhost. Site blocks live in sites-available/ and are\n\
             # activated by symlinks in sites-enabled/.\n\
             worker_processes auto;\n\
             pid {pid};\n\
             error_log {error_log} warn;\n\
             \n\
             events {{\n\
             \x20   worker_connections 1024;\n\
             }}\n\
             \n\
             http {{\n\
             \x20   include {mime_types};\n\
             \x20   default_type application/octet-stream;\n\
             \x20   access_log {access_log};\n\
             \x20   sendfile on;\n\
             \x20   keepalive_timeout 65;\n\
             \x20   client_max_body_size {body_size};\n\
             \n\
             \x20   client_body_temp_path {client_body};\n\
             \x20   proxy_temp_path {proxy};\n\
             \x20   fastcgi_temp_path {fastcgi};\n\
             \x20   uwsgi_temp_path {uwsgi};\n\
             \x20   scgi_temp_path {scgi};\n\
             \n\
             \x20   include {enabled}/*.conf;\n\
             }}\n",
            pid = layout.proxy_pid_file().display(),
            error_log = layout.proxy_error_log().display(),
            mime_types = layout.proxy_mime_types().display(),
            access_log = layout.proxy_access_log().display(),
            body_size = self.ctx.settings.php.upload_max_filesize,
            client_body = temp("client_body"),
            proxy = temp("proxy"),
            fastcgi = temp("fastcgi"),
            uwsgi = temp("uwsgi"),
            scgi = temp("scgi"),
            enabled = layout.sites_enabled_dir().display(),
        )
    }

    fn launch_command(&self) -> Vec<String> {
        let layout = &self.ctx.layout;
        let mut command = Vec::new();

        let http_port = self.ctx.settings.proxy.http_port;
        if http_port < 1024 && !can_bind_privileged_ports() {
            match &self.ctx.settings.proxy.port_helper {
                Some(helper) if !helper.is_empty() => {
                    debug!("Binding port {http_port} through {helper:?}");
                    command.extend(helper.iter().cloned());
                }
                _ => warn!(
                    "Port {http_port} needs CAP_NET_BIND_SERVICE and no port helper is configured"
                ),
            }
        }

        command.extend([
            layout.proxy_binary().display().to_string(),
            "-p".to_string(),
            layout.proxy_config_dir().display().to_string(),
            "-c".to_string(),
            layout.proxy_main_config().display().to_string(),
            "-g".to_string(),
            "daemon off;".to_string(),
        ]);
        command
    }

    /// Sends SIGHUP to the running proxy. The PID is re-read and probed right before
    /// signaling; a missing or dead process is reported as not running.
    pub fn reload(&self) -> Result<i32, ServiceError> {
        let Some(pid) = self.ctx.supervisor.live_pid(PROXY_ID)? else {
            return Err(ServiceError::NotStarted {
                service: SERVICE.to_string(),
            });
        };

        match signal::kill(Pid::from_raw(pid), Signal::SIGHUP) {
            Ok(()) => {
                info!("Reloaded {SERVICE} (PID {pid})");
                Ok(pid)
            }
            Err(Errno::ESRCH) => Err(ServiceError::NotStarted {
                service: SERVICE.to_string(),
            }),
            Err(Errno::EPERM) => Err(ProcessError::PermissionDenied {
                id: PROXY_ID.to_string(),
                pid,
            }
            .into()),
            Err(source) => Err(ProcessError::SignalError {
                id: PROXY_ID.to_string(),
                pid,
                source,
            }
            .into()),
        }
    }

    /// Makes the on-disk configuration live: reload when running, start otherwise.
    pub fn apply_config(&self) -> Result<(), ServiceError> {
        if self.status()?.is_running() {
            self.reload().map(|_| ())
        } else {
            info!("{SERVICE} is not running; starting it to apply configuration");
            self.start().map(|_| ())
        }
    }
}

#[cfg(target_os = "linux")]
fn can_bind_privileged_ports() -> bool {
    geteuid().is_root()
        || caps::has_cap(
            None,
            caps::CapSet::Effective,
            caps::Capability::CAP_NET_BIND_SERVICE,
        )
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn can_bind_privileged_ports() -> bool {
    geteuid().is_root()
}

impl BundledService for ReverseProxy {
    fn id(&self) -> &'static str {
        PROXY_ID
    }

    fn display_name(&self) -> &'static str {
        SERVICE
    }

    fn ensure_config(&self) -> Result<(), ServiceError> {
        self.ensure_structure()
    }

    fn start(&self) -> Result<StartOutcome, ServiceError> {
        let layout = &self.ctx.layout;
        self.ensure_structure()?;
        ensure_executable(SERVICE, &layout.proxy_binary())?;

        let mut options = StartOptions::default()
            .with_pid_file(layout.proxy_pid_file())
            .with_log_file(layout.process_log(PROXY_ID));
        if let Some((key, value)) = library_env(&layout.proxy_lib_dir()) {
            options = options.with_env(key, value);
        }

        let outcome = self
            .ctx
            .supervisor
            .start(PROXY_ID, &self.launch_command(), options)?;
        if let StartOutcome::Spawned { .. } = outcome {
            confirm_running(
                &self.ctx.supervisor,
                PROXY_ID,
                SERVICE,
                self.ctx.settings.timing.proxy_settle,
                &[layout.proxy_error_log(), layout.process_log(PROXY_ID)],
            )?;
        }
        Ok(outcome)
    }

    /// SIGQUIT: finish in-flight requests, then exit.
    fn stop(&self) -> Result<StopOutcome, ServiceError> {
        Ok(self.ctx.supervisor.stop(
            PROXY_ID,
            Signal::SIGQUIT,
            self.ctx.settings.timing.stop_timeout,
        )?)
    }

    fn status(&self) -> Result<ProcessStatus, ServiceError> {
        Ok(self.ctx.supervisor.status(PROXY_ID)?)
    }

    fn log_path(&self) -> PathBuf {
        self.ctx.layout.proxy_error_log()
    }
}

/// The reverse-proxy operations the site installer depends on.
pub trait ProxyControl: Send + Sync {
    fn ensure_structure(&self) -> Result<(), ServiceError>;

    fn is_running(&self) -> bool;

    /// Re-reads configuration in the running proxy; returns the signaled PID.
    fn reload(&self) -> Result<i32, ServiceError>;

    /// Reload when running, start otherwise.
    fn apply_config(&self) -> Result<(), ServiceError>;
}

impl ProxyControl for ReverseProxy {
    fn ensure_structure(&self) -> Result<(), ServiceError> {
        ReverseProxy::ensure_structure(self)
    }

    fn is_running(&self) -> bool {
        match BundledService::status(self) {
            Ok(status) => status.is_running(),
            Err(err) => {
                warn!("Unable to query {SERVICE} status: {err}");
                false
            }
        }
    }

    fn reload(&self) -> Result<i32, ServiceError> {
        ReverseProxy::reload(self)
    }

    fn apply_config(&self) -> Result<(), ServiceError> {
        ReverseProxy::apply_config(self)
    }
}
