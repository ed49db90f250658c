//! Wires layout, settings, supervisor, site registry and every generator together.
use std::{collections::BTreeSet, fs, path::PathBuf, sync::Arc};

use nix::sys::signal::Signal;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use tracing::{debug, info, warn};

use crate::config::{Settings, load_settings};
use crate::constants::{DATABASE_ID, DNS_ID, OBJECT_STORE_ID, PHP_FPM_ID_PREFIX, PROXY_ID};
use crate::error::{ServiceError, StackError};
use crate::helper::PrivilegedHelper;
use crate::paths::{Layout, php_fpm_id};
use crate::process::{ProcessSupervisor, StartOutcome, StopAllReport, StopRequest, SupervisorTiming};
use crate::services::{
    self, BundledService, CertificateProvider, Database, DnsResolver, ObjectStore, PhpFpm,
    ReverseProxy, ServiceContext,
};
use crate::sites::{JsonSiteRegistry, SiteInstaller};
use crate::status::{self, ServiceSnapshot};

/// Single-instance services addressable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum ServiceKind {
    Proxy,
    Dns,
    Mysql,
    Minio,
}

pub struct Stack {
    layout: Arc<Layout>,
    settings: Arc<Settings>,
    supervisor: Arc<ProcessSupervisor>,
    sites: Arc<JsonSiteRegistry>,
    proxy: Arc<ReverseProxy>,
    php: Arc<PhpFpm>,
    dns: DnsResolver,
    database: Database,
    object_store: ObjectStore,
    certificates: CertificateProvider,
    installer: SiteInstaller,
    helper: PrivilegedHelper,
}

impl Stack {
    /// Loads settings from the layout's settings file and builds the stack.
    pub fn open(layout: Layout) -> Result<Self, StackError> {
        let settings = load_settings(&layout.settings_file())?;
        Self::with_settings(layout, settings)
    }

    pub fn with_settings(layout: Layout, settings: Settings) -> Result<Self, StackError> {
        for dir in layout.base_dirs() {
            fs::create_dir_all(dir).map_err(|source| StackError::Directory {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let timing = SupervisorTiming::from(&settings.timing);
        let supervisor = Arc::new(ProcessSupervisor::new(layout.clone(), timing));
        let layout = Arc::new(layout);
        let settings = Arc::new(settings);
        let ctx = ServiceContext::new(layout.clone(), settings.clone(), supervisor.clone());

        let sites = Arc::new(JsonSiteRegistry::new(
            layout.sites_file(),
            settings.tld.clone(),
        ));
        let proxy = Arc::new(ReverseProxy::new(ctx.clone()));
        let php = Arc::new(PhpFpm::new(ctx.clone()));
        let installer = SiteInstaller::new(
            layout.clone(),
            settings.clone(),
            sites.clone(),
            php.clone(),
            proxy.clone(),
        );
        let helper = PrivilegedHelper::new(settings.helper.program.clone());

        debug!("Stack ready (config root {})", layout.config_root().display());
        Ok(Self {
            dns: DnsResolver::new(ctx.clone()),
            database: Database::new(ctx.clone()),
            object_store: ObjectStore::new(ctx.clone()),
            certificates: CertificateProvider::new(ctx),
            layout,
            settings,
            supervisor,
            sites,
            proxy,
            php,
            installer,
            helper,
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn sites(&self) -> &JsonSiteRegistry {
        &self.sites
    }

    pub fn proxy(&self) -> &ReverseProxy {
        &self.proxy
    }

    pub fn php(&self) -> &PhpFpm {
        &self.php
    }

    pub fn certificates(&self) -> &CertificateProvider {
        &self.certificates
    }

    pub fn installer(&self) -> &SiteInstaller {
        &self.installer
    }

    pub fn helper(&self) -> &PrivilegedHelper {
        &self.helper
    }

    pub fn service(&self, kind: ServiceKind) -> &dyn BundledService {
        match kind {
            ServiceKind::Proxy => self.proxy.as_ref(),
            ServiceKind::Dns => &self.dns,
            ServiceKind::Mysql => &self.database,
            ServiceKind::Minio => &self.object_store,
        }
    }

    /// PHP versions that are installed or running in this session.
    pub fn known_php_versions(&self) -> Vec<String> {
        let mut versions: BTreeSet<String> = self.php.detected_versions().into_iter().collect();
        versions.extend(self.php.tracked_versions());
        versions.into_iter().collect()
    }

    /// Starts the reverse proxy, the DNS resolver and the default PHP version.
    ///
    /// Each result is reported; one failure does not prevent the others.
    pub fn start_default_stack(&self) -> Vec<(String, Result<StartOutcome, ServiceError>)> {
        let mut results = Vec::new();

        match self.php.default_version() {
            Some(version) => {
                let result = self.php.start(&version);
                results.push((php_fpm_id(&version), result));
            }
            None => warn!("No PHP runtime detected; skipping PHP-FPM"),
        }
        results.push((PROXY_ID.to_string(), self.proxy.start()));
        results.push((DNS_ID.to_string(), self.dns.start()));
        results
    }

    /// Stop plan covering every known service id.
    pub fn stop_plan(&self) -> Vec<StopRequest> {
        let timing = &self.settings.timing;
        let mut plan = vec![StopRequest::new(PROXY_ID, Signal::SIGQUIT, timing.stop_timeout)];
        plan.extend(self.known_php_versions().iter().map(|version| {
            StopRequest::new(php_fpm_id(version), Signal::SIGTERM, timing.stop_timeout)
        }));
        plan.push(StopRequest::new(DNS_ID, Signal::SIGTERM, timing.stop_timeout));
        plan.push(StopRequest::new(
            DATABASE_ID,
            Signal::SIGTERM,
            timing.database_stop_timeout,
        ));
        plan.push(StopRequest::new(
            OBJECT_STORE_ID,
            Signal::SIGTERM,
            timing.stop_timeout,
        ));
        plan
    }

    /// Best-effort shutdown used when devhost exits.
    pub fn stop_all(&self) -> StopAllReport {
        let versions = self.known_php_versions();
        let report = self.supervisor.stop_all(&self.stop_plan());

        for version in versions {
            services::remove_stale_socket(&self.layout.php_socket(&version));
        }
        services::remove_stale_socket(&self.layout.database_socket());

        if report.is_success() {
            info!("{}", report.summary());
        } else {
            warn!("{}", report.summary());
        }
        report
    }

    /// Log file shown by `devhost logs <id>`.
    pub fn log_path_for(&self, id: &str) -> PathBuf {
        if let Some(kind) = ServiceKind::iter().find(|kind| self.service(*kind).id() == id) {
            return self.service(kind).log_path();
        }
        match id.strip_prefix(PHP_FPM_ID_PREFIX) {
            Some(version) if !version.is_empty() => self.layout.php_error_log(version),
            _ => self.layout.process_log(id),
        }
    }

    pub fn status_report(&self) -> Vec<ServiceSnapshot> {
        status::collect(self)
    }

    #[cfg(test)]
    pub(crate) fn replace_proxy_control(
        &mut self,
        proxy: Arc<dyn crate::services::ProxyControl>,
    ) {
        self.installer = SiteInstaller::new(
            self.layout.clone(),
            self.settings.clone(),
            self.sites.clone(),
            self.php.clone(),
            proxy,
        );
    }
}
