//! Sites: settings, per-domain proxy config rendering and the install workflow.
pub mod installer;
pub mod registry;
pub mod render;

pub use installer::{InstallReport, SiteInstaller, UninstallOutcome};
pub use registry::{JsonSiteRegistry, SiteConfig, SiteRegistry, validate_domain};
pub use render::{RenderContext, RenderedSiteConfig, render_site_config};
