//! Rendering of one reverse-proxy config unit per site.
//!
//! The HTTP block either serves the site or redirects to HTTPS. It only redirects
//! when the certificate files are present; otherwise the site stays on plain HTTP.
use std::{
    fmt::Write as _,
    path::{Path, PathBuf},
};

use crate::error::RenderError;
use crate::paths::Layout;
use crate::services::CertificateRecord;
use crate::sites::registry::{SiteConfig, is_valid_hostname};

/// Inputs shared by every site rendered against one proxy.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub layout: &'a Layout,
    pub http_port: u16,
    pub https_port: u16,
}

/// The text of one site's config unit plus what was decided while rendering it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedSiteConfig {
    pub domain: String,
    /// `https` requested and certificates present.
    pub https_enabled: bool,
    pub document_root: PathBuf,
    pub text: String,
}

/// `path/public` when it exists, else `path`.
pub fn document_root(site_path: &Path) -> PathBuf {
    let public = site_path.join("public");
    if public.is_dir() {
        public
    } else {
        site_path.to_path_buf()
    }
}

pub fn render_site_config(
    site: &SiteConfig,
    php_socket: &Path,
    ctx: &RenderContext<'_>,
) -> Result<RenderedSiteConfig, RenderError> {
    if !site.path.is_dir() {
        return Err(RenderError::InvalidSitePath(site.path.clone()));
    }
    if !is_valid_hostname(&site.domain) {
        return Err(RenderError::InvalidDomain(site.domain.clone()));
    }

    let root = document_root(&site.path);
    let certificate = CertificateRecord::for_domain(ctx.layout, &site.domain);
    let https_enabled = site.https && certificate.exists();
    let php = php_location(php_socket, &ctx.layout.proxy_fastcgi_params());

    let mut text = format!(
        "# devhost site: {domain} (https: {https_enabled})\n\
         # Generated from {path}; changes are overwritten on reinstall.\n\n",
        domain = site.domain,
        path = site.path.display(),
    );

    if https_enabled {
        text.push_str(&redirect_block(&site.domain, ctx));
        text.push('\n');
        let tls = format!(
            "    ssl_certificate {cert};\n\
             \x20   ssl_certificate_key {key};\n\
             \x20   ssl_protocols TLSv1.2 TLSv1.3;\n\
             \x20   ssl_prefer_server_ciphers on;\n\
             \x20   ssl_session_cache shared:SSL:10m;\n",
            cert = certificate.cert_path.display(),
            key = certificate.key_path.display(),
        );
        text.push_str(&serving_block(
            &site.domain,
            &format!("{} ssl", ctx.https_port),
            Some(&tls),
            &root,
            &php,
            ctx.layout,
        ));
    } else {
        text.push_str(&serving_block(
            &site.domain,
            &ctx.http_port.to_string(),
            None,
            &root,
            &php,
            ctx.layout,
        ));
    }

    Ok(RenderedSiteConfig {
        domain: site.domain.clone(),
        https_enabled,
        document_root: root,
        text,
    })
}

/// PHP handler shared verbatim by the HTTP and HTTPS blocks.
fn php_location(socket: &Path, fastcgi_params: &Path) -> String {
    format!(
        "    location ~ \\.php$ {{\n\
         \x20       try_files $uri =404;\n\
         \x20       fastcgi_split_path_info ^(.+\\.php)(/.+)$;\n\
         \x20       fastcgi_pass unix:{socket};\n\
         \x20       fastcgi_index index.php;\n\
         \x20       include {params};\n\
         \x20       fastcgi_param SCRIPT_FILENAME $realpath_root$fastcgi_script_name;\n\
         \x20       fastcgi_param DOCUMENT_ROOT $realpath_root;\n\
         \x20       fastcgi_read_timeout 300;\n\
         \x20   }}\n",
        socket = socket.display(),
        params = fastcgi_params.display(),
    )
}

fn redirect_block(domain: &str, ctx: &RenderContext<'_>) -> String {
    let target = if ctx.https_port == 443 {
        "https://$host$request_uri".to_string()
    } else {
        format!("https://$host:{}$request_uri", ctx.https_port)
    };
    format!(
        "server {{\n\
         \x20   listen {port};\n\
         \x20   server_name {domain};\n\
         \x20   return 301 {target};\n\
         }}\n",
        port = ctx.http_port,
    )
}

fn serving_block(
    domain: &str,
    listen: &str,
    tls: Option<&str>,
    root: &Path,
    php: &str,
    layout: &Layout,
) -> String {
    let mut block = String::new();
    let _ = writeln!(block, "server {{");
    let _ = writeln!(block, "    listen {listen};");
    let _ = writeln!(block, "    server_name {domain};");
    if let Some(tls) = tls {
        block.push_str(tls);
    }
    let _ = writeln!(block, "    root {};", root.display());
    let _ = writeln!(block, "    index index.php index.html index.htm;");
    let _ = writeln!(block, "    charset utf-8;");
    let _ = writeln!(block, "    access_log {};", layout.site_access_log(domain).display());
    let _ = writeln!(block, "    error_log {};", layout.site_error_log(domain).display());
    block.push('\n');
    let _ = writeln!(block, "    location / {{");
    let _ = writeln!(block, "        try_files $uri $uri/ /index.php?$query_string;");
    let _ = writeln!(block, "    }}");
    block.push('\n');
    block.push_str(php);
    block.push('\n');
    let _ = writeln!(block, "    location ~ /\\.(?!well-known).* {{");
    let _ = writeln!(block, "        deny all;");
    let _ = writeln!(block, "    }}");
    let _ = writeln!(block, "}}");
    block
}
