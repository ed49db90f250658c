use std::{
    env,
    error::Error,
    path::{Path, PathBuf},
    process,
    sync::mpsc,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use devhost::{
    cli::{CertAction, Cli, Commands, PhpAction, ProxyAction, ServiceAction, parse_args},
    logs,
    paths::Layout,
    services::BundledService,
    sites::{SiteConfig, SiteRegistry},
    stack::{ServiceKind, Stack},
    status,
    tasks::{self, TaskRequest},
};

fn main() {
    let args = parse_args();
    init_logging(&args);

    if let Err(err) = run(args) {
        error!("{err}");
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

fn run(args: Cli) -> Result<(), Box<dyn Error>> {

    let layout = match &args.root {
        Some(root) => Layout::rooted(root),
        None => Layout::user()?,
    };
    let stack = Stack::open(layout)?;

    match args.command {
        Commands::Up => run_foreground(&stack)?,
        Commands::Down => {
            let report = stack.stop_all();
            println!("{}", report.summary());
            if !report.is_success() {
                process::exit(1);
            }
        }
        Commands::Status => status::print_report(&stack.status_report()),
        Commands::Install { path } => {
            let path = site_path(path)?;
            let report = stack.installer().install(&path)?;
            println!("{}", report.message());
        }
        Commands::Uninstall { path } => {
            let path = site_path(path)?;
            let outcome = stack.installer().uninstall(&path)?;
            println!("{}", outcome.message());
        }
        Commands::Link {
            path,
            domain,
            php,
            https,
        } => {
            let path = site_path(path)?;
            let domain = match domain {
                Some(domain) => domain,
                None => default_domain(&path, &stack.settings().tld)?,
            };
            let site = SiteConfig::new(&path, &domain)
                .with_php_version(php)
                .with_https(https);
            stack.sites().upsert(site)?;
            println!("Linked {} as {domain}", path.display());
        }
        Commands::Unlink { path } => {
            let path = site_path(path)?;
            let site = stack.sites().remove(&path)?;
            println!("Unlinked {} ({})", path.display(), site.domain);
        }
        Commands::Sites => {
            let sites = stack.sites().list()?;
            if sites.is_empty() {
                println!("No sites linked.");
            }
            for site in sites {
                let scheme = if site.https { "https" } else { "http" };
                println!(
                    "{scheme}://{}  PHP {}  {}",
                    site.domain,
                    site.php_version,
                    site.path.display()
                );
            }
        }
        Commands::Proxy { action } => match action {
            ProxyAction::Start => start_service(stack.service(ServiceKind::Proxy))?,
            ProxyAction::Stop => stop_service(stack.service(ServiceKind::Proxy))?,
            ProxyAction::Reload => {
                let pid = stack.proxy().reload()?;
                println!("Nginx reloaded (PID {pid})");
            }
        },
        Commands::Php { action } => match action {
            PhpAction::Start { version } => {
                let version = php_version(&stack, version)?;
                let outcome = stack.php().start(&version)?;
                println!("{}", outcome.describe(&format!("PHP-FPM {version}")));
            }
            PhpAction::Stop { version } => {
                let version = php_version(&stack, version)?;
                let outcome = stack.php().stop(&version)?;
                println!("{}", outcome.describe(&format!("PHP-FPM {version}")));
            }
            PhpAction::List => {
                let default = stack.php().default_version();
                for version in stack.php().detected_versions() {
                    let marker = if Some(&version) == default.as_ref() {
                        " (default)"
                    } else {
                        ""
                    };
                    println!("{version}{marker}");
                }
            }
        },
        Commands::Service { action } => match action {
            ServiceAction::Start { kind } => start_service(stack.service(kind))?,
            ServiceAction::Stop { kind } => stop_service(stack.service(kind))?,
        },
        Commands::Cert { action } => match action {
            CertAction::Generate { domain } => {
                let record = stack.certificates().generate(&domain)?;
                println!("Certificate written to {}", record.cert_path.display());
            }
            CertAction::Remove { domain } => {
                if stack.certificates().remove(&domain)? {
                    println!("Removed certificate for {domain}");
                } else {
                    println!("No certificate for {domain}");
                }
            }
            CertAction::InstallCa => {
                stack.certificates().install_root_ca()?;
                println!("Root CA installed");
            }
        },
        Commands::Logs { id, lines } => {
            info!("Fetching logs for service: {id}");
            logs::show_log(&stack.log_path_for(&id), lines)?;
        }
        Commands::Task { name, payload } => {
            let request = TaskRequest {
                name,
                payload: payload.into_iter().collect(),
            };
            let result = tasks::execute(&stack, &request);
            println!("{}", result.message);
            if !result.success {
                process::exit(1);
            }
        }
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Starts the default stack and blocks until Ctrl-C, then stops everything.
fn run_foreground(stack: &Stack) -> Result<(), Box<dyn Error>> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    let mut failures = 0;
    for (id, result) in stack.start_default_stack() {
        match result {
            Ok(outcome) => println!("{}", outcome.describe(&id)),
            Err(err) => {
                failures += 1;
                error!("Failed to start {id}: {err}");
            }
        }
    }
    if failures > 0 {
        warn!("{failures} service(s) failed to start");
    }

    println!("devhost is running; press Ctrl-C to stop");
    let _ = rx.recv();

    println!("devhost is shutting down...");
    let report = stack.stop_all();
    println!("{}", report.summary());
    Ok(())
}

fn start_service(service: &dyn BundledService) -> Result<(), Box<dyn Error>> {
    let outcome = service.start()?;
    println!("{}", outcome.describe(service.display_name()));
    Ok(())
}

fn stop_service(service: &dyn BundledService) -> Result<(), Box<dyn Error>> {
    let outcome = service.stop()?;
    println!("{}", outcome.describe(service.display_name()));
    Ok(())
}

fn php_version(stack: &Stack, requested: Option<String>) -> Result<String, Box<dyn Error>> {
    match requested {
        Some(version) => Ok(version),
        None => stack
            .php()
            .default_version()
            .ok_or_else(|| "No PHP version detected".into()),
    }
}

fn site_path(path: Option<PathBuf>) -> Result<PathBuf, Box<dyn Error>> {
    let candidate = match path {
        Some(path) if path.is_absolute() => path,
        Some(path) => env::current_dir()?.join(path),
        None => env::current_dir()?,
    };
    Ok(candidate.canonicalize().unwrap_or(candidate))
}

fn default_domain(path: &Path, tld: &str) -> Result<String, Box<dyn Error>> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_ascii_lowercase())
        .ok_or_else(|| format!("cannot derive a domain from {}", path.display()))?;
    Ok(format!("{name}.{tld}"))
}
