use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::Report;
use config::{Overrides, Settings};

#[derive(Debug, Parser)]
#[command(name = "ptsync", version, about = "Pentest target sync between the findings store and the web scanner")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./ptsync.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Debug logging on stderr
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Warnings and errors only
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(flatten)]
    overrides: Overrides,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Create ip:port products from nmap XML and write the product type's target list
    #[cfg(feature = "nmap")]
    NmapTargets {
        /// Product type id
        #[arg(long = "product-type-id", visible_alias = "pt-id")]
        product_type_id: i64,
        /// Do not create products or patch descriptions
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Also upsert the scanner-targets block into the product type description
        #[arg(long, default_value_t = false)]
        update_description: bool,
    },
    /// Set a product's internet_accessible flag from an nmap XML and clear needs:nmap
    #[cfg(feature = "nmap")]
    SetInternet {
        #[arg(long)]
        product_id: i64,
        /// nmap -oX document for the product
        #[arg(long)]
        xml: PathBuf,
    },
    /// Push a product type's internet-accessible products into a scanner target group
    #[cfg(feature = "sync")]
    ScannerSync {
        /// Product type id
        #[arg(long = "product-type-id", visible_alias = "pt-id")]
        product_type_id: i64,
        /// Create nothing remotely; map every product to a placeholder target id
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Set scan_speed on every target of a scanner group
    #[cfg(feature = "sync")]
    #[command(group(clap::ArgGroup::new("group").required(true).args(["group_id", "group_name"])))]
    ScanSpeed {
        #[arg(long)]
        group_id: Option<String>,
        #[arg(long)]
        group_name: Option<String>,
        #[arg(long, default_value = scanner_api::DEFAULT_SCAN_SPEED)]
        scan_speed: String,
        /// Only report what would change
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Enumerate subdomains with assetfinder and sublist3r
    #[cfg(feature = "subs")]
    Subdomains {
        /// Root domain
        #[arg(long)]
        domain: String,
        /// Comma list of sources
        #[arg(long, default_value = "assetfinder,sublist3r")]
        sources: String,
        /// Timeout per source in seconds
        #[arg(long, default_value_t = 120)]
        per_source_timeout: u64,
        /// Keep only hosts that resolve
        #[arg(long, default_value_t = false)]
        resolve: bool,
        /// Artifacts directory
        #[arg(long, default_value = "./out")]
        out_dir: PathBuf,
        /// Print the JSON result instead of one host per line
        #[arg(long, default_value_t = false)]
        json_output: bool,
    },
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false).init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let report = match dispatch(cli) {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("{e:#}");
            Report::unexpected(&e)
        }
    };
    if !report.is_ok() {
        tracing::debug!(code = report.exit_code, "command reported failure");
    }
    let mut out = std::io::stdout().lock();
    writeln!(out, "{}", report.stdout()?)?;
    Ok(ExitCode::from(report.exit_code))
}

fn dispatch(cli: Cli) -> Result<Report> {
    let file_cfg = config::load_config(cli.config.as_deref())?;
    let settings = Settings::assemble(&cli.overrides, file_cfg.as_ref(), &|k| std::env::var(k).ok())?;
    tracing::debug!(dojo = %settings.dojo_base_url, scanner = ?settings.scanner_base_url, "settings assembled");

    match cli.command {
        Commands::Version => {
            let summary = serde_json::json!({
                "ok": true,
                "ptsync": env!("CARGO_PKG_VERSION"),
                "core": ptsync_core::version(),
            });
            Report::from_summary(true, &summary)
        }
        #[cfg(feature = "nmap")]
        Commands::NmapTargets { product_type_id, dry_run, update_description } => {
            let client = dojo_client(&settings)?;
            let opts = commands::nmap_targets::NmapTargetsOptions {
                product_type_id,
                xml_dir: settings.xml_dir.clone(),
                exclude_ports: nmap_ports::parse_ports(&settings.exclude_ports)?,
                artifact_dir: settings.artifact_dir.clone(),
                dry_run,
                update_description,
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(commands::nmap_targets::run(&client, &opts))
        }
        #[cfg(feature = "nmap")]
        Commands::SetInternet { product_id, xml } => {
            let client = dojo_client(&settings)?;
            let opts = commands::set_internet::SetInternetOptions { product_id, xml };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(commands::set_internet::run(&client, &opts))
        }
        #[cfg(feature = "sync")]
        Commands::ScannerSync { product_type_id, dry_run } => {
            let dojo = dojo_client(&settings)?;
            let scanner = scanner_client(&settings)?;
            let opts = commands::scanner_sync::ScannerSyncOptions {
                product_type_id,
                mapping_file: settings.mapping_file.clone(),
                scanner_node_name: settings.scanner_node_name.clone(),
                dry_run,
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(commands::scanner_sync::run(&dojo, &scanner, &opts))
        }
        #[cfg(feature = "sync")]
        Commands::ScanSpeed { group_id, group_name, scan_speed, dry_run } => {
            use commands::scan_speed::{GroupSelector, ScanSpeedOptions};
            let scanner = scanner_client(&settings)?;
            let group = match (group_id, group_name) {
                (Some(id), _) => GroupSelector::Id(id),
                (None, Some(name)) => GroupSelector::Name(name),
                (None, None) => return Err(anyhow::anyhow!("provide --group-id or --group-name")),
            };
            let opts = ScanSpeedOptions { group, scan_speed, dry_run };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(commands::scan_speed::run(&scanner, &opts))
        }
        #[cfg(feature = "subs")]
        Commands::Subdomains { domain, sources, per_source_timeout, resolve, out_dir, json_output } => {
            let mut backends = Vec::new();
            for name in sources.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                match subdomains::source_by_name(name) {
                    Some(b) => backends.push(b),
                    None => tracing::warn!(source = name, "unknown subdomain source ignored"),
                }
            }
            let opts = commands::subdomains::SubdomainsOptions {
                domain,
                per_source_timeout: std::time::Duration::from_secs(per_source_timeout.max(1)),
                resolve,
                out_dir,
                json_output,
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(commands::subdomains::run(&opts, &backends))
        }
    }
}

#[cfg(any(feature = "nmap", feature = "sync"))]
fn dojo_client(settings: &Settings) -> Result<findings_store::DojoClient> {
    Ok(findings_store::DojoClient::new(&settings.dojo_base_url, settings.require_dojo_token()?, settings.http_timeout)?)
}

#[cfg(feature = "sync")]
fn scanner_client(settings: &Settings) -> Result<scanner_api::AcunetixClient> {
    let (base, token) = settings.require_scanner()?;
    Ok(scanner_api::AcunetixClient::new(base, token, settings.scanner_verify_tls, settings.http_timeout)?)
}
