use anyhow::{anyhow, Context, Result};
use clap::Args;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_DOJO_BASE_URL: &str = "http://localhost:8080/api/v2";
pub const DEFAULT_XML_DIR: &str = "/tmp";
pub const DEFAULT_EXCLUDE_PORTS: &str = "80,443";
pub const DEFAULT_ARTIFACT_DIR: &str = "/tmp";
pub const DEFAULT_MAPPING_FILE: &str = "/tmp/acunetix_dojo_target_mapping.json";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Default, Deserialize, Clone)]
pub struct FindingsStoreConfig {
    pub base_url: Option<String>,
    pub api_token: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ScannerConfig {
    pub base_url: Option<String>,
    pub api_token: Option<String>,
    pub node_name: Option<String>,
    pub verify_tls: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct NmapConfig {
    pub xml_dir: Option<PathBuf>,
    pub exclude_ports: Option<String>,
    pub artifact_dir: Option<PathBuf>,
}

/// Shape of `ptsync.yaml`. Every key is optional.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    pub findings_store: Option<FindingsStoreConfig>,
    pub scanner: Option<ScannerConfig>,
    pub nmap: Option<NmapConfig>,
    pub mapping_file: Option<PathBuf>,
    pub http_timeout_secs: Option<u64>,
}

/// Load `path`, or `./ptsync.yaml` when no path is given and that file exists.
/// An explicit path that cannot be read or parsed is an error; the implicit file is
/// only warned about.
pub fn load_config(path: Option<&Path>) -> Result<Option<Config>> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => {
            let p = Path::new("ptsync.yaml");
            if p.exists() { (p.to_path_buf(), false) } else { return Ok(None); }
        }
    };
    let parsed = fs::read_to_string(&path)
        .with_context(|| format!("read config {}", path.display()))
        .and_then(|s| serde_yaml::from_str::<Config>(&s).with_context(|| format!("parse config {}", path.display())));
    match parsed {
        Ok(cfg) => Ok(Some(cfg)),
        Err(e) if explicit => Err(e),
        Err(e) => {
            warn!("ignoring {}: {e:#}", path.display());
            Ok(None)
        }
    }
}

/// Connection and path flags shared by every subcommand.
#[derive(Debug, Default, Clone, Args)]
pub struct Overrides {
    /// Findings store API base URL, e.g. http://dojo:8080/api/v2
    #[arg(long, global = true)]
    pub dojo_base_url: Option<String>,
    /// Findings store API token
    #[arg(long, global = true)]
    pub dojo_api_token: Option<String>,
    /// Scanner base URL, e.g. https://scanner:3443
    #[arg(long, global = true, visible_alias = "acu-base-url")]
    pub scanner_base_url: Option<String>,
    /// Scanner API key
    #[arg(long, global = true, visible_alias = "acu-api-token")]
    pub scanner_api_token: Option<String>,
    /// Scanner node as JSON: {"endpoint": "...", "token": "...", "name": "..."}
    #[arg(long, global = true, visible_alias = "acu-node-json")]
    pub scanner_node_json: Option<String>,
    /// Verify the scanner's TLS certificate (off by default for self-signed appliances)
    #[arg(long, global = true)]
    pub scanner_verify_tls: bool,
    /// Directory holding nmap_<product_id>.xml documents
    #[arg(long, global = true)]
    pub xml_dir: Option<PathBuf>,
    /// Ports never turned into targets (comma/range list)
    #[arg(long, global = true)]
    pub exclude_ports: Option<String>,
    /// Directory for pt_targets_<id>.txt artifacts
    #[arg(long, global = true)]
    pub artifact_dir: Option<PathBuf>,
    /// Target mapping JSON file
    #[arg(long, global = true)]
    pub mapping_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq, Eq)]
pub struct ScannerNode {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

pub fn parse_scanner_node(raw: &str) -> Result<ScannerNode> {
    serde_json::from_str(raw).map_err(|e| anyhow!("invalid --scanner-node-json: {e}"))
}

/// Fully resolved settings, assembled once in `main`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub dojo_base_url: String,
    pub dojo_api_token: Option<String>,
    pub scanner_base_url: Option<String>,
    pub scanner_api_token: Option<String>,
    pub scanner_node_name: Option<String>,
    pub scanner_verify_tls: bool,
    pub xml_dir: PathBuf,
    pub exclude_ports: String,
    pub artifact_dir: PathBuf,
    pub mapping_file: PathBuf,
    pub http_timeout: Duration,
}

impl Settings {
    /// Precedence: flags, then the scanner node JSON, then the config file, then the
    /// environment (read only through `env`), then built-in defaults.
    pub fn assemble(cli: &Overrides, file: Option<&Config>, env: &dyn Fn(&str) -> Option<String>) -> Result<Settings> {
        let node = match cli.scanner_node_json.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(raw) => parse_scanner_node(raw)?,
            None => ScannerNode::default(),
        };
        let lookup = |keys: &[&str]| keys.iter().find_map(|k| env(k).and_then(non_empty));
        let fs_cfg = file.and_then(|c| c.findings_store.clone()).unwrap_or_default();
        let sc_cfg = file.and_then(|c| c.scanner.clone()).unwrap_or_default();
        let nmap_cfg = file.and_then(|c| c.nmap.clone()).unwrap_or_default();

        let dojo_base_url = first([cli.dojo_base_url.clone(), fs_cfg.base_url, lookup(&["DOJO_BASE_URL"])])
            .unwrap_or_else(|| DEFAULT_DOJO_BASE_URL.to_string());
        let dojo_api_token = first([cli.dojo_api_token.clone(), fs_cfg.api_token, lookup(&["DOJO_API_TOKEN"])]);
        let scanner_base_url = first([
            cli.scanner_base_url.clone(),
            node.endpoint,
            sc_cfg.base_url,
            lookup(&["ACUNETIX_BASE_URL", "ACU_BASE_URL"]),
        ]);
        let scanner_api_token = first([
            cli.scanner_api_token.clone(),
            node.token,
            sc_cfg.api_token,
            lookup(&["ACUNETIX_API_KEY", "ACU_API_TOKEN"]),
        ]);
        let scanner_node_name = first([node.name, sc_cfg.node_name]);
        let scanner_verify_tls = cli.scanner_verify_tls || sc_cfg.verify_tls.unwrap_or(false);

        let xml_dir = cli
            .xml_dir
            .clone()
            .or(nmap_cfg.xml_dir)
            .or_else(|| lookup(&["NMAP_XML_DIR"]).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_XML_DIR));
        let exclude_ports = first([cli.exclude_ports.clone(), nmap_cfg.exclude_ports, lookup(&["EXCLUDE_PORTS"])])
            .unwrap_or_else(|| DEFAULT_EXCLUDE_PORTS.to_string());
        let artifact_dir = cli
            .artifact_dir
            .clone()
            .or(nmap_cfg.artifact_dir)
            .or_else(|| lookup(&["PT_TARGETS_ARTIFACT_DIR"]).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACT_DIR));
        let mapping_file = cli
            .mapping_file
            .clone()
            .or_else(|| file.and_then(|c| c.mapping_file.clone()))
            .or_else(|| lookup(&["ACUNETIX_TARGET_MAPPING_FILE"]).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MAPPING_FILE));
        let http_timeout = Duration::from_secs(file.and_then(|c| c.http_timeout_secs).unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS).max(1));

        Ok(Settings {
            dojo_base_url,
            dojo_api_token,
            scanner_base_url,
            scanner_api_token,
            scanner_node_name,
            scanner_verify_tls,
            xml_dir,
            exclude_ports,
            artifact_dir,
            mapping_file,
            http_timeout,
        })
    }

    pub fn require_dojo_token(&self) -> Result<&str> {
        self.dojo_api_token.as_deref().ok_or_else(|| anyhow!("findings store token is required: pass --dojo-api-token or set DOJO_API_TOKEN"))
    }

    pub fn require_scanner(&self) -> Result<(&str, &str)> {
        let base = self
            .scanner_base_url
            .as_deref()
            .ok_or_else(|| anyhow!("scanner endpoint is required: pass --scanner-base-url or --scanner-node-json"))?;
        let token = self
            .scanner_api_token
            .as_deref()
            .ok_or_else(|| anyhow!("scanner token is required: pass --scanner-api-token or --scanner-node-json"))?;
        Ok((base, token))
    }
}

fn non_empty(s: String) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

fn first<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates.into_iter().flatten().find_map(non_empty)
}
