//! `ptsync subdomains`: enumerate subdomains of a root domain and keep per-domain
//! artifacts plus a rolling `summary.json`.

use anyhow::{Context, Result};
use ptsync_core::address::is_valid_domain;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use subdomains::{
    enumerate, norm_domain, resolve_all, SubdomainSource, DEFAULT_RESOLVE_CONCURRENCY, DEFAULT_RESOLVE_TIMEOUT, KNOWN_SOURCES,
};
use time::OffsetDateTime;
use tracing::{info, warn};

use super::Report;

pub const INVALID_DOMAIN_EXIT: u8 = 2;

#[derive(Debug, Clone)]
pub struct SubdomainsOptions {
    pub domain: String,
    pub per_source_timeout: Duration,
    pub resolve: bool,
    pub out_dir: PathBuf,
    pub json_output: bool,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SubEntry {
    Host(String),
    Resolved { host: String, ips: Vec<String> },
}

#[derive(Debug, Serialize)]
pub struct Artifacts {
    pub txt: PathBuf,
    pub json: PathBuf,
}

/// Written to `<domain>.subs.json`; stdout adds `ok` on top.
#[derive(Debug, Serialize)]
pub struct SubdomainsResult {
    pub domain: String,
    pub count: usize,
    pub subs: Vec<SubEntry>,
    pub sources: BTreeMap<String, bool>,
    pub artifacts: Artifacts,
}

#[derive(Debug, Serialize)]
struct Printed<'a> {
    ok: bool,
    #[serde(flatten)]
    result: &'a SubdomainsResult,
}

pub async fn run(opts: &SubdomainsOptions, sources: &[Box<dyn SubdomainSource>]) -> Result<Report> {
    let domain = norm_domain(&opts.domain);
    if !is_valid_domain(&domain) {
        warn!(domain = %opts.domain, "invalid domain");
        let mut report = Report::from_summary(false, &json!({ "ok": false, "error": "invalid_domain", "domain": opts.domain }))?;
        report.exit_code = INVALID_DOMAIN_EXIT;
        return Ok(report);
    }
    fs::create_dir_all(&opts.out_dir).with_context(|| format!("create {}", opts.out_dir.display()))?;
    let started = Instant::now();

    let found = enumerate(&domain, sources, opts.per_source_timeout).await;
    let (hosts, resolved) = if opts.resolve && !found.is_empty() {
        let resolved = resolve_all(found.into_iter().collect(), DEFAULT_RESOLVE_CONCURRENCY, DEFAULT_RESOLVE_TIMEOUT).await;
        (resolved.keys().cloned().collect::<Vec<_>>(), resolved)
    } else {
        (found.into_iter().collect::<Vec<_>>(), BTreeMap::new())
    };

    let txt = absolute(&opts.out_dir.join(format!("{domain}.subs.txt")))?;
    let json_path = absolute(&opts.out_dir.join(format!("{domain}.subs.json")))?;
    let body = if hosts.is_empty() { String::new() } else { format!("{}\n", hosts.join("\n")) };
    fs::write(&txt, body).with_context(|| format!("write {}", txt.display()))?;

    let subs = hosts
        .iter()
        .map(|h| {
            if opts.resolve {
                SubEntry::Resolved { host: h.clone(), ips: resolved.get(h).cloned().unwrap_or_default() }
            } else {
                SubEntry::Host(h.clone())
            }
        })
        .collect();
    let result = SubdomainsResult {
        domain: domain.clone(),
        count: hosts.len(),
        subs,
        sources: KNOWN_SOURCES
            .iter()
            .map(|known| (known.to_string(), sources.iter().any(|s| s.name() == *known)))
            .collect(),
        artifacts: Artifacts { txt, json: json_path.clone() },
    };
    fs::write(&json_path, serde_json::to_string_pretty(&result)?).with_context(|| format!("write {}", json_path.display()))?;

    if let Err(e) = update_summary(&opts.out_dir.join("summary.json"), &domain, hosts.len()) {
        warn!("summary.json not updated: {e:#}");
    }
    info!(%domain, count = hosts.len(), elapsed = ?started.elapsed(), "subdomain enumeration finished");

    let mut report = Report::from_summary(true, &Printed { ok: true, result: &result })?;
    if !opts.json_output {
        let lines: Vec<String> = hosts
            .iter()
            .map(|h| match resolved.get(h) {
                Some(ips) if opts.resolve => format!("{h} {}", ips.join(",")),
                _ => h.clone(),
            })
            .collect();
        report.text = Some(lines.join("\n"));
    }
    Ok(report)
}

/// Merge `{count, ts}` for `domain` into the summary file, keeping other domains.
fn update_summary(path: &Path, domain: &str, count: usize) -> Result<()> {
    let mut summary: Map<String, Value> = match fs::read_to_string(path) {
        Ok(s) => serde_json::from_str(&s).unwrap_or_default(),
        Err(_) => Map::new(),
    };
    summary.insert(domain.to_string(), json!({ "count": count, "ts": OffsetDateTime::now_utc().unix_timestamp() }));
    fs::write(path, serde_json::to_string_pretty(&summary)?)?;
    Ok(())
}

fn absolute(p: &Path) -> Result<PathBuf> {
    if p.is_absolute() {
        Ok(p.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(p))
    }
}
