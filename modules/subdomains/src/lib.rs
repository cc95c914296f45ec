//! Subdomain enumeration through external tools, plus an optional resolvability filter.
//!
//! Sources are best effort by contract: a missing binary, a spawn failure, a non-zero
//! exit or a timeout all produce an empty set, and the tool's stderr is discarded.
//! Callers treat "no subdomains" and "tool unavailable" the same way.

use async_trait::async_trait;
use ptsync_core::address::is_valid_domain;
use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tracing::debug;

pub const DEFAULT_RESOLVE_CONCURRENCY: usize = 32;
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(2);

/// One way of discovering subdomains of a root domain.
#[async_trait]
pub trait SubdomainSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Raw candidate names; never fails, see the module docs.
    async fn run(&self, domain: &str, limit: Duration) -> BTreeSet<String>;
}

/// `assetfinder --subs-only <domain>`
#[derive(Debug, Default, Clone, Copy)]
pub struct Assetfinder;

/// `sublist3r -d <domain> -n -t 50`, falling back to `python3 -m sublist3r` when the
/// console script is not installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sublist3r;

#[async_trait]
impl SubdomainSource for Assetfinder {
    fn name(&self) -> &'static str {
        "assetfinder"
    }

    async fn run(&self, domain: &str, limit: Duration) -> BTreeSet<String> {
        match run_tool("assetfinder", &["--subs-only", domain], limit).await {
            ToolRun::Output(out) => filter_names(&out, domain),
            _ => BTreeSet::new(),
        }
    }
}

#[async_trait]
impl SubdomainSource for Sublist3r {
    fn name(&self) -> &'static str {
        "sublist3r"
    }

    async fn run(&self, domain: &str, limit: Duration) -> BTreeSet<String> {
        let args = ["-d", domain, "-n", "-t", "50"];
        let mut run = run_tool("sublist3r", &args, limit).await;
        if matches!(run, ToolRun::Missing) {
            let module_args: Vec<&str> = ["-m", "sublist3r"].into_iter().chain(args).collect();
            run = run_tool("python3", &module_args, limit).await;
            if matches!(run, ToolRun::Missing) {
                run = run_tool("python", &module_args, limit).await;
            }
        }
        match run {
            ToolRun::Output(out) => filter_names(&out, domain),
            _ => BTreeSet::new(),
        }
    }
}

/// Command-line names of every backend, in reporting order.
pub const KNOWN_SOURCES: [&str; 2] = ["assetfinder", "sublist3r"];

/// Look up a source by its command-line name.
pub fn source_by_name(name: &str) -> Option<Box<dyn SubdomainSource>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "assetfinder" => Some(Box::new(Assetfinder)),
        "sublist3r" => Some(Box::new(Sublist3r)),
        _ => None,
    }
}

enum ToolRun {
    Output(String),
    Missing,
    Failed,
}

async fn run_tool(program: &str, args: &[&str], limit: Duration) -> ToolRun {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();
    let child = match child {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return ToolRun::Missing,
        Err(e) => {
            debug!(program, "spawn failed: {e}");
            return ToolRun::Failed;
        }
    };
    match timeout(limit, child.wait_with_output()).await {
        Ok(Ok(out)) if out.status.success() => ToolRun::Output(String::from_utf8_lossy(&out.stdout).into_owned()),
        Ok(Ok(out)) => {
            debug!(program, status = %out.status, "tool exited unsuccessfully");
            ToolRun::Failed
        }
        Ok(Err(e)) => {
            debug!(program, "wait failed: {e}");
            ToolRun::Failed
        }
        Err(_) => {
            debug!(program, "timed out after {:?}", limit);
            ToolRun::Failed
        }
    }
}

fn filter_names(output: &str, root: &str) -> BTreeSet<String> {
    output
        .lines()
        .map(norm_domain)
        .filter(|s| is_valid_domain(s) && is_sub_of(s, root))
        .collect()
}

/// Lowercase, drop an http(s) scheme, any path or port, and trailing dots.
pub fn norm_domain(name: &str) -> String {
    let s = name.trim().to_lowercase();
    let s = s.strip_prefix("http://").or_else(|| s.strip_prefix("https://")).unwrap_or(&s);
    let host = s.split('/').next().unwrap_or_default();
    let host = host.split(':').next().unwrap_or_default();
    host.trim_end_matches('.').to_string()
}

/// True when `sub` is `root` itself or a name under it.
pub fn is_sub_of(sub: &str, root: &str) -> bool {
    let (sub, root) = (norm_domain(sub), norm_domain(root));
    !root.is_empty() && (sub == root || sub.ends_with(&format!(".{root}")))
}

/// Union of every source's names, normalized and restricted to valid names under `domain`.
pub async fn enumerate(domain: &str, sources: &[Box<dyn SubdomainSource>], per_source: Duration) -> BTreeSet<String> {
    let domain = norm_domain(domain);
    let mut collected = BTreeSet::new();
    for source in sources {
        let found = source.run(&domain, per_source).await;
        debug!(source = source.name(), count = found.len(), "source finished");
        collected.extend(found);
    }
    collected
        .iter()
        .map(|s| norm_domain(s))
        .filter(|s| is_valid_domain(s) && is_sub_of(s, &domain))
        .collect()
}

/// Resolve one host to its distinct addresses, in resolver order; empty on failure or timeout.
pub async fn resolve_host(host: &str, per_lookup: Duration) -> Vec<String> {
    let host = norm_domain(host);
    let mut ips: Vec<String> = Vec::new();
    if let Ok(Ok(addrs)) = timeout(per_lookup, tokio::net::lookup_host((host.as_str(), 0))).await {
        for sa in addrs {
            let ip = sa.ip().to_string();
            if !ips.contains(&ip) {
                ips.push(ip);
            }
        }
    }
    ips
}

/// Resolve hosts with bounded concurrency; only hosts with at least one address are kept.
pub async fn resolve_all(hosts: Vec<String>, concurrency: usize, per_lookup: Duration) -> BTreeMap<String, Vec<String>> {
    let (tx, mut rx) = mpsc::channel::<(String, Vec<String>)>(hosts.len().max(1));
    let sem = Arc::new(Semaphore::new(concurrency.max(1)));
    for host in hosts {
        let Ok(permit) = sem.clone().acquire_owned().await else { break };
        let txc = tx.clone();
        tokio::spawn(async move {
            let ips = resolve_host(&host, per_lookup).await;
            if !ips.is_empty() {
                let _ = txc.send((host, ips)).await;
            }
            drop(permit);
        });
    }
    drop(tx);
    let mut resolved = BTreeMap::new();
    while let Some((host, ips)) = rx.recv().await {
        resolved.insert(host, ips);
    }
    resolved
}
