//! Ordered, deduplicated target lines and their two persisted renderings:
//! the stand-alone artifact file and the block embedded in a description.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::address::{CanonicalHost, ScanTarget, Scheme};
use crate::error::{Error, Result};
use crate::marked_block::{self, SCANNER_TARGETS, TARGET_LIST};

static TARGET_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(https?://[^,\s]+),\s+(.+)$").expect("target line pattern compiles"));

/// Header line that opens the embedded scanner-targets block.
pub const SCANNER_TARGETS_HEADER: &str = "Acunetix targets:";

/// One open web-like port seen in a scan document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PortFinding {
    pub ip: String,
    pub port: u16,
    pub protocol: Scheme,
}

impl PortFinding {
    pub fn new(ip: impl Into<String>, port: u16, protocol: Scheme) -> Self {
        PortFinding { ip: ip.into(), port, protocol }
    }

    /// Product name used for the finding in the findings store: `ip:port`.
    pub fn product_name(&self) -> String {
        if self.ip.contains(':') { format!("[{}]:{}", self.ip, self.port) } else { format!("{}:{}", self.ip, self.port) }
    }

    pub fn target(&self) -> ScanTarget {
        ScanTarget::new(self.protocol, self.ip.clone(), Some(self.port))
    }
}

/// `<target>, <label>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetLine {
    pub target: ScanTarget,
    pub label: String,
}

impl TargetLine {
    pub fn new(target: ScanTarget, label: impl Into<String>) -> Self {
        TargetLine { target, label: label.into() }
    }
}

impl fmt::Display for TargetLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.target, self.label)
    }
}

impl FromStr for TargetLine {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let caps = TARGET_LINE_RE
            .captures(line.trim())
            .ok_or_else(|| Error::format(format!("invalid target line format: {line}")))?;
        let target = caps[1]
            .parse::<ScanTarget>()
            .map_err(|_| Error::format(format!("invalid target in line: {line}")))?;
        Ok(TargetLine::new(target, caps[2].trim_end()))
    }
}

impl Serialize for TargetLine {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Builds the persisted target list for one group.
///
/// Order: the primary host, then known accessible hosts sorted, then `ip:port`
/// findings sorted by line. Duplicate lines keep their first position.
#[derive(Debug, Clone)]
pub struct TargetListBuilder {
    label: String,
    primary: Option<CanonicalHost>,
    hosts: BTreeSet<CanonicalHost>,
    ip_ports: BTreeMap<(String, u16), Scheme>,
}

impl TargetListBuilder {
    pub fn new(label: impl Into<String>) -> Self {
        TargetListBuilder { label: label.into(), primary: None, hosts: BTreeSet::new(), ip_ports: BTreeMap::new() }
    }

    /// Ignored unless the host is a domain.
    pub fn primary(mut self, host: Option<CanonicalHost>) -> Self {
        self.primary = host.filter(CanonicalHost::is_domain);
        self
    }

    pub fn known_hosts(mut self, hosts: impl IntoIterator<Item = CanonicalHost>) -> Self {
        self.hosts.extend(hosts);
        self
    }

    /// Findings for the same `(ip, port)` collapse to one line; when their
    /// protocols disagree, `https` wins regardless of input order.
    pub fn findings(mut self, findings: impl IntoIterator<Item = PortFinding>) -> Self {
        for f in findings {
            self.ip_ports
                .entry((f.ip, f.port))
                .and_modify(|p| *p = (*p).max(f.protocol))
                .or_insert(f.protocol);
        }
        self
    }

    pub fn build(self) -> Vec<TargetLine> {
        let label = self.label;
        let https_line = |h: &CanonicalHost| TargetLine::new(ScanTarget::new(Scheme::Https, h.as_str(), None), label.clone());

        let mut lines: Vec<TargetLine> = Vec::new();
        lines.extend(self.primary.iter().map(https_line));
        lines.extend(self.hosts.iter().map(https_line));

        let mut ip_lines: Vec<TargetLine> = self
            .ip_ports
            .into_iter()
            .map(|((ip, port), scheme)| TargetLine::new(ScanTarget::new(scheme, ip, Some(port)), label.clone()))
            .collect();
        ip_lines.sort_by_cached_key(|l| l.to_string());
        lines.extend(ip_lines);

        let mut seen = HashSet::new();
        lines.retain(|l| seen.insert(l.to_string()));
        lines
    }
}

fn join_lines(lines: &[TargetLine]) -> String {
    lines.iter().map(|l| l.to_string()).collect::<Vec<_>>().join("\n")
}

fn parse_lines(body: &str) -> Result<Vec<TargetLine>> {
    body.lines().map(str::trim).filter(|l| !l.is_empty()).map(|l| l.parse::<TargetLine>()).collect()
}

/// `PT_TARGET_LIST_START\n<lines>\nPT_TARGET_LIST_END\n`, self-checked before
/// it is returned.
pub fn render_target_list(lines: &[TargetLine]) -> Result<String> {
    let body = join_lines(lines);
    let content = format!("{}\n", marked_block::upsert_verified("", TARGET_LIST, &body)?);
    let parsed = parse_target_list(&content)?;
    if parsed.len() != lines.len() {
        return Err(Error::format("target list self-check lost lines"));
    }
    Ok(content)
}

/// Strict reader for the artifact file: the markers must wrap the whole document
/// and every non-blank line must be a well-formed target line.
pub fn parse_target_list(content: &str) -> Result<Vec<TargetLine>> {
    let trimmed = content.trim();
    if !trimmed.starts_with(TARGET_LIST.start) || !trimmed.ends_with(TARGET_LIST.end) {
        return Err(Error::format("artifact markers are missing or malformed"));
    }
    parse_lines(&marked_block::extract(trimmed, TARGET_LIST)?)
}

/// Body of the embedded scanner block: the header line followed by the targets.
pub fn render_scanner_block_body(lines: &[TargetLine]) -> String {
    if lines.is_empty() {
        SCANNER_TARGETS_HEADER.to_string()
    } else {
        format!("{SCANNER_TARGETS_HEADER}\n{}", join_lines(lines))
    }
}

/// Merge the scanner-targets block into a free-text description, leaving every
/// other part of the text (including the state block) untouched.
pub fn merge_scanner_block(description: &str, lines: &[TargetLine]) -> Result<String> {
    marked_block::upsert_verified(description, SCANNER_TARGETS, &render_scanner_block_body(lines))
}

pub fn parse_scanner_block(description: &str) -> Result<Vec<TargetLine>> {
    let body = marked_block::extract(description, SCANNER_TARGETS)?;
    let rest = body
        .strip_prefix(SCANNER_TARGETS_HEADER)
        .ok_or_else(|| Error::format(format!("{} block lacks the '{SCANNER_TARGETS_HEADER}' header", SCANNER_TARGETS.start)))?;
    parse_lines(rest)
}
