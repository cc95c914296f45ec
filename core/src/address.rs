//! Address normalization: product names, URLs and `ip:port` strings into
//! canonical hosts and scheme-qualified scan targets.
//!
//! Nothing here fails loudly. Input that carries no usable host yields `None`
//! and the caller drops the item.

use serde::{Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::str::FromStr;
use url::{Host, Url};

use crate::error::Error;

/// Ports on which a bare `ip:port` is assumed to speak TLS.
pub const TLS_PORTS: [u16; 2] = [8443, 9443];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    /// Scheme inferred for a bare IP literal with an explicit port.
    pub fn for_port(port: u16) -> Self {
        if TLS_PORTS.contains(&port) { Scheme::Https } else { Scheme::Http }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(Error::UnusableInput(format!("unsupported scheme: {other}"))),
        }
    }
}

impl Serialize for Scheme {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Lowercase host with `www.` and surrounding dots removed, or an IP literal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalHost(String);

impl CanonicalHost {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.0.parse().ok()
    }

    pub fn is_ip(&self) -> bool {
        self.ip().is_some()
    }

    /// A dotted, non-IP name. Bare words such as a group label are not domains.
    pub fn is_domain(&self) -> bool {
        !self.is_ip() && self.0.contains('.')
    }
}

impl fmt::Display for CanonicalHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for CanonicalHost {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// A scheme-qualified address a scanner will scan: `scheme://host[:port]`.
///
/// Equality and hashing go through [`ScanTarget::normalized`], so two targets are
/// the same iff their normalized address strings match.
#[derive(Debug, Clone)]
pub struct ScanTarget {
    pub scheme: Scheme,
    pub host: String,
    pub port: Option<u16>,
}

impl ScanTarget {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: Option<u16>) -> Self {
        ScanTarget { scheme, host: host.into(), port }
    }

    pub fn is_ip(&self) -> bool {
        self.host.parse::<IpAddr>().is_ok()
    }

    /// Join key used against remote listings.
    pub fn normalized(&self) -> String {
        normalize_address(&self.to_string())
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]", self.scheme, self.host)?;
        } else {
            write!(f, "{}://{}", self.scheme, self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

impl PartialEq for ScanTarget {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for ScanTarget {}

impl Hash for ScanTarget {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl FromStr for ScanTarget {
    type Err = Error;

    /// Strict: only `http://` / `https://` forms are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !has_web_scheme(s.trim()) {
            return Err(Error::UnusableInput(format!("not a scheme-qualified target: {s}")));
        }
        to_target(s).ok_or_else(|| Error::UnusableInput(s.to_string()))
    }
}

impl Serialize for ScanTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Lowercase, trim and strip trailing slashes. A literal address match key, not a
/// semantic host comparison.
pub fn normalize_address(raw: &str) -> String {
    raw.trim().to_lowercase().trim_end_matches('/').to_string()
}

pub fn looks_like_ip(value: &str) -> bool {
    value.trim().parse::<IpAddr>().is_ok()
}

/// Canonical host used for storage and labeling.
///
/// Scheme, userinfo, path and port are removed, the result is lowercased and a
/// leading `www.` plus surrounding dots are stripped.
pub fn canonical_host(raw: &str) -> Option<CanonicalHost> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let host = if has_web_scheme(raw) {
        host_of(&Url::parse(raw).ok()?)?
    } else {
        split_bare(raw)?.host
    };
    let host = host.trim().trim_matches('.');
    let host = host.strip_prefix("www.").unwrap_or(host);
    usable_host(host).then(|| CanonicalHost(host.to_string()))
}

/// Scan target for a product name, URL or `ip:port`.
///
/// - `http(s)://` input keeps its scheme, host and explicit port, default or not.
/// - a bare IP literal with a port gets `https` on 8443/9443, `http` otherwise.
/// - a bare IP without a port gets `https`.
/// - a domain always gets `https`, loses its port and a leading `www.`.
pub fn to_target(raw: &str) -> Option<ScanTarget> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if has_web_scheme(raw) {
        let url = Url::parse(raw).ok()?;
        let scheme = url.scheme().parse().ok()?;
        let host = host_of(&url)?;
        if !usable_host(&host) {
            return None;
        }
        return Some(ScanTarget::new(scheme, host, url.port().or_else(|| authority_port(raw))));
    }

    let parts = split_bare(raw)?;
    let host = parts.host.trim().trim_end_matches('.');
    if !usable_host(host) {
        return None;
    }
    match (host.parse::<IpAddr>(), parts.port) {
        (Ok(ip), Some(port)) => Some(ScanTarget::new(Scheme::for_port(port), ip.to_string(), Some(port))),
        (Ok(ip), None) => Some(ScanTarget::new(Scheme::Https, ip.to_string(), None)),
        (Err(_), _) => {
            let bare = host.strip_prefix("www.").unwrap_or(host);
            usable_host(bare).then(|| ScanTarget::new(Scheme::Https, bare, None))
        }
    }
}

/// Syntactic domain check: 1..=253 chars, dot-separated labels of `[a-z0-9-]`
/// (max 63 each) and an alphabetic TLD of at least two letters.
pub fn is_valid_domain(name: &str) -> bool {
    let name = name.trim();
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() || name.len() > 253 || name.starts_with('-') {
        return false;
    }
    let labels: Vec<&str> = name.split('.').collect();
    let Some((tld, rest)) = labels.split_last() else { return false };
    if rest.is_empty() {
        return false;
    }
    let label_ok = |l: &str| !l.is_empty() && l.len() <= 63 && l.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    rest.iter().all(|l| label_ok(l)) && (2..=63).contains(&tld.len()) && tld.chars().all(|c| c.is_ascii_alphabetic())
}

/// Port written in the authority of an already validated URL. `Url::port` hides
/// ports equal to the scheme default; an explicit `:443` is kept.
fn authority_port(raw: &str) -> Option<u16> {
    let (_, rest) = raw.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let port = match host_port.rfind(']') {
        Some(close) => host_port[close + 1..].strip_prefix(':')?,
        None => host_port.rsplit_once(':')?.1,
    };
    parse_port(port)
}

struct BareParts {
    host: String,
    port: Option<u16>,
}

fn has_web_scheme(raw: &str) -> bool {
    let lowered = raw.get(..8).unwrap_or(raw).to_ascii_lowercase();
    lowered.starts_with("http://") || lowered.starts_with("https://")
}

fn host_of(url: &Url) -> Option<String> {
    match url.host()? {
        Host::Domain(d) => Some(d.to_lowercase()),
        Host::Ipv4(ip) => Some(ip.to_string()),
        Host::Ipv6(ip) => Some(ip.to_string()),
    }
}

/// Bare form: drop the path and userinfo, lowercase, then peel `[v6]:port` or a
/// single `host:port`. A digit-only port outside 1..=65535 makes the input unusable.
fn split_bare(raw: &str) -> Option<BareParts> {
    let base = raw.split('/').next().unwrap_or_default().trim();
    let base = match base.rsplit_once('@') {
        Some((_, host)) => host.trim(),
        None => base,
    };
    let base = base.to_lowercase();

    if let Some(rest) = base.strip_prefix('[') {
        let close = rest.find(']')?;
        let port = match rest[close + 1..].strip_prefix(':') {
            Some(p) if is_digits(p) => Some(parse_port(p)?),
            _ => None,
        };
        return Some(BareParts { host: rest[..close].trim().to_string(), port });
    }
    if base.matches(':').count() == 1 {
        if let Some((host, port)) = base.split_once(':') {
            if is_digits(port) {
                return Some(BareParts { host: host.to_string(), port: Some(parse_port(port)?) });
            }
        }
    }
    Some(BareParts { host: base, port: None })
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn parse_port(s: &str) -> Option<u16> {
    s.parse::<u16>().ok().filter(|p| *p != 0)
}

/// Hosts are written into comma-separated target lines; whitespace, commas and
/// brackets cannot be represented there.
fn usable_host(host: &str) -> bool {
    !host.is_empty() && !host.chars().any(|c| c.is_whitespace() || matches!(c, ',' | '[' | ']' | '/' | '@'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(raw: &str) -> String {
        to_target(raw).map(|t| t.to_string()).unwrap_or_default()
    }

    fn host(raw: &str) -> String {
        canonical_host(raw).map(|h| h.to_string()).unwrap_or_default()
    }

    #[test]
    fn canonical_host_strips_scheme_path_and_www() {
        for d in ["example.com", "shop.example.org", "a-b.example.co.uk"] {
            assert_eq!(host(&format!("https://WWW.{d}/path")), d);
            assert_eq!(host(&format!("http://www.{d}:8080/x?y=1")), d);
        }
    }

    #[test]
    fn canonical_host_handles_bare_forms() {
        assert_eq!(host("Example.COM."), "example.com");
        assert_eq!(host("admin:secret@www.example.com/login"), "example.com");
        assert_eq!(host("example.com:8443"), "example.com");
        assert_eq!(host("10.0.0.5:8080"), "10.0.0.5");
        assert_eq!(host("[2001:db8::1]:9443"), "2001:db8::1");
    }

    #[test]
    fn canonical_host_rejects_unusable() {
        assert!(canonical_host("").is_none());
        assert!(canonical_host("   ").is_none());
        assert!(canonical_host("/only/a/path").is_none());
        assert!(canonical_host("https://").is_none());
        assert!(canonical_host("Acme Corp").is_none());
        assert!(canonical_host("host:99999").is_none());
    }

    #[test]
    fn ip_with_tls_port_is_https() {
        for ip in ["10.0.0.5", "192.168.1.1", "8.8.8.8"] {
            for port in [8443u16, 9443] {
                assert_eq!(target(&format!("{ip}:{port}")), format!("https://{ip}:{port}"));
            }
            for port in [80u16, 8080, 3000, 443] {
                assert_eq!(target(&format!("{ip}:{port}")), format!("http://{ip}:{port}"));
            }
        }
    }

    #[test]
    fn ipv6_targets_are_bracketed() {
        assert_eq!(target("[2001:DB8::1]:8443"), "https://[2001:db8::1]:8443");
        assert_eq!(target("[::1]:8080"), "http://[::1]:8080");
    }

    #[test]
    fn domain_targets_are_https_without_port_or_www() {
        assert_eq!(target("www.Example.com"), "https://example.com");
        assert_eq!(target("example.com:8080"), "https://example.com");
        assert_eq!(target("user@example.com/admin"), "https://example.com");
        assert_eq!(target("10.0.0.9"), "https://10.0.0.9");
    }

    #[test]
    fn scheme_qualified_input_keeps_scheme_and_port() {
        assert_eq!(target("HTTP://Example.com:8081/app/"), "http://example.com:8081");
        assert_eq!(target("https://10.1.1.1:8080"), "https://10.1.1.1:8080");
        assert_eq!(target("https://www.example.com"), "https://www.example.com");
    }

    #[test]
    fn explicit_default_ports_are_kept() {
        assert_eq!(target("https://example.com:443"), "https://example.com:443");
        assert_eq!(target("http://10.0.0.1:80"), "http://10.0.0.1:80");
        assert_eq!(target("HTTPS://user:pw@Example.com:443/login?x=1"), "https://example.com:443");
        assert_eq!(target("https://[2001:db8::1]:443/"), "https://[2001:db8::1]:443");
        assert_eq!(target("https://example.com"), "https://example.com");
        assert_eq!(target("https://user:pw@example.com/"), "https://example.com");
    }

    #[test]
    fn unusable_targets_are_none() {
        assert!(to_target("").is_none());
        assert!(to_target("https://").is_none());
        assert!(to_target("some product name").is_none());
        assert!(to_target("10.0.0.1:0").is_none());
    }

    #[test]
    fn target_equality_uses_normalized_address() {
        let a = ScanTarget::new(Scheme::Http, "10.0.0.5", Some(8080));
        let b: ScanTarget = "HTTP://10.0.0.5:8080/".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.normalized(), "http://10.0.0.5:8080");
        assert!("10.0.0.5:8080".parse::<ScanTarget>().is_err());
    }

    #[test]
    fn normalize_address_is_literal() {
        assert_eq!(normalize_address(" HTTPS://Example.com/// "), "https://example.com");
        assert_eq!(normalize_address("https://www.example.com"), "https://www.example.com");
    }

    #[test]
    fn domain_validation() {
        assert!(is_valid_domain("example.com"));
        assert!(is_valid_domain("dev-1.api.example.io."));
        assert!(!is_valid_domain("localhost"));
        assert!(!is_valid_domain("-bad.example.com"));
        assert!(!is_valid_domain("example.c0m"));
        assert!(!is_valid_domain("exa_mple.com"));
        assert!(!is_valid_domain(""));
    }

    #[test]
    fn canonical_host_classification() {
        assert!(canonical_host("10.0.0.1").unwrap().is_ip());
        assert!(canonical_host("example.com").unwrap().is_domain());
        assert!(!canonical_host("intranet").unwrap().is_domain());
    }
}
