//! Open web-port extraction from nmap XML (`-oX`) documents.
//!
//! Best effort by contract: a missing or unparsable document yields no findings so
//! one bad scan never aborts a batch.

use anyhow::{anyhow, Result};
use ptsync_core::{PortFinding, Scheme};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

/// Ports treated as web services even when nmap did not name them `http`.
pub const WEB_ALT_PORTS: [u16; 7] = [8000, 8008, 8080, 8443, 8888, 9000, 9443];
/// Ports that imply TLS when nmap reports no tunnel.
pub const TLS_PORTS: [u16; 2] = [8443, 9443];

#[derive(Debug, Default, Deserialize)]
struct NmapRun {
    #[serde(rename = "host", default)]
    hosts: Vec<NmapHost>,
}

#[derive(Debug, Default, Deserialize)]
struct NmapHost {
    status: Option<HostStatus>,
    #[serde(rename = "address", default)]
    addresses: Vec<Address>,
    ports: Option<Ports>,
}

#[derive(Debug, Default, Deserialize)]
struct HostStatus {
    #[serde(rename = "@state")]
    state: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Address {
    #[serde(rename = "@addr")]
    addr: Option<String>,
    #[serde(rename = "@addrtype")]
    addr_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Ports {
    #[serde(rename = "port", default)]
    ports: Vec<NmapPort>,
}

#[derive(Debug, Default, Deserialize)]
struct NmapPort {
    #[serde(rename = "@portid")]
    port_id: Option<String>,
    state: Option<PortState>,
    service: Option<Service>,
}

#[derive(Debug, Default, Deserialize)]
struct PortState {
    #[serde(rename = "@state")]
    state: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Service {
    #[serde(rename = "@name")]
    name: Option<String>,
    #[serde(rename = "@tunnel")]
    tunnel: Option<String>,
}

impl NmapHost {
    /// First IP address of the host, falling back to any address with a value.
    fn address(&self) -> Option<&str> {
        let with_addr = || self.addresses.iter().filter(|a| a.addr.as_deref().is_some_and(|s| !s.trim().is_empty()));
        with_addr()
            .find(|a| matches!(a.addr_type.as_deref(), Some("ipv4" | "ipv6")))
            .or_else(|| with_addr().next())
            .and_then(|a| a.addr.as_deref())
            .map(str::trim)
    }
}

impl NmapPort {
    fn finding(&self, ip: &str, excluded: &BTreeSet<u16>) -> Option<PortFinding> {
        if self.state.as_ref()?.state.as_deref()? != "open" {
            return None;
        }
        let port: u16 = self.port_id.as_deref()?.trim().parse().ok().filter(|p| *p != 0)?;
        if excluded.contains(&port) {
            return None;
        }
        let name = self.service.as_ref().and_then(|s| s.name.as_deref()).unwrap_or_default().to_lowercase();
        let tunnel = self.service.as_ref().and_then(|s| s.tunnel.as_deref()).unwrap_or_default().to_lowercase();
        let ssl = tunnel.contains("ssl");
        if !(name.contains("http") || ssl || WEB_ALT_PORTS.contains(&port)) {
            return None;
        }
        let protocol = if ssl || TLS_PORTS.contains(&port) { Scheme::Https } else { Scheme::Http };
        Some(PortFinding::new(ip, port, protocol))
    }
}

fn parse(document: &str) -> Result<NmapRun> {
    quick_xml::de::from_str(document).map_err(|e| anyhow!("nmap xml: {e}"))
}

/// Web-like open ports in `document`, in document order of hosts then ports,
/// skipping `excluded` port numbers.
pub fn extract(document: &str, excluded: &BTreeSet<u16>) -> Vec<PortFinding> {
    let run = match parse(document) {
        Ok(run) => run,
        Err(e) => {
            debug!("ignoring unparsable scan document: {e}");
            return Vec::new();
        }
    };
    let mut out = Vec::new();
    for host in &run.hosts {
        let (Some(ip), Some(ports)) = (host.address(), host.ports.as_ref()) else { continue };
        out.extend(ports.ports.iter().filter_map(|p| p.finding(ip, excluded)));
    }
    out
}

/// [`extract`] for a file on disk; a missing or unreadable file has no findings.
pub fn extract_file(path: &Path, excluded: &BTreeSet<u16>) -> Vec<PortFinding> {
    match std::fs::read_to_string(path) {
        Ok(doc) => extract(&doc, excluded),
        Err(e) => {
            debug!(path = %path.display(), "no scan document: {e}");
            Vec::new()
        }
    }
}

/// Liveness as reported by the first host that carries a status: `up` or not.
/// Unlike [`extract`] this is strict, the caller patches a record from the answer.
pub fn host_is_up(document: &str) -> Result<bool> {
    let run = parse(document)?;
    Ok(run
        .hosts
        .iter()
        .find_map(|h| h.status.as_ref()?.state.as_deref().filter(|s| !s.is_empty()))
        .is_some_and(|s| s.eq_ignore_ascii_case("up")))
}

/// Parse a comma-separated list of ports/ranges (e.g., "80,443", "8000-8010,9443").
pub fn parse_ports(spec: &str) -> Result<BTreeSet<u16>> {
    let mut ports = BTreeSet::new();
    for part in spec.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            let s: u16 = start.trim().parse()?;
            let e: u16 = end.trim().parse()?;
            if s == 0 || e == 0 || s > e {
                return Err(anyhow!("invalid port range: {}", part));
            }
            ports.extend(s..=e);
        } else {
            let p: u16 = part.parse()?;
            if p == 0 {
                return Err(anyhow!("invalid port: {}", part));
            }
            ports.insert(p);
        }
    }
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(ports: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<?xml-stylesheet href="file:///usr/share/nmap/nmap.xsl" type="text/xsl"?>
<nmaprun scanner="nmap" args="nmap -sV -oX - 10.0.0.5" version="7.94">
  <scaninfo type="syn" protocol="tcp" numservices="1000" services="1-1000"/>
  <verbose level="0"/>
  <host starttime="1" endtime="2">
    <status state="up" reason="syn-ack"/>
    <address addr="10.0.0.5" addrtype="ipv4"/>
    <hostnames><hostname name="app.local" type="PTR"/></hostnames>
    <ports>
      <extraports state="closed" count="990"/>
      {ports}
    </ports>
  </host>
  <runstats><finished time="2" elapsed="1.0"/><hosts up="1" down="0" total="1"/></runstats>
</nmaprun>"#
        )
    }

    fn port(id: u16, state: &str, service: &str) -> String {
        format!(r#"<port protocol="tcp" portid="{id}"><state state="{state}" reason="syn-ack"/>{service}</port>"#)
    }

    fn excl(ports: &[u16]) -> BTreeSet<u16> {
        ports.iter().copied().collect()
    }

    #[test]
    fn excluded_port_yields_nothing() {
        let d = doc(&port(443, "open", r#"<service name="https" tunnel="ssl"/>"#));
        assert!(extract(&d, &excl(&[80, 443])).is_empty());
    }

    #[test]
    fn ssl_tunnel_is_https() {
        let d = doc(&port(8443, "open", r#"<service name="http" tunnel="ssl"/>"#));
        assert_eq!(extract(&d, &excl(&[80, 443])), vec![PortFinding::new("10.0.0.5", 8443, Scheme::Https)]);
    }

    #[test]
    fn classification_rules() {
        let ports = [
            port(22, "open", r#"<service name="ssh"/>"#),
            port(3000, "open", r#"<service name="http" product="node"/>"#),
            port(8080, "open", r#"<service name="unknown"/>"#),
            port(9443, "open", ""),
            port(4443, "open", r#"<service name="unknown" tunnel="ssl"/>"#),
            port(8888, "filtered", r#"<service name="http"/>"#),
            port(5000, "open", r#"<service name="HTTP-Proxy"/>"#),
        ]
        .join("\n");
        let got = extract(&doc(&ports), &BTreeSet::new());
        assert_eq!(
            got,
            vec![
                PortFinding::new("10.0.0.5", 3000, Scheme::Http),
                PortFinding::new("10.0.0.5", 8080, Scheme::Http),
                PortFinding::new("10.0.0.5", 9443, Scheme::Https),
                PortFinding::new("10.0.0.5", 4443, Scheme::Https),
                PortFinding::new("10.0.0.5", 5000, Scheme::Http),
            ]
        );
    }

    #[test]
    fn open_filtered_is_not_open() {
        let d = doc(&port(8080, "open|filtered", ""));
        assert!(extract(&d, &BTreeSet::new()).is_empty());
    }

    #[test]
    fn malformed_documents_yield_nothing() {
        assert!(extract("<nmaprun><host>", &BTreeSet::new()).is_empty());
        assert!(extract("not xml at all", &BTreeSet::new()).is_empty());
        assert!(extract("", &BTreeSet::new()).is_empty());
    }

    #[test]
    fn hosts_without_address_or_ports_are_skipped() {
        let d = r#"<nmaprun>
  <host><status state="up"/><ports><port protocol="tcp" portid="8080"><state state="open"/></port></ports></host>
  <host><status state="up"/><address addr="10.0.0.7" addrtype="ipv4"/></host>
  <host><address addr="aa:bb:cc:dd:ee:ff" addrtype="mac"/><address addr="10.0.0.8" addrtype="ipv4"/>
    <ports><port protocol="tcp" portid="8000"><state state="open"/></port></ports></host>
</nmaprun>"#;
        assert_eq!(extract(d, &BTreeSet::new()), vec![PortFinding::new("10.0.0.8", 8000, Scheme::Http)]);
    }

    #[test]
    fn extract_file_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(extract_file(&dir.path().join("nmap_1.xml"), &BTreeSet::new()).is_empty());
        let path = dir.path().join("nmap_2.xml");
        std::fs::write(&path, doc(&port(8080, "open", ""))).unwrap();
        assert_eq!(extract_file(&path, &BTreeSet::new()).len(), 1);
    }

    #[test]
    fn liveness() {
        assert!(host_is_up(&doc("")).unwrap());
        let down = r#"<nmaprun><host><status state="down" reason="no-response"/><address addr="10.0.0.9" addrtype="ipv4"/></host></nmaprun>"#;
        assert!(!host_is_up(down).unwrap());
        assert!(!host_is_up("<nmaprun></nmaprun>").unwrap());
        assert!(host_is_up("<nmaprun><host>").is_err());
    }

    #[test]
    fn parse_simple_list() {
        assert_eq!(parse_ports("80,443").unwrap(), excl(&[80, 443]));
        assert_eq!(parse_ports(" 8000-8002 , 80,80 ").unwrap(), excl(&[80, 8000, 8001, 8002]));
        assert!(parse_ports("").unwrap().is_empty());
    }

    #[test]
    fn reject_invalid() {
        assert!(parse_ports("0").is_err());
        assert!(parse_ports("10-5").is_err());
        assert!(parse_ports("http").is_err());
    }
}
