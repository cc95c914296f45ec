//! `ptsync set-internet`: record nmap liveness on a product and clear its
//! `needs:nmap` tag.

use anyhow::{Context, Result};
use findings_store::DojoClient;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::info;

use super::Report;

pub const NEEDS_NMAP_TAG: &str = "needs:nmap";

#[derive(Debug, Clone)]
pub struct SetInternetOptions {
    pub product_id: i64,
    pub xml: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct SetInternetSummary {
    pub ok: bool,
    pub product_id: i64,
    pub internet_accessible: bool,
    pub tags: Vec<String>,
}

/// Current tags without `needs:nmap`, deduplicated and sorted.
pub fn cleared_tags(tags: &[String]) -> Vec<String> {
    tags.iter().filter(|t| t.as_str() != NEEDS_NMAP_TAG).cloned().collect::<BTreeSet<_>>().into_iter().collect()
}

pub async fn run(client: &DojoClient, opts: &SetInternetOptions) -> Result<Report> {
    let document = std::fs::read_to_string(&opts.xml).with_context(|| format!("read {}", opts.xml.display()))?;
    let up = nmap_ports::host_is_up(&document)?;
    let product = client.product(opts.product_id).await?;
    let tags = cleared_tags(&product.tags);
    client.patch_product(opts.product_id, up, &tags).await?;
    info!(product = opts.product_id, up, "updated internet accessibility");
    let summary = SetInternetSummary { ok: true, product_id: opts.product_id, internet_accessible: up, tags };
    Report::from_summary(true, &summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn tag_cleanup() {
        let tags = vec!["web".to_string(), "needs:nmap".to_string(), "alpha".to_string(), "web".to_string()];
        assert_eq!(cleared_tags(&tags), vec!["alpha", "web"]);
    }

    #[tokio::test]
    async fn patches_liveness_and_tags() {
        let dir = tempfile::tempdir().unwrap();
        let xml = dir.path().join("nmap_5.xml");
        std::fs::write(&xml, r#"<nmaprun><host><status state="down" reason="no-response"/><address addr="10.0.0.9" addrtype="ipv4"/></host></nmaprun>"#).unwrap();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/products/5/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 5, "name": "10.0.0.9", "tags": [{"name": "needs:nmap"}, {"name": "ext"}]})))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/api/v2/products/5/"))
            .and(body_json(json!({"internet_accessible": false, "tags": ["ext"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 5})))
            .expect(1)
            .mount(&server)
            .await;

        let client = DojoClient::new(&format!("{}/api/v2", server.uri()), "t", Duration::from_secs(5)).unwrap();
        let report = run(&client, &SetInternetOptions { product_id: 5, xml }).await.unwrap();
        assert!(report.is_ok());
        assert_eq!(report.summary["internet_accessible"], false);
    }

    #[tokio::test]
    async fn unreadable_document_is_an_error() {
        let server = MockServer::start().await;
        let client = DojoClient::new(&server.uri(), "t", Duration::from_secs(5)).unwrap();
        let opts = SetInternetOptions { product_id: 5, xml: PathBuf::from("/nonexistent/nmap_5.xml") };
        assert!(run(&client, &opts).await.is_err());
    }
}
