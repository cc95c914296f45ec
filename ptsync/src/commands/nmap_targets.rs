//! `ptsync nmap-targets`: turn the nmap results of one product type into IP products
//! and the strict target-list artifact.

use anyhow::{Context, Result};
use findings_store::{DojoClient, NewProduct, Product};
use ptsync_core::target_list::{merge_scanner_block, render_target_list};
use ptsync_core::{accessible_named_hosts, canonical_host, AssetRecord, BatchReport, PortFinding, TargetLine, TargetListBuilder};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::Report;

#[derive(Debug, Clone)]
pub struct NmapTargetsOptions {
    pub product_type_id: i64,
    pub xml_dir: PathBuf,
    pub exclude_ports: BTreeSet<u16>,
    pub artifact_dir: PathBuf,
    pub dry_run: bool,
    pub update_description: bool,
}

#[derive(Debug, Serialize)]
pub struct NmapTargetsSummary {
    pub ok: bool,
    pub product_type_id: i64,
    pub product_type_name: String,
    pub products_count: usize,
    pub xml_dir: PathBuf,
    pub exclude_ports: Vec<u16>,
    pub targets_artifact_dir: PathBuf,
    pub dry_run: bool,
    pub created_ip_products: BatchReport,
    pub targets_artifact_path: Option<PathBuf>,
    pub targets_artifact_count: usize,
    pub updated_description: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Target lines for a product type plus the `ip:port` products it still lacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPlan {
    pub lines: Vec<TargetLine>,
    pub missing_products: Vec<String>,
}

pub fn plan(label: &str, products: &[Product], findings: Vec<PortFinding>) -> TargetPlan {
    let existing: HashSet<&str> = products.iter().map(|p| p.name.as_str()).collect();
    let missing: BTreeSet<String> =
        findings.iter().map(PortFinding::product_name).filter(|n| !existing.contains(n.as_str())).collect();
    let records: Vec<AssetRecord> = products.iter().filter_map(Product::to_record).collect();
    let lines = TargetListBuilder::new(label)
        .primary(canonical_host(label))
        .known_hosts(accessible_named_hosts(&records))
        .findings(findings)
        .build();
    TargetPlan { lines, missing_products: missing.into_iter().collect() }
}

pub fn artifact_path(dir: &Path, product_type_id: i64) -> PathBuf {
    dir.join(format!("pt_targets_{product_type_id}.txt"))
}

fn write_artifact(dir: &Path, product_type_id: i64, lines: &[TargetLine]) -> Result<PathBuf> {
    let content = render_target_list(lines)?;
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = artifact_path(dir, product_type_id);
    fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

pub async fn run(client: &DojoClient, opts: &NmapTargetsOptions) -> Result<Report> {
    let id = opts.product_type_id;
    let product_type = client.product_type(id).await?;
    let name = product_type.display_name(id);
    let products = client.products_for_type(id).await?;

    let mut findings = Vec::new();
    for p in products.iter().filter_map(|p| p.id) {
        let xml = opts.xml_dir.join(format!("nmap_{p}.xml"));
        let found = nmap_ports::extract_file(&xml, &opts.exclude_ports);
        debug!(product = p, count = found.len(), "scan findings");
        findings.extend(found);
    }
    let plan = plan(&name, &products, findings);
    info!(product_type = id, products = products.len(), lines = plan.lines.len(), missing = plan.missing_products.len(), "planned target list");

    let mut created = BatchReport::new();
    for product_name in &plan.missing_products {
        if opts.dry_run {
            created.skip(product_name.clone());
            continue;
        }
        let new = NewProduct {
            name: product_name.clone(),
            prod_type: id,
            description: format!("Auto-created from nmap XML in {}", opts.xml_dir.display()),
            internet_accessible: true,
        };
        let result = client.create_product(&new).await;
        if let Err(e) = &result {
            warn!(product = %product_name, "create failed: {e}");
        }
        created.record(product_name.clone(), result);
    }

    let mut summary = NmapTargetsSummary {
        ok: false,
        product_type_id: id,
        product_type_name: name,
        products_count: products.len(),
        xml_dir: opts.xml_dir.clone(),
        exclude_ports: opts.exclude_ports.iter().copied().collect(),
        targets_artifact_dir: opts.artifact_dir.clone(),
        dry_run: opts.dry_run,
        created_ip_products: created,
        targets_artifact_path: None,
        targets_artifact_count: 0,
        updated_description: false,
        error: None,
    };

    match write_artifact(&opts.artifact_dir, id, &plan.lines) {
        Ok(path) => {
            info!(path = %path.display(), lines = plan.lines.len(), "wrote target list");
            summary.targets_artifact_path = Some(path);
            summary.targets_artifact_count = plan.lines.len();
        }
        Err(e) => summary.error = Some(format!("failed_write_targets_artifact: {e:#}")),
    }

    if opts.update_description && summary.error.is_none() {
        match merge_scanner_block(&product_type.description, &plan.lines) {
            Ok(merged) if merged == product_type.description => debug!("description already current"),
            Ok(_) if opts.dry_run => {}
            Ok(merged) => match client.patch_product_type_description(id, &merged).await {
                Ok(_) => summary.updated_description = true,
                Err(e) => summary.error = Some(format!("failed_update_description: {e}")),
            },
            Err(e) => summary.error = Some(format!("failed_update_description: {e}")),
        }
    }

    summary.ok = summary.error.is_none();
    Report::from_summary(summary.ok, &summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptsync_core::target_list::{merge_scanner_block, parse_target_list};
    use ptsync_core::Scheme;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const XML: &str = r#"<?xml version="1.0"?>
<nmaprun>
  <host>
    <status state="up"/>
    <address addr="10.0.0.5" addrtype="ipv4"/>
    <ports>
      <port protocol="tcp" portid="443"><state state="open"/><service name="https" tunnel="ssl"/></port>
      <port protocol="tcp" portid="8443"><state state="open"/><service name="http" tunnel="ssl"/></port>
      <port protocol="tcp" portid="8080"><state state="open"/><service name="http-proxy"/></port>
      <port protocol="tcp" portid="22"><state state="open"/><service name="ssh"/></port>
    </ports>
  </host>
</nmaprun>"#;

    fn product(id: i64, name: &str, accessible: bool) -> Product {
        serde_json::from_value(json!({"id": id, "name": name, "internet_accessible": accessible})).unwrap()
    }

    async fn dojo(server: &MockServer, description: &str) {
        Mock::given(method("GET"))
            .and(path("/api/v2/product_types/7/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 7, "name": "www.example.com", "description": description})))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/products/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"next": null, "results": [
                {"id": 1, "name": "shop.example.com", "internet_accessible": true},
                {"id": 2, "name": "10.0.0.5:8443", "internet_accessible": true},
                {"id": 3, "name": "legacy.example.com", "internet_accessible": false}
            ]})))
            .mount(server)
            .await;
    }

    fn options(dir: &Path, dry_run: bool, update_description: bool) -> NmapTargetsOptions {
        NmapTargetsOptions {
            product_type_id: 7,
            xml_dir: dir.to_path_buf(),
            exclude_ports: [80, 443].into_iter().collect(),
            artifact_dir: dir.join("artifacts"),
            dry_run,
            update_description,
        }
    }

    fn client(server: &MockServer) -> DojoClient {
        DojoClient::new(&format!("{}/api/v2", server.uri()), "t", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn plan_orders_and_finds_missing_products() {
        let products = vec![product(1, "shop.example.com", true), product(2, "10.0.0.5:8443", true), product(3, "Acme", true)];
        let findings = vec![
            PortFinding::new("10.0.0.5", 8443, Scheme::Https),
            PortFinding::new("10.0.0.5", 8080, Scheme::Http),
            PortFinding::new("10.0.0.5", 8080, Scheme::Https),
        ];
        let plan = plan("Acme", &products, findings);
        let lines: Vec<String> = plan.lines.iter().map(|l| l.to_string()).collect();
        assert_eq!(
            lines,
            vec![
                "https://acme, Acme",
                "https://shop.example.com, Acme",
                "https://10.0.0.5:8080, Acme",
                "https://10.0.0.5:8443, Acme"
            ]
        );
        assert_eq!(plan.missing_products, vec!["10.0.0.5:8080"]);
    }

    #[tokio::test]
    async fn creates_missing_products_and_writes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("nmap_1.xml"), XML).unwrap();
        let server = MockServer::start().await;
        dojo(&server, "").await;
        Mock::given(method("POST"))
            .and(path("/api/v2/products/"))
            .and(body_json(json!({
                "name": "10.0.0.5:8080", "prod_type": 7,
                "description": format!("Auto-created from nmap XML in {}", dir.path().display()),
                "internet_accessible": true
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 40, "name": "10.0.0.5:8080"})))
            .expect(1)
            .mount(&server)
            .await;

        let report = run(&client(&server), &options(dir.path(), false, false)).await.unwrap();
        assert!(report.is_ok(), "{}", report.summary);
        assert_eq!(report.summary["created_ip_products"]["succeeded"], json!(["10.0.0.5:8080"]));

        let content = fs::read_to_string(dir.path().join("artifacts/pt_targets_7.txt")).unwrap();
        assert_eq!(
            content,
            "PT_TARGET_LIST_START\n\
             https://example.com, www.example.com\n\
             https://shop.example.com, www.example.com\n\
             http://10.0.0.5:8080, www.example.com\n\
             https://10.0.0.5:8443, www.example.com\n\
             PT_TARGET_LIST_END\n"
        );
        assert_eq!(parse_target_list(&content).unwrap().len(), 4);
        assert_eq!(report.summary["targets_artifact_count"], 4);
    }

    #[tokio::test]
    async fn domain_line_precedes_discovered_ip_port() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("nmap_2.xml"),
            r#"<nmaprun><host><status state="up"/><address addr="10.0.0.5" addrtype="ipv4"/><ports>
<port protocol="tcp" portid="8080"><state state="open"/><service name="http"/></port>
</ports></host></nmaprun>"#,
        )
        .unwrap();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/product_types/9/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 9, "name": "Acme", "description": ""})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/products/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"next": null, "results": [
                {"id": 1, "name": "example.com", "internet_accessible": true},
                {"id": 2, "name": "10.0.0.5:8080", "internet_accessible": false}
            ]})))
            .mount(&server)
            .await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(201)).expect(0).mount(&server).await;

        let opts = NmapTargetsOptions { product_type_id: 9, ..options(dir.path(), false, false) };
        let report = run(&client(&server), &opts).await.unwrap();
        assert!(report.is_ok(), "{}", report.summary);
        let content = fs::read_to_string(dir.path().join("artifacts/pt_targets_9.txt")).unwrap();
        assert_eq!(content, "PT_TARGET_LIST_START\nhttps://example.com, Acme\nhttp://10.0.0.5:8080, Acme\nPT_TARGET_LIST_END\n");
    }

    #[tokio::test]
    async fn failed_creation_is_collected_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("nmap_2.xml"), XML).unwrap();
        let server = MockServer::start().await;
        dojo(&server, "").await;
        Mock::given(method("POST"))
            .and(path("/api/v2/products/"))
            .respond_with(ResponseTemplate::new(400).set_body_string("{\"name\":[\"exists\"]}"))
            .mount(&server)
            .await;

        let report = run(&client(&server), &options(dir.path(), false, false)).await.unwrap();
        assert!(report.is_ok());
        assert_eq!(report.summary["created_ip_products"]["failed"][0]["item"], "10.0.0.5:8080");
        assert!(dir.path().join("artifacts/pt_targets_7.txt").exists());
    }

    #[tokio::test]
    async fn dry_run_writes_nothing_remote() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("nmap_1.xml"), XML).unwrap();
        let server = MockServer::start().await;
        dojo(&server, "notes").await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(201)).expect(0).mount(&server).await;
        Mock::given(method("PATCH")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

        let report = run(&client(&server), &options(dir.path(), true, true)).await.unwrap();
        assert!(report.is_ok());
        assert_eq!(report.summary["created_ip_products"]["skipped"], json!(["10.0.0.5:8080"]));
        assert_eq!(report.summary["updated_description"], false);
    }

    #[tokio::test]
    async fn description_block_is_merged_around_state_block() {
        let dir = tempfile::tempdir().unwrap();
        let description = "Scope agreed 2026-09-01\n\nPT_STATE_JSON_START\n{\"stage\":\"recon\"}\nPT_STATE_JSON_END";
        let server = MockServer::start().await;
        dojo(&server, description).await;

        let expected_lines: Vec<TargetLine> =
            ["https://example.com, www.example.com", "https://shop.example.com, www.example.com"].iter().map(|l| l.parse().unwrap()).collect();
        let expected = merge_scanner_block(description, &expected_lines).unwrap();
        assert!(expected.starts_with(description));
        Mock::given(method("PATCH"))
            .and(path("/api/v2/product_types/7/"))
            .and(body_json(json!({"description": expected})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 7, "name": "www.example.com"})))
            .expect(1)
            .mount(&server)
            .await;

        let report = run(&client(&server), &options(dir.path(), false, true)).await.unwrap();
        assert!(report.is_ok(), "{}", report.summary);
        assert_eq!(report.summary["updated_description"], true);
    }

    #[tokio::test]
    async fn unwritable_artifact_dir_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("artifacts");
        fs::write(&blocker, "not a directory").unwrap();
        let server = MockServer::start().await;
        dojo(&server, "").await;

        let report = run(&client(&server), &options(dir.path(), true, false)).await.unwrap();
        assert!(!report.is_ok());
        assert!(report.summary["error"].as_str().unwrap().starts_with("failed_write_targets_artifact"));
    }
}
