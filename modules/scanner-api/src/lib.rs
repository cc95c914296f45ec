//! REST client for the vulnerability scanner (Acunetix API v1).
//!
//! Endpoints used:
//! - GET   /api/v1/target_groups            (cursor pagination)
//! - POST  /api/v1/target_groups
//! - GET   /api/v1/target_groups/:id/targets
//! - POST  /api/v1/targets/add              (bulk add into one group)
//! - GET   /api/v1/targets                  (cursor pagination)
//! - GET   /api/v1/targets/:id/configuration
//! - PATCH /api/v1/targets/:id/configuration

use std::collections::HashSet;
use std::time::Duration;

use ptsync_core::paging::{next_cursor, page_items};
use ptsync_core::RemoteTarget;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

pub const DEFAULT_SCAN_SPEED: &str = "sequential";
const PAGE_LIMIT: usize = 100;

/// Address fields carried by a bulk-add echo.
const ECHO_ADDRESS_FIELDS: [&str; 3] = ["address", "addressValue", "target"];
/// Address fields carried by the target listing.
const LISTING_ADDRESS_FIELDS: [&str; 2] = ["address", "target"];

#[derive(Debug, thiserror::Error)]
pub enum ScannerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("scanner returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("scanner client not configured: {0}")]
    NotConfigured(String),
}

pub type Result<T> = std::result::Result<T, ScannerError>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TargetGroup {
    #[serde(default, deserialize_with = "lenient_string")]
    pub group_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
}

/// Exact-name lookup; the first group with the name wins.
pub fn find_group_by_name<'a>(groups: &'a [TargetGroup], name: &str) -> Option<&'a TargetGroup> {
    groups.iter().find(|g| g.name == name)
}

/// Targets in a scanner response body, with the given address-like fields.
pub fn remote_targets(body: &Value, fields: &[&str]) -> Vec<RemoteTarget> {
    page_items(body, "targets")
        .iter()
        .filter_map(|t| {
            let id = value_string(t.get("target_id")?);
            if id.trim().is_empty() {
                return None;
            }
            let addresses = fields.iter().filter_map(|f| t.get(*f)).map(value_string).filter(|a| !a.trim().is_empty());
            Some(RemoteTarget::new(id.trim(), addresses))
        })
        .collect()
}

fn value_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(value_string(&Value::deserialize(d)?))
}

#[derive(Debug, Clone)]
pub struct AcunetixClient {
    http: Client,
    base_url: String,
    token: String,
}

impl AcunetixClient {
    /// `verify_tls = false` accepts the self-signed certificates scanner appliances ship with.
    pub fn new(base_url: &str, token: &str, verify_tls: bool, timeout: Duration) -> Result<Self> {
        if base_url.trim().is_empty() {
            return Err(ScannerError::NotConfigured("scanner endpoint is required".into()));
        }
        if token.trim().is_empty() {
            return Err(ScannerError::NotConfigured("scanner API token is required".into()));
        }
        let http = Client::builder().timeout(timeout).danger_accept_invalid_certs(!verify_tls).build()?;
        Ok(AcunetixClient {
            http,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send_accepting(&self, req: RequestBuilder, accept: impl Fn(u16) -> bool) -> Result<Value> {
        let res = req.header("X-Auth", &self.token).header("Accept", "application/json").send().await?;
        let status = res.status().as_u16();
        let text = res.text().await.unwrap_or_default();
        if !accept(status) {
            return Err(ScannerError::Api { status, body: text });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Value> {
        self.send_accepting(req, |s| (200..300).contains(&s)).await
    }

    /// Walk a cursor-paginated listing, collecting the array under `key`.
    async fn list_all(&self, path: &str, limit_param: &str, key: &str) -> Result<Vec<Value>> {
        let first = self.api_url(&format!("{path}?{limit_param}={PAGE_LIMIT}"));
        let mut url = first.clone();
        let mut seen_cursors = HashSet::new();
        let mut items = Vec::new();
        loop {
            let page = self.send(self.http.get(&url)).await?;
            items.extend(page_items(&page, key).iter().cloned());
            let Some(cursor) = next_cursor(&page) else { break };
            if !seen_cursors.insert(cursor.clone()) {
                warn!(path, %cursor, "listing repeated a cursor; stopping");
                break;
            }
            url = format!("{first}&c={cursor}");
        }
        debug!(path, count = items.len(), "listing complete");
        Ok(items)
    }

    pub async fn list_groups(&self) -> Result<Vec<TargetGroup>> {
        self.list_all("/target_groups", "limit", "groups")
            .await?
            .into_iter()
            .map(|g| serde_json::from_value(g).map_err(ScannerError::from))
            .collect()
    }

    pub async fn create_group(&self, name: &str, description: &str) -> Result<TargetGroup> {
        let body = json!({ "name": name, "description": description });
        let v = self.send(self.http.post(self.api_url("/target_groups")).json(&body)).await?;
        Ok(serde_json::from_value(v)?)
    }

    /// Bulk-add `addresses` into `group_id`. Only 200 and 201 count as accepted.
    /// Returns the targets echoed back by the scanner.
    pub async fn add_targets(&self, group_id: &str, description: &str, addresses: &[String]) -> Result<Vec<RemoteTarget>> {
        let body = add_targets_payload(group_id, description, addresses);
        let v = self
            .send_accepting(self.http.post(self.api_url("/targets/add")).json(&body), |s| s == 200 || s == 201)
            .await?;
        Ok(remote_targets(&v, &ECHO_ADDRESS_FIELDS))
    }

    pub async fn list_targets(&self) -> Result<Vec<RemoteTarget>> {
        let raw = self.list_all("/targets", "l", "targets").await?;
        Ok(remote_targets(&json!({ "targets": raw }), &LISTING_ADDRESS_FIELDS))
    }

    pub async fn group_target_ids(&self, group_id: &str) -> Result<Vec<String>> {
        let v = self.send(self.http.get(self.api_url(&format!("/target_groups/{group_id}/targets")))).await?;
        Ok(page_items(&v, "target_id_list").iter().map(value_string).filter(|s| !s.is_empty()).collect())
    }

    /// Current `scan_speed` of a target, if its configuration carries one.
    pub async fn target_scan_speed(&self, target_id: &str) -> Result<Option<String>> {
        let v = self.send(self.http.get(self.api_url(&format!("/targets/{target_id}/configuration")))).await?;
        Ok(v.get("scan_speed").and_then(Value::as_str).map(str::to_string))
    }

    /// Only 200 and 204 count as applied.
    pub async fn set_target_scan_speed(&self, target_id: &str, speed: &str) -> Result<()> {
        let url = self.api_url(&format!("/targets/{target_id}/configuration"));
        self.send_accepting(self.http.patch(url).json(&json!({ "scan_speed": speed })), |s| s == 200 || s == 204)
            .await?;
        Ok(())
    }
}

/// Body of a bulk add; also shown as a preview on dry runs.
pub fn add_targets_payload(group_id: &str, description: &str, addresses: &[String]) -> Value {
    let targets: Vec<Value> = addresses
        .iter()
        .map(|a| json!({ "addressValue": a, "address": a, "description": description, "web_asset_id": "" }))
        .collect();
    json!({ "targets": targets, "groups": [group_id] })
}
