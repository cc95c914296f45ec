//! REST client for the findings store (DefectDojo API v2).
//!
//! Endpoints used:
//! - GET   /product_types/:id/
//! - PATCH /product_types/:id/      (description only)
//! - GET   /products/?prod_type=:id (offset pagination with a `next` link)
//! - GET   /products/:id/
//! - POST  /products/
//! - PATCH /products/:id/           (internet_accessible and tags only)

use std::collections::HashSet;
use std::time::Duration;

use ptsync_core::paging::{next_link, page_items};
use ptsync_core::AssetRecord;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api/v2";
const PAGE_LIMIT: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("findings store returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("findings store client not configured: {0}")]
    NotConfigured(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Grouping entity; its name doubles as the scanner group name and target label.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProductType {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
}

impl ProductType {
    /// Name, or `PT-<id>` when the store has none.
    pub fn display_name(&self, fallback_id: i64) -> String {
        let name = self.name.trim();
        if name.is_empty() {
            format!("PT-{}", self.id.unwrap_or(fallback_id))
        } else {
            name.to_string()
        }
    }
}

/// One asset. Field types are coerced leniently: the store is not always consistent
/// about booleans, ids and tag shapes.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Product {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub internet_accessible: bool,
    #[serde(default, deserialize_with = "lenient_tags")]
    pub tags: Vec<String>,
}

impl Product {
    /// Records with no integer id cannot be mapped back and are dropped.
    pub fn to_record(&self) -> Option<AssetRecord> {
        self.id.map(|id| AssetRecord::new(id, self.name.clone(), self.internet_accessible))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewProduct {
    pub name: String,
    pub prod_type: i64,
    pub description: String,
    pub internet_accessible: bool,
}

/// Bool-like coercion: `"1"`, `"true"`, `"yes"`, `"y"`, `"on"` (any case) and non-zero
/// numbers are true; everything else is false.
pub fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    }
}

/// Integer id from a number or a digit string.
pub fn coerce_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Tag names from either a list of strings or a list of `{name}` objects.
pub fn normalize_tags(value: &Value) -> Vec<String> {
    value
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|t| match t {
            Value::String(s) => Some(s.clone()),
            Value::Object(o) => o.get("name").and_then(Value::as_str).map(str::to_string),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<bool, D::Error> {
    Ok(coerce_bool(&Value::deserialize(d)?))
}

fn lenient_id<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<i64>, D::Error> {
    Ok(coerce_id(&Value::deserialize(d)?))
}

fn lenient_tags<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<String>, D::Error> {
    Ok(normalize_tags(&Value::deserialize(d)?))
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct DojoClient {
    http: Client,
    base_url: String,
    token: String,
}

impl DojoClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(StoreError::NotConfigured("API token is required".into()));
        }
        let http = Client::builder().timeout(timeout).gzip(true).build()?;
        Ok(DojoClient {
            http,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, req: RequestBuilder) -> Result<Value> {
        let res = req
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(StoreError::Api { status: status.as_u16(), body });
        }
        let text = res.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn product_type(&self, id: i64) -> Result<ProductType> {
        let v = self.send(self.http.get(self.api_url(&format!("/product_types/{id}/")))).await?;
        Ok(serde_json::from_value(v)?)
    }

    /// Replace the product type description. Nothing else on the record is sent.
    pub async fn patch_product_type_description(&self, id: i64, description: &str) -> Result<ProductType> {
        let url = self.api_url(&format!("/product_types/{id}/"));
        let v = self.send(self.http.patch(url).json(&json!({ "description": description }))).await?;
        Ok(serde_json::from_value(v)?)
    }

    /// Every product of a product type, following `next` links until exhausted.
    pub async fn products_for_type(&self, product_type_id: i64) -> Result<Vec<Product>> {
        let mut url = self.api_url(&format!("/products/?prod_type={product_type_id}&limit={PAGE_LIMIT}&offset=0"));
        let mut visited = HashSet::new();
        let mut products = Vec::new();
        loop {
            visited.insert(url.clone());
            let page = self.send(self.http.get(&url)).await?;
            let items = page_items(&page, "results");
            for item in items {
                products.push(serde_json::from_value::<Product>(item.clone())?);
            }
            debug!(count = items.len(), total = products.len(), "fetched products page");
            if items.is_empty() {
                break;
            }
            match next_link(&page, &self.base_url) {
                Some(next) if visited.contains(&next) => {
                    warn!(%next, "product listing repeated a page; stopping");
                    break;
                }
                Some(next) => url = next,
                None => break,
            }
        }
        Ok(products)
    }

    pub async fn product(&self, id: i64) -> Result<Product> {
        let v = self.send(self.http.get(self.api_url(&format!("/products/{id}/")))).await?;
        Ok(serde_json::from_value(v)?)
    }

    pub async fn create_product(&self, product: &NewProduct) -> Result<Product> {
        let v = self.send(self.http.post(self.api_url("/products/")).json(product)).await?;
        Ok(serde_json::from_value(v)?)
    }

    /// Set accessibility and replace the tag list; other product fields are untouched.
    pub async fn patch_product(&self, id: i64, internet_accessible: bool, tags: &[String]) -> Result<Product> {
        let body = json!({ "internet_accessible": internet_accessible, "tags": tags });
        let v = self.send(self.http.patch(self.api_url(&format!("/products/{id}/"))).json(&body)).await?;
        Ok(serde_json::from_value(v)?)
    }
}
