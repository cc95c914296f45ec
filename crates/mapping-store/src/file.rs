use crate::models::{MappingEntry, MappingItem, SaveSummary, TargetMapping, SCHEMA_VERSION};
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::warn;

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| String::new())
}

/// The mapping file plus its location. Written back wholesale on save.
#[derive(Debug, Clone)]
pub struct MappingFile {
    path: PathBuf,
    mapping: TargetMapping,
}

impl MappingFile {
    /// Load the file at `path`. A missing file starts empty. A file that is not a
    /// JSON object is logged and replaced on the next save; inside an object, items
    /// that do not decode as [`MappingEntry`] are kept verbatim.
    pub fn open_or_create(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mapping = match fs::read_to_string(&path) {
            Ok(s) => decode(&s).unwrap_or_else(|| {
                warn!(path = %path.display(), "mapping file is not a JSON object, starting fresh");
                TargetMapping::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => TargetMapping::default(),
            Err(e) => {
                warn!(path = %path.display(), "mapping file unreadable, starting fresh: {e}");
                TargetMapping::default()
            }
        };
        MappingFile { path, mapping }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mapping(&self) -> &TargetMapping {
        &self.mapping
    }

    pub fn entry(&self, item_id: &str) -> Option<&MappingEntry> {
        self.mapping.items.get(item_id).and_then(MappingItem::entry)
    }

    /// Insert `resolved` (item id -> remote id); matching keys are overwritten and
    /// every other entry is kept. Returns the number of entries written.
    pub fn merge(&mut self, resolved: &BTreeMap<String, String>, group_id: i64, source_endpoint: &str) -> usize {
        let endpoint = source_endpoint.trim_end_matches('/');
        for (item, remote) in resolved {
            self.mapping.items.insert(
                item.clone(),
                MappingItem::Entry(MappingEntry {
                    remote_id: remote.clone(),
                    group_id,
                    source_endpoint: endpoint.to_string(),
                }),
            );
        }
        resolved.len()
    }

    /// Stamp and write the whole mapping, creating parent directories as needed.
    pub fn save(&mut self, saved: usize) -> Result<SaveSummary> {
        self.mapping.updated_at = Some(now_rfc3339());
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let body = serde_json::to_string(&self.mapping)?;
        fs::write(&self.path, body).with_context(|| format!("write {}", self.path.display()))?;
        Ok(SaveSummary { path: self.path.clone(), saved, total_items: self.mapping.items.len() })
    }
}

fn decode(raw: &str) -> Option<TargetMapping> {
    let Value::Object(mut top) = serde_json::from_str::<Value>(raw).ok()? else {
        return None;
    };
    let items = match top.remove("items") {
        Some(Value::Object(items)) => items.into_iter().map(|(k, v)| (k, MappingItem::from(v))).collect(),
        Some(other) => {
            warn!("mapping items is not an object, dropping: {other}");
            BTreeMap::new()
        }
        None => BTreeMap::new(),
    };
    let updated_at = top.get("updated_at").and_then(Value::as_str).map(str::to_string);
    Some(TargetMapping { updated_at, version: SCHEMA_VERSION, items })
}
