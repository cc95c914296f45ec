use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingEntry {
    pub remote_id: String,
    /// Product type the item was synced under.
    pub group_id: i64,
    /// Scanner endpoint the remote id belongs to.
    pub source_endpoint: String,
}

/// One stored item. Entries written by other tools or older layouts are carried
/// through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MappingItem {
    Entry(MappingEntry),
    Foreign(Value),
}

impl MappingItem {
    pub fn entry(&self) -> Option<&MappingEntry> {
        match self {
            MappingItem::Entry(e) => Some(e),
            MappingItem::Foreign(_) => None,
        }
    }
}

impl From<Value> for MappingItem {
    fn from(value: Value) -> Self {
        match serde_json::from_value::<MappingEntry>(value.clone()) {
            Ok(entry) => MappingItem::Entry(entry),
            Err(_) => MappingItem::Foreign(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetMapping {
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default = "schema_version")]
    pub version: u32,
    #[serde(default)]
    pub items: BTreeMap<String, MappingItem>,
}

fn schema_version() -> u32 {
    SCHEMA_VERSION
}

impl Default for TargetMapping {
    fn default() -> Self {
        TargetMapping { updated_at: None, version: SCHEMA_VERSION, items: BTreeMap::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveSummary {
    pub path: PathBuf,
    /// Entries written by this run.
    pub saved: usize,
    pub total_items: usize,
}
