//! Asset records as read from the findings store, and the two views the sync
//! commands derive from them.

use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

use crate::address::{canonical_host, to_target, CanonicalHost};
use crate::reconcile::SubmittedTarget;

/// One product (asset) of a product type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetRecord {
    pub id: i64,
    pub name: String,
    pub internet_accessible: bool,
}

impl AssetRecord {
    pub fn new(id: i64, name: impl Into<String>, internet_accessible: bool) -> Self {
        AssetRecord { id, name: name.into(), internet_accessible }
    }
}

/// Canonical non-IP hosts of every internet-accessible record, single-label names
/// included. IP-named records are covered by scan findings instead.
pub fn accessible_named_hosts(records: &[AssetRecord]) -> BTreeSet<CanonicalHost> {
    records
        .iter()
        .filter(|r| r.internet_accessible)
        .filter_map(|r| canonical_host(&r.name))
        .filter(|h| !h.is_ip())
        .collect()
}

/// Scan targets for internet-accessible records, first record wins per target.
pub fn submitted_targets(records: &[AssetRecord]) -> Vec<SubmittedTarget> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for r in records.iter().filter(|r| r.internet_accessible) {
        let Some(target) = to_target(&r.name) else {
            debug!(id = r.id, name = %r.name, "skipping product without a usable address");
            continue;
        };
        if seen.insert(target.clone()) {
            out.push(SubmittedTarget::new(r.id.to_string(), target));
        }
    }
    out
}
