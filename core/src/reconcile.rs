//! Join locally submitted targets to the identifiers the scanner assigned them.
//!
//! The join key is [`normalize_address`]: a literal, case-insensitive match with
//! trailing slashes removed. Targets the scanner has not listed yet are reported as
//! unresolved rather than failing the run.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::address::{normalize_address, ScanTarget};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmittedTarget {
    pub item_id: String,
    pub target: ScanTarget,
}

impl SubmittedTarget {
    pub fn new(item_id: impl Into<String>, target: ScanTarget) -> Self {
        SubmittedTarget { item_id: item_id.into(), target }
    }
}

/// A target as echoed or listed by the scanner, with every address-like field it
/// carried.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTarget {
    pub remote_id: String,
    pub addresses: Vec<String>,
}

impl RemoteTarget {
    pub fn new<I, S>(remote_id: impl Into<String>, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RemoteTarget { remote_id: remote_id.into(), addresses: addresses.into_iter().map(Into::into).collect() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// item id -> remote id, at most one entry per item.
    pub resolved: BTreeMap<String, String>,
    pub unresolved: Vec<String>,
}

/// Bulk-create echoes are consulted first; the full listing only fills gaps.
pub fn reconcile(submitted: &[SubmittedTarget], bulk_created: &[RemoteTarget], listing: &[RemoteTarget]) -> Reconciliation {
    let mut by_address: HashMap<String, &str> = HashMap::new();
    for remote in bulk_created.iter().chain(listing) {
        let id = remote.remote_id.trim();
        if id.is_empty() {
            continue;
        }
        for addr in &remote.addresses {
            let key = normalize_address(addr);
            if !key.is_empty() {
                by_address.entry(key).or_insert(id);
            }
        }
    }

    let mut out = Reconciliation::default();
    for item in submitted {
        if out.resolved.contains_key(&item.item_id) || out.unresolved.contains(&item.item_id) {
            continue;
        }
        match by_address.get(&item.target.normalized()) {
            Some(id) => {
                out.resolved.insert(item.item_id.clone(), id.to_string());
            }
            None => out.unresolved.push(item.item_id.clone()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::to_target;

    fn submitted(id: &str, raw: &str) -> SubmittedTarget {
        SubmittedTarget::new(id, to_target(raw).unwrap())
    }

    #[test]
    fn bulk_response_takes_precedence_over_listing() {
        let items = [submitted("1", "example.com"), submitted("2", "10.0.0.5:8080")];
        let bulk = [RemoteTarget::new("t-bulk", ["https://example.com"])];
        let listing = [
            RemoteTarget::new("t-old", ["https://EXAMPLE.com/"]),
            RemoteTarget::new("t-ip", ["http://10.0.0.5:8080/"]),
        ];
        let r = reconcile(&items, &bulk, &listing);
        assert_eq!(r.resolved.get("1").map(String::as_str), Some("t-bulk"));
        assert_eq!(r.resolved.get("2").map(String::as_str), Some("t-ip"));
        assert!(r.unresolved.is_empty());
    }

    #[test]
    fn missing_targets_are_unresolved_not_errors() {
        let items = [submitted("1", "example.com"), submitted("9", "other.example.com")];
        let listing = [RemoteTarget::new("t1", ["https://example.com"])];
        let r = reconcile(&items, &[], &listing);
        assert_eq!(r.resolved.len(), 1);
        assert_eq!(r.unresolved, vec!["9".to_string()]);
    }

    #[test]
    fn join_is_literal_not_semantic() {
        let items = [submitted("1", "https://www.example.com")];
        let listing = [RemoteTarget::new("t1", ["https://example.com"])];
        assert!(reconcile(&items, &[], &listing).resolved.is_empty());
    }

    #[test]
    fn blank_ids_and_addresses_are_ignored() {
        let items = [submitted("1", "example.com")];
        let listing = [RemoteTarget::new("", ["https://example.com"]), RemoteTarget::new("t2", ["", "https://example.com"])];
        assert_eq!(reconcile(&items, &[], &listing).resolved.get("1").map(String::as_str), Some("t2"));
    }

    #[test]
    fn each_item_maps_at_most_once() {
        let items = [submitted("1", "example.com"), submitted("1", "10.0.0.1:8080")];
        let listing = [RemoteTarget::new("a", ["https://example.com"]), RemoteTarget::new("b", ["http://10.0.0.1:8080"])];
        let r = reconcile(&items, &[], &listing);
        assert_eq!(r.resolved.len(), 1);
        assert_eq!(r.resolved["1"], "a");
    }
}
