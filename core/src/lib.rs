//! Core types and pure algorithms for reconciling scan targets across the
//! findings store and the scanner: address normalization, target-list building,
//! marked-block merging and remote-id reconciliation.

pub mod address;
pub mod error;
pub mod inventory;
pub mod marked_block;
pub mod outcome;
pub mod paging;
pub mod reconcile;
pub mod target_list;

pub use address::{canonical_host, looks_like_ip, normalize_address, to_target, CanonicalHost, ScanTarget, Scheme};
pub use error::{Error, Result};
pub use inventory::{accessible_named_hosts, submitted_targets, AssetRecord};
pub use marked_block::{extract, upsert, upsert_verified, MarkerPair};
pub use outcome::{BatchReport, ItemFailure};
pub use reconcile::{reconcile, Reconciliation, RemoteTarget, SubmittedTarget};
pub use target_list::{PortFinding, TargetLine, TargetListBuilder};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
