//! `ptsync scanner-sync`: push a product type's internet-accessible products into a
//! scanner target group and persist which scanner target each product became.

use anyhow::Result;
use findings_store::{DojoClient, Product};
use mapping_store::{MappingFile, SaveSummary};
use ptsync_core::{reconcile, submitted_targets, AssetRecord, RemoteTarget, SubmittedTarget};
use scanner_api::{add_targets_payload, find_group_by_name, AcunetixClient};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

use super::Report;

pub const DRY_RUN_GROUP_ID: &str = "dry-run-group-id";
pub const DRY_RUN_TARGET_ID: &str = "dry-run-target-id";

#[derive(Debug, Clone)]
pub struct ScannerSyncOptions {
    pub product_type_id: i64,
    pub mapping_file: PathBuf,
    /// Reported only; the node's endpoint and token are already in the client.
    pub scanner_node_name: Option<String>,
    pub dry_run: bool,
}

/// Where a run stopped. Everything before the failing stage has already happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    LoadInventory,
    ListGroups,
    CreateGroup,
    AddTargets,
    ListTargets,
    PersistMapping,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStage::LoadInventory => "load_inventory",
            SyncStage::ListGroups => "list_groups",
            SyncStage::CreateGroup => "create_group",
            SyncStage::AddTargets => "add_targets",
            SyncStage::ListTargets => "list_targets",
            SyncStage::PersistMapping => "persist_mapping",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct StageError {
    stage: SyncStage,
    details: String,
}

trait AtStage<T> {
    fn at(self, stage: SyncStage) -> std::result::Result<T, StageError>;
}

impl<T, E: fmt::Display> AtStage<T> for std::result::Result<T, E> {
    fn at(self, stage: SyncStage) -> std::result::Result<T, StageError> {
        self.map_err(|e| StageError { stage, details: e.to_string() })
    }
}

#[derive(Debug, Default, Serialize)]
pub struct ScannerSyncSummary {
    pub ok: bool,
    pub dry_run: bool,
    pub product_type_id: i64,
    pub product_type_name: String,
    pub scanner_base_url: String,
    pub scanner_node_name: Option<String>,
    pub products_total: usize,
    pub targets_prepared: Vec<String>,
    pub group_id: Option<String>,
    pub group_created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub add_payload_preview: Option<Value>,
    pub target_mapping: BTreeMap<String, String>,
    pub unresolved_item_ids: Vec<String>,
    pub mapping_output: Option<SaveSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<SyncStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

pub async fn run(dojo: &DojoClient, scanner: &AcunetixClient, opts: &ScannerSyncOptions) -> Result<Report> {
    let mut summary = ScannerSyncSummary {
        dry_run: opts.dry_run,
        product_type_id: opts.product_type_id,
        scanner_base_url: scanner.base_url().to_string(),
        scanner_node_name: opts.scanner_node_name.clone(),
        ..Default::default()
    };
    match sync(dojo, scanner, opts, &mut summary).await {
        Ok(()) => {}
        Err(StageError { stage, details }) => {
            warn!(%stage, "sync failed: {details}");
            summary.ok = false;
            summary.reason = Some("stage_failed".into());
            summary.failed_stage = Some(stage);
            summary.details = Some(details);
        }
    }
    Report::from_summary(summary.ok, &summary)
}

async fn sync(
    dojo: &DojoClient,
    scanner: &AcunetixClient,
    opts: &ScannerSyncOptions,
    summary: &mut ScannerSyncSummary,
) -> std::result::Result<(), StageError> {
    let id = opts.product_type_id;
    let product_type = dojo.product_type(id).await.at(SyncStage::LoadInventory)?;
    let name = product_type.display_name(id);
    summary.product_type_name = name.clone();
    let products = dojo.products_for_type(id).await.at(SyncStage::LoadInventory)?;
    summary.products_total = products.len();

    let records: Vec<AssetRecord> = products.iter().filter_map(Product::to_record).collect();
    let submitted = submitted_targets(&records);
    let addresses: Vec<String> = submitted.iter().map(|s| s.target.to_string()).collect();
    summary.targets_prepared = addresses.clone();
    if submitted.is_empty() {
        summary.reason = Some("no_internet_accessible_targets".into());
        return Ok(());
    }

    let groups = scanner.list_groups().await.at(SyncStage::ListGroups)?;
    let group_id = match find_group_by_name(&groups, &name) {
        Some(g) => g.group_id.clone(),
        None if opts.dry_run => DRY_RUN_GROUP_ID.to_string(),
        None => {
            let description = format!("Dojo PT #{} ({name})", product_type.id.unwrap_or(id));
            let created = scanner.create_group(&name, &description).await.at(SyncStage::CreateGroup)?;
            summary.group_created = true;
            info!(group = %created.group_id, %name, "created target group");
            created.group_id
        }
    };
    if group_id.trim().is_empty() {
        return Err(StageError { stage: SyncStage::CreateGroup, details: "scanner returned an empty group id".into() });
    }
    summary.group_id = Some(group_id.clone());

    let resolved = if opts.dry_run {
        summary.add_payload_preview = Some(add_targets_payload(&group_id, &name, &addresses));
        dry_run_mapping(&submitted)
    } else {
        let echoed: Vec<RemoteTarget> = scanner.add_targets(&group_id, &name, &addresses).await.at(SyncStage::AddTargets)?;
        let listing = scanner.list_targets().await.at(SyncStage::ListTargets)?;
        let rec = reconcile(&submitted, &echoed, &listing);
        if !rec.unresolved.is_empty() {
            warn!(count = rec.unresolved.len(), "targets not yet visible in the scanner listing");
        }
        summary.unresolved_item_ids = rec.unresolved;
        rec.resolved
    };

    let mut mapping = MappingFile::open_or_create(&opts.mapping_file);
    let saved = mapping.merge(&resolved, id, scanner.base_url());
    summary.mapping_output = Some(mapping.save(saved).at(SyncStage::PersistMapping)?);
    summary.target_mapping = resolved;
    summary.ok = true;
    Ok(())
}

fn dry_run_mapping(submitted: &[SubmittedTarget]) -> BTreeMap<String, String> {
    submitted.iter().map(|s| (s.item_id.clone(), DRY_RUN_TARGET_ID.to_string())).collect()
}
