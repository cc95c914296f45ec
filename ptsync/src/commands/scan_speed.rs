//! `ptsync scan-speed`: bring every target of a scanner group to one scan speed.

use anyhow::Result;
use ptsync_core::BatchReport;
use scanner_api::{find_group_by_name, AcunetixClient};
use serde::Serialize;
use tracing::info;

use super::Report;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupSelector {
    Id(String),
    Name(String),
}

#[derive(Debug, Clone)]
pub struct ScanSpeedOptions {
    pub group: GroupSelector,
    pub scan_speed: String,
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
pub struct ScanSpeedSummary {
    pub ok: bool,
    pub group_id: Option<String>,
    pub scan_speed: String,
    pub dry_run: bool,
    pub targets_total: usize,
    /// `succeeded` are targets changed (or planned to change on a dry run); `skipped`
    /// already had the requested speed.
    pub targets: BatchReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

pub async fn run(scanner: &AcunetixClient, opts: &ScanSpeedOptions) -> Result<Report> {
    let mut summary = ScanSpeedSummary {
        ok: false,
        group_id: None,
        scan_speed: opts.scan_speed.clone(),
        dry_run: opts.dry_run,
        targets_total: 0,
        targets: BatchReport::new(),
        error: None,
        warning: None,
    };

    let group_id = match &opts.group {
        GroupSelector::Id(id) => id.clone(),
        GroupSelector::Name(name) => {
            let groups = scanner.list_groups().await?;
            match find_group_by_name(&groups, name) {
                Some(g) => g.group_id.clone(),
                None => {
                    summary.error = Some("group_not_found".into());
                    return Report::from_summary(false, &summary);
                }
            }
        }
    };
    summary.group_id = Some(group_id.clone());

    let target_ids = scanner.group_target_ids(&group_id).await?;
    summary.targets_total = target_ids.len();
    if target_ids.is_empty() {
        summary.ok = true;
        summary.warning = Some("no_targets_in_group".into());
        return Report::from_summary(true, &summary);
    }

    for tid in &target_ids {
        let current = match scanner.target_scan_speed(tid).await {
            Ok(current) => current,
            Err(e) => {
                summary.targets.record(tid.clone(), Err::<(), _>(e));
                continue;
            }
        };
        if current.as_deref() == Some(opts.scan_speed.as_str()) {
            summary.targets.skip(tid.clone());
        } else if opts.dry_run {
            summary.targets.record(tid.clone(), Ok::<_, String>(()));
        } else {
            summary.targets.record(tid.clone(), scanner.set_target_scan_speed(tid, &opts.scan_speed).await);
        }
    }
    info!(
        group = %group_id,
        changed = summary.targets.succeeded.len(),
        skipped = summary.targets.skipped.len(),
        failed = summary.targets.failed.len(),
        "scan speed applied"
    );
    summary.ok = summary.targets.is_success();
    Report::from_summary(summary.ok, &summary)
}
