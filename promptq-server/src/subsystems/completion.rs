//! Completion detector.
//!
//! Runs once at the end of every dispatch cycle. Once an owner has no pending
//! or processing jobs (and at least one completed job), every run that still
//! has scratch rows for that owner is finished, and each one is handed to the
//! notifier separately.
//!
//! Scratch rows are removed with a single delete-returning before notifying,
//! so two dispatchers finishing at the same moment cannot both report the
//! same rows. A failed notification is logged; the rows are not restored.

use anyhow::Result;
use promptq_core::models::{ReportedResult, RunId};
use serde::Serialize;

use crate::state::QueueState;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionNotice {
    pub owner_id: i64,
    pub run_id: RunId,
    pub result_count: usize,
    pub delivered: bool,
}

/// Check every owner with jobs in the store. Per-owner store errors are
/// logged and do not stop the remaining owners from being checked.
pub async fn detect_completions(state: &QueueState) -> Result<Vec<CompletionNotice>> {
    let owners = state.store.owners_with_jobs().await?;
    let mut notices = Vec::new();

    for owner_id in owners {
        match check_owner(state, owner_id).await {
            Ok(found) => notices.extend(found),
            Err(e) => tracing::warn!(owner_id, "Completion check failed: {}", e),
        }
    }

    Ok(notices)
}

/// Report every finished run of one idle owner, oldest run first.
pub async fn check_owner(state: &QueueState, owner_id: i64) -> Result<Vec<CompletionNotice>> {
    let store = state.store.as_ref();

    if store.count_active_for_owner(owner_id).await? > 0 {
        return Ok(Vec::new());
    }
    if store.count_completed_for_owner(owner_id).await? == 0 {
        return Ok(Vec::new());
    }

    let mut notices = Vec::new();
    for run_id in store.runs_for_owner(owner_id).await? {
        if run_id.is_empty() {
            tracing::warn!(owner_id, "Skipping scratch rows without a run id");
            continue;
        }
        if let Some(notice) = report_run(state, owner_id, run_id).await? {
            notices.push(notice);
        }
    }
    Ok(notices)
}

async fn report_run(state: &QueueState, owner_id: i64, run_id: RunId) -> Result<Option<CompletionNotice>> {
    let rows = state.store.take_run_results(&run_id).await?;
    if rows.is_empty() {
        tracing::debug!(owner_id, run_id = %run_id, "Run already reported");
        return Ok(None);
    }

    let results: Vec<ReportedResult> = rows.into_iter().map(ReportedResult::from).collect();
    let result_count = results.len();

    let delivered = match state.notifier.notify(owner_id, &results).await {
        Ok(()) => {
            tracing::info!(
                owner_id,
                run_id = %run_id,
                results = result_count,
                sink = state.notifier.name(),
                "Run complete, report sent"
            );
            true
        }
        Err(e) => {
            tracing::error!(owner_id, run_id = %run_id, results = result_count, "Run report failed: {}", e);
            false
        }
    };

    Ok(Some(CompletionNotice {
        owner_id,
        run_id,
        result_count,
        delivered,
    }))
}

// ============================================================================
// TESTS
// ============================================================================
