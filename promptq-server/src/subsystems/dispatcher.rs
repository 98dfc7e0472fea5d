//! Dispatcher: claims pending jobs under the concurrency ceiling, executes
//! them, then runs completion detection.
//!
//! The dispatcher keeps no state between invocations and takes no lock. It is
//! safe to run from the fixed-interval loop, from request handlers and from
//! other processes at the same time: the conditional claim in the store is
//! the only thing that decides who executes a job. Overlapping cycles can
//! briefly push `processing` above the ceiling; that is accepted.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use promptq_core::models::{Job, JobStatus};
use serde::Serialize;
use tokio::sync::broadcast;

use super::completion::{self, CompletionNotice};
use super::executor::{self, ExecutionOutcome};
use crate::state::QueueState;

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    /// Processing count was already at the ceiling; nothing was claimed.
    pub at_capacity: bool,
    pub claimed: usize,
    /// Claims lost to another dispatcher.
    pub contended: usize,
    pub completed: usize,
    pub failed: usize,
    pub notices: Vec<CompletionNotice>,
    pub elapsed_ms: u64,
}

impl DispatchReport {
    pub fn notified_owners(&self) -> Vec<i64> {
        self.notices.iter().map(|n| n.owner_id).collect()
    }
}

/// One dispatch cycle.
pub async fn dispatch(state: &QueueState) -> Result<DispatchReport> {
    let start = Instant::now();
    let mut report = DispatchReport::default();
    let store = state.store.as_ref();

    let ceiling = state.config.queue.concurrency_ceiling() as i64;
    let processing = store.count_by_status(JobStatus::Processing).await?;
    if processing >= ceiling {
        tracing::debug!(processing, ceiling, "Dispatch skipped: at concurrency ceiling");
        report.at_capacity = true;
        report.elapsed_ms = start.elapsed().as_millis() as u64;
        return Ok(report);
    }

    let candidates = store.list_pending(ceiling - processing).await?;
    let mut claimed: Vec<Job> = Vec::with_capacity(candidates.len());
    for job in candidates {
        match store.claim(job.id).await {
            Ok(true) => claimed.push(job),
            Ok(false) => {
                tracing::debug!(job_id = job.id, "Job already claimed by another dispatcher");
                report.contended += 1;
            }
            Err(e) => tracing::warn!(job_id = job.id, "Claim failed: {}", e),
        }
    }
    report.claimed = claimed.len();

    for job in &claimed {
        match executor::execute_job(state, job).await {
            ExecutionOutcome::Completed { .. } => report.completed += 1,
            ExecutionOutcome::Failed { .. } => report.failed += 1,
        }
    }

    report.notices = completion::detect_completions(state).await?;
    report.elapsed_ms = start.elapsed().as_millis() as u64;

    if report.claimed > 0 || !report.notices.is_empty() {
        tracing::info!(
            "Dispatch cycle complete: {} claimed, {} contended, {} completed, {} failed, {} runs reported in {}ms",
            report.claimed,
            report.contended,
            report.completed,
            report.failed,
            report.notices.len(),
            report.elapsed_ms
        );
    }

    Ok(report)
}

/// Fire-and-forget dispatch triggered by unrelated activity.
pub fn spawn_opportunistic(state: Arc<QueueState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = dispatch(&state).await {
            tracing::warn!("Opportunistic dispatch failed: {}", e);
        }
    })
}

/// Fixed-schedule dispatcher. Stops on the shutdown broadcast.
pub async fn run_dispatch_loop(state: Arc<QueueState>, mut shutdown: broadcast::Receiver<()>) {
    let seconds = state.config.queue.dispatch_interval_seconds.max(1);
    let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(seconds));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!(
        "Dispatch loop started (interval: {}s, ceiling: {})",
        seconds,
        state.config.queue.concurrency_ceiling()
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = dispatch(&state).await {
                    tracing::error!("Dispatch error: {}", e);
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Dispatch loop shutting down");
                break;
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
