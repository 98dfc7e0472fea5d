//! Retention sweep: removes terminal jobs and leftover scratch rows older
//! than the retention window. Results and summaries are kept; they only go
//! away through explicit deletion.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use promptq_core::{PayloadError, Store};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::state::QueueState;

#[derive(Debug, Clone, Serialize)]
pub struct RetentionReport {
    pub retention_days: u32,
    pub jobs_deleted: u64,
    pub scratch_deleted: u64,
}

/// Start of the retention window. Windows reaching past the earliest
/// representable timestamp are rejected as a payload error.
pub fn retention_cutoff(now: DateTime<Utc>, retention_days: u32) -> Result<DateTime<Utc>, PayloadError> {
    Duration::try_days(retention_days as i64)
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or_else(|| PayloadError::Invalid(format!("retention window of {} days is out of range", retention_days)))
}

pub async fn sweep_retention(store: &dyn Store, retention_days: u32) -> Result<RetentionReport> {
    let cutoff = retention_cutoff(Utc::now(), retention_days)?;
    let jobs_deleted = store.delete_terminal_before(cutoff).await?;
    let scratch_deleted = store.delete_run_results_before(cutoff).await?;

    if jobs_deleted > 0 || scratch_deleted > 0 {
        tracing::info!(
            "Retention sweep removed {} jobs and {} scratch rows older than {} days",
            jobs_deleted,
            scratch_deleted,
            retention_days
        );
    }
    Ok(RetentionReport {
        retention_days,
        jobs_deleted,
        scratch_deleted,
    })
}

pub async fn run_retention_loop(state: Arc<QueueState>, mut shutdown: broadcast::Receiver<()>) {
    let minutes = state.config.queue.retention_interval_minutes.max(1);
    let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(minutes * 60));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!(
        "Retention loop started (interval: {}min, window: {} days)",
        minutes,
        state.config.queue.retention_days
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = sweep_retention(state.store.as_ref(), state.config.queue.retention_days).await {
                    tracing::error!("Retention sweep error: {}", e);
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Retention loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptq_core::models::{JobStatus, JobType, NewJob, NewRunResult, RunId};
    use promptq_core::store::{JobStore, RunResultStore};
    use promptq_core::MemoryStore;

    async fn job(store: &MemoryStore) -> i64 {
        store
            .insert_job(NewJob {
                owner_id: 1,
                job_type: JobType::ProviderRequest,
                payload: serde_json::json!({"owner_id": 1}),
                run_id: RunId::new("1_batch_1"),
                is_batch: true,
                priority: 0,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_zero_day_window_removes_only_terminal_jobs() {
        let store = MemoryStore::new();
        let done = job(&store).await;
        let failed = job(&store).await;
        let pending = job(&store).await;
        store.claim(done).await.unwrap();
        store.mark_completed(done).await.unwrap();
        store.claim(failed).await.unwrap();
        store.mark_failed(failed, "boom").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let report = sweep_retention(&store, 0).await.unwrap();
        assert_eq!(report.jobs_deleted, 2);

        let remaining = store.find_job(pending).await.unwrap().unwrap();
        assert_eq!(remaining.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_recent_jobs_survive_default_window() {
        let store = MemoryStore::new();
        let done = job(&store).await;
        store.claim(done).await.unwrap();
        store.mark_completed(done).await.unwrap();

        let report = sweep_retention(&store, 30).await.unwrap();
        assert_eq!(report.jobs_deleted, 0);
        assert!(store.find_job(done).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_scratch_rows_are_swept() {
        let store = MemoryStore::new();
        store
            .insert_run_result(NewRunResult {
                run_id: RunId::new("1_prompt_a"),
                result_id: 1,
                owner_id: 1,
                prompt: "q".to_string(),
                model: "gpt-4o".to_string(),
                answer: "a".to_string(),
            })
            .await
            .unwrap();

        let report = sweep_retention(&store, 30).await.unwrap();
        assert_eq!(report.scratch_deleted, 0);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let report = sweep_retention(&store, 0).await.unwrap();
        assert_eq!(report.scratch_deleted, 1);
        assert_eq!(store.count_run_results(&RunId::new("1_prompt_a")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_window_is_rejected_not_panicking() {
        let store = MemoryStore::new();
        let done = job(&store).await;
        store.claim(done).await.unwrap();
        store.mark_completed(done).await.unwrap();

        let err = sweep_retention(&store, u32::MAX).await.unwrap_err();
        assert!(err.downcast_ref::<PayloadError>().is_some());
        assert!(store.find_job(done).await.unwrap().is_some());
    }

    #[test]
    fn test_retention_cutoff_bounds() {
        let now = Utc::now();
        assert_eq!(retention_cutoff(now, 0).unwrap(), now);
        assert_eq!(retention_cutoff(now, 30).unwrap(), now - Duration::days(30));
        assert!(retention_cutoff(now, u32::MAX).is_err());
    }
}
