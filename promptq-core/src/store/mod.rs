//! Storage seam for the queue.
//!
//! Every mutation is a single-row conditional or keyed update. Nothing here
//! reads a row, changes it in memory and writes it back, so independent
//! dispatcher invocations (other tasks, other processes) can share a store
//! without any lock beyond the conditional `status` update in [`JobStore::claim`].

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::PromptqError;
use crate::models::{
    Job, JobStats, JobStatus, NewJob, NewPromptSummary, NewResult, NewRunResult, PromptSummary,
    ResultRow, RunId, RunResultRow, SummaryKey,
};

pub type StoreResult<T> = Result<T, PromptqError>;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: NewJob) -> StoreResult<i64>;

    async fn find_job(&self, id: i64) -> StoreResult<Option<Job>>;

    /// Run id of any batch job for `owner_id` that is still pending or processing.
    async fn find_active_batch_run(&self, owner_id: i64) -> StoreResult<Option<RunId>>;

    async fn count_by_status(&self, status: JobStatus) -> StoreResult<i64>;

    /// Pending jobs ordered by priority (desc) then creation (asc).
    async fn list_pending(&self, limit: i64) -> StoreResult<Vec<Job>>;

    /// pending → processing. `false` means another invocation got there first.
    async fn claim(&self, id: i64) -> StoreResult<bool>;

    /// processing → completed.
    async fn mark_completed(&self, id: i64) -> StoreResult<bool>;

    /// processing → failed.
    async fn mark_failed(&self, id: i64, error_message: &str) -> StoreResult<bool>;

    async fn owners_with_jobs(&self) -> StoreResult<Vec<i64>>;

    /// Jobs in pending or processing for one owner.
    async fn count_active_for_owner(&self, owner_id: i64) -> StoreResult<i64>;

    async fn count_completed_for_owner(&self, owner_id: i64) -> StoreResult<i64>;

    /// Creation time of the oldest job still recorded for a run.
    async fn earliest_job_in_run(&self, run_id: &RunId) -> StoreResult<Option<DateTime<Utc>>>;

    async fn job_stats(&self) -> StoreResult<JobStats>;

    /// Deletes completed/failed jobs whose `completed_at` is before `cutoff`.
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn insert_result(&self, result: NewResult) -> StoreResult<i64>;

    /// Results for an exact prompt text. With `run_id` the match is exact on
    /// run; rows without a run id are included when created at or after `since`.
    async fn results_for_prompt(
        &self,
        prompt: &str,
        run_id: Option<&RunId>,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<ResultRow>>;

    /// Distinct model ids that have at least one result for this prompt text.
    async fn models_with_results(&self, prompt: &str) -> StoreResult<Vec<String>>;

    async fn list_results_for_owner(&self, owner_id: i64, limit: i64) -> StoreResult<Vec<ResultRow>>;

    async fn delete_result(&self, id: i64) -> StoreResult<bool>;
}

#[async_trait]
pub trait RunResultStore: Send + Sync {
    async fn insert_run_result(&self, row: NewRunResult) -> StoreResult<i64>;

    async fn count_run_results(&self, run_id: &RunId) -> StoreResult<i64>;

    /// Atomically removes and returns every scratch row for the run, ordered
    /// by creation. Two concurrent callers never receive the same row.
    async fn take_run_results(&self, run_id: &RunId) -> StoreResult<Vec<RunResultRow>>;

    /// Distinct runs with scratch rows for one owner, oldest first.
    async fn runs_for_owner(&self, owner_id: i64) -> StoreResult<Vec<RunId>>;

    /// Drops scratch rows created before `cutoff`, reported or not.
    async fn delete_run_results_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait SummaryStore: Send + Sync {
    async fn find_summary(&self, key: &SummaryKey) -> StoreResult<Option<PromptSummary>>;

    /// Deletes any summary with the same key, then inserts the new one.
    async fn replace_summary(&self, summary: NewPromptSummary) -> StoreResult<i64>;

    async fn list_summaries(&self, prompt_id: &str) -> StoreResult<Vec<PromptSummary>>;
}

/// Everything the queue subsystems need from persistence.
pub trait Store: JobStore + ResultStore + RunResultStore + SummaryStore {}

impl<T> Store for T where T: JobStore + ResultStore + RunResultStore + SummaryStore {}
