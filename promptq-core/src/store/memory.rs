//! In-process [`Store`](super::Store) for single-node deployments and tests.
//!
//! Each operation takes the table lock once, so conditional updates keep the
//! same compare-and-swap behaviour as the Postgres implementation.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{JobStore, ResultStore, RunResultStore, StoreResult, SummaryStore};
use crate::models::{
    Job, JobStats, JobStatus, NewJob, NewPromptSummary, NewResult, NewRunResult, PromptSummary,
    ResultRow, RunId, RunResultRow, SummaryKey,
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    jobs: Vec<Job>,
    results: Vec<ResultRow>,
    run_results: Vec<RunResultRow>,
    summaries: Vec<PromptSummary>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn transition(&mut self, id: i64, from: JobStatus, to: JobStatus) -> Option<&mut Job> {
        let job = self.jobs.iter_mut().find(|j| j.id == id && j.status == from)?;
        let now = Utc::now();
        job.status = to;
        job.updated_at = now;
        match to {
            JobStatus::Processing => job.started_at = Some(now),
            JobStatus::Completed | JobStatus::Failed => job.completed_at = Some(now),
            JobStatus::Pending => {}
        }
        Some(job)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(&self, job: NewJob) -> StoreResult<i64> {
        let mut t = self.tables.lock().await;
        let id = t.next_id();
        let now = Utc::now();
        t.jobs.push(Job {
            id,
            owner_id: job.owner_id,
            job_type: job.job_type,
            payload: job.payload,
            run_id: job.run_id,
            is_batch: job.is_batch,
            status: JobStatus::Pending,
            priority: job.priority,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            error_message: None,
        });
        Ok(id)
    }

    async fn find_job(&self, id: i64) -> StoreResult<Option<Job>> {
        let t = self.tables.lock().await;
        Ok(t.jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn find_active_batch_run(&self, owner_id: i64) -> StoreResult<Option<RunId>> {
        let t = self.tables.lock().await;
        Ok(t.jobs
            .iter()
            .filter(|j| j.owner_id == owner_id && j.is_batch && j.status.is_active())
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .map(|j| j.run_id.clone()))
    }

    async fn count_by_status(&self, status: JobStatus) -> StoreResult<i64> {
        let t = self.tables.lock().await;
        Ok(t.jobs.iter().filter(|j| j.status == status).count() as i64)
    }

    async fn list_pending(&self, limit: i64) -> StoreResult<Vec<Job>> {
        let t = self.tables.lock().await;
        let mut pending: Vec<Job> = t
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn claim(&self, id: i64) -> StoreResult<bool> {
        let mut t = self.tables.lock().await;
        Ok(t.transition(id, JobStatus::Pending, JobStatus::Processing).is_some())
    }

    async fn mark_completed(&self, id: i64) -> StoreResult<bool> {
        let mut t = self.tables.lock().await;
        Ok(t.transition(id, JobStatus::Processing, JobStatus::Completed).is_some())
    }

    async fn mark_failed(&self, id: i64, error_message: &str) -> StoreResult<bool> {
        let mut t = self.tables.lock().await;
        match t.transition(id, JobStatus::Processing, JobStatus::Failed) {
            Some(job) => {
                job.error_message = Some(error_message.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn owners_with_jobs(&self) -> StoreResult<Vec<i64>> {
        let t = self.tables.lock().await;
        let owners: BTreeSet<i64> = t.jobs.iter().map(|j| j.owner_id).collect();
        Ok(owners.into_iter().collect())
    }

    async fn count_active_for_owner(&self, owner_id: i64) -> StoreResult<i64> {
        let t = self.tables.lock().await;
        Ok(t.jobs
            .iter()
            .filter(|j| j.owner_id == owner_id && j.status.is_active())
            .count() as i64)
    }

    async fn count_completed_for_owner(&self, owner_id: i64) -> StoreResult<i64> {
        let t = self.tables.lock().await;
        Ok(t.jobs
            .iter()
            .filter(|j| j.owner_id == owner_id && j.status == JobStatus::Completed)
            .count() as i64)
    }

    async fn earliest_job_in_run(&self, run_id: &RunId) -> StoreResult<Option<DateTime<Utc>>> {
        let t = self.tables.lock().await;
        Ok(t.jobs
            .iter()
            .filter(|j| &j.run_id == run_id)
            .map(|j| j.created_at)
            .min())
    }

    async fn job_stats(&self) -> StoreResult<JobStats> {
        let t = self.tables.lock().await;
        let mut stats = JobStats::default();
        for job in &t.jobs {
            stats.record(job.status, 1);
        }
        Ok(stats)
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut t = self.tables.lock().await;
        let before = t.jobs.len();
        t.jobs.retain(|j| {
            !(j.status.is_terminal() && j.completed_at.map_or(false, |at| at < cutoff))
        });
        Ok((before - t.jobs.len()) as u64)
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn insert_result(&self, result: NewResult) -> StoreResult<i64> {
        let mut t = self.tables.lock().await;
        let id = t.next_id();
        t.results.push(ResultRow {
            id,
            created_at: Utc::now(),
            owner_id: result.owner_id,
            run_id: result.run_id.map(String::from),
            prompt: result.prompt,
            model: result.model,
            answer: result.answer,
            expected_answer: result.expected_answer,
            comparison_score: result.comparison_score,
            comparison_failed: result.comparison_failed,
            duration_ms: result.duration_ms,
        });
        Ok(id)
    }

    async fn results_for_prompt(
        &self,
        prompt: &str,
        run_id: Option<&RunId>,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<ResultRow>> {
        let t = self.tables.lock().await;
        let in_window = |r: &ResultRow| since.map_or(true, |s| r.created_at >= s);
        let mut rows: Vec<ResultRow> = t
            .results
            .iter()
            .filter(|r| r.prompt == prompt)
            .filter(|r| match (run_id, r.run_id.as_deref()) {
                (Some(run), Some(row_run)) => run.as_str() == row_run,
                (Some(_), None) | (None, _) => in_window(r),
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn models_with_results(&self, prompt: &str) -> StoreResult<Vec<String>> {
        let t = self.tables.lock().await;
        let models: BTreeSet<String> = t
            .results
            .iter()
            .filter(|r| r.prompt == prompt)
            .map(|r| r.model.clone())
            .collect();
        Ok(models.into_iter().collect())
    }

    async fn list_results_for_owner(&self, owner_id: i64, limit: i64) -> StoreResult<Vec<ResultRow>> {
        let t = self.tables.lock().await;
        let mut rows: Vec<ResultRow> = t
            .results
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn delete_result(&self, id: i64) -> StoreResult<bool> {
        let mut t = self.tables.lock().await;
        let before = t.results.len();
        t.results.retain(|r| r.id != id);
        Ok(t.results.len() < before)
    }
}

#[async_trait]
impl RunResultStore for MemoryStore {
    async fn insert_run_result(&self, row: NewRunResult) -> StoreResult<i64> {
        let mut t = self.tables.lock().await;
        let id = t.next_id();
        t.run_results.push(RunResultRow {
            id,
            run_id: row.run_id.into(),
            result_id: row.result_id,
            owner_id: row.owner_id,
            prompt: row.prompt,
            model: row.model,
            answer: row.answer,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn count_run_results(&self, run_id: &RunId) -> StoreResult<i64> {
        let t = self.tables.lock().await;
        Ok(t.run_results
            .iter()
            .filter(|r| r.run_id == run_id.as_str())
            .count() as i64)
    }

    async fn take_run_results(&self, run_id: &RunId) -> StoreResult<Vec<RunResultRow>> {
        let mut t = self.tables.lock().await;
        let (mut taken, kept): (Vec<RunResultRow>, Vec<RunResultRow>) = std::mem::take(&mut t.run_results)
            .into_iter()
            .partition(|r| r.run_id == run_id.as_str());
        t.run_results = kept;
        taken.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(taken)
    }

    async fn runs_for_owner(&self, owner_id: i64) -> StoreResult<Vec<RunId>> {
        let t = self.tables.lock().await;
        let mut runs: Vec<RunId> = Vec::new();
        for row in t.run_results.iter().filter(|r| r.owner_id == owner_id) {
            let run = RunId::new(&row.run_id);
            if !runs.contains(&run) {
                runs.push(run);
            }
        }
        Ok(runs)
    }

    async fn delete_run_results_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut t = self.tables.lock().await;
        let before = t.run_results.len();
        t.run_results.retain(|r| r.created_at >= cutoff);
        Ok((before - t.run_results.len()) as u64)
    }
}

#[async_trait]
impl SummaryStore for MemoryStore {
    async fn find_summary(&self, key: &SummaryKey) -> StoreResult<Option<PromptSummary>> {
        let t = self.tables.lock().await;
        Ok(t.summaries
            .iter()
            .filter(|s| &s.key() == key)
            .max_by(|a, b| a.completed_at.cmp(&b.completed_at))
            .cloned())
    }

    async fn replace_summary(&self, summary: NewPromptSummary) -> StoreResult<i64> {
        let mut t = self.tables.lock().await;
        t.summaries.retain(|s| s.key() != summary.key);
        let id = t.next_id();
        t.summaries.push(PromptSummary {
            id,
            prompt_id: summary.key.prompt_id,
            prompt_text: summary.key.prompt_text,
            expected_answer: summary.key.expected_answer,
            run_id: summary.run_id,
            model_count: summary.model_count,
            valid_count: summary.valid_count,
            average_score: summary.average_score,
            min_score: summary.min_score,
            max_score: summary.max_score,
            narrative: summary.narrative,
            completed_at: Utc::now(),
        });
        Ok(id)
    }

    async fn list_summaries(&self, prompt_id: &str) -> StoreResult<Vec<PromptSummary>> {
        let t = self.tables.lock().await;
        let mut rows: Vec<PromptSummary> = t
            .summaries
            .iter()
            .filter(|s| s.prompt_id == prompt_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.completed_at.cmp(&a.completed_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }
}
