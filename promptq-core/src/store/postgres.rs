//! Postgres-backed [`Store`](super::Store).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{JobStore, ResultStore, RunResultStore, StoreResult, SummaryStore};
use crate::models::{
    Job, JobStats, JobStatus, NewJob, NewPromptSummary, NewResult, NewRunResult, PromptSummary,
    ResultRow, RunId, RunResultRow, SummaryKey,
};

/// Column list for `jobs` queries.
const JOB_COLUMNS: &str = "\
    id, owner_id, job_type, payload, run_id, is_batch, status, priority, \
    created_at, updated_at, started_at, completed_at, error_message";

const RESULT_COLUMNS: &str = "\
    id, created_at, owner_id, run_id, prompt, model, answer, expected_answer, \
    comparison_score, comparison_failed, duration_ms";

const SUMMARY_COLUMNS: &str = "\
    id, prompt_id, prompt_text, expected_answer, run_id, model_count, valid_count, \
    average_score, min_score, max_score, narrative, completed_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn insert_job(&self, job: NewJob) -> StoreResult<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO jobs (owner_id, job_type, payload, run_id, is_batch, status, priority) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id",
        )
        .bind(job.owner_id)
        .bind(job.job_type.as_str())
        .bind(&job.payload)
        .bind(job.run_id.as_str())
        .bind(job.is_batch)
        .bind(JobStatus::Pending.as_str())
        .bind(job.priority)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn find_job(&self, id: i64) -> StoreResult<Option<Job>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn find_active_batch_run(&self, owner_id: i64) -> StoreResult<Option<RunId>> {
        let run_id: Option<String> = sqlx::query_scalar(
            "SELECT run_id FROM jobs \
             WHERE owner_id = $1 AND is_batch AND status IN ($2, $3) \
             ORDER BY created_at DESC, id DESC \
             LIMIT 1",
        )
        .bind(owner_id)
        .bind(JobStatus::Pending.as_str())
        .bind(JobStatus::Processing.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(run_id.map(RunId::new))
    }

    async fn count_by_status(&self, status: JobStatus) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*)::bigint FROM jobs WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn list_pending(&self, limit: i64) -> StoreResult<Vec<Job>> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE status = $1 \
             ORDER BY priority DESC, created_at ASC, id ASC \
             LIMIT $2"
        );
        let jobs = sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Pending.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(jobs)
    }

    async fn claim(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status = $2, started_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status = $3",
        )
        .bind(id)
        .bind(JobStatus::Processing.as_str())
        .bind(JobStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_completed(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status = $2, completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status = $3",
        )
        .bind(id)
        .bind(JobStatus::Completed.as_str())
        .bind(JobStatus::Processing.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: i64, error_message: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status = $2, error_message = $3, completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status = $4",
        )
        .bind(id)
        .bind(JobStatus::Failed.as_str())
        .bind(error_message)
        .bind(JobStatus::Processing.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn owners_with_jobs(&self) -> StoreResult<Vec<i64>> {
        let owners: Vec<i64> =
            sqlx::query_scalar("SELECT DISTINCT owner_id FROM jobs ORDER BY owner_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(owners)
    }

    async fn count_active_for_owner(&self, owner_id: i64) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)::bigint FROM jobs WHERE owner_id = $1 AND status IN ($2, $3)",
        )
        .bind(owner_id)
        .bind(JobStatus::Pending.as_str())
        .bind(JobStatus::Processing.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_completed_for_owner(&self, owner_id: i64) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)::bigint FROM jobs WHERE owner_id = $1 AND status = $2",
        )
        .bind(owner_id)
        .bind(JobStatus::Completed.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn earliest_job_in_run(&self, run_id: &RunId) -> StoreResult<Option<DateTime<Utc>>> {
        let earliest: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT MIN(created_at) FROM jobs WHERE run_id = $1")
                .bind(run_id.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(earliest)
    }

    async fn job_stats(&self) -> StoreResult<JobStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*)::bigint FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = JobStats::default();
        for (status, count) in rows {
            match JobStatus::parse(&status) {
                Some(s) => stats.record(s, count),
                None => tracing::warn!(status = %status, "Ignoring unknown job status in stats"),
            }
        }
        Ok(stats)
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs \
             WHERE status IN ($1, $2) AND completed_at IS NOT NULL AND completed_at < $3",
        )
        .bind(JobStatus::Completed.as_str())
        .bind(JobStatus::Failed.as_str())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ResultStore for PgStore {
    async fn insert_result(&self, result: NewResult) -> StoreResult<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO results \
                (owner_id, run_id, prompt, model, answer, expected_answer, \
                 comparison_score, comparison_failed, duration_ms) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING id",
        )
        .bind(result.owner_id)
        .bind(result.run_id.as_ref().map(RunId::as_str))
        .bind(&result.prompt)
        .bind(&result.model)
        .bind(&result.answer)
        .bind(&result.expected_answer)
        .bind(result.comparison_score)
        .bind(result.comparison_failed)
        .bind(result.duration_ms)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn results_for_prompt(
        &self,
        prompt: &str,
        run_id: Option<&RunId>,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<ResultRow>> {
        let query = format!(
            "SELECT {RESULT_COLUMNS} FROM results \
             WHERE prompt = $1 \
               AND (($2::text IS NOT NULL AND run_id = $2) \
                    OR (($2::text IS NULL OR run_id IS NULL) \
                        AND ($3::timestamptz IS NULL OR created_at >= $3))) \
             ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query_as::<_, ResultRow>(&query)
            .bind(prompt)
            .bind(run_id.map(RunId::as_str))
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn models_with_results(&self, prompt: &str) -> StoreResult<Vec<String>> {
        let models: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT model FROM results WHERE prompt = $1")
                .bind(prompt)
                .fetch_all(&self.pool)
                .await?;
        Ok(models)
    }

    async fn list_results_for_owner(&self, owner_id: i64, limit: i64) -> StoreResult<Vec<ResultRow>> {
        let query = format!(
            "SELECT {RESULT_COLUMNS} FROM results \
             WHERE owner_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2"
        );
        let rows = sqlx::query_as::<_, ResultRow>(&query)
            .bind(owner_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn delete_result(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM results WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RunResultStore for PgStore {
    async fn insert_run_result(&self, row: NewRunResult) -> StoreResult<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO run_results (run_id, result_id, owner_id, prompt, model, answer) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id",
        )
        .bind(row.run_id.as_str())
        .bind(row.result_id)
        .bind(row.owner_id)
        .bind(&row.prompt)
        .bind(&row.model)
        .bind(&row.answer)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn count_run_results(&self, run_id: &RunId) -> StoreResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*)::bigint FROM run_results WHERE run_id = $1")
                .bind(run_id.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn take_run_results(&self, run_id: &RunId) -> StoreResult<Vec<RunResultRow>> {
        let mut rows = sqlx::query_as::<_, RunResultRow>(
            "DELETE FROM run_results WHERE run_id = $1 \
             RETURNING id, run_id, result_id, owner_id, prompt, model, answer, created_at",
        )
        .bind(run_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn runs_for_owner(&self, owner_id: i64) -> StoreResult<Vec<RunId>> {
        let runs: Vec<String> = sqlx::query_scalar(
            "SELECT run_id FROM run_results \
             WHERE owner_id = $1 \
             GROUP BY run_id \
             ORDER BY MIN(created_at) ASC, MIN(id) ASC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(runs.into_iter().map(RunId::new).collect())
    }

    async fn delete_run_results_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM run_results WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SummaryStore for PgStore {
    async fn find_summary(&self, key: &SummaryKey) -> StoreResult<Option<PromptSummary>> {
        let query = format!(
            "SELECT {SUMMARY_COLUMNS} FROM prompt_summaries \
             WHERE prompt_id = $1 AND prompt_text = $2 AND expected_answer = $3 \
             ORDER BY completed_at DESC \
             LIMIT 1"
        );
        let summary = sqlx::query_as::<_, PromptSummary>(&query)
            .bind(&key.prompt_id)
            .bind(&key.prompt_text)
            .bind(&key.expected_answer)
            .fetch_optional(&self.pool)
            .await?;
        Ok(summary)
    }

    async fn replace_summary(&self, summary: NewPromptSummary) -> StoreResult<i64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM prompt_summaries \
             WHERE prompt_id = $1 AND prompt_text = $2 AND expected_answer = $3",
        )
        .bind(&summary.key.prompt_id)
        .bind(&summary.key.prompt_text)
        .bind(&summary.key.expected_answer)
        .execute(&mut *tx)
        .await?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO prompt_summaries \
                (prompt_id, prompt_text, expected_answer, run_id, model_count, valid_count, \
                 average_score, min_score, max_score, narrative) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING id",
        )
        .bind(&summary.key.prompt_id)
        .bind(&summary.key.prompt_text)
        .bind(&summary.key.expected_answer)
        .bind(&summary.run_id)
        .bind(summary.model_count)
        .bind(summary.valid_count)
        .bind(summary.average_score)
        .bind(summary.min_score)
        .bind(summary.max_score)
        .bind(&summary.narrative)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    async fn list_summaries(&self, prompt_id: &str) -> StoreResult<Vec<PromptSummary>> {
        let query = format!(
            "SELECT {SUMMARY_COLUMNS} FROM prompt_summaries \
             WHERE prompt_id = $1 \
             ORDER BY completed_at DESC, id DESC"
        );
        let rows = sqlx::query_as::<_, PromptSummary>(&query)
            .bind(prompt_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}
