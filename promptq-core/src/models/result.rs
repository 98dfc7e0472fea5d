use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::run::RunId;

/// Answers recorded for failed provider calls start with this marker.
pub const PROVIDER_ERROR_MARKER: &str = "[provider error";

/// Answer text stored when the provider call failed, so the run still
/// completes and the failure shows up in the report.
pub fn provider_error_answer(status_code: u16, message: &str) -> String {
    format!("{PROVIDER_ERROR_MARKER} {status_code}] {message}")
}

/// A persisted provider answer. Written once by the executor.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ResultRow {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub owner_id: i64,
    pub run_id: Option<String>,
    pub prompt: String,
    pub model: String,
    pub answer: String,
    pub expected_answer: Option<String>,
    pub comparison_score: Option<i16>,
    pub comparison_failed: bool,
    pub duration_ms: Option<i64>,
}

impl ResultRow {
    /// Results with an empty answer are excluded from score statistics.
    /// A real answer: non-empty and not a recorded provider failure.
    pub fn is_valid(&self) -> bool {
        let answer = self.answer.trim();
        !answer.is_empty() && !answer.starts_with(PROVIDER_ERROR_MARKER)
    }
}

#[derive(Debug, Clone)]
pub struct NewResult {
    pub owner_id: i64,
    pub run_id: Option<RunId>,
    pub prompt: String,
    pub model: String,
    pub answer: String,
    pub expected_answer: Option<String>,
    pub comparison_score: Option<i16>,
    pub comparison_failed: bool,
    pub duration_ms: Option<i64>,
}

/// Denormalised scratch row read back by the completion detector.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RunResultRow {
    pub id: i64,
    pub run_id: String,
    pub result_id: i64,
    pub owner_id: i64,
    pub prompt: String,
    pub model: String,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRunResult {
    pub run_id: RunId,
    pub result_id: i64,
    pub owner_id: i64,
    pub prompt: String,
    pub model: String,
    pub answer: String,
}

/// One entry of a completion notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedResult {
    pub id: i64,
    pub prompt: String,
    pub model: String,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}

impl From<RunResultRow> for ReportedResult {
    fn from(row: RunResultRow) -> Self {
        Self {
            id: row.result_id,
            prompt: row.prompt,
            model: row.model,
            answer: row.answer,
            created_at: row.created_at,
        }
    }
}
