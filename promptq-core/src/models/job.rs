use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PayloadError;
use crate::models::run::RunId;

/// Job lifecycle. Transitions only run pending → processing → {completed, failed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// The only legal single-step transitions.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl TryFrom<String> for JobStatus {
    type Error = PayloadError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        JobStatus::parse(&value).ok_or(PayloadError::UnknownStatus(value))
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registered job kinds. Each variant owns its payload schema (see [`JobPayload`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    #[default]
    ProviderRequest,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::ProviderRequest => "provider_request",
        }
    }
}

impl TryFrom<String> for JobType {
    type Error = PayloadError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "provider_request" => Ok(JobType::ProviderRequest),
            _ => Err(PayloadError::UnknownJobType(value)),
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: i64,
    pub owner_id: i64,
    #[sqlx(try_from = "String")]
    pub job_type: JobType,
    pub payload: serde_json::Value,
    #[sqlx(try_from = "String")]
    pub run_id: RunId,
    pub is_batch: bool,
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Job {
    pub fn decode_payload(&self) -> Result<JobPayload, PayloadError> {
        JobPayload::decode(self.job_type, &self.payload)
    }
}

/// Insert shape for the `jobs` table.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub owner_id: i64,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub run_id: RunId,
    pub is_batch: bool,
    pub priority: i32,
}

/// Count of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

impl JobStats {
    pub fn record(&mut self, status: JobStatus, count: i64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// Payload of a `provider_request` job: one prompt sent to one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRequestPayload {
    pub owner_id: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_answer: Option<String>,
    /// Every model the same prompt was sent to in this logical action.
    #[serde(default)]
    pub expected_models: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    #[serde(default)]
    pub is_batch: bool,
}

impl ProviderRequestPayload {
    /// Checks the fields the executor cannot run without.
    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.credential.as_deref().map_or(true, |c| c.trim().is_empty()) {
            return Err(PayloadError::MissingField("credential"));
        }
        if self.prompt.trim().is_empty() {
            return Err(PayloadError::MissingField("prompt"));
        }
        if self.model.trim().is_empty() {
            return Err(PayloadError::MissingField("model"));
        }
        Ok(())
    }

    pub fn expected_answer(&self) -> Option<&str> {
        self.expected_answer
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Tagged union of all job payloads, keyed by [`JobType`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobPayload {
    ProviderRequest(ProviderRequestPayload),
}

impl JobPayload {
    pub fn decode(job_type: JobType, value: &serde_json::Value) -> Result<Self, PayloadError> {
        match job_type {
            JobType::ProviderRequest => serde_json::from_value(value.clone())
                .map(JobPayload::ProviderRequest)
                .map_err(|e| PayloadError::Invalid(e.to_string())),
        }
    }

    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::ProviderRequest(_) => JobType::ProviderRequest,
        }
    }

    pub fn owner_id(&self) -> i64 {
        match self {
            JobPayload::ProviderRequest(p) => p.owner_id,
        }
    }

    pub fn to_value(&self) -> Result<serde_json::Value, PayloadError> {
        match self {
            JobPayload::ProviderRequest(p) => {
                serde_json::to_value(p).map_err(|e| PayloadError::Invalid(e.to_string()))
            }
        }
    }
}

/// One item of a batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub expected_answer: Option<String>,
}

/// Request to enqueue several prompt/model pairs as one logical run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEnqueueRequest {
    pub owner_id: i64,
    pub items: Vec<BatchItem>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub credential: Option<String>,
}
