use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a prompt summary. `expected_answer` is empty when none was given.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SummaryKey {
    pub prompt_id: String,
    pub prompt_text: String,
    pub expected_answer: String,
}

impl SummaryKey {
    pub fn new(prompt_id: &str, prompt_text: &str, expected_answer: Option<&str>) -> Self {
        Self {
            prompt_id: prompt_id.to_string(),
            prompt_text: prompt_text.to_string(),
            expected_answer: expected_answer.unwrap_or_default().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PromptSummary {
    pub id: i64,
    pub prompt_id: String,
    pub prompt_text: String,
    pub expected_answer: String,
    pub run_id: Option<String>,
    pub model_count: i32,
    pub valid_count: i32,
    pub average_score: Option<f64>,
    pub min_score: Option<i16>,
    pub max_score: Option<i16>,
    pub narrative: String,
    pub completed_at: DateTime<Utc>,
}

impl PromptSummary {
    pub fn key(&self) -> SummaryKey {
        SummaryKey {
            prompt_id: self.prompt_id.clone(),
            prompt_text: self.prompt_text.clone(),
            expected_answer: self.expected_answer.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewPromptSummary {
    pub key: SummaryKey,
    pub run_id: Option<String>,
    pub model_count: i32,
    pub valid_count: i32,
    pub average_score: Option<f64>,
    pub min_score: Option<i16>,
    pub max_score: Option<i16>,
    pub narrative: String,
}
