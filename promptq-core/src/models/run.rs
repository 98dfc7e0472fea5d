use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const BATCH_MARKER: &str = "_batch_";

/// Grouping key shared by every job spawned from one "execute prompts" action.
///
/// Construction strips stray surrounding quote characters, which older rows
/// picked up from a JSON round-trip of the payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct RunId(String);

impl RunId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        let trimmed = raw
            .as_ref()
            .trim()
            .trim_matches(|c| c == '"' || c == '\'' || c == '\\')
            .trim();
        Self(trimmed.to_string())
    }

    /// `owner + "_batch_" + millis`, minted when no batch is in flight.
    pub fn for_batch(owner_id: i64, at: DateTime<Utc>) -> Self {
        Self(format!("{owner_id}{BATCH_MARKER}{}", at.timestamp_millis()))
    }

    /// Deterministic run id for a single-item submission.
    pub fn for_prompt(owner_id: i64, prompt_id: &str) -> Self {
        Self::new(format!("{owner_id}_prompt_{prompt_id}"))
    }

    /// Deterministic run id when the caller supplied no prompt id; keyed by
    /// a name-based UUID of the prompt text.
    pub fn for_prompt_text(owner_id: i64, prompt: &str) -> Self {
        let key = Uuid::new_v5(&Uuid::NAMESPACE_OID, prompt.as_bytes());
        Self(format!("{owner_id}_prompt_{}", key.simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_batch(&self) -> bool {
        self.0.contains(BATCH_MARKER)
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<RunId> for String {
    fn from(value: RunId) -> Self {
        value.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
