use serde::{Deserialize, Serialize};

use crate::models::{BatchEnqueueRequest, JobType};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PromptqRequest {
    Ping,
    Health,
    Enqueue {
        #[serde(default)]
        job_type: JobType,
        payload: serde_json::Value,
        #[serde(default)]
        priority: Option<i32>,
    },
    EnqueueBatch {
        request: BatchEnqueueRequest,
    },
    Dispatch,
    Stats,
}

impl PromptqRequest {
    /// Requests that should not spawn an extra opportunistic dispatch cycle.
    pub fn is_dispatch(&self) -> bool {
        matches!(self, PromptqRequest::Dispatch)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PromptqResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub version: String,
}

impl PromptqResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}
