use std::sync::Arc;

use promptq_core::ipc::{PromptqRequest, PromptqResponse};

use crate::state::QueueState;
use crate::subsystems::{dispatcher, enqueue};

/// Handle one IPC request. Every request except `Dispatch` also kicks off an
/// opportunistic dispatch cycle in the background.
pub async fn handle_request(request: PromptqRequest, state: &Arc<QueueState>) -> PromptqResponse {
    let opportunistic = !request.is_dispatch();
    let response = route(request, state).await;
    if opportunistic {
        dispatcher::spawn_opportunistic(state.clone());
    }
    response
}

async fn route(request: PromptqRequest, state: &Arc<QueueState>) -> PromptqResponse {
    match request {
        PromptqRequest::Ping => PromptqResponse::pong(),
        PromptqRequest::Health => match state.health().await {
            Ok(version) => PromptqResponse::ok(serde_json::json!({
                "store": state.store_backend(),
                "version": version,
                "provider": state.provider.name(),
                "notifier": state.notifier.name(),
                "status": "healthy"
            })),
            Err(e) => PromptqResponse::err(format!("Store health check failed: {}", e)),
        },
        PromptqRequest::Enqueue {
            job_type,
            payload,
            priority,
        } => match enqueue::enqueue(state.store.as_ref(), &state.config, job_type, payload, priority).await {
            Ok(out) => PromptqResponse::ok(serde_json::json!({
                "queued": true,
                "job_id": out.job_id,
                "run_id": out.run_id,
            })),
            Err(e) => PromptqResponse::err(format!("{:#}", e)),
        },
        PromptqRequest::EnqueueBatch { request } => {
            match enqueue::enqueue_batch(state.store.as_ref(), &state.config, request).await {
                Ok(out) => to_response(&out),
                Err(e) => PromptqResponse::err(format!("{:#}", e)),
            }
        }
        PromptqRequest::Dispatch => match dispatcher::dispatch(state).await {
            Ok(report) => to_response(&report),
            Err(e) => PromptqResponse::err(format!("Dispatch failed: {}", e)),
        },
        PromptqRequest::Stats => match state.store.job_stats().await {
            Ok(stats) => to_response(&stats),
            Err(e) => PromptqResponse::err(e.to_string()),
        },
    }
}

fn to_response<T: serde::Serialize>(value: &T) -> PromptqResponse {
    match serde_json::to_value(value) {
        Ok(data) => PromptqResponse::ok(data),
        Err(e) => PromptqResponse::err(format!("Serialization error: {}", e)),
    }
}
