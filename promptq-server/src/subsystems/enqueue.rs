//! Job submission and run grouping.
//!
//! Every job spawned by one logical "execute prompts" action must carry the
//! same run id, even though each job is its own row:
//!
//! - batch: reuse the run id of any batch job the owner still has in flight,
//!   else a caller-supplied id, else mint `{owner}_batch_{millis}`
//! - single item: a caller-supplied id, else `{owner}_prompt_{prompt_id}`,
//!   else an id derived from the prompt text
//!
//! Caller-supplied ids are only honoured when prefixed with the owner id, so
//! two owners can never end up in one run.
//!
//! Input problems surface as [`PayloadError`] so callers can tell them apart
//! from store failures.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use promptq_core::models::{
    BatchEnqueueRequest, JobPayload, JobStatus, JobType, NewJob, ProviderRequestPayload, RunId,
};
use promptq_core::{PayloadError, PromptqConfig, Store};
use serde::Serialize;

pub const DEFAULT_PRIORITY: i32 = 0;

// ============================================================================
// PUBLIC API
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Enqueued {
    pub job_id: i64,
    pub run_id: RunId,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchEnqueued {
    pub run_id: RunId,
    pub job_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// A new pending job was created with the failed job's payload.
    Requeued(i64),
    NotFound,
    NotFailed(JobStatus),
}

/// Enqueue one job. Returns the new job id and the run it was grouped into.
pub async fn enqueue(
    store: &dyn Store,
    config: &PromptqConfig,
    job_type: JobType,
    payload: serde_json::Value,
    priority: Option<i32>,
) -> Result<Enqueued> {
    match JobPayload::decode(job_type, &payload)? {
        JobPayload::ProviderRequest(mut request) => {
            check_owner(request.owner_id)?;
            apply_defaults(&mut request, config);

            let run_id = resolve_run_id(store, &request, Utc::now()).await?;
            let job_id = insert_provider_request(store, request, run_id.clone(), priority).await?;
            Ok(Enqueued { job_id, run_id })
        }
    }
}

/// Enqueue several prompt/model pairs as one batch run.
///
/// `expected_models` on each job lists every model the same prompt text was
/// sent to in this batch.
pub async fn enqueue_batch(
    store: &dyn Store,
    config: &PromptqConfig,
    request: BatchEnqueueRequest,
) -> Result<BatchEnqueued> {
    let owner_id = request.owner_id;
    check_owner(owner_id)?;
    if request.items.is_empty() {
        return Err(PayloadError::Invalid(format!("batch for owner {} has no items", owner_id)).into());
    }

    let credential = non_blank(request.credential)
        .unwrap_or_else(|| config.provider.credential.clone());

    let mut payloads: Vec<ProviderRequestPayload> = request
        .items
        .into_iter()
        .map(|item| ProviderRequestPayload {
            owner_id,
            model: non_blank(item.model).unwrap_or_else(|| config.provider.default_model.clone()),
            prompt: item.prompt,
            prompt_id: item.prompt_id,
            expected_answer: item.expected_answer,
            expected_models: Vec::new(),
            credential: Some(credential.clone()),
            run_id: None,
            is_batch: true,
        })
        .collect();

    let mut models_by_prompt: HashMap<String, Vec<String>> = HashMap::new();
    for payload in &payloads {
        let models = models_by_prompt.entry(payload.prompt.clone()).or_default();
        if !models.contains(&payload.model) {
            models.push(payload.model.clone());
        }
    }
    for payload in &mut payloads {
        payload.expected_models = models_by_prompt
            .get(&payload.prompt)
            .cloned()
            .unwrap_or_default();
    }

    let run_id = resolve_run_id(store, &payloads[0], Utc::now()).await?;

    let mut job_ids = Vec::with_capacity(payloads.len());
    for payload in payloads {
        job_ids.push(insert_provider_request(store, payload, run_id.clone(), request.priority).await?);
    }

    tracing::info!(owner_id, run_id = %run_id, jobs = job_ids.len(), "Batch enqueued");
    Ok(BatchEnqueued { run_id, job_ids })
}

/// Operator retry: a failed job stays failed and a fresh pending copy is
/// inserted with the same payload and run id.
pub async fn retry_job(store: &dyn Store, job_id: i64) -> Result<RetryOutcome> {
    let Some(job) = store.find_job(job_id).await? else {
        return Ok(RetryOutcome::NotFound);
    };
    if job.status != JobStatus::Failed {
        return Ok(RetryOutcome::NotFailed(job.status));
    }

    let new_id = store
        .insert_job(NewJob {
            owner_id: job.owner_id,
            job_type: job.job_type,
            payload: job.payload,
            run_id: job.run_id.clone(),
            is_batch: job.is_batch,
            priority: job.priority,
        })
        .await?;

    tracing::info!(job_id, new_job_id = new_id, run_id = %job.run_id, "Failed job requeued");
    Ok(RetryOutcome::Requeued(new_id))
}

/// Run id for a job about to be inserted. See the module docs for the rules.
pub async fn resolve_run_id(
    store: &dyn Store,
    payload: &ProviderRequestPayload,
    now: DateTime<Utc>,
) -> Result<RunId> {
    let owner_id = payload.owner_id;

    if payload.is_batch {
        if let Some(active) = store.find_active_batch_run(owner_id).await? {
            return Ok(active);
        }
    }
    if let Some(supplied) = owned_run_id(payload) {
        return Ok(supplied);
    }
    if payload.is_batch {
        return Ok(RunId::for_batch(owner_id, now));
    }

    let prompt_id = payload
        .prompt_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());
    Ok(match prompt_id {
        Some(prompt_id) => RunId::for_prompt(owner_id, prompt_id),
        None => RunId::for_prompt_text(owner_id, &payload.prompt),
    })
}

// ============================================================================
// INTERNALS
// ============================================================================

fn check_owner(owner_id: i64) -> Result<(), PayloadError> {
    if owner_id <= 0 {
        return Err(PayloadError::Invalid(format!("owner_id must be positive, got {}", owner_id)));
    }
    Ok(())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn apply_defaults(request: &mut ProviderRequestPayload, config: &PromptqConfig) {
    if request.model.trim().is_empty() {
        request.model = config.provider.default_model.clone();
    }
    if request.credential.as_deref().map_or(true, |c| c.trim().is_empty()) {
        request.credential = Some(config.provider.credential.clone());
    }
}

fn owned_run_id(payload: &ProviderRequestPayload) -> Option<RunId> {
    let run_id = payload.run_id.as_ref().filter(|r| !r.is_empty())?;
    if run_id.as_str().starts_with(&format!("{}_", payload.owner_id)) {
        Some(run_id.clone())
    } else {
        tracing::warn!(
            owner_id = payload.owner_id,
            run_id = %run_id,
            "Ignoring run id that belongs to another owner"
        );
        None
    }
}

async fn insert_provider_request(
    store: &dyn Store,
    mut request: ProviderRequestPayload,
    run_id: RunId,
    priority: Option<i32>,
) -> Result<i64> {
    request.run_id = Some(run_id.clone());
    let owner_id = request.owner_id;
    let is_batch = request.is_batch;
    let model = request.model.clone();

    let payload = JobPayload::ProviderRequest(request);
    let job_id = store
        .insert_job(NewJob {
            owner_id,
            job_type: payload.job_type(),
            payload: payload.to_value()?,
            run_id: run_id.clone(),
            is_batch,
            priority: priority.unwrap_or(DEFAULT_PRIORITY),
        })
        .await?;

    tracing::debug!(job_id, owner_id, run_id = %run_id, model = %model, "Job enqueued");
    Ok(job_id)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_config;
    use promptq_core::models::BatchItem;
    use promptq_core::store::JobStore;
    use promptq_core::MemoryStore;
    use serde_json::json;

    fn batch(owner_id: i64, items: &[(&str, &str)]) -> BatchEnqueueRequest {
        BatchEnqueueRequest {
            owner_id,
            items: items
                .iter()
                .map(|(prompt, model)| BatchItem {
                    prompt: prompt.to_string(),
                    model: Some(model.to_string()),
                    prompt_id: Some("p1".to_string()),
                    expected_answer: None,
                })
                .collect(),
            priority: None,
            credential: None,
        }
    }

    async fn payload_of(store: &MemoryStore, job_id: i64) -> ProviderRequestPayload {
        let job = store.find_job(job_id).await.unwrap().unwrap();
        let JobPayload::ProviderRequest(p) = job.decode_payload().unwrap();
        p
    }

    #[tokio::test]
    async fn test_batch_jobs_share_one_run_id() {
        let store = MemoryStore::new();
        let config = test_config();

        let out = enqueue_batch(
            &store,
            &config,
            batch(7, &[("Capital of France?", "gpt-4o"), ("Capital of France?", "claude-3-5"), ("2+2?", "gpt-4o")]),
        )
        .await
        .unwrap();

        assert_eq!(out.job_ids.len(), 3);
        assert!(out.run_id.is_batch());
        assert!(out.run_id.as_str().starts_with("7_batch_"));
        for id in &out.job_ids {
            let job = store.find_job(*id).await.unwrap().unwrap();
            assert_eq!(job.run_id, out.run_id);
            assert!(job.is_batch);
            let p = payload_of(&store, *id).await;
            assert_eq!(p.run_id.as_ref(), Some(&out.run_id));
        }

        let first = payload_of(&store, out.job_ids[0]).await;
        assert_eq!(first.expected_models, vec!["gpt-4o", "claude-3-5"]);
        let third = payload_of(&store, out.job_ids[2]).await;
        assert_eq!(third.expected_models, vec!["gpt-4o"]);
    }

    #[tokio::test]
    async fn test_batch_reuses_in_flight_run_until_it_finishes() {
        let store = MemoryStore::new();
        let config = test_config();

        let first = enqueue_batch(&store, &config, batch(7, &[("a", "gpt-4o")])).await.unwrap();
        let second = enqueue_batch(&store, &config, batch(7, &[("b", "gpt-4o")])).await.unwrap();
        assert_eq!(first.run_id, second.run_id);

        for id in first.job_ids.iter().chain(second.job_ids.iter()) {
            assert!(store.claim(*id).await.unwrap());
            assert!(store.mark_completed(*id).await.unwrap());
        }

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let third = enqueue_batch(&store, &config, batch(7, &[("c", "gpt-4o")])).await.unwrap();
        assert_ne!(third.run_id, first.run_id);
    }

    #[tokio::test]
    async fn test_owners_never_share_a_run() {
        let store = MemoryStore::new();
        let config = test_config();

        let a = enqueue_batch(&store, &config, batch(1, &[("q", "gpt-4o")])).await.unwrap();
        let b = enqueue_batch(&store, &config, batch(12, &[("q", "gpt-4o")])).await.unwrap();
        assert_ne!(a.run_id, b.run_id);

        // A caller cannot smuggle another owner's run id in.
        let hijack = enqueue(
            &store,
            &config,
            JobType::ProviderRequest,
            json!({"owner_id": 12, "prompt": "q", "prompt_id": "p9", "run_id": a.run_id.as_str()}),
            None,
        )
        .await
        .unwrap();
        assert_eq!(hijack.run_id.as_str(), "12_prompt_p9");
    }

    #[tokio::test]
    async fn test_single_item_run_ids() {
        let store = MemoryStore::new();
        let config = test_config();

        let supplied = enqueue(
            &store,
            &config,
            JobType::ProviderRequest,
            json!({"owner_id": 3, "prompt": "q", "run_id": "3_custom"}),
            None,
        )
        .await
        .unwrap();
        assert_eq!(supplied.run_id.as_str(), "3_custom");

        let by_prompt = enqueue(
            &store,
            &config,
            JobType::ProviderRequest,
            json!({"owner_id": 3, "prompt": "q", "prompt_id": "42"}),
            None,
        )
        .await
        .unwrap();
        assert_eq!(by_prompt.run_id.as_str(), "3_prompt_42");

        let by_text_a = enqueue(&store, &config, JobType::ProviderRequest, json!({"owner_id": 3, "prompt": "same"}), None)
            .await
            .unwrap();
        let by_text_b = enqueue(&store, &config, JobType::ProviderRequest, json!({"owner_id": 3, "prompt": "same"}), None)
            .await
            .unwrap();
        assert_eq!(by_text_a.run_id, by_text_b.run_id);
        assert_ne!(by_text_a.job_id, by_text_b.job_id);
    }

    #[tokio::test]
    async fn test_enqueue_applies_configured_defaults() {
        let store = MemoryStore::new();
        let config = test_config();

        let out = enqueue(
            &store,
            &config,
            JobType::ProviderRequest,
            json!({"owner_id": 5, "prompt": "hello"}),
            Some(9),
        )
        .await
        .unwrap();

        let job = store.find_job(out.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.priority, 9);

        let p = payload_of(&store, out.job_id).await;
        assert_eq!(p.model, "gpt-4o");
        assert_eq!(p.credential.as_deref(), Some("sk-test"));
    }

    #[tokio::test]
    async fn test_enqueue_rejects_bad_input() {
        let store = MemoryStore::new();
        let config = test_config();

        assert!(enqueue(&store, &config, JobType::ProviderRequest, json!({"prompt": "x"}), None)
            .await
            .is_err());
        assert!(enqueue(&store, &config, JobType::ProviderRequest, json!({"owner_id": 0, "prompt": "x"}), None)
            .await
            .is_err());
        assert!(enqueue_batch(&store, &config, batch(1, &[])).await.is_err());
        assert_eq!(store.job_stats().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_retry_only_requeues_failed_jobs() {
        let store = MemoryStore::new();
        let config = test_config();

        let out = enqueue(&store, &config, JobType::ProviderRequest, json!({"owner_id": 2, "prompt": "x"}), None)
            .await
            .unwrap();
        assert_eq!(
            retry_job(&store, out.job_id).await.unwrap(),
            RetryOutcome::NotFailed(JobStatus::Pending)
        );
        assert_eq!(retry_job(&store, 999).await.unwrap(), RetryOutcome::NotFound);

        store.claim(out.job_id).await.unwrap();
        store.mark_failed(out.job_id, "boom").await.unwrap();

        let RetryOutcome::Requeued(new_id) = retry_job(&store, out.job_id).await.unwrap() else {
            panic!("failed job should be requeued");
        };
        let old = store.find_job(out.job_id).await.unwrap().unwrap();
        let new = store.find_job(new_id).await.unwrap().unwrap();
        assert_eq!(old.status, JobStatus::Failed);
        assert_eq!(new.status, JobStatus::Pending);
        assert_eq!(new.run_id, old.run_id);
        assert_eq!(new.payload, old.payload);
    }
}
