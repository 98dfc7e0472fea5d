//! Job executor: one provider call per claimed job, optional comparison
//! scoring, then a Result row plus the scratch row the completion detector
//! reads.
//!
//! Failures are split the way operators need them:
//! - bad payload or unresolvable credential: job `failed`, no retry
//! - provider error: job `completed` with an error-flavoured answer
//! - scoring error: `comparison_failed`, the result is still written

use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use promptq_core::models::{
    provider_error_answer, Job, JobPayload, NewResult, NewRunResult, ProviderRequestPayload,
};
use promptq_core::provider::resolve_credential;
use serde::Serialize;

use super::compare;
use super::summary::{self, SummaryRequest};
use crate::state::QueueState;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Completed { job_id: i64, result_id: i64 },
    Failed { job_id: i64, error: String },
}

/// Execute a job this dispatcher has already claimed (status `processing`).
pub async fn execute_job(state: &QueueState, job: &Job) -> ExecutionOutcome {
    let job_id = job.id;

    let error = match run_job(state, job).await {
        Ok(result_id) => match state.store.mark_completed(job_id).await {
            Ok(true) => return ExecutionOutcome::Completed { job_id, result_id },
            Ok(false) => {
                tracing::warn!(job_id, "Job left processing before completion could be recorded");
                return ExecutionOutcome::Completed { job_id, result_id };
            }
            Err(e) => format!("failed to record completion: {}", e),
        },
        Err(e) => format!("{:#}", e),
    };

    tracing::error!(job_id, owner_id = job.owner_id, run_id = %job.run_id, error = %error, "Job failed");
    if let Err(e) = state.store.mark_failed(job_id, &error).await {
        tracing::error!(job_id, "Failed to mark job failed: {}", e);
    }
    ExecutionOutcome::Failed { job_id, error }
}

async fn run_job(state: &QueueState, job: &Job) -> Result<i64> {
    match job.decode_payload()? {
        JobPayload::ProviderRequest(request) => run_provider_request(state, job, request).await,
    }
}

async fn run_provider_request(state: &QueueState, job: &Job, request: ProviderRequestPayload) -> Result<i64> {
    request.validate()?;
    let reference = request.credential.as_deref().unwrap_or_default();
    let credential = resolve_credential(reference)
        .ok_or_else(|| anyhow!("credential reference '{}' did not resolve", reference))?;

    let started = Instant::now();
    let response = state
        .provider
        .call(&credential, &request.prompt, &request.model)
        .await;
    let duration_ms = started.elapsed().as_millis() as i64;

    let model = if response.model.trim().is_empty() {
        request.model.clone()
    } else {
        response.model.clone()
    };
    let answer = if response.is_success() {
        response.answer.clone()
    } else {
        provider_error_answer(response.status_code, response.error.as_deref().unwrap_or_default())
    };
    let expected = request.expected_answer();

    let mut comparison_score = None;
    let mut comparison_failed = false;
    if let Some(expected) = expected {
        if state.config.scoring.enabled && response.is_success() && !answer.trim().is_empty() {
            match compare::compare(
                state.provider.as_ref(),
                &credential,
                &state.config.scoring.model,
                &answer,
                expected,
                &request.prompt,
            )
            .await
            {
                Ok(score) => comparison_score = Some(score as i16),
                Err(e) => {
                    tracing::warn!(job_id = job.id, model = %model, "Comparison failed: {}", e);
                    comparison_failed = true;
                }
            }
        }
    }

    let result_id = state
        .store
        .insert_result(NewResult {
            owner_id: job.owner_id,
            run_id: Some(job.run_id.clone()),
            prompt: request.prompt.clone(),
            model: model.clone(),
            answer: answer.clone(),
            expected_answer: expected.map(str::to_string),
            comparison_score,
            comparison_failed,
            duration_ms: Some(duration_ms),
        })
        .await
        .context("insert result")?;

    state
        .store
        .insert_run_result(NewRunResult {
            run_id: job.run_id.clone(),
            result_id,
            owner_id: job.owner_id,
            prompt: request.prompt.clone(),
            model: model.clone(),
            answer,
        })
        .await
        .context("insert run result")?;

    tracing::info!(
        job_id = job.id,
        owner_id = job.owner_id,
        run_id = %job.run_id,
        model = %model,
        duration_ms,
        status = response.status_code,
        score = ?comparison_score,
        "Job executed"
    );

    maybe_summarize(state, job, &request, &credential).await;
    Ok(result_id)
}

/// Summary generation runs after the result is safely stored; its failures
/// are logged and never fail the job.
async fn maybe_summarize(state: &QueueState, job: &Job, request: &ProviderRequestPayload, credential: &str) {
    let Some(prompt_id) = request.prompt_id.as_deref().filter(|id| !id.trim().is_empty()) else {
        return;
    };
    if request.expected_models.is_empty() {
        return;
    }

    let complete = match summary::are_all_models_complete(
        state.store.as_ref(),
        &request.prompt,
        &request.expected_models,
    )
    .await
    {
        Ok(complete) => complete,
        Err(e) => {
            tracing::warn!(job_id = job.id, prompt_id, "Model completion check failed: {}", e);
            return;
        }
    };
    if !complete {
        return;
    }

    let summary_request = SummaryRequest {
        prompt_id,
        prompt: &request.prompt,
        expected_answer: request.expected_answer(),
        run_id: &job.run_id,
        credential,
    };
    if let Err(e) = summary::generate_prompt_summary(state, summary_request).await {
        tracing::warn!(job_id = job.id, prompt_id, "Summary generation failed: {}", e);
    }
}

// ============================================================================
// TESTS
// ============================================================================
