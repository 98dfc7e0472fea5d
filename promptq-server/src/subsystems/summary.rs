//! Cross-model prompt summaries.
//!
//! Once every expected model has answered a prompt, the results are
//! aggregated (score statistics over valid answers) and the scoring model is
//! asked for one narrative describing where the models agree. Summaries are
//! keyed by (prompt id, prompt text, expected answer) and replaced, never
//! duplicated, when newer results arrive.

use std::collections::BTreeSet;

use anyhow::Result;
use promptq_core::models::{NewPromptSummary, ResultRow, RunId, SummaryKey};
use promptq_core::Store;
use serde::Serialize;

use crate::state::QueueState;

#[derive(Debug, Clone)]
pub struct SummaryRequest<'a> {
    pub prompt_id: &'a str,
    pub prompt: &'a str,
    pub expected_answer: Option<&'a str>,
    pub run_id: &'a RunId,
    /// Resolved credential used for the narrative call.
    pub credential: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SummaryOutcome {
    Written { summary_id: i64 },
    UpToDate { summary_id: i64 },
    NoResults,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoreStats {
    pub model_count: i32,
    pub valid_count: i32,
    pub average: Option<f64>,
    pub min: Option<i16>,
    pub max: Option<i16>,
}

impl ScoreStats {
    pub fn from_results(results: &[ResultRow]) -> Self {
        let models: BTreeSet<&str> = results.iter().map(|r| r.model.as_str()).collect();
        let valid: Vec<&ResultRow> = results.iter().filter(|r| r.is_valid()).collect();
        let scores: Vec<i16> = valid.iter().filter_map(|r| r.comparison_score).collect();

        let average = if scores.is_empty() {
            None
        } else {
            Some(scores.iter().map(|s| *s as f64).sum::<f64>() / scores.len() as f64)
        };

        Self {
            model_count: models.len() as i32,
            valid_count: valid.len() as i32,
            average,
            min: scores.iter().min().copied(),
            max: scores.iter().max().copied(),
        }
    }
}

/// True when every expected model has at least one result for this prompt
/// text. Stored model ids match by prefix, so `gpt-4o` is satisfied by
/// `gpt-4o-2024-08-06`.
pub async fn are_all_models_complete(
    store: &dyn Store,
    prompt: &str,
    expected_models: &[String],
) -> Result<bool> {
    if expected_models.is_empty() {
        return Ok(false);
    }
    let answered = store.models_with_results(prompt).await?;
    Ok(expected_models
        .iter()
        .all(|expected| answered.iter().any(|model| model.starts_with(expected.as_str()))))
}

/// Build (or rebuild) the summary for one prompt.
///
/// Results are gathered by exact run id; rows without a run id fall back to
/// the window starting at the run's earliest job. An existing summary is kept
/// unless one of the gathered results is newer than it.
pub async fn generate_prompt_summary(
    state: &QueueState,
    request: SummaryRequest<'_>,
) -> Result<SummaryOutcome> {
    let store = state.store.as_ref();
    let key = SummaryKey::new(request.prompt_id, request.prompt, request.expected_answer);

    let since = store.earliest_job_in_run(request.run_id).await?;
    let results = store
        .results_for_prompt(request.prompt, Some(request.run_id), since)
        .await?;
    let Some(newest) = results.iter().map(|r| r.created_at).max() else {
        return Ok(SummaryOutcome::NoResults);
    };

    if let Some(existing) = store.find_summary(&key).await? {
        if newest <= existing.completed_at {
            tracing::debug!(
                prompt_id = request.prompt_id,
                summary_id = existing.id,
                "Summary already covers the latest results"
            );
            return Ok(SummaryOutcome::UpToDate {
                summary_id: existing.id,
            });
        }
    }

    let stats = ScoreStats::from_results(&results);
    let narrative = request_narrative(state, &request, &results, &stats).await;

    let summary_id = store
        .replace_summary(NewPromptSummary {
            key,
            run_id: Some(request.run_id.to_string()),
            model_count: stats.model_count,
            valid_count: stats.valid_count,
            average_score: stats.average,
            min_score: stats.min,
            max_score: stats.max,
            narrative,
        })
        .await?;

    tracing::info!(
        prompt_id = request.prompt_id,
        run_id = %request.run_id,
        summary_id,
        models = stats.model_count,
        valid = stats.valid_count,
        "Prompt summary written"
    );
    Ok(SummaryOutcome::Written { summary_id })
}

pub fn build_narrative_prompt(prompt: &str, expected_answer: Option<&str>, results: &[ResultRow]) -> String {
    let mut text = String::from(
        "Several language models answered the same question. Write a short summary of how \
         their answers compare: where they agree, where they differ, and which answers look \
         most reliable. Write the summary in the same language as the question.\n\n",
    );
    text.push_str(&format!("Question:\n{}\n\n", prompt));
    if let Some(expected) = expected_answer {
        text.push_str(&format!("Expected answer:\n{}\n\n", expected));
    }
    text.push_str("Answers:\n");
    for result in results.iter().filter(|r| r.is_valid()) {
        match result.comparison_score {
            Some(score) => text.push_str(&format!("- {} (score {}/10): {}\n", result.model, score, result.answer.trim())),
            None => text.push_str(&format!("- {}: {}\n", result.model, result.answer.trim())),
        }
    }
    text
}

fn fallback_narrative(stats: &ScoreStats) -> String {
    match stats.average {
        Some(avg) => format!(
            "{} of {} models gave an answer; average score {:.1} (min {}, max {}).",
            stats.valid_count,
            stats.model_count,
            avg,
            stats.min.unwrap_or_default(),
            stats.max.unwrap_or_default()
        ),
        None => format!("{} of {} models gave an answer.", stats.valid_count, stats.model_count),
    }
}

async fn request_narrative(
    state: &QueueState,
    request: &SummaryRequest<'_>,
    results: &[ResultRow],
    stats: &ScoreStats,
) -> String {
    if stats.valid_count == 0 {
        return fallback_narrative(stats);
    }

    let prompt = build_narrative_prompt(request.prompt, request.expected_answer, results);
    let response = state
        .provider
        .call(request.credential, &prompt, &state.config.scoring.model)
        .await;

    if response.is_success() && !response.answer.trim().is_empty() {
        response.answer.trim().to_string()
    } else {
        tracing::warn!(
            prompt_id = request.prompt_id,
            status = response.status_code,
            "Narrative call failed, storing statistics only"
        );
        fallback_narrative(stats)
    }
}

// ============================================================================
// TESTS
// ============================================================================
