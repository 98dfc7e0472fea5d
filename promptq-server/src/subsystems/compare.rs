//! Comparison engine: scores one answer against an expected answer with a
//! single call to the scoring model.

use promptq_core::LlmProvider;
use regex::Regex;
use thiserror::Error;

pub const MIN_SCORE: u8 = 0;
pub const MAX_SCORE: u8 = 10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComparisonError {
    #[error("scoring call failed ({status}): {message}")]
    Provider { status: u16, message: String },

    /// The scoring model replied without any numeric token. Distinct from a 0 score.
    #[error("no score in scoring reply: {0:?}")]
    Unmeasurable(String),
}

pub fn build_scoring_prompt(answer: &str, expected: &str, original_prompt: &str) -> String {
    format!(
        "You are grading an answer against a reference answer.\n\n\
         Question:\n{original_prompt}\n\n\
         Reference answer:\n{expected}\n\n\
         Answer to grade:\n{answer}\n\n\
         Rate how well the answer matches the reference on a scale from 0 \
         (completely different) to 10 (equivalent in meaning). \
         Reply with a single number and nothing else."
    )
}

/// Score `answer` against `expected` on 0–10.
pub async fn compare(
    provider: &dyn LlmProvider,
    credential: &str,
    scoring_model: &str,
    answer: &str,
    expected: &str,
    original_prompt: &str,
) -> Result<u8, ComparisonError> {
    let prompt = build_scoring_prompt(answer, expected, original_prompt);
    let response = provider.call(credential, &prompt, scoring_model).await;

    if !response.is_success() {
        return Err(ComparisonError::Provider {
            status: response.status_code,
            message: response.error.unwrap_or_default(),
        });
    }

    extract_score(&response.answer).ok_or(ComparisonError::Unmeasurable(response.answer))
}

/// Pull a 0–10 score out of free text.
///
/// The first standalone token 0–10 wins; otherwise the first number of any
/// size (including one glued to a word, as in a leading or trailing digit)
/// is rounded and clamped to 0–10. `None` when the text holds no digits.
pub fn extract_score(text: &str) -> Option<u8> {
    let text = text.trim();
    standalone_token(text).or_else(|| first_number_clamped(text))
}

fn standalone_token(text: &str) -> Option<u8> {
    let re = Regex::new(r"\b(10|[0-9])\b").ok()?;
    let caps = re.captures(text)?;
    caps.get(1)?.as_str().parse().ok()
}

fn first_number_clamped(text: &str) -> Option<u8> {
    let re = Regex::new(r"-?[0-9]+(?:[.,][0-9]+)?").ok()?;
    let raw = re.find(text)?.as_str().replace(',', ".");
    let value: f64 = raw.parse().ok()?;
    Some(value.round().clamp(MIN_SCORE as f64, MAX_SCORE as f64) as u8)
}

// ============================================================================
// TESTS
// ============================================================================
