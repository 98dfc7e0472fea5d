//! LLM provider client.
//!
//! `LlmProvider::call` never fails: transport errors and non-2xx responses are
//! folded into the returned [`ProviderResponse`] so callers can record them as
//! answers instead of aborting the job.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ProviderConfig;

/// Status code reported when the request never produced an HTTP response.
pub const TRANSPORT_FAILURE: u16 = 0;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub model: String,
    pub answer: String,
    pub status_code: u16,
    pub error: Option<String>,
}

impl ProviderResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code) && self.error.is_none()
    }

    fn failure(model: &str, status_code: u16, error: String) -> Self {
        Self {
            model: model.to_string(),
            answer: String::new(),
            status_code,
            error: Some(error),
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Issue exactly one completion request.
    async fn call(&self, credential: &str, prompt: &str, model: &str) -> ProviderResponse;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Resolve a stored credential reference. `env:NAME` reads the environment
/// variable `NAME`; any other value is returned as-is. Blank results are `None`.
pub fn resolve_credential(reference: &str) -> Option<String> {
    let value = match reference.strip_prefix("env:") {
        Some(var) => std::env::var(var.trim()).ok()?,
        None => reference.to_string(),
    };
    let value = value.trim().to_string();
    (!value.is_empty()).then_some(value)
}

// ============================================================================
// OpenAI-compatible chat completions (private wire structs)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Client for any `/chat/completions` endpoint speaking the OpenAI wire format.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    client: Client,
    base_url: String,
}

impl OpenAiCompatibleClient {
    pub fn new(base_url: impl Into<String>, timeout: Option<Duration>) -> Result<Self, ProviderError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        Self::new(
            config.base_url.clone(),
            config.request_timeout_seconds.map(Duration::from_secs),
        )
    }

    async fn send(&self, credential: &str, prompt: &str, model: &str) -> Result<ProviderResponse, reqwest::Error> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(credential)
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(body);

            tracing::warn!(code = status.as_u16(), model, message = %message, "Provider returned error status");
            return Ok(ProviderResponse::failure(model, status.as_u16(), message));
        }

        let body: ChatResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(code = status.as_u16(), model, error = %e, "Provider response body did not decode");
                return Ok(ProviderResponse::failure(
                    model,
                    status.as_u16(),
                    format!("undecodable response body: {e}"),
                ));
            }
        };
        let answer = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(ProviderResponse {
            model: body.model.unwrap_or_else(|| model.to_string()),
            answer,
            status_code: status.as_u16(),
            error: None,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleClient {
    async fn call(&self, credential: &str, prompt: &str, model: &str) -> ProviderResponse {
        match self.send(credential, prompt, model).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(model, error = %e, "Provider request failed");
                let code = e.status().map(|s| s.as_u16()).unwrap_or(TRANSPORT_FAILURE);
                ProviderResponse::failure(model, code, e.to_string())
            }
        }
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chat_response(content: &str, model: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-1",
            "model": model,
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
        })
    }

    #[tokio::test]
    async fn test_call_returns_answer_and_provider_model() {
        let mock_server = MockServer::start().await;
        let client = OpenAiCompatibleClient::new(mock_server.uri(), None).unwrap();

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_json(serde_json::json!({
                "model": "gpt-4o",
                "messages": [{ "role": "user", "content": "Capital of France?" }]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(chat_response("Paris", "gpt-4o-2024-08-06")),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let response = client.call("sk-test", "Capital of France?", "gpt-4o").await;

        assert!(response.is_success(), "unexpected failure: {:?}", response.error);
        assert_eq!(response.answer, "Paris");
        assert_eq!(response.model, "gpt-4o-2024-08-06");
        assert_eq!(response.status_code, 200);
    }

    #[tokio::test]
    async fn test_error_status_is_returned_not_raised() {
        let mock_server = MockServer::start().await;
        let client = OpenAiCompatibleClient::new(mock_server.uri(), None).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "message": "Rate limit exceeded", "type": "rate_limit" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let response = client.call("sk-test", "hello", "gpt-4o").await;

        assert!(!response.is_success());
        assert_eq!(response.status_code, 429);
        assert_eq!(response.error.as_deref(), Some("Rate limit exceeded"));
        assert!(response.answer.is_empty());
        assert_eq!(response.model, "gpt-4o");
    }

    #[tokio::test]
    async fn test_non_json_error_body_is_kept_verbatim() {
        let mock_server = MockServer::start().await;
        let client = OpenAiCompatibleClient::new(mock_server.uri(), None).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&mock_server)
            .await;

        let response = client.call("sk-test", "hello", "gpt-4o").await;
        assert_eq!(response.status_code, 502);
        assert_eq!(response.error.as_deref(), Some("bad gateway"));
    }

    #[tokio::test]
    async fn test_undecodable_success_body_keeps_status() {
        let mock_server = MockServer::start().await;
        let client = OpenAiCompatibleClient::new(mock_server.uri(), None).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&mock_server)
            .await;

        let response = client.call("sk-test", "hello", "gpt-4o").await;
        assert_eq!(response.status_code, 200);
        assert!(!response.is_success());
        assert!(response.error.as_deref().unwrap().starts_with("undecodable response body"));
        assert!(response.answer.is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_reports_status_zero() {
        // Port 1 is reserved; connections are refused.
        let client =
            OpenAiCompatibleClient::new("http://127.0.0.1:1", Some(Duration::from_secs(2))).unwrap();

        let response = client.call("sk-test", "hello", "gpt-4o").await;
        assert_eq!(response.status_code, TRANSPORT_FAILURE);
        assert!(response.error.is_some());
        assert!(!response.is_success());
    }

    #[test]
    fn test_resolve_credential() {
        std::env::set_var("PROMPTQ_TEST_CREDENTIAL", "sk-from-env");
        assert_eq!(
            resolve_credential("env:PROMPTQ_TEST_CREDENTIAL").as_deref(),
            Some("sk-from-env")
        );
        assert_eq!(resolve_credential("sk-literal").as_deref(), Some("sk-literal"));
        assert_eq!(resolve_credential("env:PROMPTQ_TEST_UNSET_CREDENTIAL"), None);
        assert_eq!(resolve_credential("   "), None);
    }
}
