//! Completion reports: the ordered results of a finished run, delivered to one sink.
//!
//! Sinks:
//! - **log**: one structured log line per notification
//! - **file**: one JSON report per notification in `report.directory`
//! - **webhook**: JSON POST with exponential-backoff retry

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::config::{ReportConfig, ReportSink};
use crate::error::PromptqError;
use crate::models::ReportedResult;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a completion report. Implementations treat an empty list as a no-op.
    async fn notify(&self, owner_id: i64, results: &[ReportedResult]) -> Result<(), PromptqError>;

    fn name(&self) -> &str;
}

/// Body written or posted by the file and webhook sinks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub owner_id: i64,
    pub generated_at: DateTime<Utc>,
    pub results: Vec<ReportedResult>,
}

impl RunReport {
    pub fn new(owner_id: i64, results: &[ReportedResult]) -> Self {
        Self {
            owner_id,
            generated_at: Utc::now(),
            results: results.to_vec(),
        }
    }
}

pub fn create_notifier(config: &ReportConfig) -> Result<Box<dyn Notifier>, PromptqError> {
    match config.sink {
        ReportSink::Log => Ok(Box::new(LogNotifier)),
        ReportSink::File => Ok(Box::new(FileNotifier::new(&config.directory))),
        ReportSink::Webhook => {
            let url = config
                .webhook_url
                .clone()
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| PromptqError::Other("report.webhook_url is required for the webhook sink".into()))?;
            Ok(Box::new(WebhookNotifier::new(url, config.max_retries, config.retry_delay_ms)?))
        }
    }
}

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, owner_id: i64, results: &[ReportedResult]) -> Result<(), PromptqError> {
        if results.is_empty() {
            return Ok(());
        }
        let models: Vec<&str> = results.iter().map(|r| r.model.as_str()).collect();
        tracing::info!(owner_id, count = results.len(), models = ?models, "Run report ready");
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

pub struct FileNotifier {
    directory: PathBuf,
}

impl FileNotifier {
    /// `directory` may start with `~`.
    pub fn new(directory: &str) -> Self {
        Self {
            directory: PathBuf::from(shellexpand::tilde(directory).into_owned()),
        }
    }
}

#[async_trait]
impl Notifier for FileNotifier {
    async fn notify(&self, owner_id: i64, results: &[ReportedResult]) -> Result<(), PromptqError> {
        if results.is_empty() {
            return Ok(());
        }
        let report = RunReport::new(owner_id, results);
        let path = self.directory.join(format!(
            "report_{}_{}.json",
            owner_id,
            report.generated_at.timestamp_millis()
        ));

        tokio::fs::create_dir_all(&self.directory).await?;
        tokio::fs::write(&path, serde_json::to_vec_pretty(&report)?).await?;

        tracing::info!(owner_id, path = %path.display(), "Run report written");
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}

pub struct WebhookNotifier {
    client: Client,
    url: String,
    max_retries: usize,
    retry_delay_ms: u64,
}

impl WebhookNotifier {
    pub fn new(url: String, max_retries: usize, retry_delay_ms: u64) -> Result<Self, PromptqError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PromptqError::Other(e.to_string()))?;
        Ok(Self {
            client,
            url,
            max_retries,
            retry_delay_ms,
        })
    }

    async fn post_once(&self, report: &RunReport) -> Result<(), PromptqError> {
        let response = self
            .client
            .post(&self.url)
            .json(report)
            .send()
            .await
            .map_err(|e| PromptqError::Other(format!("webhook request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PromptqError::Other(format!(
                "webhook returned {}: {}",
                status.as_u16(),
                body
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, owner_id: i64, results: &[ReportedResult]) -> Result<(), PromptqError> {
        if results.is_empty() {
            return Ok(());
        }
        let report = RunReport::new(owner_id, results);

        let retry_strategy = ExponentialBackoff::from_millis(self.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries);

        Retry::spawn(retry_strategy, || self.post_once(&report))
            .await
            .map_err(|e| {
                tracing::error!(owner_id, attempts = self.max_retries + 1, error = %e, "Webhook delivery failed");
                e
            })?;

        tracing::info!(owner_id, count = results.len(), "Run report delivered to webhook");
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_results() -> Vec<ReportedResult> {
        vec![
            ReportedResult {
                id: 1,
                prompt: "Capital of France?".to_string(),
                model: "gpt-4o".to_string(),
                answer: "Paris".to_string(),
                created_at: Utc::now(),
            },
            ReportedResult {
                id: 2,
                prompt: "Capital of France?".to_string(),
                model: "claude-3-5-sonnet".to_string(),
                answer: "Paris.".to_string(),
                created_at: Utc::now(),
            },
        ]
    }

    #[tokio::test]
    async fn test_file_notifier_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = FileNotifier::new(dir.path().to_str().unwrap());
        let results = sample_results();

        notifier.notify(7, &results).await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);

        let path = entries[0].as_ref().unwrap().path();
        let report: RunReport = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(report.owner_id, 7);
        assert_eq!(report.results, results);
    }

    #[tokio::test]
    async fn test_file_notifier_skips_empty() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = FileNotifier::new(dir.path().to_str().unwrap());

        notifier.notify(7, &[]).await.unwrap();

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_webhook_retries_then_succeeds() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock_server)
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hook", mock_server.uri()), 2, 10).unwrap();
        let result = notifier.notify(3, &sample_results()).await;

        assert!(result.is_ok(), "expected delivery after retry: {:?}", result.err());
        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
    }

    #[tokio::test]
    async fn test_webhook_gives_up_after_retries() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hook", mock_server.uri()), 1, 10).unwrap();
        let result = notifier.notify(3, &sample_results()).await;

        assert!(result.is_err());
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_webhook_empty_results_sends_nothing() {
        let mock_server = MockServer::start().await;
        let notifier = WebhookNotifier::new(format!("{}/hook", mock_server.uri()), 1, 10).unwrap();

        notifier.notify(3, &[]).await.unwrap();

        assert!(mock_server.received_requests().await.unwrap().is_empty());
    }

    #[test]
    fn test_create_notifier_requires_webhook_url() {
        let config = ReportConfig {
            sink: ReportSink::Webhook,
            webhook_url: None,
            ..ReportConfig::default()
        };
        assert!(create_notifier(&config).is_err());

        let config = ReportConfig::default();
        assert_eq!(create_notifier(&config).unwrap().name(), "log");
    }
}
