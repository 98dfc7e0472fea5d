use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

/// Lowest and highest accepted values for `queue.concurrency_limit`.
pub const MIN_CONCURRENCY: u32 = 1;
pub const MAX_CONCURRENCY: u32 = 5;

#[derive(Debug, Deserialize, Clone)]
pub struct PromptqConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub socket_path: String,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    pub concurrency_limit: u32,
    pub dispatch_interval_seconds: u64,
    pub retention_days: u32,
    pub retention_interval_minutes: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 2,
            dispatch_interval_seconds: 60,
            retention_days: 30,
            retention_interval_minutes: 60,
        }
    }
}

impl QueueConfig {
    /// Maximum number of jobs allowed in `processing` at once, clamped to 1–5.
    pub fn concurrency_ceiling(&self) -> u32 {
        self.concurrency_limit.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub default_model: String,
    /// Credential reference stored on each job. `env:NAME` is resolved from
    /// the environment at execution time; anything else is used verbatim.
    #[serde(default = "default_credential")]
    pub credential: String,
    /// Absent means no client-side timeout on provider calls.
    #[serde(default)]
    pub request_timeout_seconds: Option<u64>,
}

fn default_credential() -> String {
    "env:PROMPTQ_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    pub enabled: bool,
    pub model: String,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "gpt-4o-mini".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportSink {
    #[default]
    Log,
    File,
    Webhook,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    #[serde(default)]
    pub sink: ReportSink,
    #[serde(default = "default_report_directory")]
    pub directory: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_report_directory() -> String {
    "~/.promptq/reports".to_string()
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            sink: ReportSink::Log,
            directory: default_report_directory(),
            webhook_url: None,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8767,
        }
    }
}

impl PromptqConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }

    /// Parse a config from an inline TOML document.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        s.try_deserialize()
    }
}
