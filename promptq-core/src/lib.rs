pub mod config;
pub mod db;
pub mod error;
pub mod ipc;
pub mod models;
pub mod provider;
pub mod report;
pub mod store;

pub use config::PromptqConfig;
pub use error::{PayloadError, PromptqError};
pub use provider::{LlmProvider, OpenAiCompatibleClient, ProviderError, ProviderResponse};
pub use report::{create_notifier, Notifier};
pub use store::{memory::MemoryStore, postgres::PgStore, Store};
