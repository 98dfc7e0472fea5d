use std::sync::Arc;

use promptq_core::{LlmProvider, Notifier, PromptqConfig, Store};
use sqlx::PgPool;

/// Handles shared by the dispatcher, the IPC server and the HTTP API.
///
/// Holds no queue state of its own: everything that must survive across
/// dispatch invocations lives in the store.
pub struct QueueState {
    pub store: Arc<dyn Store>,
    pub provider: Arc<dyn LlmProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub config: PromptqConfig,
    /// Set when the store is Postgres-backed; used by health checks.
    pub pool: Option<PgPool>,
}

impl QueueState {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn LlmProvider>,
        notifier: Arc<dyn Notifier>,
        config: PromptqConfig,
    ) -> Self {
        Self {
            store,
            provider,
            notifier,
            config,
            pool: None,
        }
    }

    pub fn with_pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn store_backend(&self) -> &'static str {
        if self.pool.is_some() {
            "postgres"
        } else {
            "memory"
        }
    }

    /// Store health: the Postgres version string, or the backend name.
    pub async fn health(&self) -> Result<String, sqlx::Error> {
        match &self.pool {
            Some(pool) => promptq_core::db::health_check(pool).await,
            None => Ok(self.store_backend().to_string()),
        }
    }
}
