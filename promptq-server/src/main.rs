use std::sync::Arc;

use clap::Parser;
use promptq_core::{create_notifier, MemoryStore, OpenAiCompatibleClient, PgStore, PromptqConfig, Store};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use promptq_server::server;
use promptq_server::state::QueueState;
use promptq_server::subsystems::{dispatcher, retention};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "promptq.toml")]
    config: String,

    #[arg(long)]
    health: bool,

    /// Keep the queue in process memory instead of Postgres (single node, not durable).
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = match PromptqConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    let (store, pool): (Arc<dyn Store>, Option<sqlx::PgPool>) = if args.memory {
        tracing::warn!("Using in-memory store; jobs are lost on restart");
        (Arc::new(MemoryStore::new()), None)
    } else {
        let pool = match promptq_core::db::create_pool(&config.database).await {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Failed to connect to database: {}", e);
                std::process::exit(1);
            }
        };
        if let Err(e) = promptq_core::db::ensure_schema(&pool).await {
            eprintln!("Failed to apply schema: {}", e);
            std::process::exit(1);
        }
        (Arc::new(PgStore::new(pool.clone())), Some(pool))
    };

    if args.health {
        match &pool {
            Some(pool) => match promptq_core::db::health_check(pool).await {
                Ok(v) => println!("✅ PostgreSQL connected: {}", v),
                Err(e) => {
                    println!("❌ PostgreSQL connection failed: {}", e);
                    std::process::exit(1);
                }
            },
            None => println!("✅ In-memory store ready"),
        }
        println!("✅ promptq health check passed");
        return Ok(());
    }

    let provider = match OpenAiCompatibleClient::from_config(&config.provider) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to build provider client: {}", e);
            std::process::exit(1);
        }
    };
    let notifier = match create_notifier(&config.report) {
        Ok(n) => n,
        Err(e) => {
            eprintln!("Failed to configure report sink: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(
        provider = %config.provider.base_url,
        sink = notifier.name(),
        ceiling = config.queue.concurrency_ceiling(),
        "promptq starting"
    );

    let mut state = QueueState::new(store, Arc::new(provider), Arc::from(notifier), config.clone());
    if let Some(pool) = pool {
        state = state.with_pool(pool);
    }
    let state = Arc::new(state);

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!("Failed to listen for Ctrl+C: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    tokio::spawn(dispatcher::run_dispatch_loop(state.clone(), tx.subscribe()));
    tokio::spawn(retention::run_retention_loop(state.clone(), tx.subscribe()));

    if config.http.enabled {
        let http_state = state.clone();
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = promptq_server::http::start_http_server(http_state, http_shutdown).await {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    let socket_path = shellexpand::tilde(&config.service.socket_path).into_owned();
    server::run_unix_server(&socket_path, state, tx.subscribe()).await?;

    Ok(())
}
