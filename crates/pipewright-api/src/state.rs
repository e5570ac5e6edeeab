//! Application state shared by the CLI and the REST API.
//!
//! AppState pins the engine to the SQLite store and, when a worker endpoint
//! is configured, to the HTTP delegate client.

use std::path::PathBuf;
use std::sync::Arc;

use pipewright_core::engine::OrchestrationEngine;
use pipewright_infra::config::{ensure_data_dir, load_engine_config, resolve_data_dir, resolve_database_url};
use pipewright_infra::delegate::HttpDelegateClient;
use pipewright_infra::sqlite::SqliteStore;
use pipewright_types::config::EngineConfig;

/// The engine as wired by this binary.
pub type Engine = OrchestrationEngine<SqliteStore>;

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub config: Arc<EngineConfig>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Open the store in the resolved data directory and start the engine.
    pub async fn init() -> anyhow::Result<Self> {
        Self::open(resolve_data_dir()).await
    }

    pub async fn open(data_dir: PathBuf) -> anyhow::Result<Self> {
        ensure_data_dir(&data_dir).await?;
        let config = load_engine_config(&data_dir).await;

        let database_url = resolve_database_url(&config, &data_dir);
        let store = SqliteStore::connect(&database_url).await?;

        let mut builder = OrchestrationEngine::builder(store).config(config.clone());
        if let Some(client) = HttpDelegateClient::from_config(&config.delegate) {
            tracing::info!(base_url = client.base_url(), "remote worker configured");
            builder = builder.delegate_client(client);
        }

        let engine = builder.build();
        engine.start().await?;

        Ok(Self {
            engine,
            config: Arc::new(config),
            data_dir,
        })
    }
}
