//! Application state wiring all services together.
//!
//! AppState holds the concrete messaging runtime and adapters used by both
//! the CLI and the REST API. Core components are generic over their ports;
//! AppState pins them to the SQLite and loopback implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use courier_core::repository::notifier::NoopNotifier;
use courier_core::runtime::MessagingRuntime;
use courier_infra::config::load_config;
use courier_infra::filesystem::resolve_data_dir;
use courier_infra::sqlite::job::SqliteJobStore;
use courier_infra::sqlite::message::SqliteMessageStore;
use courier_infra::sqlite::pool::DatabasePool;
use courier_infra::sqlite::settings::SqliteSettingsRepository;
use courier_infra::transport::loopback::LoopbackConnector;
use courier_types::config::CourierConfig;

/// The runtime pinned to the infra implementations.
pub type ConcreteRuntime =
    MessagingRuntime<LoopbackConnector, SqliteJobStore, SqliteSettingsRepository, SqliteSettingsRepository>;

/// Shared application state.
///
/// Used by both CLI commands and REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<ConcreteRuntime>,
    pub connector: LoopbackConnector,
    pub store: SqliteMessageStore,
    pub settings: SqliteSettingsRepository,
    pub config: Arc<CourierConfig>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Resolve the data directory, open the database, load `config.toml`
    /// and start the messaging runtime, resuming any queued jobs.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        Self::init_in(&data_dir).await
    }

    pub async fn init_in(data_dir: &Path) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;

        let db_pool = DatabasePool::open(data_dir).await?;
        let config = load_config(data_dir).await;

        let store = SqliteMessageStore::new(db_pool.clone());
        let jobs = SqliteJobStore::new(db_pool.clone());
        let settings = SqliteSettingsRepository::new(db_pool);
        let connector = LoopbackConnector::new();

        let runtime = MessagingRuntime::start(
            &config,
            connector.clone(),
            jobs,
            store.clone(),
            NoopNotifier,
            settings.clone(),
            settings.clone(),
        )
        .await?;

        Ok(Self {
            runtime: Arc::new(runtime),
            connector,
            store,
            settings,
            config: Arc::new(config),
            data_dir: data_dir.to_path_buf(),
        })
    }

    pub async fn shutdown(&self) {
        self.runtime.shutdown().await;
    }
}
