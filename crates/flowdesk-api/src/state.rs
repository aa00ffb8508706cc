//! Application state wiring the services together.
//!
//! The registry and engine are generic over repository traits; `AppState`
//! pins them to the SQLite implementations. Used by both the CLI and the
//! REST API.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use flowdesk_core::engine::{EngineOptions, ExecutionEngine};
use flowdesk_core::event::EventBus;
use flowdesk_core::report::ReportingService;
use flowdesk_core::workflow::WorkflowRegistry;
use flowdesk_infra::config::{load_global_config, resolve_data_dir};
use flowdesk_infra::sqlite::pool::database_url;
use flowdesk_infra::sqlite::{
    DatabasePool, SqliteAttemptStore, SqliteExecutionRepository, SqliteWorkflowRepository,
};
use flowdesk_types::config::GlobalConfig;

pub type ConcreteRegistry = WorkflowRegistry<SqliteWorkflowRepository>;

pub type ConcreteEngine =
    ExecutionEngine<SqliteWorkflowRepository, SqliteExecutionRepository, SqliteAttemptStore>;

pub type ConcreteReporting<'a> =
    ReportingService<'a, SqliteWorkflowRepository, SqliteExecutionRepository, SqliteAttemptStore>;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConcreteRegistry>,
    pub engine: Arc<ConcreteEngine>,
    pub events: EventBus,
    pub config: Arc<GlobalConfig>,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Resolve the data directory, load `config.toml`, open the database.
    pub async fn init() -> anyhow::Result<Self> {
        Self::open(&resolve_data_dir()).await
    }

    pub async fn open(data_dir: &Path) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let config = load_global_config(data_dir).await;

        let db_pool = DatabasePool::new(&database_url(data_dir)).await?;

        let events = EventBus::default();
        let registry = Arc::new(WorkflowRegistry::new(
            SqliteWorkflowRepository::new(db_pool.clone()),
            events.clone(),
        ));
        let engine = ExecutionEngine::new(
            Arc::clone(&registry),
            SqliteExecutionRepository::new(db_pool.clone()),
            SqliteAttemptStore::new(db_pool.clone()),
            events.clone(),
            EngineOptions::from_settings(&config.engine),
        );

        Ok(Self {
            registry,
            engine: Arc::new(engine),
            events,
            config: Arc::new(config),
            data_dir: data_dir.to_path_buf(),
            db_pool,
        })
    }

    pub fn reporting(&self) -> ConcreteReporting<'_> {
        ReportingService::new(
            self.registry.repository(),
            self.engine.executions(),
            self.engine.attempts(),
        )
    }
}
