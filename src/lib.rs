//! linguacache: caching translation pipeline for article content.
//! Markdown images are protected from the provider, translations are cached
//! by content fingerprint, and a daily task sweeps the cache.

pub mod clock;
pub mod config;
pub mod history;
pub mod metrics;
pub mod scheduler;
pub mod translate;

use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{ConfigError, LoggingConfig, TranslationConfig};
use history::{AuditError, AuditLog, MemoryAuditLog, SqliteAuditLog};
use translate::cache::MemoryCacheStore;
use translate::deepseek::DeepSeekClient;
use translate::sqlite_cache::SqliteCacheStore;
use translate::store::{CacheError, CacheStore};

pub use scheduler::{MaintenanceScheduler, SchedulerState};
pub use translate::service::CacheStatistics;
pub use translate::{
    BatchField, BatchOutcome, BatchRequest, DocumentContext, Language, ProviderError,
    TranslateError, TranslateOutcome, TranslateRequest, TranslationProvider, TranslationService,
};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cache store: {0}")]
    Cache(#[from] CacheError),
    #[error("history log: {0}")]
    History(#[from] AuditError),
    #[error("provider: {0}")]
    Provider(#[from] ProviderError),
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured filter. Later calls are ignored.
pub fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);
    let _ = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Wire the DeepSeek provider with the configured stores.
pub fn build_service(config: &TranslationConfig) -> Result<TranslationService, SetupError> {
    let provider = DeepSeekClient::new(&config.deepseek)?;
    info!(model = %config.deepseek.model, "DeepSeek API client initialized");
    build_service_with_provider(config, Arc::new(provider))
}

/// Stores come from `database_path`: SQLite when set, in-memory otherwise.
pub fn build_service_with_provider(
    config: &TranslationConfig,
    provider: Arc<dyn TranslationProvider>,
) -> Result<TranslationService, SetupError> {
    config.validate()?;
    let (cache, history): (Arc<dyn CacheStore>, Arc<dyn AuditLog>) = match &config.database_path {
        Some(path) => {
            info!(path = %path.display(), "using SQLite translation store");
            (
                Arc::new(SqliteCacheStore::open(path)?),
                Arc::new(SqliteAuditLog::open(path)?),
            )
        }
        None => {
            info!(capacity = config.memory_cache_capacity, "using in-memory translation store");
            (
                Arc::new(MemoryCacheStore::new(config.memory_cache_capacity)),
                Arc::new(MemoryAuditLog::new()),
            )
        }
    };
    Ok(TranslationService::new(provider, cache, history, config))
}
