//! Shared fixtures for integration tests: a scripted provider and service
//! builders over in-memory or SQLite stores.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use linguacache::clock::{Clock, ManualClock};
use linguacache::config::TranslationConfig;
use linguacache::history::MemoryAuditLog;
use linguacache::translate::cache::MemoryCacheStore;
use linguacache::translate::store::CacheStore;
use linguacache::{Language, ProviderError, TranslationProvider, TranslationService};

/// 2024-03-01T00:00:00Z
pub const T0: i64 = 1_709_251_200;
pub const DAY: Duration = Duration::from_secs(86_400);

/// Deterministic provider: prefixes the target code, keeps placeholders.
/// Texts containing `FAIL` are rejected.
#[derive(Default)]
pub struct ScriptedProvider {
    pub calls: Mutex<Vec<String>>,
    pub delay: Option<Duration>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedProvider {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranslationProvider for ScriptedProvider {
    async fn translate(
        &self,
        text: &str,
        _source_lang: Language,
        target_lang: Language,
    ) -> Result<String, ProviderError> {
        self.calls.lock().push(text.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if text.contains("FAIL") {
            return Err(ProviderError::Api("provider rejected input".into()));
        }
        Ok(format!("[{target_lang}] {text}"))
    }
}

pub struct TestEnv {
    pub service: Arc<TranslationService>,
    pub provider: Arc<ScriptedProvider>,
    pub cache: Arc<dyn CacheStore>,
    pub history: Arc<MemoryAuditLog>,
    pub clock: Arc<ManualClock>,
}

impl TestEnv {
    pub fn new(provider: ScriptedProvider) -> Self {
        Self::with_config(provider, TranslationConfig::default())
    }

    pub fn with_config(provider: ScriptedProvider, config: TranslationConfig) -> Self {
        let clock = Arc::new(ManualClock::new(T0));
        let cache: Arc<dyn CacheStore> =
            Arc::new(MemoryCacheStore::with_clock(1_024, clock.clone() as Arc<dyn Clock>));
        Self::assemble(provider, config, clock, cache)
    }

    pub fn assemble(
        provider: ScriptedProvider,
        config: TranslationConfig,
        clock: Arc<ManualClock>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        let provider = Arc::new(provider);
        let history = Arc::new(MemoryAuditLog::with_clock(clock.clone()));
        let service = TranslationService::new(provider.clone(), cache.clone(), history.clone(), &config)
            .with_clock(clock.clone());
        Self {
            service: Arc::new(service),
            provider,
            cache,
            history,
            clock,
        }
    }
}
