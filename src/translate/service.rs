//! Single-field translation: image protection, language resolution, cache
//! lookup, provider call, cache write, history record.
//!
//! Cache and history failures are logged and swallowed; provider failures
//! always propagate.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::detect::{Detection, LanguageDetector};
use super::fingerprint::fingerprint;
use super::images::{extract_images, placeholder_report, restore_images};
use super::store::{CacheError, CacheKey, CacheStore};
use super::{
    DocumentContext, Language, ProviderError, TranslateError, TranslateOutcome, TranslateRequest,
    TranslationProvider,
};
use crate::clock::{Clock, SystemClock};
use crate::config::TranslationConfig;
use crate::history::{AuditError, AuditLog, AuditLogEntry, HistoryPage, HistoryQuery};
use crate::metrics::{stage, LatencySummary, MetricsRegistry};

/// Read-only cache/history aggregate for observability.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStatistics {
    pub total_entries: u64,
    /// Entries created within `recent_window`.
    pub recent_entries: u64,
    pub recent_window: Duration,
    pub total_logged: u64,
    /// Percentage of cache lookups served from cache since startup.
    pub hit_rate_estimate: f64,
    /// Per-stage latency (translate, provider call, batch, cache sweep).
    pub latency: BTreeMap<String, LatencySummary>,
}

pub struct TranslationService {
    provider: Arc<dyn TranslationProvider>,
    cache: Arc<dyn CacheStore>,
    history: Arc<dyn AuditLog>,
    detector: LanguageDetector,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsRegistry>,
    cache_ttl: Duration,
    pub(crate) max_batch_concurrency: usize,
    stats_window: Duration,
    provider_timeout: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TranslationService {
    pub fn new(
        provider: Arc<dyn TranslationProvider>,
        cache: Arc<dyn CacheStore>,
        history: Arc<dyn AuditLog>,
        config: &TranslationConfig,
    ) -> Self {
        Self {
            provider,
            cache,
            history,
            detector: LanguageDetector::new(config.default_language),
            clock: Arc::new(SystemClock),
            metrics: Arc::new(MetricsRegistry::new()),
            cache_ttl: config.cache_ttl(),
            max_batch_concurrency: config.max_batch_concurrency.max(1),
            stats_window: config.stats_window(),
            provider_timeout: config.provider_timeout(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Clock used for history timestamps and the statistics window. Stores
    /// carry their own clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn detect_language(&self, text: &str) -> Detection {
        self.detector.detect(text)
    }

    pub(crate) fn detector(&self) -> &LanguageDetector {
        &self.detector
    }

    /// Translate one field.
    pub async fn translate(&self, request: TranslateRequest) -> Result<TranslateOutcome, TranslateError> {
        let timer = self.metrics.start(stage::TRANSLATE);

        let source_lang = match request.source_lang {
            Some(lang) => lang,
            None => {
                let detection = self.detector.detect(&request.text);
                debug!(
                    lang = %detection.language,
                    confidence = detection.confidence,
                    "source language detected"
                );
                detection.language
            }
        };

        let outcome = self
            .translate_resolved(
                &request.text,
                source_lang,
                request.target_lang,
                request.preserve_images,
                request.context.as_ref(),
            )
            .await?;
        timer.stop();
        Ok(outcome)
    }

    /// Pipeline after the source language is known. Shared with the batch
    /// coordinator, which resolves the language once per batch.
    pub(crate) async fn translate_resolved(
        &self,
        text: &str,
        source_lang: Language,
        target_lang: Language,
        preserve_images: bool,
        context: Option<&DocumentContext>,
    ) -> Result<TranslateOutcome, TranslateError> {
        let (working, images) = if preserve_images {
            extract_images(text)
        } else {
            (text.to_string(), Vec::new())
        };
        if !images.is_empty() {
            debug!(count = images.len(), "extracted Markdown images");
        }

        let outcome = if source_lang == target_lang {
            // Identity translation: no provider call, never cached
            TranslateOutcome {
                translated_text: text.to_string(),
                source_lang,
                target_lang,
                cached: false,
                images_count: images.len(),
            }
        } else {
            let key = CacheKey::new(fingerprint(&working), source_lang, target_lang);
            match self.cache_lookup(key).await {
                Some(cached) => TranslateOutcome {
                    translated_text: restore_images(&cached, &images),
                    source_lang,
                    target_lang,
                    cached: true,
                    images_count: images.len(),
                },
                None => {
                    let translated = self.call_provider(&working, source_lang, target_lang).await?;
                    let report = placeholder_report(&translated, &images);
                    if !report.is_clean() {
                        warn!(
                            missing = ?report.missing,
                            duplicated = ?report.duplicated,
                            "provider output does not preserve image placeholders"
                        );
                    }
                    // Cache the placeholder form so any embedding of the same
                    // text can be restored from it.
                    self.cache_store(key, working, translated.clone()).await;
                    TranslateOutcome {
                        translated_text: restore_images(&translated, &images),
                        source_lang,
                        target_lang,
                        cached: false,
                        images_count: images.len(),
                    }
                }
            }
        };

        if let Some(ctx) = context {
            self.record_history(ctx, text, &outcome).await;
        }
        Ok(outcome)
    }

    async fn call_provider(
        &self,
        text: &str,
        source_lang: Language,
        target_lang: Language,
    ) -> Result<String, ProviderError> {
        info!(
            chars = text.chars().count(),
            source = %source_lang,
            target = %target_lang,
            "translating via provider"
        );
        let timer = self.metrics.start(stage::PROVIDER_CALL);
        let call = self.provider.translate(text, source_lang, target_lang);
        let result = match self.provider_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(ProviderError::Timeout)),
            None => call.await,
        };
        let elapsed = timer.stop();

        match &result {
            Ok(translated) => debug!(
                chars = translated.chars().count(),
                elapsed_ms = elapsed.as_millis() as u64,
                "provider translation done"
            ),
            Err(e) => warn!(error = %e, "provider translation failed"),
        }
        result
    }

    /// Lookup failures degrade to a miss. Store calls run on the blocking
    /// pool so a slow disk never stalls other fields of a batch.
    async fn cache_lookup(&self, key: CacheKey) -> Option<String> {
        let cache = Arc::clone(&self.cache);
        let result = match tokio::task::spawn_blocking(move || cache.lookup(&key)).await {
            Ok(Ok(hit)) => hit,
            Ok(Err(e)) => {
                warn!(error = %e, fingerprint = %key.fingerprint.short(), "cache lookup failed");
                None
            }
            Err(e) => {
                warn!(error = %e, fingerprint = %key.fingerprint.short(), "cache lookup task failed");
                None
            }
        };
        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = %key.fingerprint.short(), "cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Write failures are logged; the translation still succeeds.
    async fn cache_store(&self, key: CacheKey, source_text: String, translated_text: String) {
        let cache = Arc::clone(&self.cache);
        let ttl = self.cache_ttl;
        let result = tokio::task::spawn_blocking(move || {
            cache.store(&key, &source_text, &translated_text, ttl)
        })
        .await;
        match result {
            Ok(Ok(())) => debug!(fingerprint = %key.fingerprint.short(), "saved to cache"),
            Ok(Err(e)) => warn!(error = %e, fingerprint = %key.fingerprint.short(), "cache write failed"),
            Err(e) => warn!(error = %e, fingerprint = %key.fingerprint.short(), "cache write task failed"),
        }
    }

    async fn record_history(&self, ctx: &DocumentContext, source_text: &str, outcome: &TranslateOutcome) {
        let entry = AuditLogEntry::new(
            ctx.article_id,
            ctx.field_name.clone(),
            source_text,
            outcome.translated_text.clone(),
            outcome.source_lang,
            outcome.target_lang,
            self.clock.now_unix(),
        );
        let history = Arc::clone(&self.history);
        match tokio::task::spawn_blocking(move || history.record(&entry)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, field = %ctx.field_name, "history record failed"),
            Err(e) => warn!(error = %e, field = %ctx.field_name, "history record task failed"),
        }
    }

    /// Drop the cache entry for `text` (in its image-placeholder form).
    pub fn invalidate(
        &self,
        text: &str,
        source_lang: Language,
        target_lang: Language,
    ) -> Result<bool, CacheError> {
        let (working, _) = extract_images(text);
        self.cache
            .invalidate(&CacheKey::new(fingerprint(&working), source_lang, target_lang))
    }

    /// Delete cache entries older than `older_than` (and any already expired).
    pub fn purge_expired(&self, older_than: Duration) -> Result<usize, CacheError> {
        let timer = self.metrics.start(stage::CACHE_SWEEP);
        let removed = self.cache.purge_expired(older_than)?;
        timer.stop();
        info!(removed, "translation cache purged");
        Ok(removed)
    }

    /// Never fails: an unreadable counter is reported as zero.
    pub fn statistics(&self) -> CacheStatistics {
        let since = self
            .clock
            .now_unix()
            .saturating_sub(self.stats_window.as_secs() as i64);
        let total_entries = self.cache.count_entries().unwrap_or_else(|e| {
            warn!(error = %e, "cache statistics failed");
            0
        });
        let recent_entries = self.cache.count_created_since(since).unwrap_or_else(|e| {
            warn!(error = %e, "cache statistics failed");
            0
        });
        let total_logged = self.history.count().unwrap_or_else(|e| {
            warn!(error = %e, "history statistics failed");
            0
        });
        let hits = self.hits.load(Ordering::Relaxed);
        let lookups = hits + self.misses.load(Ordering::Relaxed);
        let hit_rate_estimate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64 * 100.0
        };
        CacheStatistics {
            total_entries,
            recent_entries,
            recent_window: self.stats_window,
            total_logged,
            hit_rate_estimate,
            latency: self.metrics.snapshot(),
        }
    }

    pub fn history(&self, query: &HistoryQuery) -> Result<HistoryPage, AuditError> {
        self.history.history(query)
    }

    /// Record a human correction of a logged translation.
    pub fn mark_edited(&self, id: Uuid, translated_text: &str) -> Result<bool, AuditError> {
        self.history.mark_edited(id, translated_text)
    }
}


impl std::fmt::Debug for TranslationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationService")
            .field("cache_ttl", &self.cache_ttl)
            .field("max_batch_concurrency", &self.max_batch_concurrency)
            .field("stats_window", &self.stats_window)
            .field("provider_timeout", &self.provider_timeout)
            .finish_non_exhaustive()
    }
}
