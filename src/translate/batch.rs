//! Multi-field translation with bounded concurrency.
//!
//! Fields share one source language (given or detected from the first
//! field). Results come back in request order; the first failing field
//! fails the whole batch and cancels the fields still in flight.

use futures_util::future::try_join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::{
    BatchFieldResult, BatchOutcome, BatchRequest, DocumentContext, TranslateError,
    TranslationService,
};
use crate::metrics::stage;

impl TranslationService {
    pub async fn batch_translate(&self, request: BatchRequest) -> Result<BatchOutcome, TranslateError> {
        let timer = self.metrics().start(stage::BATCH);
        let target_lang = request.target_lang;

        let source_lang = match request.source_lang {
            Some(lang) => lang,
            None => {
                let sample = request.fields.first().map_or("", |f| f.text.as_str());
                let detection = self.detector().detect(sample);
                debug!(
                    lang = %detection.language,
                    confidence = detection.confidence,
                    "batch source language detected"
                );
                detection.language
            }
        };

        let limit = request
            .max_concurrency
            .unwrap_or(self.max_batch_concurrency)
            .max(1);
        let semaphore = Semaphore::new(limit);
        debug!(fields = request.fields.len(), limit, "batch translation started");

        let tasks = request.fields.iter().map(|field| {
            let semaphore = &semaphore;
            let context = request
                .article_id
                .map(|id| DocumentContext::new(Some(id), field.name.clone()));
            async move {
                // The semaphore is never closed, so acquire only waits.
                let _permit = semaphore.acquire().await.ok();
                let outcome = self
                    .translate_resolved(&field.text, source_lang, target_lang, true, context.as_ref())
                    .await?;
                Ok::<_, TranslateError>(BatchFieldResult {
                    name: field.name.clone(),
                    translated_text: outcome.translated_text,
                    cached: outcome.cached,
                })
            }
        });
        let results = try_join_all(tasks).await?;

        let total_fields = results.len();
        let cached_count = results.iter().filter(|r| r.cached).count();
        let cache_hit_rate_percent = hit_rate_percent(cached_count, total_fields);
        let elapsed = timer.stop();

        info!(
            fields = total_fields,
            cached = cached_count,
            hit_rate = cache_hit_rate_percent,
            elapsed_ms = elapsed.as_millis() as u64,
            "batch translation done"
        );

        Ok(BatchOutcome {
            results,
            source_lang,
            target_lang,
            total_fields,
            cached_count,
            elapsed,
            cache_hit_rate_percent,
        })
    }
}

/// `cached / total * 100`, rounded to two decimals; 0 for an empty batch.
fn hit_rate_percent(cached: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (cached as f64 / total as f64 * 10_000.0).round() / 100.0
}
