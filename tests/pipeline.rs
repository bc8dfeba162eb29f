//! End-to-end behaviour of the translation pipeline: caching, image
//! protection, batch concurrency, expiry and history.

mod common;

use std::sync::Arc;
use std::time::Duration;

use linguacache::clock::ManualClock;
use linguacache::config::TranslationConfig;
use linguacache::history::HistoryQuery;
use linguacache::translate::sqlite_cache::SqliteCacheStore;
use linguacache::translate::store::CacheStore;
use linguacache::{
    build_service_with_provider, BatchField, BatchRequest, DocumentContext, Language,
    ProviderError, TranslateError, TranslateRequest,
};
use uuid::Uuid;

use common::{ScriptedProvider, TestEnv, DAY, T0};

#[tokio::test]
async fn images_survive_translation_and_cache() {
    let env = TestEnv::new(ScriptedProvider::default());
    let request = TranslateRequest::new("Hello ![a](http://x/i.png) world", Language::En)
        .with_source(Language::Zh);

    let first = env.service.translate(request.clone()).await.unwrap();
    assert!(!first.cached);
    assert_eq!(first.images_count, 1);
    assert_eq!(first.translated_text, "[en] Hello ![a](http://x/i.png) world");
    assert_eq!(env.provider.calls.lock()[0], "Hello {{IMAGE_0}} world");

    let second = env.service.translate(request).await.unwrap();
    assert!(second.cached);
    assert_eq!(second.translated_text, first.translated_text);
    assert_eq!(env.provider.call_count(), 1);
}

#[tokio::test]
async fn literal_placeholder_in_source_is_kept_verbatim() {
    let env = TestEnv::new(ScriptedProvider::default());
    let source = "see {{IMAGE_0}} and ![a](x.png)";
    let out = env
        .service
        .translate(TranslateRequest::new(source, Language::En).with_source(Language::Zh))
        .await
        .unwrap();
    assert_eq!(env.provider.calls.lock()[0], "see {{IMAGE_0}} and {{IMAGE_1}}");
    assert_eq!(out.translated_text, "[en] see {{IMAGE_0}} and ![a](x.png)");

    let same = env
        .service
        .translate(TranslateRequest::new(source, Language::Zh).with_source(Language::Zh))
        .await
        .unwrap();
    assert_eq!(same.translated_text, source);
}

#[tokio::test]
async fn images_left_in_place_when_preservation_disabled() {
    let env = TestEnv::new(ScriptedProvider::default());
    let out = env
        .service
        .translate(
            TranslateRequest::new("看 ![图](a.png)", Language::En)
                .with_source(Language::Zh)
                .preserve_images(false),
        )
        .await
        .unwrap();
    assert_eq!(out.images_count, 0);
    assert_eq!(env.provider.calls.lock()[0], "看 ![图](a.png)");
}

#[tokio::test]
async fn same_language_returns_input_untouched() {
    let env = TestEnv::new(ScriptedProvider::default());
    let out = env
        .service
        .translate(TranslateRequest::new("你好世界", Language::Zh).with_source(Language::Zh))
        .await
        .unwrap();
    assert_eq!(out.translated_text, "你好世界");
    assert!(!out.cached);
    assert_eq!(env.provider.call_count(), 0);
    assert_eq!(env.cache.count_entries().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn batch_respects_concurrency_and_order() {
    let env = TestEnv::new(ScriptedProvider::with_delay(Duration::from_millis(50)));
    let fields: Vec<BatchField> = (0..8)
        .map(|i| BatchField::new(format!("f{i}"), format!("段落 {i}")))
        .collect();

    let outcome = env
        .service
        .batch_translate(
            BatchRequest::new(fields, Language::En)
                .with_source(Language::Zh)
                .max_concurrency(2),
        )
        .await
        .unwrap();

    assert_eq!(env.provider.peak_concurrency(), 2);
    assert_eq!(outcome.total_fields, 8);
    let names: Vec<&str> = outcome.results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["f0", "f1", "f2", "f3", "f4", "f5", "f6", "f7"]);
    for (i, result) in outcome.results.iter().enumerate() {
        assert_eq!(result.translated_text, format!("[en] 段落 {i}"));
    }
}

#[tokio::test(start_paused = true)]
async fn zero_concurrency_is_clamped_to_one() {
    let env = TestEnv::new(ScriptedProvider::with_delay(Duration::from_millis(10)));
    let fields = vec![BatchField::new("a", "一"), BatchField::new("b", "二")];
    env.service
        .batch_translate(
            BatchRequest::new(fields, Language::En)
                .with_source(Language::Zh)
                .max_concurrency(0),
        )
        .await
        .unwrap();
    assert_eq!(env.provider.peak_concurrency(), 1);
}

#[tokio::test]
async fn batch_reports_cache_hit_rate() {
    let env = TestEnv::new(ScriptedProvider::default());
    for text in ["标题", "摘要"] {
        env.service
            .translate(TranslateRequest::new(text, Language::En).with_source(Language::Zh))
            .await
            .unwrap();
    }

    let fields = vec![
        BatchField::new("title", "标题"),
        BatchField::new("summary", "摘要"),
        BatchField::new("content", "正文"),
        BatchField::new("tags", "标签"),
    ];
    let outcome = env
        .service
        .batch_translate(BatchRequest::new(fields, Language::En).with_source(Language::Zh))
        .await
        .unwrap();

    assert_eq!(outcome.cached_count, 2);
    assert_eq!(outcome.cache_hit_rate_percent, 50.0);
    let cached: Vec<bool> = outcome.results.iter().map(|r| r.cached).collect();
    assert_eq!(cached, [true, true, false, false]);
    assert_eq!(env.provider.call_count(), 4);
}

#[tokio::test]
async fn empty_batch_succeeds() {
    let env = TestEnv::new(ScriptedProvider::default());
    let outcome = env
        .service
        .batch_translate(BatchRequest::new(Vec::new(), Language::En))
        .await
        .unwrap();
    assert_eq!(outcome.total_fields, 0);
    assert_eq!(outcome.cache_hit_rate_percent, 0.0);
    // Nothing to detect from: configured default
    assert_eq!(outcome.source_lang, Language::Zh);
}

#[tokio::test]
async fn batch_fails_as_a_whole() {
    let env = TestEnv::new(ScriptedProvider::default());
    let fields = vec![
        BatchField::new("title", "标题"),
        BatchField::new("content", "FAIL here"),
        BatchField::new("summary", "摘要"),
    ];
    let err = env
        .service
        .batch_translate(BatchRequest::new(fields, Language::En).with_source(Language::Zh))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        TranslateError::Provider(ProviderError::Api("provider rejected input".into()))
    );
}

#[tokio::test]
async fn batch_detects_source_from_first_field() {
    let env = TestEnv::new(ScriptedProvider::default());
    let fields = vec![
        BatchField::new("title", "这是一篇关于翻译缓存的中文文章，介绍了系统的设计。"),
        BatchField::new("note", "hello"),
    ];
    let outcome = env
        .service
        .batch_translate(BatchRequest::new(fields, Language::En))
        .await
        .unwrap();
    assert_eq!(outcome.source_lang, Language::Zh);
    assert_eq!(env.provider.call_count(), 2);
}

#[tokio::test]
async fn batch_with_article_writes_history() {
    let env = TestEnv::new(ScriptedProvider::default());
    let article = Uuid::new_v4();
    let fields = vec![
        BatchField::new("title", "标题"),
        BatchField::new("summary", "摘要"),
        BatchField::new("content", "正文 ![图](x.png)"),
    ];
    env.service
        .batch_translate(
            BatchRequest::new(fields, Language::En)
                .with_source(Language::Zh)
                .for_article(article),
        )
        .await
        .unwrap();

    let page = env
        .service
        .history(&HistoryQuery {
            article_id: Some(article),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(page.total, 3);
    let mut names: Vec<&str> = page.items.iter().map(|e| e.field_name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, ["content", "summary", "title"]);
    let content = page.items.iter().find(|e| e.field_name == "content").unwrap();
    assert_eq!(content.source_text, "正文 ![图](x.png)");
    assert_eq!(content.translated_text, "[en] 正文 ![图](x.png)");
    assert_eq!(content.created_at, T0);

    assert!(env.service.mark_edited(content.id, "Body").unwrap());
    assert_eq!(env.service.statistics().total_logged, 3);
}

#[tokio::test]
async fn batch_without_article_writes_no_history() {
    let env = TestEnv::new(ScriptedProvider::default());
    env.service
        .batch_translate(
            BatchRequest::new(vec![BatchField::new("title", "标题")], Language::En)
                .with_source(Language::Zh),
        )
        .await
        .unwrap();
    assert_eq!(env.history.entries().len(), 0);
}

#[tokio::test]
async fn cached_translation_expires_after_ttl() {
    let clock = Arc::new(ManualClock::new(T0));
    let cache = Arc::new(SqliteCacheStore::open_in_memory_with_clock(clock.clone()).unwrap());
    let env = TestEnv::assemble(
        ScriptedProvider::default(),
        TranslationConfig::default(),
        clock.clone(),
        cache,
    );
    let request = TranslateRequest::new("缓存测试", Language::En).with_source(Language::Zh);

    assert!(!env.service.translate(request.clone()).await.unwrap().cached);
    clock.advance(29 * DAY);
    assert!(env.service.translate(request.clone()).await.unwrap().cached);
    clock.advance(2 * DAY);
    assert!(!env.service.translate(request).await.unwrap().cached);
    assert_eq!(env.provider.call_count(), 2);
}

#[tokio::test]
async fn purge_removes_old_entries() {
    let env = TestEnv::new(ScriptedProvider::default());
    env.service
        .translate(TranslateRequest::new("旧", Language::En).with_source(Language::Zh))
        .await
        .unwrap();
    env.clock.advance(10 * DAY);
    env.service
        .translate(TranslateRequest::new("新", Language::En).with_source(Language::Zh))
        .await
        .unwrap();

    assert_eq!(env.service.purge_expired(5 * DAY).unwrap(), 1);
    let stats = env.service.statistics();
    assert_eq!(stats.total_entries, 1);
    assert_eq!(stats.recent_entries, 1);
}

#[tokio::test(start_paused = true)]
async fn provider_timeout_surfaces_as_error() {
    let config = TranslationConfig {
        provider_timeout_secs: 1,
        ..TranslationConfig::default()
    };
    let env = TestEnv::with_config(ScriptedProvider::with_delay(Duration::from_secs(5)), config);
    let err = env
        .service
        .translate(TranslateRequest::new("慢", Language::En).with_source(Language::Zh))
        .await
        .unwrap_err();
    assert_eq!(err, TranslateError::Provider(ProviderError::Timeout));
    assert_eq!(env.cache.count_entries().unwrap(), 0);
}

#[tokio::test]
async fn single_translation_with_context_is_logged() {
    let env = TestEnv::new(ScriptedProvider::default());
    let article = Uuid::new_v4();
    env.service
        .translate(
            TranslateRequest::new("标题", Language::En)
                .with_source(Language::Zh)
                .with_context(DocumentContext::new(Some(article), "title")),
        )
        .await
        .unwrap();
    let entries = env.history.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].article_id, Some(article));
    assert_eq!(entries[0].source_lang, Language::Zh);
    assert_eq!(entries[0].target_lang, Language::En);
}

#[tokio::test]
async fn sqlite_store_persists_across_services() {
    let dir = tempfile::tempdir().unwrap();
    let config = TranslationConfig {
        database_path: Some(dir.path().join("cache.db")),
        ..TranslationConfig::default()
    };
    let request = TranslateRequest::new("持久化", Language::En).with_source(Language::Zh);

    let provider = Arc::new(ScriptedProvider::default());
    let service = build_service_with_provider(&config, provider.clone()).unwrap();
    assert!(!service.translate(request.clone()).await.unwrap().cached);
    drop(service);

    let service = build_service_with_provider(&config, provider.clone()).unwrap();
    let out = service.translate(request).await.unwrap();
    assert!(out.cached);
    assert_eq!(out.translated_text, "[en] 持久化");
    assert_eq!(provider.call_count(), 1);
}
