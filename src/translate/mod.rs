//! Translation pipeline: request/response types, the provider adapter seam,
//! and the error taxonomy shared by the orchestrator and batch coordinator.

pub mod batch;
pub mod cache;
pub mod deepseek;
pub mod detect;
pub mod fingerprint;
pub mod images;
pub mod service;
pub mod sqlite_cache;
pub mod store;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use service::TranslationService;

/// Languages the pipeline translates between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Zh,
    En,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::Zh => "zh",
            Language::En => "en",
        }
    }

    /// Human-readable name used in provider prompts.
    pub fn display_name(self) -> &'static str {
        match self {
            Language::Zh => "Chinese",
            Language::En => "English",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported language code: {0:?}")]
pub struct LanguageParseError(pub String);

impl FromStr for Language {
    type Err = LanguageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zh" | "zh-cn" | "zh-tw" | "zh-hans" | "zh-hant" => Ok(Language::Zh),
            "en" | "en-us" | "en-gb" => Ok(Language::En),
            _ => Err(LanguageParseError(s.to_string())),
        }
    }
}

/// Document/field a translation belongs to. When present, an audit log
/// entry is written for the translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentContext {
    pub article_id: Option<Uuid>,
    pub field_name: String,
}

impl DocumentContext {
    pub fn new(article_id: Option<Uuid>, field_name: impl Into<String>) -> Self {
        Self {
            article_id,
            field_name: field_name.into(),
        }
    }
}

/// Single-field translation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateRequest {
    pub text: String,
    pub source_lang: Option<Language>,
    pub target_lang: Language,
    pub preserve_images: bool,
    pub context: Option<DocumentContext>,
}

impl TranslateRequest {
    /// Request with source auto-detection and image preservation enabled.
    pub fn new(text: impl Into<String>, target_lang: Language) -> Self {
        Self {
            text: text.into(),
            source_lang: None,
            target_lang,
            preserve_images: true,
            context: None,
        }
    }

    pub fn with_source(mut self, source_lang: Language) -> Self {
        self.source_lang = Some(source_lang);
        self
    }

    pub fn preserve_images(mut self, preserve: bool) -> Self {
        self.preserve_images = preserve;
        self
    }

    pub fn with_context(mut self, context: DocumentContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// Result of a single-field translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslateOutcome {
    pub translated_text: String,
    pub source_lang: Language,
    pub target_lang: Language,
    pub cached: bool,
    pub images_count: usize,
}

/// One named field of a batch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchField {
    pub name: String,
    pub text: String,
}

impl BatchField {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub fields: Vec<BatchField>,
    pub source_lang: Option<Language>,
    pub target_lang: Language,
    /// Falls back to the configured default when `None`.
    pub max_concurrency: Option<usize>,
    pub article_id: Option<Uuid>,
}

impl BatchRequest {
    pub fn new(fields: Vec<BatchField>, target_lang: Language) -> Self {
        Self {
            fields,
            source_lang: None,
            target_lang,
            max_concurrency: None,
            article_id: None,
        }
    }

    pub fn with_source(mut self, source_lang: Language) -> Self {
        self.source_lang = Some(source_lang);
        self
    }

    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    pub fn for_article(mut self, article_id: Uuid) -> Self {
        self.article_id = Some(article_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFieldResult {
    pub name: String,
    pub translated_text: String,
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Same order as the request's fields.
    pub results: Vec<BatchFieldResult>,
    pub source_lang: Language,
    pub target_lang: Language,
    pub total_fields: usize,
    pub cached_count: usize,
    pub elapsed: Duration,
    pub cache_hit_rate_percent: f64,
}

/// Translator backend (adapter for external AI providers).
/// Implementations own their transport timeouts and retries.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        source_lang: Language,
        target_lang: Language,
    ) -> Result<String, ProviderError>;
}

/// Failures of the external translation provider. Always surfaced to callers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("API error: {0}")]
    Api(String),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("translation timeout")]
    Timeout,
    #[error("provider returned an empty translation")]
    EmptyResponse,
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TranslateError {
    #[error("translation provider failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<LanguageParseError> for TranslateError {
    fn from(e: LanguageParseError) -> Self {
        TranslateError::InvalidInput(e.to_string())
    }
}
