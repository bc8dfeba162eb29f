//! Engine configuration: TOML file and/or environment variables on top of
//! built-in defaults.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::translate::Language;

const DAY_SECS: u64 = 86_400;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value {value:?} for {var}")]
    Env { var: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    pub cache_ttl_days: u32,
    pub max_batch_concurrency: usize,
    /// UTC hour (0-23) of the daily cache sweep.
    pub cleanup_hour_utc: u8,
    pub cleanup_retention_days: u32,
    /// Wait after a failed sweep before rescheduling.
    pub cleanup_retry_secs: u64,
    /// Window for `recent_entries` in cache statistics.
    pub stats_window_hours: u32,
    pub default_language: Language,
    /// 0 disables the orchestrator-side guard.
    pub provider_timeout_secs: u64,
    /// SQLite file for cache + history; in-memory when unset.
    pub database_path: Option<PathBuf>,
    pub memory_cache_capacity: usize,
    pub deepseek: DeepSeekConfig,
    pub logging: LoggingConfig,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            cache_ttl_days: 30,
            max_batch_concurrency: 4,
            cleanup_hour_utc: 2,
            cleanup_retention_days: 30,
            cleanup_retry_secs: 3_600,
            stats_window_hours: 24,
            default_language: Language::Zh,
            provider_timeout_secs: 120,
            database_path: None,
            memory_cache_capacity: 4_096,
            deepseek: DeepSeekConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeepSeekConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    /// Minimum spacing between requests (token bucket).
    pub min_request_interval_ms: u64,
}

impl Default for DeepSeekConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.deepseek.com".into(),
            model: "deepseek-chat".into(),
            temperature: 0.3,
            request_timeout_secs: 30,
            min_request_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "linguacache=debug".into(),
            json: false,
        }
    }
}

impl TranslationConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from any variable source (the process environment in
    /// production, a map in tests).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, "TRANSLATION_CACHE_DAYS")? {
            self.cache_ttl_days = v;
        }
        if let Some(v) = parse_var(&lookup, "TRANSLATION_MAX_CONCURRENCY")? {
            self.max_batch_concurrency = v;
        }
        if let Some(v) = parse_var(&lookup, "TRANSLATION_CLEANUP_HOUR_UTC")? {
            self.cleanup_hour_utc = v;
        }
        if let Some(v) = parse_var(&lookup, "TRANSLATION_CLEANUP_RETENTION_DAYS")? {
            self.cleanup_retention_days = v;
        }
        if let Some(v) = parse_var(&lookup, "TRANSLATION_CLEANUP_RETRY_SECS")? {
            self.cleanup_retry_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "TRANSLATION_DEFAULT_LANG")? {
            self.default_language = v;
        }
        if let Some(v) = parse_var(&lookup, "TRANSLATION_PROVIDER_TIMEOUT_SECS")? {
            self.provider_timeout_secs = v;
        }
        if let Some(path) = lookup("TRANSLATION_DB_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(key) = lookup("DEEPSEEK_API_KEY") {
            self.deepseek.api_key = Some(key);
        }
        if let Some(url) = lookup("DEEPSEEK_BASE_URL") {
            self.deepseek.base_url = url;
        }
        if let Some(model) = lookup("DEEPSEEK_MODEL") {
            self.deepseek.model = model;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cleanup_hour_utc >= 24 {
            return Err(ConfigError::Invalid(format!(
                "cleanup_hour_utc must be 0-23, got {}",
                self.cleanup_hour_utc
            )));
        }
        if self.cache_ttl_days == 0 {
            return Err(ConfigError::Invalid("cache_ttl_days must be > 0".into()));
        }
        if self.max_batch_concurrency == 0 {
            return Err(ConfigError::Invalid("max_batch_concurrency must be > 0".into()));
        }
        if self.cleanup_retention_days == 0 {
            return Err(ConfigError::Invalid("cleanup_retention_days must be > 0".into()));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.cache_ttl_days) * DAY_SECS)
    }

    pub fn cleanup_retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.cleanup_retention_days) * DAY_SECS)
    }

    pub fn cleanup_retry(&self) -> Duration {
        Duration::from_secs(self.cleanup_retry_secs)
    }

    pub fn stats_window(&self) -> Duration {
        Duration::from_secs(u64::from(self.stats_window_hours) * 3_600)
    }

    pub fn provider_timeout(&self) -> Option<Duration> {
        (self.provider_timeout_secs > 0).then(|| Duration::from_secs(self.provider_timeout_secs))
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { var, value }),
    }
}
