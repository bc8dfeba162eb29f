//! Best-effort source language detection using whatlang.
//! Never fails: unsupported or undetectable text collapses to the default
//! language with a reduced confidence.

use serde::Serialize;

use super::Language;

/// Confidence cap for a detection outside the supported set.
pub const UNSUPPORTED_CONFIDENCE: f64 = 0.5;
/// Confidence reported when nothing could be detected.
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Detection {
    pub language: Language,
    /// In `[0, 1]`.
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct LanguageDetector {
    default_language: Language,
}

impl Default for LanguageDetector {
    fn default() -> Self {
        Self::new(Language::Zh)
    }
}

impl LanguageDetector {
    pub fn new(default_language: Language) -> Self {
        Self { default_language }
    }

    pub fn detect(&self, text: &str) -> Detection {
        let Some(info) = whatlang::detect(text) else {
            return Detection {
                language: self.default_language,
                confidence: FALLBACK_CONFIDENCE,
            };
        };
        let confidence = info.confidence().clamp(0.0, 1.0);
        match supported(info.lang()) {
            Some(language) => Detection {
                language,
                confidence,
            },
            None => Detection {
                language: self.default_language,
                confidence: confidence.min(UNSUPPORTED_CONFIDENCE),
            },
        }
    }
}

fn supported(lang: whatlang::Lang) -> Option<Language> {
    match lang {
        whatlang::Lang::Cmn => Some(Language::Zh),
        whatlang::Lang::Eng => Some(Language::En),
        _ => None,
    }
}
