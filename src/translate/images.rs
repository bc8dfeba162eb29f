//! Markdown image protection.
//! Image references (`![alt](url "title")`) are swapped for positional
//! `{{IMAGE_n}}` tokens before translation and the original markup is
//! spliced back afterwards, byte for byte.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::Serialize;

/// One extracted image reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRef {
    pub alt_text: String,
    pub url: String,
    pub title: Option<String>,
    /// Full original markup, restored verbatim.
    pub markup: String,
    /// e.g. `{{IMAGE_0}}`
    pub placeholder: String,
}

/// Token mismatches found in provider output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderReport {
    /// Placeholders absent from the text.
    pub missing: Vec<String>,
    /// Placeholders present more than once.
    pub duplicated: Vec<String>,
}

impl PlaceholderReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.duplicated.is_empty()
    }
}

fn image_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"!\[([^\]]*)\]\(([^\s)]+)(?:\s+"([^"]*)")?\)"#)
            .expect("image pattern is a valid regex")
    })
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{IMAGE_(\d+)\}\}").expect("placeholder pattern is a valid regex")
    })
}

pub fn placeholder_token(index: usize) -> String {
    format!("{{{{IMAGE_{index}}}}}")
}

/// Replace every image reference, left to right, with its own positional
/// token. Textually identical images still get distinct tokens.
///
/// Numbering starts past any `{{IMAGE_n}}` already written in `text`, so a
/// literal token is never mistaken for an extracted image on restore.
pub fn extract_images(text: &str) -> (String, Vec<ImageRef>) {
    let first_index = placeholder_pattern()
        .captures_iter(text)
        .filter_map(|caps| caps[1].parse::<usize>().ok())
        .max()
        .map_or(0, |n| n.saturating_add(1));
    let mut images = Vec::new();
    let replaced = image_pattern().replace_all(text, |caps: &Captures<'_>| {
        let placeholder = placeholder_token(first_index + images.len());
        images.push(ImageRef {
            alt_text: caps[1].to_string(),
            url: caps[2].to_string(),
            title: caps.get(3).map(|m| m.as_str().to_string()),
            markup: caps[0].to_string(),
            placeholder: placeholder.clone(),
        });
        placeholder
    });
    (replaced.into_owned(), images)
}

/// Splice original markup back in place of each token.
///
/// Single pass: restored markup is never scanned again. Tokens with no
/// recorded image are left as literal text.
pub fn restore_images(text: &str, images: &[ImageRef]) -> String {
    if images.is_empty() {
        return text.to_string();
    }
    placeholder_pattern()
        .replace_all(text, |caps: &Captures<'_>| {
            images
                .iter()
                .find(|image| image.placeholder == caps[0])
                .map_or_else(|| caps[0].to_string(), |image| image.markup.clone())
        })
        .into_owned()
}

/// Check that each placeholder appears exactly once in `text`.
pub fn placeholder_report(text: &str, images: &[ImageRef]) -> PlaceholderReport {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for m in placeholder_pattern().find_iter(text) {
        *seen.entry(m.as_str()).or_default() += 1;
    }
    let mut report = PlaceholderReport::default();
    for image in images {
        match seen.get(image.placeholder.as_str()).copied().unwrap_or(0) {
            0 => report.missing.push(image.placeholder.clone()),
            1 => {}
            _ => report.duplicated.push(image.placeholder.clone()),
        }
    }
    report
}
