//! Source-specific markup and payload extraction.
//!
//! Every concrete markup shape the resolvers depend on lives here, behind the
//! [`Extractor`] trait, so cascade logic never matches on HTML or JSON itself.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::validator::{collapse_whitespace, decode_html_entities, html_to_text};

static SUBJECT_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/subject/(\d+)").expect("subject id regex should compile"));
static FIRST_IMG_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<img[^>]+src=["']([^"']+)["']"#).expect("img src regex should compile")
});
static PAGE_IMAGE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)<meta[^>]+property=["']og:image["'][^>]+content=["']([^"']+)["']"#,
        r#"(?i)<meta[^>]+name=["']twitter:image["'][^>]+content=["']([^"']+)["']"#,
        r#"(?i)<img[^>]+src=["'](https?://[^"']+)["']"#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("page image regex should compile"))
    .collect()
});
static SEARCH_RESULT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#""murl":"(https?:\\/\\/[^"]+)""#,
        r#"murl&quot;:&quot;(https?://[^&"]+)&quot;"#,
        r#"(?i)<img[^>]+src=["'](https?://[^"']+)["']"#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("search result regex should compile"))
    .collect()
});
static CAST_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?is)<span[^>]*>\s*主演\s*</span>\s*[:：]\s*<span class="attrs">(.*?)</span>"#,
        r#"(?is)<span class="pl">\s*主演\s*</span>\s*[:：]\s*(.*?)<br\s*/?>"#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("cast regex should compile"))
    .collect()
});
static CAST_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)>([^<]+)</a>").expect("cast name regex should compile"));
static SUMMARY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?is)<span[^>]*property=["']v:summary["'][^>]*>(.*?)</span>"#,
        r#"(?is)<span id="link-report-intra"[^>]*>(.*?)</span>\s*</span>"#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("summary regex should compile"))
    .collect()
});

/// Capability implemented once per data source shape.
pub trait Extractor: Send + Sync {
    type Output;

    fn source_name(&self) -> &'static str;
    fn extract(&self, body: &str) -> Self::Output;
}

/// Cast and summary found in one source; either may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailFields {
    pub cast: Option<String>,
    pub summary: Option<String>,
}

impl DetailFields {
    fn new(cast: String, summary: String) -> Self {
        Self {
            cast: Some(cast).filter(|value| !value.is_empty()),
            summary: Some(summary).filter(|value| !value.is_empty()),
        }
    }
}

/// Structured mobile detail API: `actors[].name` and `intro`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MobileApiExtractor;

impl Extractor for MobileApiExtractor {
    type Output = DetailFields;

    fn source_name(&self) -> &'static str {
        "mobile-api"
    }

    fn extract(&self, body: &str) -> DetailFields {
        let Ok(parsed) = serde_json::from_str::<Value>(body.trim()) else {
            return DetailFields::default();
        };
        let cast = parsed
            .get("actors")
            .and_then(Value::as_array)
            .map(|actors| {
                actors
                    .iter()
                    .filter_map(|actor| actor.get("name").and_then(Value::as_str))
                    .map(collapse_whitespace)
                    .filter(|name| !name.is_empty())
                    .collect::<Vec<_>>()
                    .join(" / ")
            })
            .unwrap_or_default();
        let summary = parsed
            .get("intro")
            .and_then(Value::as_str)
            .map(collapse_whitespace)
            .unwrap_or_default();
        DetailFields::new(cast, summary)
    }
}

/// Abstract API: `subject.actors[]` strings and `subject.short_intro`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbstractApiExtractor;

impl Extractor for AbstractApiExtractor {
    type Output = DetailFields;

    fn source_name(&self) -> &'static str {
        "abstract-api"
    }

    fn extract(&self, body: &str) -> DetailFields {
        let Ok(parsed) = serde_json::from_str::<Value>(body.trim()) else {
            return DetailFields::default();
        };
        let Some(subject) = parsed.get("subject").filter(|value| value.is_object()) else {
            return DetailFields::default();
        };
        let cast = subject
            .get("actors")
            .and_then(Value::as_array)
            .map(|actors| {
                actors
                    .iter()
                    .filter_map(Value::as_str)
                    .map(collapse_whitespace)
                    .filter(|name| !name.is_empty())
                    .collect::<Vec<_>>()
                    .join(" / ")
            })
            .unwrap_or_default();
        let summary = subject
            .get("short_intro")
            .and_then(Value::as_str)
            .map(collapse_whitespace)
            .unwrap_or_default();
        DetailFields::new(cast, summary)
    }
}

/// Rendered subject page: the starring row and the summary span.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubjectPageExtractor;

impl SubjectPageExtractor {
    fn cast(page: &str) -> String {
        for pattern in CAST_PATTERNS.iter() {
            let Some(captures) = pattern.captures(page) else {
                continue;
            };
            let raw = &captures[1];
            let names: Vec<String> = CAST_NAME
                .captures_iter(raw)
                .map(|name| html_to_text(&name[1]))
                .filter(|name| !name.is_empty())
                .collect();
            if !names.is_empty() {
                return names.join(" / ");
            }
            let text = html_to_text(raw);
            if !text.is_empty() {
                return text;
            }
        }
        String::new()
    }

    fn summary(page: &str) -> String {
        SUMMARY_PATTERNS
            .iter()
            .filter_map(|pattern| pattern.captures(page))
            .map(|captures| html_to_text(&captures[1]))
            .find(|summary| !summary.is_empty())
            .unwrap_or_default()
    }
}

impl Extractor for SubjectPageExtractor {
    type Output = DetailFields;

    fn source_name(&self) -> &'static str {
        "subject-page"
    }

    fn extract(&self, body: &str) -> DetailFields {
        if body.is_empty() {
            return DetailFields::default();
        }
        DetailFields::new(Self::cast(body), Self::summary(body))
    }
}

/// Poster links advertised by the item's own page (`og:image`, `twitter:image`, `<img>`).
#[derive(Debug, Clone, Copy, Default)]
pub struct PageImageExtractor;

impl Extractor for PageImageExtractor {
    type Output = Vec<String>;

    fn source_name(&self) -> &'static str {
        "page-images"
    }

    fn extract(&self, body: &str) -> Vec<String> {
        collect_links(body, &PAGE_IMAGE_PATTERNS)
    }
}

/// Image links in a web image-search result page.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchResultExtractor;

impl Extractor for SearchResultExtractor {
    type Output = Vec<String>;

    fn source_name(&self) -> &'static str {
        "search-results"
    }

    fn extract(&self, body: &str) -> Vec<String> {
        collect_links(body, &SEARCH_RESULT_PATTERNS)
    }
}

fn collect_links(body: &str, patterns: &[Regex]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for pattern in patterns {
        for captures in pattern.captures_iter(body) {
            let link = decode_html_entities(&captures[1])
                .replace("\\/", "/")
                .trim()
                .to_string();
            if link.starts_with("http") && seen.insert(link.clone()) {
                links.push(link);
            }
        }
    }
    links
}

/// Numeric subject identifier embedded in an item link.
pub fn subject_id(link: &str) -> Option<String> {
    SUBJECT_ID
        .captures(link)
        .map(|captures| captures[1].to_string())
}

/// First `<img src>` in a feed description, used as the poster seed.
pub fn first_image_src(html: &str) -> Option<String> {
    FIRST_IMG_SRC
        .captures(html)
        .map(|captures| captures[1].trim().to_string())
        .filter(|src| !src.is_empty())
}
