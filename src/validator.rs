//! Acceptance predicates for fetched posters and detail text.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static LINE_BREAK_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").expect("line break regex should compile"));
static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("tag regex should compile"));
static HTML_ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});")
        .expect("entity regex should compile")
});
static WHITESPACE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex should compile"));

/// An image candidate after its fetch, ready for validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    pub locator: String,
    pub status: u16,
    pub content_type: String,
    pub bytes: Vec<u8>,
    /// Result of the HEAD probe, only taken when `content_type` is empty.
    pub probe_ok: bool,
}

/// Accepts a 2xx/3xx image response whose type is advertised as an image, or is
/// unadvertised but confirmed by the probe. Empty payloads never pass.
pub fn is_acceptable_image(image: &FetchedImage) -> bool {
    if image.bytes.is_empty() {
        return false;
    }
    if !(200..400).contains(&image.status) {
        return false;
    }
    let content_type = image.content_type.trim().to_ascii_lowercase();
    if content_type.is_empty() {
        return image.probe_ok;
    }
    content_type.starts_with("image/") || content_type.contains("image")
}

/// Accepts text that is still non-empty after decoding, tag stripping and collapsing.
pub fn is_acceptable_text(value: &str) -> bool {
    !html_to_text(value).is_empty()
}

pub fn collapse_whitespace(value: &str) -> String {
    WHITESPACE_RUN.replace_all(value, " ").trim().to_string()
}

/// Converts an HTML fragment to plain text, one collapsed line per source line.
pub fn html_to_text(fragment: &str) -> String {
    if fragment.is_empty() {
        return String::new();
    }
    let with_breaks = LINE_BREAK_TAG.replace_all(fragment, "\n");
    let stripped = ANY_TAG.replace_all(&with_breaks, "");
    let decoded = decode_html_entities(&stripped);
    decoded
        .lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn decode_html_entities(value: &str) -> String {
    HTML_ENTITY
        .replace_all(value, |captures: &Captures| {
            let entity = &captures[1];
            decode_entity(entity).unwrap_or_else(|| captures[0].to_string())
        })
        .into_owned()
}

fn decode_entity(entity: &str) -> Option<String> {
    if let Some(numeric) = entity.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse::<u32>().ok()?,
        };
        return char::from_u32(code).map(String::from);
    }
    let decoded = match entity {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        "middot" => "·",
        "hellip" => "…",
        "mdash" => "—",
        "ndash" => "–",
        "lsquo" => "‘",
        "rsquo" => "’",
        "ldquo" => "“",
        "rdquo" => "”",
        "copy" => "©",
        _ => return None,
    };
    Some(decoded.to_string())
}
