//! Small helpers shared by the protocol types: timestamps, truncation and slugs.

use chrono::{Local, SecondsFormat, Utc};

/// Current UTC time as RFC 3339 with second precision, e.g. `2024-01-01T00:00:00Z`.
pub fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Today's local date as `YYYY-MM-DD`.
pub fn local_date() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// Cuts `value` to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((byte_index, _)) => value[..byte_index].to_string(),
        None => value.to_string(),
    }
}

/// Lowercased title with runs of non-alphanumeric characters collapsed to `-`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_separator = false;
    for ch in title.chars() {
        if ch.is_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            slug.extend(ch.to_lowercase());
        } else {
            pending_separator = true;
        }
    }
    if slug.is_empty() {
        "item".to_string()
    } else {
        slug
    }
}
