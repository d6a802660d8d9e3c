//! Search-index URL submission for newly published items.

use log::{info, warn};
use serde_json::Value;

use crate::config::IndexPushConfig;
use crate::http_client::HttpClient;
use crate::protocol_utils::truncate_chars;

pub const ENDPOINT_ENV_KEY: &str = "MARQUEE_INDEX_PUSH_ENDPOINT";

/// Counters reported by the index endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPushSummary {
    pub submitted: usize,
    pub success: u64,
    pub remain: Option<i64>,
    pub not_same_site: u64,
    pub not_valid: u64,
}

/// Environment override first, then the configured endpoint.
pub fn resolve_endpoint(config: &IndexPushConfig) -> Option<String> {
    std::env::var(ENDPOINT_ENV_KEY)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| Some(config.endpoint.trim().to_string()).filter(|value| !value.is_empty()))
}

fn count_field(reply: &Value, field: &str) -> u64 {
    match reply.get(field) {
        Some(Value::Number(number)) => number.as_u64().unwrap_or(0),
        Some(Value::Array(values)) => values.len() as u64,
        _ => 0,
    }
}

fn dedupe_urls(urls: &[String]) -> Vec<String> {
    let mut unique: Vec<String> = Vec::new();
    for url in urls {
        let url = url.trim();
        if !url.is_empty() && !unique.iter().any(|seen| seen == url) {
            unique.push(url.to_string());
        }
    }
    unique
}

/// POSTs `urls` newline-separated as `text/plain` and parses the counters.
pub fn push_urls(
    client: &HttpClient,
    endpoint: &str,
    urls: &[String],
) -> Result<IndexPushSummary, String> {
    let urls = dedupe_urls(urls);
    let body = urls.join("\n").into_bytes();
    let response = client
        .post(endpoint, &[("Content-Type", "text/plain".to_string())], body)
        .map_err(|err| format!("index push request failed: {err}"))?;
    let text = response.text();
    if !response.is_success() {
        return Err(format!(
            "index push returned HTTP {}: {}",
            response.status,
            truncate_chars(&text, 200)
        ));
    }
    let reply: Value = serde_json::from_str(text.trim()).map_err(|_| {
        format!(
            "index push returned non-JSON: {}",
            truncate_chars(&text, 200)
        )
    })?;
    Ok(IndexPushSummary {
        submitted: urls.len(),
        success: count_field(&reply, "success"),
        remain: reply.get("remain").and_then(Value::as_i64),
        not_same_site: count_field(&reply, "not_same_site"),
        not_valid: count_field(&reply, "not_valid"),
    })
}

/// Best-effort submission. Failures are logged and never propagate.
pub fn submit_new_urls(
    client: &HttpClient,
    endpoint: Option<&str>,
    urls: &[String],
) -> Option<IndexPushSummary> {
    let endpoint = endpoint?;
    if urls.is_empty() {
        return None;
    }
    match push_urls(client, endpoint, urls) {
        Ok(summary) => {
            info!(
                "Index push: success={}/{} remain={} not_same_site={} not_valid={}",
                summary.success,
                summary.submitted,
                summary
                    .remain
                    .map(|remain| remain.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                summary.not_same_site,
                summary.not_valid
            );
            Some(summary)
        }
        Err(err) => {
            warn!("{err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{push_urls, submit_new_urls};
    use crate::http_client::testing::{client_for, FakeFetcher};

    const ENDPOINT: &str = "https://index.example.com/urls?site=s&token=t";

    #[test]
    fn test_push_sends_unique_urls_as_plain_text_and_parses_counters() {
        let fake = FakeFetcher::new();
        fake.post(
            ENDPOINT,
            200,
            r#"{"success":2,"remain":98,"not_same_site":["https://other/"],"not_valid":0}"#,
        );
        let urls = vec![
            "https://site/posts/a/".to_string(),
            "https://site/posts/b/".to_string(),
            "https://site/posts/a/".to_string(),
        ];

        let summary = push_urls(&client_for(fake.clone()), ENDPOINT, &urls).expect("push should succeed");
        assert_eq!(summary.submitted, 2);
        assert_eq!(summary.success, 2);
        assert_eq!(summary.remain, Some(98));
        assert_eq!(summary.not_same_site, 1);

        let requests = fake.requests();
        assert_eq!(
            requests[0].body.as_deref(),
            Some("https://site/posts/a/\nhttps://site/posts/b/".as_bytes())
        );
        assert!(requests[0]
            .headers
            .contains(&("Content-Type".to_string(), "text/plain".to_string())));
    }

    #[test]
    fn test_non_json_reply_is_an_error() {
        let fake = FakeFetcher::new();
        fake.post(ENDPOINT, 200, "<html>oops</html>");
        let error = push_urls(&client_for(fake), ENDPOINT, &["https://site/a/".to_string()])
            .expect_err("non-JSON should fail");
        assert!(error.contains("non-JSON"));
    }

    #[test]
    fn test_submit_is_skipped_without_endpoint_or_urls_and_swallows_failures() {
        let fake = FakeFetcher::new();
        let client = client_for(fake.clone());
        assert_eq!(submit_new_urls(&client, None, &["https://site/a/".to_string()]), None);
        assert_eq!(submit_new_urls(&client, Some(ENDPOINT), &[]), None);
        assert!(fake.requests().is_empty());

        assert_eq!(
            submit_new_urls(&client, Some(ENDPOINT), &["https://site/a/".to_string()]),
            None
        );
        assert_eq!(fake.requests().len(), 1);
    }
}
