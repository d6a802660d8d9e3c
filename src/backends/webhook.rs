//! JSON webhook adapter: one authenticated POST per payload.

use std::sync::Arc;

use crate::backends::{CredentialSource, PlatformAdapter};
use crate::http_client::HttpClient;
use crate::protocol::{DispatchPayload, SendOutcome};
use crate::protocol_utils::truncate_chars;

/// Posts payloads as JSON with a bearer token, one endpoint per platform.
pub struct WebhookAdapter {
    client: HttpClient,
    credentials: Arc<dyn CredentialSource>,
    message_max_chars: usize,
}

impl WebhookAdapter {
    pub fn new(
        client: HttpClient,
        credentials: Arc<dyn CredentialSource>,
        message_max_chars: usize,
    ) -> Self {
        Self {
            client,
            credentials,
            message_max_chars,
        }
    }

    fn diagnostic(&self, message: String) -> String {
        truncate_chars(message.trim(), self.message_max_chars)
    }
}

impl PlatformAdapter for WebhookAdapter {
    fn send(&self, payload: &DispatchPayload) -> SendOutcome {
        let platform = payload.platform.as_str();
        let credentials = self.credentials.resolve(platform);
        let Some(endpoint) = credentials.endpoint else {
            return SendOutcome::not_configured(format!(
                "no endpoint configured for {platform}, waiting for configuration"
            ));
        };
        let Some(token) = credentials.token else {
            return SendOutcome::not_configured(format!(
                "no token configured for {platform}, waiting for configuration"
            ));
        };

        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(err) => {
                return SendOutcome::failed(
                    self.diagnostic(format!("payload serialization failed: {err}")),
                    None,
                )
            }
        };
        let headers = [
            ("Content-Type", "application/json".to_string()),
            ("Authorization", format!("Bearer {token}")),
        ];
        match self.client.post(&endpoint, &headers, body) {
            Ok(response) if response.is_success() => SendOutcome::success(
                self.diagnostic(format!("HTTP {} {}", response.status, response.text())),
                Some(response.status),
            ),
            Ok(response) => SendOutcome::failed(
                self.diagnostic(format!("HTTP {} {}", response.status, response.text())),
                Some(response.status),
            ),
            Err(err) => SendOutcome::failed(self.diagnostic(err.to_string()), None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::WebhookAdapter;
    use crate::backends::testing::StaticCredentials;
    use crate::backends::PlatformAdapter;
    use crate::http_client::testing::{client_for, FakeFetcher};
    use crate::http_client::{FetchError, Method};
    use crate::protocol::{DispatchPayload, SendStatus};

    const ENDPOINT: &str = "https://hooks.example.com/publish";

    fn payload() -> DispatchPayload {
        DispatchPayload {
            platform: "toutiao".to_string(),
            title: "Example".to_string(),
            url: "https://site/posts/example/".to_string(),
            source: "douban".to_string(),
            date: "2024-01-01".to_string(),
            file: "2024-01-01-example.json".to_string(),
            body: "Example\nsource".to_string(),
        }
    }

    fn adapter(fake: Arc<FakeFetcher>, credentials: StaticCredentials) -> WebhookAdapter {
        WebhookAdapter::new(client_for(fake), Arc::new(credentials), 40)
    }

    #[test]
    fn test_missing_endpoint_or_token_is_not_configured() {
        let fake = FakeFetcher::new();
        let no_endpoint = adapter(fake.clone(), StaticCredentials::default());
        assert_eq!(no_endpoint.send(&payload()).status, SendStatus::NotConfigured);

        let no_token = adapter(
            fake.clone(),
            StaticCredentials::default().with("toutiao", Some(ENDPOINT), None),
        );
        let outcome = no_token.send(&payload());
        assert_eq!(outcome.status, SendStatus::NotConfigured);
        assert!(outcome.message.contains("token"));
        assert!(fake.requests().is_empty());
    }

    #[test]
    fn test_success_posts_json_with_bearer_token() {
        let fake = FakeFetcher::new();
        fake.post(ENDPOINT, 201, r#"{"id":"42"}"#);
        let adapter = adapter(
            fake.clone(),
            StaticCredentials::default().with("toutiao", Some(ENDPOINT), Some("secret")),
        );

        let outcome = adapter.send(&payload());
        assert_eq!(outcome.status, SendStatus::Success);
        assert_eq!(outcome.http_code, Some(201));

        let requests = fake.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::Post);
        assert!(requests[0]
            .headers
            .contains(&("Authorization".to_string(), "Bearer secret".to_string())));
        let sent: serde_json::Value =
            serde_json::from_slice(requests[0].body.as_deref().expect("body should be sent"))
                .expect("body should be JSON");
        assert_eq!(sent["url"], "https://site/posts/example/");
    }

    #[test]
    fn test_non_success_status_is_failed_with_truncated_diagnostic() {
        let fake = FakeFetcher::new();
        fake.post(ENDPOINT, 500, &"x".repeat(200));
        let adapter = adapter(
            fake.clone(),
            StaticCredentials::default().with("toutiao", Some(ENDPOINT), Some("secret")),
        );

        let outcome = adapter.send(&payload());
        assert_eq!(outcome.status, SendStatus::Failed);
        assert_eq!(outcome.http_code, Some(500));
        assert!(outcome.message.starts_with("HTTP 500 "));
        assert_eq!(outcome.message.chars().count(), 40);
    }

    #[test]
    fn test_transport_error_is_failed_without_code() {
        let fake = FakeFetcher::new();
        fake.respond(
            Method::Post,
            ENDPOINT,
            Err(FetchError::Transport("connection refused".to_string())),
        );
        let adapter = adapter(
            fake.clone(),
            StaticCredentials::default().with("toutiao", Some(ENDPOINT), Some("secret")),
        );

        let outcome = adapter.send(&payload());
        assert_eq!(outcome.status, SendStatus::Failed);
        assert_eq!(outcome.http_code, None);
        assert!(outcome.message.contains("connection refused"));
    }
}
