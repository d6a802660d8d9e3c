//! Blocking HTTP access shared by the resolvers, platform adapters and index push.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use thiserror::Error;

use crate::config::HttpConfig;

/// Failure of one request, classified for retry decisions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("HTTP status {code}")]
    Status { code: u16 },
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("failed to read body: {0}")]
    Body(String),
}

impl FetchError {
    /// Classifies an HTTP status the way provider rate limits and gateway hiccups behave.
    pub fn from_status(code: u16) -> Self {
        match code {
            429 => FetchError::RateLimited(format!("HTTP status {code}")),
            408 | 500 | 502 | 503 | 504 => FetchError::Timeout(format!("HTTP status {code}")),
            _ => FetchError::Status { code },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Timeout(_) | FetchError::RateLimited(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

/// Response of any status. Only transport problems surface as `FetchError`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Lower-cased raw `Content-Type` header; empty when the server sent none.
    pub content_type: String,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Interface implemented by the transport; tests substitute an in-memory fake.
pub trait HttpFetcher: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError>;
}

/// Transport backed by a `ureq` agent.
pub struct UreqFetcher {
    agent: ureq::Agent,
    max_body_bytes: u64,
}

impl UreqFetcher {
    pub fn new(config: &HttpConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self {
            agent,
            max_body_bytes: config.max_body_bytes.max(1),
        }
    }

    fn classify_transport(error: &ureq::Transport) -> FetchError {
        let message = error.to_string();
        let lowered = message.to_ascii_lowercase();
        if lowered.contains("timed out") || lowered.contains("timeout") {
            FetchError::Timeout(message)
        } else {
            FetchError::Transport(message)
        }
    }

    fn classify_io(error: &std::io::Error) -> FetchError {
        let timed_out = matches!(
            error.kind(),
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
        ) || error.to_string().to_ascii_lowercase().contains("timed out");
        if timed_out {
            FetchError::Timeout(error.to_string())
        } else {
            FetchError::Body(error.to_string())
        }
    }
}

/// Reads at most `max_bytes`; a longer body is an error rather than a silent cut.
fn read_capped(reader: impl Read, max_bytes: u64) -> Result<Vec<u8>, FetchError> {
    let mut body = Vec::new();
    reader
        .take(max_bytes.saturating_add(1))
        .read_to_end(&mut body)
        .map_err(|error| UreqFetcher::classify_io(&error))?;
    if body.len() as u64 > max_bytes {
        return Err(FetchError::Body(format!(
            "body exceeds {max_bytes} bytes"
        )));
    }
    Ok(body)
}

impl HttpFetcher for UreqFetcher {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
        let mut call = self.agent.request(request.method.as_str(), &request.url);
        for (name, value) in &request.headers {
            call = call.set(name, value);
        }
        let result = match &request.body {
            Some(body) => call.send_bytes(body),
            None => call.call(),
        };
        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(transport)) => {
                return Err(Self::classify_transport(&transport))
            }
        };

        let status = response.status();
        let content_type = response
            .header("Content-Type")
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        let body = if request.method == Method::Head {
            Vec::new()
        } else {
            read_capped(response.into_reader(), self.max_body_bytes)?
        };
        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Request helpers carrying the shared headers and retry policy.
#[derive(Clone)]
pub struct HttpClient {
    fetcher: Arc<dyn HttpFetcher>,
    user_agent: String,
    retries: u32,
    image_referer: String,
    page_referer: String,
}

impl HttpClient {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, config: &HttpConfig) -> Self {
        Self {
            fetcher,
            user_agent: config.user_agent.clone(),
            retries: config.request_retries,
            image_referer: config.image_referer.clone(),
            page_referer: config.page_referer.clone(),
        }
    }

    pub fn page_referer(&self) -> &str {
        &self.page_referer
    }

    /// Fetches an image candidate. Any status is returned for validation.
    pub fn get_image(&self, url: &str) -> Result<HttpResponse, FetchError> {
        let request = HttpRequest::new(Method::Get, url)
            .header("User-Agent", self.user_agent.as_str())
            .header("Referer", self.image_referer.as_str())
            .header("Accept", "image/*,*/*;q=0.8");
        self.fetcher.execute(&request)
    }

    /// Lightweight reachability probe; `true` on a 2xx/3xx HEAD response.
    pub fn probe(&self, url: &str) -> bool {
        let request = HttpRequest::new(Method::Head, url)
            .header("User-Agent", self.user_agent.as_str())
            .header("Referer", self.image_referer.as_str());
        match self.fetcher.execute(&request) {
            Ok(response) => (200..400).contains(&response.status),
            Err(error) => {
                debug!("HEAD probe failed for {url}: {error}");
                false
            }
        }
    }

    /// Fetches a page or API body, retrying retryable failures immediately.
    pub fn get_text(&self, url: &str, referer: &str) -> Result<String, FetchError> {
        let request = HttpRequest::new(Method::Get, url)
            .header("User-Agent", self.user_agent.as_str())
            .header("Referer", referer)
            .header("Accept-Language", "zh-CN,zh;q=0.9,en;q=0.8");
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = self.fetcher.execute(&request).and_then(|response| {
                if response.is_success() {
                    Ok(response.text())
                } else {
                    Err(FetchError::from_status(response.status))
                }
            });
            match outcome {
                Ok(text) => return Ok(text),
                Err(error) if error.is_retryable() && attempt <= self.retries => {
                    debug!("retrying {url} after attempt {attempt}: {error}");
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Sends a POST; non-2xx statuses are returned, not converted to errors.
    pub fn post(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: Vec<u8>,
    ) -> Result<HttpResponse, FetchError> {
        let mut request =
            HttpRequest::new(Method::Post, url).header("User-Agent", self.user_agent.as_str());
        for (name, value) in headers {
            request = request.header(name, value.clone());
        }
        self.fetcher.execute(&request.body(body))
    }
}
