use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::EcoError;

const MAX_RETRIES: usize = 3;
const BASE_DELAY_MS: u64 = 200;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpstreamRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl UpstreamRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, key: &str, value: impl ToString) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }
}

/// Plain-text GET access to upstream providers. Fetchers only ever see this
/// trait, so tests can hand them canned bodies.
pub trait UpstreamClient: Send + Sync {
    fn get_text(&self, request: &UpstreamRequest) -> Result<String, EcoError>;
}

#[derive(Clone)]
pub struct UpstreamHttpClient {
    client: Client,
}

impl UpstreamHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, EcoError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ecoatlas-ingest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EcoError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| EcoError::Http(err.to_string()))?;
        Ok(Self { client })
    }

    fn build(&self, request: &UpstreamRequest) -> reqwest::blocking::RequestBuilder {
        let mut builder = self.client.get(&request.url).query(&request.query);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        builder
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, EcoError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .map(|body| truncate(&body, 200))
            .unwrap_or_else(|_| "upstream request failed".to_string());
        Err(EcoError::HttpStatus { status, message })
    }

    /// Resends on throttling and server errors, and on connect or timeout
    /// failures, up to `MAX_RETRIES` times with linear backoff.
    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, EcoError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            let retry = match make_req().send() {
                Ok(resp) if is_retryable_status(resp.status().as_u16()) => {
                    let status = resp.status().as_u16();
                    tracing::debug!(status, attempt, "retrying upstream request");
                    Ok(resp)
                }
                Ok(resp) => return Ok(resp),
                Err(err) if is_retryable_error(&err) => {
                    tracing::debug!(error = %err, attempt, "retrying upstream request");
                    Err(err)
                }
                Err(err) => return Err(EcoError::Http(err.to_string())),
            };
            if attempt >= MAX_RETRIES {
                return retry.map_err(|err| EcoError::Http(err.to_string()));
            }
            thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
            attempt += 1;
        }
    }
}

impl UpstreamClient for UpstreamHttpClient {
    fn get_text(&self, request: &UpstreamRequest) -> Result<String, EcoError> {
        let response = self.send_with_retries(|| self.build(request))?;
        let response = Self::handle_status(response)?;
        response.text().map_err(|err| EcoError::Http(err.to_string()))
    }
}

fn truncate(body: &str, max_chars: usize) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Builder and decode errors fail the same way on every attempt.
fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}
