//! HTTP plumbing shared by vendor connectors.
//!
//! [`HttpClient`] sends a request through a [`Transport`], sleeps and
//! retries on rate limits (HTTP 429, or whatever the request's
//! [`RateLimitSignal`] accepts), and maps every other non-2xx or transport
//! failure to [`Error::RequestFailed`]. Rate-limit retries never surface to
//! callers unless the retry budget runs out.

use crate::config::HttpSettings;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest slice of a response body quoted in error messages.
const MAX_ERROR_BODY: usize = 512;

const TOO_MANY_REQUESTS: u16 = 429;
const FORBIDDEN: u16 = 403;

/// Which non-2xx responses count as a rate limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RateLimitSignal {
    /// HTTP 429 only.
    #[default]
    TooManyRequests,
    /// HTTP 429, or 403 carrying `x-ratelimit-remaining: 0` or a
    /// `retry-after` header. GitHub signals both its primary and secondary
    /// limits this way.
    QuotaForbidden,
}

impl RateLimitSignal {
    pub fn matches(&self, response: &Response) -> bool {
        if response.status == TOO_MANY_REQUESTS {
            return true;
        }
        match self {
            RateLimitSignal::TooManyRequests => false,
            RateLimitSignal::QuotaForbidden => {
                response.status == FORBIDDEN
                    && (response.header("x-ratelimit-remaining").map(str::trim) == Some("0")
                        || response.header("retry-after").is_some())
            }
        }
    }
}

/// A GET request to a vendor API.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub rate_limit: RateLimitSignal,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            rate_limit: RateLimitSignal::default(),
        }
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {}", token))
    }

    pub fn rate_limit(mut self, signal: RateLimitSignal) -> Self {
        self.rate_limit = signal;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: u16,
    /// Header names are stored lowercased.
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn body_excerpt(&self) -> String {
        let text = String::from_utf8_lossy(&self.body);
        match text.char_indices().nth(MAX_ERROR_BODY) {
            Some((idx, _)) => format!("{}...", &text[..idx]),
            None => text.into_owned(),
        }
    }

    /// URL of the `rel="next"` entry of an RFC 8288 `Link` header.
    pub fn next_link(&self) -> Option<String> {
        let header = self.header("link")?;
        header.split(',').find_map(|link| {
            let mut parts = link.split(';');
            let target = parts.next()?.trim();
            let is_next = parts.any(|param| {
                let param = param.trim();
                param == "rel=\"next\"" || param == "rel=next"
            });
            if !is_next {
                return None;
            }
            target
                .strip_prefix('<')
                .and_then(|t| t.strip_suffix('>'))
                .map(str::to_string)
        })
    }
}

/// Sends one request, without retries.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &Request) -> Result<Response>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("logpull/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &Request) -> Result<Response> {
        let mut builder = self.client.get(&request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::request(e.status().map(|s| s.as_u16()), e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::request(Some(status), format!("reading body: {}", e)))?;

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

/// Sleeps between rate-limited attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Base delay for exponential backoff when the vendor gives no hint.
    pub backoff_base: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay for attempt N (exponential backoff, capped).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.backoff_base.saturating_mul(1 << attempt.min(16));
        delay.min(self.max_backoff)
    }
}

impl From<&HttpSettings> for RetryPolicy {
    fn from(settings: &HttpSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            backoff_base: Duration::from_millis(settings.backoff_base_ms),
            ..Default::default()
        }
    }
}

/// Rate-limit aware client shared by all connectors of a process.
#[derive(Clone)]
pub struct HttpClient {
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
}

impl HttpClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        sleeper: Arc<dyn Sleeper>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            sleeper,
            policy,
        }
    }

    pub fn from_settings(settings: &HttpSettings) -> Result<Self> {
        let transport = ReqwestTransport::new(Duration::from_secs(settings.timeout_secs))?;
        Ok(Self::new(
            Arc::new(transport),
            Arc::new(TokioSleeper),
            RetryPolicy::from(settings),
        ))
    }

    /// Sends `request`, retrying rate-limited attempts.
    pub async fn execute(&self, request: &Request) -> Result<Response> {
        let mut attempt = 0u32;
        loop {
            let response = self.transport.send(request).await?;
            if response.is_success() {
                return Ok(response);
            }

            if !request.rate_limit.matches(&response) {
                return Err(Error::request(
                    Some(response.status),
                    format!("GET {}: {}", request.url, response.body_excerpt()),
                ));
            }

            if attempt >= self.policy.max_retries {
                return Err(Error::request(
                    Some(response.status),
                    format!(
                        "GET {}: still rate limited after {} retries",
                        request.url, attempt
                    ),
                ));
            }

            let delay = rate_limit_delay(&response, Utc::now())
                .unwrap_or_else(|| self.policy.backoff(attempt));
            attempt += 1;
            warn!(
                url = %request.url,
                attempt,
                delay_secs = delay.as_secs_f64(),
                "rate limited, retrying"
            );
            self.sleeper.sleep(delay).await;
            debug!(url = %request.url, attempt, "retrying request");
        }
    }
}

/// Delay the vendor asked for: `Retry-After` (seconds or HTTP date), then
/// `X-RateLimit-Reset` (epoch seconds).
fn rate_limit_delay(response: &Response, now: DateTime<Utc>) -> Option<Duration> {
    if let Some(value) = response.header("retry-after") {
        let value = value.trim();
        if let Ok(secs) = value.parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }
        if let Ok(at) = DateTime::parse_from_rfc2822(value) {
            let wait = at.with_timezone(&Utc) - now;
            return Some(wait.to_std().unwrap_or(Duration::ZERO));
        }
    }

    let reset = response.header("x-ratelimit-reset")?.trim().parse::<i64>().ok()?;
    let at = DateTime::<Utc>::from_timestamp(reset, 0)?;
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}
