//! HTTP plumbing for the remote fetcher.
//!
//! The fetcher never talks to `reqwest` directly. It goes through two
//! seams so that pagination and backoff can be tested without a network
//! or a real clock:
//!
//! - [`HttpTransport`] performs a single GET and returns status, final URL,
//!   the `Retry-After` header and the body text.
//! - [`Sleeper`] waits between attempts.
//!
//! [`get_with_backoff`] combines them with a [`BackoffPolicy`].
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → wait, then repeat the same request
//! - `Retry-After: <seconds>` is honoured verbatim
//! - otherwise: `min(max_sleep, base_sleep × 2^attempt)` plus random jitter
//! - after `max_tries` waits the last response is handed back so the caller
//!   reports it like any other status

use async_trait::async_trait;
use rand::Rng;
use reqwest::Url;
use std::time::Duration;

use crate::error::FetchError;

/// One HTTP response, reduced to what the fetcher needs.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Final request URL including the query string.
    pub url: String,
    pub retry_after: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        self.status == 429 || (500..600).contains(&self.status)
    }
}

/// Performs GET requests.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &Url, query: &[(String, String)]) -> Result<HttpResponse, FetchError>;
}

/// Waits between retry attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// [`HttpTransport`] backed by a `reqwest` client with a fixed per-request timeout.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &Url, query: &[(String, String)]) -> Result<HttpResponse, FetchError> {
        let transport_err = |e: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        };

        let response = self
            .client
            .get(url.clone())
            .query(query)
            .send()
            .await
            .map_err(transport_err)?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string());
        let body = response.text().await.map_err(transport_err)?;

        Ok(HttpResponse {
            status,
            url: final_url,
            retry_after,
            body,
        })
    }
}

/// [`Sleeper`] on the tokio timer.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Retry budget and delay shape for transient failures.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Number of waits before giving up and returning the last response.
    pub max_tries: u32,
    pub base_sleep: Duration,
    pub max_sleep: Duration,
    /// Upper bound of the uniform random jitter added to computed delays.
    pub jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_tries: 8,
            base_sleep: Duration::from_millis(800),
            max_sleep: Duration::from_secs(20),
            jitter: Duration::from_millis(400),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (0-based).
    ///
    /// A `Retry-After` header wins over the exponential schedule. A header
    /// that is present but not a number yields one second.
    pub fn delay(&self, attempt: u32, retry_after: Option<&str>) -> Duration {
        if let Some(header) = retry_after {
            return parse_retry_after(header).unwrap_or(Duration::from_secs(1));
        }
        let exp = self
            .base_sleep
            .saturating_mul(2u32.saturating_pow(attempt.min(30)));
        let capped = exp.min(self.max_sleep);
        if self.jitter.is_zero() {
            return capped;
        }
        let jitter = rand::thread_rng().gen_range(0.0..self.jitter.as_secs_f64());
        capped + Duration::from_secs_f64(jitter)
    }
}

/// Parse a `Retry-After` header given in (possibly fractional) seconds.
pub fn parse_retry_after(header: &str) -> Option<Duration> {
    let secs: f64 = header.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

/// GET `url`, waiting and repeating on 429/5xx per `policy`.
///
/// Transport failures are returned immediately. Non-retryable statuses
/// come back as a normal response for the caller to classify.
pub async fn get_with_backoff(
    transport: &dyn HttpTransport,
    sleeper: &dyn Sleeper,
    policy: &BackoffPolicy,
    url: &Url,
    query: &[(String, String)],
) -> Result<HttpResponse, FetchError> {
    let mut attempt = 0;
    loop {
        let response = transport.get(url, query).await?;
        if !response.is_retryable() || attempt >= policy.max_tries {
            if response.is_retryable() {
                tracing::warn!(
                    status = response.status,
                    attempts = attempt,
                    "retry budget exhausted for {}",
                    url.path()
                );
            }
            return Ok(response);
        }

        let delay = policy.delay(attempt, response.retry_after.as_deref());
        tracing::debug!(
            status = response.status,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "transient error on {}, backing off",
            url.path()
        );
        sleeper.sleep(delay).await;
        attempt += 1;
    }
}
