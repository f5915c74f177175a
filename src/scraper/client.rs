//! Rate-limited HTTP client shared by every request of a session.
//!
//! All traffic (catalog pages, chapter pages, images, covers) goes through one
//! [FetchClient]. It bounds the number of requests in flight, applies the blanket
//! headers, and retries network failures and HTTP 429 responses.

use super::error::{ScraperError, TransportError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:133.0) Gecko/20100101 Firefox/133.0";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONCURRENCY: usize = 10;
const MAX_REDIRECTS: usize = 10;

/// Default number of attempts per request (initial plus retries).
const DEFAULT_RETRY_COUNT: u32 = 10;
/// Default wait between attempts when the server gives no Retry-After hint.
const DEFAULT_BACKOFF_SECS: u64 = 3;

/// Status, retry hint, and body of one HTTP exchange.
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: u16,
    /// Raw value of the Retry-After header, if the server sent one.
    pub retry_after: Option<String>,
    pub body: Vec<u8>,
}

/// One GET round trip. The production implementation is [ReqwestTransport]; tests
/// substitute scripted transports.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, headers: &[(String, String)])
        -> Result<RawResponse, TransportError>;
}

/// reqwest-backed transport with a cookie store and bounded redirects.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let inner = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<RawResponse, TransportError> {
        let mut request = self.inner.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();
        Ok(RawResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// Successful (2xx) response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    /// Body decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Shared client: concurrency bound, blanket headers, retry policy.
pub struct FetchClient {
    transport: Arc<dyn Transport>,
    permits: Semaphore,
    concurrency: usize,
    blanket_headers: Vec<(String, String)>,
    retry_count: u32,
    backoff: Duration,
}

impl std::fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchClient")
            .field("concurrency", &self.concurrency)
            .field("blanket_headers", &self.blanket_headers)
            .field("retry_count", &self.retry_count)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl FetchClient {
    /// Build a client with the default user agent, concurrency, and retry policy.
    pub fn new() -> Result<Self, ScraperError> {
        Self::builder().build()
    }

    pub fn builder() -> FetchClientBuilder {
        FetchClientBuilder::default()
    }

    /// Maximum number of requests in flight.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// GET `url` with the blanket headers plus `headers` (per-call values win).
    ///
    /// A concurrency slot is held for each attempt and released before any backoff
    /// sleep. Network failures wait the fixed backoff; 429 responses wait for the
    /// server's Retry-After hint when one is given. Any other non-2xx status is
    /// returned immediately as [ScraperError::HttpStatus].
    pub async fn fetch(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<FetchResponse, ScraperError> {
        let headers = self.merge_headers(headers);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|_| ScraperError::ClientClosed)?;
                self.transport.get(url, &headers).await
            };
            let exhausted = attempt >= self.retry_count;
            match outcome {
                Ok(response) if response.status == 429 => {
                    if exhausted {
                        return Err(ScraperError::HttpStatus {
                            status: 429,
                            url: url.to_string(),
                        });
                    }
                    let wait = response
                        .retry_after
                        .as_deref()
                        .and_then(parse_retry_after)
                        .unwrap_or(self.backoff);
                    warn!(url, attempt, wait_secs = wait.as_secs_f64(), "rate limited");
                    tokio::time::sleep(wait).await;
                }
                Ok(response) if !(200..300).contains(&response.status) => {
                    return Err(ScraperError::HttpStatus {
                        status: response.status,
                        url: url.to_string(),
                    });
                }
                Ok(response) => {
                    debug!(url, status = response.status, bytes = response.body.len(), "fetched");
                    return Ok(FetchResponse {
                        status: response.status,
                        body: response.body,
                    });
                }
                Err(source) => {
                    if exhausted {
                        return Err(ScraperError::Network {
                            url: url.to_string(),
                            source,
                        });
                    }
                    warn!(url, attempt, error = %source, "request failed, retrying");
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }

    fn merge_headers(&self, extra: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut merged: Vec<(String, String)> = self
            .blanket_headers
            .iter()
            .filter(|(name, _)| !extra.iter().any(|(n, _)| n.eq_ignore_ascii_case(name)))
            .cloned()
            .collect();
        merged.extend(extra.iter().map(|(n, v)| (n.to_string(), v.to_string())));
        merged
    }
}

/// Obsolete HTTP-date layouts (RFC 850 and asctime), always in GMT.
const LEGACY_HTTP_DATES: [&str; 2] = ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"];

/// Parse a Retry-After value: delta seconds (fractions allowed) or an HTTP date in
/// any of its three layouts. Dates in the past mean "retry now".
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).ok();
    }
    let at = DateTime::parse_from_rfc2822(value)
        .map(|at| at.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            LEGACY_HTTP_DATES
                .iter()
                .find_map(|layout| NaiveDateTime::parse_from_str(value, layout).ok())
                .map(|naive| naive.and_utc())
        })?;
    let delta = at - Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Builder for [FetchClient].
pub struct FetchClientBuilder {
    user_agent: Option<String>,
    timeout_secs: u64,
    concurrency: usize,
    retry_count: u32,
    backoff: Duration,
    transport: Option<Arc<dyn Transport>>,
}

impl Default for FetchClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            concurrency: DEFAULT_CONCURRENCY,
            retry_count: DEFAULT_RETRY_COUNT,
            backoff: Duration::from_secs(DEFAULT_BACKOFF_SECS),
            transport: None,
        }
    }
}

impl FetchClientBuilder {
    /// Set a custom User-Agent. If not set, a desktop Firefox string is used.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Per-request timeout in seconds. Default 30.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Maximum requests in flight. Default 10.
    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// Attempts per request, including the first. Default 10.
    pub fn retry_count(mut self, n: u32) -> Self {
        self.retry_count = n.max(1);
        self
    }

    /// Wait between attempts. Default 3s.
    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Use `transport` instead of a reqwest client.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<FetchClient, ScraperError> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => Arc::new(
                ReqwestTransport::new(Duration::from_secs(self.timeout_secs))
                    .map_err(|source| ScraperError::Client { source })?,
            ),
        };
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        Ok(FetchClient {
            transport,
            permits: Semaphore::new(self.concurrency),
            concurrency: self.concurrency,
            blanket_headers: vec![
                ("User-Agent".to_string(), user_agent),
                ("Accept-Charset".to_string(), "utf-8".to_string()),
            ],
            retry_count: self.retry_count,
            backoff: self.backoff,
        })
    }
}
