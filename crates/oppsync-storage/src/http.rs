use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

/// 429 and every 5xx are worth another attempt; other statuses are final.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Timeouts and connection failures are transient. Body and decode errors are not.
pub fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(800),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    /// `base_delay * 2^retry`, never above `max_delay`.
    pub fn delay_before_retry(&self, retry: usize) -> Duration {
        let doublings = u32::try_from(retry).unwrap_or(u32::MAX);
        let factor = 2u32.saturating_pow(doublings);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn allows(&self, retry: usize) -> bool {
        retry < self.max_retries
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(25),
            user_agent: None,
            referer: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body_head}")]
    HttpStatus {
        status: u16,
        url: String,
        body_head: String,
    },
    #[error("failed to parse JSON from {url}: {message}")]
    Decode { url: String, message: String },
}

/// Sequential HTTP client that retries 429/5xx and transient transport errors
/// with capped exponential backoff.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        if let Some(referer) = &config.referer {
            headers.insert(
                reqwest::header::REFERER,
                HeaderValue::from_str(referer).context("invalid referer header")?,
            );
        }

        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .default_headers(headers)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        self.send_with_retry("GET", url, |client| client.get(url)).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let resp = self.fetch_bytes(url).await?;
        decode_json(&resp)
    }

    /// Rebuilds and sends the request until it succeeds, fails permanently, or
    /// the retry budget is spent.
    pub async fn send_with_retry<F>(
        &self,
        method: &str,
        url: &str,
        build: F,
    ) -> Result<FetchedResponse, FetchError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let span = info_span!("http_request", method, url = %redact_query(url));
        async {
            let mut attempt = 0usize;
            loop {
                match build(&self.client).send().await {
                    Ok(resp) => {
                        let status = resp.status();
                        let final_url = redact_query(resp.url().as_str());

                        if status.is_success() {
                            let body = match resp.bytes().await {
                                Ok(bytes) => bytes.to_vec(),
                                Err(err) => return Err(FetchError::Request(err)),
                            };
                            return Ok(FetchedResponse {
                                status,
                                final_url,
                                body,
                            });
                        }

                        if is_retryable_status(status) && self.backoff.allows(attempt) {
                            debug!(%status, attempt, "retrying after status");
                            tokio::time::sleep(self.backoff.delay_before_retry(attempt)).await;
                            attempt += 1;
                            continue;
                        }

                        let body = resp.text().await.unwrap_or_default();
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: final_url,
                            body_head: body.chars().take(500).collect(),
                        });
                    }
                    Err(err) => {
                        if is_retryable_error(&err) && self.backoff.allows(attempt) {
                            debug!(error = %err, attempt, "retrying after transport error");
                            tokio::time::sleep(self.backoff.delay_before_retry(attempt)).await;
                            attempt += 1;
                            continue;
                        }
                        return Err(FetchError::Request(err));
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}

pub fn decode_json<T: DeserializeOwned>(resp: &FetchedResponse) -> Result<T, FetchError> {
    serde_json::from_slice(&resp.body).map_err(|e| FetchError::Decode {
        url: resp.final_url.clone(),
        message: format!(
            "{e}. Body head: {}",
            String::from_utf8_lossy(&resp.body)
                .chars()
                .take(500)
                .collect::<String>()
        ),
    })
}

// Store URLs may carry an auth token in the query string.
fn redact_query(url: &str) -> String {
    match url.split_once('?') {
        Some((base, query)) if query.contains("auth=") => format!("{base}?auth=…"),
        _ => url.to_string(),
    }
}
