//! Core HTTP operations with rate limiting and retry logic
//!
//! This module provides the reqwest-backed [`Transport`] with built-in
//! resilience: a client-side rate limiter and exponential backoff on 429,
//! 503 and connection failures. Timeouts are not retried here; the sync
//! engine decides what to fall back to.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use governor::{clock::DefaultClock, state::InMemoryState, Jitter, Quota, RateLimiter};
use reqwest::header::HeaderMap;
use reqwest::Client;
use url::Url;

use super::{ClientConfig, HttpResponse, Transport};
use crate::constants::limits;
use crate::errors::{ConfigError, DownloadError, DownloadResult};

/// HTTP operations handler with resilience patterns
#[derive(Debug)]
pub struct HttpHandler {
    client: Client,
    rate_limiter: RateLimiter<governor::state::NotKeyed, InMemoryState, DefaultClock>,
}

impl HttpHandler {
    /// Creates a new HttpHandler with the given client and rate limiting
    ///
    /// # Arguments
    ///
    /// * `client` - The HTTP client to use for requests
    /// * `rate_limit_rps` - Requests per second rate limit
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the rate limit is zero
    pub fn new(client: Client, rate_limit_rps: u32) -> Result<Self, ConfigError> {
        let rate_limiter = Self::build_rate_limiter(rate_limit_rps)?;
        Ok(Self {
            client,
            rate_limiter,
        })
    }

    /// Build the client and handler from configuration
    pub fn from_config(config: &ClientConfig) -> crate::errors::Result<Self> {
        let client = config.build_http_client()?;
        Ok(Self::new(client, config.rate_limit_rps)?)
    }

    /// Builds the rate limiter with the specified rate limit
    fn build_rate_limiter(
        rate_limit_rps: u32,
    ) -> Result<RateLimiter<governor::state::NotKeyed, InMemoryState, DefaultClock>, ConfigError> {
        let rps = NonZeroU32::new(rate_limit_rps).ok_or_else(|| ConfigError::InvalidValue {
            field: "client.rate_limit_rps".to_string(),
            value: rate_limit_rps.to_string(),
            reason: "Rate limit must be non-zero".to_string(),
        })?;
        Ok(RateLimiter::direct(Quota::per_second(rps)))
    }

    fn backoff(retries: u32) -> Duration {
        Duration::from_millis(limits::RETRY_BASE_DELAY_MS * 2_u64.pow(retries))
    }

    /// Fetches the HTTP response with rate limiting and retry logic
    ///
    /// # Arguments
    ///
    /// * `url` - The URL to fetch
    /// * `headers` - Extra request headers (validators, range)
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` on timeout, or if the request still fails
    /// after retries
    pub async fn get_response(
        &self,
        url: &Url,
        headers: HeaderMap,
    ) -> DownloadResult<reqwest::Response> {
        // Apply rate limiting with jitter to avoid thundering herd
        self.rate_limiter
            .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(100)))
            .await;

        let mut retries = 0;
        loop {
            let request = self.client.get(url.as_str()).headers(headers.clone());
            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if status == 429 || status == 503 {
                        if retries < limits::MAX_RETRIES {
                            retries += 1;
                            let delay = Self::backoff(retries);
                            tracing::warn!(
                                "HTTP {} from {}. Backing off for {}ms",
                                status,
                                url,
                                delay.as_millis()
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        return Err(if status == 429 {
                            DownloadError::RateLimitExceeded
                        } else {
                            DownloadError::ServerOverloaded
                        });
                    }

                    tracing::debug!("HTTP {} for {}", status, url);
                    return Ok(response);
                }
                Err(e) if e.is_timeout() => {
                    tracing::warn!("Request to {} timed out: {}", url, e);
                    return Err(DownloadError::Timeout {
                        url: url.to_string(),
                    });
                }
                Err(e) if retries < limits::MAX_RETRIES => {
                    retries += 1;
                    let delay = Self::backoff(retries);
                    tracing::warn!(
                        "Request failed (attempt {}/{}): {}. Retrying in {}ms",
                        retries,
                        limits::MAX_RETRIES,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        "Request failed after {} retries: {}",
                        limits::MAX_RETRIES,
                        e
                    );
                    return Err(DownloadError::MaxRetriesExceeded {
                        url: url.to_string(),
                        max_retries: limits::MAX_RETRIES,
                    });
                }
            }
        }
    }

    /// Get a reference to the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpHandler {
    async fn get(&self, url: &Url, headers: HeaderMap) -> DownloadResult<HttpResponse> {
        let response = self.get_response(url, headers).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body_url = url.to_string();
        let body = response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| {
                    if e.is_timeout() {
                        DownloadError::Timeout {
                            url: body_url.clone(),
                        }
                    } else {
                        DownloadError::Http(e)
                    }
                })
            })
            .boxed();

        Ok(HttpResponse {
            url: url.clone(),
            status,
            headers,
            body,
        })
    }
}
