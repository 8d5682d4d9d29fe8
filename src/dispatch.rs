//! Rate-limited outbound HTTP dispatch with exponential-backoff retry.
//!
//! Every outbound API call goes through a [`RateLimitedDispatcher`]. The
//! dispatcher guarantees that two calls issued through the same instance are
//! spaced at least `60 / average_rate_limit` seconds apart, measured from the
//! start of the previous call, and retries failed attempts with a doubling
//! backoff up to `max_retries` times.
//!
//! # Retry Strategy
//!
//! - Network errors → retry
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx other than 429 → fail immediately with [`DispatchError::Rejected`]
//! - Budget exhausted → [`DispatchError::RetryExhausted`] carrying the attempt
//!   count and the last underlying error
//!
//! The backoff doubles after each failed attempt and resets to its base on
//! the next success. All arithmetic is in [`Duration`]s.
//!
//! # Sharing
//!
//! The limiter state (last call start, current backoff) lives behind a
//! `tokio::sync::Mutex`, and the lock is held across the spacing sleep, so a
//! single dispatcher can be shared by concurrent call sites without
//! under-throttling. Every request also carries a per-call timeout, so a hung
//! upstream cannot block its caller indefinitely.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::DispatchConfig;
use crate::error::{DispatchError, HttpStatusError};

/// Mutable limiter state shared by every call through one dispatcher.
struct LimiterState {
    last_request_time: Option<Instant>,
    backoff: Duration,
}

pub struct RateLimitedDispatcher {
    client: reqwest::Client,
    min_interval: Duration,
    max_retries: u32,
    backoff_base: Duration,
    state: Mutex<LimiterState>,
}

impl RateLimitedDispatcher {
    pub fn new(config: &DispatchConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let backoff_base = Duration::from_millis(config.backoff_base_ms);

        Ok(Self {
            client,
            min_interval: Duration::from_secs_f64(60.0 / config.average_rate_limit),
            max_retries: config.max_retries,
            backoff_base,
            state: Mutex::new(LimiterState {
                last_request_time: None,
                backoff: backoff_base,
            }),
        })
    }

    /// GET `url` with the given headers through the limiter.
    pub async fn get(
        &self,
        url: &str,
        headers: &[(&str, String)],
    ) -> Result<reqwest::Response, DispatchError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, value);
        }
        self.send(request).await
    }

    /// POST a JSON body to `url` with the given headers through the limiter.
    pub async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, DispatchError> {
        let mut request = self.client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, value);
        }
        self.send(request).await
    }

    /// Issue a request through the limiter, retrying failed attempts.
    ///
    /// Each attempt — including retries — waits for the rate-limit slot
    /// before it starts, and its start time becomes the new reference point
    /// for the spacing invariant.
    pub async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, DispatchError> {
        let mut last_err: Option<Box<dyn std::error::Error + Send + Sync>> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.take_backoff().await;
                tokio::time::sleep(backoff).await;
            }

            let attempt_request = request.try_clone().ok_or(DispatchError::NotReplayable)?;
            self.wait_for_slot().await;

            match attempt_request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        self.reset_backoff().await;
                        return Ok(response);
                    }

                    let body = response.text().await.unwrap_or_default();
                    let err = HttpStatusError {
                        status: status.as_u16(),
                        body,
                    };

                    if status.as_u16() == 429 || status.is_server_error() {
                        eprintln!(
                            "dispatch: attempt {} got HTTP {}, retrying",
                            attempt + 1,
                            status
                        );
                        last_err = Some(Box::new(err));
                        continue;
                    }

                    // Client error other than 429: retrying cannot help.
                    return Err(DispatchError::Rejected(err));
                }
                Err(e) => {
                    eprintln!("dispatch: attempt {} failed: {}", attempt + 1, e);
                    last_err = Some(Box::new(e));
                    continue;
                }
            }
        }

        Err(DispatchError::RetryExhausted {
            attempts: self.max_retries + 1,
            source: last_err
                .unwrap_or_else(|| Box::from("request failed with no recorded attempt")),
        })
    }

    /// Block until the minimum spacing since the previous call start has
    /// elapsed, then record this call's start time.
    ///
    /// The lock is held across the sleep on purpose: releasing it earlier
    /// would let a second caller observe a stale `last_request_time` and
    /// start too soon.
    async fn wait_for_slot(&self) {
        let mut state = self.state.lock().await;
        if let Some(last) = state.last_request_time {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        state.last_request_time = Some(Instant::now());
    }

    /// Current backoff for the next retry; doubles the stored value.
    async fn take_backoff(&self) -> Duration {
        let mut state = self.state.lock().await;
        let current = state.backoff;
        state.backoff = current.saturating_mul(2);
        current
    }

    async fn reset_backoff(&self) {
        let mut state = self.state.lock().await;
        state.backoff = self.backoff_base;
    }
}
