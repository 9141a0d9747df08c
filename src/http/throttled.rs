//! Throttle-aware HTTP execution
//!
//! [`ThrottledClient`] wraps a `reqwest::Client` for one remote API. It owns
//! the shared "earliest next call" mark, retries HTTP 429 responses, and
//! keeps call counters that the status reporter reads.

use crate::config::HttpConfig;
use crate::http::auth::TokenCache;
use crate::state::ThrottleState;
use crate::{HarvestError, Result};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// How throttled responses are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Throttled responses tolerated before the request fails
    pub max_retries: u32,
    /// Wait per attempt when no Retry-After is honored (attempt × step)
    pub backoff_step: Duration,
    /// Use the server's Retry-After when present
    pub honor_retry_after: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_step: Duration::from_millis(config.backoff_step_ms),
            honor_retry_after: !config.ignore_retry_after,
        }
    }

    /// Same waits, but the first throttled response is returned as an error
    pub fn without_retries(self) -> Self {
        Self {
            max_retries: 0,
            ..self
        }
    }

    /// Wait before the next attempt
    ///
    /// `attempt` is the 1-based count of throttled responses so far.
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(wait) if self.honor_retry_after => wait,
            _ => self.backoff_step * attempt,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_step: Duration::from_secs(2),
            honor_retry_after: true,
        }
    }
}

/// Live call counters of one client
#[derive(Debug, Default)]
pub struct CallCounters {
    in_flight: AtomicUsize,
    throttled: AtomicU64,
    completed: AtomicU64,
}

/// Point-in-time copy of [`CallCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallStats {
    pub in_flight: usize,
    pub throttled: u64,
    pub completed: u64,
}

impl CallCounters {
    pub fn snapshot(&self) -> CallStats {
        CallStats {
            in_flight: self.in_flight.load(Ordering::SeqCst),
            throttled: self.throttled.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
        }
    }
}

/// Keeps `in_flight` accurate even when the request future is dropped
struct InFlightGuard<'a>(&'a CallCounters);

impl<'a> InFlightGuard<'a> {
    fn enter(counters: &'a CallCounters) -> Self {
        counters.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// HTTP client for one throttling API
///
/// Clones share the next-call mark and the counters.
#[derive(Clone)]
pub struct ThrottledClient {
    client: Client,
    policy: RetryPolicy,
    throttle: Arc<Mutex<ThrottleState>>,
    counters: Arc<CallCounters>,
    tokens: Option<Arc<TokenCache>>,
}

impl ThrottledClient {
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self {
            client,
            policy,
            throttle: Arc::new(Mutex::new(ThrottleState::new())),
            counters: Arc::new(CallCounters::default()),
            tokens: None,
        }
    }

    /// Attaches a bearer token to every attempt
    pub fn with_tokens(mut self, tokens: Arc<TokenCache>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn counters(&self) -> Arc<CallCounters> {
        Arc::clone(&self.counters)
    }

    pub fn stats(&self) -> CallStats {
        self.counters.snapshot()
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Executes a request, waiting out and retrying throttled responses
    ///
    /// `request` is invoked once per attempt to build a fresh request.
    pub async fn execute<F>(&self, url: &str, request: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let _guard = InFlightGuard::enter(&self.counters);
        let mut attempts = 0u32;

        loop {
            self.wait_for_slot().await;

            let mut builder = request(&self.client);
            if let Some(tokens) = &self.tokens {
                builder = builder.bearer_auth(tokens.bearer().await?);
            }

            let response = builder.send().await.map_err(|source| HarvestError::Http {
                url: url.to_string(),
                source,
            })?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                self.counters.throttled.fetch_add(1, Ordering::SeqCst);
                attempts += 1;

                let wait = self.policy.backoff(attempts, retry_after(&response));
                self.lock_throttle().push_back(Instant::now(), wait);

                if attempts > self.policy.max_retries {
                    tracing::warn!("Giving up on {} after {} throttled attempts", url, attempts);
                    return Err(HarvestError::Throttled {
                        url: url.to_string(),
                        attempts,
                    });
                }

                tracing::debug!(
                    "Throttled by {} (attempt {}), waiting {:?}",
                    url,
                    attempts,
                    wait
                );
                continue;
            }

            if !status.is_success() {
                return Err(HarvestError::HttpStatus {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }

            self.counters.completed.fetch_add(1, Ordering::SeqCst);
            return Ok(response);
        }
    }

    /// Executes a GET and decodes the JSON body
    pub async fn get_json<T>(&self, url: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self.execute(url, |client| client.get(url)).await?;
        decode_json(url, response).await
    }

    /// Pushes the next-call mark back without sending anything
    ///
    /// Used when throttling is reported out of band, e.g. inside a batch reply.
    pub fn defer(&self, wait: Duration) {
        self.counters.throttled.fetch_add(1, Ordering::SeqCst);
        self.lock_throttle().push_back(Instant::now(), wait);
    }

    async fn wait_for_slot(&self) {
        loop {
            let wait = self.lock_throttle().time_until_next_call(Instant::now());
            match wait {
                Some(duration) => tokio::time::sleep(duration).await,
                None => break,
            }
        }
    }

    fn lock_throttle(&self) -> MutexGuard<'_, ThrottleState> {
        self.throttle.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Reads the body of a successful response as JSON
pub async fn decode_json<T>(url: &str, response: Response) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let bytes = response.bytes().await.map_err(|source| HarvestError::Http {
        url: url.to_string(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| HarvestError::Json {
        url: url.to_string(),
        source,
    })
}

/// Parses a Retry-After header given in seconds
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Builds the underlying reqwest client
pub fn build_http_client(config: &HttpConfig) -> std::result::Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}
