//! Operation invoker that paces calls through a [`RateLimiter`].

use crate::{
    ErrorFeedback, HeaderSource, RateLimitConfig, RateLimitSettings, RateLimitStrategy,
    RateLimiter, RateLimiterStats, is_rate_limit_error,
};
use pacekeeper_error::ConfigError;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry2::strategy::FixedInterval;
use tokio_retry2::{Retry, RetryError};
use tracing::{debug, instrument, warn};

/// Retries after a rate limit error when nothing else is configured.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Predicate deciding whether an error is a rate limit rejection.
pub type ErrorClassifier = Arc<dyn Fn(&dyn ErrorFeedback) -> bool + Send + Sync>;

/// Runs operations under a shared rate limiter.
///
/// Each attempt acquires the limiter first, then runs the operation. Successful
/// responses and rate limit errors are fed back to the limiter, so an adaptive
/// limiter tunes itself without any extra calls. Rate limit errors are retried
/// up to `max_retries` times; any other error is returned at once.
///
/// Clones share the same limiter.
///
/// # Example
///
/// ```
/// use pacekeeper::{HttpStatusError, RateLimitedClient};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = RateLimitedClient::strict(10, Duration::from_secs(1))?;
///
/// let value = client
///     .execute(|| async { Ok::<_, HttpStatusError>(Some(pacekeeper::Headers::new())) })
///     .await?;
/// assert!(value.is_some());
/// assert_eq!(client.get_stats().await.total_requests, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RateLimitedClient {
    limiter: Arc<RateLimiter>,
    max_retries: usize,
    classifier: ErrorClassifier,
}

impl RateLimitedClient {
    /// Create a client with its own limiter.
    pub fn new(config: RateLimitConfig) -> Self {
        Self::from_limiter(Arc::new(RateLimiter::new(config)))
    }

    /// Create a client around an existing, possibly shared, limiter.
    pub fn from_limiter(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            max_retries: DEFAULT_MAX_RETRIES,
            classifier: Arc::new(|error: &dyn ErrorFeedback| is_rate_limit_error(error)),
        }
    }

    /// Create a client from `settings`, filling unset fields from `defaults`.
    ///
    /// # Errors
    ///
    /// Returns an error if the resolved configuration is invalid.
    pub fn from_settings(
        settings: &RateLimitSettings,
        defaults: &RateLimitSettings,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            RateLimitConfig::builder()
                .settings(settings)
                .build_with(defaults)?,
        ))
    }

    /// Create a client with a strict limiter.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_requests` is zero or `time_window` is zero.
    pub fn strict(max_requests: u32, time_window: Duration) -> Result<Self, ConfigError> {
        Ok(Self::new(
            RateLimitConfig::builder()
                .strategy(RateLimitStrategy::Strict)
                .max_requests(max_requests)
                .time_window(time_window)
                .build()?,
        ))
    }

    /// Create a client with a burst limiter.
    ///
    /// # Errors
    ///
    /// Returns an error if any limit or window is zero.
    pub fn burst(
        max_requests: u32,
        time_window: Duration,
        burst_size: u32,
        burst_window: Duration,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            RateLimitConfig::builder()
                .strategy(RateLimitStrategy::Burst)
                .max_requests(max_requests)
                .time_window(time_window)
                .burst_size(burst_size)
                .burst_window(burst_window)
                .build()?,
        ))
    }

    /// Create a client with an adaptive limiter.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_requests` is zero or `time_window` is zero.
    pub fn adaptive(max_requests: u32, time_window: Duration) -> Result<Self, ConfigError> {
        Ok(Self::new(
            RateLimitConfig::builder()
                .strategy(RateLimitStrategy::Adaptive)
                .max_requests(max_requests)
                .time_window(time_window)
                .build()?,
        ))
    }

    /// A new client with a fresh limiter, configured by `settings` merged over
    /// this client's configuration.
    ///
    /// Retry budget, classifier and header extractor carry over.
    ///
    /// # Errors
    ///
    /// Returns an error if the merged configuration is invalid.
    pub fn with_options(&self, settings: &RateLimitSettings) -> Result<Self, ConfigError> {
        let current = self.limiter.config();
        let config = RateLimitConfig::from_settings(&settings.or(&current.to_settings()))?
            .with_header_extractor(current.header_extractor().cloned());
        Ok(Self {
            limiter: Arc::new(RateLimiter::new(config)),
            max_retries: self.max_retries,
            classifier: self.classifier.clone(),
        })
    }

    /// Replace the rate limit error predicate.
    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&dyn ErrorFeedback) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Set how many times a rate limited operation is retried.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// The underlying limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Retries allowed after a rate limit error.
    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Run `operation` on the default key, retrying rate limit errors.
    ///
    /// Makes at most `1 + max_retries` attempts. After the last attempt the
    /// operation's error is returned unchanged.
    pub async fn execute<F, Fut, R, E>(&self, operation: F) -> Result<R, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        R: HeaderSource + Any,
        E: ErrorFeedback,
    {
        self.execute_keyed(crate::DEFAULT_KEY, operation).await
    }

    /// Run `operation` under `key`, retrying rate limit errors.
    #[instrument(skip(self, operation), fields(max_retries = self.max_retries))]
    pub async fn execute_keyed<F, Fut, R, E>(&self, key: &str, operation: F) -> Result<R, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        R: HeaderSource + Any,
        E: ErrorFeedback,
    {
        // Pacing is done by acquire, so retries need no extra delay
        let retry_strategy = FixedInterval::from_millis(0).take(self.max_retries);
        let operation = &operation;

        Retry::spawn(retry_strategy, || async move {
            match self.attempt(key, operation).await {
                Ok(value) => Ok(value),
                Err(Attempt::RateLimited(e)) => {
                    warn!(error = %e, "Rate limited, will retry");
                    Err(RetryError::Transient {
                        err: e,
                        retry_after: None,
                    })
                }
                Err(Attempt::Failed(e)) => {
                    debug!(error = %e, "Operation failed, not retrying");
                    Err(RetryError::Permanent(e))
                }
            }
        })
        .await
    }

    /// Run `operation` once on the default key.
    ///
    /// The limiter is acquired first and fed the outcome afterwards; errors of
    /// any kind are returned without retrying.
    pub async fn execute_once<F, Fut, R, E>(&self, operation: F) -> Result<R, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        R: HeaderSource + Any,
        E: ErrorFeedback,
    {
        self.limiter.acquire().await;
        let result = operation().await;
        self.feed_back(&result).await;
        result
    }

    /// Wait on the default key without running anything.
    pub async fn acquire(&self) {
        self.limiter.acquire().await
    }

    /// See [`RateLimiter::get_stats`].
    pub async fn get_stats(&self) -> RateLimiterStats {
        self.limiter.get_stats().await
    }

    /// See [`RateLimiter::reset`].
    pub async fn reset(&self) {
        self.limiter.reset().await
    }

    /// See [`RateLimiter::update_from_response`].
    pub async fn update_from_response<R: HeaderSource + Any>(&self, response: &R) {
        self.limiter.update_from_response(response).await
    }

    /// See [`RateLimiter::update_from_error`].
    pub async fn update_from_error<E: ErrorFeedback + ?Sized>(&self, error: &E) {
        self.limiter.update_from_error(error).await
    }

    async fn attempt<F, Fut, R, E>(&self, key: &str, operation: &F) -> Result<R, Attempt<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        R: HeaderSource + Any,
        E: ErrorFeedback,
    {
        self.limiter.acquire_key(key).await;
        match operation().await {
            Ok(value) => {
                self.limiter.update_from_response(&value).await;
                Ok(value)
            }
            Err(e) if (self.classifier)(&e as &dyn ErrorFeedback) => {
                self.limiter.update_from_error(&e).await;
                Err(Attempt::RateLimited(e))
            }
            Err(e) => Err(Attempt::Failed(e)),
        }
    }

    async fn feed_back<R, E>(&self, result: &Result<R, E>)
    where
        R: HeaderSource + Any,
        E: ErrorFeedback,
    {
        match result {
            Ok(value) => self.limiter.update_from_response(value).await,
            Err(e) if (self.classifier)(e as &dyn ErrorFeedback) => {
                self.limiter.update_from_error(e).await
            }
            Err(_) => {}
        }
    }
}

/// Outcome of a failed attempt.
enum Attempt<E> {
    RateLimited(E),
    Failed(E),
}

impl std::fmt::Debug for RateLimitedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedClient")
            .field("limiter", &self.limiter)
            .field("max_retries", &self.max_retries)
            .field("classifier", &"ErrorClassifier")
            .finish()
    }
}
