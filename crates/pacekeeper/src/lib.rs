//! Client-side request pacing.
//!
//! This crate governs how often a caller may invoke an external operation,
//! typically an HTTP API call. A [`RateLimiter`] keeps a sliding log of request
//! times and makes callers wait when the next request would exceed the
//! configured rate. Three strategies are available:
//!
//! - [`RateLimitStrategy::Strict`]: a fixed cap per trailing window
//! - [`RateLimitStrategy::Burst`]: short bursts, then a cooldown
//! - [`RateLimitStrategy::Adaptive`]: limits learned from response headers and
//!   rate limit errors
//!
//! [`RateLimitedClient`] wraps a limiter with retries and automatic feedback.
//! Limiter profiles can be loaded from TOML through [`PacekeeperConfig`].
//!
//! Pacing is in-process only. Nothing is shared across processes or persisted.
//!
//! # Example
//!
//! ```
//! use pacekeeper::{HttpStatusError, RateLimitedClient};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RateLimitedClient::adaptive(100, Duration::from_secs(60))?;
//!
//! let headers = client
//!     .execute(|| async {
//!         // Call the API here
//!         let headers: pacekeeper::Headers =
//!             [("x-ratelimit-limit", "50")].into_iter().collect();
//!         Ok::<_, HttpStatusError>(headers)
//!     })
//!     .await?;
//!
//! assert_eq!(headers.get("x-ratelimit-limit"), Some("50"));
//! assert_eq!(client.get_stats().await.max_requests, 50);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod classify;
mod client;
mod config;
mod feedback;
mod headers;
mod history;
mod limiter;
mod settings;
mod stats;
mod strategy;

pub use classify::{TOO_MANY_REQUESTS, is_rate_limit_error};
pub use client::{DEFAULT_MAX_RETRIES, ErrorClassifier, RateLimitedClient};
pub use config::{
    ADAPTIVE_BACKOFF_FACTOR, DEFAULT_ADAPTIVE_MULTIPLIER, DEFAULT_BURST_WINDOW_SECS,
    DEFAULT_MAX_REQUESTS, DEFAULT_TIME_WINDOW_SECS, MAX_ADAPTIVE_MULTIPLIER, RATE_LIMIT_EXPIRY,
    RateLimitConfig, RateLimitConfigBuilder, RateLimitSettings,
};
pub use feedback::{ErrorFeedback, FeedbackRecord, HttpStatusError, Learned};
pub use headers::{HeaderExtractor, HeaderSource, Headers, KNOWN_RATE_LIMIT_HEADERS, RETRY_AFTER};
pub use limiter::{DEFAULT_KEY, RateLimiter};
pub use settings::PacekeeperConfig;
pub use stats::{DynamicAdjustments, RateLimiterStats};
pub use strategy::RateLimitStrategy;

pub use pacekeeper_error::{
    ConfigError, ConfigErrorKind, PacekeeperError, PacekeeperErrorKind, PacekeeperResult,
};
