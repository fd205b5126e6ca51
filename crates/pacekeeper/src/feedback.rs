//! Feedback the paced operation reports back to the limiter.
//!
//! Errors reach the limiter through the [`ErrorFeedback`] trait, which exposes
//! the few shapes the limiter knows how to read: headers on a nested response,
//! headers on the error itself, a status code, and the error text.
//!
//! What the limiter learns is kept in a [`FeedbackRecord`], owned by the
//! limiter and mutated only by its header routine and strategy logic.

use crate::{DEFAULT_ADAPTIVE_MULTIPLIER, Headers, HeaderSource};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// An error returned by a paced operation.
///
/// Every method has a default, so implementors only override what their error
/// actually carries. The `Display` output is scanned for phrases such as
/// "retry after 30" when no headers are available.
///
/// # Example
///
/// ```
/// use pacekeeper::{ErrorFeedback, Headers};
///
/// #[derive(Debug)]
/// struct Throttled;
///
/// impl std::fmt::Display for Throttled {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         write!(f, "throttled, retry after 12 seconds")
///     }
/// }
///
/// impl ErrorFeedback for Throttled {
///     fn status_code(&self) -> Option<u16> {
///         Some(429)
///     }
/// }
/// ```
pub trait ErrorFeedback: fmt::Display {
    /// HTTP status code carried directly by the error.
    fn status_code(&self) -> Option<u16> {
        None
    }

    /// HTTP status code of a response attached to the error.
    fn response_status_code(&self) -> Option<u16> {
        None
    }

    /// Headers of a response attached to the error.
    fn response_headers(&self) -> Option<Headers> {
        None
    }

    /// Headers carried directly by the error.
    fn headers(&self) -> Option<Headers> {
        None
    }
}

impl ErrorFeedback for reqwest::Error {
    fn status_code(&self) -> Option<u16> {
        self.status().map(|status| status.as_u16())
    }
}

/// A plain HTTP failure: status code, message, and optional response headers.
///
/// Convenient for wrapping transport errors from clients that do not implement
/// [`ErrorFeedback`] themselves.
///
/// # Example
///
/// ```
/// use pacekeeper::{ErrorFeedback, HttpStatusError};
///
/// let err = HttpStatusError::new(429, "Too Many Requests")
///     .with_header("Retry-After", "30");
/// assert_eq!(err.status_code(), Some(429));
/// assert_eq!(err.headers().unwrap().get("retry-after"), Some("30"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[display("HTTP {}: {}", status, message)]
pub struct HttpStatusError {
    /// HTTP status code
    pub status: u16,
    /// Error message
    pub message: String,
    /// Response headers, if the response was available
    pub headers: Option<Headers>,
}

impl HttpStatusError {
    /// Create a new error without headers.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            headers: None,
        }
    }

    /// Attach a response header.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .insert(name, value);
        self
    }

    /// Attach a full set of response headers.
    pub fn with_headers(mut self, headers: impl HeaderSource) -> Self {
        self.headers = headers.headers();
        self
    }
}

impl ErrorFeedback for HttpStatusError {
    fn status_code(&self) -> Option<u16> {
        Some(self.status)
    }

    fn headers(&self) -> Option<Headers> {
        self.headers.clone()
    }
}

/// A value learned from feedback, stamped with when it was learned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Learned<T> {
    /// The learned value
    pub value: T,
    /// When it was learned
    pub at: Instant,
}

impl<T> Learned<T> {
    pub(crate) fn new(value: T, at: Instant) -> Self {
        Self { value, at }
    }

    /// Time elapsed between learning the value and `now`.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.at)
    }
}

/// Adjustments learned from response headers and rate limit errors.
///
/// Unset overrides are `None`; a set override always carries its timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackRecord {
    /// Wait-time scaling per excess request, in seconds.
    pub adaptive_multiplier: f64,
    /// Most recent `retry-after` instruction, in seconds.
    pub retry_after: Option<Learned<u64>>,
    /// Window length derived from a reset header.
    pub time_window: Option<Learned<Duration>>,
    /// Request limit reported by a limit header.
    pub max_requests: Option<Learned<u32>>,
    /// Low remaining-request count reported alongside a reset header.
    pub remaining: Option<Learned<u64>>,
}

impl Default for FeedbackRecord {
    fn default() -> Self {
        Self {
            adaptive_multiplier: DEFAULT_ADAPTIVE_MULTIPLIER,
            retry_after: None,
            time_window: None,
            max_requests: None,
            remaining: None,
        }
    }
}
