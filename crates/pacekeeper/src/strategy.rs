//! Rate limiting strategies.

use pacekeeper_error::{ConfigError, ConfigErrorKind};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Policy deciding when a caller must wait and for how long.
///
/// # Example
///
/// ```
/// use pacekeeper::RateLimitStrategy;
///
/// let strategy = RateLimitStrategy::from_name("Burst").unwrap();
/// assert_eq!(strategy, RateLimitStrategy::Burst);
/// assert_eq!(strategy.to_string(), "burst");
/// assert_eq!(RateLimitStrategy::default(), RateLimitStrategy::Strict);
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::EnumIter,
    strum::EnumString,
    derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum RateLimitStrategy {
    /// Fixed window: at most `max_requests` per `time_window`.
    #[default]
    #[display("strict")]
    Strict,
    /// Short bursts up to `burst_size`, then a cooldown.
    #[display("burst")]
    Burst,
    /// Feedback-driven pacing that tunes itself from headers and errors.
    #[display("adaptive")]
    Adaptive,
}

impl RateLimitStrategy {
    /// Parse a strategy name (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not `strict`, `burst` or `adaptive`.
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        Self::from_str(name.trim())
            .map_err(|_| ConfigError::new(ConfigErrorKind::UnknownStrategy(name.to_string())))
    }

    /// Whether a waiter re-evaluates the limit after sleeping.
    ///
    /// Strict and burst waits end when an entry leaves its window, so waiters
    /// re-check and can never overshoot the limit. An adaptive wait is a
    /// pacing penalty and is served once.
    pub fn rechecks_after_wait(&self) -> bool {
        !matches!(self, RateLimitStrategy::Adaptive)
    }
}
