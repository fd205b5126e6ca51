//! Limiter configuration.
//!
//! A [`RateLimitConfig`] is validated once, at construction, and never changes
//! afterwards; what the limiter learns at runtime lives in its
//! [`FeedbackRecord`](crate::FeedbackRecord).
//!
//! Values are resolved with a fixed precedence:
//! 1. Fields set explicitly on the builder
//! 2. Defaults provided by the caller (a [`RateLimitSettings`], typically from
//!    [`PacekeeperConfig`](crate::PacekeeperConfig))
//! 3. The hard-coded defaults in this module

use crate::{HeaderExtractor, Headers, RateLimitStrategy};
use pacekeeper_error::{ConfigError, ConfigErrorKind};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// Requests per window when nothing else is configured.
pub const DEFAULT_MAX_REQUESTS: u32 = 60;

/// Window length in seconds when nothing else is configured.
pub const DEFAULT_TIME_WINDOW_SECS: f64 = 60.0;

/// Burst window length in seconds when none is configured.
pub const DEFAULT_BURST_WINDOW_SECS: f64 = 10.0;

/// Starting (and floor) value of the adaptive multiplier.
pub const DEFAULT_ADAPTIVE_MULTIPLIER: f64 = 1.0;

/// Ceiling of the adaptive multiplier.
pub const MAX_ADAPTIVE_MULTIPLIER: f64 = 10.0;

/// Growth factor applied to the adaptive multiplier on each rate limit hit.
pub const ADAPTIVE_BACKOFF_FACTOR: f64 = 1.5;

/// Quiet period after which a rate limit hit is forgotten.
pub const RATE_LIMIT_EXPIRY: Duration = Duration::from_secs(900);

/// Partial limiter configuration, every field optional.
///
/// Used both as the deserialized form of a configuration profile and as the
/// "provided defaults" layer when building a [`RateLimitConfig`]. Durations are
/// given in seconds.
///
/// # Example
///
/// ```toml
/// [limiters.github]
/// strategy = "adaptive"
/// max_requests = 5000
/// time_window = 3600
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSettings {
    /// Rate limiting strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<RateLimitStrategy>,

    /// Requests allowed per window (must be > 0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_requests: Option<i64>,

    /// Window length in seconds (must be > 0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<f64>,

    /// Requests allowed within one burst window (burst strategy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_size: Option<u32>,

    /// Burst window length in seconds (burst strategy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_window: Option<f64>,

    /// Fixed wait after a saturated burst, in seconds (burst strategy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_period: Option<f64>,
}

impl RateLimitSettings {
    /// Fill every unset field from `fallback`.
    ///
    /// Fields already set on `self` win.
    pub fn or(&self, fallback: &RateLimitSettings) -> RateLimitSettings {
        RateLimitSettings {
            strategy: self.strategy.or(fallback.strategy),
            max_requests: self.max_requests.or(fallback.max_requests),
            time_window: self.time_window.or(fallback.time_window),
            burst_size: self.burst_size.or(fallback.burst_size),
            burst_window: self.burst_window.or(fallback.burst_window),
            cooldown_period: self.cooldown_period.or(fallback.cooldown_period),
        }
    }
}

/// Validated configuration of a [`RateLimiter`](crate::RateLimiter).
///
/// # Example
///
/// ```
/// use pacekeeper::{RateLimitConfig, RateLimitStrategy};
/// use std::time::Duration;
///
/// let config = RateLimitConfig::builder()
///     .strategy(RateLimitStrategy::Burst)
///     .max_requests(10)
///     .time_window(Duration::from_secs(60))
///     .build()
///     .unwrap();
///
/// // Burst size defaults to twice the request limit
/// assert_eq!(*config.burst_size(), 20);
/// assert_eq!(*config.burst_window(), Duration::from_secs(10));
/// ```
#[derive(Clone, derive_getters::Getters)]
pub struct RateLimitConfig {
    /// Active strategy.
    strategy: RateLimitStrategy,
    /// Requests allowed per `time_window`.
    max_requests: u32,
    /// Trailing window over which requests are counted.
    time_window: Duration,
    /// Requests allowed per `burst_window`, never below `max_requests`.
    burst_size: u32,
    /// Trailing window over which burst requests are counted.
    burst_window: Duration,
    /// Fixed wait after a saturated burst.
    cooldown_period: Option<Duration>,
    #[getter(skip)]
    header_extractor: Option<HeaderExtractor>,
}

impl RateLimitConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::default()
    }

    /// Validate `settings`, filling unset fields with the hard-coded defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_requests <= 0`, `time_window <= 0`,
    /// `burst_window <= 0`, `cooldown_period < 0`, or any duration is not finite.
    #[track_caller]
    pub fn from_settings(settings: &RateLimitSettings) -> Result<Self, ConfigError> {
        let max_requests = settings
            .max_requests
            .unwrap_or(DEFAULT_MAX_REQUESTS as i64);
        if max_requests <= 0 || max_requests > u32::MAX as i64 {
            return Err(ConfigError::new(ConfigErrorKind::InvalidMaxRequests(
                max_requests,
            )));
        }
        let max_requests = max_requests as u32;

        let time_window = settings.time_window.unwrap_or(DEFAULT_TIME_WINDOW_SECS);
        let Some(time_window) = positive_secs(time_window) else {
            return Err(ConfigError::new(ConfigErrorKind::InvalidTimeWindow(
                time_window,
            )));
        };

        let burst_window = settings.burst_window.unwrap_or(DEFAULT_BURST_WINDOW_SECS);
        let Some(burst_window) = positive_secs(burst_window) else {
            return Err(ConfigError::new(ConfigErrorKind::InvalidBurstWindow(
                burst_window,
            )));
        };

        // A zero cooldown means "wait for the burst window instead"
        let cooldown_period = match settings.cooldown_period {
            None => None,
            Some(secs) if secs == 0.0 => None,
            Some(secs) => match positive_secs(secs) {
                Some(cooldown) => Some(cooldown),
                None => return Err(ConfigError::new(ConfigErrorKind::InvalidCooldown(secs))),
            },
        };

        let burst_size = settings
            .burst_size
            .unwrap_or_else(|| max_requests.saturating_mul(2))
            .max(max_requests);

        Ok(Self {
            strategy: settings.strategy.unwrap_or_default(),
            max_requests,
            time_window,
            burst_size,
            burst_window,
            cooldown_period,
            header_extractor: None,
        })
    }

    /// The configured header extractor, if any.
    pub fn header_extractor(&self) -> Option<&HeaderExtractor> {
        self.header_extractor.as_ref()
    }

    /// This configuration expressed as settings, for merging.
    pub fn to_settings(&self) -> RateLimitSettings {
        RateLimitSettings {
            strategy: Some(self.strategy),
            max_requests: Some(self.max_requests as i64),
            time_window: Some(self.time_window.as_secs_f64()),
            burst_size: Some(self.burst_size),
            burst_window: Some(self.burst_window.as_secs_f64()),
            cooldown_period: Some(
                self.cooldown_period
                    .map(|cooldown| cooldown.as_secs_f64())
                    .unwrap_or(0.0),
            ),
        }
    }

    pub(crate) fn with_header_extractor(mut self, extractor: Option<HeaderExtractor>) -> Self {
        self.header_extractor = extractor;
        self
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            strategy: RateLimitStrategy::Strict,
            max_requests: DEFAULT_MAX_REQUESTS,
            time_window: Duration::from_secs_f64(DEFAULT_TIME_WINDOW_SECS),
            burst_size: DEFAULT_MAX_REQUESTS * 2,
            burst_window: Duration::from_secs_f64(DEFAULT_BURST_WINDOW_SECS),
            cooldown_period: None,
            header_extractor: None,
        }
    }
}

impl PartialEq for RateLimitConfig {
    fn eq(&self, other: &Self) -> bool {
        let same_extractor = match (&self.header_extractor, &other.header_extractor) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        self.strategy == other.strategy
            && self.max_requests == other.max_requests
            && self.time_window == other.time_window
            && self.burst_size == other.burst_size
            && self.burst_window == other.burst_window
            && self.cooldown_period == other.cooldown_period
            && same_extractor
    }
}

impl std::fmt::Debug for RateLimitConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitConfig")
            .field("strategy", &self.strategy)
            .field("max_requests", &self.max_requests)
            .field("time_window", &self.time_window)
            .field("burst_size", &self.burst_size)
            .field("burst_window", &self.burst_window)
            .field("cooldown_period", &self.cooldown_period)
            .field(
                "header_extractor",
                &if self.header_extractor.is_some() {
                    "Some(HeaderExtractor)"
                } else {
                    "None"
                },
            )
            .finish()
    }
}

/// Builder for [`RateLimitConfig`].
#[derive(Default)]
pub struct RateLimitConfigBuilder {
    settings: RateLimitSettings,
    header_extractor: Option<HeaderExtractor>,
}

impl RateLimitConfigBuilder {
    /// Sets the strategy.
    pub fn strategy(mut self, strategy: RateLimitStrategy) -> Self {
        self.settings.strategy = Some(strategy);
        self
    }

    /// Sets the number of requests allowed per window.
    pub fn max_requests(mut self, max_requests: u32) -> Self {
        self.settings.max_requests = Some(max_requests as i64);
        self
    }

    /// Sets the window length.
    pub fn time_window(mut self, window: Duration) -> Self {
        self.settings.time_window = Some(window.as_secs_f64());
        self
    }

    /// Sets the burst size (burst strategy).
    pub fn burst_size(mut self, burst_size: u32) -> Self {
        self.settings.burst_size = Some(burst_size);
        self
    }

    /// Sets the burst window length (burst strategy).
    pub fn burst_window(mut self, window: Duration) -> Self {
        self.settings.burst_window = Some(window.as_secs_f64());
        self
    }

    /// Sets a fixed cooldown after a saturated burst (burst strategy).
    pub fn cooldown_period(mut self, cooldown: Duration) -> Self {
        self.settings.cooldown_period = Some(cooldown.as_secs_f64());
        self
    }

    /// Sets every field present in `settings`, overriding earlier calls.
    pub fn settings(mut self, settings: &RateLimitSettings) -> Self {
        self.settings = settings.or(&self.settings);
        self
    }

    /// Sets a custom header extractor for responses.
    pub fn header_extractor<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&dyn Any) -> Headers + Send + Sync + 'static,
    {
        self.header_extractor = Some(Arc::new(extractor));
        self
    }

    /// Builds the configuration from explicit fields and hard-coded defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if any field is out of range.
    #[track_caller]
    pub fn build(self) -> Result<RateLimitConfig, ConfigError> {
        self.build_with(&RateLimitSettings::default())
    }

    /// Builds the configuration, filling unset fields from `defaults` before
    /// falling back to the hard-coded defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if any resolved field is out of range.
    #[track_caller]
    pub fn build_with(self, defaults: &RateLimitSettings) -> Result<RateLimitConfig, ConfigError> {
        let settings = self.settings.or(defaults);
        Ok(RateLimitConfig::from_settings(&settings)?.with_header_extractor(self.header_extractor))
    }
}

/// Convert seconds to a duration, rejecting zero, negative and non-finite values.
fn positive_secs(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs > 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}
