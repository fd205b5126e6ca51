//! Configuration error types.

/// Specific configuration error conditions.
#[derive(Debug, Clone, PartialEq, derive_more::Display)]
pub enum ConfigErrorKind {
    /// `max_requests` must be greater than zero
    #[display("max_requests must be greater than 0, got {}", _0)]
    InvalidMaxRequests(i64),
    /// `time_window` must be a finite number of seconds greater than zero
    #[display("time_window must be greater than 0 seconds, got {}", _0)]
    InvalidTimeWindow(f64),
    /// `burst_window` must be a finite number of seconds greater than zero
    #[display("burst_window must be greater than 0 seconds, got {}", _0)]
    InvalidBurstWindow(f64),
    /// `cooldown_period` must be finite and not negative
    #[display("cooldown_period must not be negative, got {}", _0)]
    InvalidCooldown(f64),
    /// Strategy name did not match any known strategy
    #[display("Unknown rate limit strategy: {}", _0)]
    UnknownStrategy(String),
    /// Named limiter profile is not present in the configuration
    #[display("Unknown limiter profile: {}", _0)]
    UnknownProfile(String),
    /// Configuration sources could not be read
    #[display("Failed to load configuration: {}", _0)]
    Load(String),
    /// Configuration could not be deserialized
    #[display("Failed to parse configuration: {}", _0)]
    Parse(String),
}

/// Configuration error with source location.
///
/// # Examples
///
/// ```
/// use pacekeeper_error::{ConfigError, ConfigErrorKind};
///
/// let err = ConfigError::new(ConfigErrorKind::InvalidTimeWindow(0.0));
/// assert!(format!("{}", err).contains("time_window"));
/// assert_eq!(err.kind(), &ConfigErrorKind::InvalidTimeWindow(0.0));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Configuration Error: {} at line {} in {}", kind, line, file)]
pub struct ConfigError {
    /// The kind of error that occurred
    pub kind: ConfigErrorKind,
    /// Line number where the error occurred
    pub line: u32,
    /// File where the error occurred
    pub file: &'static str,
}

impl ConfigError {
    /// Create a new ConfigError of the given kind at the current location.
    #[track_caller]
    pub fn new(kind: ConfigErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Get the error kind.
    pub fn kind(&self) -> &ConfigErrorKind {
        &self.kind
    }
}
