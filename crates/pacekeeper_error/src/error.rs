//! Top-level error wrapper types.

use crate::ConfigError;

/// Every error the pacekeeper crates can produce.
///
/// # Examples
///
/// ```
/// use pacekeeper_error::{ConfigError, ConfigErrorKind, PacekeeperError};
///
/// let config_err = ConfigError::new(ConfigErrorKind::InvalidMaxRequests(0));
/// let err: PacekeeperError = config_err.into();
/// assert!(format!("{}", err).contains("Configuration Error"));
/// ```
#[derive(Debug, derive_more::From, derive_more::Display, derive_more::Error)]
pub enum PacekeeperErrorKind {
    /// Configuration error
    #[from(ConfigError)]
    Config(ConfigError),
}

/// Pacekeeper error with kind discrimination.
#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("Pacekeeper Error: {}", _0)]
pub struct PacekeeperError(Box<PacekeeperErrorKind>);

impl PacekeeperError {
    /// Create a new error from a kind.
    pub fn new(kind: PacekeeperErrorKind) -> Self {
        Self(Box::new(kind))
    }

    /// Get the error kind.
    pub fn kind(&self) -> &PacekeeperErrorKind {
        &self.0
    }
}

// Generic From implementation for any type that converts to PacekeeperErrorKind
impl<T> From<T> for PacekeeperError
where
    T: Into<PacekeeperErrorKind>,
{
    fn from(err: T) -> Self {
        Self::new(err.into())
    }
}

/// Result type for pacekeeper operations.
pub type PacekeeperResult<T> = std::result::Result<T, PacekeeperError>;
