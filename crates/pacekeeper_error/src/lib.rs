//! Error types for the pacekeeper library.
//!
//! Pacing itself never fails: `acquire` always eventually succeeds and feedback
//! ingestion skips anything it cannot parse. The errors here cover the one loud
//! failure point, building or loading a limiter configuration.
//!
//! # Error Hierarchy
//!
//! All errors follow the `ErrorKind` + wrapper struct pattern:
//! - `*ErrorKind` enum defines specific error conditions
//! - `*Error` struct wraps the kind with source location tracking
//! - All errors use `#[track_caller]` for automatic location capture
//!
//! # Examples
//!
//! ```
//! use pacekeeper_error::{ConfigError, ConfigErrorKind, PacekeeperResult};
//!
//! fn check(max_requests: i64) -> PacekeeperResult<u32> {
//!     if max_requests <= 0 {
//!         Err(ConfigError::new(ConfigErrorKind::InvalidMaxRequests(max_requests)))?
//!     }
//!     Ok(max_requests as u32)
//! }
//!
//! assert!(check(0).is_err());
//! assert_eq!(check(5).unwrap(), 5);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;

pub use config::{ConfigError, ConfigErrorKind};
pub use error::{PacekeeperError, PacekeeperErrorKind, PacekeeperResult};
