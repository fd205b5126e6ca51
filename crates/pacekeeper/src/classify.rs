//! Heuristic detection of rate limit errors.

use crate::ErrorFeedback;

/// HTTP status code for "Too Many Requests".
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Lowercase phrases that mark an error message as a rate limit rejection.
const RATE_LIMIT_PHRASES: &[&str] = &[
    "rate limit",
    "ratelimit",
    "too many requests",
    "429",
    "retry after",
    "throttl",
    "quota exceeded",
];

/// Determine whether an error is likely a rate limit rejection.
///
/// Checks, in order, a 429 status on the error, a 429 status on an attached
/// response, and rate-limit phrases in the error message (case-insensitive).
///
/// # Example
///
/// ```
/// use pacekeeper::{is_rate_limit_error, HttpStatusError};
///
/// assert!(is_rate_limit_error(&HttpStatusError::new(429, "slow down")));
/// assert!(is_rate_limit_error(&HttpStatusError::new(503, "Request was throttled")));
/// assert!(!is_rate_limit_error(&HttpStatusError::new(404, "Not Found")));
/// ```
pub fn is_rate_limit_error<E: ErrorFeedback + ?Sized>(error: &E) -> bool {
    if error.status_code() == Some(TOO_MANY_REQUESTS)
        || error.response_status_code() == Some(TOO_MANY_REQUESTS)
    {
        return true;
    }

    let message = error.to_string().to_lowercase();
    RATE_LIMIT_PHRASES
        .iter()
        .any(|phrase| message.contains(phrase))
}
