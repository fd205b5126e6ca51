//! Normalized response headers and rate limit header parsing.
//!
//! APIs report their limits through a zoo of header conventions. This module
//! reduces any response to a [`Headers`] mapping (lowercase name to raw value)
//! and reads the handful of signals the adaptive strategy cares about:
//!
//! - `retry-after`: seconds (or an HTTP date) before the next attempt
//! - `*-reset`: when the current window resets (epoch or seconds from now)
//! - `*-limit`: requests allowed per window
//! - `*-remaining`: requests left in the current window
//!
//! Parsing is best effort. Values that do not parse are skipped.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::debug;

/// Rate limit headers recognized by the feedback routine, matched case-insensitively.
///
/// When several variants are present, later entries win.
pub const KNOWN_RATE_LIMIT_HEADERS: &[&str] = &[
    // IETF draft
    "ratelimit-reset",
    "ratelimit-remaining",
    "ratelimit-limit",
    // GitHub-style
    "x-ratelimit-reset",
    "x-ratelimit-remaining",
    "x-ratelimit-limit",
    // Twitter-style
    "x-rate-limit-reset",
    "x-rate-limit-remaining",
    "x-rate-limit-limit",
    // Request-scoped vendor variants
    "x-ratelimit-remaining-requests",
    "x-ratelimit-limit-requests",
    "anthropic-ratelimit-requests-remaining",
    "anthropic-ratelimit-requests-limit",
    // AWS-style
    "x-amzn-ratelimit-limit",
];

/// Header carrying a direct wait instruction.
pub const RETRY_AFTER: &str = "retry-after";

/// Reset values further than this in the future are read as epoch seconds.
const EPOCH_CUTOFF_SECS: i64 = 3600;

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("Valid digits regex"));

/// Response headers keyed by lowercase name.
///
/// # Example
///
/// ```
/// use pacekeeper::Headers;
///
/// let headers: Headers = [("Retry-After", "30")].into_iter().collect();
/// assert_eq!(headers.get("retry-after"), Some("30"));
/// assert_eq!(headers.get("RETRY-AFTER"), Some("30"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Headers(HashMap<String, String>);

impl Headers {
    /// Create an empty header mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, lowercasing its name.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Look up a header by name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Number of headers held.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the mapping holds no headers.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

impl From<&reqwest::header::HeaderMap> for Headers {
    fn from(map: &reqwest::header::HeaderMap) -> Self {
        map.iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
            .collect()
    }
}

/// A value that may carry response headers.
///
/// This is the default extraction path used when no [`HeaderExtractor`] is
/// configured. Implement it for your own response types; return `None` when
/// the value has no headers at all.
pub trait HeaderSource {
    /// Headers carried by this value, if any.
    fn headers(&self) -> Option<Headers>;
}

impl HeaderSource for Headers {
    fn headers(&self) -> Option<Headers> {
        Some(self.clone())
    }
}

impl HeaderSource for HashMap<String, String> {
    fn headers(&self) -> Option<Headers> {
        Some(self.iter().collect())
    }
}

impl HeaderSource for reqwest::header::HeaderMap {
    fn headers(&self) -> Option<Headers> {
        Some(Headers::from(self))
    }
}

impl HeaderSource for reqwest::Response {
    fn headers(&self) -> Option<Headers> {
        Some(Headers::from(reqwest::Response::headers(self)))
    }
}

impl HeaderSource for () {
    fn headers(&self) -> Option<Headers> {
        None
    }
}

impl<T: HeaderSource> HeaderSource for Option<T> {
    fn headers(&self) -> Option<Headers> {
        self.as_ref().and_then(HeaderSource::headers)
    }
}

/// Caller-supplied header extraction for arbitrary response shapes.
///
/// Receives the response as `&dyn Any` so it can downcast to whatever the
/// paced operation returns. It is called synchronously and must not panic.
///
/// # Example
///
/// ```
/// use pacekeeper::{HeaderExtractor, Headers};
/// use std::any::Any;
/// use std::sync::Arc;
///
/// struct ApiReply { quota_left: u32 }
///
/// let extractor: HeaderExtractor = Arc::new(|response: &dyn Any| {
///     response
///         .downcast_ref::<ApiReply>()
///         .map(|reply| {
///             [("x-ratelimit-remaining", reply.quota_left.to_string())]
///                 .into_iter()
///                 .collect::<Headers>()
///         })
///         .unwrap_or_default()
/// });
///
/// let headers: Headers = extractor(&ApiReply { quota_left: 3 });
/// assert_eq!(headers.get("x-ratelimit-remaining"), Some("3"));
/// ```
pub type HeaderExtractor = Arc<dyn Fn(&dyn Any) -> Headers + Send + Sync>;

/// Role of a known rate limit header, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderRole {
    Reset,
    Remaining,
    Limit,
}

impl HeaderRole {
    fn of(name: &str) -> Option<Self> {
        if name.contains("reset") {
            Some(HeaderRole::Reset)
        } else if name.contains("remaining") {
            Some(HeaderRole::Remaining)
        } else if name.contains("limit") {
            Some(HeaderRole::Limit)
        } else {
            None
        }
    }
}

/// Signals read from one set of response headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RateLimitSignals {
    /// Seconds to wait before the next request.
    pub retry_after: Option<u64>,
    /// Time until the current window resets.
    pub reset_in: Option<Duration>,
    /// Requests allowed per window.
    pub limit: Option<u64>,
    /// Requests left in the current window.
    pub remaining: Option<u64>,
}

impl RateLimitSignals {
    /// Read rate limit signals from `headers` relative to wall-clock `now`.
    pub(crate) fn parse(headers: &Headers, now: DateTime<Utc>) -> Self {
        let mut signals = RateLimitSignals {
            retry_after: headers
                .get(RETRY_AFTER)
                .and_then(|value| parse_retry_after(value, now)),
            ..Default::default()
        };

        let now_epoch = now.timestamp();
        for name in KNOWN_RATE_LIMIT_HEADERS {
            let Some(raw) = headers.get(name) else {
                continue;
            };
            let Some(value) = first_number(raw) else {
                debug!(header = name, value = raw, "Skipping header without numeric value");
                continue;
            };
            match HeaderRole::of(name) {
                Some(HeaderRole::Reset) => {
                    let seconds = if value as i128 > (now_epoch + EPOCH_CUTOFF_SECS) as i128 {
                        value.saturating_sub(now_epoch.max(0) as u64)
                    } else {
                        value
                    };
                    signals.reset_in = Some(Duration::from_secs(seconds));
                }
                Some(HeaderRole::Remaining) => signals.remaining = Some(value),
                Some(HeaderRole::Limit) => signals.limit = Some(value),
                None => {}
            }
        }

        signals
    }

    /// Whether any signal was found.
    pub(crate) fn is_empty(&self) -> bool {
        self == &RateLimitSignals::default()
    }
}

/// Extract the first maximal run of ASCII digits as a number.
pub(crate) fn first_number(value: &str) -> Option<u64> {
    DIGITS.find(value)?.as_str().parse().ok()
}

/// Parse a `retry-after` value given as integer seconds or an HTTP date.
fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<u64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }
    match DateTime::parse_from_rfc2822(value) {
        Ok(at) => {
            let seconds = (at.with_timezone(&Utc) - now).num_seconds().max(0);
            Some(seconds as u64)
        }
        Err(_) => {
            debug!(value, "Ignoring unparseable retry-after header");
            None
        }
    }
}
