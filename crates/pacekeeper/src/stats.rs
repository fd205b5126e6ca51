//! Point-in-time statistics of a limiter.

use crate::{FeedbackRecord, RateLimitStrategy};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Snapshot returned by [`RateLimiter::get_stats`](crate::RateLimiter::get_stats).
///
/// Counters are cumulative over the limiter's lifetime and summed across keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimiterStats {
    /// Active strategy
    pub strategy: RateLimitStrategy,
    /// Requests admitted so far
    pub total_requests: u64,
    /// Sum of all waits imposed
    pub total_wait_time: Duration,
    /// Longest single wait imposed
    pub max_wait_time: Duration,
    /// Requests per minute over the current window
    pub current_rate: f64,
    /// Requests currently held in window history
    pub current_queue_size: usize,
    /// Keys with live history
    pub tracked_keys: usize,
    /// Rate limit errors reported
    pub rate_limit_hits: u64,
    /// Effective request limit, after header overrides
    pub max_requests: u32,
    /// Effective window, after header overrides
    pub time_window: Duration,
    /// Current adaptive multiplier
    pub adaptive_multiplier: f64,
    /// When feedback last changed the limiter's settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_dynamic_update: Option<DateTime<Utc>>,
    /// What feedback has changed, present once any adjustment was made
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynamic_adjustments: Option<DynamicAdjustments>,
    /// When the last rate limit error was reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_rate_limit_hit: Option<DateTime<Utc>>,
    /// Time since the last rate limit error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_since_last_rate_limit: Option<Duration>,
    /// Time until the last rate limit error is forgotten
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_expiry_in: Option<Duration>,
}

/// Adjustments learned from feedback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DynamicAdjustments {
    /// Wait-time scaling per excess request
    pub adaptive_multiplier: f64,
    /// Last `retry-after` instruction, in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// Window derived from a reset header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_window: Option<Duration>,
    /// Limit reported by a limit header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_requests: Option<u32>,
    /// Low remaining-request count, if one was reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,
}

impl From<&FeedbackRecord> for DynamicAdjustments {
    fn from(record: &FeedbackRecord) -> Self {
        Self {
            adaptive_multiplier: record.adaptive_multiplier,
            retry_after: record.retry_after.map(|learned| learned.value),
            time_window: record.time_window.map(|learned| learned.value),
            max_requests: record.max_requests.map(|learned| learned.value),
            remaining: record.remaining.map(|learned| learned.value),
        }
    }
}

/// Wall-clock time of a monotonic instant, anchored at (`now`, `wall_now`).
pub(crate) fn wall_clock(at: Instant, now: Instant, wall_now: DateTime<Utc>) -> DateTime<Utc> {
    let ago = chrono::Duration::from_std(now.saturating_duration_since(at))
        .unwrap_or(chrono::Duration::zero());
    wall_now - ago
}
