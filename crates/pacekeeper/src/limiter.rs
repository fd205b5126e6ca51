//! Request pacing engine.
//!
//! This module provides the [`RateLimiter`], which keeps a sliding log of
//! request timestamps per key and decides, under one of three strategies,
//! whether a caller may proceed or must wait:
//!
//! - **Strict**: at most `max_requests` per `time_window`
//! - **Burst**: up to `burst_size` requests per `burst_window`, then a cooldown
//! - **Adaptive**: paces itself from response headers and rate limit errors
//!
//! All state sits behind one async mutex. The lock is never held while a
//! caller sleeps, so waiters do not block each other.

use crate::headers::RateLimitSignals;
use crate::history::{KeyHistory, until_expiry};
use crate::stats::wall_clock;
use crate::{
    ADAPTIVE_BACKOFF_FACTOR, DEFAULT_ADAPTIVE_MULTIPLIER, DynamicAdjustments, ErrorFeedback,
    FeedbackRecord, HeaderSource, Headers, Learned, MAX_ADAPTIVE_MULTIPLIER, RATE_LIMIT_EXPIRY,
    RETRY_AFTER, RateLimitConfig, RateLimitStrategy, RateLimiterStats,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Key used by [`RateLimiter::acquire`].
pub const DEFAULT_KEY: &str = "default";

/// How long a `retry-after` instruction stays in force.
const RETRY_AFTER_VALIDITY: Duration = Duration::from_secs(60);

/// A rate limit hit this recent lowers the adaptive threshold.
const RECENT_HIT_WINDOW: Duration = Duration::from_secs(60);

/// Adaptive threshold while a recent hit is on record.
const CAUTIOUS_THRESHOLD: f64 = 0.9;

/// Span over which the post-hit minimum wait decays to zero.
const MIN_WAIT_DECAY: Duration = Duration::from_secs(120);

/// Minimum wait right after a rate limit hit, in seconds.
const MAX_MIN_WAIT_SECS: f64 = 1.0;

/// Remaining-request counts at or below this are recorded as a signal.
const LOW_REMAINING: u64 = 5;

/// Growth in key count that triggers an idle-key sweep from `acquire`.
const KEY_SWEEP_THRESHOLD: usize = 1024;

static RETRY_AFTER_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"retry[- ]after:?\s*(\d+)").expect("Valid retry-after regex"));

/// Mutable state of a limiter.
#[derive(Debug, Default)]
struct LimiterState {
    histories: HashMap<String, KeyHistory>,
    feedback: FeedbackRecord,
    total_requests: u64,
    total_wait_time: Duration,
    max_wait_time: Duration,
    rate_limit_hits: u64,
    last_dynamic_update: Option<Instant>,
    last_rate_limit_hit: Option<Instant>,
    /// Key count above which the next sweep runs.
    next_sweep: usize,
}

impl LimiterState {
    fn max_requests(&self, config: &RateLimitConfig) -> u32 {
        self.feedback
            .max_requests
            .map(|learned| learned.value)
            .unwrap_or(*config.max_requests())
    }

    fn time_window(&self, config: &RateLimitConfig) -> Duration {
        self.feedback
            .time_window
            .map(|learned| learned.value)
            .unwrap_or(*config.time_window())
    }

    fn burst_window(config: &RateLimitConfig) -> Option<Duration> {
        (*config.strategy() == RateLimitStrategy::Burst).then(|| *config.burst_window())
    }

    /// Forget a rate limit hit once the quiet period has passed.
    fn expire_rate_limit_hit(&mut self, now: Instant, strategy: RateLimitStrategy) {
        let Some(hit) = self.last_rate_limit_hit else {
            return;
        };
        if now.saturating_duration_since(hit) <= RATE_LIMIT_EXPIRY {
            return;
        }

        info!(
            expiry_secs = RATE_LIMIT_EXPIRY.as_secs(),
            "Rate limit hit tracking expired"
        );
        self.last_rate_limit_hit = None;

        if strategy == RateLimitStrategy::Adaptive
            && self.feedback.adaptive_multiplier > DEFAULT_ADAPTIVE_MULTIPLIER
        {
            info!(
                from = self.feedback.adaptive_multiplier,
                to = DEFAULT_ADAPTIVE_MULTIPLIER,
                "Resetting adaptive multiplier"
            );
            self.feedback.adaptive_multiplier = DEFAULT_ADAPTIVE_MULTIPLIER;
        }
    }

    fn hit_within(&self, now: Instant, span: Duration) -> Option<Duration> {
        self.last_rate_limit_hit
            .map(|hit| now.saturating_duration_since(hit))
            .filter(|since| *since < span)
    }

    /// Evict aged entries for `key`, then compute how long its caller must wait.
    fn wait_for(&mut self, key: &str, now: Instant, config: &RateLimitConfig) -> Duration {
        let strategy = *config.strategy();
        let max_requests = self.max_requests(config) as usize;
        let time_window = self.time_window(config);
        let burst_window = Self::burst_window(config);
        let recent_hit = self.hit_within(now, RECENT_HIT_WINDOW);
        let decaying_hit = self.hit_within(now, MIN_WAIT_DECAY);

        let history = self.histories.entry(key.to_owned()).or_default();
        history.evict(now, time_window, burst_window);

        match strategy {
            RateLimitStrategy::Strict => {
                if history.len() >= max_requests {
                    until_expiry(history.oldest(), time_window, now)
                } else {
                    Duration::ZERO
                }
            }
            RateLimitStrategy::Burst => {
                let burst_window = *config.burst_window();
                if history.burst_len() >= *config.burst_size() as usize {
                    config.cooldown_period().unwrap_or_else(|| {
                        until_expiry(history.oldest_burst(), burst_window, now)
                    })
                } else if history.len().saturating_sub(history.burst_len()) >= max_requests {
                    // Only requests that have left the burst window count
                    // against the sustained limit
                    until_expiry(history.oldest(), time_window, now)
                } else {
                    Duration::ZERO
                }
            }
            RateLimitStrategy::Adaptive => {
                let threshold = if recent_hit.is_some() {
                    CAUTIOUS_THRESHOLD
                } else {
                    1.0
                };
                if (history.len() as f64) < max_requests as f64 * threshold {
                    return Duration::ZERO;
                }

                if let Some(retry_after) = self.feedback.retry_after {
                    let age = retry_after.age(now);
                    if age < RETRY_AFTER_VALIDITY {
                        let remaining = Duration::from_secs(retry_after.value).saturating_sub(age);
                        if !remaining.is_zero() {
                            return remaining;
                        }
                    }
                }

                let excess = history.len() as f64 - max_requests as f64;
                let min_wait = decaying_hit
                    .map(|since| {
                        let recency = (1.0 - since.as_secs_f64() / MIN_WAIT_DECAY.as_secs_f64())
                            .max(0.0);
                        recency * MAX_MIN_WAIT_SECS
                    })
                    .unwrap_or(0.0);
                let wait = min_wait.max(excess * self.feedback.adaptive_multiplier);
                Duration::try_from_secs_f64(wait).unwrap_or_default()
            }
        }
    }

    fn record(&mut self, key: &str, now: Instant, strategy: RateLimitStrategy) {
        self.histories
            .entry(key.to_owned())
            .or_default()
            .record(now, strategy == RateLimitStrategy::Burst);
        self.total_requests += 1;
    }

    /// Drop keys whose history is empty after cleanup, except `keep` and the default key.
    fn prune_idle(&mut self, now: Instant, config: &RateLimitConfig, keep: &str) -> usize {
        let time_window = self.time_window(config);
        let burst_window = Self::burst_window(config);
        let before = self.histories.len();
        self.histories.retain(|key, history| {
            history.evict(now, time_window, burst_window);
            key == keep || key == DEFAULT_KEY || !history.is_empty()
        });
        before - self.histories.len()
    }

    /// Apply rate limit signals found in `headers`.
    fn apply_headers(&mut self, headers: &Headers, now: Instant, wall_now: DateTime<Utc>) {
        let signals = RateLimitSignals::parse(headers, wall_now);
        if signals.is_empty() {
            debug!("No rate limit headers found");
            return;
        }

        let mut updated = false;

        if let Some(retry_after) = signals.retry_after {
            info!(retry_after, "Found Retry-After header");
            self.feedback.retry_after = Some(Learned::new(retry_after, now));
            updated = true;
        }

        let reset_in = signals.reset_in.filter(|reset_in| !reset_in.is_zero());
        if let Some(reset_in) = reset_in {
            info!(
                time_window_secs = reset_in.as_secs_f64(),
                "Updating time window from reset header"
            );
            self.feedback.time_window = Some(Learned::new(reset_in, now));
            updated = true;
        }

        if let Some(limit) = signals.limit {
            match u32::try_from(limit) {
                Ok(limit) if limit > 0 => {
                    info!(max_requests = limit, "Updating max requests from limit header");
                    self.feedback.max_requests = Some(Learned::new(limit, now));
                    updated = true;
                }
                _ => debug!(limit, "Ignoring out-of-range limit header"),
            }
        }

        if let (Some(remaining), Some(reset_in)) = (signals.remaining, reset_in) {
            if remaining <= LOW_REMAINING {
                warn!(
                    remaining,
                    reset_in_secs = reset_in.as_secs_f64(),
                    "Few requests remaining before reset"
                );
                self.feedback.remaining = Some(Learned::new(remaining, now));
            }
        }

        if updated {
            self.last_dynamic_update = Some(now);
        }
    }
}

/// Client-side request pacer.
///
/// One limiter guards one external resource. Callers `acquire` before each
/// request; adaptive limiters are also fed responses and rate limit errors so
/// they can tune themselves. Keys partition the limiter into independent
/// windows (per endpoint, per account, ...) that share feedback and counters.
///
/// # Example
///
/// ```
/// use pacekeeper::{RateLimitConfig, RateLimiter};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let config = RateLimitConfig::builder()
///     .max_requests(2)
///     .time_window(Duration::from_secs(1))
///     .build()
///     .unwrap();
/// let limiter = RateLimiter::new(config);
///
/// limiter.acquire().await; // immediate
/// limiter.acquire().await; // immediate
///
/// let stats = limiter.get_stats().await;
/// assert_eq!(stats.total_requests, 2);
/// assert_eq!(stats.total_wait_time, Duration::ZERO);
/// # }
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Create a new limiter from a validated configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        debug!(?config, "Creating rate limiter");
        Self {
            config,
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// The configuration this limiter was built with.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Wait until a request on the default key may proceed, then record it.
    ///
    /// Cancelling the returned future while it waits records nothing.
    pub async fn acquire(&self) {
        self.acquire_key(DEFAULT_KEY).await
    }

    /// Wait until a request on `key` may proceed, then record it.
    ///
    /// Each key has its own windows; keys never affect each other's waits.
    #[instrument(skip(self), fields(strategy = %self.config.strategy()))]
    pub async fn acquire_key(&self, key: &str) {
        let strategy = *self.config.strategy();
        let mut waited = false;

        loop {
            let mut state = self.state.lock().await;
            let now = Instant::now();

            state.expire_rate_limit_hit(now, strategy);
            if state.histories.len() > state.next_sweep.max(KEY_SWEEP_THRESHOLD) {
                let pruned = state.prune_idle(now, &self.config, key);
                state.next_sweep = state.histories.len() + KEY_SWEEP_THRESHOLD;
                debug!(pruned, next_sweep = state.next_sweep, "Swept idle keys");
            }

            let wait = state.wait_for(key, now, &self.config);
            let may_wait = !waited || strategy.rechecks_after_wait();
            if may_wait && !wait.is_zero() {
                state.total_wait_time = state.total_wait_time.saturating_add(wait);
                state.max_wait_time = state.max_wait_time.max(wait);
                debug!(wait_secs = wait.as_secs_f64(), "Rate limit reached, waiting");
                drop(state);

                tokio::time::sleep(wait).await;
                waited = true;
                continue;
            }

            state.record(key, now, strategy);
            return;
        }
    }

    /// Learn from a successful response (adaptive strategy only).
    ///
    /// Headers come from the configured extractor, or from
    /// [`HeaderSource::headers`] when none is configured. Missing or
    /// malformed headers are ignored.
    #[instrument(skip(self, response))]
    pub async fn update_from_response<R>(&self, response: &R)
    where
        R: HeaderSource + Any,
    {
        if *self.config.strategy() != RateLimitStrategy::Adaptive {
            return;
        }

        let headers = match self.config.header_extractor() {
            Some(extract) => extract(response as &dyn Any),
            None => response.headers().unwrap_or_default(),
        };

        let mut state = self.state.lock().await;
        state.apply_headers(&headers, Instant::now(), Utc::now());
    }

    /// Learn from a rate limit error (adaptive strategy only).
    ///
    /// Records a rate limit hit and grows the adaptive multiplier, then reads
    /// headers from the error's response, the error itself, or, failing both,
    /// a "retry after N" phrase in its message.
    #[instrument(skip(self, error), fields(error = %error))]
    pub async fn update_from_error<E>(&self, error: &E)
    where
        E: ErrorFeedback + ?Sized,
    {
        if *self.config.strategy() != RateLimitStrategy::Adaptive {
            return;
        }

        let headers = error
            .response_headers()
            .or_else(|| error.headers())
            .unwrap_or_else(|| headers_from_message(&error.to_string()));

        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.rate_limit_hits += 1;
        state.last_rate_limit_hit = Some(now);

        let multiplier =
            (state.feedback.adaptive_multiplier * ADAPTIVE_BACKOFF_FACTOR).min(MAX_ADAPTIVE_MULTIPLIER);
        state.feedback.adaptive_multiplier = multiplier;
        info!(
            multiplier,
            "Rate limit hit, increasing wait multiplier (seconds per excess request)"
        );

        state.apply_headers(&headers, now, Utc::now());
    }

    /// Forget the last rate limit hit and restore the default multiplier.
    ///
    /// Useful when limits are known to have reset, e.g. after switching API keys.
    /// History and counters are left untouched.
    #[instrument(skip(self))]
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.last_rate_limit_hit = None;

        if *self.config.strategy() == RateLimitStrategy::Adaptive
            && state.feedback.adaptive_multiplier != DEFAULT_ADAPTIVE_MULTIPLIER
        {
            info!(
                from = state.feedback.adaptive_multiplier,
                to = DEFAULT_ADAPTIVE_MULTIPLIER,
                "Manually resetting adaptive multiplier"
            );
            state.feedback.adaptive_multiplier = DEFAULT_ADAPTIVE_MULTIPLIER;
        }

        info!("Rate limit tracking manually reset");
    }

    /// Drop per-key state that has no requests left in its windows.
    ///
    /// The default key is always kept. Returns the number of keys removed.
    #[instrument(skip(self))]
    pub async fn prune_idle_keys(&self) -> usize {
        let mut state = self.state.lock().await;
        let pruned = state.prune_idle(Instant::now(), &self.config, DEFAULT_KEY);
        debug!(pruned, "Pruned idle keys");
        pruned
    }

    /// Snapshot of counters and learned adjustments.
    pub async fn get_stats(&self) -> RateLimiterStats {
        let state = self.state.lock().await;
        let now = Instant::now();
        let wall_now = Utc::now();

        let time_window = state.time_window(&self.config);
        let recent: usize = state
            .histories
            .values()
            .map(|history| history.count_within(now, time_window))
            .sum();
        let current_rate = recent as f64 / (time_window.as_secs_f64() / 60.0);

        let since_hit = state
            .last_rate_limit_hit
            .map(|hit| now.saturating_duration_since(hit));

        RateLimiterStats {
            strategy: *self.config.strategy(),
            total_requests: state.total_requests,
            total_wait_time: state.total_wait_time,
            max_wait_time: state.max_wait_time,
            current_rate,
            current_queue_size: state.histories.values().map(KeyHistory::len).sum(),
            tracked_keys: state.histories.len(),
            rate_limit_hits: state.rate_limit_hits,
            max_requests: state.max_requests(&self.config),
            time_window,
            adaptive_multiplier: state.feedback.adaptive_multiplier,
            last_dynamic_update: state
                .last_dynamic_update
                .map(|at| wall_clock(at, now, wall_now)),
            dynamic_adjustments: state
                .last_dynamic_update
                .map(|_| DynamicAdjustments::from(&state.feedback)),
            last_rate_limit_hit: state
                .last_rate_limit_hit
                .map(|at| wall_clock(at, now, wall_now)),
            time_since_last_rate_limit: since_hit,
            rate_limit_expiry_in: since_hit.map(|since| RATE_LIMIT_EXPIRY.saturating_sub(since)),
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

/// Synthesize a `retry-after` header from an error message such as
/// "Rate limit exceeded, retry after 30 seconds".
fn headers_from_message(message: &str) -> Headers {
    let mut headers = Headers::new();
    if let Some(seconds) = RETRY_AFTER_TEXT
        .captures(&message.to_lowercase())
        .and_then(|captures| captures.get(1))
    {
        headers.insert(RETRY_AFTER, seconds.as_str());
    }
    headers
}
