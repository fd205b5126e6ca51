//! Tests for the pacing engine, run on a paused tokio clock.

use pacekeeper::{
    HeaderSource, Headers, HttpStatusError, RateLimitConfig, RateLimitStrategy, RateLimiter,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, advance};

fn limiter(strategy: RateLimitStrategy, max_requests: u32, time_window: Duration) -> RateLimiter {
    RateLimiter::new(
        RateLimitConfig::builder()
            .strategy(strategy)
            .max_requests(max_requests)
            .time_window(time_window)
            .build()
            .unwrap(),
    )
}

/// Print limiter logs when run with `RUST_LOG=pacekeeper=debug`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn headers(pairs: &[(&str, &str)]) -> Headers {
    pairs.iter().copied().collect()
}

// Strict

#[tokio::test(start_paused = true)]
async fn test_strict_waits_for_oldest_to_age_out() {
    let limiter = limiter(RateLimitStrategy::Strict, 2, Duration::from_secs(1));
    let start = Instant::now();

    limiter.acquire().await;
    limiter.acquire().await;
    assert_eq!(start.elapsed(), Duration::ZERO);

    limiter.acquire().await;
    assert!(start.elapsed() >= Duration::from_secs(1));

    let stats = limiter.get_stats().await;
    assert_eq!(stats.total_requests, 3);
    assert_eq!(stats.total_wait_time, Duration::from_secs(1));
    assert_eq!(stats.max_wait_time, Duration::from_secs(1));
    assert!(stats.total_wait_time > Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_strict_window_slides() {
    let limiter = limiter(RateLimitStrategy::Strict, 2, Duration::from_secs(10));

    limiter.acquire().await;
    advance(Duration::from_secs(6)).await;
    limiter.acquire().await;

    // The first entry leaves the window four seconds later
    let start = Instant::now();
    limiter.acquire().await;
    assert!(start.elapsed() >= Duration::from_secs(4));
    assert_eq!(limiter.get_stats().await.total_wait_time, Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_strict_concurrent_waiters_never_overshoot() {
    let limiter = Arc::new(limiter(RateLimitStrategy::Strict, 2, Duration::from_secs(1)));
    let start = Instant::now();

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    // Five requests at two per second need two full windows
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert_eq!(limiter.get_stats().await.total_requests, 5);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_acquire_records_nothing() {
    let limiter = limiter(RateLimitStrategy::Strict, 1, Duration::from_secs(10));
    limiter.acquire().await;

    let result = tokio::time::timeout(Duration::from_secs(1), limiter.acquire()).await;
    assert!(result.is_err());

    let stats = limiter.get_stats().await;
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.current_queue_size, 1);
}

#[tokio::test(start_paused = true)]
async fn test_sleeping_waiter_does_not_hold_the_lock() {
    let limiter = Arc::new(limiter(RateLimitStrategy::Strict, 1, Duration::from_secs(100)));
    limiter.acquire_key("a").await;

    let waiter = {
        let limiter = limiter.clone();
        tokio::spawn(async move { limiter.acquire_key("a").await })
    };
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    let start = Instant::now();
    limiter.acquire_key("b").await;
    let stats = limiter.get_stats().await;
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(stats.total_requests, 2);

    waiter.abort();
}

#[tokio::test(start_paused = true)]
async fn test_huge_window_waits_without_overflow() {
    let limiter = limiter(
        RateLimitStrategy::Strict,
        1,
        Duration::from_secs_f64(1e19),
    );
    limiter.acquire().await;

    let result = tokio::time::timeout(Duration::from_secs(1), limiter.acquire()).await;
    assert!(result.is_err());
    assert_eq!(limiter.get_stats().await.total_requests, 1);
}

// Burst

#[tokio::test(start_paused = true)]
async fn test_burst_waits_for_burst_window() {
    let limiter = RateLimiter::new(
        RateLimitConfig::builder()
            .strategy(RateLimitStrategy::Burst)
            .max_requests(2)
            .time_window(Duration::from_secs(10))
            .burst_size(3)
            .burst_window(Duration::from_secs(1))
            .build()
            .unwrap(),
    );
    let start = Instant::now();

    for _ in 0..3 {
        limiter.acquire().await;
    }
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(limiter.get_stats().await.total_wait_time, Duration::ZERO);

    limiter.acquire().await;
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert!(limiter.get_stats().await.total_wait_time >= Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_burst_refills_after_window() {
    let limiter = RateLimiter::new(
        RateLimitConfig::builder()
            .strategy(RateLimitStrategy::Burst)
            .max_requests(10)
            .time_window(Duration::from_secs(60))
            .burst_size(3)
            .burst_window(Duration::from_secs(1))
            .build()
            .unwrap(),
    );

    for _ in 0..4 {
        limiter.acquire().await;
    }

    // Only the burst window was waited out
    let stats = limiter.get_stats().await;
    assert_eq!(stats.total_wait_time, Duration::from_secs(1));
    assert_eq!(stats.total_requests, 4);
}

#[tokio::test(start_paused = true)]
async fn test_burst_cooldown_period() {
    let limiter = RateLimiter::new(
        RateLimitConfig::builder()
            .strategy(RateLimitStrategy::Burst)
            .max_requests(10)
            .time_window(Duration::from_secs(60))
            .burst_size(3)
            .burst_window(Duration::from_secs(1))
            .cooldown_period(Duration::from_secs(5))
            .build()
            .unwrap(),
    );
    let start = Instant::now();

    for _ in 0..4 {
        limiter.acquire().await;
    }

    assert!(start.elapsed() >= Duration::from_secs(5));
    assert_eq!(
        limiter.get_stats().await.total_wait_time,
        Duration::from_secs(5)
    );
}

#[tokio::test(start_paused = true)]
async fn test_burst_sustained_limit_counts_requests_outside_burst_window() {
    let limiter = RateLimiter::new(
        RateLimitConfig::builder()
            .strategy(RateLimitStrategy::Burst)
            .max_requests(3)
            .time_window(Duration::from_secs(10))
            .burst_size(3)
            .burst_window(Duration::from_secs(1))
            .build()
            .unwrap(),
    );

    for _ in 0..3 {
        limiter.acquire().await;
    }
    advance(Duration::from_secs(2)).await;

    // Three requests have left the burst window but are still in the main window
    let start = Instant::now();
    limiter.acquire().await;
    assert!(start.elapsed() >= Duration::from_secs(8));
}

// Adaptive

#[tokio::test(start_paused = true)]
async fn test_adaptive_below_limit_never_waits() {
    let limiter = limiter(RateLimitStrategy::Adaptive, 5, Duration::from_secs(60));
    let start = Instant::now();

    for _ in 0..5 {
        limiter.acquire().await;
    }
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_adaptive_excess_scales_with_multiplier() {
    let limiter = limiter(RateLimitStrategy::Adaptive, 2, Duration::from_secs(60));

    // The third request is at the limit with no excess
    for _ in 0..3 {
        limiter.acquire().await;
    }
    assert_eq!(limiter.get_stats().await.total_wait_time, Duration::ZERO);

    // One request over the limit costs one multiplier's worth of seconds
    let start = Instant::now();
    limiter.acquire().await;
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert_eq!(limiter.get_stats().await.total_wait_time, Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_adaptive_retry_after_round_trip() {
    let limiter = limiter(RateLimitStrategy::Adaptive, 2, Duration::from_secs(300));

    limiter.acquire().await;
    limiter.acquire().await;
    limiter
        .update_from_response(&headers(&[("Retry-After", "30")]))
        .await;

    advance(Duration::from_secs(10)).await;
    let start = Instant::now();
    limiter.acquire().await;

    // Thirty seconds, less the ten already elapsed
    assert!(start.elapsed() >= Duration::from_secs(20));
    assert_eq!(
        limiter.get_stats().await.total_wait_time,
        Duration::from_secs(20)
    );
}

#[tokio::test(start_paused = true)]
async fn test_adaptive_retry_after_goes_stale() {
    let limiter = limiter(RateLimitStrategy::Adaptive, 2, Duration::from_secs(300));

    limiter.acquire().await;
    limiter.acquire().await;
    limiter
        .update_from_response(&headers(&[("retry-after", "120")]))
        .await;

    // Older than a minute, the instruction is ignored
    advance(Duration::from_secs(61)).await;
    limiter.acquire().await;
    assert_eq!(limiter.get_stats().await.total_wait_time, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_adaptive_recent_hit_lowers_threshold() {
    let limiter = limiter(RateLimitStrategy::Adaptive, 10, Duration::from_secs(60));

    for _ in 0..9 {
        limiter.acquire().await;
    }
    limiter
        .update_from_error(&HttpStatusError::new(429, "Too Many Requests"))
        .await;

    // Nine of ten is over the cautious threshold; the fresh hit imposes a
    // one second minimum
    let start = Instant::now();
    limiter.acquire().await;
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert_eq!(limiter.get_stats().await.total_wait_time, Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_adaptive_waits_once() {
    let limiter = limiter(RateLimitStrategy::Adaptive, 1, Duration::from_secs(60));

    limiter.acquire().await;
    limiter.acquire().await;
    limiter.acquire().await;

    // At the limit costs nothing, one over costs one second, served once
    let stats = limiter.get_stats().await;
    assert_eq!(stats.total_requests, 3);
    assert_eq!(stats.total_wait_time, Duration::from_secs(1));
    assert_eq!(stats.max_wait_time, Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_multiplier_grows_and_is_bounded() {
    let limiter = limiter(RateLimitStrategy::Adaptive, 10, Duration::from_secs(60));
    let error = HttpStatusError::new(429, "Too Many Requests");

    let mut previous = limiter.get_stats().await.adaptive_multiplier;
    assert_eq!(previous, 1.0);

    for _ in 0..5 {
        limiter.update_from_error(&error).await;
        let multiplier = limiter.get_stats().await.adaptive_multiplier;
        assert!(multiplier > previous);
        previous = multiplier;
    }

    for _ in 0..10 {
        limiter.update_from_error(&error).await;
    }
    let stats = limiter.get_stats().await;
    assert_eq!(stats.adaptive_multiplier, 10.0);
    assert_eq!(stats.rate_limit_hits, 15);
}

#[tokio::test(start_paused = true)]
async fn test_hit_expires_after_quiet_period() {
    let limiter = limiter(RateLimitStrategy::Adaptive, 10, Duration::from_secs(60));
    limiter
        .update_from_error(&HttpStatusError::new(429, "Too Many Requests"))
        .await;
    assert_eq!(limiter.get_stats().await.adaptive_multiplier, 1.5);

    advance(Duration::from_secs(100)).await;
    let stats = limiter.get_stats().await;
    assert_eq!(
        stats.time_since_last_rate_limit,
        Some(Duration::from_secs(100))
    );
    assert_eq!(stats.rate_limit_expiry_in, Some(Duration::from_secs(800)));

    advance(Duration::from_secs(801)).await;
    limiter.acquire().await;

    let stats = limiter.get_stats().await;
    assert_eq!(stats.adaptive_multiplier, 1.0);
    assert_eq!(stats.last_rate_limit_hit, None);
    assert_eq!(stats.rate_limit_hits, 1);
}

// Feedback

#[tokio::test(start_paused = true)]
async fn test_error_with_retry_after_header() {
    init_tracing();
    let limiter = limiter(RateLimitStrategy::Adaptive, 10, Duration::from_secs(60));
    let error = HttpStatusError::new(429, "Too Many Requests").with_header("retry-after", "30");

    limiter.update_from_error(&error).await;

    let stats = limiter.get_stats().await;
    assert_eq!(stats.rate_limit_hits, 1);
    assert!(stats.last_rate_limit_hit.is_some());
    assert!(stats.last_dynamic_update.is_some());
    let adjustments = stats.dynamic_adjustments.unwrap();
    assert_eq!(adjustments.retry_after, Some(30));
    assert_eq!(adjustments.adaptive_multiplier, 1.5);
}

#[tokio::test(start_paused = true)]
async fn test_error_message_retry_after() {
    let limiter = limiter(RateLimitStrategy::Adaptive, 10, Duration::from_secs(60));
    let error = HttpStatusError::new(429, "Rate limit exceeded, retry after 12 seconds");

    limiter.update_from_error(&error).await;

    let adjustments = limiter.get_stats().await.dynamic_adjustments.unwrap();
    assert_eq!(adjustments.retry_after, Some(12));
}

#[tokio::test(start_paused = true)]
async fn test_error_without_hints_only_counts_hit() {
    let limiter = limiter(RateLimitStrategy::Adaptive, 10, Duration::from_secs(60));

    limiter
        .update_from_error(&HttpStatusError::new(429, "Too Many Requests"))
        .await;

    let stats = limiter.get_stats().await;
    assert_eq!(stats.rate_limit_hits, 1);
    assert!(stats.last_dynamic_update.is_none());
    assert!(stats.dynamic_adjustments.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_response_headers_override_limits() {
    init_tracing();
    let limiter = limiter(RateLimitStrategy::Adaptive, 100, Duration::from_secs(60));

    limiter
        .update_from_response(&headers(&[
            ("X-RateLimit-Limit", "5"),
            ("X-RateLimit-Remaining", "3"),
            ("X-RateLimit-Reset", "30"),
        ]))
        .await;

    let stats = limiter.get_stats().await;
    assert_eq!(stats.max_requests, 5);
    assert_eq!(stats.time_window, Duration::from_secs(30));
    let adjustments = stats.dynamic_adjustments.unwrap();
    assert_eq!(adjustments.max_requests, Some(5));
    assert_eq!(adjustments.time_window, Some(Duration::from_secs(30)));
    assert_eq!(adjustments.remaining, Some(3));

    // The static configuration is untouched
    assert_eq!(*limiter.config().max_requests(), 100);
}

#[tokio::test(start_paused = true)]
async fn test_response_headers_edge_cases() {
    let limiter = limiter(RateLimitStrategy::Adaptive, 100, Duration::from_secs(60));

    limiter
        .update_from_response(&headers(&[
            ("ratelimit-limit", "0"),
            ("ratelimit-remaining", "50"),
            ("ratelimit-reset", "0"),
            ("retry-after", "soon"),
        ]))
        .await;

    let stats = limiter.get_stats().await;
    assert_eq!(stats.max_requests, 100);
    assert_eq!(stats.time_window, Duration::from_secs(60));
    assert!(stats.dynamic_adjustments.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_feedback_ignored_outside_adaptive() {
    for strategy in [RateLimitStrategy::Strict, RateLimitStrategy::Burst] {
        let limiter = limiter(strategy, 10, Duration::from_secs(60));

        limiter
            .update_from_error(&HttpStatusError::new(429, "Too Many Requests"))
            .await;
        limiter
            .update_from_response(&headers(&[("x-ratelimit-limit", "1")]))
            .await;

        let stats = limiter.get_stats().await;
        assert_eq!(stats.rate_limit_hits, 0);
        assert_eq!(stats.max_requests, 10);
        assert_eq!(stats.adaptive_multiplier, 1.0);
    }
}

struct ApiReply {
    quota: u32,
}

impl HeaderSource for ApiReply {
    fn headers(&self) -> Option<Headers> {
        None
    }
}

#[tokio::test(start_paused = true)]
async fn test_custom_header_extractor() {
    let config = RateLimitConfig::builder()
        .strategy(RateLimitStrategy::Adaptive)
        .header_extractor(|response| {
            response
                .downcast_ref::<ApiReply>()
                .map(|reply| {
                    [("x-ratelimit-limit", reply.quota.to_string())]
                        .into_iter()
                        .collect::<Headers>()
                })
                .unwrap_or_default()
        })
        .build()
        .unwrap();
    let limiter = RateLimiter::new(config);

    limiter.update_from_response(&ApiReply { quota: 7 }).await;
    assert_eq!(limiter.get_stats().await.max_requests, 7);

    // Unrelated shapes yield no headers
    limiter.update_from_response(&()).await;
    assert_eq!(limiter.get_stats().await.max_requests, 7);
}

// Reset, keys and stats

#[tokio::test(start_paused = true)]
async fn test_reset_clears_hit_but_not_history() {
    let limiter = limiter(RateLimitStrategy::Adaptive, 10, Duration::from_secs(60));
    limiter.acquire().await;
    limiter.acquire().await;
    limiter
        .update_from_error(&HttpStatusError::new(429, "Too Many Requests"))
        .await;

    limiter.reset().await;

    let stats = limiter.get_stats().await;
    assert_eq!(stats.last_rate_limit_hit, None);
    assert_eq!(stats.adaptive_multiplier, 1.0);
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.current_queue_size, 2);
    assert_eq!(stats.rate_limit_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_keys_are_independent() {
    let limiter = limiter(RateLimitStrategy::Strict, 1, Duration::from_secs(10));
    let start = Instant::now();

    limiter.acquire_key("search").await;
    limiter.acquire_key("upload").await;
    limiter.acquire().await;
    assert_eq!(start.elapsed(), Duration::ZERO);

    limiter.acquire_key("search").await;
    assert!(start.elapsed() >= Duration::from_secs(10));

    let stats = limiter.get_stats().await;
    assert_eq!(stats.tracked_keys, 3);
    assert_eq!(stats.total_requests, 4);
}

#[tokio::test(start_paused = true)]
async fn test_prune_idle_keys_keeps_default() {
    let limiter = limiter(RateLimitStrategy::Strict, 5, Duration::from_secs(10));

    limiter.acquire().await;
    limiter.acquire_key("a").await;
    limiter.acquire_key("b").await;
    assert_eq!(limiter.prune_idle_keys().await, 0);

    advance(Duration::from_secs(11)).await;
    assert_eq!(limiter.prune_idle_keys().await, 2);
    assert_eq!(limiter.get_stats().await.tracked_keys, 1);
}

#[tokio::test(start_paused = true)]
async fn test_idle_key_sweep_runs_per_threshold_of_growth() {
    let limiter = limiter(RateLimitStrategy::Strict, 1, Duration::from_secs(1));

    // Crossing 1024 keys sweeps once, but every key is still active
    for i in 0..1030 {
        limiter.acquire_key(&format!("old-{i}")).await;
    }
    assert_eq!(limiter.get_stats().await.tracked_keys, 1030);

    // The old keys are idle now, yet no sweep is due until another 1024 arrive
    advance(Duration::from_secs(2)).await;
    for i in 0..10 {
        limiter.acquire_key(&format!("new-{i}")).await;
    }
    assert_eq!(limiter.get_stats().await.tracked_keys, 1040);

    for i in 10..1021 {
        limiter.acquire_key(&format!("new-{i}")).await;
    }
    assert_eq!(limiter.get_stats().await.tracked_keys, 1021);
}

#[tokio::test(start_paused = true)]
async fn test_stats_rate_and_serialization() {
    let limiter = limiter(RateLimitStrategy::Strict, 10, Duration::from_secs(30));
    for _ in 0..3 {
        limiter.acquire().await;
    }

    let stats = limiter.get_stats().await;
    assert_eq!(stats.strategy, RateLimitStrategy::Strict);
    assert_eq!(stats.current_queue_size, 3);
    // Three requests per half minute
    assert_eq!(stats.current_rate, 6.0);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["strategy"], "strict");
    assert_eq!(json["total_requests"], 3);
    assert!(json.get("dynamic_adjustments").is_none());
    assert!(json.get("last_rate_limit_hit").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_get_stats_is_read_only() {
    let limiter = limiter(RateLimitStrategy::Strict, 10, Duration::from_secs(10));
    limiter.acquire().await;
    advance(Duration::from_secs(20)).await;

    let first = limiter.get_stats().await;
    let second = limiter.get_stats().await;
    assert_eq!(first.current_rate, 0.0);
    assert_eq!(first.current_queue_size, second.current_queue_size);
    assert_eq!(first.total_requests, 1);
}
