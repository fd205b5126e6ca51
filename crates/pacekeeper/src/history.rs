//! Per-key request timing windows.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Request timestamps for one key, oldest first.
///
/// Entries are appended under the limiter lock with a fresh `Instant`, so both
/// queues stay sorted and eviction only ever pops from the front.
#[derive(Debug, Default)]
pub(crate) struct KeyHistory {
    requests: VecDeque<Instant>,
    burst: VecDeque<Instant>,
}

impl KeyHistory {
    /// Drop entries that have aged out of their windows.
    ///
    /// An entry is evicted once `now - entry >= window`. The burst queue is only
    /// touched when a burst window is given.
    pub(crate) fn evict(&mut self, now: Instant, window: Duration, burst_window: Option<Duration>) {
        evict_older(&mut self.requests, now, window);
        if let Some(burst_window) = burst_window {
            evict_older(&mut self.burst, now, burst_window);
        }
    }

    /// Record a request at `now`.
    pub(crate) fn record(&mut self, now: Instant, burst: bool) {
        self.requests.push_back(now);
        if burst {
            self.burst.push_back(now);
        }
    }

    /// Requests currently in the main window.
    pub(crate) fn len(&self) -> usize {
        self.requests.len()
    }

    /// Requests currently in the burst window.
    pub(crate) fn burst_len(&self) -> usize {
        self.burst.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.burst.is_empty()
    }

    pub(crate) fn oldest(&self) -> Option<Instant> {
        self.requests.front().copied()
    }

    pub(crate) fn oldest_burst(&self) -> Option<Instant> {
        self.burst.front().copied()
    }

    /// Requests newer than `now - window`, without evicting anything.
    pub(crate) fn count_within(&self, now: Instant, window: Duration) -> usize {
        self.requests
            .iter()
            .rev()
            .take_while(|&&at| now.saturating_duration_since(at) < window)
            .count()
    }
}

fn evict_older(queue: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = queue.front() {
        if now.saturating_duration_since(front) >= window {
            queue.pop_front();
        } else {
            break;
        }
    }
}

/// Time left until an entry recorded at `oldest` leaves a window of `window`.
///
/// Never adds to an `Instant`, so windows too long to represent as a deadline
/// cannot overflow.
pub(crate) fn until_expiry(oldest: Option<Instant>, window: Duration, now: Instant) -> Duration {
    oldest
        .map(|at| window.saturating_sub(now.saturating_duration_since(at)))
        .unwrap_or_default()
}
