// crates/inference-dam-dispatcher/src/limiter.rs
// ============================================================================
// Module: Token Bucket Rate Limiter
// Description: Reservation-based token bucket for dispatch pacing.
// Purpose: Enforce per-namespace sustained request rates.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! [`TokenBucket`] refills at a sustained rate up to a burst capacity.
//! Acquisition is a reservation: the caller debits a token immediately and,
//! when the bucket has gone negative, sleeps for the deficit. With burst 1
//! this spaces N acquisitions at least `(N - 1) / rate` seconds apart.
//! Dropping the acquire future (e.g. via `select!` on a shutdown signal)
//! abandons the wait; the debited token refills on its own.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

// ============================================================================
// SECTION: Token Bucket
// ============================================================================

/// Shared token bucket with a sustained rate and burst capacity.
///
/// # Invariants
/// - `rate` and `burst` are positive; callers validate configuration.
/// - `tokens <= burst` at all times; negative values represent reservations
///   already handed out and still being waited on.
pub struct TokenBucket {
    /// Sustained refill rate in tokens per second.
    rate: f64,
    /// Maximum tokens held while idle.
    burst: f64,
    /// Current fill level and the instant it was last advanced.
    state: Mutex<BucketState>,
}

/// Mutable bucket state guarded by the limiter mutex.
struct BucketState {
    /// Tokens available; may be negative while reservations drain.
    tokens: f64,
    /// Instant the fill level was last advanced.
    refreshed: Instant,
}

impl TokenBucket {
    /// Creates a bucket holding `burst` tokens that refills at `rate` per
    /// second.
    #[must_use]
    pub fn new(rate: f64, burst: f64) -> Self {
        Self {
            rate,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                refreshed: Instant::now(),
            }),
        }
    }

    /// Debits one token, sleeping until the reservation is covered.
    pub async fn acquire(&self) {
        let delay = self.reserve();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Debits one token and returns how long the caller must wait for it.
    fn reserve(&self) -> Option<Duration> {
        let Ok(mut state) = self.state.lock() else {
            return None;
        };
        let now = Instant::now();
        let elapsed = now.duration_since(state.refreshed).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        state.refreshed = now;
        state.tokens -= 1.0;
        if state.tokens >= 0.0 {
            None
        } else {
            Some(Duration::from_secs_f64(-state.tokens / self.rate))
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_token_is_immediate() {
        let bucket = TokenBucket::new(10.0, 1.0);
        assert!(bucket.reserve().is_none());
    }

    #[test]
    fn reservations_space_out_at_rate() {
        let bucket = TokenBucket::new(10.0, 1.0);
        assert!(bucket.reserve().is_none());
        let first = bucket.reserve().expect("second acquire waits");
        let second = bucket.reserve().expect("third acquire waits longer");
        assert!(second > first);
        // Tenth-of-a-second spacing at 10 rps, with scheduling slack.
        assert!(first >= Duration::from_millis(80));
        assert!(second >= Duration::from_millis(180));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_honors_virtual_time() {
        let bucket = TokenBucket::new(100.0, 1.0);
        let started = tokio::time::Instant::now();
        for _ in 0..5 {
            bucket.acquire().await;
        }
        // Four reservations behind the burst token: at least 40ms.
        assert!(started.elapsed() >= Duration::from_millis(39));
    }
}
