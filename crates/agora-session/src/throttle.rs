//! Refresh throttling and rate-limit backoff.
//!
//! Both are plain state machines over `tokio::time::Instant`: the paused
//! test clock drives them, so nothing here ever sleeps on its own.

use std::time::Duration;

use tokio::time::Instant;

// =============================================================================
// Backoff
// =============================================================================

/// Exponential backoff state: an attempt counter and the bounds that turn
/// it into a delay.
#[derive(Debug)]
pub(crate) struct Backoff {
    level: u32,
    base: Duration,
    cap: Duration,
}

impl Backoff {
    pub(crate) fn new(base: Duration, cap: Duration) -> Self {
        Self {
            level: 0,
            base,
            cap,
        }
    }

    /// Advances one level and returns the delay to wait: `base × 2^level`,
    /// capped.
    pub(crate) fn next_delay(&mut self) -> Duration {
        self.level = self.level.saturating_add(1);
        let factor = 2u32.saturating_pow(self.level.min(16));
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Clears the attempt counter after a success.
    pub(crate) fn reset(&mut self) {
        self.level = 0;
    }

    pub(crate) fn level(&self) -> u32 {
        self.level
    }
}

// =============================================================================
// Refresh throttle
// =============================================================================

/// Local gate in front of the backend's refresh endpoint.
///
/// A refresh is permitted only when the minimum interval since the last
/// successful refresh has elapsed *and* no rate-limit cool-down is pending.
/// Rejected calls never reach the backend.
#[derive(Debug)]
pub(crate) struct RefreshThrottle {
    min_interval: Duration,
    last_refresh_at: Option<Instant>,
    next_allowed_at: Option<Instant>,
    backoff: Backoff,
}

impl RefreshThrottle {
    pub(crate) fn new(min_interval: Duration, backoff_base: Duration, backoff_cap: Duration) -> Self {
        Self {
            min_interval,
            last_refresh_at: None,
            next_allowed_at: None,
            backoff: Backoff::new(backoff_base, backoff_cap),
        }
    }

    /// Whether a refresh may reach the backend right now.
    pub(crate) fn permits(&self, now: Instant) -> bool {
        if let Some(last) = self.last_refresh_at
            && now.duration_since(last) < self.min_interval
        {
            return false;
        }
        if let Some(gate) = self.next_allowed_at
            && now < gate
        {
            return false;
        }
        true
    }

    /// Records a refresh that reached the backend and succeeded.
    pub(crate) fn on_success(&mut self, now: Instant) {
        self.last_refresh_at = Some(now);
        self.next_allowed_at = None;
        self.backoff.reset();
    }

    /// Records a rate-limit rejection; returns the cool-down before the
    /// next attempt is allowed.
    pub(crate) fn on_rate_limited(&mut self, now: Instant) -> Duration {
        let delay = self.backoff.next_delay();
        self.next_allowed_at = Some(now + delay);
        delay
    }

    pub(crate) fn backoff_level(&self) -> u32 {
        self.backoff.level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(), Duration::from_secs(8));
        assert_eq!(backoff.next_delay(), Duration::from_secs(10));
        assert_eq!(backoff.next_delay(), Duration::from_secs(10));

        backoff.reset();
        assert_eq!(backoff.level(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_never_overflows() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10));
        for _ in 0..100 {
            assert!(backoff.next_delay() <= Duration::from_secs(10));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_min_interval() {
        let mut throttle = RefreshThrottle::new(
            Duration::from_secs(30),
            Duration::from_secs(1),
            Duration::from_secs(10),
        );

        let now = Instant::now();
        assert!(throttle.permits(now));
        throttle.on_success(now);
        assert!(!throttle.permits(now));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!throttle.permits(Instant::now()));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(throttle.permits(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_rate_limit_gate() {
        let mut throttle = RefreshThrottle::new(
            Duration::from_secs(30),
            Duration::from_secs(1),
            Duration::from_secs(10),
        );

        let delay = throttle.on_rate_limited(Instant::now());
        assert_eq!(delay, Duration::from_secs(2));
        assert!(!throttle.permits(Instant::now()));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(throttle.permits(Instant::now()));

        // A success clears both the gate and the backoff level.
        throttle.on_success(Instant::now());
        assert_eq!(throttle.backoff_level(), 0);
    }
}
