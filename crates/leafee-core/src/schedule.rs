//! When to (re)connect.
//!
//! [`ScheduleOptions::decide`] is the whole reconnect policy: retry a failed
//! link after `retry_interval`, force a fresh link after
//! `refresh_interval`, and stay quiet until the startup scheduler has made
//! the first attempt. Both intervals are measured from the last *attempt*,
//! not from the last notification.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Default delay before retrying after a failed attempt.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Default age after which a live link is torn down and re-established.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(2 * 60 * 60);

/// Default host poll cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default upper bound of the random delay before the first attempt.
pub const DEFAULT_STARTUP_JITTER: Duration = Duration::from_secs(5);

/// What a poll decided to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollAction {
    /// Nothing due.
    Idle,
    /// No link and the retry interval has elapsed.
    Retry,
    /// Link is old enough to be refreshed.
    Refresh,
}

impl PollAction {
    /// Whether this action calls the connection manager.
    pub fn reconnects(&self) -> bool {
        !matches!(self, PollAction::Idle)
    }
}

/// Timing policy for a sensor.
#[derive(Debug, Clone)]
pub struct ScheduleOptions {
    /// Wait this long after a failed attempt before trying again.
    pub retry_interval: Duration,
    /// Reconnect a live link once it is this old.
    pub refresh_interval: Duration,
    /// How often the host calls `poll()`.
    pub poll_interval: Duration,
    /// Maximum random delay before the first connection attempt.
    pub startup_jitter: Duration,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            startup_jitter: DEFAULT_STARTUP_JITTER,
        }
    }
}

impl ScheduleOptions {
    /// Create schedule options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry interval.
    #[must_use]
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the refresh interval.
    #[must_use]
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Set the poll interval.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the maximum startup jitter. Zero disables it.
    #[must_use]
    pub fn startup_jitter(mut self, jitter: Duration) -> Self {
        self.startup_jitter = jitter;
        self
    }

    /// Decide what a poll at `now` should do.
    pub fn decide(&self, connected: bool, last_attempt: Option<Instant>, now: Instant) -> PollAction {
        let Some(last_attempt) = last_attempt else {
            return PollAction::Idle;
        };
        let elapsed = now.saturating_duration_since(last_attempt);

        if !connected && elapsed > self.retry_interval {
            PollAction::Retry
        } else if connected && elapsed > self.refresh_interval {
            PollAction::Refresh
        } else {
            PollAction::Idle
        }
    }

    /// Pick a random delay in `[0, startup_jitter]` for the first attempt.
    pub fn startup_delay(&self) -> Duration {
        let max_ms = self.startup_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }

    /// Validate the options and return an error if invalid.
    ///
    /// Checks that:
    /// - `retry_interval` and `poll_interval` are > 0
    /// - `refresh_interval` > `retry_interval`
    pub fn validate(&self) -> Result<()> {
        if self.retry_interval.is_zero() {
            return Err(Error::invalid_config("retry_interval must be > 0"));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::invalid_config("poll_interval must be > 0"));
        }
        if self.refresh_interval <= self.retry_interval {
            return Err(Error::invalid_config(
                "refresh_interval must be greater than retry_interval",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_defaults() {
        let opts = ScheduleOptions::default();
        assert_eq!(opts.retry_interval, secs(30));
        assert_eq!(opts.refresh_interval, secs(7200));
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_idle_before_first_attempt() {
        let opts = ScheduleOptions::default();
        let now = Instant::now();
        assert_eq!(opts.decide(false, None, now), PollAction::Idle);
        assert_eq!(opts.decide(false, None, now + secs(100_000)), PollAction::Idle);
    }

    #[test]
    fn test_retry_after_interval() {
        let opts = ScheduleOptions::default();
        let t0 = Instant::now();
        assert_eq!(opts.decide(false, Some(t0), t0 + secs(29)), PollAction::Idle);
        assert_eq!(opts.decide(false, Some(t0), t0 + secs(30)), PollAction::Idle);
        assert_eq!(opts.decide(false, Some(t0), t0 + secs(31)), PollAction::Retry);
    }

    #[test]
    fn test_refresh_after_interval() {
        let opts = ScheduleOptions::default();
        let t0 = Instant::now();
        assert_eq!(opts.decide(true, Some(t0), t0 + secs(31)), PollAction::Idle);
        assert_eq!(opts.decide(true, Some(t0), t0 + secs(7199)), PollAction::Idle);
        assert_eq!(opts.decide(true, Some(t0), t0 + secs(7201)), PollAction::Refresh);
    }

    #[test]
    fn test_clock_going_backwards_is_idle() {
        let opts = ScheduleOptions::default();
        let t0 = Instant::now() + secs(60);
        assert_eq!(opts.decide(false, Some(t0), t0 - secs(50)), PollAction::Idle);
    }

    #[test]
    fn test_reconnects() {
        assert!(!PollAction::Idle.reconnects());
        assert!(PollAction::Retry.reconnects());
        assert!(PollAction::Refresh.reconnects());
    }

    #[test]
    fn test_startup_delay_bounded() {
        let opts = ScheduleOptions::default().startup_jitter(Duration::from_millis(500));
        for _ in 0..100 {
            assert!(opts.startup_delay() <= Duration::from_millis(500));
        }
        let none = ScheduleOptions::default().startup_jitter(Duration::ZERO);
        assert_eq!(none.startup_delay(), Duration::ZERO);
    }

    proptest::proptest! {
        #[test]
        fn prop_retry_only_when_disconnected_past_interval(elapsed in 0u64..100_000) {
            let opts = ScheduleOptions::default();
            let t0 = Instant::now();
            let action = opts.decide(false, Some(t0), t0 + secs(elapsed));
            proptest::prop_assert_eq!(action == PollAction::Retry, elapsed > 30);
            proptest::prop_assert_ne!(action, PollAction::Refresh);
        }

        #[test]
        fn prop_refresh_only_when_connected_past_interval(elapsed in 0u64..100_000) {
            let opts = ScheduleOptions::default();
            let t0 = Instant::now();
            let action = opts.decide(true, Some(t0), t0 + secs(elapsed));
            proptest::prop_assert_eq!(action == PollAction::Refresh, elapsed > 7200);
            proptest::prop_assert_ne!(action, PollAction::Retry);
        }
    }

    #[test]
    fn test_validate() {
        assert!(
            ScheduleOptions::default()
                .retry_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            ScheduleOptions::default()
                .poll_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            ScheduleOptions::default()
                .refresh_interval(secs(30))
                .validate()
                .is_err()
        );
    }
}
