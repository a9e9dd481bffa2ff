//! Two-phase reconnect schedule.
//!
//! After the first disconnect a link retries fast for a wall-clock window,
//! then falls back to exponential back-off with a ceiling. Every delay
//! carries uniform jitter so a rack of homebases rebooting together does not
//! reconnect in lockstep.

use crate::domain::config::ReconnectConfig;
use rand::Rng;
use std::time::{Duration, Instant};

/// Reconnect delay calculator for one link.
#[derive(Debug)]
pub struct ReconnectSchedule {
    config: ReconnectConfig,
    /// Set on the first failure of the current outage; cleared on Open.
    first_failure_at: Option<Instant>,
    /// Failed attempts since entering slow back-off.
    slow_failures: u32,
}

impl ReconnectSchedule {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            first_failure_at: None,
            slow_failures: 0,
        }
    }

    /// Reset counters and the phase marker (connection established).
    pub fn on_connected(&mut self) {
        self.first_failure_at = None;
        self.slow_failures = 0;
    }

    /// Delay before the next attempt, advancing the schedule.
    pub fn next_delay(&mut self, now: Instant) -> Duration {
        self.next_delay_with(now, &mut rand::thread_rng())
    }

    /// Deterministic-rng variant for tests.
    pub fn next_delay_with<R: Rng>(&mut self, now: Instant, rng: &mut R) -> Duration {
        let first = *self.first_failure_at.get_or_insert(now);
        let elapsed = now.duration_since(first);

        if elapsed < Duration::from_millis(self.config.fast_retry_window_ms) {
            let jitter = rng.gen_range(0..=self.config.fast_retry_jitter_ms);
            return Duration::from_millis(self.config.fast_retry_base_ms + jitter);
        }

        let k = self.slow_failures.min(31);
        self.slow_failures = self.slow_failures.saturating_add(1);
        let base = self
            .config
            .slow_base_backoff_ms
            .saturating_mul(1u64 << k)
            .min(self.config.slow_max_backoff_ms);
        let jitter = rng.gen_range(0..=self.config.slow_jitter_ms);
        Duration::from_millis(base + jitter)
    }

    /// True once the schedule has left the fast-retry window.
    pub fn in_slow_phase(&self, now: Instant) -> bool {
        match self.first_failure_at {
            Some(first) => {
                now.duration_since(first) >= Duration::from_millis(self.config.fast_retry_window_ms)
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> ReconnectSchedule {
        ReconnectSchedule::new(ReconnectConfig::default())
    }

    #[test]
    fn test_fast_retry_window() {
        let mut s = schedule();
        let start = Instant::now();
        // Five consecutive failures inside the window stay in fast retry
        for _ in 0..5 {
            let d = s.next_delay(start + Duration::from_secs(10)).as_millis() as u64;
            assert!((2_000..=3_000).contains(&d), "delay {} out of range", d);
        }
    }

    #[test]
    fn test_slow_phase_entry() {
        let mut s = schedule();
        let start = Instant::now();
        let _ = s.next_delay(start);
        // Past the 5 minute window the first slow delay is 15s + jitter
        let d = s
            .next_delay(start + Duration::from_secs(6 * 60))
            .as_millis() as u64;
        assert!((15_000..=17_000).contains(&d), "delay {} out of range", d);
    }

    #[test]
    fn test_slow_phase_caps() {
        let mut s = schedule();
        let start = Instant::now();
        let _ = s.next_delay(start);
        let late = start + Duration::from_secs(6 * 60);
        // Drive k high enough to hit the ceiling, then verify the bound
        let mut last = 0;
        for _ in 0..8 {
            last = s.next_delay(late).as_millis() as u64;
        }
        assert!((120_000..=122_000).contains(&last), "delay {} out of range", last);
    }

    #[test]
    fn test_slow_delays_are_monotone_until_cap() {
        let mut s = schedule();
        let start = Instant::now();
        let _ = s.next_delay(start);
        let late = start + Duration::from_secs(6 * 60);
        let d0 = s.next_delay(late).as_millis() as u64;
        let d1 = s.next_delay(late).as_millis() as u64;
        let d2 = s.next_delay(late).as_millis() as u64;
        // 15s, 30s, 60s bases with <=2s jitter never overlap
        assert!(d0 < d1 && d1 < d2);
    }

    #[test]
    fn test_reset_on_connected() {
        let mut s = schedule();
        let start = Instant::now();
        let _ = s.next_delay(start);
        let late = start + Duration::from_secs(6 * 60);
        let _ = s.next_delay(late);
        assert!(s.in_slow_phase(late));

        s.on_connected();
        assert!(!s.in_slow_phase(late));
        // Next failure run starts back in fast retry
        let d = s.next_delay(late).as_millis() as u64;
        assert!((2_000..=3_000).contains(&d));
    }
}
