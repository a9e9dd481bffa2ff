//! Rolling probe outcome window.

use std::collections::VecDeque;

/// One probe outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSample {
    pub success: bool,
    /// Round-trip time; present only for successful probes.
    pub latency_ms: Option<u64>,
}

impl ProbeSample {
    pub fn success(latency_ms: u64) -> Self {
        Self {
            success: true,
            latency_ms: Some(latency_ms),
        }
    }

    pub fn failure() -> Self {
        Self {
            success: false,
            latency_ms: None,
        }
    }
}

/// Rolling window of the most recent probe outcomes for one device.
#[derive(Debug)]
pub struct ProbeWindow {
    samples: VecDeque<ProbeSample>,
    capacity: usize,
}

impl ProbeWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record an outcome, evicting the oldest past capacity.
    pub fn push(&mut self, sample: ProbeSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Integer mean latency over successful probes in the window, 0 if none.
    pub fn ping_avg(&self) -> i64 {
        let latencies: Vec<u64> = self
            .samples
            .iter()
            .filter_map(|s| s.latency_ms)
            .collect();
        if latencies.is_empty() {
            return 0;
        }
        (latencies.iter().sum::<u64>() / latencies.len() as u64) as i64
    }

    /// Success fraction over the window, rounded to two decimals.
    pub fn ping_success(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let successes = self.samples.iter().filter(|s| s.success).count();
        let ratio = successes as f64 / self.samples.len() as f64;
        (ratio * 100.0).round() / 100.0
    }

    /// Whether the most recent probe succeeded.
    pub fn last_succeeded(&self) -> bool {
        self.samples.back().map(|s| s.success).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window() {
        let w = ProbeWindow::new(100);
        assert_eq!(w.ping_avg(), 0);
        assert_eq!(w.ping_success(), 0.0);
        assert!(!w.last_succeeded());
    }

    #[test]
    fn test_aggregates() {
        let mut w = ProbeWindow::new(100);
        w.push(ProbeSample::success(10));
        w.push(ProbeSample::success(20));
        w.push(ProbeSample::failure());
        assert_eq!(w.ping_avg(), 15);
        assert_eq!(w.ping_success(), 0.67);
        assert!(!w.last_succeeded());

        w.push(ProbeSample::success(30));
        assert_eq!(w.ping_avg(), 20);
        assert_eq!(w.ping_success(), 0.75);
        assert!(w.last_succeeded());
    }

    #[test]
    fn test_all_failures_avg_zero() {
        let mut w = ProbeWindow::new(10);
        for _ in 0..5 {
            w.push(ProbeSample::failure());
        }
        assert_eq!(w.ping_avg(), 0);
        assert_eq!(w.ping_success(), 0.0);
    }

    #[test]
    fn test_window_retains_most_recent_only() {
        let mut w = ProbeWindow::new(100);
        // 50 old failures, then 100 successes: the failures must age out
        for _ in 0..50 {
            w.push(ProbeSample::failure());
        }
        for _ in 0..100 {
            w.push(ProbeSample::success(5));
        }
        assert_eq!(w.len(), 100);
        assert_eq!(w.ping_success(), 1.0);
        assert_eq!(w.ping_avg(), 5);
    }

    #[test]
    fn test_eviction_order_is_oldest_first() {
        let mut w = ProbeWindow::new(3);
        w.push(ProbeSample::success(100));
        w.push(ProbeSample::success(10));
        w.push(ProbeSample::success(10));
        w.push(ProbeSample::success(10));
        assert_eq!(w.ping_avg(), 10);
    }
}
