//! Pool statistics.

use std::collections::VecDeque;
use std::time::Duration;

/// Bounded rolling window of duration samples.
///
/// Keeps the most recent `capacity` samples and exposes mean/min/max.
/// Used for acquisition and creation latency tracking.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
    /// Lifetime sample count, not bounded by the window.
    count: u64,
}

impl RollingWindow {
    /// Create a window holding up to `capacity` samples.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            count: 0,
        }
    }

    /// Record one sample, evicting the oldest if the window is full.
    pub fn record(&mut self, sample: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.count += 1;
    }

    /// Summarize the current window.
    #[must_use]
    pub fn summary(&self) -> LatencySummary {
        if self.samples.is_empty() {
            return LatencySummary::default();
        }
        let total: Duration = self.samples.iter().sum();
        LatencySummary {
            mean: total / self.samples.len() as u32,
            min: *self.samples.iter().min().expect("non-empty window"),
            max: *self.samples.iter().max().expect("non-empty window"),
            count: self.count,
        }
    }
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new(128)
    }
}

/// Mean/min/max over a [`RollingWindow`], plus the lifetime sample count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencySummary {
    /// Mean of the windowed samples.
    pub mean: Duration,
    /// Minimum of the windowed samples.
    pub min: Duration,
    /// Maximum of the windowed samples.
    pub max: Duration,
    /// Lifetime number of samples recorded.
    pub count: u64,
}

/// Read-only snapshot of pool state.
///
/// Taken under the pool lock, so `in_use_resources +
/// available_resources == total_resources` always holds in a snapshot.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Resources currently owned by the pool (idle + in-use).
    pub total_resources: usize,
    /// Resources not checked out: the idle set plus entries briefly out
    /// of it for validation or reset.
    pub available_resources: usize,
    /// Resources checked out by callers.
    pub in_use_resources: usize,
    /// Waiters currently queued for a resource.
    pub queued_waiters: usize,
    /// Lifetime count of resources created.
    pub created_resources: u64,
    /// Lifetime count of resources destroyed.
    pub destroyed_resources: u64,
    /// Rolling acquisition latency (empty when metrics are disabled).
    pub acquisition_time: LatencySummary,
    /// Rolling creation latency (empty when metrics are disabled).
    pub creation_time: LatencySummary,
    /// `in_use_resources / max_size`.
    pub utilization_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_summarizes_to_zero() {
        let window = RollingWindow::new(4);
        assert_eq!(window.summary(), LatencySummary::default());
    }

    #[test]
    fn window_tracks_mean_min_max() {
        let mut window = RollingWindow::new(4);
        window.record(Duration::from_millis(10));
        window.record(Duration::from_millis(20));
        window.record(Duration::from_millis(30));
        let summary = window.summary();
        assert_eq!(summary.mean, Duration::from_millis(20));
        assert_eq!(summary.min, Duration::from_millis(10));
        assert_eq!(summary.max, Duration::from_millis(30));
        assert_eq!(summary.count, 3);
    }

    #[test]
    fn window_evicts_oldest_beyond_capacity() {
        let mut window = RollingWindow::new(2);
        window.record(Duration::from_millis(100));
        window.record(Duration::from_millis(10));
        window.record(Duration::from_millis(20));
        let summary = window.summary();
        // The 100ms sample fell out of the window.
        assert_eq!(summary.max, Duration::from_millis(20));
        assert_eq!(summary.count, 3);
    }
}
