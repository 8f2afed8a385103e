//! Count-based sliding window of call outcomes.

use std::collections::VecDeque;

/// Fixed-capacity record of the most recent outcomes, oldest evicted first.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    capacity: usize,
    minimum_samples: usize,
    outcomes: VecDeque<bool>,
    failures: usize,
}

impl SlidingWindow {
    /// Create a window holding `capacity` outcomes.
    ///
    /// The failure rate is only defined once `minimum_samples` outcomes have
    /// been recorded. A capacity of zero is treated as one.
    pub fn new(capacity: usize, minimum_samples: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            minimum_samples,
            outcomes: VecDeque::with_capacity(capacity),
            failures: 0,
        }
    }

    /// Record one outcome (`true` for success).
    pub fn record(&mut self, success: bool) {
        if self.outcomes.len() == self.capacity
            && let Some(evicted) = self.outcomes.pop_front()
            && !evicted
        {
            self.failures -= 1;
        }

        self.outcomes.push_back(success);
        if !success {
            self.failures += 1;
        }
    }

    /// Failure rate in percent, or `None` below the minimum sample count.
    pub fn failure_rate(&self) -> Option<f64> {
        if self.outcomes.is_empty() || self.outcomes.len() < self.minimum_samples {
            return None;
        }
        Some(self.failures as f64 * 100.0 / self.outcomes.len() as f64)
    }

    /// Failure rate in percent, treating the undefined case as zero.
    pub fn failure_rate_or_zero(&self) -> f64 {
        self.failure_rate().unwrap_or(0.0)
    }

    /// Number of recorded outcomes.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Number of failures currently in the window.
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Maximum number of outcomes kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Forget every outcome.
    pub fn clear(&mut self) {
        self.outcomes.clear();
        self.failures = 0;
    }
}
