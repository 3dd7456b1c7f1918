use std::collections::VecDeque;

/// One qualifying frame as seen by the detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureSample {
    /// Wall-clock seconds since the Unix epoch.
    pub observed_at: f64,
    pub feature_present: bool,
    pub ground_truth: bool,
}

/// Fixed-capacity FIFO of the most recent samples.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    samples: VecDeque<FeatureSample>,
    capacity: usize,
}

impl SlidingWindow {
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, returning the evicted oldest one when at capacity.
    pub fn push(&mut self, sample: FeatureSample) -> Option<FeatureSample> {
        let evicted = if self.samples.len() == self.capacity {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(sample);
        evicted
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Warmed up: holds exactly `capacity` samples.
    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    pub fn any_feature(&self) -> bool {
        self.samples.iter().any(|s| s.feature_present)
    }

    /// Fraction of samples with the feature present; 0 when empty.
    pub fn feature_ratio(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let present = self.samples.iter().filter(|s| s.feature_present).count();
        present as f64 / self.samples.len() as f64
    }

    /// Strictly more than half of the samples are labelled covert.
    pub fn majority_label(&self) -> bool {
        let positive = self.samples.iter().filter(|s| s.ground_truth).count();
        positive * 2 > self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(feature: bool, label: bool) -> FeatureSample {
        FeatureSample {
            observed_at: 0.0,
            feature_present: feature,
            ground_truth: label,
        }
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut w = SlidingWindow::new(3);
        for i in 0..3 {
            let mut s = sample(false, false);
            s.observed_at = i as f64;
            assert!(w.push(s).is_none());
        }
        assert!(w.is_full());
        let evicted = w.push(sample(true, true)).unwrap();
        assert_eq!(evicted.observed_at, 0.0);
        assert_eq!(w.len(), 3);
    }

    #[test]
    fn length_never_exceeds_capacity() {
        let mut w = SlidingWindow::new(5);
        for _ in 0..100 {
            w.push(sample(true, false));
            assert!(w.len() <= 5);
        }
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let w = SlidingWindow::new(0);
        assert_eq!(w.capacity(), 1);
    }

    #[test]
    fn majority_is_strict() {
        let mut w = SlidingWindow::new(4);
        w.push(sample(false, true));
        w.push(sample(false, true));
        w.push(sample(false, false));
        w.push(sample(false, false));
        // Exactly half is not a majority.
        assert!(!w.majority_label());
        w.push(sample(false, true));
        assert!(w.majority_label());
    }

    #[test]
    fn feature_ratio() {
        let mut w = SlidingWindow::new(4);
        assert_eq!(w.feature_ratio(), 0.0);
        w.push(sample(true, false));
        w.push(sample(false, false));
        w.push(sample(true, false));
        w.push(sample(true, false));
        assert!((w.feature_ratio() - 0.75).abs() < 1e-12);
        assert!(w.any_feature());
    }
}
