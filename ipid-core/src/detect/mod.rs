//! Online covert-channel detection over a sliding window of frames.

pub mod detector;
pub mod feature;
pub mod matrix;
pub mod window;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub use detector::{
    Detector, DetectorConfig, DetectorStats, LabelMode, Timestamp, Timing, TimingMode,
};
pub use feature::{FeatureStrategy, StrategyKind};
pub use matrix::{ConfusionMatrix, Outcome};
pub use window::{FeatureSample, SlidingWindow};

/// Shared "covert traffic is being injected right now" flag.
///
/// Set by the operator or harness; read by the relay for every frame.
#[derive(Debug, Clone, Default)]
pub struct GroundTruth(Arc<AtomicBool>);

impl GroundTruth {
    pub fn new(active: bool) -> Self {
        Self(Arc::new(AtomicBool::new(active)))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Returns the previous value.
    pub fn set(&self, active: bool) -> bool {
        self.0.swap(active, Ordering::Relaxed)
    }
}
