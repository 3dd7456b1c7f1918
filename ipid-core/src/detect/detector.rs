//! The sliding-window detector.
//!
//! Every qualifying frame becomes a [`FeatureSample`]. Once the window is
//! full, each insertion is a scoring event: the window decision is
//! compared with the window's ground truth and exactly one confusion
//! matrix cell is incremented.
//!
//! Two timing variants:
//!
//! - **Event-driven**: every scoring event emits a record; the matrix
//!   accumulates for the whole run.
//! - **Bucketed**: scoring events accumulate into a wall-clock bucket of
//!   length `S`. When a bucket is found to be overdue (on the next frame or
//!   on [`Detector::poll`]) it closes, emits one record if it saw any
//!   scoring event, and the matrix resets. Bucket edges advance by the
//!   configured step from the previous edge, never from "now".

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{info, trace};

use crate::detect::feature::FeatureStrategy;
use crate::detect::matrix::{ConfusionMatrix, Outcome};
use crate::detect::window::{FeatureSample, SlidingWindow};
use crate::error::IpidError;
use crate::frame::Frame;
use crate::metrics::MetricsRecord;

pub const DEFAULT_WINDOW_SIZE: usize = 20;
pub const DEFAULT_BUCKET_SECONDS: f64 = 10.0;
/// Shortest bucket length and step the detector will honour.
pub const MIN_BUCKET: Duration = Duration::from_millis(1);

// ── Clock ────────────────────────────────────────────────────────

/// A paired monotonic and wall-clock reading.
///
/// The monotonic half drives bucket arithmetic; the wall-clock half is
/// what ends up in records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timestamp {
    pub instant: Instant,
    /// Seconds since the Unix epoch.
    pub unix: f64,
}

impl Timestamp {
    pub fn new(instant: Instant, unix: f64) -> Self {
        Self { instant, unix }
    }

    pub fn now() -> Self {
        let unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            instant: Instant::now(),
            unix,
        }
    }
}

// ── Modes ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    EventDriven,
    Bucketed { length: Duration, step: Duration },
}

impl Timing {
    /// Bucketed timing with `step == length`.
    pub fn bucketed(length: Duration) -> Self {
        Timing::Bucketed {
            length,
            step: length,
        }
    }

    pub fn is_bucketed(&self) -> bool {
        matches!(self, Timing::Bucketed { .. })
    }
}

/// Configuration-level timing selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimingMode {
    #[default]
    Event,
    Bucketed,
}

impl FromStr for TimingMode {
    type Err = IpidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "event" | "event-driven" => Ok(TimingMode::Event),
            "bucketed" | "bucket" => Ok(TimingMode::Bucketed),
            other => Err(IpidError::Config(format!("unknown detection timing {other:?}"))),
        }
    }
}

impl fmt::Display for TimingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimingMode::Event => write!(f, "event"),
            TimingMode::Bucketed => write!(f, "bucketed"),
        }
    }
}

/// Where the "true" label for a window comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LabelMode {
    /// Strict majority of the externally supplied per-sample labels.
    #[default]
    External,
    /// Truth is the detector's own decision. Precision and recall become
    /// trivially 1; only useful for smoke-testing the pipeline.
    SelfConsistent,
}

impl FromStr for LabelMode {
    type Err = IpidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "external" => Ok(LabelMode::External),
            "self-consistent" | "self_consistent" | "self" => Ok(LabelMode::SelfConsistent),
            other => Err(IpidError::Config(format!("unknown label mode {other:?}"))),
        }
    }
}

impl fmt::Display for LabelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelMode::External => write!(f, "external"),
            LabelMode::SelfConsistent => write!(f, "self-consistent"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    pub window_size: usize,
    pub strategy: FeatureStrategy,
    pub timing: Timing,
    pub label_mode: LabelMode,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            strategy: FeatureStrategy::default(),
            timing: Timing::EventDriven,
            label_mode: LabelMode::External,
        }
    }
}

// ── Detector ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorStats {
    /// Frames with a parseable IPv4 header.
    pub qualifying: u64,
    /// Frames skipped for lacking one.
    pub skipped: u64,
    /// Scoring events (one matrix increment each).
    pub scored: u64,
    /// Records returned to the caller.
    pub records: u64,
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    start: Instant,
    events: u64,
}

#[derive(Debug)]
pub struct Detector {
    config: DetectorConfig,
    window: SlidingWindow,
    matrix: ConfusionMatrix,
    bucket: Option<Bucket>,
    stats: DetectorStats,
}

impl Detector {
    pub fn new(config: DetectorConfig) -> Self {
        let window = SlidingWindow::new(config.window_size);
        Self {
            config,
            window,
            matrix: ConfusionMatrix::new(),
            bucket: None,
            stats: DetectorStats::default(),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn window(&self) -> &SlidingWindow {
        &self.window
    }

    pub fn matrix(&self) -> &ConfusionMatrix {
        &self.matrix
    }

    pub fn stats(&self) -> DetectorStats {
        self.stats
    }

    pub fn observe(&mut self, frame: &Frame, label: bool) -> Option<MetricsRecord> {
        self.observe_at(frame, label, Timestamp::now())
    }

    /// Observe one frame with an explicit clock reading.
    ///
    /// Frames without an IPv4 header are not samples; in bucketed timing
    /// they still advance the bucket clock.
    pub fn observe_at(
        &mut self,
        frame: &Frame,
        label: bool,
        now: Timestamp,
    ) -> Option<MetricsRecord> {
        let feature = match frame.parse() {
            Ok(parsed) => self.config.strategy.extract(&parsed),
            Err(e) => {
                trace!("Skipping non-qualifying frame ({} bytes): {}", frame.len(), e);
                self.stats.skipped += 1;
                return self.poll(now);
            }
        };
        self.observe_feature_at(feature, label, now)
    }

    /// Observe an already-extracted feature.
    pub fn observe_feature_at(
        &mut self,
        feature_present: bool,
        label: bool,
        now: Timestamp,
    ) -> Option<MetricsRecord> {
        self.stats.qualifying += 1;

        // An overdue bucket closes before this event is counted.
        let closed = self.roll_bucket(now);

        self.window.push(FeatureSample {
            observed_at: now.unix,
            feature_present,
            ground_truth: label,
        });
        if !self.window.is_full() {
            return closed;
        }

        let outcome = self.score();
        trace!("Scored window: {:?}", outcome);

        match self.config.timing {
            Timing::EventDriven => Some(self.emit(now.unix)),
            Timing::Bucketed { .. } => {
                if let Some(bucket) = self.bucket.as_mut() {
                    bucket.events += 1;
                }
                closed
            }
        }
    }

    /// Close the current bucket if it is overdue. No-op in event-driven
    /// timing.
    pub fn poll(&mut self, now: Timestamp) -> Option<MetricsRecord> {
        self.roll_bucket(now)
    }

    fn score(&mut self) -> Outcome {
        let decision = self.config.strategy.decide(&self.window);
        let truth = match self.config.label_mode {
            LabelMode::External => self.window.majority_label(),
            LabelMode::SelfConsistent => decision,
        };
        self.stats.scored += 1;
        self.matrix.record(decision, truth)
    }

    fn emit(&mut self, window_end: f64) -> MetricsRecord {
        let record = MetricsRecord::from_matrix(window_end, &self.matrix);
        self.stats.records += 1;
        info!(
            "TP={} FP={} TN={} FN={} Precision={:.3} Recall={:.3} F1={:.3}",
            record.tp, record.fp, record.tn, record.fn_, record.precision, record.recall, record.f1
        );
        record
    }

    fn roll_bucket(&mut self, now: Timestamp) -> Option<MetricsRecord> {
        let Timing::Bucketed { length, step } = self.config.timing else {
            return None;
        };
        let length = length.max(MIN_BUCKET);
        let step = step.max(MIN_BUCKET);
        let bucket = *self.bucket.get_or_insert(Bucket {
            start: now.instant,
            events: 0,
        });

        let elapsed = now.instant.saturating_duration_since(bucket.start);
        if elapsed < length {
            return None;
        }

        let record = if bucket.events > 0 {
            // Stamp the record with the bucket's nominal end.
            let overshoot = (elapsed - length).as_secs_f64();
            Some(self.emit(now.unix - overshoot))
        } else {
            None
        };

        // Advance by whole steps, skipping buckets that are already
        // overdue and therefore empty.
        let mut start = bucket.start + step;
        while now.instant.saturating_duration_since(start) >= length {
            start += step;
        }
        self.bucket = Some(Bucket { start, events: 0 });
        self.matrix.reset();
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameBuilder;

    fn frame(tagged: bool) -> Frame {
        let payload: &[u8] = if tagged { b"CovertChannel:a" } else { b"ping-ping-ping" };
        FrameBuilder::new().payload(payload.to_vec()).build()
    }

    fn clock(base: Instant, secs: f64) -> Timestamp {
        Timestamp::new(base + Duration::from_secs_f64(secs), 1_700_000_000.0 + secs)
    }

    fn detector(window_size: usize) -> Detector {
        Detector::new(DetectorConfig {
            window_size,
            ..DetectorConfig::default()
        })
    }

    #[test]
    fn warmup_emits_nothing() {
        let base = Instant::now();
        let mut d = detector(4);
        for i in 0..3 {
            assert!(d.observe_at(&frame(true), true, clock(base, i as f64)).is_none());
        }
        assert_eq!(d.matrix().total(), 0);
        assert!(d.observe_at(&frame(true), true, clock(base, 3.0)).is_some());
    }

    #[test]
    fn scenario_false_positive_on_minority_label() {
        let base = Instant::now();
        let mut d = detector(4);
        let features = [false, false, false, true];
        let labels = [false, false, false, true];
        let mut last = None;
        for (i, (f, l)) in features.into_iter().zip(labels).enumerate() {
            last = d.observe_at(&frame(f), l, clock(base, i as f64));
        }
        let r = last.unwrap();
        assert_eq!((r.tp, r.fp, r.tn, r.fn_), (0, 1, 0, 0));
        assert_eq!(r.precision, 0.0);
        assert_eq!(r.recall, 0.0);
        assert_eq!(r.f1, 0.0);
    }

    #[test]
    fn scenario_true_positive_on_majority_label() {
        let base = Instant::now();
        let mut d = detector(4);
        let mut last = None;
        for (i, f) in [false, false, false, true].into_iter().enumerate() {
            last = d.observe_at(&frame(f), true, clock(base, i as f64));
        }
        let r = last.unwrap();
        assert_eq!((r.tp, r.fp, r.tn, r.fn_), (1, 0, 0, 0));
        assert_eq!(r.precision, 1.0);
        assert_eq!(r.recall, 1.0);
        assert_eq!(r.f1, 1.0);
    }

    #[test]
    fn exactly_one_cell_per_scoring_event() {
        let base = Instant::now();
        let mut d = detector(3);
        let mut previous = 0;
        for i in 0..50u32 {
            let tagged = i % 7 == 0;
            let label = i % 3 == 0;
            if let Some(r) = d.observe_at(&frame(tagged), label, clock(base, i as f64)) {
                assert_eq!(r.total(), previous + 1);
                previous = r.total();
            }
        }
        assert_eq!(previous, 48);
        assert_eq!(d.stats().scored, 48);
    }

    #[test]
    fn identical_input_gives_identical_records() {
        let base = Instant::now();
        let run = || {
            let mut d = detector(5);
            (0..40u32)
                .filter_map(|i| {
                    d.observe_at(&frame(i % 4 == 0), i % 2 == 0, clock(base, i as f64 * 0.1))
                })
                .collect::<Vec<_>>()
        };
        let first = run();
        assert!(!first.is_empty());
        assert_eq!(first, run());
    }

    #[test]
    fn malformed_frames_are_skipped() {
        let base = Instant::now();
        let mut d = detector(1);
        assert!(d
            .observe_at(&Frame::new(vec![0u8; 10]), true, clock(base, 0.0))
            .is_none());
        assert_eq!(d.stats().skipped, 1);
        assert!(d.window().is_empty());
        assert!(d.observe_at(&frame(true), true, clock(base, 1.0)).is_some());
        assert_eq!(d.stats().qualifying, 1);
    }

    #[test]
    fn self_consistent_mode_never_disagrees() {
        let base = Instant::now();
        let mut d = Detector::new(DetectorConfig {
            window_size: 2,
            label_mode: LabelMode::SelfConsistent,
            ..DetectorConfig::default()
        });
        for i in 0..20u32 {
            // Labels are ignored.
            d.observe_at(&frame(i % 5 == 0), i % 2 == 1, clock(base, i as f64));
        }
        assert_eq!(d.matrix().fp(), 0);
        assert_eq!(d.matrix().fn_(), 0);
        assert!(d.matrix().tp() > 0);
        assert!(d.matrix().tn() > 0);
    }

    fn bucketed(window_size: usize, length: f64) -> Detector {
        Detector::new(DetectorConfig {
            window_size,
            timing: Timing::bucketed(Duration::from_secs_f64(length)),
            ..DetectorConfig::default()
        })
    }

    #[test]
    fn bucket_emits_once_and_resets() {
        let base = Instant::now();
        let mut d = bucketed(1, 10.0);
        for i in 0..5 {
            assert!(d.observe_at(&frame(true), true, clock(base, i as f64)).is_none());
        }
        assert_eq!(d.matrix().tp(), 5);
        assert!(d.poll(clock(base, 9.9)).is_none());

        let r = d.poll(clock(base, 10.5)).unwrap();
        assert_eq!(r.tp, 5);
        // Stamped at the nominal edge.
        assert!((r.window_end - 1_700_000_010.0).abs() < 1e-6);
        assert_eq!(d.matrix().total(), 0);
    }

    #[test]
    fn bucket_edges_advance_by_step() {
        let base = Instant::now();
        let mut d = bucketed(1, 10.0);
        d.observe_at(&frame(true), true, clock(base, 0.0));
        // Late arrival closes the first bucket before being counted.
        let r = d.observe_at(&frame(false), true, clock(base, 13.0)).unwrap();
        assert_eq!((r.tp, r.fn_), (1, 0));
        assert_eq!(d.matrix().fn_(), 1);
        // The next edge is at 20 s, not 23 s.
        assert!(d.poll(clock(base, 19.9)).is_none());
        let r = d.poll(clock(base, 20.0)).unwrap();
        assert_eq!((r.tp, r.fn_), (0, 1));
    }

    #[test]
    fn idle_buckets_are_skipped() {
        let base = Instant::now();
        let mut d = bucketed(1, 10.0);
        d.observe_at(&frame(true), true, clock(base, 0.0));
        assert!(d.poll(clock(base, 55.0)).is_some());
        // Buckets [10,20) through [40,50) were empty; the open one starts at 50.
        assert!(d.poll(clock(base, 59.0)).is_none());
        d.observe_at(&frame(true), false, clock(base, 59.5));
        let r = d.poll(clock(base, 60.0)).unwrap();
        assert_eq!(r.fp, 1);
        assert_eq!(d.stats().records, 2);
    }

    #[test]
    fn empty_bucket_emits_nothing() {
        let base = Instant::now();
        let mut d = bucketed(4, 1.0);
        // Warming up only; no scoring event in the bucket.
        d.observe_at(&frame(true), true, clock(base, 0.0));
        assert!(d.poll(clock(base, 2.0)).is_none());
    }

    #[test]
    fn zero_length_bucket_is_clamped() {
        let base = Instant::now();
        let mut d = Detector::new(DetectorConfig {
            window_size: 1,
            timing: Timing::bucketed(Duration::ZERO),
            ..DetectorConfig::default()
        });
        d.observe_at(&frame(true), true, clock(base, 0.0));
        let r = d.poll(clock(base, 0.005)).unwrap();
        assert_eq!(r.tp, 1);
        assert!(d.poll(clock(base, 0.0055)).is_none());
    }

    #[test]
    fn ratio_strategy_scores_identifications() {
        let base = Instant::now();
        let mut d = Detector::new(DetectorConfig {
            window_size: 4,
            strategy: FeatureStrategy::printable_ratio(0.8).unwrap(),
            ..DetectorConfig::default()
        });
        let with_id = |id: u16| {
            FrameBuilder::new()
                .identification(id)
                .payload(b"no marker here".to_vec())
                .build()
        };

        let script: [(u16, bool); 10] = [
            (72, false),
            (105, false),
            (33, false),
            // [72, 105, 33, 4000]: 0.75 printable, below the threshold.
            (4000, false),
            (65, false),
            (126, true),
            // Two of four labelled covert is not a majority.
            (32, true),
            // [65, 126, 32, 100]: all printable.
            (100, true),
            // 127 is outside the printable range.
            (127, true),
            (127, true),
        ];
        let mut records = Vec::new();
        for (i, (id, label)) in script.into_iter().enumerate() {
            records.extend(d.observe_at(&with_id(id), label, clock(base, i as f64)));
        }

        assert_eq!(records.len(), 7);
        let m = d.matrix();
        assert_eq!((m.tp(), m.fp(), m.tn(), m.fn_()), (1, 0, 4, 2));
        assert_eq!(records[4].tp, 1);
    }

    #[test]
    fn event_driven_poll_is_noop() {
        let base = Instant::now();
        let mut d = detector(1);
        d.observe_at(&frame(true), true, clock(base, 0.0));
        assert!(d.poll(clock(base, 1e6)).is_none());
        assert_eq!(d.matrix().tp(), 1);
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("bucketed".parse::<TimingMode>().unwrap(), TimingMode::Bucketed);
        assert_eq!("event".parse::<TimingMode>().unwrap(), TimingMode::Event);
        assert_eq!(
            "self-consistent".parse::<LabelMode>().unwrap(),
            LabelMode::SelfConsistent
        );
        assert!("sometimes".parse::<LabelMode>().is_err());
    }
}
