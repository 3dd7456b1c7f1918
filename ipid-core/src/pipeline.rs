//! Per-frame relay pipeline.
//!
//! A [`Pipeline`] is owned by a single event loop. For each delivery it
//! runs, in order: mitigation, detection, metrics append, and finally
//! hands the frame to the forwarder. Forwarding never depends on the
//! earlier stages succeeding.

use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, trace, warn};

use crate::bus::{Delivery, PacketBus, Topics};
use crate::detect::{Detector, DetectorConfig, GroundTruth, Timestamp, Timing};
use crate::forward::{Forwarder, JitterModel};
use crate::frame::Frame;
use crate::message::Segment;
use crate::metrics::{MetricsRecord, MetricsSink};
use crate::mitigate::Mitigator;

/// Lower bound on the bucket-closing tick.
pub const MIN_TICK: Duration = Duration::from_millis(100);
/// Tick used in event-driven timing, only for reaping forward tasks.
pub const REAP_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub topics: Topics,
    pub detector: DetectorConfig,
    pub mitigate: bool,
    pub mean_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            topics: Topics::default(),
            detector: DetectorConfig::default(),
            mitigate: false,
            mean_delay_ms: crate::forward::DEFAULT_MEAN_DELAY_MS,
        }
    }
}

/// Relay counters, reported at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub received_a: u64,
    pub received_b: u64,
    /// Deliveries on a topic that is not one of the two inbound ones.
    pub unrouted: u64,
    pub mitigated: u64,
    pub non_qualifying: u64,
    pub records: u64,
    pub sink_failures: u64,
    pub forwarded: u64,
    pub publish_failures: u64,
    pub abandoned: u64,
}

impl RelayStats {
    pub fn received(&self) -> u64 {
        self.received_a + self.received_b
    }
}

pub struct Pipeline<B: PacketBus> {
    topics: Topics,
    mitigator: Mitigator,
    detector: Detector,
    sink: Box<dyn MetricsSink>,
    forwarder: Forwarder<B>,
    label: GroundTruth,
    stats: RelayStats,
}

impl<B: PacketBus> Pipeline<B> {
    pub fn new(
        config: PipelineConfig,
        bus: Arc<B>,
        sink: Box<dyn MetricsSink>,
        label: GroundTruth,
    ) -> Self {
        Self {
            topics: config.topics,
            mitigator: Mitigator::new(config.mitigate),
            detector: Detector::new(config.detector),
            sink,
            forwarder: Forwarder::new(bus, JitterModel::uniform(config.mean_delay_ms)),
            label,
            stats: RelayStats::default(),
        }
    }

    /// Same as [`Pipeline::new`] with reproducible mitigation and jitter.
    pub fn seeded(
        config: PipelineConfig,
        bus: Arc<B>,
        sink: Box<dyn MetricsSink>,
        label: GroundTruth,
        seed: u64,
    ) -> Self {
        let jitter = JitterModel::uniform(config.mean_delay_ms);
        Self {
            topics: config.topics,
            mitigator: Mitigator::seeded(config.mitigate, seed),
            detector: Detector::new(config.detector),
            sink,
            forwarder: Forwarder::with_rng(bus, jitter, StdRng::seed_from_u64(seed.wrapping_add(1))),
            label,
            stats: RelayStats::default(),
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn label(&self) -> &GroundTruth {
        &self.label
    }

    /// How often [`Pipeline::tick`] should run.
    pub fn tick_period(&self) -> Duration {
        match self.detector.config().timing {
            Timing::Bucketed { step, .. } => (step / 4).max(MIN_TICK),
            Timing::EventDriven => REAP_TICK,
        }
    }

    pub fn handle(&mut self, delivery: Delivery) -> Option<MetricsRecord> {
        self.handle_at(delivery, Timestamp::now())
    }

    pub fn handle_at(&mut self, delivery: Delivery, now: Timestamp) -> Option<MetricsRecord> {
        self.forwarder.reap();

        let Some(origin) = self.topics.segment_of(&delivery.topic) else {
            debug!("Ignoring delivery on unrouted topic {}", delivery.topic);
            self.stats.unrouted += 1;
            return None;
        };
        match origin {
            Segment::A => self.stats.received_a += 1,
            Segment::B => self.stats.received_b += 1,
        }

        let mut frame = Frame::from(delivery.payload.as_ref());
        if self.mitigator.mitigate(&mut frame) {
            self.stats.mitigated += 1;
        }

        let record = self.detector.observe_at(&frame, self.label.get(), now);
        if let Some(record) = record {
            self.persist(&record);
        }

        let topic = self.topics.forward_topic(origin).to_string();
        trace!("{} frame ({} bytes) -> {}", origin, frame.len(), topic);
        self.forwarder.schedule(topic, frame);
        record
    }

    /// Periodic housekeeping: reap finished forwards and close an overdue
    /// bucket.
    pub fn tick(&mut self) -> Option<MetricsRecord> {
        self.tick_at(Timestamp::now())
    }

    pub fn tick_at(&mut self, now: Timestamp) -> Option<MetricsRecord> {
        self.forwarder.reap();
        let record = self.detector.poll(now);
        if let Some(record) = record {
            self.persist(&record);
        }
        record
    }

    fn persist(&mut self, record: &MetricsRecord) {
        self.stats.records += 1;
        if let Err(e) = self.sink.append(record) {
            self.stats.sink_failures += 1;
            warn!("Failed to append metrics record: {}", e);
        }
    }

    pub fn stats(&self) -> RelayStats {
        let forward = self.forwarder.stats();
        RelayStats {
            non_qualifying: self.detector.stats().skipped,
            forwarded: forward.forwarded,
            publish_failures: forward.failed,
            ..self.stats
        }
    }

    /// Wait up to `drain_timeout` for in-flight forwards, flush the sink
    /// and return the final counters.
    pub async fn shutdown(mut self, drain_timeout: Duration) -> RelayStats {
        let in_flight = self.forwarder.in_flight();
        if in_flight > 0 {
            info!("Draining {} in-flight frame(s)", in_flight);
        }
        let report = self.forwarder.drain(drain_timeout).await;
        if report.abandoned > 0 {
            warn!("Abandoned {} frame(s) still delayed at shutdown", report.abandoned);
        }
        if let Err(e) = self.sink.flush() {
            warn!("Failed to flush metrics sink: {}", e);
        }

        let stats = RelayStats {
            abandoned: report.abandoned,
            ..self.stats()
        };
        info!(
            "Relay stats: received={} (a={}, b={}) forwarded={} publish_failures={} abandoned={} non_qualifying={} records={} sink_failures={}",
            stats.received(),
            stats.received_a,
            stats.received_b,
            stats.forwarded,
            stats.publish_failures,
            stats.abandoned,
            stats.non_qualifying,
            stats.records,
            stats.sink_failures,
        );
        stats
    }
}
