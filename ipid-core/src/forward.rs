//! Delay-then-publish stage.
//!
//! Every frame gets its own task: sleep a jittered delay, then publish to
//! the outbound topic. Frames may leave in a different order than they
//! arrived.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::bus::PacketBus;
use crate::error::TaskError;
use crate::frame::Frame;
use crate::task::{DrainReport, TaskId, TaskPool};

pub const DEFAULT_MEAN_DELAY_MS: u64 = 200;

// ── Jitter ───────────────────────────────────────────────────────

/// Uniform delay on `[0, bound]`, drawn independently per frame.
///
/// The configured "mean delay" is the upper bound of the interval, so the
/// actual mean is half of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterModel {
    bound: Duration,
}

impl JitterModel {
    pub fn uniform(mean_delay_ms: u64) -> Self {
        Self {
            bound: Duration::from_millis(mean_delay_ms),
        }
    }

    pub fn none() -> Self {
        Self::uniform(0)
    }

    pub fn bound(&self) -> Duration {
        self.bound
    }

    /// Microsecond resolution. A zero bound never touches the RNG.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.bound.is_zero() {
            return Duration::ZERO;
        }
        let max = self.bound.as_micros().min(u64::MAX as u128) as u64;
        Duration::from_micros(rng.gen_range(0..=max))
    }
}

impl Default for JitterModel {
    fn default() -> Self {
        Self::uniform(DEFAULT_MEAN_DELAY_MS)
    }
}

// ── Forwarder ────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ForwardCounters {
    scheduled: AtomicU64,
    forwarded: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of the forwarder's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardStats {
    pub scheduled: u64,
    pub forwarded: u64,
    pub failed: u64,
}

pub struct Forwarder<B: PacketBus> {
    bus: Arc<B>,
    jitter: JitterModel,
    rng: StdRng,
    pool: TaskPool,
    counters: Arc<ForwardCounters>,
}

impl<B: PacketBus> Forwarder<B> {
    pub fn new(bus: Arc<B>, jitter: JitterModel) -> Self {
        Self::with_rng(bus, jitter, StdRng::from_entropy())
    }

    pub fn with_rng(bus: Arc<B>, jitter: JitterModel, rng: StdRng) -> Self {
        Self {
            bus,
            jitter,
            rng,
            pool: TaskPool::new(),
            counters: Arc::new(ForwardCounters::default()),
        }
    }

    pub fn jitter(&self) -> JitterModel {
        self.jitter
    }

    /// Publish `frame` on `topic` after a freshly drawn delay.
    pub fn schedule(&mut self, topic: String, frame: Frame) -> TaskId {
        let delay = self.jitter.sample(&mut self.rng);
        self.schedule_with_delay(topic, frame, delay)
    }

    pub fn schedule_with_delay(&mut self, topic: String, frame: Frame, delay: Duration) -> TaskId {
        let bus = Arc::clone(&self.bus);
        let counters = Arc::clone(&self.counters);
        counters.scheduled.fetch_add(1, Ordering::Relaxed);

        self.pool.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let len = frame.len();
            match bus.publish(&topic, frame.into_bytes()).await {
                Ok(()) => {
                    counters.forwarded.fetch_add(1, Ordering::Relaxed);
                    debug!("Forwarded {} bytes to {} after {:?}", len, topic, delay);
                    Ok(())
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    Err(TaskError::Publish(format!("{topic}: {e}")))
                }
            }
        })
    }

    /// Collect finished forward tasks without waiting.
    pub fn reap(&mut self) -> usize {
        self.pool.try_reap().len()
    }

    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    pub fn stats(&self) -> ForwardStats {
        ForwardStats {
            scheduled: self.counters.scheduled.load(Ordering::Relaxed),
            forwarded: self.counters.forwarded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Let in-flight frames finish for up to `timeout`, abandon the rest.
    pub async fn drain(&mut self, timeout: Duration) -> DrainReport {
        self.pool.drain(timeout).await
    }
}
