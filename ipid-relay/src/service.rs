//! Relay service core logic.
//!
//! Connects to the bus, subscribes to both inbound topics and drives a
//! single [`Pipeline`] from one event loop until stopped or the bus goes
//! away.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use ipid_core::metrics::open_run_sink;
use ipid_core::{Delivery, GroundTruth, IpidError, PacketBus, Pipeline, RelayStats, TcpBus};

use crate::config::RelayConfig;

// ── RelayService ─────────────────────────────────────────────────

pub struct RelayService {
    config: RelayConfig,
    running: Arc<AtomicBool>,
    label: GroundTruth,
}

impl RelayService {
    pub fn new(config: RelayConfig) -> Self {
        let label = GroundTruth::new(config.ground_truth.covert_active);
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            label,
        }
    }

    /// Handle for stopping the service from another task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Handle for flipping the ground-truth label while running.
    pub fn label_handle(&self) -> GroundTruth {
        self.label.clone()
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Connect to the configured broker and run until stopped.
    ///
    /// A failed connect is returned immediately; there is no retry.
    pub async fn run(&self) -> Result<RelayStats, IpidError> {
        let info = self.config.connection_info()?;
        let (bus, deliveries) = TcpBus::connect(&info, self.config.connect_timeout())
            .await
            .inspect_err(|e| error!("cannot connect to bus at {info}: {e}"))?;
        self.run_with(bus, deliveries).await
    }

    /// Run over an already connected bus.
    pub async fn run_with<B: PacketBus>(
        &self,
        bus: B,
        mut deliveries: mpsc::Receiver<Delivery>,
    ) -> Result<RelayStats, IpidError> {
        self.running.store(true, Ordering::SeqCst);

        let topics = &self.config.topics;
        bus.subscribe(&topics.from_segment_a).await?;
        bus.subscribe(&topics.from_segment_b).await?;
        info!(
            "relaying {} -> {} and {} -> {}",
            topics.from_segment_a, topics.to_segment_b, topics.from_segment_b, topics.to_segment_a
        );

        let sink = open_run_sink(&self.config.metrics.results_dir, self.config.metrics.format)?;
        if let Some(path) = sink.location() {
            info!("writing metrics to {}", path.display());
        }

        let mut pipeline = Pipeline::new(
            self.config.to_pipeline_config()?,
            Arc::new(bus),
            sink,
            self.label.clone(),
        );

        let mut tick = tokio::time::interval(pipeline.tick_period());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                delivery = deliveries.recv() => match delivery {
                    Some(delivery) => {
                        pipeline.handle(delivery);
                    }
                    None => {
                        warn!("bus connection closed");
                        break;
                    }
                },
                _ = tick.tick() => {
                    pipeline.tick();
                }
                _ = Self::wait_for_stop(&self.running) => break,
            }
        }

        self.running.store(false, Ordering::SeqCst);
        let stats = pipeline.shutdown(self.config.drain_timeout()).await;
        info!("relay stopped");
        Ok(stats)
    }

    async fn wait_for_stop(running: &Arc<AtomicBool>) {
        loop {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Flip `label` on `SIGUSR1` (covert on) and `SIGUSR2` (covert off).
#[cfg(unix)]
pub fn spawn_label_signals(label: GroundTruth) -> Result<(), IpidError> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut on = signal(SignalKind::user_defined1())?;
    let mut off = signal(SignalKind::user_defined2())?;
    tokio::spawn(async move {
        loop {
            let active = tokio::select! {
                Some(()) = on.recv() => true,
                Some(()) = off.recv() => false,
                else => break,
            };
            let previous = label.set(active);
            if previous != active {
                info!("ground truth label set to {}", if active { "covert" } else { "clean" });
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
pub fn spawn_label_signals(_label: GroundTruth) -> Result<(), IpidError> {
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use ipid_core::{FrameBuilder, MemoryBus};

    use super::*;

    fn test_config(results_dir: &std::path::Path) -> RelayConfig {
        let mut cfg = RelayConfig::default();
        cfg.forward.mean_delay_ms = 0;
        cfg.detector.window_size = 2;
        cfg.metrics.results_dir = results_dir.to_path_buf();
        cfg
    }

    #[tokio::test]
    async fn relays_until_stopped() {
        let tmp = tempfile::tempdir().unwrap();
        let service = RelayService::new(test_config(tmp.path()));
        let stop = service.stop_handle();
        let (bus, rx) = MemoryBus::new();
        let driver_bus = bus.clone();

        let frame = FrameBuilder::new().payload(b"CovertChannel:z".to_vec()).build();
        let (result, ()) = tokio::join!(service.run_with(bus, rx), async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            for _ in 0..4 {
                driver_bus
                    .inject("inpktsec", Bytes::copy_from_slice(frame.as_bytes()))
                    .await
                    .unwrap();
            }
            driver_bus
                .inject("inpktinsec", Bytes::from_static(b"not a frame"))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            stop.store(false, Ordering::SeqCst);
        });

        let stats = result.unwrap();
        assert_eq!(stats.received_a, 4);
        assert_eq!(stats.received_b, 1);
        assert_eq!(stats.forwarded, 5);
        assert_eq!(stats.non_qualifying, 1);
        assert_eq!(stats.records, 3);
        assert!(!service.is_running());

        // One run directory holding the CSV.
        let runs: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(runs.len(), 1);
        let csv = runs[0].as_ref().unwrap().path().join("detection_metrics.csv");
        let text = std::fs::read_to_string(csv).unwrap();
        assert_eq!(text.lines().count(), 4);
    }

    #[tokio::test]
    async fn connect_failure_is_fatal() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = test_config(tmp.path());
        cfg.bus.address = format!("127.0.0.1:{port}");
        cfg.bus.connect_timeout_ms = 1000;
        let service = RelayService::new(cfg);
        assert!(service.run().await.is_err());
        // Nothing was written.
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn label_starts_from_config() {
        let mut cfg = RelayConfig::default();
        cfg.ground_truth.covert_active = true;
        let service = RelayService::new(cfg);
        assert!(service.label_handle().get());
    }
}
