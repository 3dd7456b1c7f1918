use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::bus::{Delivery, PacketBus};
use crate::error::IpidError;

/// A message recorded by [`MemoryBus::publish`].
#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String,
    pub payload: Bytes,
    pub at: Instant,
}

#[derive(Debug)]
struct MemoryBusState {
    subscriptions: HashSet<String>,
    published: Vec<Published>,
}

/// In-process bus.
///
/// Publishes are recorded and looped back to the delivery channel when
/// the topic is subscribed, mirroring what a broker would do for a
/// client subscribed to its own output.
#[derive(Debug, Clone)]
pub struct MemoryBus {
    state: Arc<Mutex<MemoryBusState>>,
    deliveries: mpsc::Sender<Delivery>,
}

impl MemoryBus {
    pub fn new() -> (Self, mpsc::Receiver<Delivery>) {
        let (deliveries, rx) = mpsc::channel(4096);
        let bus = Self {
            state: Arc::new(Mutex::new(MemoryBusState {
                subscriptions: HashSet::new(),
                published: Vec::new(),
            })),
            deliveries,
        };
        (bus, rx)
    }

    /// Simulate a frame arriving on `topic` from outside the relay.
    /// Dropped unless the topic is subscribed.
    pub async fn inject(&self, topic: &str, payload: Bytes) -> Result<(), IpidError> {
        if !self.lock().subscriptions.contains(topic) {
            return Ok(());
        }
        self.deliveries
            .send(Delivery {
                topic: topic.to_string(),
                payload,
            })
            .await?;
        Ok(())
    }

    /// Everything published so far, in publish order.
    pub fn published(&self) -> Vec<Published> {
        self.lock().published.clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<Bytes> {
        self.lock()
            .published
            .iter()
            .filter(|p| p.topic == topic)
            .map(|p| p.payload.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryBusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PacketBus for MemoryBus {
    async fn subscribe(&self, topic: &str) -> Result<(), IpidError> {
        self.lock().subscriptions.insert(topic.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), IpidError> {
        let loopback = {
            let mut state = self.lock();
            state.published.push(Published {
                topic: topic.to_string(),
                payload: payload.clone(),
                at: Instant::now(),
            });
            state.subscriptions.contains(topic)
        };
        if loopback {
            self.deliveries
                .send(Delivery {
                    topic: topic.to_string(),
                    payload,
                })
                .await?;
        }
        Ok(())
    }
}
