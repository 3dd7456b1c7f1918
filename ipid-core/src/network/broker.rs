//! Minimal publish/subscribe broker for the bus protocol.
//!
//! Each accepted client runs its own task translating inbound
//! [`BusPacket`]s into [`RegistryEvent`]s. A single registry task owns
//! the subscription table, so there is no shared mutable state between
//! client tasks.
//!
//! Delivery is at-most-once: a subscriber whose outbound queue is full
//! misses the message, and nothing is persisted.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::error::IpidError;
use crate::message::MessageKind;
use crate::network::connection::{BusConnection, ConnectionSender};
use crate::packet::BusPacket;

type ClientId = u64;

#[derive(Debug)]
enum RegistryEvent {
    Joined { id: ClientId, tx: ConnectionSender },
    Subscribe { id: ClientId, topic: String },
    Unsubscribe { id: ClientId, topic: String },
    Publish { from: ClientId, packet: BusPacket },
    Left { id: ClientId },
}

pub struct Broker {
    listener: TcpListener,
}

impl Broker {
    pub async fn bind(addr: &str) -> Result<Self, IpidError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, IpidError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve forever.
    pub async fn run(self) -> Result<(), IpidError> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), IpidError>
    where
        F: Future<Output = ()>,
    {
        let (events_tx, events_rx) = mpsc::channel(4096);
        let registry = tokio::spawn(registry_loop(events_rx));
        info!("bus broker listening on {}", self.local_addr()?);

        tokio::pin!(shutdown);
        let mut next_id: ClientId = 0;
        loop {
            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("accept error: {e}");
                        continue;
                    }
                },
                _ = &mut shutdown => break,
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!("set_nodelay failed for {peer}: {e}");
            }

            next_id += 1;
            let id = next_id;
            info!("client {id} connected from {peer}");
            let events = events_tx.clone();
            tokio::spawn(client_loop(id, BusConnection::new(stream), events));
        }

        drop(events_tx);
        registry.abort();
        info!("bus broker stopped");
        Ok(())
    }
}

async fn client_loop(id: ClientId, conn: BusConnection, events: mpsc::Sender<RegistryEvent>) {
    let (tx, mut rx) = conn.into_parts();
    if events.send(RegistryEvent::Joined { id, tx }).await.is_err() {
        return;
    }

    while let Some(packet) = rx.recv().await {
        let event = match packet.kind() {
            Ok(MessageKind::Subscribe) => RegistryEvent::Subscribe {
                id,
                topic: packet.topic().to_string(),
            },
            Ok(MessageKind::Unsubscribe) => RegistryEvent::Unsubscribe {
                id,
                topic: packet.topic().to_string(),
            },
            Ok(MessageKind::Publish) => RegistryEvent::Publish { from: id, packet },
            Ok(MessageKind::Heartbeat) => continue,
            Err(e) => {
                warn!("client {id}: {e}");
                continue;
            }
        };
        if events.send(event).await.is_err() {
            return;
        }
    }

    info!("client {id} disconnected");
    let _ = events.send(RegistryEvent::Left { id }).await;
}

async fn registry_loop(mut events: mpsc::Receiver<RegistryEvent>) {
    let mut clients: HashMap<ClientId, ConnectionSender> = HashMap::new();
    let mut topics: HashMap<String, HashSet<ClientId>> = HashMap::new();

    while let Some(event) = events.recv().await {
        match event {
            RegistryEvent::Joined { id, tx } => {
                clients.insert(id, tx);
            }
            RegistryEvent::Subscribe { id, topic } => {
                debug!("client {id} subscribed to {topic}");
                topics.entry(topic).or_default().insert(id);
            }
            RegistryEvent::Unsubscribe { id, topic } => {
                if let Some(subs) = topics.get_mut(&topic) {
                    subs.remove(&id);
                }
            }
            RegistryEvent::Publish { from, packet } => {
                let Some(subs) = topics.get(packet.topic()) else {
                    trace!("no subscribers for {} (from client {from})", packet.topic());
                    continue;
                };
                let mut gone = Vec::new();
                for sub in subs {
                    let Some(tx) = clients.get(sub) else {
                        gone.push(*sub);
                        continue;
                    };
                    match tx.try_send(packet.clone()) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!("client {sub} is slow; dropped message on {}", packet.topic());
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => gone.push(*sub),
                    }
                }
                for id in gone {
                    remove_client(&mut clients, &mut topics, id);
                }
            }
            RegistryEvent::Left { id } => {
                remove_client(&mut clients, &mut topics, id);
            }
        }
    }
}

fn remove_client(
    clients: &mut HashMap<ClientId, ConnectionSender>,
    topics: &mut HashMap<String, HashSet<ClientId>>,
    id: ClientId,
) {
    clients.remove(&id);
    topics.retain(|_, subs| {
        subs.remove(&id);
        !subs.is_empty()
    });
}
