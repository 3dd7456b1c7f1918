use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bus::{Delivery, PacketBus};
use crate::error::IpidError;
use crate::message::MessageKind;
use crate::network::connection::{BusConnection, ConnectionInfo, ConnectionSender};
use crate::packet::BusPacket;

/// [`PacketBus`] backed by a TCP connection to the bus broker.
#[derive(Debug, Clone)]
pub struct TcpBus {
    tx: ConnectionSender,
}

impl TcpBus {
    /// Connect to the broker. Failure (including timeout) is returned to
    /// the caller; the relay treats it as fatal.
    pub async fn connect(
        info: &ConnectionInfo,
        timeout: Duration,
    ) -> Result<(Self, mpsc::Receiver<Delivery>), IpidError> {
        let conn = BusConnection::connect_timeout(info, timeout).await?;
        info!("connected to bus at {info}");
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: BusConnection) -> (Self, mpsc::Receiver<Delivery>) {
        let (tx, mut rx) = conn.into_parts();
        let (deliveries_tx, deliveries_rx) = mpsc::channel(4096);

        tokio::spawn(async move {
            while let Some(packet) = rx.recv().await {
                match packet.kind() {
                    Ok(MessageKind::Publish) => {
                        let delivery = Delivery {
                            topic: packet.topic().to_string(),
                            payload: packet.into_payload(),
                        };
                        if deliveries_tx.send(delivery).await.is_err() {
                            break;
                        }
                    }
                    Ok(MessageKind::Heartbeat) => {}
                    Ok(other) => debug!("ignoring {other} from broker"),
                    Err(e) => warn!("bad message from broker: {e}"),
                }
            }
            info!("bus connection closed");
        });

        (Self { tx }, deliveries_rx)
    }
}

#[async_trait]
impl PacketBus for TcpBus {
    async fn subscribe(&self, topic: &str) -> Result<(), IpidError> {
        self.tx.send(BusPacket::subscribe(topic)?).await?;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), IpidError> {
        self.tx.send(BusPacket::publish(topic, payload)?).await?;
        Ok(())
    }
}
