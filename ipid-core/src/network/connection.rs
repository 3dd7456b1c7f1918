use std::fmt;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::codec::BusCodec;
use crate::error::IpidError;
use crate::packet::BusPacket;

pub type ConnectionSender = mpsc::Sender<BusPacket>;

/// Interval between keep-alive heartbeats sent to the peer.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// A framed bus connection to a single peer.
///
/// Reading and writing happen on background tasks; the handle only
/// holds the two channel ends.
#[derive(Debug)]
pub struct BusConnection {
    // Channel to send packets to background writer task
    tx: mpsc::Sender<BusPacket>,
    // Channel to receive packets from background reader task
    rx: mpsc::Receiver<BusPacket>,
}

impl BusConnection {
    pub fn new(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".into());
        let (mut net_writer, mut net_reader) = Framed::new(stream, BusCodec).split();

        // User -> Network
        let (user_tx, mut network_rx) = mpsc::channel::<BusPacket>(1024);

        // Network -> User
        let (network_tx, user_rx) = mpsc::channel(1024);

        // Writer task: User -> Network
        let writer_peer = peer.clone();
        tokio::spawn(async move {
            while let Some(packet) = network_rx.recv().await {
                if let Err(e) = net_writer.send(packet).await {
                    warn!("bus write error to {writer_peer}: {e}");
                    break;
                }
            }
        });

        // Reader task: Network -> User
        tokio::spawn(async move {
            while let Some(result) = net_reader.next().await {
                match result {
                    Ok(packet) => {
                        if network_tx.send(packet).await.is_err() {
                            // user_rx was dropped, stop reading
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("bus read error from {peer}: {e}");
                        break;
                    }
                }
            }
            debug!("bus reader for {peer} finished");
        });

        // Heartbeat
        let heartbeat_tx = user_tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                if heartbeat_tx.send(BusPacket::heartbeat()).await.is_err() {
                    break; // Connection handle was dropped, stop heartbeat
                }
            }
        });

        Self {
            tx: user_tx,
            rx: user_rx,
        }
    }

    /// Split into the outbound sender and the inbound receiver.
    pub fn into_parts(self) -> (ConnectionSender, mpsc::Receiver<BusPacket>) {
        (self.tx, self.rx)
    }

    pub async fn connect(conn_info: &ConnectionInfo) -> Result<Self, IpidError> {
        let stream = TcpStream::connect(conn_info.to_string()).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }

    /// Connect, failing with [`IpidError::Timeout`] instead of hanging.
    pub async fn connect_timeout(
        conn_info: &ConnectionInfo,
        timeout: Duration,
    ) -> Result<Self, IpidError> {
        tokio::time::timeout(timeout, Self::connect(conn_info))
            .await
            .map_err(|_| IpidError::Timeout(timeout))?
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    host: String,
    port: u16,
}

impl ConnectionInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port`, tolerating a leading `tcp://` or `nats://` scheme.
    pub fn parse(addr: &str) -> Result<Self, IpidError> {
        let trimmed = addr
            .strip_prefix("tcp://")
            .or_else(|| addr.strip_prefix("nats://"))
            .unwrap_or(addr);
        let (host, port) = trimmed
            .rsplit_once(':')
            .ok_or_else(|| IpidError::Config(format!("bus address {addr:?} has no port")))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| IpidError::Config(format!("bus address {addr:?}: {e}")))?;
        if host.is_empty() {
            return Err(IpidError::Config(format!("bus address {addr:?} has no host")));
        }
        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
