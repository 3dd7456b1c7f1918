//! ipid-probe — traffic generator and covert receiver.
//!
//! ```text
//! ipid-probe send --message "hello"      Covert message, one tagged echo request per char
//! ipid-probe ping --count 20             Untagged background echo requests
//! ipid-probe recv --count 5              Decode a covert message from an outbound topic
//! ```

use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use ipid_core::{
    ChannelCodec, ConnectionInfo, CovertReceiver, Frame, FrameBuilder, IpidError, Ipv4Flags,
    PacketBus, TcpBus, covert::Observation,
};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "ipid-probe", about = "Covert channel sender/receiver for the relay")]
struct Cli {
    #[command(flatten)]
    bus: BusArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct BusArgs {
    /// Broker address.
    #[arg(long, global = true, env = "BUS_ADDR", default_value = "127.0.0.1:4222")]
    bus: String,

    /// Give up connecting after this many milliseconds.
    #[arg(long, global = true, default_value_t = 5000)]
    connect_timeout_ms: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a covert message through the identification field.
    Send {
        #[arg(short, long)]
        message: String,
        #[arg(long, default_value = "inpktsec")]
        topic: String,
        /// Seconds between symbols.
        #[arg(long, default_value_t = 1.0)]
        interval: f64,
        #[arg(long, default_value = "CovertChannel")]
        marker: String,
        #[command(flatten)]
        addrs: AddrArgs,
    },
    /// Send untagged echo requests as background traffic.
    Ping {
        #[arg(short, long, default_value_t = 10)]
        count: u32,
        #[arg(long, default_value = "inpktsec")]
        topic: String,
        /// Seconds between requests.
        #[arg(long, default_value_t = 1.0)]
        interval: f64,
        /// ICMP data size in bytes.
        #[arg(long, default_value_t = 56)]
        size: usize,
        #[command(flatten)]
        addrs: AddrArgs,
    },
    /// Receive frames and decode the covert message.
    Recv {
        #[arg(long, default_value = "outpktinsec")]
        topic: String,
        /// Stop after this many frames.
        #[arg(short, long, default_value_t = 10)]
        count: usize,
        /// Stop after this many seconds without a frame.
        #[arg(long, default_value_t = 30.0)]
        timeout: f64,
        #[arg(long, default_value = "CovertChannel")]
        marker: String,
    },
}

#[derive(Args, Debug)]
struct AddrArgs {
    #[arg(long, default_value = "10.0.0.11")]
    src: Ipv4Addr,
    #[arg(long, default_value = "10.0.0.21")]
    dest: Ipv4Addr,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let info = ConnectionInfo::parse(&cli.bus.bus)?;
    let timeout = Duration::from_millis(cli.bus.connect_timeout_ms);
    let (bus, deliveries) = TcpBus::connect(&info, timeout).await?;

    match cli.command {
        Command::Send {
            message,
            topic,
            interval,
            marker,
            addrs,
        } => send(&bus, &topic, &message, interval, marker, &addrs).await?,
        Command::Ping {
            count,
            topic,
            interval,
            size,
            addrs,
        } => ping(&bus, &topic, count, interval, size, &addrs).await?,
        Command::Recv {
            topic,
            count,
            timeout,
            marker,
        } => {
            bus.subscribe(&topic).await?;
            let report = recv(deliveries, count, seconds(timeout)?, marker).await;
            println!("{}", report.message);
            info!(
                "accepted={} corrupted={} ignored={}",
                report.accepted, report.corrupted, report.ignored
            );
        }
    }

    // Let the writer task flush before the runtime goes away.
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}

fn seconds(value: f64) -> Result<Duration, IpidError> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| IpidError::Config(format!("invalid duration {value}: {e}")))
}

async fn send(
    bus: &TcpBus,
    topic: &str,
    message: &str,
    interval: f64,
    marker: String,
    addrs: &AddrArgs,
) -> Result<(), IpidError> {
    let interval = seconds(interval)?;
    let codec = ChannelCodec::new(marker);
    let symbols = codec.encode(message)?;
    info!("sending {} symbol(s) to {}", symbols.len(), topic);

    for (seq, symbol) in symbols.into_iter().enumerate() {
        if seq > 0 {
            tokio::time::sleep(interval).await;
        }
        let frame = FrameBuilder::new()
            .source(addrs.src)
            .destination(addrs.dest)
            .identification(symbol.identification)
            .flags(Ipv4Flags::DONT_FRAGMENT)
            .echo(std::process::id() as u16, seq as u16)
            .payload(symbol.payload)
            .build();
        bus.publish(topic, frame.into_bytes()).await?;
        debug!("sent symbol {} (id={})", seq, symbol.identification);
    }
    Ok(())
}

async fn ping(
    bus: &TcpBus,
    topic: &str,
    count: u32,
    interval: f64,
    size: usize,
    addrs: &AddrArgs,
) -> Result<(), IpidError> {
    let interval = seconds(interval)?;
    // The usual ping data pattern: incrementing bytes.
    let data: Vec<u8> = (0..size).map(|i| i as u8).collect();
    for seq in 0..count {
        if seq > 0 {
            tokio::time::sleep(interval).await;
        }
        // Ordinary identifications sit above the printable range.
        let id = 1000u16.wrapping_add(seq as u16).max(128);
        let frame = FrameBuilder::new()
            .source(addrs.src)
            .destination(addrs.dest)
            .identification(id)
            .echo(std::process::id() as u16, seq as u16)
            .payload(data.clone())
            .build();
        bus.publish(topic, frame.into_bytes()).await?;
    }
    info!("sent {} echo request(s) to {}", count, topic);
    Ok(())
}

async fn recv(
    mut deliveries: tokio::sync::mpsc::Receiver<ipid_core::Delivery>,
    count: usize,
    idle: Duration,
    marker: String,
) -> ipid_core::DecodeReport {
    let mut receiver = CovertReceiver::new(ChannelCodec::new(marker));
    let mut seen = 0;
    while seen < count {
        let delivery = match tokio::time::timeout(idle, deliveries.recv()).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => {
                warn!("bus connection closed");
                break;
            }
            Err(_) => {
                warn!("no frame for {:?}; stopping after {} frame(s)", idle, seen);
                break;
            }
        };
        seen += 1;
        match receiver.observe_frame(&frame_of(&delivery.payload)) {
            Observation::Accepted(c) => debug!("received {:?}", c),
            Observation::Corrupted(id) => debug!("tagged frame with unprintable id {}", id),
            Observation::Ignored => {}
        }
    }
    receiver.into_report()
}

fn frame_of(payload: &Bytes) -> Frame {
    Frame::from(payload.as_ref())
}
