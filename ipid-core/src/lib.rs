//! # ipid-core
//!
//! Core library for the IP-identification covert channel relay.
//!
//! This crate contains:
//! - **Frames**: `Frame`, `ParsedFrame`, `FrameBuilder` for Ethernet/IPv4/ICMP
//! - **Channel codec**: `ChannelCodec`, `CovertReceiver` for the text ↔ identification mapping
//! - **Bus**: `BusPacket` wire format, `BusCodec`, the TCP `Broker`, and the
//!   `PacketBus` seam with `TcpBus` and `MemoryBus`
//! - **Detection**: `Detector` with its sliding window and confusion matrix
//! - **Mitigation**: `Mitigator` identification reseeding
//! - **Forwarding**: `Forwarder` with uniform jitter, backed by `TaskPool`
//! - **Metrics**: `MetricsRecord` and the CSV / JSONL / in-memory sinks
//! - **Pipeline**: `Pipeline`, the per-frame relay path
//! - **Error**: `IpidError`, typed and `thiserror`-based

pub mod bus;
pub mod codec;
pub mod covert;
pub mod detect;
pub mod error;
pub mod flags;
pub mod forward;
pub mod frame;
pub mod header;
pub mod message;
pub mod metrics;
pub mod mitigate;
pub mod network;
pub mod packet;
pub mod pipeline;
pub mod task;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use bus::{Delivery, MemoryBus, PacketBus, TcpBus, Topics};
pub use codec::BusCodec;
pub use covert::{ChannelCodec, CovertReceiver, CovertSymbol, DEFAULT_MARKER, DecodeReport};
pub use detect::{
    ConfusionMatrix, Detector, DetectorConfig, FeatureStrategy, GroundTruth, LabelMode,
    SlidingWindow, StrategyKind, Timestamp, Timing, TimingMode,
};
pub use error::{FrameError, IpidError, TaskError};
pub use flags::Ipv4Flags;
pub use forward::{Forwarder, JitterModel};
pub use frame::{Frame, FrameBuilder, ParsedFrame};
pub use header::{BusHeader, HEADER_SIZE};
pub use message::{MessageKind, Segment};
pub use metrics::{CsvSink, JsonlSink, MemorySink, MetricsRecord, MetricsSink, SinkFormat};
pub use mitigate::Mitigator;
pub use network::{Broker, BusConnection, ConnectionInfo, ConnectionSender};
pub use packet::{BusPacket, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE};
pub use pipeline::{Pipeline, PipelineConfig, RelayStats};
pub use task::{TaskEvent, TaskPool};
