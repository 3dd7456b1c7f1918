//! Domain-specific error types for the relay and its bus protocol.
//!
//! All fallible operations return `Result<T, IpidError>`.
//! Malformed frames and bus messages never panic; every failure is typed.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the workspace.
#[derive(Debug, Error)]
pub enum IpidError {
    // ── Bus Protocol Errors ──────────────────────────────────────
    /// Received bytes that do not start with the bus magic sequence.
    #[error("invalid magic bytes: expected IPB0")]
    InvalidMagic,

    /// A field in the bus header could not be parsed.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    /// The bus message body failed checksum verification.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// A message violated bus protocol rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The topic name exceeds the configured maximum size.
    #[error("topic too long: {size} bytes (max {max})")]
    TopicTooLong { size: usize, max: usize },

    // ── Frame Errors ─────────────────────────────────────────────
    /// A link-layer frame could not be interpreted as IPv4.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a record or payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// UTF-8 conversion failed.
    #[error("invalid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    // ── Application Errors ───────────────────────────────────────
    /// A configuration value was missing or out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A covert message contained a character that cannot ride in one byte.
    #[error("character {0:?} cannot be carried in the identification field")]
    Unencodable(char),

    /// The metrics sink could not persist a record.
    #[error("metrics sink error: {0}")]
    Sink(String),
}

// ── FrameError ───────────────────────────────────────────────────

/// Reasons a link-layer frame is not a qualifying IPv4 sample.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Fewer bytes than an Ethernet header.
    #[error("frame too short for ethernet header: {0} bytes")]
    TruncatedEthernet(usize),

    /// The ethertype is not IPv4.
    #[error("not an IPv4 frame (ethertype {0:#06x})")]
    NotIpv4(u16),

    /// The IP version nibble is not 4.
    #[error("unsupported IP version {0}")]
    BadVersion(u8),

    /// The IHL field is below the 20-byte minimum.
    #[error("invalid IHL {0}")]
    BadHeaderLength(u8),

    /// The buffer ends inside the IPv4 header.
    #[error("IPv4 header truncated: need {need} bytes, have {have}")]
    TruncatedIp { need: usize, have: usize },
}

// ── TaskError ────────────────────────────────────────────────────

/// Typed error for spawned forward tasks.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Publishing the delayed frame failed.
    #[error("publish failed: {0}")]
    Publish(String),
}

// ── Convenient From implementations ──────────────────────────────

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for IpidError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        IpidError::ChannelClosed
    }
}

impl From<serde_json::Error> for IpidError {
    fn from(e: serde_json::Error) -> Self {
        IpidError::Encoding(e.to_string())
    }
}
