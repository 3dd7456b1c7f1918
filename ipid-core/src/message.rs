//! Bus message kinds and the two network segments the relay bridges.
//!
//! Uses proper enums with `TryFrom` — no panics on unknown values.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IpidError;

// ── MessageKind ──────────────────────────────────────────────────

/// Operations understood by the bus broker.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Start receiving publishes on a topic.
    Subscribe = 0x1,
    /// Stop receiving publishes on a topic.
    Unsubscribe = 0x2,
    /// Deliver a payload to every subscriber of a topic.
    Publish = 0x3,
    /// Keep-alive; carries no topic or payload.
    Heartbeat = 0x4,
}

impl TryFrom<u32> for MessageKind {
    type Error = IpidError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x1 => Ok(MessageKind::Subscribe),
            0x2 => Ok(MessageKind::Unsubscribe),
            0x3 => Ok(MessageKind::Publish),
            0x4 => Ok(MessageKind::Heartbeat),
            _ => Err(IpidError::UnknownVariant {
                type_name: "MessageKind",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── Segment ──────────────────────────────────────────────────────

/// One side of the bump-in-the-wire relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
    A,
    B,
}

impl Segment {
    /// The segment a frame arriving from `self` is forwarded to.
    pub fn opposite(self) -> Self {
        match self {
            Segment::A => Segment::B,
            Segment::B => Segment::A,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::A => write!(f, "segment-a"),
            Segment::B => write!(f, "segment-b"),
        }
    }
}
