//! Packet bus adapter.
//!
//! The relay sees the outside world as a publish/subscribe bus with two
//! inbound topics (one per segment) and two outbound topics, cross-wired
//! so that a frame arriving from segment A leaves towards segment B.
//!
//! | Type         | Purpose                                              |
//! |--------------|------------------------------------------------------|
//! | `PacketBus`  | Async publish / subscribe seam used by the relay     |
//! | `TcpBus`     | Client for the broker in [`crate::network::broker`]  |
//! | `MemoryBus`  | In-process loopback bus                              |
//! | `Topics`     | Segment ↔ topic naming                               |

pub mod memory;
pub mod tcp;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::IpidError;
use crate::message::Segment;

pub use memory::MemoryBus;
pub use tcp::TcpBus;

/// A payload received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub payload: Bytes,
}

/// Publish/subscribe transport.
///
/// Deliveries for every subscribed topic arrive on the single receiver
/// handed out when the bus is constructed. `publish` is fire-and-forget:
/// success means the transport accepted the message, not that anyone
/// received it.
#[async_trait]
pub trait PacketBus: Send + Sync + 'static {
    async fn subscribe(&self, topic: &str) -> Result<(), IpidError>;

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), IpidError>;
}

// ── Topics ───────────────────────────────────────────────────────

/// Topic names for the two inbound and two outbound directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topics {
    pub from_segment_a: String,
    pub from_segment_b: String,
    pub to_segment_a: String,
    pub to_segment_b: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            from_segment_a: "inpktsec".into(),
            from_segment_b: "inpktinsec".into(),
            to_segment_a: "outpktsec".into(),
            to_segment_b: "outpktinsec".into(),
        }
    }
}

impl Topics {
    /// Topic on which frames originating from `segment` arrive.
    pub fn inbound(&self, segment: Segment) -> &str {
        match segment {
            Segment::A => &self.from_segment_a,
            Segment::B => &self.from_segment_b,
        }
    }

    /// Topic on which frames destined for `segment` are published.
    pub fn outbound(&self, segment: Segment) -> &str {
        match segment {
            Segment::A => &self.to_segment_a,
            Segment::B => &self.to_segment_b,
        }
    }

    /// Which segment an inbound topic belongs to.
    pub fn segment_of(&self, topic: &str) -> Option<Segment> {
        if topic == self.from_segment_a {
            Some(Segment::A)
        } else if topic == self.from_segment_b {
            Some(Segment::B)
        } else {
            None
        }
    }

    /// Outbound topic for a frame that arrived from `origin`.
    pub fn forward_topic(&self, origin: Segment) -> &str {
        self.outbound(origin.opposite())
    }

    pub fn validate(&self) -> Result<(), IpidError> {
        let all = [
            &self.from_segment_a,
            &self.from_segment_b,
            &self.to_segment_a,
            &self.to_segment_b,
        ];
        if all.iter().any(|t| t.is_empty()) {
            return Err(IpidError::Config("topic names must not be empty".into()));
        }
        if self.from_segment_a == self.from_segment_b {
            return Err(IpidError::Config("inbound topics must differ".into()));
        }
        // Publishing onto an inbound topic would feed frames back into the relay.
        if all[2..].iter().any(|out| *out == all[0] || *out == all[1]) {
            return Err(IpidError::Config(
                "outbound topics must differ from inbound topics".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_topics_cross_wire() {
        let topics = Topics::default();
        assert_eq!(topics.segment_of("inpktsec"), Some(Segment::A));
        assert_eq!(topics.segment_of("inpktinsec"), Some(Segment::B));
        assert_eq!(topics.segment_of("outpktsec"), None);
        assert_eq!(topics.forward_topic(Segment::A), "outpktinsec");
        assert_eq!(topics.forward_topic(Segment::B), "outpktsec");
        topics.validate().unwrap();
    }

    #[test]
    fn loops_are_rejected() {
        let topics = Topics {
            to_segment_b: "inpktsec".into(),
            ..Topics::default()
        };
        assert!(topics.validate().is_err());
    }
}
