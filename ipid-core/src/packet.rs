use std::fmt::Debug;

use bytes::Bytes;

use crate::error::IpidError;
use crate::header::{BusHeader, HEADER_SIZE};
use crate::message::MessageKind;

/// Longest topic name accepted on the bus.
pub const MAX_TOPIC_LEN: usize = 255;
/// Largest payload accepted on the bus (one link-layer frame fits easily).
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;
/// Largest encoded bus message.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_TOPIC_LEN + MAX_PAYLOAD_SIZE;

/// One message on the publish/subscribe bus.
#[derive(Clone, PartialEq, Eq)]
pub struct BusPacket {
    header: BusHeader,
    topic: String,
    payload: Bytes,
}

impl BusPacket {
    pub fn heartbeat() -> Self {
        Self {
            header: BusHeader::new(0, MessageKind::Heartbeat as u32, 0, 0),
            topic: String::new(),
            payload: Bytes::new(),
        }
    }

    pub fn subscribe(topic: &str) -> Result<Self, IpidError> {
        Self::build(MessageKind::Subscribe, topic, Bytes::new())
    }

    pub fn unsubscribe(topic: &str) -> Result<Self, IpidError> {
        Self::build(MessageKind::Unsubscribe, topic, Bytes::new())
    }

    pub fn publish(topic: &str, payload: Bytes) -> Result<Self, IpidError> {
        Self::build(MessageKind::Publish, topic, payload)
    }

    fn build(kind: MessageKind, topic: &str, payload: Bytes) -> Result<Self, IpidError> {
        if topic.is_empty() {
            return Err(IpidError::ProtocolViolation("topic must not be empty"));
        }
        if topic.len() > MAX_TOPIC_LEN {
            return Err(IpidError::TopicTooLong {
                size: topic.len(),
                max: MAX_TOPIC_LEN,
            });
        }
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(IpidError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut header = BusHeader::new(0, kind as u32, topic.len() as u32, payload.len() as u32);
        header.set_checksum(body_checksum(topic.as_bytes(), &payload));
        Ok(Self {
            header,
            topic: topic.to_string(),
            payload,
        })
    }

    pub fn header(&self) -> &BusHeader {
        &self.header
    }

    pub fn kind(&self) -> Result<MessageKind, IpidError> {
        MessageKind::try_from(self.header.kind())
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.header.body_length()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.header.to_bytes());
        buf.extend_from_slice(self.topic.as_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse one complete message. `bytes` must hold exactly header + body.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IpidError> {
        let header = BusHeader::from_bytes(bytes)?;
        MessageKind::try_from(header.kind())?;

        if header.topic_length() > MAX_TOPIC_LEN {
            return Err(IpidError::TopicTooLong {
                size: header.topic_length(),
                max: MAX_TOPIC_LEN,
            });
        }
        if header.payload_length() > MAX_PAYLOAD_SIZE {
            return Err(IpidError::PayloadTooLarge {
                size: header.payload_length(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        if bytes.len() != HEADER_SIZE + header.body_length() {
            return Err(IpidError::InvalidHeader("length does not match header"));
        }

        let topic_end = HEADER_SIZE + header.topic_length();
        let topic = String::from_utf8(bytes[HEADER_SIZE..topic_end].to_vec())?;
        let payload = Bytes::copy_from_slice(&bytes[topic_end..]);
        let packet = Self {
            header,
            topic,
            payload,
        };
        if !packet.validate() {
            return Err(IpidError::ChecksumMismatch);
        }
        Ok(packet)
    }

    /// Verify the body checksum.
    pub fn validate(&self) -> bool {
        self.header.checksum() == body_checksum(self.topic.as_bytes(), &self.payload)
    }
}

/// First four bytes of the blake3 hash of topic ++ payload; 0 for an empty body.
fn body_checksum(topic: &[u8], payload: &[u8]) -> u32 {
    if topic.is_empty() && payload.is_empty() {
        return 0;
    }
    let mut hasher = blake3::Hasher::new();
    hasher.update(topic);
    hasher.update(payload);
    let hash = hasher.finalize();
    let b = hash.as_bytes();
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

impl Debug for BusPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusPacket")
            .field("kind", &self.header.kind())
            .field("topic", &self.topic)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}
