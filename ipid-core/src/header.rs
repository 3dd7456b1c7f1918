//! Fixed-size header prefixed to every bus message.
//!
//! ```text
//! magic:          u32  (4)   "IPB0"
//! checksum:       u32  (4)   blake3(body)[0..4], 0 for an empty body
//! kind:           u32  (4)   MessageKind discriminant
//! topic_length:   u32  (4)
//! payload_length: u32  (4)
//! ```
//!
//! All fields are little-endian.

use crate::error::IpidError;

pub const BUS_MAGIC: [u8; 4] = *b"IPB0";
pub const HEADER_SIZE: usize = 20;

pub type BusHeaderBytes = [u8; HEADER_SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusHeader {
    checksum: u32,
    kind: u32,
    topic_length: u32,
    payload_length: u32,
}

impl BusHeader {
    pub fn new(checksum: u32, kind: u32, topic_length: u32, payload_length: u32) -> Self {
        Self {
            checksum,
            kind,
            topic_length,
            payload_length,
        }
    }

    pub fn to_bytes(&self) -> BusHeaderBytes {
        let mut buf: BusHeaderBytes = [0; HEADER_SIZE];
        buf[0..4].copy_from_slice(&BUS_MAGIC);
        buf[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        buf[8..12].copy_from_slice(&self.kind.to_le_bytes());
        buf[12..16].copy_from_slice(&self.topic_length.to_le_bytes());
        buf[16..20].copy_from_slice(&self.payload_length.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IpidError> {
        if bytes.len() < HEADER_SIZE {
            return Err(IpidError::InvalidHeader("header shorter than 20 bytes"));
        }
        if bytes[0..4] != BUS_MAGIC {
            return Err(IpidError::InvalidMagic);
        }
        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        Ok(Self {
            checksum: word(4),
            kind: word(8),
            topic_length: word(12),
            payload_length: word(16),
        })
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn set_checksum(&mut self, checksum: u32) {
        self.checksum = checksum;
    }

    pub fn kind(&self) -> u32 {
        self.kind
    }

    pub fn topic_length(&self) -> usize {
        self.topic_length as usize
    }

    pub fn payload_length(&self) -> usize {
        self.payload_length as usize
    }

    /// Topic plus payload length.
    pub fn body_length(&self) -> usize {
        self.topic_length() + self.payload_length()
    }
}
