//! Channel codec: text message ↔ sequence of tagged frames.
//!
//! Each character rides in the IPv4 identification field of one ICMP
//! frame whose payload is `<marker>:<char>`. The marker lets the
//! receiver pick covert frames out of ordinary traffic, and lets the
//! relay's detector recognise them.

use std::ops::Range;

use crate::error::IpidError;
use crate::frame::{Frame, contains_subslice};

/// Marker embedded in every tagged payload.
pub const DEFAULT_MARKER: &[u8] = b"CovertChannel";

/// Identification values the receiver maps back to characters.
pub const PRINTABLE_IDS: Range<u16> = 32..127;

/// Whether an identification value falls in the printable ASCII range.
pub fn is_printable_id(id: u16) -> bool {
    PRINTABLE_IDS.contains(&id)
}

/// One character of a covert message, ready to be put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CovertSymbol {
    pub identification: u16,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelCodec {
    marker: Vec<u8>,
}

impl Default for ChannelCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER)
    }
}

impl ChannelCodec {
    pub fn new(marker: impl Into<Vec<u8>>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn marker(&self) -> &[u8] {
        &self.marker
    }

    /// Split `message` into one symbol per character.
    ///
    /// Only ASCII fits in the single byte the receiver reads back.
    pub fn encode(&self, message: &str) -> Result<Vec<CovertSymbol>, IpidError> {
        message
            .chars()
            .map(|c| {
                if !c.is_ascii() {
                    return Err(IpidError::Unencodable(c));
                }
                let mut payload = Vec::with_capacity(self.marker.len() + 2);
                payload.extend_from_slice(&self.marker);
                payload.push(b':');
                payload.push(c as u8);
                Ok(CovertSymbol {
                    identification: c as u16,
                    payload,
                })
            })
            .collect()
    }

    /// Whether a payload carries the marker.
    pub fn is_tagged(&self, payload: &[u8]) -> bool {
        contains_subslice(payload, &self.marker)
    }

    /// Decode a finished stream of `(identification, payload)` pairs.
    pub fn decode<'a, I>(&self, frames: I) -> DecodeReport
    where
        I: IntoIterator<Item = (u16, &'a [u8])>,
    {
        let mut receiver = CovertReceiver::new(self.clone());
        for (id, payload) in frames {
            receiver.observe(id, payload);
        }
        receiver.into_report()
    }
}

// ── CovertReceiver ───────────────────────────────────────────────

/// What happened to one observed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Tagged frame with a printable identification.
    Accepted(char),
    /// Tagged frame whose identification left the printable range.
    Corrupted(u16),
    /// No marker in the payload.
    Ignored,
}

/// Result of decoding a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeReport {
    pub message: String,
    pub accepted: usize,
    pub corrupted: usize,
    pub ignored: usize,
}

/// Incremental decoder, characters concatenated in arrival order.
#[derive(Debug, Clone)]
pub struct CovertReceiver {
    codec: ChannelCodec,
    report: DecodeReport,
}

impl CovertReceiver {
    pub fn new(codec: ChannelCodec) -> Self {
        Self {
            codec,
            report: DecodeReport::default(),
        }
    }

    pub fn observe(&mut self, identification: u16, payload: &[u8]) -> Observation {
        if !self.codec.is_tagged(payload) {
            self.report.ignored += 1;
            return Observation::Ignored;
        }
        if is_printable_id(identification) {
            let c = identification as u8 as char;
            self.report.message.push(c);
            self.report.accepted += 1;
            Observation::Accepted(c)
        } else {
            self.report.corrupted += 1;
            Observation::Corrupted(identification)
        }
    }

    /// Observe a link-layer frame; non-IPv4 frames are ignored.
    pub fn observe_frame(&mut self, frame: &Frame) -> Observation {
        match frame.parse() {
            Ok(parsed) => self.observe(parsed.identification, parsed.payload()),
            Err(_) => {
                self.report.ignored += 1;
                Observation::Ignored
            }
        }
    }

    pub fn message(&self) -> &str {
        &self.report.message
    }

    pub fn report(&self) -> &DecodeReport {
        &self.report
    }

    pub fn into_report(self) -> DecodeReport {
        self.report
    }
}
