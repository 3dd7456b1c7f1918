//! Typed view over the link-layer frames carried on the bus.
//!
//! Bus payloads are Ethernet II frames. Only the handful of IPv4 fields
//! the relay needs are extracted: the identification field (the covert
//! carrier), the protocol, the control flags and the IP payload (where
//! the marker is searched for).
//!
//! ## Layout
//!
//! ```text
//! Ethernet:  dst(6) src(6) ethertype(2)
//! IPv4:      ver/ihl(1) tos(1) total_len(2) identification(2)
//!            flags/frag(2) ttl(1) proto(1) checksum(2) src(4) dst(4)
//! ICMP echo: type(1) code(1) checksum(2) id(2) seq(2) data(..)
//! ```

use std::net::Ipv4Addr;

use bytes::Bytes;

use crate::error::FrameError;
use crate::flags::Ipv4Flags;

// ── Constants ────────────────────────────────────────────────────

/// Ethernet II header length.
pub const ETH_HEADER_LEN: usize = 14;
/// Ethertype for IPv4.
pub const ETHERTYPE_IPV4: u16 = 0x0800;
/// Minimum IPv4 header length (IHL = 5).
pub const IPV4_MIN_HEADER_LEN: usize = 20;
/// IP protocol number for ICMP.
pub const IPPROTO_ICMP: u8 = 1;
/// ICMP echo header length.
pub const ICMP_HEADER_LEN: usize = 8;

const IP_ID_OFFSET: usize = 4;
const IP_CHECKSUM_OFFSET: usize = 10;

// ── Frame ────────────────────────────────────────────────────────

/// An owned link-layer frame as received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
}

impl Frame {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Hand the buffer back for publishing without copying.
    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.data)
    }

    /// Interpret the frame as Ethernet + IPv4.
    pub fn parse(&self) -> Result<ParsedFrame<'_>, FrameError> {
        ParsedFrame::parse(&self.data)
    }

    /// Whether the frame carries a parseable IPv4 header.
    pub fn has_ip_header(&self) -> bool {
        self.parse().is_ok()
    }

    /// Overwrite the IPv4 identification field and refresh the header
    /// checksum so the frame stays valid on the wire.
    pub fn set_identification(&mut self, id: u16) -> Result<(), FrameError> {
        let (ip_offset, header_len) = {
            let parsed = self.parse()?;
            (parsed.ip_offset, parsed.header_len)
        };
        let header = &mut self.data[ip_offset..ip_offset + header_len];
        header[IP_ID_OFFSET..IP_ID_OFFSET + 2].copy_from_slice(&id.to_be_bytes());
        header[IP_CHECKSUM_OFFSET..IP_CHECKSUM_OFFSET + 2].copy_from_slice(&[0, 0]);
        let checksum = internet_checksum(header);
        header[IP_CHECKSUM_OFFSET..IP_CHECKSUM_OFFSET + 2].copy_from_slice(&checksum.to_be_bytes());
        Ok(())
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&[u8]> for Frame {
    fn from(data: &[u8]) -> Self {
        Self::new(data.to_vec())
    }
}

// ── ParsedFrame ──────────────────────────────────────────────────

/// The IPv4 fields the relay consumes, borrowed from a [`Frame`].
#[derive(Debug, Clone, Copy)]
pub struct ParsedFrame<'a> {
    pub identification: u16,
    pub protocol: u8,
    pub flags: Ipv4Flags,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    /// Offset of the IPv4 header inside the frame.
    pub ip_offset: usize,
    /// IPv4 header length in bytes (IHL * 4).
    pub header_len: usize,
    payload: &'a [u8],
}

impl<'a> ParsedFrame<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, FrameError> {
        if data.len() < ETH_HEADER_LEN {
            return Err(FrameError::TruncatedEthernet(data.len()));
        }
        let ethertype = u16::from_be_bytes([data[12], data[13]]);
        if ethertype != ETHERTYPE_IPV4 {
            return Err(FrameError::NotIpv4(ethertype));
        }

        let ip = &data[ETH_HEADER_LEN..];
        if ip.len() < IPV4_MIN_HEADER_LEN {
            return Err(FrameError::TruncatedIp {
                need: IPV4_MIN_HEADER_LEN,
                have: ip.len(),
            });
        }
        let version = ip[0] >> 4;
        if version != 4 {
            return Err(FrameError::BadVersion(version));
        }
        let ihl = ip[0] & 0x0F;
        let header_len = ihl as usize * 4;
        if header_len < IPV4_MIN_HEADER_LEN {
            return Err(FrameError::BadHeaderLength(ihl));
        }
        if ip.len() < header_len {
            return Err(FrameError::TruncatedIp {
                need: header_len,
                have: ip.len(),
            });
        }

        // Trailing link-layer padding is excluded when total length is sane.
        let total_len = u16::from_be_bytes([ip[2], ip[3]]) as usize;
        let end = if total_len >= header_len && total_len <= ip.len() {
            total_len
        } else {
            ip.len()
        };

        Ok(Self {
            identification: u16::from_be_bytes([ip[4], ip[5]]),
            protocol: ip[9],
            flags: Ipv4Flags::from_word(u16::from_be_bytes([ip[6], ip[7]])),
            source: Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15]),
            destination: Ipv4Addr::new(ip[16], ip[17], ip[18], ip[19]),
            ip_offset: ETH_HEADER_LEN,
            header_len,
            payload: &ip[header_len..end],
        })
    }

    /// Bytes following the IPv4 header.
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// ICMP data after the echo header, or `None` for non-ICMP frames.
    pub fn icmp_data(&self) -> Option<&'a [u8]> {
        if self.protocol != IPPROTO_ICMP || self.payload.len() < ICMP_HEADER_LEN {
            return None;
        }
        Some(&self.payload[ICMP_HEADER_LEN..])
    }

    /// Whether the searchable data contains `marker`: the ICMP data for
    /// ICMP frames, the whole IP payload otherwise.
    pub fn contains_marker(&self, marker: &[u8]) -> bool {
        let data = if self.protocol == IPPROTO_ICMP {
            self.icmp_data().unwrap_or(&[])
        } else {
            self.payload
        };
        contains_subslice(data, marker)
    }
}

/// Naive substring search; markers are short.
pub fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// RFC 1071 ones-complement checksum.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        sum += u16::from_be_bytes([pair[0], pair[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

// ── FrameBuilder ─────────────────────────────────────────────────

/// Builds Ethernet + IPv4 + ICMP echo-request frames.
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    src_mac: [u8; 6],
    dst_mac: [u8; 6],
    source: Ipv4Addr,
    destination: Ipv4Addr,
    identification: u16,
    flags: Ipv4Flags,
    ttl: u8,
    icmp_id: u16,
    icmp_seq: u16,
    payload: Vec<u8>,
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self {
            src_mac: [0x02, 0, 0, 0, 0, 0x01],
            dst_mac: [0x02, 0, 0, 0, 0, 0x02],
            source: Ipv4Addr::new(10, 0, 0, 11),
            destination: Ipv4Addr::new(10, 0, 0, 21),
            identification: 0,
            flags: Ipv4Flags::empty(),
            ttl: 64,
            icmp_id: 0,
            icmp_seq: 0,
            payload: Vec::new(),
        }
    }
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(mut self, addr: Ipv4Addr) -> Self {
        self.source = addr;
        self
    }

    pub fn destination(mut self, addr: Ipv4Addr) -> Self {
        self.destination = addr;
        self
    }

    pub fn identification(mut self, id: u16) -> Self {
        self.identification = id;
        self
    }

    pub fn flags(mut self, flags: Ipv4Flags) -> Self {
        self.flags = flags;
        self
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn echo(mut self, id: u16, seq: u16) -> Self {
        self.icmp_id = id;
        self.icmp_seq = seq;
        self
    }

    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn build(&self) -> Frame {
        let icmp_len = ICMP_HEADER_LEN + self.payload.len();
        let total_len = IPV4_MIN_HEADER_LEN + icmp_len;
        let mut data = Vec::with_capacity(ETH_HEADER_LEN + total_len);

        // Ethernet
        data.extend_from_slice(&self.dst_mac);
        data.extend_from_slice(&self.src_mac);
        data.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

        // IPv4
        let mut ip = [0u8; IPV4_MIN_HEADER_LEN];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        ip[4..6].copy_from_slice(&self.identification.to_be_bytes());
        ip[6..8].copy_from_slice(&self.flags.bits().to_be_bytes());
        ip[8] = self.ttl;
        ip[9] = IPPROTO_ICMP;
        ip[12..16].copy_from_slice(&self.source.octets());
        ip[16..20].copy_from_slice(&self.destination.octets());
        let checksum = internet_checksum(&ip);
        ip[10..12].copy_from_slice(&checksum.to_be_bytes());
        data.extend_from_slice(&ip);

        // ICMP echo request
        let mut icmp = Vec::with_capacity(icmp_len);
        icmp.extend_from_slice(&[8, 0, 0, 0]);
        icmp.extend_from_slice(&self.icmp_id.to_be_bytes());
        icmp.extend_from_slice(&self.icmp_seq.to_be_bytes());
        icmp.extend_from_slice(&self.payload);
        let checksum = internet_checksum(&icmp);
        icmp[2..4].copy_from_slice(&checksum.to_be_bytes());
        data.extend_from_slice(&icmp);

        Frame::new(data)
    }
}

// ── Tests ────────────────────────────────────────────────────────
