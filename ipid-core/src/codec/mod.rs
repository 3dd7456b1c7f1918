//! `tokio_util` codec framing [`BusPacket`]s over a byte stream.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::IpidError;
use crate::header::{BusHeader, HEADER_SIZE};
use crate::packet::{BusPacket, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE, MAX_TOPIC_LEN};

#[derive(Debug, Default, Clone, Copy)]
pub struct BusCodec;

impl Decoder for BusCodec {
    type Item = BusPacket;
    type Error = IpidError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = BusHeader::from_bytes(&src[..HEADER_SIZE])?;
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

        let frame_len = HEADER_SIZE + header.body_length();
        if frame_len > MAX_FRAME_SIZE {
            return Err(IpidError::PayloadTooLarge {
                size: frame_len,
                max: MAX_FRAME_SIZE,
            });
        }
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(frame_len);
        BusPacket::from_bytes(&frame).map(Some)
    }
}

impl Encoder<BusPacket> for BusCodec {
    type Error = IpidError;

    fn encode(&mut self, item: BusPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.encoded_len());
        dst.extend_from_slice(&item.to_bytes());
        Ok(())
    }
}
