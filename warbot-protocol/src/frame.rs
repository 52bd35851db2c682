//! Binary frame format for the game wire protocol.
//!
//! Frame layout (12 bytes header + optional tag and payload), integers big-endian:
//!
//! ```text
//! +------------+----------+----------------+
//! | request_id | sequence | encoded_length |
//! |  4 bytes   | 4 bytes  |    4 bytes     |
//! +------------+----------+----------------+
//! | format tag | payload                   |
//! |  1 byte    | encoded_length - 1 bytes  |
//! +------------+---------------------------+
//! ```
//!
//! An `encoded_length` of zero means the frame carries neither tag nor payload.
//! Otherwise the tag and payload are masked with a seed derived from the
//! sequence number (see [`obfuscate`]). The mask only deters casual inspection;
//! it is not encryption.

use crate::error::ProtocolError;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the fixed frame header in bytes (4+4+4 = 12).
pub const FRAME_HEADER_SIZE: usize = 12;

/// Plaintext format tag for a UTF-8 JSON payload.
pub const FORMAT_JSON: u8 = 0;

/// Plaintext format tag for a protobuf payload (recognized, never parsed).
pub const FORMAT_PROTOBUF: u8 = 1;

/// Payload format carried in the (unmasked) tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Json,
    Protobuf,
    Unknown(u8),
}

impl PayloadFormat {
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            FORMAT_JSON => PayloadFormat::Json,
            FORMAT_PROTOBUF => PayloadFormat::Protobuf,
            other => PayloadFormat::Unknown(other),
        }
    }

    pub fn tag(&self) -> u8 {
        match self {
            PayloadFormat::Json => FORMAT_JSON,
            PayloadFormat::Protobuf => FORMAT_PROTOBUF,
            PayloadFormat::Unknown(tag) => *tag,
        }
    }
}

/// Returns the mask seed for a sequence number.
pub fn mask_seed(sequence: i32) -> u32 {
    (sequence as u32) | 0x0101_0101
}

/// Applies the sequence-keyed XOR mask to a format tag and payload in place.
///
/// The tag is masked with the most significant seed byte. Payload byte `i`
/// is masked with the seed byte shifted right by `8 * (3 - (i + 1) % 4)`
/// bits. Applying the mask twice with the same sequence restores the input.
pub fn obfuscate(sequence: i32, tag: &mut u8, payload: &mut [u8]) {
    let seed = mask_seed(sequence).to_be_bytes();
    *tag ^= seed[0];
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= seed[(i + 1) % 4];
    }
}

/// A parsed wire frame with its payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message kind (see [`crate::ids::RequestId`]).
    pub request_id: i32,
    /// Per-connection sequence number used for correlation.
    pub sequence: i32,
    /// Payload format.
    pub format: PayloadFormat,
    /// Plaintext payload. Empty for header-only frames.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a JSON-tagged frame.
    pub fn new(request_id: i32, sequence: i32, payload: Bytes) -> Self {
        Self {
            request_id,
            sequence,
            format: PayloadFormat::Json,
            payload,
        }
    }

    /// Creates a header-only frame (heartbeat or bare acknowledgment).
    pub fn empty(request_id: i32, sequence: i32) -> Self {
        Self::new(request_id, sequence, Bytes::new())
    }

    /// Encodes the frame into bytes, masking tag and payload.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let payload_len = self.payload.len();
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        if payload_len == 0 {
            let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE);
            buf.put_i32(self.request_id);
            buf.put_i32(self.sequence);
            buf.put_i32(0);
            return Ok(buf);
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 1 + payload_len);
        buf.put_i32(self.request_id);
        buf.put_i32(self.sequence);
        buf.put_i32(payload_len as i32 + 1);

        let mut tag = self.format.tag();
        let body_start = buf.len() + 1;
        buf.put_u8(0);
        buf.put_slice(&self.payload);
        obfuscate(self.sequence, &mut tag, &mut buf[body_start..]);
        buf[FRAME_HEADER_SIZE] = tag;

        Ok(buf)
    }

    /// Returns how many buffered bytes are needed before the next frame can
    /// be decoded: 12 while the header is incomplete, otherwise the header
    /// size plus the declared length.
    pub fn bytes_required(buf: &[u8]) -> Result<usize, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(FRAME_HEADER_SIZE);
        }

        let declared = i32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        if declared < 0 {
            return Err(ProtocolError::InvalidLength(declared));
        }
        let declared = declared as usize;
        if declared > MAX_PAYLOAD_SIZE + 1 {
            return Err(ProtocolError::FrameTooLarge {
                size: declared,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        Ok(FRAME_HEADER_SIZE + declared)
    }

    /// Decodes a frame from bytes.
    ///
    /// Returns `Ok(Some(frame))` and consumes exactly one frame if it is
    /// complete, `Ok(None)` without consuming anything if more data is
    /// needed, or `Err` if the header is malformed.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        let required = Self::bytes_required(buf)?;
        if buf.len() < required {
            return Ok(None);
        }

        let request_id = buf.get_i32();
        let sequence = buf.get_i32();
        let declared = buf.get_i32() as usize;

        if declared == 0 {
            return Ok(Some(Self::empty(request_id, sequence)));
        }

        let mut body = buf.split_to(declared);
        let mut tag = body[0];
        body.advance(1);
        obfuscate(sequence, &mut tag, &mut body);

        Ok(Some(Self {
            request_id,
            sequence,
            format: PayloadFormat::from_tag(tag),
            payload: body.freeze(),
        }))
    }
}
