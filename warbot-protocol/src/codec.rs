//! Encoder and decoder for game messages.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::message::Message;
use bytes::BytesMut;

/// Encodes messages into masked frames.
pub struct Encoder;

impl Encoder {
    /// Encodes a message into a frame.
    pub fn encode_message(message: &Message) -> Result<BytesMut, ProtocolError> {
        message.to_frame().encode()
    }
}

/// Accumulates transport chunks and decodes complete frames.
pub struct Decoder {
    buffer: BytesMut,
    /// Bytes needed before another decode attempt can succeed.
    required: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            required: 0,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        if self.buffer.len() < self.required {
            return Ok(None);
        }
        self.required = Frame::bytes_required(&self.buffer)?;
        let frame = Frame::decode(&mut self.buffer)?;
        if frame.is_some() {
            self.required = 0;
        }
        Ok(frame)
    }

    /// Attempts to decode the next message from the buffer.
    pub fn decode_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        Ok(self.decode_frame()?.map(Message::from_frame))
    }

    /// Returns the number of bytes buffered before the next frame can decode.
    pub fn required(&self) -> usize {
        self.required
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.required = 0;
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
