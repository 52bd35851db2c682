//! # warbot-protocol
//!
//! Wire protocol spoken with the game server over a websocket.
//!
//! This crate provides:
//! - Binary framing with a 12-byte big-endian header
//! - The sequence-keyed XOR mask applied to the format tag and payload
//! - Buffered decoding of partially delivered frames
//! - Loosely-typed JSON documents with defaulted accessors
//! - The session record and the request-id catalog

pub mod codec;
pub mod document;
pub mod error;
pub mod frame;
pub mod ids;
pub mod message;
pub mod session;

pub use codec::{Decoder, Encoder};
pub use document::{Document, ValueExt};
pub use error::ProtocolError;
pub use frame::{obfuscate, Frame, PayloadFormat, FRAME_HEADER_SIZE};
pub use ids::RequestId;
pub use message::{Body, Message, Reply};
pub use session::Session;

/// Maximum frame payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;
