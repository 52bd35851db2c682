//! Message and reply envelopes.

use crate::document::{Document, ValueExt};
use crate::frame::{Frame, PayloadFormat};
use crate::ids::RequestId;
use bytes::Bytes;

/// Reply status the server uses for application-level failures.
pub const STATUS_ERROR: i64 = 3;

/// Decoded body of a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Header-only frame.
    Empty,
    /// JSON payload. Unparsable JSON decodes as an empty document.
    Document(Document),
    /// Payload in a format this client does not interpret.
    Unsupported(PayloadFormat),
}

/// A request or response on the game connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub request_id: i32,
    pub sequence: i32,
    pub body: Body,
}

impl Message {
    pub fn new(request_id: RequestId, sequence: i32, document: Document) -> Self {
        Self {
            request_id: request_id.value(),
            sequence,
            body: Body::Document(document),
        }
    }

    /// Builds the wire frame for this message.
    pub fn to_frame(&self) -> Frame {
        match &self.body {
            Body::Document(doc) => {
                Frame::new(self.request_id, self.sequence, Bytes::from(doc.to_vec()))
            }
            Body::Empty | Body::Unsupported(_) => Frame::empty(self.request_id, self.sequence),
        }
    }

    /// Interprets a decoded frame.
    pub fn from_frame(frame: Frame) -> Self {
        let body = if frame.payload.is_empty() {
            Body::Empty
        } else {
            match frame.format {
                PayloadFormat::Json => Body::Document(Document::from_slice_lossy(&frame.payload)),
                other => Body::Unsupported(other),
            }
        };
        Self {
            request_id: frame.request_id,
            sequence: frame.sequence,
            body,
        }
    }

    pub fn kind(&self) -> RequestId {
        RequestId(self.request_id)
    }

    /// Unwraps the server's reply envelope.
    ///
    /// Returns `None` for payloads in an unsupported format.
    pub fn into_reply(self) -> Option<Reply> {
        let envelope = match self.body {
            Body::Empty => Document::new(),
            Body::Document(doc) => doc,
            Body::Unsupported(_) => return None,
        };

        let server_time_ms = envelope.get("t").as_i64();
        let status = envelope.get("s").int();
        let mut data = Document::from_slice_lossy(envelope.get("d").text().as_bytes());
        if data.is_empty() {
            data = envelope;
        }

        Some(Reply {
            request_id: self.request_id,
            sequence: self.sequence,
            server_time_ms,
            status,
            data,
        })
    }
}

/// A reply from the server with its envelope removed.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub request_id: i32,
    pub sequence: i32,
    /// Server clock in milliseconds, when the envelope carried one.
    pub server_time_ms: Option<i64>,
    pub status: i64,
    /// The reply document.
    pub data: Document,
}

impl Reply {
    /// Returns whether the server reported an application error.
    pub fn is_error(&self) -> bool {
        self.status == STATUS_ERROR || self.request_id == RequestId::ERROR.value()
    }

    pub fn kind(&self) -> RequestId {
        RequestId(self.request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_roundtrip() {
        for doc in [Document::new(), Document::from(json!({"a": 1, "b": [true, "x"]}))] {
            let msg = Message::new(RequestId::LOGIN, 12, doc);
            let mut buf = msg.to_frame().encode().unwrap();
            let frame = Frame::decode(&mut buf).unwrap().unwrap();
            assert_eq!(Message::from_frame(frame), msg);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_reply_unwraps_inner_document() {
        let envelope = json!({
            "t": 1_700_000_000_123i64,
            "s": 0,
            "d": "{\"username\":\"bob\",\"k\":12}",
        });
        let msg = Message::new(RequestId::LOGIN, 1, Document::from(envelope));
        let reply = msg.into_reply().unwrap();

        assert_eq!(reply.server_time_ms, Some(1_700_000_000_123));
        assert!(!reply.is_error());
        assert_eq!(reply.data.get("username").text(), "bob");
        assert_eq!(reply.data.get("k").int(), 12);
    }

    #[test]
    fn test_reply_falls_back_to_envelope() {
        let msg = Message::new(RequestId::PUSH_RESOURCE, 0, Document::from(json!({"coin": 5})));
        let reply = msg.into_reply().unwrap();
        assert_eq!(reply.server_time_ms, None);
        assert_eq!(reply.data.get("coin").int(), 5);
    }

    #[test]
    fn test_reply_error_forms() {
        let msg = Message::new(RequestId::GET_ORDER, 4, Document::from(json!({"s": 3})));
        assert!(msg.into_reply().unwrap().is_error());

        let msg = Message::new(RequestId::ERROR, 4, Document::from(json!({"s": 0})));
        assert!(msg.into_reply().unwrap().is_error());
    }

    #[test]
    fn test_unsupported_has_no_reply() {
        let mut frame = Frame::new(7, 7, Bytes::from_static(b"\x01\x02"));
        frame.format = PayloadFormat::Protobuf;
        let msg = Message::from_frame(frame);
        assert_eq!(msg.body, Body::Unsupported(PayloadFormat::Protobuf));
        assert!(msg.into_reply().is_none());
    }
}
