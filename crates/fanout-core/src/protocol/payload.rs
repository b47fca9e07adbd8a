//! Outbound payloads and the frames they resolve into.
//!
//! Callers hand the hub a [`Payload`]: text, raw bytes, or a JSON value.
//! The hub resolves it exactly once into a [`Frame`] at the send call, and
//! that frame is then cloned (a reference-count bump, thanks to [`Bytes`])
//! into every shard and connection the message fans out to.

use bytes::Bytes;

/// What a caller wants to send.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// UTF-8 text, written as a text frame.
    Text(String),
    /// Opaque bytes, written as a binary frame.
    Binary(Bytes),
    /// A JSON document, serialised and written as a text frame.
    Json(serde_json::Value),
}

/// How a frame is written on transports that distinguish text from binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
}

/// A resolved, ready-to-write message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub body: Bytes,
}

impl Frame {
    /// Creates a text frame.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Text,
            body: Bytes::from(body.into()),
        }
    }

    /// Creates a binary frame.
    pub fn binary(body: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Binary,
            body: body.into(),
        }
    }

    /// Returns the body as text if it is valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Number of body bytes.
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Returns `true` if the body is empty.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

impl Payload {
    /// Resolves the payload into a frame.
    pub fn into_frame(self) -> Frame {
        match self {
            Payload::Text(text) => Frame::text(text),
            Payload::Binary(bytes) => Frame::binary(bytes),
            // `Value`'s Display impl is its compact JSON serialisation and
            // cannot fail, unlike `serde_json::to_vec` on arbitrary types.
            Payload::Json(value) => Frame::text(value.to_string()),
        }
    }
}

impl From<Payload> for Frame {
    fn from(payload: Payload) -> Self {
        payload.into_frame()
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(bytes))
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::Binary(Bytes::copy_from_slice(bytes))
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Binary(bytes)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}
