//! WebRTC session descriptions and the token format that carries them.
//!
//! Browsers post their SDP offer to the server as an opaque token and get the
//! answer back the same way.  The token is the base64 encoding of the JSON
//! session description:
//!
//! ```text
//! {"type":"offer","sdp":"v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n..."}
//!   └── base64 ──> eyJ0eXBlIjoib2ZmZXIiLCJzZHAiOiJ2PTBcclxu...
//! ```
//!
//! The codec is a trait so deployments that exchange raw JSON (or anything
//! else) can swap it without touching the signaling hub.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while decoding or encoding a session-description token.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token is not valid base64.
    #[error("token is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The decoded bytes are not a JSON session description.
    #[error("token does not contain a session description: {0}")]
    Json(#[from] serde_json::Error),

    /// The description has the wrong type for where it was used.
    #[error("expected an {expected:?} description, got {actual:?}")]
    UnexpectedType { expected: SdpType, actual: SdpType },
}

/// SDP message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// An SDP offer or answer as exchanged with browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    /// Creates an offer.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Creates an answer.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Converts session descriptions to and from the tokens exchanged with clients.
pub trait SessionCodec: Send + Sync {
    /// Encodes a description into a token.
    fn encode(&self, description: &SessionDescription) -> Result<String, TokenError>;

    /// Decodes a token into a description.
    fn decode(&self, token: &str) -> Result<SessionDescription, TokenError>;

    /// Decodes a token and checks that it carries an offer.
    fn decode_offer(&self, token: &str) -> Result<SessionDescription, TokenError> {
        let description = self.decode(token)?;
        if description.sdp_type != SdpType::Offer {
            return Err(TokenError::UnexpectedType {
                expected: SdpType::Offer,
                actual: description.sdp_type,
            });
        }
        Ok(description)
    }
}

/// Base64 (standard alphabet, padded) over compact JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64JsonCodec;

impl SessionCodec for Base64JsonCodec {
    fn encode(&self, description: &SessionDescription) -> Result<String, TokenError> {
        let json = serde_json::to_vec(description)?;
        Ok(STANDARD.encode(json))
    }

    fn decode(&self, token: &str) -> Result<SessionDescription, TokenError> {
        let json = STANDARD.decode(token.trim())?;
        Ok(serde_json::from_slice(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_produces_base64_json() {
        // Arrange
        let codec = Base64JsonCodec;
        let answer = SessionDescription::answer("v=0");

        // Act
        let token = codec.encode(&answer).expect("encode must succeed");
        let raw = STANDARD.decode(&token).expect("token must be base64");

        // Assert
        assert_eq!(
            String::from_utf8(raw).expect("utf8"),
            r#"{"type":"answer","sdp":"v=0"}"#
        );
    }

    #[test]
    fn test_decode_browser_offer() {
        let token = STANDARD.encode(r#"{"type":"offer","sdp":"v=0\r\n"}"#);

        let offer = Base64JsonCodec.decode_offer(&token).expect("must decode");

        assert_eq!(offer, SessionDescription::offer("v=0\r\n"));
    }

    #[test]
    fn test_decode_tolerates_surrounding_whitespace() {
        let token = format!(" {}\n", STANDARD.encode(r#"{"type":"offer","sdp":"x"}"#));

        assert!(Base64JsonCodec.decode(&token).is_ok());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Base64JsonCodec.decode("not base64!"),
            Err(TokenError::Base64(_))
        ));
        assert!(matches!(
            Base64JsonCodec.decode(&STANDARD.encode("[1,2]")),
            Err(TokenError::Json(_))
        ));
    }

    #[test]
    fn test_decode_offer_rejects_answers() {
        let token = Base64JsonCodec
            .encode(&SessionDescription::answer("v=0"))
            .expect("encode");

        match Base64JsonCodec.decode_offer(&token) {
            Err(TokenError::UnexpectedType { expected, actual }) => {
                assert_eq!(expected, SdpType::Offer);
                assert_eq!(actual, SdpType::Answer);
            }
            other => panic!("expected UnexpectedType, got {other:?}"),
        }
    }
}
