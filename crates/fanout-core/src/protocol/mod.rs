//! Protocol module containing connection addresses, payloads and the
//! offer/answer token codec.

pub mod address;
pub mod payload;
pub mod sequence;
pub mod session_description;

pub use address::{Address, AddressError, Protocol};
pub use payload::{Frame, FrameKind, Payload};
pub use sequence::SequenceCounter;
pub use session_description::{Base64JsonCodec, SessionCodec, SessionDescription, TokenError};
