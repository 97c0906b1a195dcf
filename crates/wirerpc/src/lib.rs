//! # WireRPC
//!
//! A small, strict request/response protocol for registry-resolved calls.
//!
//! ## Architecture
//!
//! A conversation is one `Call` frame followed by one `Reply` frame on a
//! dedicated connection. Frames are length-prefixed JSON bodies, so any
//! serde-compatible argument or reply type can cross the wire as a `Payload`.
//!
//! - Call: `{seq, service, method, args}`
//! - Reply: `{seq, status: Ok(reply) | Err(message)}`

pub mod codec;
pub mod error;
pub mod frame;

pub use codec::MAX_FRAME_LEN;
pub use codec::Payload;
pub use codec::decode_body;
pub use codec::decode_frame;
pub use codec::encode_body;
pub use codec::encode_frame;
pub use codec::from_payload;
pub use codec::read_body;
pub use codec::read_frame;
pub use codec::to_payload;
pub use codec::write_frame;
pub use error::Error;
pub use error::Result;
pub use frame::CallFrame;
pub use frame::Frame;
pub use frame::ReplyFrame;
pub use frame::decode_seq;
