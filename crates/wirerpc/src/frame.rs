//! # Protocol Frames
//!
//! Defines the structure of the RPC envelope (Call vs Reply).
//!
//! ## Invariants
//! - **One pair per connection**: a caller writes exactly one `Call` and reads
//!   exactly one `Reply` carrying the same `seq`.
//! - **Forward Compatibility**: Unknown header fields are ignored on decode.
//! - **Errors are data**: a failed remote invocation is a `Reply` whose status
//!   is `Err(message)`, not a protocol error.

use serde::Deserialize;
use serde::Serialize;

use crate::codec::Payload;
use crate::error::Error;
use crate::error::Result;

/// An outbound (or freshly decoded) call request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallFrame {
    pub seq: u64,
    /// Service type name, the part before the `.` of a qualified name.
    pub service: String,
    pub method: String,
    pub args: Payload,
}

impl CallFrame {
    pub fn new(
        seq: u64,
        service: impl Into<String>,
        method: impl Into<String>,
        args: Payload,
    ) -> Self {
        Self {
            seq,
            service: service.into(),
            method: method.into(),
            args,
        }
    }

    /// The `service.method` name this call addresses.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.service, self.method)
    }
}

/// The answer to a `CallFrame`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub seq: u64,
    /// The result of the call.
    /// - `Ok(Payload)`: the handler's reply value.
    /// - `Err(String)`: the error flag is set; the string is the remote message.
    pub status: std::result::Result<Payload, String>,
}

impl ReplyFrame {
    pub fn ok(seq: u64, reply: Payload) -> Self {
        Self { seq, status: Ok(reply) }
    }

    pub fn err(seq: u64, message: impl Into<String>) -> Self {
        Self { seq, status: Err(message.into()) }
    }

    pub fn is_error(&self) -> bool {
        self.status.is_err()
    }
}

/// Top-level frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Call(CallFrame),
    Reply(ReplyFrame),
}

impl Frame {
    pub fn seq(&self) -> u64 {
        match self {
            Frame::Call(call) => call.seq,
            Frame::Reply(reply) => reply.seq,
        }
    }

    /// Unwraps a call, failing if the peer sent something else.
    pub fn into_call(self) -> Result<CallFrame> {
        match self {
            Frame::Call(call) => Ok(call),
            Frame::Reply(_) => Err(Error::ProtocolViolation(
                "Expected Call frame, received Reply".into(),
            )),
        }
    }

    /// Unwraps a reply and checks that it answers `expected_seq`.
    pub fn into_reply(self, expected_seq: u64) -> Result<ReplyFrame> {
        match self {
            Frame::Reply(reply) if reply.seq == expected_seq => Ok(reply),
            Frame::Reply(reply) => Err(Error::ProtocolViolation(format!(
                "Sequence mismatch: expected {}, received {}",
                expected_seq, reply.seq
            ))),
            Frame::Call(_) => Err(Error::ProtocolViolation(
                "Expected Reply frame, received Call".into(),
            )),
        }
    }
}

impl From<CallFrame> for Frame {
    fn from(call: CallFrame) -> Self {
        Frame::Call(call)
    }
}

impl From<ReplyFrame> for Frame {
    fn from(reply: ReplyFrame) -> Self {
        Frame::Reply(reply)
    }
}

/// Extracts just the sequence number from a frame body.
///
/// Useful for answering a request whose full decoding failed.
pub fn decode_seq(body: &[u8]) -> Result<u64> {
    #[derive(Deserialize)]
    struct SeqOnly {
        seq: u64,
    }

    #[derive(Deserialize)]
    enum Envelope {
        Call(SeqOnly),
        Reply(SeqOnly),
    }

    match serde_json::from_slice::<Envelope>(body)? {
        Envelope::Call(s) | Envelope::Reply(s) => Ok(s.seq),
    }
}
