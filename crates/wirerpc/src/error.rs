//! # Error Definitions
//!
//! Failures of the wire protocol itself. These describe a broken conversation
//! (bad bytes, truncated streams, oversized frames), never a remote handler
//! returning an error; that travels inside a `ReplyFrame` as data.

/// Operational failures within the framing and codec layer.
#[derive(Debug, Clone)]
pub enum Error {
    /// The frame body could not be serialized or deserialized.
    Serialization(String),
    /// A frame declared (or would need) a body larger than `MAX_FRAME_LEN`.
    FrameTooLarge(usize),
    /// The byte stream ended in the middle of a frame.
    UnexpectedEnd,
    /// Underlying stream I/O failed.
    Io(String),
    /// The frame was well-formed but not the one the conversation expected.
    ProtocolViolation(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Self::FrameTooLarge(len) => write!(f, "Frame of {} bytes exceeds the frame limit", len),
            Self::UnexpectedEnd => write!(f, "Stream ended inside a frame"),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
            Self::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::UnexpectedEnd,
            _ => Self::Io(e.to_string()),
        }
    }
}

/// A specialized Result type for wire operations.
pub type Result<T> = std::result::Result<T, Error>;
