use std::io;
use thiserror::Error;

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Fatal protocol failures. Everything recoverable (stale acks, unknown
/// network ids, backlog pressure) is logged and counted instead of raised.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("bit stream error: {0}")]
    Io(#[from] io::Error),

    /// An ObjectState with network id 0 reached the codec. Zero is the
    /// "no state" sentinel and cannot appear in a valid message.
    #[error("attempted to serialize an empty object state")]
    EmptyState,

    /// The ack set fragmented into more ranges than the 8-bit count field
    /// can carry. The connection cannot produce a well-formed message.
    #[error("ack set fragmented into {0} ranges, protocol limit is 255")]
    AckRangeOverflow(usize),

    /// The ack header alone exceeds the datagram budget.
    #[error("message header of {header_bits} bits exceeds buffer of {buffer_bits} bits")]
    HeaderOverflow { header_bits: u64, buffer_bits: u64 },

    /// A frame could not be split to fit the configured buffer. Indicates
    /// an MTU misconfigured relative to the ack header overhead.
    #[error("frame of {frame_bits} bits cannot be split to fit {limit_bits} bits")]
    SplitImpossible { frame_bits: u64, limit_bits: u64 },

    /// `end_frame` was called with no open message; a prior invariant has
    /// already been violated.
    #[error("no open message")]
    NoOpenMessage,

    #[error("unknown message kind tag {0}")]
    UnknownMessageKind(u8),
}

impl ProtocolError {
    /// True for conditions that must tear down the connection.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ProtocolError::Io(_))
    }
}
