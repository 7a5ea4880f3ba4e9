//! Network-layer error types.

/// A frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolDecodeError {
    /// Fewer bytes than the frame needs.
    #[error("truncated frame: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required.
        needed: usize,
        /// Bytes present.
        available: usize,
    },

    /// The declared frame length is shorter than a header.
    #[error("invalid frame length {0}")]
    InvalidLength(u32),

    /// The declared frame length exceeds the configured maximum.
    #[error("frame of {length} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Declared length.
        length: u32,
        /// Configured maximum.
        max: u32,
    },

    /// The message type is not one of the four CRDT operations.
    #[error("unknown message type {0}")]
    UnknownMessageType(u32),

    /// Header length and data length disagree.
    #[error("frame length {length} does not match data length {data_length}")]
    DataLengthMismatch {
        /// Declared frame length.
        length: u32,
        /// Declared data length.
        data_length: u32,
    },

    /// A field that must be zero for this message type is not.
    #[error("field `{field}` must be zero for {message_type}")]
    NonZeroField {
        /// Field name.
        field: &'static str,
        /// Message type name.
        message_type: &'static str,
    },
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// A frame failed to decode.
    #[error("protocol error: {0}")]
    Decode(#[from] ProtocolDecodeError),

    /// The peer end of the transport is gone.
    #[error("transport `{0}` is disconnected")]
    Disconnected(String),

    /// An I/O failure reported by a transport implementation.
    #[error("transport I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for NetError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
