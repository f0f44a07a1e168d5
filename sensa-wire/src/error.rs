//! Error types for the wire protocol

/// Result type alias
pub type Result<T> = std::result::Result<T, WireError>;

/// Transport and decode failures on the collector link
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// I/O error on the underlying socket
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the stream before the declared length arrived
    #[error("data is incomplete: expected {expected} bytes, received {received}")]
    DataIncomplete {
        /// Bytes the frame declared
        expected: usize,
        /// Bytes actually read before EOF
        received: usize,
    },

    /// Peer closed the stream cleanly between frames
    #[error("connection closed by peer")]
    Closed,

    /// Declared frame length exceeds the configured limit
    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge {
        /// Declared length
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// Payload shorter than the 12-byte envelope
    #[error("truncated envelope: {0} bytes")]
    TruncatedEnvelope(usize),

    /// Envelope carries a type tag we do not know
    #[error("Unknown message type {0}")]
    UnknownMessageType(u32),

    /// Protobuf body failed to decode
    #[error("malformed message body: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Socket read or connect timed out
    #[error("operation timed out")]
    Timeout,

    /// Listener used before `start()` or after `stop()`
    #[error("listener is not bound")]
    NotListening,
}

impl WireError {
    /// True when the peer went away cleanly between frames.
    pub fn is_disconnect(&self) -> bool {
        match self {
            WireError::Closed => true,
            WireError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    /// True for failures of the message content rather than the transport.
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            WireError::TruncatedEnvelope(_)
                | WireError::UnknownMessageType(_)
                | WireError::Decode(_)
        )
    }
}
