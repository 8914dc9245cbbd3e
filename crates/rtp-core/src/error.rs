use std::io;
use thiserror::Error;

/// Error type for RTP operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Error when encoding a packet
    #[error("Failed to encode RTP packet: {0}")]
    EncodeError(String),

    /// Invalid packet format
    #[error("Invalid RTP packet format: {0}")]
    InvalidPacket(String),

    /// Buffer too small
    #[error("Buffer too small for RTP packet: need {required} but have {available}")]
    BufferTooSmall {
        required: usize,
        available: usize,
    },

    /// The transport has no stream attached
    #[error("Transport not ready: no stream attached")]
    NotReady,

    /// The transport already serves a stream
    #[error("Transport already attached to a stream")]
    AlreadyAttached,

    /// IO error when sending/receiving packets
    #[error("IO error: {0}")]
    IoError(String),

    /// RTCP error
    #[error("RTCP error: {0}")]
    RtcpError(String),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err.to_string())
    }
}
