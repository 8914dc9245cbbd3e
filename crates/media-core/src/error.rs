use thiserror::Error;

/// Result type for media operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for media stream operations
#[derive(Debug, Error)]
pub enum Error {
    /// Inconsistent or invalid stream configuration
    #[error("Invalid stream configuration: {0}")]
    InvalidConfig(String),

    /// No codec registered for the negotiated format
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// Codec failure
    #[error("Codec error: {0}")]
    Codec(String),

    /// Transport attach or send failure
    #[error("Transport error: {0}")]
    Transport(#[from] streamcore_rtp::Error),

    /// Character is not a DTMF symbol
    #[error("Invalid DTMF digit: {0:?}")]
    InvalidDigit(char),

    /// Digit string would overflow the transmit queue
    #[error("Too many DTMF digits: {requested} requested with {queued} queued (limit {limit})")]
    TooManyDigits {
        requested: usize,
        queued: usize,
        limit: usize,
    },

    /// The stream has no outgoing telephone-event payload type
    #[error("Telephone events were not negotiated for this stream")]
    NoTelephoneEvent,

    /// Frame does not match the port geometry
    #[error("Frame size mismatch: expected {expected} samples, got {actual}")]
    FrameSize { expected: usize, actual: usize },

    /// The stream has been destroyed
    #[error("Stream has been destroyed")]
    StreamDestroyed,

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::TooManyDigits { requested: 33, queued: 0, limit: 32 };
        assert_eq!(err.to_string(), "Too many DTMF digits: 33 requested with 0 queued (limit 32)");

        let err: Error = streamcore_rtp::Error::NotReady.into();
        assert!(matches!(err, Error::Transport(streamcore_rtp::Error::NotReady)));
        assert_eq!(Error::InvalidDigit('x').to_string(), "Invalid DTMF digit: 'x'");
    }
}
