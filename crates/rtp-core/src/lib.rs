//! RTP core library for the streamcore media stack
//!
//! This crate provides the wire formats and network plumbing a media stream
//! needs below the codec layer:
//!
//! - `packet`: RTP and RTCP packet definitions and processing
//! - `payload`: payload formats that are not codecs (RFC 2833 telephone events)
//! - `stats`: RTCP statistics engine (jitter, loss, round-trip time, reports)
//! - `time`: RTP timestamp and clock helpers
//! - `transport`: the transport contract and its UDP and loopback variants

mod error;

pub mod packet;
pub mod payload;
pub mod stats;
pub mod time;
pub mod transport;

pub use error::Error;

pub use packet::{RtpHeader, RtpPacket};
pub use packet::rtcp::{
    NtpTimestamp, RtcpGoodbye, RtcpPacket, RtcpReceiverReport, RtcpReportBlock,
    RtcpSenderReport, RtcpSourceDescription,
};
pub use payload::telephone_event::TelephoneEvent;
pub use stats::{RtcpConfig, RtcpEngine, RtcpStat};
pub use transport::{
    LoopbackTransport, MediaTransport, RtcpCallback, RtpCallback, UdpMediaTransport,
    UdpTransportConfig,
};

/// The default maximum size for RTP packets in bytes
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1500;

/// Typedef for RTP timestamp values
pub type RtpTimestamp = u32;

/// Typedef for RTP sequence numbers
pub type RtpSequenceNumber = u16;

/// Typedef for RTP synchronization source identifier
pub type RtpSsrc = u32;

/// Typedef for RTP contributing source identifier
pub type RtpCsrc = u32;

/// Result type for RTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Returns true when `a` comes before `b` in 16-bit modular sequence space.
pub fn seq_before(a: RtpSequenceNumber, b: RtpSequenceNumber) -> bool {
    a != b && b.wrapping_sub(a) < 0x8000
}

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::{
        Error, MediaTransport, NtpTimestamp, Result, RtcpEngine, RtcpPacket, RtcpStat,
        RtpCsrc, RtpHeader, RtpPacket, RtpSequenceNumber, RtpSsrc, RtpTimestamp,
        TelephoneEvent,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_before_wraparound() {
        assert!(seq_before(1, 2));
        assert!(!seq_before(2, 1));
        assert!(!seq_before(7, 7));

        // 65535 -> 0 is forward progress
        assert!(seq_before(65535, 0));
        assert!(seq_before(65000, 10));
        assert!(!seq_before(10, 65000));
    }
}
