//! The two unidirectional halves of a stream
//!
//! Each channel owns its codec instance and a pause flag. The encode
//! channel runs on the producer's clock, the decode channel's receive side
//! on the transport's thread and its playout side on the consumer's clock.

pub mod decode;
pub mod encode;

pub use decode::DecodeChannel;
pub use encode::EncodeChannel;

use serde::Serialize;

/// Transmit direction counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EncodeStat {
    /// Media packets handed to the transport
    pub packets_sent: u64,
    /// Telephone-event packets handed to the transport
    pub dtmf_packets: u64,
    /// Frames discarded while paused
    pub dropped_paused: u64,
    /// Frames the codec failed to encode
    pub encode_errors: u64,
    /// Packets the transport refused
    pub send_errors: u64,
}

/// Receive direction counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecodeStat {
    /// Datagrams offered by the transport
    pub packets_received: u64,
    /// Datagrams that did not parse as RTP
    pub malformed: u64,
    /// Media with an unexpected payload type
    pub pt_mismatch: u64,
    /// Media dropped while paused
    pub dropped_paused: u64,
    /// Frames decoded
    pub frames_decoded: u64,
    /// Frames synthesized for missing or undecodable packets
    pub frames_concealed: u64,
    /// Payloads the codec rejected
    pub decode_errors: u64,
    /// Telephone events recognized
    pub dtmf_events: u64,
    /// Received digits dropped because the queue was full
    pub dtmf_overflow: u64,
    /// Times the peer's SSRC changed
    pub ssrc_changes: u64,
}
