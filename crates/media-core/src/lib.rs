//! # Media stream engine
//!
//! `streamcore-media` moves audio between a local frame pipeline and a remote
//! peer over RTP. One [`MediaStream`] serves one negotiated media line and owns:
//!
//! - an encode channel (frames in, RTP out) and a decode channel (RTP in,
//!   frames out through an adaptive jitter buffer),
//! - the RTCP statistics engine for the session,
//! - RFC 2833 DTMF transmission and reception,
//! - a generic [`MediaPort`] through which applications push and pull frames.
//!
//! The network side is any [`streamcore_rtp::MediaTransport`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use streamcore_media::prelude::*;
//! use streamcore_rtp::LoopbackTransport;
//!
//! # fn main() -> streamcore_media::Result<()> {
//! let registry = CodecRegistry::with_defaults();
//! let (near, _far) = LoopbackTransport::pair();
//!
//! let info = StreamInfo::new(MediaDirection::SendReceive, near.peer_addr(), CodecInfo::pcmu())
//!     .with_event_payload_type(101);
//! let stream = MediaStream::create(&registry, info, near)?;
//! stream.start()?;
//!
//! let mut frame = AudioFrame::default();
//! stream.get_frame(&mut frame)?;
//! stream.dial_dtmf("123#")?;
//! # Ok(())
//! # }
//! ```

pub mod error;

pub mod buffer;
pub mod channel;
pub mod clock;
pub mod codec;
pub mod dtmf;
pub mod port;
pub mod stream;

pub use error::{Error, Result};

pub use buffer::jitter::{JitterBuffer, JitterBufferConfig, JitterBufferStats, JitterPull};
pub use channel::{DecodeStat, EncodeStat};
pub use clock::MasterPort;
pub use codec::{AudioCodec, CodecFactory, CodecInfo, CodecParam, CodecRegistry};
pub use port::{AudioFrame, FrameType, MediaPort, NullPort, PortInfo};
pub use stream::{
    JitterBufferSettings, MediaDirection, MediaStream, MediaType, PayloadTypePolicy, StreamInfo,
    StreamState,
};

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::{
        AudioFrame, CodecInfo, CodecParam, CodecRegistry, Error, FrameType, MasterPort,
        MediaDirection, MediaPort, MediaStream, MediaType, PortInfo, Result, StreamInfo,
    };
    pub use streamcore_rtp::{MediaTransport, RtcpStat};
}
