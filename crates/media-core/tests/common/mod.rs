//! Helpers shared by the stream scenario tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::{Mutex, RwLock};

use streamcore_media::codec::g711::linear_to_ulaw;
use streamcore_media::{CodecInfo, CodecRegistry, MediaDirection, MediaStream, StreamInfo};
use streamcore_rtp::{Error, MediaTransport, RtcpCallback, RtpCallback, RtpHeader, RtpPacket};

pub const REMOTE: &str = "192.0.2.10:5004";
pub const EVENT_PT: u8 = 101;

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Transport that records what the stream sends and lets the test play the network
#[derive(Default)]
pub struct RecordingTransport {
    callbacks: RwLock<Option<(RtpCallback, RtcpCallback)>>,
    pub rtp: Mutex<Vec<Vec<u8>>>,
    pub rtcp: Mutex<Vec<Vec<u8>>>,
    pub fail_sends: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver a datagram to the attached stream's RTP callback
    pub fn inject_rtp(&self, data: &[u8]) {
        if let Some((rtp, _)) = self.callbacks.read_recursive().as_ref() {
            rtp(data);
        }
    }

    pub fn inject_rtcp(&self, data: &[u8]) {
        if let Some((_, rtcp)) = self.callbacks.read_recursive().as_ref() {
            rtcp(data);
        }
    }

    pub fn sent_rtp(&self) -> Vec<RtpPacket> {
        self.rtp.lock().iter().map(|d| RtpPacket::parse(d).unwrap()).collect()
    }
}

impl MediaTransport for RecordingTransport {
    fn attach(&self, _remote_addr: SocketAddr, rtp_cb: RtpCallback, rtcp_cb: RtcpCallback) -> streamcore_rtp::Result<()> {
        let mut callbacks = self.callbacks.write();
        if callbacks.is_some() {
            return Err(Error::AlreadyAttached);
        }
        *callbacks = Some((rtp_cb, rtcp_cb));
        Ok(())
    }

    fn detach(&self) {
        self.callbacks.write().take();
    }

    fn send_rtp(&self, packet: &[u8]) -> streamcore_rtp::Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Transport("network unreachable".into()));
        }
        self.rtp.lock().push(packet.to_vec());
        Ok(())
    }

    fn send_rtcp(&self, packet: &[u8]) -> streamcore_rtp::Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Transport("network unreachable".into()));
        }
        self.rtcp.lock().push(packet.to_vec());
        Ok(())
    }

    fn is_attached(&self) -> bool {
        self.callbacks.read().is_some()
    }
}

pub fn remote() -> SocketAddr {
    REMOTE.parse().unwrap()
}

pub fn pcmu_info() -> StreamInfo {
    StreamInfo::new(MediaDirection::SendReceive, remote(), CodecInfo::pcmu()).with_event_payload_type(EVENT_PT)
}

pub fn create_stream(info: StreamInfo, transport: Arc<dyn MediaTransport>) -> MediaStream {
    MediaStream::create(&CodecRegistry::with_defaults(), info, transport).unwrap()
}

/// An RTP datagram carrying one PCMU frame of a constant level
pub fn pcmu_packet(seq: u16, ssrc: u32, level: i16) -> Vec<u8> {
    let mut buf = BytesMut::new();
    RtpHeader::new(0, seq, seq as u32 * 160, ssrc).serialize(&mut buf).unwrap();
    buf.extend(std::iter::repeat(linear_to_ulaw(level)).take(160));
    buf.to_vec()
}

pub fn raw_packet(pt: u8, seq: u16, ts: u32, ssrc: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    RtpHeader::new(pt, seq, ts, ssrc).serialize(&mut buf).unwrap();
    buf.extend_from_slice(payload);
    buf.to_vec()
}
