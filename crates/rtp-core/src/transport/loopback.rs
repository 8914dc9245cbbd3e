use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

use super::{AttachmentSlot, MediaTransport, RtcpCallback, RtpCallback};
use crate::error::Error;
use crate::Result;

struct LoopbackLink {
    ends: [AttachmentSlot; 2],
}

/// In-process transport: two ends wired back to back
///
/// Whatever one end sends is delivered synchronously to the stream attached
/// at the other end, on the sender's thread.
pub struct LoopbackTransport {
    link: Arc<LoopbackLink>,
    side: usize,
    rtp_sent: AtomicU64,
    rtcp_sent: AtomicU64,
}

impl LoopbackTransport {
    /// Create a connected pair
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let link = Arc::new(LoopbackLink {
            ends: [AttachmentSlot::default(), AttachmentSlot::default()],
        });
        let end = |side| {
            Arc::new(Self {
                link: link.clone(),
                side,
                rtp_sent: AtomicU64::new(0),
                rtcp_sent: AtomicU64::new(0),
            })
        };
        (end(0), end(1))
    }

    /// A placeholder peer address for attach
    pub fn peer_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, 40000 + (1 - self.side as u16) * 2))
    }

    fn own(&self) -> &AttachmentSlot {
        &self.link.ends[self.side]
    }

    fn peer(&self) -> &AttachmentSlot {
        &self.link.ends[1 - self.side]
    }

    /// Deliver an RTP datagram to this end's stream as if it came off the wire
    pub fn inject_rtp(&self, data: &[u8]) -> bool {
        self.own().deliver_rtp(data)
    }

    /// Deliver an RTCP datagram to this end's stream as if it came off the wire
    pub fn inject_rtcp(&self, data: &[u8]) -> bool {
        self.own().deliver_rtcp(data)
    }

    /// RTP datagrams sent from this end
    pub fn rtp_sent(&self) -> u64 {
        self.rtp_sent.load(Ordering::Relaxed)
    }

    /// RTCP datagrams sent from this end
    pub fn rtcp_sent(&self) -> u64 {
        self.rtcp_sent.load(Ordering::Relaxed)
    }
}

impl MediaTransport for LoopbackTransport {
    fn attach(&self, remote_addr: SocketAddr, rtp_cb: RtpCallback, rtcp_cb: RtcpCallback) -> Result<()> {
        self.own().attach(remote_addr, remote_addr, rtp_cb, rtcp_cb)
    }

    fn detach(&self) {
        self.own().detach();
    }

    fn send_rtp(&self, packet: &[u8]) -> Result<()> {
        if !self.own().is_attached() {
            return Err(Error::NotReady);
        }
        self.rtp_sent.fetch_add(1, Ordering::Relaxed);
        if !self.peer().deliver_rtp(packet) {
            trace!("Loopback peer not attached, RTP datagram lost");
        }
        Ok(())
    }

    fn send_rtcp(&self, packet: &[u8]) -> Result<()> {
        if !self.own().is_attached() {
            return Err(Error::NotReady);
        }
        self.rtcp_sent.fetch_add(1, Ordering::Relaxed);
        if !self.peer().deliver_rtcp(packet) {
            trace!("Loopback peer not attached, RTCP datagram lost");
        }
        Ok(())
    }

    fn is_attached(&self) -> bool {
        self.own().is_attached()
    }
}
