//! Media transports
//!
//! A transport moves RTP and RTCP datagrams for exactly one stream at a
//! time. The stream hands its receive callbacks over in [`MediaTransport::attach`];
//! the transport invokes them from whatever context it receives on.

mod loopback;
mod udp;

pub use loopback::LoopbackTransport;
pub use udp::{UdpMediaTransport, UdpTransportConfig};

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::Error;
use crate::Result;

/// Invoked with each received RTP datagram
pub type RtpCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Invoked with each received RTCP datagram
pub type RtcpCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// The network-facing contract of a media stream
pub trait MediaTransport: Send + Sync {
    /// Bind a stream's callbacks and its peer address.
    ///
    /// Fails with [`Error::AlreadyAttached`] while another stream is attached.
    fn attach(&self, remote_addr: SocketAddr, rtp_cb: RtpCallback, rtcp_cb: RtcpCallback) -> Result<()>;

    /// Unbind the stream. Idempotent; once it returns no callback runs again.
    fn detach(&self);

    /// Send one RTP datagram to the peer
    fn send_rtp(&self, packet: &[u8]) -> Result<()>;

    /// Send one RTCP datagram to the peer
    fn send_rtcp(&self, packet: &[u8]) -> Result<()>;

    /// Whether a stream is currently attached
    fn is_attached(&self) -> bool;
}

struct Attachment {
    remote_rtp: SocketAddr,
    remote_rtcp: SocketAddr,
    rtp_cb: RtpCallback,
    rtcp_cb: RtcpCallback,
}

/// Attachment state shared by the transport implementations
///
/// Callbacks run under the read lock, so `detach` (which takes the write
/// lock) cannot return while one is still executing.
#[derive(Default)]
pub(crate) struct AttachmentSlot {
    inner: RwLock<Option<Attachment>>,
}

impl AttachmentSlot {
    pub(crate) fn attach(
        &self,
        remote_rtp: SocketAddr,
        remote_rtcp: SocketAddr,
        rtp_cb: RtpCallback,
        rtcp_cb: RtcpCallback,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.is_some() {
            return Err(Error::AlreadyAttached);
        }
        *inner = Some(Attachment {
            remote_rtp,
            remote_rtcp,
            rtp_cb,
            rtcp_cb,
        });
        Ok(())
    }

    /// Returns true if something was attached
    pub(crate) fn detach(&self) -> bool {
        self.inner.write().take().is_some()
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.inner.read().is_some()
    }

    pub(crate) fn remote_rtp(&self) -> Result<SocketAddr> {
        self.inner.read().as_ref().map(|a| a.remote_rtp).ok_or(Error::NotReady)
    }

    pub(crate) fn remote_rtcp(&self) -> Result<SocketAddr> {
        self.inner.read().as_ref().map(|a| a.remote_rtcp).ok_or(Error::NotReady)
    }

    /// Hand a datagram to the attached stream; false when nobody listens
    pub(crate) fn deliver_rtp(&self, data: &[u8]) -> bool {
        // Recursive read: a callback may send on a peer transport that
        // delivers straight back into this one
        let inner = self.inner.read_recursive();
        match inner.as_ref() {
            Some(attachment) => {
                (attachment.rtp_cb)(data);
                true
            }
            None => {
                debug!("Dropping {} byte RTP datagram: no stream attached", data.len());
                false
            }
        }
    }

    pub(crate) fn deliver_rtcp(&self, data: &[u8]) -> bool {
        let inner = self.inner.read_recursive();
        match inner.as_ref() {
            Some(attachment) => {
                (attachment.rtcp_cb)(data);
                true
            }
            None => {
                debug!("Dropping {} byte RTCP datagram: no stream attached", data.len());
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callback(counter: Arc<AtomicUsize>) -> RtpCallback {
        Arc::new(move |_data: &[u8]| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_slot_attach_detach() {
        let slot = AttachmentSlot::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        assert_eq!(slot.remote_rtp(), Err(Error::NotReady));
        assert!(!slot.deliver_rtp(b"x"));

        slot.attach(addr, addr, counting_callback(hits.clone()), counting_callback(hits.clone()))
            .unwrap();
        assert_eq!(
            slot.attach(addr, addr, counting_callback(hits.clone()), counting_callback(hits.clone())),
            Err(Error::AlreadyAttached)
        );

        assert!(slot.deliver_rtp(b"x"));
        assert!(slot.deliver_rtcp(b"y"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        assert!(slot.detach());
        assert!(!slot.detach());
        assert!(!slot.deliver_rtp(b"x"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
