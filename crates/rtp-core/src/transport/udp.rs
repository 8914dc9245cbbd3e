use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::{AttachmentSlot, MediaTransport, RtcpCallback, RtpCallback};
use crate::error::Error;
use crate::packet::rtcp::is_rtcp;
use crate::{Result, DEFAULT_MAX_PACKET_SIZE};

/// UDP transport configuration
#[derive(Debug, Clone)]
pub struct UdpTransportConfig {
    /// Local RTP address; port 0 picks an ephemeral port
    pub local_rtp_addr: SocketAddr,

    /// Local RTCP address; defaults to the RTP port + 1
    pub local_rtcp_addr: Option<SocketAddr>,

    /// Carry RTCP on the RTP socket (RFC 5761)
    pub rtcp_mux: bool,

    /// Peer RTCP address when it is not the RTP port + 1
    pub remote_rtcp_addr: Option<SocketAddr>,

    /// Receive buffer size
    pub max_packet_size: usize,
}

impl Default for UdpTransportConfig {
    fn default() -> Self {
        Self {
            local_rtp_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            local_rtcp_addr: None,
            rtcp_mux: false,
            remote_rtcp_addr: None,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

impl UdpTransportConfig {
    pub fn with_local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_rtp_addr = addr;
        self
    }

    pub fn with_rtcp_mux(mut self, mux: bool) -> Self {
        self.rtcp_mux = mux;
        self
    }
}

/// UDP transport for RTP/RTCP
///
/// One tokio task per socket receives datagrams and invokes the attached
/// stream's callbacks. Must be created inside a tokio runtime.
pub struct UdpMediaTransport {
    rtp_socket: Arc<UdpSocket>,
    rtcp_socket: Option<Arc<UdpSocket>>,
    config: UdpTransportConfig,
    slot: Arc<AttachmentSlot>,
    receiver_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl UdpMediaTransport {
    /// Bind the sockets and start receiving
    pub async fn bind(config: UdpTransportConfig) -> Result<Self> {
        let rtp_socket = UdpSocket::bind(config.local_rtp_addr)
            .await
            .map_err(|e| Error::Transport(format!("Failed to bind RTP socket: {}", e)))?;
        let rtp_addr = rtp_socket.local_addr()?;

        let rtcp_socket = if config.rtcp_mux {
            None
        } else {
            let addr = config
                .local_rtcp_addr
                .unwrap_or_else(|| SocketAddr::new(rtp_addr.ip(), rtp_addr.port().wrapping_add(1)));
            let socket = UdpSocket::bind(addr)
                .await
                .map_err(|e| Error::Transport(format!("Failed to bind RTCP socket {}: {}", addr, e)))?;
            Some(Arc::new(socket))
        };

        let transport = Self {
            rtp_socket: Arc::new(rtp_socket),
            rtcp_socket,
            config,
            slot: Arc::new(AttachmentSlot::default()),
            receiver_tasks: Mutex::new(Vec::new()),
        };
        transport.start_receivers();

        info!(
            "UDP media transport bound: rtp={} rtcp={:?} mux={}",
            rtp_addr,
            transport.local_rtcp_addr(),
            transport.config.rtcp_mux
        );
        Ok(transport)
    }

    fn start_receivers(&self) {
        let mut tasks = self.receiver_tasks.lock();
        tasks.push(spawn_receiver(
            self.rtp_socket.clone(),
            self.slot.clone(),
            self.config.max_packet_size,
            self.config.rtcp_mux,
            false,
        ));
        if let Some(rtcp_socket) = &self.rtcp_socket {
            tasks.push(spawn_receiver(
                rtcp_socket.clone(),
                self.slot.clone(),
                self.config.max_packet_size,
                false,
                true,
            ));
        }
    }

    /// Actual local RTP address
    pub fn local_rtp_addr(&self) -> Result<SocketAddr> {
        Ok(self.rtp_socket.local_addr()?)
    }

    /// Actual local RTCP address (the RTP address when muxing)
    pub fn local_rtcp_addr(&self) -> Option<SocketAddr> {
        match &self.rtcp_socket {
            Some(socket) => socket.local_addr().ok(),
            None => self.rtp_socket.local_addr().ok(),
        }
    }
}

fn spawn_receiver(
    socket: Arc<UdpSocket>,
    slot: Arc<AttachmentSlot>,
    max_packet_size: usize,
    demux: bool,
    rtcp_only: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer = vec![0u8; max_packet_size];
        loop {
            match socket.recv_from(&mut buffer).await {
                Ok((size, source)) => {
                    let data = &buffer[..size];
                    trace!("Received {} bytes from {}", size, source);
                    if rtcp_only || (demux && is_rtcp(data)) {
                        slot.deliver_rtcp(data);
                    } else {
                        slot.deliver_rtp(data);
                    }
                }
                Err(e) => {
                    // ICMP port unreachable surfaces here on some platforms
                    warn!("Error receiving datagram: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }
            }
        }
    })
}

impl MediaTransport for UdpMediaTransport {
    fn attach(&self, remote_addr: SocketAddr, rtp_cb: RtpCallback, rtcp_cb: RtcpCallback) -> Result<()> {
        let remote_rtcp = if self.config.rtcp_mux {
            remote_addr
        } else {
            self.config
                .remote_rtcp_addr
                .unwrap_or_else(|| SocketAddr::new(remote_addr.ip(), remote_addr.port().wrapping_add(1)))
        };
        self.slot.attach(remote_addr, remote_rtcp, rtp_cb, rtcp_cb)?;
        debug!("Attached stream: remote rtp={} rtcp={}", remote_addr, remote_rtcp);
        Ok(())
    }

    fn detach(&self) {
        if self.slot.detach() {
            debug!("Detached stream");
        }
    }

    fn send_rtp(&self, packet: &[u8]) -> Result<()> {
        let remote = self.slot.remote_rtp()?;
        self.rtp_socket.try_send_to(packet, remote).map_err(|e| {
            error!("Failed to send RTP to {}: {}", remote, e);
            Error::Transport(format!("RTP send to {} failed: {}", remote, e))
        })?;
        Ok(())
    }

    fn send_rtcp(&self, packet: &[u8]) -> Result<()> {
        let remote = self.slot.remote_rtcp()?;
        let socket = self.rtcp_socket.as_ref().unwrap_or(&self.rtp_socket);
        socket.try_send_to(packet, remote).map_err(|e| {
            error!("Failed to send RTCP to {}: {}", remote, e);
            Error::Transport(format!("RTCP send to {} failed: {}", remote, e))
        })?;
        Ok(())
    }

    fn is_attached(&self) -> bool {
        self.slot.is_attached()
    }
}

impl Drop for UdpMediaTransport {
    fn drop(&mut self) {
        self.slot.detach();
        for task in self.receiver_tasks.lock().drain(..) {
            task.abort();
        }
    }
}
