//! The media stream object
//!
//! A [`MediaStream`] binds one negotiated media line to a transport. It is a
//! cheap handle: clones share the same stream, and the transport is detached
//! when the stream is destroyed or the last handle goes away.
//!
//! ```text
//! put_frame -> EncodeChannel -> MediaTransport::send_rtp -> network
//! network -> rtp callback -> DecodeChannel -> JitterBuffer -> get_frame
//! ```

mod config;

pub use config::{JitterBufferSettings, MediaDirection, MediaType, PayloadTypePolicy, StreamInfo};

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use streamcore_rtp::{MediaTransport, RtcpCallback, RtcpEngine, RtcpStat, RtpCallback};

use crate::buffer::jitter::JitterBufferStats;
use crate::channel::decode::DecodeParams;
use crate::channel::encode::EncodeParams;
use crate::channel::{DecodeChannel, DecodeStat, EncodeChannel, EncodeStat};
use crate::codec::CodecRegistry;
use crate::error::{Error, Result};
use crate::port::{AudioFrame, MediaPort, PortInfo};

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Transport attached, frames not flowing yet
    Created,
    /// Both channel clocks may run
    Started,
    /// Transport detached; every operation fails
    Destroyed,
}

struct StreamInner {
    info: StreamInfo,
    port_info: PortInfo,
    state: RwLock<StreamState>,
    transport: Arc<dyn MediaTransport>,
    attached: AtomicBool,
    rtcp: Arc<Mutex<RtcpEngine>>,
    encoder: Option<EncodeChannel>,
    decoder: Option<DecodeChannel>,
}

impl StreamInner {
    fn is_started(&self) -> bool {
        *self.state.read() == StreamState::Started
    }

    fn ensure_alive(&self) -> Result<()> {
        match *self.state.read() {
            StreamState::Destroyed => Err(Error::StreamDestroyed),
            _ => Ok(()),
        }
    }

    fn on_rtp(&self, data: &[u8]) {
        if !self.is_started() {
            return;
        }
        if let Some(decoder) = &self.decoder {
            decoder.on_rtp(data);
        }
        if let Err(e) = self.send_rtcp_if_due() {
            warn!("Failed to send RTCP report: {}", e);
        }
    }

    fn on_rtcp(&self, data: &[u8]) {
        if !self.is_started() {
            return;
        }
        if let Err(e) = self.rtcp.lock().on_rtcp_received(data, Instant::now()) {
            warn!("Dropping malformed RTCP datagram ({} bytes): {}", data.len(), e);
        }
    }

    /// Build the report under the engine lock, send it outside
    fn send_rtcp_if_due(&self) -> Result<()> {
        let now = Instant::now();
        let report = {
            let mut rtcp = self.rtcp.lock();
            if !rtcp.is_report_due(now) {
                return Ok(());
            }
            rtcp.build_report(now)?
        };
        self.transport.send_rtcp(&report)?;
        Ok(())
    }

    fn release_transport(&self) {
        if self.attached.swap(false, Ordering::SeqCst) {
            self.transport.detach();
            debug!("Stream {:08x} detached from transport", self.info.ssrc);
        }
    }
}

/// Owner of the transport attachment; dropped with the last user handle
struct StreamHandle {
    inner: Arc<StreamInner>,
}

impl Deref for StreamHandle {
    type Target = StreamInner;

    fn deref(&self) -> &StreamInner {
        &self.inner
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.inner.release_transport();
    }
}

/// A bidirectional media stream
#[derive(Clone)]
pub struct MediaStream {
    handle: Arc<StreamHandle>,
}

impl MediaStream {
    /// Validate `info`, instantiate the codecs and attach to `transport`
    ///
    /// On failure nothing stays attached and no stream is returned.
    pub fn create(registry: &CodecRegistry, info: StreamInfo, transport: Arc<dyn MediaTransport>) -> Result<Self> {
        info.validate()?;
        if info.media_type != MediaType::Audio {
            return Err(Error::InvalidConfig(format!("{:?} streams are not supported", info.media_type)));
        }

        let clock_rate = info.codec.clock_rate;
        let frame_ticks = info.frame_samples();
        let port_info = PortInfo::new(
            format!("{}/{}", info.codec.name, clock_rate),
            clock_rate,
            info.codec.channels,
            info.codec_param.ptime_ms,
        );
        let rtcp = Arc::new(Mutex::new(RtcpEngine::new(info.ssrc, clock_rate, info.rtcp.clone())));

        let encoder = match info.tx_pt.filter(|_| info.direction.sends()) {
            Some(payload_type) => {
                let codec = registry.create(&info.codec, &info.codec_param)?;
                let params = EncodeParams {
                    payload_type,
                    event_payload_type: info.tx_event_pt,
                    ssrc: info.ssrc,
                    samples_per_frame: port_info.samples_per_frame,
                    frame_ticks,
                    clock_rate,
                };
                Some(EncodeChannel::new(params, codec, transport.clone(), rtcp.clone()))
            }
            None => None,
        };

        let decoder = match info.rx_pt.filter(|_| info.direction.receives()) {
            Some(payload_type) => {
                let codec = registry.create(&info.codec, &info.codec_param)?;
                let params = DecodeParams {
                    payload_type,
                    event_payload_type: info.rx_event_pt,
                    policy: info.pt_policy,
                    samples_per_frame: port_info.samples_per_frame,
                    frame_ticks,
                };
                let jitter = info.jitter_buffer.to_config(info.codec_param.ptime_ms);
                Some(DecodeChannel::new(params, jitter, codec, rtcp.clone()))
            }
            None => None,
        };

        let inner = Arc::new(StreamInner {
            port_info,
            state: RwLock::new(StreamState::Created),
            transport: transport.clone(),
            attached: AtomicBool::new(false),
            rtcp,
            encoder,
            decoder,
            info,
        });

        let weak: Weak<StreamInner> = Arc::downgrade(&inner);
        let rtp_cb: RtpCallback = Arc::new(move |data: &[u8]| {
            if let Some(inner) = weak.upgrade() {
                inner.on_rtp(data);
            }
        });
        let weak: Weak<StreamInner> = Arc::downgrade(&inner);
        let rtcp_cb: RtcpCallback = Arc::new(move |data: &[u8]| {
            if let Some(inner) = weak.upgrade() {
                inner.on_rtcp(data);
            }
        });

        transport.attach(inner.info.remote_addr, rtp_cb, rtcp_cb)?;
        inner.attached.store(true, Ordering::SeqCst);

        info!(
            "Created {:?} stream ssrc={:08x} codec={} remote={}",
            inner.info.direction, inner.info.ssrc, inner.info.codec.name, inner.info.remote_addr
        );
        Ok(Self {
            handle: Arc::new(StreamHandle { inner }),
        })
    }

    /// Let frames flow
    pub fn start(&self) -> Result<()> {
        let mut state = self.handle.state.write();
        match *state {
            StreamState::Destroyed => Err(Error::StreamDestroyed),
            StreamState::Started => Ok(()),
            StreamState::Created => {
                *state = StreamState::Started;
                info!("Stream {:08x} started", self.handle.info.ssrc);
                Ok(())
            }
        }
    }

    /// Pause one or both directions; the other keeps running
    pub fn pause(&self, direction: MediaDirection) -> Result<()> {
        self.handle.ensure_alive()?;
        if direction.sends() {
            if let Some(encoder) = &self.handle.encoder {
                encoder.pause();
            }
        }
        if direction.receives() {
            if let Some(decoder) = &self.handle.decoder {
                decoder.pause();
            }
        }
        debug!("Stream {:08x} paused {:?}", self.handle.info.ssrc, direction);
        Ok(())
    }

    pub fn resume(&self, direction: MediaDirection) -> Result<()> {
        self.handle.ensure_alive()?;
        if direction.sends() {
            if let Some(encoder) = &self.handle.encoder {
                encoder.resume();
            }
        }
        if direction.receives() {
            if let Some(decoder) = &self.handle.decoder {
                decoder.resume();
            }
        }
        debug!("Stream {:08x} resumed {:?}", self.handle.info.ssrc, direction);
        Ok(())
    }

    /// Detach and release; the only irreversible transition
    ///
    /// A started stream says goodbye with an RTCP BYE first.
    pub fn destroy(&self) -> Result<()> {
        let previous = {
            let mut state = self.handle.state.write();
            let previous = *state;
            if previous == StreamState::Destroyed {
                return Err(Error::StreamDestroyed);
            }
            *state = StreamState::Destroyed;
            previous
        };

        if previous == StreamState::Started {
            let bye = self.handle.rtcp.lock().build_bye(Instant::now(), None);
            match bye {
                Ok(bye) => {
                    if let Err(e) = self.handle.transport.send_rtcp(&bye) {
                        warn!("Failed to send RTCP BYE: {}", e);
                    }
                }
                Err(e) => error!("Failed to build RTCP BYE: {}", e),
            }
        }
        if let Some(encoder) = &self.handle.encoder {
            encoder.clear_dtmf();
        }
        self.handle.release_transport();
        info!("Stream {:08x} destroyed", self.handle.info.ssrc);
        Ok(())
    }

    pub fn state(&self) -> StreamState {
        *self.handle.state.read()
    }

    /// The configuration the stream was created with
    pub fn info(&self) -> &StreamInfo {
        &self.handle.info
    }

    pub fn transport(&self) -> Arc<dyn MediaTransport> {
        self.handle.transport.clone()
    }

    /// The stream's frame interface
    pub fn port(&self) -> &dyn MediaPort {
        self
    }

    /// Snapshot of the RTCP statistics
    pub fn stat(&self) -> Result<RtcpStat> {
        self.handle.ensure_alive()?;
        Ok(self.handle.rtcp.lock().snapshot())
    }

    pub fn jitter_buffer_stat(&self) -> Result<JitterBufferStats> {
        self.handle.ensure_alive()?;
        Ok(self
            .handle
            .decoder
            .as_ref()
            .map(DecodeChannel::jitter_buffer_stat)
            .unwrap_or_default())
    }

    pub fn encode_stat(&self) -> Result<EncodeStat> {
        self.handle.ensure_alive()?;
        Ok(self.handle.encoder.as_ref().map(EncodeChannel::stat).unwrap_or_default())
    }

    pub fn decode_stat(&self) -> Result<DecodeStat> {
        self.handle.ensure_alive()?;
        Ok(self.handle.decoder.as_ref().map(DecodeChannel::stat).unwrap_or_default())
    }

    /// Queue digits for RFC 2833 transmission
    pub fn dial_dtmf(&self, digits: &str) -> Result<()> {
        self.handle.ensure_alive()?;
        match &self.handle.encoder {
            Some(encoder) => encoder.dial_dtmf(digits),
            None => Err(Error::NoTelephoneEvent),
        }
    }

    /// Whether received digits are waiting
    pub fn check_dtmf(&self) -> Result<bool> {
        self.handle.ensure_alive()?;
        Ok(self.handle.decoder.as_ref().is_some_and(DecodeChannel::has_dtmf))
    }

    /// Move up to `digits.len()` received digits into `digits`, returning the count
    ///
    /// Digits are ASCII and the buffer is not terminated.
    pub fn get_dtmf(&self, digits: &mut [u8]) -> Result<usize> {
        self.handle.ensure_alive()?;
        Ok(self
            .handle
            .decoder
            .as_ref()
            .map_or(0, |decoder| decoder.take_dtmf(digits)))
    }
}

impl MediaPort for MediaStream {
    fn info(&self) -> &PortInfo {
        &self.handle.port_info
    }

    /// Silence until started or while the receive direction is paused or absent
    fn get_frame(&self, frame: &mut AudioFrame) -> Result<()> {
        let samples = self.handle.port_info.samples_per_frame;
        match self.state() {
            StreamState::Destroyed => return Err(Error::StreamDestroyed),
            StreamState::Created => {
                frame.make_silent(samples);
                return Ok(());
            }
            StreamState::Started => {}
        }
        match &self.handle.decoder {
            Some(decoder) => decoder.get_frame(frame)?,
            None => frame.make_silent(samples),
        }
        Ok(())
    }

    /// Discarded until started or while the send direction is paused or absent
    fn put_frame(&self, frame: &AudioFrame) -> Result<()> {
        match self.state() {
            StreamState::Destroyed => return Err(Error::StreamDestroyed),
            StreamState::Created => return Ok(()),
            StreamState::Started => {}
        }
        let Some(encoder) = &self.handle.encoder else {
            return Ok(());
        };
        encoder.put_frame(frame)?;
        if let Err(e) = self.handle.send_rtcp_if_due() {
            warn!("Failed to send RTCP report: {}", e);
        }
        Ok(())
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("ssrc", &format_args!("{:08x}", self.handle.info.ssrc))
            .field("direction", &self.handle.info.direction)
            .field("codec", &self.handle.info.codec.name)
            .field("state", &self.state())
            .finish()
    }
}
