//! Encode channel: frames in, RTP out

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::{error, trace};

use streamcore_rtp::{MediaTransport, RtcpEngine, RtpHeader, RtpSequenceNumber, RtpSsrc, RtpTimestamp};

use super::EncodeStat;
use crate::codec::AudioCodec;
use crate::dtmf::DtmfSender;
use crate::error::{Error, Result};
use crate::port::AudioFrame;

/// Parameters fixed at stream creation
#[derive(Debug, Clone)]
pub struct EncodeParams {
    pub payload_type: u8,
    pub event_payload_type: Option<u8>,
    pub ssrc: RtpSsrc,
    /// Interleaved samples in one frame
    pub samples_per_frame: usize,
    /// Timestamp advance per frame
    pub frame_ticks: u32,
    pub clock_rate: u32,
}

struct EncodeState {
    codec: Box<dyn AudioCodec>,
    seq: RtpSequenceNumber,
    timestamp: RtpTimestamp,
    /// Set after silence so the next audio packet starts a talk spurt
    marker: bool,
    buf: BytesMut,
    silence: Vec<i16>,
    stat: EncodeStat,
}

pub struct EncodeChannel {
    params: EncodeParams,
    state: Mutex<EncodeState>,
    dtmf: Mutex<DtmfSender>,
    paused: AtomicBool,
    transport: Arc<dyn MediaTransport>,
    rtcp: Arc<Mutex<RtcpEngine>>,
}

impl EncodeChannel {
    pub fn new(
        params: EncodeParams,
        codec: Box<dyn AudioCodec>,
        transport: Arc<dyn MediaTransport>,
        rtcp: Arc<Mutex<RtcpEngine>>,
    ) -> Self {
        let state = EncodeState {
            codec,
            seq: rand::random(),
            timestamp: rand::random(),
            marker: true,
            buf: BytesMut::with_capacity(streamcore_rtp::DEFAULT_MAX_PACKET_SIZE),
            silence: vec![0; params.samples_per_frame],
            stat: EncodeStat::default(),
        };
        Self {
            dtmf: Mutex::new(DtmfSender::new(params.clock_rate)),
            params,
            state: Mutex::new(state),
            paused: AtomicBool::new(false),
            transport,
            rtcp,
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn stat(&self) -> EncodeStat {
        self.state.lock().stat.clone()
    }

    /// Queue digits for transmission as telephone events
    pub fn dial_dtmf(&self, digits: &str) -> Result<()> {
        if self.params.event_payload_type.is_none() {
            return Err(Error::NoTelephoneEvent);
        }
        self.dtmf.lock().enqueue(digits)
    }

    /// Digits still waiting to be transmitted
    pub fn pending_dtmf(&self) -> usize {
        self.dtmf.lock().pending()
    }

    pub fn clear_dtmf(&self) {
        self.dtmf.lock().clear();
    }

    /// Send one frame interval; a queued digit takes the slot instead of audio
    pub fn put_frame(&self, frame: &AudioFrame) -> Result<()> {
        let mut state = self.state.lock();
        if self.is_paused() {
            state.stat.dropped_paused += 1;
            return Ok(());
        }
        if frame.is_audio() && frame.samples.len() != self.params.samples_per_frame {
            return Err(Error::FrameSize {
                expected: self.params.samples_per_frame,
                actual: frame.samples.len(),
            });
        }

        let state = &mut *state;
        let timestamp = state.timestamp;
        state.timestamp = timestamp.wrapping_add(self.params.frame_ticks);
        let seq = state.seq;
        state.buf.clear();

        let dtmf = match self.params.event_payload_type {
            Some(pt) => self
                .dtmf
                .lock()
                .next_packet(timestamp, self.params.frame_ticks)
                .map(|packet| (pt, packet)),
            None => None,
        };

        let is_dtmf = dtmf.is_some();
        let (packet_ts, payload_len) = if let Some((pt, packet)) = dtmf {
            let header = RtpHeader::new(pt, seq, packet.timestamp, self.params.ssrc).with_marker(packet.marker);
            header.serialize(&mut state.buf)?;
            packet.event.serialize(&mut state.buf);
            state.marker = true;
            (packet.timestamp, state.buf.len() - header.size())
        } else {
            let header = RtpHeader::new(self.params.payload_type, seq, timestamp, self.params.ssrc)
                .with_marker(state.marker);
            header.serialize(&mut state.buf)?;
            let pcm = if frame.is_audio() { &frame.samples[..] } else { &state.silence[..] };
            if let Err(e) = state.codec.encode(pcm, &mut state.buf) {
                state.stat.encode_errors += 1;
                return Err(e);
            }
            state.marker = false;
            (timestamp, state.buf.len() - header.size())
        };
        state.seq = seq.wrapping_add(1);

        if let Err(e) = self.transport.send_rtp(&state.buf) {
            state.stat.send_errors += 1;
            error!("Failed to send RTP seq={}: {}", seq, e);
            return Err(e.into());
        }
        if is_dtmf {
            state.stat.dtmf_packets += 1;
        } else {
            state.stat.packets_sent += 1;
        }
        trace!("RTP out seq={} ts={} len={}", seq, packet_ts, payload_len);
        self.rtcp.lock().on_rtp_sent(packet_ts, payload_len);
        Ok(())
    }
}
