//! Decode channel: RTP in, frames out
//!
//! The receive path (`on_rtp`) and the playout path (`get_frame`) run on
//! different threads. They meet only in the jitter buffer, whose lock is held
//! for a single insert or pull; codec work happens under the channel's own
//! codec lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use streamcore_rtp::{RtcpEngine, RtpPacket, RtpSsrc, RtpTimestamp};

use super::DecodeStat;
use crate::buffer::jitter::{JitterBuffer, JitterBufferConfig, JitterBufferStats, JitterFrame, JitterPull};
use crate::codec::AudioCodec;
use crate::dtmf::DtmfReceiver;
use crate::error::Result;
use crate::port::{AudioFrame, FrameType};
use crate::stream::PayloadTypePolicy;

/// Parameters fixed at stream creation
#[derive(Debug, Clone)]
pub struct DecodeParams {
    pub payload_type: u8,
    pub event_payload_type: Option<u8>,
    pub policy: PayloadTypePolicy,
    /// Interleaved samples in one frame
    pub samples_per_frame: usize,
    /// Timestamp advance per frame
    pub frame_ticks: u32,
}

struct ReceiveState {
    jitter: JitterBuffer,
    ssrc: Option<RtpSsrc>,
    packets_received: u64,
    malformed: u64,
    pt_mismatch: u64,
    dropped_paused: u64,
    ssrc_changes: u64,
}

struct PlayoutState {
    codec: Box<dyn AudioCodec>,
    last_timestamp: Option<RtpTimestamp>,
    frames_decoded: u64,
    frames_concealed: u64,
    decode_errors: u64,
}

pub struct DecodeChannel {
    params: DecodeParams,
    rx: Mutex<ReceiveState>,
    playout: Mutex<PlayoutState>,
    dtmf: Mutex<DtmfReceiver>,
    paused: AtomicBool,
    /// The source changed; the codec must forget its history before the next decode
    codec_reset: AtomicBool,
    rtcp: Arc<Mutex<RtcpEngine>>,
}

impl DecodeChannel {
    pub fn new(
        params: DecodeParams,
        jitter: JitterBufferConfig,
        codec: Box<dyn AudioCodec>,
        rtcp: Arc<Mutex<RtcpEngine>>,
    ) -> Self {
        Self {
            params,
            rx: Mutex::new(ReceiveState {
                jitter: JitterBuffer::new(jitter),
                ssrc: None,
                packets_received: 0,
                malformed: 0,
                pt_mismatch: 0,
                dropped_paused: 0,
                ssrc_changes: 0,
            }),
            playout: Mutex::new(PlayoutState {
                codec,
                last_timestamp: None,
                frames_decoded: 0,
                frames_concealed: 0,
                decode_errors: 0,
            }),
            dtmf: Mutex::new(DtmfReceiver::new()),
            paused: AtomicBool::new(false),
            codec_reset: AtomicBool::new(false),
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

    /// Digest one datagram from the transport
    pub fn on_rtp(&self, data: &[u8]) {
        let arrival = Instant::now();
        let packet = match RtpPacket::parse(data) {
            Ok(packet) => packet,
            Err(e) => {
                let mut rx = self.rx.lock();
                rx.packets_received += 1;
                rx.malformed += 1;
                debug!("Dropping malformed RTP datagram ({} bytes): {}", data.len(), e);
                return;
            }
        };
        let header = &packet.header;

        self.rtcp.lock().on_rtp_received(
            header.ssrc,
            header.sequence_number,
            header.timestamp,
            packet.payload.len(),
            arrival,
        );

        if self.params.event_payload_type == Some(header.payload_type) {
            self.rx.lock().packets_received += 1;
            self.dtmf.lock().on_payload(header.timestamp, &packet.payload);
            return;
        }

        let mut rx = self.rx.lock();
        rx.packets_received += 1;
        if self.is_paused() {
            rx.dropped_paused += 1;
            return;
        }
        if header.payload_type != self.params.payload_type {
            rx.pt_mismatch += 1;
            if self.params.policy == PayloadTypePolicy::Strict {
                warn!(
                    "Dropping RTP with payload type {} (expected {})",
                    header.payload_type, self.params.payload_type
                );
                return;
            }
        }

        if rx.ssrc != Some(header.ssrc) {
            if let Some(previous) = rx.ssrc {
                info!("Source changed from {:08x} to {:08x}, restarting jitter buffer", previous, header.ssrc);
                rx.jitter.reset();
                rx.ssrc_changes += 1;
                self.codec_reset.store(true, Ordering::SeqCst);
                self.dtmf.lock().reset();
            }
            rx.ssrc = Some(header.ssrc);
        }

        let result = rx.jitter.put(JitterFrame {
            seq: header.sequence_number,
            timestamp: header.timestamp,
            marker: header.marker,
            payload: packet.payload.clone(),
            arrival,
        });
        trace!("Jitter buffer put seq={} -> {:?}", header.sequence_number, result);
    }

    /// Produce the frame due now
    ///
    /// While paused this returns silence without touching the jitter buffer.
    pub fn get_frame(&self, frame: &mut AudioFrame) -> Result<()> {
        let samples = self.params.samples_per_frame;
        if self.is_paused() {
            frame.make_silent(samples);
            return Ok(());
        }

        let pulled = self.rx.lock().jitter.pull();

        let mut playout = self.playout.lock();
        if self.codec_reset.swap(false, Ordering::SeqCst) {
            playout.codec.reset();
            playout.last_timestamp = None;
        }

        match pulled {
            JitterPull::Frame(jf) => {
                if let Err(e) = playout.codec.decode(&jf.payload, &mut frame.samples) {
                    debug!("Decoder rejected seq={}: {}", jf.seq, e);
                    playout.decode_errors += 1;
                    playout.frames_concealed += 1;
                    playout.codec.conceal(samples, &mut frame.samples);
                } else {
                    playout.frames_decoded += 1;
                }
                frame.timestamp = jf.timestamp;
                playout.last_timestamp = Some(jf.timestamp);
            }
            JitterPull::Missing { seq } => {
                trace!("Concealing missing seq={}", seq);
                playout.codec.conceal(samples, &mut frame.samples);
                playout.frames_concealed += 1;
                let timestamp = playout
                    .last_timestamp
                    .map_or(0, |ts| ts.wrapping_add(self.params.frame_ticks));
                frame.timestamp = timestamp;
                playout.last_timestamp = Some(timestamp);
            }
            JitterPull::NotReady => {
                frame.make_silent(samples);
                return Ok(());
            }
        }

        frame.samples.resize(samples, 0);
        frame.frame_type = FrameType::Audio;
        Ok(())
    }

    /// Whether received digits are waiting
    pub fn has_dtmf(&self) -> bool {
        !self.dtmf.lock().queue().is_empty()
    }

    /// Move received digits into `out`, oldest first
    pub fn take_dtmf(&self, out: &mut [u8]) -> usize {
        self.dtmf.lock().queue_mut().drain_into(out)
    }

    pub fn jitter_buffer_stat(&self) -> JitterBufferStats {
        self.rx.lock().jitter.stats()
    }

    pub fn stat(&self) -> DecodeStat {
        let mut stat = {
            let rx = self.rx.lock();
            DecodeStat {
                packets_received: rx.packets_received,
                malformed: rx.malformed,
                pt_mismatch: rx.pt_mismatch,
                dropped_paused: rx.dropped_paused,
                ssrc_changes: rx.ssrc_changes,
                ..Default::default()
            }
        };
        {
            let playout = self.playout.lock();
            stat.frames_decoded = playout.frames_decoded;
            stat.frames_concealed = playout.frames_concealed;
            stat.decode_errors = playout.decode_errors;
        }
        let dtmf = self.dtmf.lock();
        stat.dtmf_events = dtmf.events();
        stat.dtmf_overflow = dtmf.queue().overflow();
        stat
    }
}
