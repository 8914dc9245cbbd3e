//! Adaptive jitter buffer for RTP payload reordering
//!
//! Frames are held in a ring indexed by their distance from the next sequence
//! number due for playout, so insertion is a single index computation. The ring
//! is sized once from the configured maximum delay and never grows.
//!
//! The playout delay (prefetch) adapts between the configured bounds: it grows
//! by one frame on an underrun, a late arrival or a burst of reordering, and
//! shrinks by one frame after a run of clean pulls.
//!
//! A packet far outside the current sequence space is held on probation and
//! the buffer only follows it once the next packet confirms the new sequence
//! (RFC 3550 A.1). Until then it is counted and never played.

use std::collections::VecDeque;
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, trace};

use streamcore_rtp::{RtpSequenceNumber, RtpTimestamp};

/// Default maximum delay in milliseconds
pub const DEFAULT_MAX_DELAY_MS: u32 = 500;

/// Clean pulls before the prefetch target shrinks by one frame
const DECAY_PULLS: u32 = 50;

/// Holes filled out of order before the prefetch target grows
const REORDER_BURST: u32 = 3;

/// Packets further behind the watermark than this may start a new sequence (RFC 3550 A.1)
const MAX_MISORDER: u16 = 100;

/// Forward jumps this large may start a new sequence; smaller gaps are loss
const MAX_DROPOUT: u16 = 3000;

/// Lost sequence numbers remembered to recognize late arrivals
const LOST_HISTORY: usize = 32;

/// Jitter buffer geometry, in frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitterBufferConfig {
    /// Frame duration in milliseconds
    pub ptime_ms: u32,
    /// Frames held before the first playout; 0 plays as soon as one frame is held
    pub init_prefetch: usize,
    /// Lower bound of the adaptive prefetch
    pub min_prefetch: usize,
    /// Upper bound of the adaptive prefetch
    pub max_prefetch: usize,
    /// Ring capacity; frames further ahead push the oldest ones out
    pub max_frames: usize,
}

impl JitterBufferConfig {
    /// Engine defaults for the given frame duration
    pub fn new(ptime_ms: u32) -> Self {
        let ptime = ptime_ms.max(1);
        let max_frames = (DEFAULT_MAX_DELAY_MS / ptime).max(1) as usize;
        Self {
            ptime_ms: ptime,
            init_prefetch: 0,
            min_prefetch: 1,
            max_prefetch: (max_frames * 4 / 5).max(1),
            max_frames,
        }
    }

    /// Milliseconds to whole frames, rounding up
    pub fn frames_for(&self, ms: u32) -> usize {
        let ptime = self.ptime_ms.max(1);
        ms.div_ceil(ptime) as usize
    }

    /// Bring the bounds into a consistent order
    fn normalized(mut self) -> Self {
        self.max_frames = self.max_frames.max(1);
        self.min_prefetch = self.min_prefetch.clamp(1, self.max_frames);
        self.max_prefetch = self.max_prefetch.clamp(self.min_prefetch, self.max_frames);
        self.init_prefetch = self.init_prefetch.min(self.max_prefetch);
        self
    }
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        Self::new(20)
    }
}

/// One buffered payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitterFrame {
    pub seq: RtpSequenceNumber,
    pub timestamp: RtpTimestamp,
    pub marker: bool,
    pub payload: Bytes,
    pub arrival: Instant,
}

/// Outcome of an insertion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterPut {
    /// Held for playout
    Queued,
    /// Already held or already played
    Duplicate,
    /// Arrived after being declared lost
    Late,
    /// Far outside the sequence space; held until the next packet confirms it
    Probation,
    /// The next packet confirmed a new sequence; the buffer restarted
    Restarted,
}

/// Outcome of a playout request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JitterPull {
    /// The frame due now
    Frame(JitterFrame),
    /// The frame due now has not arrived yet; the caller should conceal it
    Missing { seq: RtpSequenceNumber },
    /// Nothing to play (prefetching or empty)
    NotReady,
}

/// Jitter buffer counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JitterBufferStats {
    /// Frames offered to the buffer
    pub received: u64,
    /// Frames released for playout
    pub played: u64,
    /// Sequence numbers skipped without ever being played
    pub lost: u64,
    /// Insertions at or behind the watermark, or of a frame already held
    pub duplicates: u64,
    /// Duplicates that had been declared lost before arriving
    pub late: u64,
    /// Held frames pushed out by frames too far ahead or dropped by a resync,
    /// and unconfirmed jumps ahead
    pub discarded: u64,
    /// Pulls that found the buffer empty
    pub underruns: u64,
    /// Restarts caused by sequence discontinuities
    pub resyncs: u64,
    /// Holes filled out of order
    pub reorders: u64,
    /// Current adaptive prefetch, in frames
    pub prefetch_frames: usize,
    /// Frames currently held
    pub level: usize,
}

/// A discontinuous packet waiting for its successor
#[derive(Debug)]
struct Probation {
    frame: JitterFrame,
    /// Behind the watermark, so counted as a duplicate until confirmed
    stale: bool,
}

/// Adaptive jitter buffer
#[derive(Debug)]
pub struct JitterBuffer {
    config: JitterBufferConfig,
    /// Slot 0 is `head`, the next sequence number due; the back slot is always occupied
    frames: VecDeque<Option<JitterFrame>>,
    head: Option<RtpSequenceNumber>,
    prefetch: usize,
    prefetching: bool,
    playout_started: bool,
    gap_wait: usize,
    stable_pulls: u32,
    reorder_burst: u32,
    recent_lost: VecDeque<RtpSequenceNumber>,
    probation: Option<Probation>,
    stats: JitterBufferStats,
}

impl JitterBuffer {
    pub fn new(config: JitterBufferConfig) -> Self {
        let config = config.normalized();
        Self {
            frames: VecDeque::with_capacity(config.max_frames),
            head: None,
            prefetch: config.init_prefetch,
            prefetching: true,
            playout_started: false,
            gap_wait: 0,
            stable_pulls: 0,
            reorder_burst: 0,
            recent_lost: VecDeque::with_capacity(LOST_HISTORY),
            probation: None,
            stats: JitterBufferStats::default(),
            config,
        }
    }

    pub fn config(&self) -> &JitterBufferConfig {
        &self.config
    }

    /// Current adaptive prefetch, in frames
    pub fn prefetch(&self) -> usize {
        self.prefetch
    }

    /// Frames currently held
    pub fn level(&self) -> usize {
        self.frames.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn stats(&self) -> JitterBufferStats {
        JitterBufferStats {
            prefetch_frames: self.prefetch,
            level: self.level(),
            ..self.stats.clone()
        }
    }

    /// Insert a frame keyed by its sequence number
    pub fn put(&mut self, frame: JitterFrame) -> JitterPut {
        self.stats.received += 1;

        let Some(head) = self.head else {
            self.restart_at(frame);
            return JitterPut::Queued;
        };

        if let Some(candidate) = self.probation.take() {
            if frame.seq == candidate.frame.seq.wrapping_add(1) {
                return self.resync(candidate, frame);
            }
            trace!("Jitter buffer: seq={} not confirmed, dropped", candidate.frame.seq);
        }

        let ahead = frame.seq.wrapping_sub(head);
        if ahead >= 0x8000 {
            return self.put_behind(head, frame);
        }
        if ahead >= MAX_DROPOUT {
            debug!("Jitter buffer: sequence jump {} -> {}, awaiting confirmation", head, frame.seq);
            self.stats.discarded += 1;
            self.probation = Some(Probation { frame, stale: false });
            return JitterPut::Probation;
        }

        let offset = ahead as usize;
        if let Some(slot) = self.frames.get_mut(offset) {
            if slot.is_some() {
                self.stats.duplicates += 1;
                trace!("Jitter buffer: duplicate seq={}", frame.seq);
                return JitterPut::Duplicate;
            }
            *slot = Some(frame);
            self.note_reorder();
            return JitterPut::Queued;
        }

        let capacity = self.config.max_frames;
        let mut offset = offset;
        if offset >= capacity {
            let excess = offset + 1 - capacity;
            self.skip_front(excess);
            offset -= excess;
        }
        while self.frames.len() < offset {
            self.frames.push_back(None);
        }
        self.frames.push_back(Some(frame));
        JitterPut::Queued
    }

    fn put_behind(&mut self, head: RtpSequenceNumber, frame: JitterFrame) -> JitterPut {
        let behind = head.wrapping_sub(frame.seq) as usize;

        // Before the first playout the window may still slide back to an
        // earlier first packet.
        if !self.playout_started && self.frames.len() + behind <= self.config.max_frames {
            for _ in 1..behind {
                self.frames.push_front(None);
            }
            self.head = Some(frame.seq);
            self.frames.push_front(Some(frame));
            self.note_reorder();
            return JitterPut::Queued;
        }

        self.stats.duplicates += 1;
        if behind > MAX_MISORDER as usize {
            debug!("Jitter buffer: seq {} far behind {}, awaiting confirmation", frame.seq, head);
            self.probation = Some(Probation { frame, stale: true });
            return JitterPut::Probation;
        }

        if let Some(pos) = self.recent_lost.iter().position(|&seq| seq == frame.seq) {
            self.recent_lost.remove(pos);
            self.stats.late += 1;
            self.grow("late arrival");
            return JitterPut::Late;
        }
        trace!("Jitter buffer: seq={} behind watermark", frame.seq);
        JitterPut::Duplicate
    }

    /// Release the frame due now
    pub fn pull(&mut self) -> JitterPull {
        if self.prefetching {
            if self.frames.is_empty() || self.frames.len() < self.prefetch {
                return JitterPull::NotReady;
            }
            self.prefetching = false;
            trace!("Jitter buffer: prefetch of {} frames complete", self.prefetch);
        }

        match self.frames.front() {
            None => {
                self.stats.underruns += 1;
                self.grow("underrun");
                self.prefetching = true;
                JitterPull::NotReady
            }
            Some(Some(_)) => self.play_front(),
            Some(None) => {
                let Some(head) = self.head else {
                    return JitterPull::NotReady;
                };
                self.gap_wait += 1;
                if self.gap_wait <= self.prefetch.clamp(1, self.config.max_frames) {
                    return JitterPull::Missing { seq: head };
                }
                while matches!(self.frames.front(), Some(None)) {
                    self.skip_front(1);
                }
                self.play_front()
            }
        }
    }

    /// Drop all held frames and start over at the next arrival
    pub fn reset(&mut self) {
        self.frames.clear();
        self.head = None;
        self.prefetch = self.config.init_prefetch;
        self.prefetching = true;
        self.playout_started = false;
        self.gap_wait = 0;
        self.stable_pulls = 0;
        self.reorder_burst = 0;
        self.recent_lost.clear();
        self.probation = None;
    }

    /// Follow a confirmed discontinuity: held frames are dropped, nothing is lost
    fn resync(&mut self, candidate: Probation, next: JitterFrame) -> JitterPut {
        if candidate.stale {
            self.stats.duplicates -= 1;
        } else {
            self.stats.discarded -= 1;
        }
        let held = self.level() as u64;
        self.stats.discarded += held;
        self.stats.resyncs += 1;
        debug!(
            "Jitter buffer: resync to seq={}, {} held frames dropped",
            candidate.frame.seq, held
        );
        self.restart_at(candidate.frame);
        self.frames.push_back(Some(next));
        JitterPut::Restarted
    }

    fn restart_at(&mut self, frame: JitterFrame) {
        self.frames.clear();
        self.head = Some(frame.seq);
        self.frames.push_back(Some(frame));
        self.gap_wait = 0;
        self.recent_lost.clear();
        self.probation = None;
        if self.playout_started {
            self.prefetching = true;
        }
    }

    fn play_front(&mut self) -> JitterPull {
        let (Some(Some(frame)), Some(head)) = (self.frames.pop_front(), self.head) else {
            return JitterPull::NotReady;
        };
        self.head = Some(head.wrapping_add(1));
        self.playout_started = true;
        self.gap_wait = 0;
        self.stats.played += 1;

        self.stable_pulls += 1;
        if self.stable_pulls >= DECAY_PULLS {
            self.stable_pulls = 0;
            self.reorder_burst = 0;
            if self.prefetch > self.config.min_prefetch {
                self.prefetch -= 1;
                trace!("Jitter buffer: prefetch decayed to {}", self.prefetch);
            }
        }
        JitterPull::Frame(frame)
    }

    /// Advance the watermark past `count` slots
    fn skip_front(&mut self, count: usize) {
        let Some(mut head) = self.head else {
            return;
        };
        for _ in 0..count {
            match self.frames.pop_front() {
                Some(Some(_)) => self.stats.discarded += 1,
                _ => {
                    self.stats.lost += 1;
                    if self.recent_lost.len() == LOST_HISTORY {
                        self.recent_lost.pop_front();
                    }
                    self.recent_lost.push_back(head);
                }
            }
            head = head.wrapping_add(1);
        }
        self.head = Some(head);
        self.gap_wait = 0;
    }

    fn note_reorder(&mut self) {
        self.stats.reorders += 1;
        self.reorder_burst += 1;
        if self.reorder_burst >= REORDER_BURST {
            self.reorder_burst = 0;
            self.grow("reordering");
        }
    }

    fn grow(&mut self, reason: &str) {
        self.stable_pulls = 0;
        if self.prefetch < self.config.max_prefetch {
            self.prefetch += 1;
            debug!("Jitter buffer: prefetch raised to {} ({})", self.prefetch, reason);
        }
    }
}
