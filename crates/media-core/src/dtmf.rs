//! RFC 2833 DTMF signaling
//!
//! Outgoing digits queue in a [`DtmfSender`] and are turned into
//! telephone-event packets by the encode channel, one per send opportunity.
//! Incoming telephone-event payloads go through a [`DtmfReceiver`] which
//! recognizes the start of each event and queues the digit for the
//! application.

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use streamcore_rtp::{RtpTimestamp, TelephoneEvent};

use crate::error::{Error, Result};

/// Maximum digits queued in either direction
pub const MAX_DTMF_DIGITS: usize = 32;

/// Tone length of one transmitted digit, in milliseconds
pub const DTMF_DIGIT_MS: u32 = 200;

/// Volume of transmitted events, in -dBm0
pub const DTMF_VOLUME: u8 = 10;

/// The end-of-event packet is sent this many times
const END_REPEATS: u8 = 3;

/// Map a digit character to its telephone-event code
pub fn digit_to_event(digit: char) -> Option<u8> {
    match digit {
        '0'..='9' => Some(digit as u8 - b'0'),
        '*' => Some(10),
        '#' => Some(11),
        'A'..='D' => Some(digit as u8 - b'A' + 12),
        'a'..='d' => Some(digit as u8 - b'a' + 12),
        _ => None,
    }
}

/// Map a telephone-event code back to its ASCII digit
pub fn event_to_digit(event: u8) -> Option<u8> {
    match event {
        0..=9 => Some(b'0' + event),
        10 => Some(b'*'),
        11 => Some(b'#'),
        12..=15 => Some(b'A' + event - 12),
        _ => None,
    }
}

/// A telephone-event packet ready to be wrapped in RTP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtmfPacket {
    pub event: TelephoneEvent,
    /// Set on the first packet of an event
    pub marker: bool,
    /// Timestamp of the event's start, shared by all its packets
    pub timestamp: RtpTimestamp,
}

#[derive(Debug, Clone)]
struct ActiveDigit {
    event: u8,
    start_ts: RtpTimestamp,
    duration: u32,
    started: bool,
    end_sent: u8,
}

/// Outgoing digit queue and event state machine
#[derive(Debug)]
pub struct DtmfSender {
    pending: VecDeque<u8>,
    current: Option<ActiveDigit>,
    digit_duration: u32,
    packets_sent: u64,
}

impl DtmfSender {
    /// `clock_rate` is the telephone-event clock, normally the audio clock
    pub fn new(clock_rate: u32) -> Self {
        Self {
            pending: VecDeque::with_capacity(MAX_DTMF_DIGITS),
            current: None,
            digit_duration: (clock_rate as u64 * DTMF_DIGIT_MS as u64 / 1000).min(u16::MAX as u64) as u32,
            packets_sent: 0,
        }
    }

    /// Digits not yet fully transmitted, the one in progress included
    pub fn pending(&self) -> usize {
        self.pending.len() + usize::from(self.current.is_some())
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    /// Validate and queue a digit string; nothing is queued on error
    pub fn enqueue(&mut self, digits: &str) -> Result<()> {
        let events = digits
            .chars()
            .map(|c| digit_to_event(c).ok_or(Error::InvalidDigit(c)))
            .collect::<Result<Vec<_>>>()?;

        let queued = self.pending();
        if queued + events.len() > MAX_DTMF_DIGITS {
            return Err(Error::TooManyDigits {
                requested: events.len(),
                queued,
                limit: MAX_DTMF_DIGITS,
            });
        }
        debug!("Queued {} DTMF digits ({} already pending)", events.len(), queued);
        self.pending.extend(events);
        Ok(())
    }

    /// The packet for this send opportunity, if a digit is being sent
    ///
    /// `timestamp` is the media timestamp of the frame being replaced and
    /// `frame_samples` its length in clock ticks.
    pub fn next_packet(&mut self, timestamp: RtpTimestamp, frame_samples: u32) -> Option<DtmfPacket> {
        if self.current.is_none() {
            let event = self.pending.pop_front()?;
            self.current = Some(ActiveDigit {
                event,
                start_ts: timestamp,
                duration: 0,
                started: false,
                end_sent: 0,
            });
        }
        let digit = self.current.as_mut()?;

        let marker = !digit.started;
        digit.started = true;
        digit.duration = (digit.duration + frame_samples).min(self.digit_duration);

        let mut event = TelephoneEvent::new(digit.event, DTMF_VOLUME, digit.duration as u16);
        if digit.duration >= self.digit_duration {
            event.end = true;
            digit.end_sent += 1;
        }
        let packet = DtmfPacket {
            event,
            marker,
            timestamp: digit.start_ts,
        };

        if digit.end_sent >= END_REPEATS {
            trace!("DTMF event {} complete", digit.event);
            self.current = None;
        }
        self.packets_sent += 1;
        Some(packet)
    }

    /// Abandon every digit, the one in progress included
    pub fn clear(&mut self) {
        self.pending.clear();
        self.current = None;
    }
}

/// Bounded queue of received digits; the oldest digit is dropped on overflow
#[derive(Debug, Default)]
pub struct DtmfQueue {
    digits: VecDeque<u8>,
    overflow: u64,
}

impl DtmfQueue {
    pub fn new() -> Self {
        Self {
            digits: VecDeque::with_capacity(MAX_DTMF_DIGITS),
            overflow: 0,
        }
    }

    /// Queue a digit, returning false if an older digit had to be dropped
    pub fn push(&mut self, digit: u8) -> bool {
        let mut kept = true;
        if self.digits.len() == MAX_DTMF_DIGITS {
            self.digits.pop_front();
            self.overflow += 1;
            kept = false;
        }
        self.digits.push_back(digit);
        kept
    }

    pub fn is_empty(&self) -> bool {
        self.digits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.digits.len()
    }

    pub fn overflow(&self) -> u64 {
        self.overflow
    }

    /// Move up to `out.len()` digits into `out`, oldest first
    pub fn drain_into(&mut self, out: &mut [u8]) -> usize {
        let count = out.len().min(self.digits.len());
        for (slot, digit) in out.iter_mut().zip(self.digits.drain(..count)) {
            *slot = digit;
        }
        count
    }
}

/// Incoming telephone-event decoder
#[derive(Debug, Default)]
pub struct DtmfReceiver {
    /// Start timestamp and code of the event seen last
    last_event: Option<(RtpTimestamp, u8)>,
    queue: DtmfQueue,
    events: u64,
}

impl DtmfReceiver {
    pub fn new() -> Self {
        Self {
            last_event: None,
            queue: DtmfQueue::new(),
            events: 0,
        }
    }

    /// Digest one telephone-event payload; returns the digit if it starts a new event
    pub fn on_payload(&mut self, timestamp: RtpTimestamp, payload: &[u8]) -> Option<u8> {
        let event = match TelephoneEvent::parse(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping malformed telephone-event payload: {}", e);
                return None;
            }
        };

        if self.last_event == Some((timestamp, event.event)) {
            return None;
        }
        self.last_event = Some((timestamp, event.event));

        let Some(digit) = event_to_digit(event.event) else {
            trace!("Ignoring non-DTMF telephone event {}", event.event);
            return None;
        };
        debug!("Received DTMF digit '{}'", digit as char);
        self.events += 1;
        if !self.queue.push(digit) {
            warn!("Incoming DTMF queue full, dropped the oldest digit");
        }
        Some(digit)
    }

    pub fn queue(&self) -> &DtmfQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut DtmfQueue {
        &mut self.queue
    }

    /// Events recognized so far
    pub fn events(&self) -> u64 {
        self.events
    }

    /// Forget the last event so a restarted source is decoded afresh
    pub fn reset(&mut self) {
        self.last_event = None;
    }
}
