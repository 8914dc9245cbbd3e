use std::time::Instant;

use crate::time::{duration_to_ticks, timestamp_delta};
use crate::RtpTimestamp;

/// Interarrival jitter estimator (RFC 3550 section 6.4.1 and A.8)
///
/// Transit time is arrival time in media-clock ticks minus the RTP
/// timestamp; jitter tracks |D| with a gain of 1/16.
#[derive(Debug, Clone)]
pub struct JitterEstimator {
    clock_rate: u32,
    origin: Option<Instant>,
    last_transit: Option<u32>,
    jitter: f64,
}

impl JitterEstimator {
    pub fn new(clock_rate: u32) -> Self {
        Self {
            clock_rate,
            origin: None,
            last_transit: None,
            jitter: 0.0,
        }
    }

    /// Feed one packet; returns the updated estimate in timestamp units
    pub fn update(&mut self, rtp_timestamp: RtpTimestamp, arrival: Instant) -> f64 {
        let origin = *self.origin.get_or_insert(arrival);
        let arrival_ticks = duration_to_ticks(arrival.saturating_duration_since(origin), self.clock_rate);
        let transit = (arrival_ticks as u32).wrapping_sub(rtp_timestamp);

        if let Some(last) = self.last_transit {
            let d = timestamp_delta(transit, last).unsigned_abs() as f64;
            self.jitter += (d - self.jitter) / 16.0;
        }
        self.last_transit = Some(transit);
        self.jitter
    }

    /// Current estimate in timestamp units
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Current estimate in milliseconds
    pub fn jitter_ms(&self) -> f64 {
        if self.clock_rate == 0 {
            return 0.0;
        }
        self.jitter * 1000.0 / self.clock_rate as f64
    }

    pub fn reset(&mut self) {
        self.origin = None;
        self.last_transit = None;
        self.jitter = 0.0;
    }
}
