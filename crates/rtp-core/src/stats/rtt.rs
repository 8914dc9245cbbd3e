use std::time::Duration;

use crate::packet::rtcp::{compact_to_duration, NtpTimestamp, RtcpReportBlock};

/// Weight of a new sample in the smoothed estimate
const RTT_ALPHA: f64 = 0.125;

/// Samples above this are treated as clock garbage
const MAX_SANE_RTT: Duration = Duration::from_secs(30);

/// Round-trip time from report blocks (RFC 3550 section 6.4.1)
///
/// `rtt = A - LSR - DLSR` with all three in compact NTP units, where A is
/// the arrival time of the report.
#[derive(Debug, Clone, Default)]
pub struct RttEstimator {
    smoothed_ms: Option<f64>,
    last_ms: Option<f64>,
    min_ms: Option<f64>,
    max_ms: Option<f64>,
    samples: u64,
}

impl RttEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in a report block about our own stream; returns the new sample
    pub fn process_report_block(
        &mut self,
        block: &RtcpReportBlock,
        arrival: NtpTimestamp,
    ) -> Option<Duration> {
        if block.last_sr == 0 {
            // The peer has not seen one of our SRs yet
            return None;
        }

        let rtt_units = arrival
            .to_compact()
            .wrapping_sub(block.last_sr)
            .wrapping_sub(block.delay_since_last_sr);
        if rtt_units >= 0x8000_0000 {
            return None;
        }
        let rtt = compact_to_duration(rtt_units);
        if rtt > MAX_SANE_RTT {
            return None;
        }

        let ms = rtt.as_secs_f64() * 1000.0;
        self.smoothed_ms = Some(match self.smoothed_ms {
            Some(prev) => prev + RTT_ALPHA * (ms - prev),
            None => ms,
        });
        self.last_ms = Some(ms);
        self.min_ms = Some(self.min_ms.map_or(ms, |m| m.min(ms)));
        self.max_ms = Some(self.max_ms.map_or(ms, |m| m.max(ms)));
        self.samples += 1;

        Some(rtt)
    }

    /// Smoothed round-trip time in milliseconds
    pub fn smoothed_ms(&self) -> Option<f64> {
        self.smoothed_ms
    }

    pub fn last_ms(&self) -> Option<f64> {
        self.last_ms
    }

    pub fn min_ms(&self) -> Option<f64> {
        self.min_ms
    }

    pub fn max_ms(&self) -> Option<f64> {
        self.max_ms
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}
