//! RTP clock helpers
//!
//! Conversions between wall-clock durations and media-clock ticks, plus
//! modular timestamp arithmetic.

use std::time::Duration;

use crate::RtpTimestamp;

/// Convert a tick count at `clock_rate` to a duration
pub fn ticks_to_duration(ticks: u64, clock_rate: u32) -> Duration {
    if clock_rate == 0 {
        return Duration::ZERO;
    }
    let secs = ticks / clock_rate as u64;
    let rem = ticks % clock_rate as u64;
    Duration::new(secs, ((rem * 1_000_000_000) / clock_rate as u64) as u32)
}

/// Convert a duration to ticks at `clock_rate`, rounding down
pub fn duration_to_ticks(duration: Duration, clock_rate: u32) -> u64 {
    (duration.as_nanos() * clock_rate as u128 / 1_000_000_000) as u64
}

/// Signed distance from `earlier` to `later` in timestamp space
pub fn timestamp_delta(later: RtpTimestamp, earlier: RtpTimestamp) -> i32 {
    later.wrapping_sub(earlier) as i32
}

/// Samples (per channel) in one frame of `ptime_ms`
pub fn samples_per_frame(clock_rate: u32, ptime_ms: u32) -> u32 {
    (clock_rate as u64 * ptime_ms as u64 / 1000) as u32
}

/// Typical clock rates
pub mod clock_rates {
    /// G.711, G.722 (RTP clock), telephone-event
    pub const AUDIO_8KHZ: u32 = 8000;

    /// Wideband audio
    pub const AUDIO_16KHZ: u32 = 16000;

    /// Opus and fullband audio
    pub const AUDIO_48KHZ: u32 = 48000;

    /// Video payloads
    pub const VIDEO_90KHZ: u32 = 90000;
}
