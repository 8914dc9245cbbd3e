use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Seconds between the NTP epoch (1900) and the UNIX epoch (1970)
pub const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// 64-bit NTP timestamp carried in Sender Reports (RFC 3550 section 4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct NtpTimestamp {
    /// Seconds since January 1, 1900
    pub seconds: u32,

    /// Fraction of a second in units of 2^-32
    pub fraction: u32,
}

impl NtpTimestamp {
    /// The current wall-clock time
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Convert a wall-clock time; times before 1970 clamp to the UNIX epoch
    pub fn from_system_time(time: SystemTime) -> Self {
        let since_unix = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        let fraction = ((since_unix.subsec_nanos() as u64) << 32) / 1_000_000_000;
        Self {
            seconds: (since_unix.as_secs() + NTP_UNIX_OFFSET) as u32,
            fraction: fraction as u32,
        }
    }

    /// Back to wall-clock time
    pub fn to_system_time(&self) -> SystemTime {
        let secs = (self.seconds as u64).saturating_sub(NTP_UNIX_OFFSET);
        let nanos = ((self.fraction as u64) * 1_000_000_000) >> 32;
        UNIX_EPOCH + Duration::new(secs, nanos as u32)
    }

    /// Full 64-bit wire value
    pub fn to_u64(&self) -> u64 {
        ((self.seconds as u64) << 32) | self.fraction as u64
    }

    /// From the 64-bit wire value
    pub fn from_u64(value: u64) -> Self {
        Self {
            seconds: (value >> 32) as u32,
            fraction: value as u32,
        }
    }

    /// Middle 32 bits, the "compact" form used in LSR fields and RTT math
    pub fn to_compact(&self) -> u32 {
        ((self.seconds & 0xffff) << 16) | (self.fraction >> 16)
    }
}

/// Convert a compact NTP interval (1/65536 s units) to a duration
pub fn compact_to_duration(value: u32) -> Duration {
    Duration::from_micros((value as u64 * 1_000_000) >> 16)
}

/// Convert a duration to compact NTP units, saturating at u32::MAX
pub fn duration_to_compact(duration: Duration) -> u32 {
    let units = (duration.as_micros() << 16) / 1_000_000;
    units.min(u32::MAX as u128) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_epoch_conversion() {
        let ts = NtpTimestamp::from_system_time(UNIX_EPOCH + Duration::from_millis(1500));
        assert_eq!(ts.seconds as u64, NTP_UNIX_OFFSET + 1);
        assert_eq!(ts.fraction, 0x8000_0000);

        let back = ts.to_system_time().duration_since(UNIX_EPOCH).unwrap();
        assert_eq!(back.as_millis(), 1500);
    }

    #[test]
    fn test_compact_form() {
        let ts = NtpTimestamp { seconds: 0x1234_5678, fraction: 0x9abc_def0 };
        assert_eq!(ts.to_compact(), 0x5678_9abc);
        assert_eq!(NtpTimestamp::from_u64(ts.to_u64()), ts);
    }

    #[test]
    fn test_compact_durations() {
        assert_eq!(duration_to_compact(Duration::from_secs(1)), 65536);
        assert_eq!(compact_to_duration(32768), Duration::from_millis(500));
    }
}
