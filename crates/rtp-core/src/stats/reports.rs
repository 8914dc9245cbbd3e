use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// RFC 3550 minimum report interval
pub const RTCP_MIN_INTERVAL: Duration = Duration::from_secs(5);

/// RTCP scheduling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtcpConfig {
    /// Nominal interval between reports
    #[serde(with = "millis")]
    pub interval: Duration,

    /// Also report after this many RTP packets (sent plus received)
    pub packet_interval: Option<u32>,

    /// Randomize each interval to [0.5, 1.5] of nominal
    pub randomize: bool,

    /// Canonical name announced in SDES; generated when absent
    pub cname: Option<String>,
}

impl Default for RtcpConfig {
    fn default() -> Self {
        Self {
            interval: RTCP_MIN_INTERVAL,
            packet_interval: None,
            randomize: true,
            cname: None,
        }
    }
}

impl RtcpConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_packet_interval(mut self, packets: u32) -> Self {
        self.packet_interval = Some(packets);
        self
    }

    pub fn with_cname(mut self, cname: impl Into<String>) -> Self {
        self.cname = Some(cname.into());
        self
    }
}

/// Decides when the next report is due
#[derive(Debug, Clone)]
pub struct ReportTimer {
    config: RtcpConfig,
    last_report: Instant,
    current_interval: Duration,
    packets_since_report: u32,
}

impl ReportTimer {
    pub fn new(config: RtcpConfig, now: Instant) -> Self {
        let mut timer = Self {
            current_interval: config.interval,
            config,
            last_report: now,
            packets_since_report: 0,
        };
        timer.current_interval = timer.next_interval();
        timer
    }

    fn next_interval(&self) -> Duration {
        if !self.config.randomize {
            return self.config.interval;
        }
        let factor = rand::thread_rng().gen_range(0.5..1.5);
        self.config.interval.mul_f64(factor)
    }

    /// Count one RTP packet toward the packet trigger
    pub fn count_packet(&mut self) {
        self.packets_since_report = self.packets_since_report.saturating_add(1);
    }

    pub fn is_due(&self, now: Instant) -> bool {
        if let Some(threshold) = self.config.packet_interval {
            if threshold > 0 && self.packets_since_report >= threshold {
                return true;
            }
        }
        now.saturating_duration_since(self.last_report) >= self.current_interval
    }

    /// Restart the interval after a report went out
    pub fn reported(&mut self, now: Instant) {
        self.last_report = now;
        self.packets_since_report = 0;
        self.current_interval = self.next_interval();
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_trigger() {
        let start = Instant::now();
        let config = RtcpConfig { randomize: false, ..Default::default() };
        let mut timer = ReportTimer::new(config, start);

        assert!(!timer.is_due(start + Duration::from_secs(4)));
        assert!(timer.is_due(start + Duration::from_secs(5)));

        timer.reported(start + Duration::from_secs(5));
        assert!(!timer.is_due(start + Duration::from_secs(6)));
    }

    #[test]
    fn test_packet_trigger() {
        let start = Instant::now();
        let mut timer = ReportTimer::new(RtcpConfig::default().with_packet_interval(3), start);
        timer.count_packet();
        timer.count_packet();
        assert!(!timer.is_due(start));
        timer.count_packet();
        assert!(timer.is_due(start));
    }

    #[test]
    fn test_randomized_interval_bounds() {
        let start = Instant::now();
        for _ in 0..20 {
            let timer = ReportTimer::new(RtcpConfig::default(), start);
            assert!(!timer.is_due(start + Duration::from_millis(2499)));
            assert!(timer.is_due(start + Duration::from_millis(7500)));
        }
    }
}
