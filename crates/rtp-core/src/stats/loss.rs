use crate::RtpSequenceNumber;

/// Size of the duplicate-detection window in packets
const HISTORY_WINDOW: i64 = 64;

/// Outcome of feeding one sequence number to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketLossResult {
    /// First packet from this source
    FirstPacket,
    /// Exactly the next expected packet
    Sequential,
    /// Ahead of the expected packet; `gap` packets skipped for now
    Gap { gap: u32 },
    /// Older than the highest seen and not received before
    Reordered,
    /// Already received
    Duplicate,
}

/// Sequence-number based loss accounting (RFC 3550 appendix A.3)
///
/// Loss is `expected - received` over the extended sequence space, so a
/// reordered packet that eventually arrives never counts as lost.
#[derive(Debug, Clone, Default)]
pub struct PacketLossTracker {
    base_ext: Option<i64>,
    highest_ext: i64,
    /// Bit i set when sequence `highest_ext - i` has been received
    history: u64,
    received: u64,
    duplicates: u64,
    reordered: u64,
    expected_prior: i64,
    received_prior: u64,
}

impl PacketLossTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for an arriving packet
    pub fn process(&mut self, seq: RtpSequenceNumber) -> PacketLossResult {
        if self.base_ext.is_none() {
            self.base_ext = Some(seq as i64);
            self.highest_ext = seq as i64;
            self.history = 1;
            self.received = 1;
            return PacketLossResult::FirstPacket;
        }

        let delta = seq.wrapping_sub(self.highest_ext as u16) as i16 as i64;

        if delta > 0 {
            self.history = if delta >= HISTORY_WINDOW { 1 } else { (self.history << delta) | 1 };
            self.highest_ext += delta;
            self.received += 1;
            if delta == 1 {
                PacketLossResult::Sequential
            } else {
                PacketLossResult::Gap { gap: (delta - 1) as u32 }
            }
        } else if delta == 0 {
            self.duplicates += 1;
            PacketLossResult::Duplicate
        } else {
            let age = -delta;
            if age < HISTORY_WINDOW && self.history & (1 << age) != 0 {
                self.duplicates += 1;
                return PacketLossResult::Duplicate;
            }
            if age < HISTORY_WINDOW {
                self.history |= 1 << age;
            }
            // Packets from before the first one do not extend the expected range
            if self.base_ext.map_or(false, |base| self.highest_ext - age >= base) {
                self.received += 1;
            }
            self.reordered += 1;
            PacketLossResult::Reordered
        }
    }

    /// Packets expected so far
    pub fn expected(&self) -> i64 {
        self.base_ext.map_or(0, |base| self.highest_ext - base + 1)
    }

    /// Distinct packets received
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Cumulative number of packets lost
    pub fn cumulative_lost(&self) -> i64 {
        self.expected() - self.received as i64
    }

    /// Extended highest sequence number, as carried in report blocks
    pub fn extended_highest(&self) -> u32 {
        self.highest_ext as u32
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    pub fn reordered(&self) -> u64 {
        self.reordered
    }

    /// Fraction lost since the previous call, in 1/256 units
    ///
    /// Closes the current reporting interval.
    pub fn take_fraction_lost(&mut self) -> u8 {
        let expected = self.expected();
        let expected_interval = expected - self.expected_prior;
        let received_interval = self.received as i64 - self.received_prior as i64;
        self.expected_prior = expected;
        self.received_prior = self.received;

        let lost_interval = expected_interval - received_interval;
        if expected_interval <= 0 || lost_interval <= 0 {
            0
        } else {
            ((lost_interval << 8) / expected_interval).min(255) as u8
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reordering_is_not_loss() {
        let mut tracker = PacketLossTracker::new();
        assert_eq!(tracker.process(100), PacketLossResult::FirstPacket);
        assert_eq!(tracker.process(102), PacketLossResult::Gap { gap: 1 });
        assert_eq!(tracker.process(101), PacketLossResult::Reordered);
        assert_eq!(tracker.process(103), PacketLossResult::Sequential);

        assert_eq!(tracker.expected(), 4);
        assert_eq!(tracker.cumulative_lost(), 0);
        assert_eq!(tracker.reordered(), 1);
    }

    #[test]
    fn test_duplicates_detected() {
        let mut tracker = PacketLossTracker::new();
        tracker.process(10);
        tracker.process(11);
        tracker.process(12);
        assert_eq!(tracker.process(12), PacketLossResult::Duplicate);
        assert_eq!(tracker.process(10), PacketLossResult::Duplicate);
        assert_eq!(tracker.duplicates(), 2);
        assert_eq!(tracker.received(), 3);
    }

    #[test]
    fn test_wraparound_extends_sequence() {
        let mut tracker = PacketLossTracker::new();
        tracker.process(65534);
        tracker.process(65535);
        assert_eq!(tracker.process(1), PacketLossResult::Gap { gap: 1 });

        assert_eq!(tracker.extended_highest(), 65537);
        assert_eq!(tracker.cumulative_lost(), 1);
    }

    #[test]
    fn test_fraction_lost_per_interval() {
        let mut tracker = PacketLossTracker::new();
        for seq in [0u16, 1, 3, 4] {
            tracker.process(seq);
        }
        // 1 of 5 lost -> 51/256
        assert_eq!(tracker.take_fraction_lost(), 51);

        for seq in 5u16..10 {
            tracker.process(seq);
        }
        assert_eq!(tracker.take_fraction_lost(), 0);
    }
}
