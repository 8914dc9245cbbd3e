//! RTCP statistics engine
//!
//! Accumulates send and receive counters for one RTP session, schedules
//! Sender/Receiver Reports and digests the peer's reports. The engine is a
//! plain value: the owner decides how to share it between threads.

pub mod jitter;
pub mod loss;
pub mod reports;
pub mod rtt;

pub use jitter::JitterEstimator;
pub use loss::{PacketLossResult, PacketLossTracker};
pub use reports::{ReportTimer, RtcpConfig, RTCP_MIN_INTERVAL};
pub use rtt::RttEstimator;

use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, trace};

use crate::packet::rtcp::{
    duration_to_compact, NtpTimestamp, RtcpGoodbye, RtcpPacket, RtcpReceiverReport,
    RtcpReportBlock, RtcpSenderReport, RtcpSourceDescription,
};
use crate::time::duration_to_ticks;
use crate::{Result, RtpSequenceNumber, RtpSsrc, RtpTimestamp};

/// Snapshot of a session's RTCP statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct RtcpStat {
    /// Wall-clock time the session started
    pub started_at: Option<NtpTimestamp>,

    /// RTP packets sent
    pub packets_sent: u64,

    /// RTP payload octets sent
    pub octets_sent: u64,

    /// RTP packets received (duplicates excluded)
    pub packets_received: u64,

    /// RTP payload octets received
    pub octets_received: u64,

    /// Cumulative packets lost on the receive side
    pub packets_lost: i64,

    /// Fraction lost in the last reported interval (1/256 units)
    pub fraction_lost: u8,

    /// Duplicate packets seen
    pub packets_duplicated: u64,

    /// Packets that arrived after a later one
    pub packets_out_of_order: u64,

    /// Interarrival jitter in timestamp units
    pub jitter: f64,

    /// Interarrival jitter in milliseconds
    pub jitter_ms: f64,

    /// Smoothed round-trip time
    pub rtt_ms: Option<f64>,
    pub rtt_min_ms: Option<f64>,
    pub rtt_max_ms: Option<f64>,

    /// Loss the peer reports about our transmission
    pub remote_packets_lost: Option<i64>,
    pub remote_fraction_lost: Option<u8>,

    /// Jitter the peer reports about our transmission
    pub remote_jitter_ms: Option<f64>,

    pub sr_sent: u64,
    pub rr_sent: u64,
    pub sr_received: u64,
    pub rr_received: u64,

    /// Time of the last report we sent and of the last one received
    pub last_sr_sent: Option<NtpTimestamp>,
    pub last_rr_sent: Option<NtpTimestamp>,
    pub last_sr_received: Option<NtpTimestamp>,
    pub last_rr_received: Option<NtpTimestamp>,

    /// Remote source, once heard
    pub peer_ssrc: Option<RtpSsrc>,
    pub peer_cname: Option<String>,

    /// The peer sent BYE
    pub peer_left: bool,
}

/// Per-session RTCP state
#[derive(Debug)]
pub struct RtcpEngine {
    ssrc: RtpSsrc,
    clock_rate: u32,
    cname: String,
    timer: ReportTimer,
    stat: RtcpStat,

    // Transmit side
    sent_since_report: bool,
    last_rtp_ts: Option<(RtpTimestamp, Instant)>,

    // Receive side
    loss: PacketLossTracker,
    jitter: JitterEstimator,
    lost_before_reset: i64,
    /// Compact NTP of the last SR from the peer and when it arrived
    last_peer_sr: Option<(u32, Instant)>,

    rtt: RttEstimator,
}

impl RtcpEngine {
    pub fn new(ssrc: RtpSsrc, clock_rate: u32, config: RtcpConfig) -> Self {
        let cname = config
            .cname
            .clone()
            .unwrap_or_else(|| format!("{}@streamcore", uuid::Uuid::new_v4().simple()));
        let now = Instant::now();

        Self {
            ssrc,
            clock_rate,
            cname,
            timer: ReportTimer::new(config, now),
            stat: RtcpStat {
                started_at: Some(NtpTimestamp::now()),
                ..Default::default()
            },
            sent_since_report: false,
            last_rtp_ts: None,
            loss: PacketLossTracker::new(),
            jitter: JitterEstimator::new(clock_rate),
            lost_before_reset: 0,
            last_peer_sr: None,
            rtt: RttEstimator::new(),
        }
    }

    pub fn ssrc(&self) -> RtpSsrc {
        self.ssrc
    }

    pub fn cname(&self) -> &str {
        &self.cname
    }

    /// Account for an RTP packet we transmitted
    pub fn on_rtp_sent(&mut self, timestamp: RtpTimestamp, payload_len: usize) {
        self.stat.packets_sent += 1;
        self.stat.octets_sent += payload_len as u64;
        self.sent_since_report = true;
        self.last_rtp_ts = Some((timestamp, Instant::now()));
        self.timer.count_packet();
    }

    /// Account for an RTP packet from the peer
    pub fn on_rtp_received(
        &mut self,
        ssrc: RtpSsrc,
        seq: RtpSequenceNumber,
        timestamp: RtpTimestamp,
        payload_len: usize,
        arrival: Instant,
    ) -> PacketLossResult {
        match self.stat.peer_ssrc {
            Some(current) if current != ssrc => {
                info!("Peer SSRC changed from {:08x} to {:08x}, restarting receive statistics", current, ssrc);
                self.restart_receiver();
                self.stat.peer_ssrc = Some(ssrc);
            }
            None => self.stat.peer_ssrc = Some(ssrc),
            _ => {}
        }

        let result = self.loss.process(seq);
        self.timer.count_packet();
        if result == PacketLossResult::Duplicate {
            self.stat.packets_duplicated += 1;
            return result;
        }

        self.stat.packets_received += 1;
        self.stat.octets_received += payload_len as u64;
        if result == PacketLossResult::Reordered {
            self.stat.packets_out_of_order += 1;
        }
        self.jitter.update(timestamp, arrival);
        trace!("RTP in seq={} ts={} result={:?}", seq, timestamp, result);
        result
    }

    fn restart_receiver(&mut self) {
        self.lost_before_reset += self.loss.cumulative_lost();
        self.loss.reset();
        self.jitter.reset();
        self.last_peer_sr = None;
        self.stat.peer_cname = None;
        self.stat.peer_left = false;
    }

    /// Digest a compound RTCP datagram from the peer
    pub fn on_rtcp_received(&mut self, data: &[u8], arrival: Instant) -> Result<()> {
        let now_ntp = NtpTimestamp::now();

        for packet in RtcpPacket::parse_compound(data)? {
            match packet {
                RtcpPacket::SenderReport(sr) => {
                    self.stat.sr_received += 1;
                    self.stat.last_sr_received = Some(now_ntp);
                    self.last_peer_sr = Some((sr.ntp_timestamp.to_compact(), arrival));
                    self.apply_report_blocks(&sr.report_blocks, now_ntp);
                }
                RtcpPacket::ReceiverReport(rr) => {
                    self.stat.rr_received += 1;
                    self.stat.last_rr_received = Some(now_ntp);
                    self.apply_report_blocks(&rr.report_blocks, now_ntp);
                }
                RtcpPacket::SourceDescription(sdes) => {
                    if let Some(peer) = self.stat.peer_ssrc {
                        if let Some(cname) = sdes.cname(peer) {
                            self.stat.peer_cname = Some(cname.to_string());
                        }
                    }
                }
                RtcpPacket::Goodbye(bye) => {
                    if self.stat.peer_ssrc.map_or(true, |peer| bye.sources.contains(&peer)) {
                        info!("Peer left the session: {}", bye.reason.as_deref().unwrap_or("no reason"));
                        self.stat.peer_left = true;
                    }
                }
            }
        }
        Ok(())
    }

    fn apply_report_blocks(&mut self, blocks: &[RtcpReportBlock], arrival: NtpTimestamp) {
        for block in blocks.iter().filter(|b| b.ssrc == self.ssrc) {
            self.stat.remote_packets_lost = Some(block.cumulative_lost as i64);
            self.stat.remote_fraction_lost = Some(block.fraction_lost);
            self.stat.remote_jitter_ms = Some(block.jitter as f64 * 1000.0 / self.clock_rate.max(1) as f64);

            if let Some(rtt) = self.rtt.process_report_block(block, arrival) {
                debug!("RTT sample {:?}", rtt);
            }
        }
    }

    /// True when the schedule calls for a report
    pub fn is_report_due(&self, now: Instant) -> bool {
        self.timer.is_due(now)
    }

    /// True when we transmitted media since the last report
    pub fn is_sender(&self) -> bool {
        self.sent_since_report
    }

    fn report_block(&mut self, now: Instant) -> Option<RtcpReportBlock> {
        let peer = self.stat.peer_ssrc?;
        if self.loss.expected() == 0 {
            return None;
        }

        let fraction_lost = self.loss.take_fraction_lost();
        self.stat.fraction_lost = fraction_lost;

        let (last_sr, delay_since_last_sr) = match self.last_peer_sr {
            Some((compact, at)) => (compact, duration_to_compact(now.saturating_duration_since(at))),
            None => (0, 0),
        };

        Some(RtcpReportBlock {
            ssrc: peer,
            fraction_lost,
            cumulative_lost: self.loss.cumulative_lost() as i32,
            highest_seq: self.loss.extended_highest(),
            jitter: self.jitter.jitter() as u32,
            last_sr,
            delay_since_last_sr,
        })
    }

    fn report_packet(&mut self, now: Instant) -> RtcpPacket {
        let blocks: Vec<_> = self.report_block(now).into_iter().collect();
        let ntp = NtpTimestamp::now();

        let packet = if self.sent_since_report {
            // Extrapolate the media clock to the report's wall-clock instant
            let rtp_timestamp = match self.last_rtp_ts {
                Some((ts, at)) => {
                    let elapsed = duration_to_ticks(now.saturating_duration_since(at), self.clock_rate);
                    ts.wrapping_add(elapsed as u32)
                }
                None => 0,
            };
            self.stat.sr_sent += 1;
            self.stat.last_sr_sent = Some(ntp);
            RtcpPacket::SenderReport(RtcpSenderReport {
                ssrc: self.ssrc,
                ntp_timestamp: ntp,
                rtp_timestamp,
                sender_packet_count: self.stat.packets_sent as u32,
                sender_octet_count: self.stat.octets_sent as u32,
                report_blocks: blocks,
            })
        } else {
            self.stat.rr_sent += 1;
            self.stat.last_rr_sent = Some(ntp);
            RtcpPacket::ReceiverReport(RtcpReceiverReport {
                ssrc: self.ssrc,
                report_blocks: blocks,
            })
        };

        self.sent_since_report = false;
        self.timer.reported(now);
        packet
    }

    /// Build the next compound report: SR or RR followed by SDES
    pub fn build_report(&mut self, now: Instant) -> Result<Bytes> {
        let report = self.report_packet(now);
        debug!("Sending RTCP {:?} for ssrc={:08x}", report.packet_type(), self.ssrc);
        RtcpPacket::serialize_compound(&[
            report,
            RtcpPacket::SourceDescription(RtcpSourceDescription::with_cname(self.ssrc, &self.cname)),
        ])
    }

    /// Build the final compound packet announcing our departure
    pub fn build_bye(&mut self, now: Instant, reason: Option<&str>) -> Result<Bytes> {
        let report = self.report_packet(now);
        RtcpPacket::serialize_compound(&[
            report,
            RtcpPacket::SourceDescription(RtcpSourceDescription::with_cname(self.ssrc, &self.cname)),
            RtcpPacket::Goodbye(RtcpGoodbye::new(self.ssrc, reason.map(str::to_string))),
        ])
    }

    /// Immutable snapshot for monitoring
    pub fn snapshot(&self) -> RtcpStat {
        let mut stat = self.stat.clone();
        stat.packets_lost = self.lost_before_reset + self.loss.cumulative_lost();
        stat.jitter = self.jitter.jitter();
        stat.jitter_ms = self.jitter.jitter_ms();
        stat.rtt_ms = self.rtt.smoothed_ms();
        stat.rtt_min_ms = self.rtt.min_ms();
        stat.rtt_max_ms = self.rtt.max_ms();
        stat
    }
}
