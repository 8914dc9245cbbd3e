use bytes::{Buf, BufMut, BytesMut};

use super::{NtpTimestamp, RtcpReportBlock};
use crate::error::Error;
use crate::{Result, RtpSsrc, RtpTimestamp};

/// RTCP Sender Report (RFC 3550 section 6.4.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpSenderReport {
    /// Sender SSRC
    pub ssrc: RtpSsrc,

    /// Wall-clock time the report was generated
    pub ntp_timestamp: NtpTimestamp,

    /// RTP timestamp matching `ntp_timestamp` on the media clock
    pub rtp_timestamp: RtpTimestamp,

    /// Packets sent since the start of transmission
    pub sender_packet_count: u32,

    /// Payload octets sent since the start of transmission
    pub sender_octet_count: u32,

    /// Reception reports about the sources we hear
    pub report_blocks: Vec<RtcpReportBlock>,
}

impl RtcpSenderReport {
    const SENDER_INFO_SIZE: usize = 24;

    /// Body size (everything after the common header)
    pub fn size(&self) -> usize {
        Self::SENDER_INFO_SIZE + self.report_blocks.len() * RtcpReportBlock::SIZE
    }

    pub(crate) fn serialize_body(&self, buf: &mut BytesMut) {
        buf.put_u32(self.ssrc);
        buf.put_u64(self.ntp_timestamp.to_u64());
        buf.put_u32(self.rtp_timestamp);
        buf.put_u32(self.sender_packet_count);
        buf.put_u32(self.sender_octet_count);
        for block in &self.report_blocks {
            block.serialize(buf);
        }
    }
}

/// Parse an SR body carrying `count` report blocks
pub fn parse_sender_report(buf: &mut impl Buf, count: u8) -> Result<RtcpSenderReport> {
    if buf.remaining() < RtcpSenderReport::SENDER_INFO_SIZE {
        return Err(Error::BufferTooSmall {
            required: RtcpSenderReport::SENDER_INFO_SIZE,
            available: buf.remaining(),
        });
    }

    let ssrc = buf.get_u32();
    let ntp_timestamp = NtpTimestamp::from_u64(buf.get_u64());
    let rtp_timestamp = buf.get_u32();
    let sender_packet_count = buf.get_u32();
    let sender_octet_count = buf.get_u32();

    let mut report_blocks = Vec::with_capacity(count as usize);
    for _ in 0..count {
        report_blocks.push(RtcpReportBlock::parse(buf)?);
    }

    Ok(RtcpSenderReport {
        ssrc,
        ntp_timestamp,
        rtp_timestamp,
        sender_packet_count,
        sender_octet_count,
        report_blocks,
    })
}
