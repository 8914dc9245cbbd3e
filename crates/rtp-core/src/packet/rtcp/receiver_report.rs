use bytes::{Buf, BufMut, BytesMut};

use super::RtcpReportBlock;
use crate::error::Error;
use crate::{Result, RtpSsrc};

/// RTCP Receiver Report (RFC 3550 section 6.4.2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpReceiverReport {
    /// Reporter SSRC
    pub ssrc: RtpSsrc,

    /// Reception reports
    pub report_blocks: Vec<RtcpReportBlock>,
}

impl RtcpReceiverReport {
    /// A report with no blocks
    pub fn new(ssrc: RtpSsrc) -> Self {
        Self { ssrc, report_blocks: Vec::new() }
    }

    /// Body size (everything after the common header)
    pub fn size(&self) -> usize {
        4 + self.report_blocks.len() * RtcpReportBlock::SIZE
    }

    pub(crate) fn serialize_body(&self, buf: &mut BytesMut) {
        buf.put_u32(self.ssrc);
        for block in &self.report_blocks {
            block.serialize(buf);
        }
    }
}

/// Parse an RR body carrying `count` report blocks
pub fn parse_receiver_report(buf: &mut impl Buf, count: u8) -> Result<RtcpReceiverReport> {
    if buf.remaining() < 4 {
        return Err(Error::BufferTooSmall {
            required: 4,
            available: buf.remaining(),
        });
    }

    let ssrc = buf.get_u32();
    let mut report_blocks = Vec::with_capacity(count as usize);
    for _ in 0..count {
        report_blocks.push(RtcpReportBlock::parse(buf)?);
    }

    Ok(RtcpReceiverReport { ssrc, report_blocks })
}
