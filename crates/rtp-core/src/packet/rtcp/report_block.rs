use bytes::{Buf, BufMut, BytesMut};

use crate::error::Error;
use crate::{Result, RtpSsrc};

/// One reception report block as carried by SR and RR packets
///
/// RFC 3550 section 6.4.1; always 24 bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RtcpReportBlock {
    /// Source this block reports on
    pub ssrc: RtpSsrc,

    /// Fraction lost since the previous report, in 1/256 units
    pub fraction_lost: u8,

    /// Cumulative packets lost; 24-bit signed on the wire
    pub cumulative_lost: i32,

    /// Extended highest sequence number received
    pub highest_seq: u32,

    /// Interarrival jitter in timestamp units
    pub jitter: u32,

    /// Compact NTP timestamp of the last SR received from this source
    pub last_sr: u32,

    /// Delay since that SR, in 1/65536 s
    pub delay_since_last_sr: u32,
}

impl RtcpReportBlock {
    /// Size in bytes
    pub const SIZE: usize = 24;

    /// A zeroed block for `ssrc`
    pub fn new(ssrc: RtpSsrc) -> Self {
        Self { ssrc, ..Default::default() }
    }

    /// Parse one block
    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < Self::SIZE {
            return Err(Error::BufferTooSmall {
                required: Self::SIZE,
                available: buf.remaining(),
            });
        }

        let ssrc = buf.get_u32();
        let loss_word = buf.get_u32();
        let fraction_lost = (loss_word >> 24) as u8;
        // Sign-extend the low 24 bits
        let cumulative_lost = ((loss_word << 8) as i32) >> 8;

        Ok(Self {
            ssrc,
            fraction_lost,
            cumulative_lost,
            highest_seq: buf.get_u32(),
            jitter: buf.get_u32(),
            last_sr: buf.get_u32(),
            delay_since_last_sr: buf.get_u32(),
        })
    }

    /// Append the block to `buf`
    pub fn serialize(&self, buf: &mut BytesMut) {
        let lost = self.cumulative_lost.clamp(-0x80_0000, 0x7f_ffff);
        buf.put_u32(self.ssrc);
        buf.put_u32(((self.fraction_lost as u32) << 24) | (lost as u32 & 0x00ff_ffff));
        buf.put_u32(self.highest_seq);
        buf.put_u32(self.jitter);
        buf.put_u32(self.last_sr);
        buf.put_u32(self.delay_since_last_sr);
    }
}
