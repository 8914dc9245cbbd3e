//! RTCP packets (RFC 3550 section 6)
//!
//! Only the packet types a media stream exchanges on its own are modeled:
//! SR, RR, SDES and BYE. Other types found inside a compound packet are
//! skipped by [`RtcpPacket::parse_compound`].

mod bye;
mod ntp;
mod receiver_report;
mod report_block;
mod sdes;
mod sender_report;

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub use bye::{parse_goodbye, RtcpGoodbye};
pub use ntp::{compact_to_duration, duration_to_compact, NtpTimestamp, NTP_UNIX_OFFSET};
pub use receiver_report::{parse_receiver_report, RtcpReceiverReport};
pub use report_block::RtcpReportBlock;
pub use sdes::{parse_source_description, RtcpSourceDescription, SdesChunk, SdesItem, SDES_CNAME};
pub use sender_report::{parse_sender_report, RtcpSenderReport};

use crate::error::Error;
use crate::Result;

/// RTCP version (same as RTP)
pub const RTCP_VERSION: u8 = 2;

const RTCP_HEADER_SIZE: usize = 4;

/// RTCP packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RtcpPacketType {
    SenderReport = 200,
    ReceiverReport = 201,
    SourceDescription = 202,
    Goodbye = 203,
    ApplicationDefined = 204,
}

impl TryFrom<u8> for RtcpPacketType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            200 => Ok(Self::SenderReport),
            201 => Ok(Self::ReceiverReport),
            202 => Ok(Self::SourceDescription),
            203 => Ok(Self::Goodbye),
            204 => Ok(Self::ApplicationDefined),
            _ => Err(Error::RtcpError(format!("Unknown RTCP packet type: {}", value))),
        }
    }
}

/// Returns true when the second octet of a datagram marks it as RTCP
///
/// Used to demultiplex RTP and RTCP sharing one port (RFC 5761).
pub fn is_rtcp(data: &[u8]) -> bool {
    data.len() >= RTCP_HEADER_SIZE && (200..=204).contains(&data[1])
}

/// An RTCP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport(RtcpSenderReport),
    ReceiverReport(RtcpReceiverReport),
    SourceDescription(RtcpSourceDescription),
    Goodbye(RtcpGoodbye),
}

impl RtcpPacket {
    /// Packet type
    pub fn packet_type(&self) -> RtcpPacketType {
        match self {
            Self::SenderReport(_) => RtcpPacketType::SenderReport,
            Self::ReceiverReport(_) => RtcpPacketType::ReceiverReport,
            Self::SourceDescription(_) => RtcpPacketType::SourceDescription,
            Self::Goodbye(_) => RtcpPacketType::Goodbye,
        }
    }

    fn count(&self) -> usize {
        match self {
            Self::SenderReport(sr) => sr.report_blocks.len(),
            Self::ReceiverReport(rr) => rr.report_blocks.len(),
            Self::SourceDescription(sdes) => sdes.chunks.len(),
            Self::Goodbye(bye) => bye.sources.len(),
        }
    }

    fn body_size(&self) -> usize {
        match self {
            Self::SenderReport(sr) => sr.size(),
            Self::ReceiverReport(rr) => rr.size(),
            Self::SourceDescription(sdes) => sdes.size(),
            Self::Goodbye(bye) => bye.size(),
        }
    }

    /// Size on the wire including the common header
    pub fn size(&self) -> usize {
        RTCP_HEADER_SIZE + self.body_size()
    }

    /// Parse a single packet (the first one of a compound)
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut packets = Self::parse_compound(data)?;
        if packets.is_empty() {
            return Err(Error::RtcpError("No supported RTCP packet found".to_string()));
        }
        Ok(packets.swap_remove(0))
    }

    /// Parse every supported packet of a compound datagram
    pub fn parse_compound(data: &[u8]) -> Result<Vec<Self>> {
        let mut buf = Bytes::copy_from_slice(data);
        let mut packets = Vec::new();

        while buf.has_remaining() {
            if buf.remaining() < RTCP_HEADER_SIZE {
                return Err(Error::BufferTooSmall {
                    required: RTCP_HEADER_SIZE,
                    available: buf.remaining(),
                });
            }

            let first = buf.get_u8();
            let version = first >> 6;
            if version != RTCP_VERSION {
                return Err(Error::RtcpError(format!("Invalid RTCP version: {}", version)));
            }
            let padding = first & 0x20 != 0;
            let count = first & 0x1f;
            let packet_type = buf.get_u8();
            let length = buf.get_u16() as usize * 4;

            if buf.remaining() < length {
                return Err(Error::BufferTooSmall {
                    required: length,
                    available: buf.remaining(),
                });
            }
            let mut body = buf.split_to(length);
            if padding {
                let pad = body.last().copied().unwrap_or(0) as usize;
                if pad == 0 || pad > body.len() {
                    return Err(Error::RtcpError(format!("Invalid RTCP padding: {}", pad)));
                }
                body.truncate(body.len() - pad);
            }

            let packet = match RtcpPacketType::try_from(packet_type) {
                Ok(RtcpPacketType::SenderReport) => {
                    Self::SenderReport(parse_sender_report(&mut body, count)?)
                }
                Ok(RtcpPacketType::ReceiverReport) => {
                    Self::ReceiverReport(parse_receiver_report(&mut body, count)?)
                }
                Ok(RtcpPacketType::SourceDescription) => {
                    Self::SourceDescription(parse_source_description(&mut body, count)?)
                }
                Ok(RtcpPacketType::Goodbye) => Self::Goodbye(parse_goodbye(&mut body, count)?),
                // APP, XR and friends are not interpreted
                _ => continue,
            };
            packets.push(packet);
        }

        Ok(packets)
    }

    /// Append this packet, with its common header, to `buf`
    pub fn serialize_into(&self, buf: &mut BytesMut) -> Result<()> {
        let count = self.count();
        if count > 31 {
            return Err(Error::EncodeError(format!("Too many RTCP items: {}", count)));
        }
        let body_size = self.body_size();
        debug_assert_eq!(body_size % 4, 0);

        buf.reserve(RTCP_HEADER_SIZE + body_size);
        buf.put_u8((RTCP_VERSION << 6) | count as u8);
        buf.put_u8(self.packet_type() as u8);
        buf.put_u16((body_size / 4) as u16);

        match self {
            Self::SenderReport(sr) => sr.serialize_body(buf),
            Self::ReceiverReport(rr) => rr.serialize_body(buf),
            Self::SourceDescription(sdes) => sdes.serialize_body(buf),
            Self::Goodbye(bye) => bye.serialize_body(buf),
        }
        Ok(())
    }

    /// Serialize a single packet
    pub fn serialize(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.size());
        self.serialize_into(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Serialize several packets back to back into one compound datagram
    pub fn serialize_compound(packets: &[RtcpPacket]) -> Result<Bytes> {
        let total = packets.iter().map(RtcpPacket::size).sum();
        let mut buf = BytesMut::with_capacity(total);
        for packet in packets {
            packet.serialize_into(&mut buf)?;
        }
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> RtcpReportBlock {
        RtcpReportBlock {
            ssrc: 0x2222,
            fraction_lost: 12,
            cumulative_lost: 3,
            highest_seq: 70_000,
            jitter: 40,
            last_sr: 0xabcd_0001,
            delay_since_last_sr: 1000,
        }
    }

    #[test]
    fn test_compound_sr_sdes_bye() {
        let sr = RtcpSenderReport {
            ssrc: 0x1111,
            ntp_timestamp: NtpTimestamp { seconds: 10, fraction: 20 },
            rtp_timestamp: 8000,
            sender_packet_count: 50,
            sender_octet_count: 8000,
            report_blocks: vec![sample_block()],
        };
        let packets = vec![
            RtcpPacket::SenderReport(sr.clone()),
            RtcpPacket::SourceDescription(RtcpSourceDescription::with_cname(0x1111, "alice@host")),
            RtcpPacket::Goodbye(RtcpGoodbye::new(0x1111, Some("hangup".to_string()))),
        ];

        let bytes = RtcpPacket::serialize_compound(&packets).unwrap();
        assert_eq!(bytes.len() % 4, 0);
        assert_eq!(bytes[1], 200);
        // SR length field: 6 words of sender info + 6 words per block
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), 12);

        let parsed = RtcpPacket::parse_compound(&bytes).unwrap();
        assert_eq!(parsed, packets);

        match &parsed[1] {
            RtcpPacket::SourceDescription(sdes) => assert_eq!(sdes.cname(0x1111), Some("alice@host")),
            other => panic!("expected SDES, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_types_are_skipped() {
        let rr = RtcpPacket::ReceiverReport(RtcpReceiverReport::new(7));
        let mut buf = BytesMut::new();
        rr.serialize_into(&mut buf).unwrap();
        // An APP packet: header + SSRC + name
        buf.put_slice(&[0x80, 204, 0x00, 0x02, 0, 0, 0, 7, b'T', b'E', b'S', b'T']);

        let parsed = RtcpPacket::parse_compound(&buf).unwrap();
        assert_eq!(parsed, vec![rr]);
    }

    #[test]
    fn test_truncated_compound_is_rejected() {
        let rr = RtcpPacket::ReceiverReport(RtcpReceiverReport {
            ssrc: 7,
            report_blocks: vec![sample_block()],
        });
        let bytes = rr.serialize().unwrap();
        assert!(RtcpPacket::parse_compound(&bytes[..bytes.len() - 4]).is_err());
    }

    #[test]
    fn test_rtcp_demux() {
        assert!(is_rtcp(&[0x81, 201, 0, 1]));
        assert!(!is_rtcp(&[0x80, 0, 0, 1]));
        assert!(!is_rtcp(&[0x80, 0xe0, 0, 1]));
    }
}
