//! RTP packet definitions (RFC 3550 section 5.1)

pub mod rtcp;

use std::fmt;

use bitvec::prelude::*;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Error;
use crate::{Result, RtpCsrc, RtpSequenceNumber, RtpSsrc, RtpTimestamp};

/// RTP protocol version
pub const RTP_VERSION: u8 = 2;

/// Size of the fixed RTP header without CSRCs or extension
pub const RTP_MIN_HEADER_SIZE: usize = 12;

const RTP_PADDING_FLAG: usize = 2;
const RTP_EXTENSION_FLAG: usize = 3;
const RTP_CC_OFFSET: usize = 4;
const RTP_MARKER_FLAG: usize = 0;
const RTP_PT_OFFSET: usize = 1;

/// RTP fixed header plus CSRC list and optional header extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    /// RTP version (always 2)
    pub version: u8,

    /// Padding flag
    pub padding: bool,

    /// Extension flag
    pub extension: bool,

    /// Marker bit; set on the first packet of a talk spurt or telephone event
    pub marker: bool,

    /// Payload type
    pub payload_type: u8,

    /// Sequence number
    pub sequence_number: RtpSequenceNumber,

    /// Timestamp in clock-rate units
    pub timestamp: RtpTimestamp,

    /// Synchronization source
    pub ssrc: RtpSsrc,

    /// Contributing sources
    pub csrc: Vec<RtpCsrc>,

    /// Profile-defined extension identifier
    pub extension_id: Option<u16>,

    /// Extension words
    pub extension_data: Option<Bytes>,
}

impl RtpHeader {
    /// Create a header with no CSRCs, no extension and the marker cleared
    pub fn new(
        payload_type: u8,
        sequence_number: RtpSequenceNumber,
        timestamp: RtpTimestamp,
        ssrc: RtpSsrc,
    ) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            marker: false,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc: Vec::new(),
            extension_id: None,
            extension_data: None,
        }
    }

    /// Builder-style marker setter
    pub fn with_marker(mut self, marker: bool) -> Self {
        self.marker = marker;
        self
    }

    /// Serialized size of the header in bytes
    pub fn size(&self) -> usize {
        let mut size = RTP_MIN_HEADER_SIZE + self.csrc.len() * 4;
        if self.extension {
            size += 4 + self.extension_data.as_ref().map_or(0, |d| padded_len(d.len()));
        }
        size
    }

    /// Parse a header from the front of `buf`, leaving the payload behind
    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < RTP_MIN_HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                required: RTP_MIN_HEADER_SIZE,
                available: buf.remaining(),
            });
        }

        let first_byte = buf.get_u8();
        let bits = first_byte.view_bits::<Msb0>();
        let version = bits[0..2].load::<u8>();
        if version != RTP_VERSION {
            return Err(Error::InvalidPacket(format!("Invalid RTP version: {}", version)));
        }
        let padding = bits[RTP_PADDING_FLAG];
        let extension = bits[RTP_EXTENSION_FLAG];
        let cc = bits[RTP_CC_OFFSET..RTP_CC_OFFSET + 4].load::<u8>();

        let second_byte = buf.get_u8();
        let bits = second_byte.view_bits::<Msb0>();
        let marker = bits[RTP_MARKER_FLAG];
        let payload_type = bits[RTP_PT_OFFSET..RTP_PT_OFFSET + 7].load::<u8>();

        let sequence_number = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        let csrc_len = cc as usize * 4;
        if buf.remaining() < csrc_len {
            return Err(Error::BufferTooSmall {
                required: csrc_len,
                available: buf.remaining(),
            });
        }
        let csrc = (0..cc).map(|_| buf.get_u32()).collect();

        let (extension_id, extension_data) = if extension {
            if buf.remaining() < 4 {
                return Err(Error::BufferTooSmall {
                    required: 4,
                    available: buf.remaining(),
                });
            }
            let ext_id = buf.get_u16();
            let ext_len = buf.get_u16() as usize * 4;
            if buf.remaining() < ext_len {
                return Err(Error::BufferTooSmall {
                    required: ext_len,
                    available: buf.remaining(),
                });
            }
            (Some(ext_id), Some(buf.copy_to_bytes(ext_len)))
        } else {
            (None, None)
        };

        Ok(Self {
            version,
            padding,
            extension,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            extension_id,
            extension_data,
        })
    }

    /// Append the serialized header to `buf`
    pub fn serialize(&self, buf: &mut BytesMut) -> Result<()> {
        if self.csrc.len() > 15 {
            return Err(Error::EncodeError(format!("Too many CSRCs: {}", self.csrc.len())));
        }
        if self.payload_type > 127 {
            return Err(Error::EncodeError(format!("Invalid payload type: {}", self.payload_type)));
        }

        buf.reserve(self.size());

        let mut first = (self.version & 0x03) << 6;
        if self.padding {
            first |= 0x20;
        }
        if self.extension {
            first |= 0x10;
        }
        first |= self.csrc.len() as u8;
        buf.put_u8(first);

        let mut second = self.payload_type;
        if self.marker {
            second |= 0x80;
        }
        buf.put_u8(second);

        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        for csrc in &self.csrc {
            buf.put_u32(*csrc);
        }

        if self.extension {
            let data = self.extension_data.clone().unwrap_or_default();
            let words = padded_len(data.len()) / 4;
            if words > u16::MAX as usize {
                return Err(Error::EncodeError("Header extension too long".to_string()));
            }
            buf.put_u16(self.extension_id.unwrap_or(0));
            buf.put_u16(words as u16);
            buf.put_slice(&data);
            buf.put_bytes(0, padded_len(data.len()) - data.len());
        }

        Ok(())
    }
}

/// An RTP packet: header plus payload
#[derive(Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// RTP header
    pub header: RtpHeader,

    /// Payload with any RTP padding removed
    pub payload: Bytes,
}

impl RtpPacket {
    /// Create a new packet
    pub fn new(header: RtpHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Create a packet with a fresh header
    pub fn new_with_payload(
        payload_type: u8,
        sequence_number: RtpSequenceNumber,
        timestamp: RtpTimestamp,
        ssrc: RtpSsrc,
        payload: Bytes,
    ) -> Self {
        Self::new(RtpHeader::new(payload_type, sequence_number, timestamp, ssrc), payload)
    }

    /// Serialized size in bytes
    pub fn size(&self) -> usize {
        self.header.size() + self.payload.len()
    }

    /// Parse a datagram into a packet, stripping trailing padding
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut buf = Bytes::copy_from_slice(data);
        let header = RtpHeader::parse(&mut buf)?;

        let mut payload = buf;
        if header.padding {
            let pad = match payload.last() {
                Some(&pad) => pad as usize,
                None => return Err(Error::InvalidPacket("Padding flag set on empty payload".to_string())),
            };
            if pad == 0 || pad > payload.len() {
                return Err(Error::InvalidPacket(format!("Invalid padding length: {}", pad)));
            }
            payload.truncate(payload.len() - pad);
        }

        Ok(Self { header, payload })
    }

    /// Serialize the packet into a fresh buffer
    pub fn serialize(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.size());
        self.serialize_into(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Serialize the packet, appending to `buf`
    pub fn serialize_into(&self, buf: &mut BytesMut) -> Result<()> {
        let mut header = self.header.clone();
        // Padding is never emitted; the payload goes out as-is
        header.padding = false;
        header.serialize(buf)?;
        buf.put_slice(&self.payload);
        Ok(())
    }
}

impl fmt::Debug for RtpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtpPacket")
            .field("pt", &self.header.payload_type)
            .field("seq", &self.header.sequence_number)
            .field("ts", &self.header.timestamp)
            .field("ssrc", &format_args!("{:08x}", self.header.ssrc))
            .field("marker", &self.header.marker)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}
