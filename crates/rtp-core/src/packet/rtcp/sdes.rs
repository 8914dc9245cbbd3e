use bytes::{Buf, BufMut, BytesMut};

use crate::error::Error;
use crate::{Result, RtpSsrc};

/// SDES item type for the canonical name
pub const SDES_CNAME: u8 = 1;

/// A single SDES item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesItem {
    /// Item type (1 = CNAME, 2 = NAME, ...)
    pub item_type: u8,

    /// UTF-8 text, at most 255 bytes on the wire
    pub value: String,
}

/// Items describing one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesChunk {
    pub ssrc: RtpSsrc,
    pub items: Vec<SdesItem>,
}

impl SdesChunk {
    fn size(&self) -> usize {
        let items: usize = self.items.iter().map(|i| 2 + i.value.len().min(255)).sum();
        // SSRC, items, at least one null terminator, padded to a word
        (4 + items + 1 + 3) & !3
    }
}

/// RTCP Source Description packet (RFC 3550 section 6.5)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RtcpSourceDescription {
    pub chunks: Vec<SdesChunk>,
}

impl RtcpSourceDescription {
    /// SDES carrying only a CNAME for `ssrc`
    pub fn with_cname(ssrc: RtpSsrc, cname: &str) -> Self {
        Self {
            chunks: vec![SdesChunk {
                ssrc,
                items: vec![SdesItem { item_type: SDES_CNAME, value: cname.to_string() }],
            }],
        }
    }

    /// CNAME announced for `ssrc`, if any
    pub fn cname(&self, ssrc: RtpSsrc) -> Option<&str> {
        self.chunks
            .iter()
            .filter(|c| c.ssrc == ssrc)
            .flat_map(|c| c.items.iter())
            .find(|i| i.item_type == SDES_CNAME)
            .map(|i| i.value.as_str())
    }

    /// Body size (everything after the common header)
    pub fn size(&self) -> usize {
        self.chunks.iter().map(SdesChunk::size).sum()
    }

    pub(crate) fn serialize_body(&self, buf: &mut BytesMut) {
        for chunk in &self.chunks {
            let start = buf.len();
            buf.put_u32(chunk.ssrc);
            for item in &chunk.items {
                let len = item.value.len().min(255);
                buf.put_u8(item.item_type);
                buf.put_u8(len as u8);
                buf.put_slice(&item.value.as_bytes()[..len]);
            }
            let written = buf.len() - start;
            buf.put_bytes(0, chunk.size() - written);
        }
    }
}

/// Parse `count` SDES chunks
pub fn parse_source_description(buf: &mut impl Buf, count: u8) -> Result<RtcpSourceDescription> {
    let mut chunks = Vec::with_capacity(count as usize);

    for _ in 0..count {
        if buf.remaining() < 4 {
            return Err(Error::BufferTooSmall {
                required: 4,
                available: buf.remaining(),
            });
        }
        let ssrc = buf.get_u32();
        let mut consumed = 4;
        let mut items = Vec::new();

        loop {
            if !buf.has_remaining() {
                return Err(Error::InvalidPacket("SDES chunk not terminated".to_string()));
            }
            let item_type = buf.get_u8();
            consumed += 1;
            if item_type == 0 {
                break;
            }
            if !buf.has_remaining() {
                return Err(Error::InvalidPacket("SDES item missing length".to_string()));
            }
            let len = buf.get_u8() as usize;
            if buf.remaining() < len {
                return Err(Error::BufferTooSmall {
                    required: len,
                    available: buf.remaining(),
                });
            }
            let raw = buf.copy_to_bytes(len);
            consumed += 1 + len;
            items.push(SdesItem {
                item_type,
                value: String::from_utf8_lossy(&raw).into_owned(),
            });
        }

        // Skip the remaining null octets up to the word boundary
        let pad = (4 - consumed % 4) % 4;
        if buf.remaining() < pad {
            return Err(Error::BufferTooSmall {
                required: pad,
                available: buf.remaining(),
            });
        }
        buf.advance(pad);

        chunks.push(SdesChunk { ssrc, items });
    }

    Ok(RtcpSourceDescription { chunks })
}
