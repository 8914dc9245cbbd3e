use bytes::{Buf, BufMut, BytesMut};

use crate::error::Error;
use crate::{Result, RtpSsrc};

/// RTCP Goodbye packet (RFC 3550 section 6.6)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RtcpGoodbye {
    /// Sources leaving the session
    pub sources: Vec<RtpSsrc>,

    /// Optional reason text
    pub reason: Option<String>,
}

impl RtcpGoodbye {
    /// BYE for a single source
    pub fn new(ssrc: RtpSsrc, reason: Option<String>) -> Self {
        Self { sources: vec![ssrc], reason }
    }

    /// Body size (everything after the common header)
    pub fn size(&self) -> usize {
        let reason = self
            .reason
            .as_ref()
            .map_or(0, |r| (1 + r.len().min(255) + 3) & !3);
        self.sources.len() * 4 + reason
    }

    pub(crate) fn serialize_body(&self, buf: &mut BytesMut) {
        for ssrc in &self.sources {
            buf.put_u32(*ssrc);
        }
        if let Some(reason) = &self.reason {
            let len = reason.len().min(255);
            buf.put_u8(len as u8);
            buf.put_slice(&reason.as_bytes()[..len]);
            buf.put_bytes(0, (4 - (1 + len) % 4) % 4);
        }
    }
}

/// Parse a BYE body listing `count` sources
pub fn parse_goodbye(buf: &mut impl Buf, count: u8) -> Result<RtcpGoodbye> {
    let needed = count as usize * 4;
    if buf.remaining() < needed {
        return Err(Error::BufferTooSmall {
            required: needed,
            available: buf.remaining(),
        });
    }
    let sources = (0..count).map(|_| buf.get_u32()).collect();

    let reason = if buf.has_remaining() {
        let len = buf.get_u8() as usize;
        if buf.remaining() < len {
            return Err(Error::BufferTooSmall {
                required: len,
                available: buf.remaining(),
            });
        }
        let raw = buf.copy_to_bytes(len);
        Some(String::from_utf8_lossy(&raw).into_owned())
    } else {
        None
    };

    Ok(RtcpGoodbye { sources, reason })
}
