//! RFC 2833 telephone-event payload
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     event     |E|R| volume    |          duration             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use bytes::{BufMut, BytesMut};

use crate::error::Error;
use crate::Result;

/// Payload size in bytes
pub const TELEPHONE_EVENT_SIZE: usize = 4;

/// One telephone-event payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelephoneEvent {
    /// Event code (0-15 for DTMF)
    pub event: u8,

    /// End-of-event bit
    pub end: bool,

    /// Power level in -dBm0, 0..=63
    pub volume: u8,

    /// Duration so far, in RTP timestamp units
    pub duration: u16,
}

impl TelephoneEvent {
    pub fn new(event: u8, volume: u8, duration: u16) -> Self {
        Self {
            event,
            end: false,
            volume: volume & 0x3f,
            duration,
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < TELEPHONE_EVENT_SIZE {
            return Err(Error::BufferTooSmall {
                required: TELEPHONE_EVENT_SIZE,
                available: data.len(),
            });
        }
        Ok(Self {
            event: data[0],
            end: data[1] & 0x80 != 0,
            volume: data[1] & 0x3f,
            duration: u16::from_be_bytes([data[2], data[3]]),
        })
    }

    pub fn serialize(&self, buf: &mut BytesMut) {
        let end_bit = if self.end { 0x80 } else { 0 };
        buf.put_u8(self.event);
        buf.put_u8(end_bit | (self.volume & 0x3f));
        buf.put_u16(self.duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_bit_and_volume() {
        let mut ev = TelephoneEvent::new(11, 10, 800);
        ev.end = true;

        let mut buf = BytesMut::new();
        ev.serialize(&mut buf);
        assert_eq!(buf.as_ref(), &[11, 0x8a, 0x03, 0x20]);
        assert_eq!(TelephoneEvent::parse(&buf).unwrap(), ev);
    }

    #[test]
    fn test_reserved_bit_ignored() {
        let ev = TelephoneEvent::parse(&[5, 0x40 | 7, 0, 160]).unwrap();
        assert!(!ev.end);
        assert_eq!(ev.volume, 7);
        assert_eq!(ev.duration, 160);
        assert!(TelephoneEvent::parse(&[1, 2]).is_err());
    }
}
