//! G.711 (PCMU/PCMA) reference codecs
//!
//! One byte per sample at 8 kHz. The companding follows ITU-T G.711.

use bytes::{BufMut, BytesMut};

use super::{AudioCodec, CodecFactory, CodecInfo, CodecParam};
use crate::error::{Error, Result};

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32635;
const ALAW_SEG_END: [i32; 8] = [0x1f, 0x3f, 0x7f, 0xff, 0x1ff, 0x3ff, 0x7ff, 0xfff];

/// Encode one sample to mu-law
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0
    };
    pcm = pcm.min(ULAW_CLIP) + ULAW_BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && pcm & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (pcm >> (exponent + 3)) & 0x0f;
    !((sign | (exponent << 4) | mantissa) as u8)
}

/// Decode one mu-law byte
pub fn ulaw_to_linear(value: u8) -> i16 {
    let value = !value;
    let exponent = ((value >> 4) & 0x07) as i32;
    let mantissa = (value & 0x0f) as i32;
    let magnitude = (((mantissa << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;
    if value & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Encode one sample to A-law
pub fn linear_to_alaw(sample: i16) -> u8 {
    let mut pcm = (sample as i32) >> 3;
    let mask = if pcm >= 0 {
        0xd5
    } else {
        pcm = -pcm - 1;
        0x55
    };

    let segment = ALAW_SEG_END.iter().position(|&end| pcm <= end);
    let value = match segment {
        None => 0x7f,
        Some(seg) => {
            let shift = if seg < 2 { 1 } else { seg as i32 };
            ((seg as i32) << 4) | ((pcm >> shift) & 0x0f)
        }
    };
    (value ^ mask) as u8
}

/// Decode one A-law byte
pub fn alaw_to_linear(value: u8) -> i16 {
    let value = value ^ 0x55;
    let mut t = ((value & 0x0f) as i32) << 4;
    let segment = ((value & 0x70) >> 4) as i32;
    match segment {
        0 => t += 8,
        1 => t += 0x108,
        _ => t = (t + 0x108) << (segment - 1),
    }
    if value & 0x80 != 0 {
        t as i16
    } else {
        -t as i16
    }
}

/// G.711 law
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum G711Variant {
    /// mu-law, payload type 0
    Pcmu,
    /// A-law, payload type 8
    Pcma,
}

impl G711Variant {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pcmu => "PCMU",
            Self::Pcma => "PCMA",
        }
    }

    pub fn payload_type(&self) -> u8 {
        match self {
            Self::Pcmu => 0,
            Self::Pcma => 8,
        }
    }
}

/// Consecutive concealed frames before fading to silence
const MAX_CONCEAL_FRAMES: u32 = 3;

/// A G.711 codec instance with simple repeat-and-fade concealment
#[derive(Debug, Clone)]
pub struct G711Codec {
    variant: G711Variant,
    info: CodecInfo,
    plc: bool,
    last_frame: Vec<i16>,
    concealed_run: u32,
}

impl G711Codec {
    pub fn new(variant: G711Variant, info: CodecInfo, param: &CodecParam) -> Self {
        Self {
            variant,
            info,
            plc: param.plc,
            last_frame: Vec::new(),
            concealed_run: 0,
        }
    }

    pub fn variant(&self) -> G711Variant {
        self.variant
    }
}

impl AudioCodec for G711Codec {
    fn info(&self) -> &CodecInfo {
        &self.info
    }

    fn encode(&mut self, pcm: &[i16], out: &mut BytesMut) -> Result<()> {
        out.reserve(pcm.len());
        match self.variant {
            G711Variant::Pcmu => pcm.iter().for_each(|&s| out.put_u8(linear_to_ulaw(s))),
            G711Variant::Pcma => pcm.iter().for_each(|&s| out.put_u8(linear_to_alaw(s))),
        }
        Ok(())
    }

    fn decode(&mut self, payload: &[u8], pcm: &mut Vec<i16>) -> Result<()> {
        if payload.is_empty() {
            return Err(Error::Codec(format!("{}: empty payload", self.variant.name())));
        }
        pcm.clear();
        match self.variant {
            G711Variant::Pcmu => pcm.extend(payload.iter().map(|&b| ulaw_to_linear(b))),
            G711Variant::Pcma => pcm.extend(payload.iter().map(|&b| alaw_to_linear(b))),
        }
        if self.plc {
            self.last_frame.clear();
            self.last_frame.extend_from_slice(pcm);
        }
        self.concealed_run = 0;
        Ok(())
    }

    fn conceal(&mut self, samples: usize, pcm: &mut Vec<i16>) {
        pcm.clear();
        self.concealed_run += 1;
        if !self.plc || self.last_frame.len() != samples || self.concealed_run > MAX_CONCEAL_FRAMES {
            pcm.resize(samples, 0);
            return;
        }
        // Halve the level with every consecutive lost frame
        let shift = self.concealed_run;
        pcm.extend(self.last_frame.iter().map(|&s| s >> shift));
    }

    fn reset(&mut self) {
        self.last_frame.clear();
        self.concealed_run = 0;
    }
}

/// Factory for one G.711 law
#[derive(Debug, Clone)]
pub struct G711Factory {
    variant: G711Variant,
}

impl G711Factory {
    pub fn new(variant: G711Variant) -> Self {
        Self { variant }
    }
}

impl CodecFactory for G711Factory {
    fn name(&self) -> &str {
        self.variant.name()
    }

    fn clock_rate(&self) -> u32 {
        8000
    }

    fn static_payload_type(&self) -> Option<u8> {
        Some(self.variant.payload_type())
    }

    fn create(&self, info: &CodecInfo, param: &CodecParam) -> Result<Box<dyn AudioCodec>> {
        if info.channels != 1 {
            return Err(Error::UnsupportedCodec(format!(
                "{} with {} channels",
                self.variant.name(),
                info.channels
            )));
        }
        Ok(Box::new(G711Codec::new(self.variant, info.clone(), param)))
    }
}
