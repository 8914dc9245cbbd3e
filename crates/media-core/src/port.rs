//! Generic media port contract
//!
//! A port produces frames on `get_frame` and consumes them on `put_frame`.
//! Both calls come from the caller's own clock; the geometry is fixed and
//! described once by [`PortInfo`].

use std::time::Duration;

use streamcore_rtp::time::{samples_per_frame, ticks_to_duration};

use crate::error::Result;

/// Frame geometry of a port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Human readable name
    pub name: String,
    /// Samples per second, per channel
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channel_count: u16,
    /// Samples in one frame, all channels included
    pub samples_per_frame: usize,
    /// Bits per sample
    pub bits_per_sample: u16,
}

impl PortInfo {
    /// 16-bit PCM port info
    pub fn new(name: impl Into<String>, sample_rate: u32, channel_count: u16, ptime_ms: u32) -> Self {
        Self {
            name: name.into(),
            sample_rate,
            channel_count,
            samples_per_frame: samples_per_frame(sample_rate, ptime_ms) as usize * channel_count as usize,
            bits_per_sample: 16,
        }
    }

    /// Wall-clock length of one frame
    pub fn frame_duration(&self) -> Duration {
        let per_channel = self.samples_per_frame as u64 / self.channel_count.max(1) as u64;
        ticks_to_duration(per_channel, self.sample_rate)
    }

    /// Whether frames can flow between the two ports unchanged
    pub fn is_compatible(&self, other: &PortInfo) -> bool {
        self.sample_rate == other.sample_rate
            && self.channel_count == other.channel_count
            && self.samples_per_frame == other.samples_per_frame
            && self.bits_per_sample == other.bits_per_sample
    }
}

/// Content of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameType {
    /// No media this interval; samples are silence
    #[default]
    None,
    /// Audio samples
    Audio,
}

/// A frame of interleaved 16-bit PCM
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioFrame {
    pub frame_type: FrameType,
    pub samples: Vec<i16>,
    /// Media timestamp of the first sample
    pub timestamp: u32,
}

impl AudioFrame {
    /// An audio frame
    pub fn audio(samples: Vec<i16>, timestamp: u32) -> Self {
        Self {
            frame_type: FrameType::Audio,
            samples,
            timestamp,
        }
    }

    /// A frame of `samples` zeros marked as carrying no media
    pub fn silence(samples: usize) -> Self {
        Self {
            frame_type: FrameType::None,
            samples: vec![0; samples],
            timestamp: 0,
        }
    }

    /// Turn this frame into silence in place, reusing its buffer
    pub fn make_silent(&mut self, samples: usize) {
        self.frame_type = FrameType::None;
        self.samples.clear();
        self.samples.resize(samples, 0);
    }

    pub fn is_audio(&self) -> bool {
        self.frame_type == FrameType::Audio
    }
}

/// The generic port contract
pub trait MediaPort: Send + Sync {
    /// Frame geometry, stable for the port's lifetime
    fn info(&self) -> &PortInfo;

    /// Produce the next frame into `frame`
    fn get_frame(&self, frame: &mut AudioFrame) -> Result<()>;

    /// Consume one frame
    fn put_frame(&self, frame: &AudioFrame) -> Result<()>;
}

/// Port that produces silence and discards whatever it is given
#[derive(Debug, Clone)]
pub struct NullPort {
    info: PortInfo,
}

impl NullPort {
    pub fn new(sample_rate: u32, channel_count: u16, ptime_ms: u32) -> Self {
        Self {
            info: PortInfo::new("null", sample_rate, channel_count, ptime_ms),
        }
    }
}

impl MediaPort for NullPort {
    fn info(&self) -> &PortInfo {
        &self.info
    }

    fn get_frame(&self, frame: &mut AudioFrame) -> Result<()> {
        frame.make_silent(self.info.samples_per_frame);
        Ok(())
    }

    fn put_frame(&self, _frame: &AudioFrame) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_geometry() {
        let info = PortInfo::new("pcm", 8000, 1, 20);
        assert_eq!(info.samples_per_frame, 160);
        assert_eq!(info.frame_duration(), Duration::from_millis(20));

        let stereo = PortInfo::new("pcm", 48000, 2, 10);
        assert_eq!(stereo.samples_per_frame, 960);
        assert_eq!(stereo.frame_duration(), Duration::from_millis(10));
        assert!(!info.is_compatible(&stereo));
    }

    #[test]
    fn test_null_port() {
        let port = NullPort::new(8000, 1, 20);
        let mut frame = AudioFrame::audio(vec![5; 3], 99);
        port.get_frame(&mut frame).unwrap();
        assert_eq!(frame.frame_type, FrameType::None);
        assert_eq!(frame.samples, vec![0; 160]);
        port.put_frame(&frame).unwrap();
    }
}
