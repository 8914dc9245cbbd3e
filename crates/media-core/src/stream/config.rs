//! Stream configuration snapshot
//!
//! A [`StreamInfo`] is produced by the negotiation layer and handed to
//! [`MediaStream::create`](super::MediaStream::create); the stream never
//! changes it afterwards. On the serde boundary optional payload types and
//! jitter-buffer values use `-1` for "not negotiated" / "engine default".

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use streamcore_rtp::time::samples_per_frame;
use streamcore_rtp::{RtcpConfig, RtpSsrc};

use crate::buffer::jitter::JitterBufferConfig;
use crate::codec::{CodecInfo, CodecParam};
use crate::error::{Error, Result};

/// Longest supported frame
const MAX_PTIME_MS: u32 = 200;

/// Kind of media carried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Audio,
    Video,
}

/// Direction of the media line, named as SDP names them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MediaDirection {
    #[serde(rename = "inactive")]
    Inactive,
    #[serde(rename = "sendonly")]
    SendOnly,
    #[serde(rename = "recvonly")]
    ReceiveOnly,
    #[default]
    #[serde(rename = "sendrecv")]
    SendReceive,
}

impl MediaDirection {
    pub fn sends(&self) -> bool {
        matches!(self, Self::SendOnly | Self::SendReceive)
    }

    pub fn receives(&self) -> bool {
        matches!(self, Self::ReceiveOnly | Self::SendReceive)
    }
}

/// What the decode channel does with media whose payload type differs from
/// the negotiated incoming one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadTypePolicy {
    /// Drop and count
    #[default]
    Strict,
    /// Hand to the decoder anyway
    PassThrough,
}

/// Jitter buffer tuning in milliseconds; `None` selects the engine default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JitterBufferSettings {
    #[serde(default, with = "negative_as_none")]
    pub init_ms: Option<u32>,
    #[serde(default, with = "negative_as_none")]
    pub min_prefetch_ms: Option<u32>,
    #[serde(default, with = "negative_as_none")]
    pub max_prefetch_ms: Option<u32>,
    #[serde(default, with = "negative_as_none")]
    pub max_delay_ms: Option<u32>,
}

impl JitterBufferSettings {
    /// Resolve to frame counts for the given frame duration
    pub fn to_config(&self, ptime_ms: u32) -> JitterBufferConfig {
        let mut config = JitterBufferConfig::new(ptime_ms);
        if let Some(ms) = self.max_delay_ms {
            config.max_frames = config.frames_for(ms).max(1);
            config.max_prefetch = (config.max_frames * 4 / 5).max(1);
        }
        if let Some(ms) = self.min_prefetch_ms {
            config.min_prefetch = config.frames_for(ms);
        }
        if let Some(ms) = self.max_prefetch_ms {
            config.max_prefetch = config.frames_for(ms);
        }
        if let Some(ms) = self.init_ms {
            config.init_prefetch = config.frames_for(ms);
        }
        config
    }
}

/// Everything a stream needs to know about its media line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    #[serde(default)]
    pub media_type: MediaType,
    #[serde(default)]
    pub direction: MediaDirection,
    pub remote_addr: SocketAddr,
    pub codec: CodecInfo,
    #[serde(default)]
    pub codec_param: CodecParam,
    /// Outgoing media payload type
    #[serde(default, with = "negative_as_none")]
    pub tx_pt: Option<u8>,
    /// Expected incoming media payload type
    #[serde(default, with = "negative_as_none")]
    pub rx_pt: Option<u8>,
    /// Outgoing telephone-event payload type
    #[serde(default, with = "negative_as_none")]
    pub tx_event_pt: Option<u8>,
    /// Incoming telephone-event payload type
    #[serde(default, with = "negative_as_none")]
    pub rx_event_pt: Option<u8>,
    /// Our synchronization source
    #[serde(default = "random_ssrc")]
    pub ssrc: RtpSsrc,
    #[serde(default)]
    pub jitter_buffer: JitterBufferSettings,
    #[serde(default)]
    pub pt_policy: PayloadTypePolicy,
    #[serde(default)]
    pub rtcp: RtcpConfig,
}

impl StreamInfo {
    /// Audio stream using the codec's payload type in both directions and a random SSRC
    pub fn new(direction: MediaDirection, remote_addr: SocketAddr, codec: CodecInfo) -> Self {
        Self {
            media_type: MediaType::Audio,
            direction,
            remote_addr,
            tx_pt: Some(codec.payload_type),
            rx_pt: Some(codec.payload_type),
            codec,
            codec_param: CodecParam::default(),
            tx_event_pt: None,
            rx_event_pt: None,
            ssrc: random_ssrc(),
            jitter_buffer: JitterBufferSettings::default(),
            pt_policy: PayloadTypePolicy::default(),
            rtcp: RtcpConfig::default(),
        }
    }

    /// Negotiate telephone events with the same payload type both ways
    pub fn with_event_payload_type(mut self, pt: u8) -> Self {
        self.tx_event_pt = Some(pt);
        self.rx_event_pt = Some(pt);
        self
    }

    pub fn with_payload_types(mut self, tx_pt: Option<u8>, rx_pt: Option<u8>) -> Self {
        self.tx_pt = tx_pt;
        self.rx_pt = rx_pt;
        self
    }

    pub fn with_ssrc(mut self, ssrc: RtpSsrc) -> Self {
        self.ssrc = ssrc;
        self
    }

    pub fn with_codec_param(mut self, param: CodecParam) -> Self {
        self.codec_param = param;
        self
    }

    pub fn with_jitter_buffer(mut self, settings: JitterBufferSettings) -> Self {
        self.jitter_buffer = settings;
        self
    }

    pub fn with_payload_type_policy(mut self, policy: PayloadTypePolicy) -> Self {
        self.pt_policy = policy;
        self
    }

    pub fn with_rtcp(mut self, rtcp: RtcpConfig) -> Self {
        self.rtcp = rtcp;
        self
    }

    pub fn with_media_type(mut self, media_type: MediaType) -> Self {
        self.media_type = media_type;
        self
    }

    /// Samples per frame and channel
    pub fn frame_samples(&self) -> u32 {
        samples_per_frame(self.codec.clock_rate, self.codec_param.ptime_ms)
    }

    /// Reject configurations the engine cannot run
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));

        if self.direction.sends() && self.tx_pt.is_none() {
            return invalid("direction sends but no outgoing payload type is set".into());
        }
        if self.direction.receives() && self.rx_pt.is_none() {
            return invalid("direction receives but no incoming payload type is set".into());
        }
        for (name, pt) in [
            ("tx_pt", self.tx_pt),
            ("rx_pt", self.rx_pt),
            ("tx_event_pt", self.tx_event_pt),
            ("rx_event_pt", self.rx_event_pt),
        ] {
            if let Some(pt) = pt.filter(|pt| *pt > 127) {
                return invalid(format!("{} {} is not a 7-bit payload type", name, pt));
            }
        }
        if self.tx_event_pt.is_some() && self.tx_event_pt == self.tx_pt {
            return invalid("outgoing telephone-event payload type collides with media".into());
        }
        if self.rx_event_pt.is_some() && self.rx_event_pt == self.rx_pt {
            return invalid("incoming telephone-event payload type collides with media".into());
        }

        if self.codec.clock_rate == 0 || self.codec.channels == 0 {
            return invalid(format!("codec {} has no clock rate or channels", self.codec.name));
        }
        let ptime = self.codec_param.ptime_ms;
        if ptime == 0 || ptime > MAX_PTIME_MS {
            return invalid(format!("ptime {} ms is out of range", ptime));
        }
        let Some(ticks) = self.codec.clock_rate.checked_mul(ptime) else {
            return invalid(format!("clock rate {} is out of range", self.codec.clock_rate));
        };
        if ticks % 1000 != 0 {
            return invalid(format!("ptime {} ms does not give whole frames", ptime));
        }

        let jb = &self.jitter_buffer;
        if let (Some(min), Some(max)) = (jb.min_prefetch_ms, jb.max_prefetch_ms) {
            if min > max {
                return invalid(format!("jitter buffer min prefetch {} > max prefetch {}", min, max));
            }
        }
        if let Some(max_delay) = jb.max_delay_ms {
            if max_delay < ptime {
                return invalid(format!("jitter buffer max delay {} ms is shorter than a frame", max_delay));
            }
            for (name, value) in [("init", jb.init_ms), ("max prefetch", jb.max_prefetch_ms)] {
                if let Some(value) = value.filter(|v| *v > max_delay) {
                    return invalid(format!("jitter buffer {} {} ms exceeds max delay {} ms", name, value, max_delay));
                }
            }
        }
        Ok(())
    }
}

fn random_ssrc() -> RtpSsrc {
    rand::random()
}

/// Serde adapter: negative integers on the wire are `None`
mod negative_as_none {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Copy + Into<i64>,
    {
        serializer.serialize_i64(value.map_or(-1, Into::into))
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<i64>,
    {
        let raw = i64::deserialize(deserializer)?;
        if raw < 0 {
            return Ok(None);
        }
        T::try_from(raw)
            .map(Some)
            .map_err(|_| D::Error::custom(format!("value {} out of range", raw)))
    }
}
