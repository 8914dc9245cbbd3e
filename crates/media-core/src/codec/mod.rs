//! Codec plug-in interface
//!
//! The stream drives codecs through [`AudioCodec`]; concrete codecs are
//! created by a [`CodecFactory`] looked up in a [`CodecRegistry`].

pub mod g711;

use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Negotiated codec descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecInfo {
    /// Encoding name as in SDP (e.g. "PCMU")
    pub name: String,
    /// Payload type the codec was negotiated with
    pub payload_type: u8,
    /// RTP clock rate
    pub clock_rate: u32,
    /// Channel count
    #[serde(default = "default_channels")]
    pub channels: u16,
}

fn default_channels() -> u16 {
    1
}

impl CodecInfo {
    pub fn new(name: impl Into<String>, payload_type: u8, clock_rate: u32) -> Self {
        Self {
            name: name.into(),
            payload_type,
            clock_rate,
            channels: 1,
        }
    }

    /// G.711 mu-law, static payload type 0
    pub fn pcmu() -> Self {
        Self::new("PCMU", 0, 8000)
    }

    /// G.711 A-law, static payload type 8
    pub fn pcma() -> Self {
        Self::new("PCMA", 8, 8000)
    }

    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }
}

/// Codec parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecParam {
    /// Frame length in milliseconds
    pub ptime_ms: u32,
    /// Voice activity detection
    pub vad: bool,
    /// Packet loss concealment
    pub plc: bool,
}

impl Default for CodecParam {
    fn default() -> Self {
        Self {
            ptime_ms: 20,
            vad: false,
            plc: true,
        }
    }
}

/// One codec instance
///
/// Instances are not shared: each channel owns its own and serializes calls.
pub trait AudioCodec: Send + fmt::Debug {
    /// Descriptor this instance was created for
    fn info(&self) -> &CodecInfo;

    /// Encode one frame of PCM, appending the payload to `out`
    fn encode(&mut self, pcm: &[i16], out: &mut BytesMut) -> Result<()>;

    /// Decode one payload into `pcm`, replacing its contents
    fn decode(&mut self, payload: &[u8], pcm: &mut Vec<i16>) -> Result<()>;

    /// Synthesize `samples` samples for a frame that never arrived
    fn conceal(&mut self, samples: usize, pcm: &mut Vec<i16>) {
        pcm.clear();
        pcm.resize(samples, 0);
    }

    /// Forget any inter-frame state
    fn reset(&mut self) {}
}

/// Creates codec instances for one encoding
pub trait CodecFactory: Send + Sync {
    /// Encoding name this factory serves
    fn name(&self) -> &str;

    /// Clock rate of the encoding
    fn clock_rate(&self) -> u32;

    /// RFC 3551 static payload type, if the encoding has one
    fn static_payload_type(&self) -> Option<u8> {
        None
    }

    /// Create a fresh instance
    fn create(&self, info: &CodecInfo, param: &CodecParam) -> Result<Box<dyn AudioCodec>>;
}

/// The codecs an endpoint can instantiate
#[derive(Clone, Default)]
pub struct CodecRegistry {
    factories: Vec<Arc<dyn CodecFactory>>,
}

impl CodecRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in codecs enabled by cargo features
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        #[cfg(feature = "pcmu")]
        registry.register(Arc::new(g711::G711Factory::new(g711::G711Variant::Pcmu)));
        #[cfg(feature = "pcma")]
        registry.register(Arc::new(g711::G711Factory::new(g711::G711Variant::Pcma)));
        registry
    }

    /// Add a factory; later registrations win over earlier ones
    pub fn register(&mut self, factory: Arc<dyn CodecFactory>) {
        debug!("Registering codec {}/{}", factory.name(), factory.clock_rate());
        self.factories.insert(0, factory);
    }

    /// Find the factory serving `info`
    pub fn find(&self, info: &CodecInfo) -> Option<Arc<dyn CodecFactory>> {
        self.factories
            .iter()
            .find(|f| f.name().eq_ignore_ascii_case(&info.name) && f.clock_rate() == info.clock_rate)
            .cloned()
    }

    /// Descriptor for a static payload type
    pub fn lookup_static(&self, payload_type: u8) -> Option<CodecInfo> {
        self.factories
            .iter()
            .find(|f| f.static_payload_type() == Some(payload_type))
            .map(|f| CodecInfo::new(f.name(), payload_type, f.clock_rate()))
    }

    /// Instantiate a codec for `info`
    pub fn create(&self, info: &CodecInfo, param: &CodecParam) -> Result<Box<dyn AudioCodec>> {
        let factory = self
            .find(info)
            .ok_or_else(|| Error::UnsupportedCodec(format!("{}/{}", info.name, info.clock_rate)))?;
        factory.create(info, param)
    }

    /// Names of the registered encodings
    pub fn codec_names(&self) -> Vec<String> {
        self.factories.iter().map(|f| f.name().to_string()).collect()
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry").field("codecs", &self.codec_names()).finish()
    }
}
