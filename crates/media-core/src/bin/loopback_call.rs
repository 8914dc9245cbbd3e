//! Two media streams talking to each other over UDP on localhost
//!
//! Alice sends a tone (and optionally DTMF digits) to Bob; Bob's decoded
//! audio goes to a counting sink. Final statistics are printed as JSON.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use streamcore_media::prelude::*;
use streamcore_rtp::{RtcpConfig, UdpMediaTransport, UdpTransportConfig};

const EVENT_PT: u8 = 101;

#[derive(Parser, Debug)]
#[command(name = "loopback-call", about = "Run a two-party media call over localhost UDP")]
struct Args {
    /// DTMF digits Alice dials half a second into the call
    #[arg(short, long, default_value = "")]
    digits: String,

    /// Call length in seconds
    #[arg(short = 't', long, default_value_t = 3)]
    duration: u64,

    /// Codec to negotiate (pcmu or pcma)
    #[arg(short, long, default_value = "pcmu")]
    codec: String,

    /// Frame length in milliseconds
    #[arg(long, default_value_t = 20)]
    ptime: u32,
}

/// 440 Hz tone generator
struct ToneSource {
    info: PortInfo,
    sample: Mutex<u64>,
}

impl ToneSource {
    fn new(info: PortInfo) -> Self {
        Self { info, sample: Mutex::new(0) }
    }
}

impl MediaPort for ToneSource {
    fn info(&self) -> &PortInfo {
        &self.info
    }

    fn get_frame(&self, frame: &mut AudioFrame) -> streamcore_media::Result<()> {
        let mut sample = self.sample.lock();
        let rate = self.info.sample_rate as f64;
        frame.samples.clear();
        for _ in 0..self.info.samples_per_frame {
            let t = *sample as f64 / rate;
            frame.samples.push((8000.0 * (2.0 * std::f64::consts::PI * 440.0 * t).sin()) as i16);
            *sample += 1;
        }
        frame.frame_type = FrameType::Audio;
        frame.timestamp = *sample as u32;
        Ok(())
    }

    fn put_frame(&self, _frame: &AudioFrame) -> streamcore_media::Result<()> {
        Ok(())
    }
}

/// Sink that counts what it is given and produces silence
struct CountingSink {
    info: PortInfo,
    audio: AtomicU64,
    silent: AtomicU64,
}

impl MediaPort for CountingSink {
    fn info(&self) -> &PortInfo {
        &self.info
    }

    fn get_frame(&self, frame: &mut AudioFrame) -> streamcore_media::Result<()> {
        frame.make_silent(self.info.samples_per_frame);
        Ok(())
    }

    fn put_frame(&self, frame: &AudioFrame) -> streamcore_media::Result<()> {
        if frame.is_audio() {
            self.audio.fetch_add(1, Ordering::Relaxed);
        } else {
            self.silent.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

async fn bind_transport() -> Result<(Arc<UdpMediaTransport>, SocketAddr)> {
    let config = UdpTransportConfig::default()
        .with_local_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
        .with_rtcp_mux(true);
    let transport = UdpMediaTransport::bind(config).await.context("binding UDP transport")?;
    let addr = transport.local_rtp_addr()?;
    Ok((Arc::new(transport), addr))
}

fn stream_info(remote: SocketAddr, codec: CodecInfo, ptime: u32, name: &str) -> StreamInfo {
    StreamInfo::new(MediaDirection::SendReceive, remote, codec)
        .with_event_payload_type(EVENT_PT)
        .with_codec_param(CodecParam {
            ptime_ms: ptime,
            ..Default::default()
        })
        .with_rtcp(
            RtcpConfig::default()
                .with_interval(Duration::from_secs(1))
                .with_cname(format!("{}@127.0.0.1", name)),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let codec = match args.codec.to_ascii_lowercase().as_str() {
        "pcmu" => CodecInfo::pcmu(),
        "pcma" => CodecInfo::pcma(),
        other => bail!("unknown codec {:?}, expected pcmu or pcma", other),
    };

    let registry = CodecRegistry::with_defaults();
    let (alice_transport, alice_addr) = bind_transport().await?;
    let (bob_transport, bob_addr) = bind_transport().await?;
    info!("Alice on {}, Bob on {}", alice_addr, bob_addr);

    let alice = MediaStream::create(
        &registry,
        stream_info(bob_addr, codec.clone(), args.ptime, "alice"),
        alice_transport,
    )?;
    let bob = MediaStream::create(&registry, stream_info(alice_addr, codec, args.ptime, "bob"), bob_transport)?;
    alice.start()?;
    bob.start()?;

    let port_info = MediaPort::info(&alice).clone();
    let tone = Arc::new(ToneSource::new(port_info.clone()));
    let sink = Arc::new(CountingSink {
        info: port_info,
        audio: AtomicU64::new(0),
        silent: AtomicU64::new(0),
    });

    let alice_clock = MasterPort::new(tone, Arc::new(alice.clone()))?;
    let bob_clock = MasterPort::new(Arc::new(bob.clone()), sink.clone())?;
    alice_clock.start()?;
    bob_clock.start()?;

    if !args.digits.is_empty() {
        tokio::time::sleep(Duration::from_millis(500)).await;
        alice.dial_dtmf(&args.digits)?;
        info!("Alice dialed {}", args.digits);
    }

    tokio::time::sleep(Duration::from_secs(args.duration)).await;
    alice_clock.stop();
    bob_clock.stop();

    let mut digits = [0u8; 32];
    let received = bob.get_dtmf(&mut digits)?;

    let report = json!({
        "alice": {
            "rtcp": alice.stat()?,
            "encode": alice.encode_stat()?,
        },
        "bob": {
            "rtcp": bob.stat()?,
            "decode": bob.decode_stat()?,
            "jitter_buffer": bob.jitter_buffer_stat()?,
            "dtmf": String::from_utf8_lossy(&digits[..received]),
        },
        "sink": {
            "audio_frames": sink.audio.load(Ordering::Relaxed),
            "silent_frames": sink.silent.load(Ordering::Relaxed),
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    alice.destroy()?;
    bob.destroy()?;
    Ok(())
}
