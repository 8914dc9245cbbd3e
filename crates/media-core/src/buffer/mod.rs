//! Receive-side buffering
//!
//! The jitter buffer sits between the network receive path and the
//! application's playback clock.

pub mod jitter;

pub use jitter::{JitterBuffer, JitterBufferConfig, JitterBufferStats, JitterFrame, JitterPull, JitterPut};
