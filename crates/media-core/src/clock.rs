//! Clocked port connector
//!
//! [`MasterPort`] plays the part of a sound device: on every frame interval it
//! pulls a frame from the upstream port and pushes it downstream, then does the
//! same in the other direction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::port::{AudioFrame, MediaPort};

pub struct MasterPort {
    upstream: Arc<dyn MediaPort>,
    downstream: Arc<dyn MediaPort>,
    ticks: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MasterPort {
    /// Connect two ports with identical frame geometry
    pub fn new(upstream: Arc<dyn MediaPort>, downstream: Arc<dyn MediaPort>) -> Result<Self> {
        let (up, down) = (upstream.info(), downstream.info());
        if !up.is_compatible(down) {
            return Err(Error::InvalidConfig(format!(
                "cannot connect {} ({} Hz, {} samples) to {} ({} Hz, {} samples)",
                up.name, up.sample_rate, up.samples_per_frame, down.name, down.sample_rate, down.samples_per_frame
            )));
        }
        Ok(Self {
            upstream,
            downstream,
            ticks: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        })
    }

    /// Start the clock on the current tokio runtime
    pub fn start(&self) -> Result<()> {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Err(Error::InvalidState("master port already running".into()));
        }

        let upstream = self.upstream.clone();
        let downstream = self.downstream.clone();
        let ticks = self.ticks.clone();
        let period = upstream.info().frame_duration();
        info!("Starting master port clock, period {:?}", period);

        *task = Some(tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut up_frame = AudioFrame::default();
            let mut down_frame = AudioFrame::default();

            loop {
                interval.tick().await;
                let forward = transfer(&*upstream, &*downstream, &mut up_frame);
                let backward = transfer(&*downstream, &*upstream, &mut down_frame);
                ticks.fetch_add(1, Ordering::Relaxed);

                for result in [forward, backward] {
                    match result {
                        Ok(()) => {}
                        Err(Error::StreamDestroyed) => {
                            debug!("Master port stopping: stream destroyed");
                            return;
                        }
                        Err(e) => warn!("Master port transfer failed: {}", e),
                    }
                }
            }
        }));
        Ok(())
    }

    /// Stop the clock; ports are left untouched
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            info!("Master port stopped after {} ticks", self.ticks());
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Frame intervals elapsed since the first start
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

fn transfer(from: &dyn MediaPort, to: &dyn MediaPort, frame: &mut AudioFrame) -> Result<()> {
    from.get_frame(frame)?;
    to.put_frame(frame)
}

impl Drop for MasterPort {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{FrameType, NullPort, PortInfo};
    use std::time::Duration;

    /// Counts frames and hands out a fixed ramp
    struct CountingPort {
        info: PortInfo,
        got: AtomicU64,
        put_audio: AtomicU64,
    }

    impl MediaPort for CountingPort {
        fn info(&self) -> &PortInfo {
            &self.info
        }

        fn get_frame(&self, frame: &mut AudioFrame) -> Result<()> {
            self.got.fetch_add(1, Ordering::SeqCst);
            *frame = AudioFrame::audio((0..self.info.samples_per_frame as i16).collect(), 0);
            Ok(())
        }

        fn put_frame(&self, frame: &AudioFrame) -> Result<()> {
            if frame.frame_type == FrameType::Audio {
                self.put_audio.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[test]
    fn test_incompatible_ports_rejected() {
        let a: Arc<dyn MediaPort> = Arc::new(NullPort::new(8000, 1, 20));
        let b: Arc<dyn MediaPort> = Arc::new(NullPort::new(16000, 1, 20));
        assert!(matches!(MasterPort::new(a, b), Err(Error::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_moves_frames_both_ways() {
        let counting = Arc::new(CountingPort {
            info: PortInfo::new("counting", 8000, 1, 20),
            got: AtomicU64::new(0),
            put_audio: AtomicU64::new(0),
        });
        let master = MasterPort::new(counting.clone(), Arc::new(NullPort::new(8000, 1, 20))).unwrap();
        master.start().unwrap();
        assert!(matches!(master.start(), Err(Error::InvalidState(_))));

        time::sleep(Duration::from_millis(205)).await;
        master.stop();
        assert!(!master.is_running());

        let ticks = master.ticks();
        assert!((10..=12).contains(&ticks), "ticks = {}", ticks);
        assert_eq!(counting.got.load(Ordering::SeqCst), ticks);
        // The null port only produces silence
        assert_eq!(counting.put_audio.load(Ordering::SeqCst), 0);
    }
}
