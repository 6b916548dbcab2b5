//! Output selection
//!
//! Without the `device-output` feature the player runs headless: a
//! [`MemorySink`] is drained in real time by a clock thread, so playback
//! position, back-pressure and track ends behave as they would on hardware.
//! With the feature enabled the sink is the cpal-backed device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use encore_core::config::EngineConfig;
use encore_core::sink::{AudioSink, MemorySink};

use crate::config::OutputConfig;

/// Drain period of the simulated output
const CLOCK_TICK: Duration = Duration::from_millis(10);

/// Consumes a [`MemorySink`] at the rate of its current format
pub struct OutputClock {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl OutputClock {
    pub fn start(sink: Arc<MemorySink>) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("encore-clock".into())
            .spawn(move || run_clock(&sink, &thread_running))
            .context("Failed to spawn output clock thread")?;
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for OutputClock {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_clock(sink: &MemorySink, running: &AtomicBool) {
    let start = Instant::now();
    let mut consumed_us: u64 = 0;

    while running.load(Ordering::Relaxed) {
        thread::sleep(CLOCK_TICK);

        // Pace against wall time so sleep jitter does not drift the clock
        let elapsed_us = start.elapsed().as_micros() as u64;
        let format = sink.format().unwrap_or_default();
        let frames = (elapsed_us - consumed_us) * format.sample_rate as u64 / 1_000_000;
        if frames == 0 {
            continue;
        }
        consumed_us += frames * 1_000_000 / format.sample_rate.max(1) as u64;
        sink.drain(frames as usize * format.channels as usize);
    }
}

/// The sink handed to the engine, plus whatever keeps it running
pub enum Output {
    Simulated {
        sink: Arc<MemorySink>,
        clock: OutputClock,
    },
    #[cfg(feature = "device-output")]
    Device(Arc<encore_core::sink::DeviceSink>),
}

impl Output {
    pub fn open(config: &OutputConfig, engine: &EngineConfig) -> Result<Self> {
        #[cfg(feature = "device-output")]
        {
            match encore_core::sink::DeviceSink::open(config.buffer_ms) {
                Ok(sink) => {
                    log::info!("Output: audio device, {}ms buffer", config.buffer_ms);
                    return Ok(Self::Device(Arc::new(sink)));
                }
                Err(e) => log::warn!("Audio device unavailable ({}), using simulated output", e),
            }
        }

        let sink = Arc::new(MemorySink::new(config.buffer_samples(engine)));
        let clock = OutputClock::start(Arc::clone(&sink))?;
        log::info!("Output: simulated, {}ms buffer", config.buffer_ms);
        Ok(Self::Simulated { sink, clock })
    }

    pub fn sink(&self) -> Arc<dyn AudioSink> {
        match self {
            Self::Simulated { sink, .. } => sink.clone() as Arc<dyn AudioSink>,
            #[cfg(feature = "device-output")]
            Self::Device(sink) => sink.clone(),
        }
    }

    pub fn close(self) {
        match self {
            Self::Simulated { mut clock, .. } => clock.stop(),
            #[cfg(feature = "device-output")]
            Self::Device(sink) => sink.release(),
        }
    }
}
