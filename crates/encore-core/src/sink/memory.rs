//! Bounded in-memory sink
//!
//! Stands in for a device: the hub writes into a fixed-capacity buffer and a
//! consumer (a test, or the player's clock thread) drains it at its own pace.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use super::AudioSink;
use crate::types::AudioFormat;

pub struct MemorySink {
    capacity: usize,
    buffer: Mutex<VecDeque<i16>>,
    format: Mutex<Option<AudioFormat>>,
    paused: AtomicBool,
    released: AtomicBool,
    written: AtomicU64,
    dropouts: AtomicU64,
    flushes: AtomicU64,
    /// f32 bits
    volume: AtomicU32,
}

impl MemorySink {
    /// Create a sink buffering at most `capacity` samples
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            format: Mutex::new(None),
            paused: AtomicBool::new(false),
            released: AtomicBool::new(false),
            written: AtomicU64::new(0),
            dropouts: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            volume: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    /// Pull up to `max` samples as a device callback would
    ///
    /// A paused sink yields nothing. Asking for more than is buffered counts
    /// as one dropout.
    pub fn drain(&self, max: usize) -> Vec<i16> {
        if self.paused.load(Ordering::Relaxed) {
            return Vec::new();
        }
        let mut buffer = match self.buffer.lock() {
            Ok(buffer) => buffer,
            Err(poisoned) => poisoned.into_inner(),
        };
        if buffer.len() < max {
            self.dropouts.fetch_add(1, Ordering::Relaxed);
        }
        let n = max.min(buffer.len());
        buffer.drain(..n).collect()
    }

    /// Samples currently buffered
    pub fn buffered(&self) -> usize {
        self.buffer.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.format.lock().ok().and_then(|f| *f)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Relaxed)
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    /// Number of flush calls so far
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }
}

impl AudioSink for MemorySink {
    fn setup(&self, format: AudioFormat) -> bool {
        if format.sample_rate == 0 || format.channels == 0 {
            return false;
        }
        if let Ok(mut current) = self.format.lock() {
            *current = Some(format);
        }
        true
    }

    fn write(&self, samples: &[i16]) -> usize {
        if self.released.load(Ordering::Relaxed) {
            return 0;
        }
        let mut buffer = match self.buffer.lock() {
            Ok(buffer) => buffer,
            Err(poisoned) => poisoned.into_inner(),
        };
        let n = samples.len().min(self.capacity - buffer.len());
        buffer.extend(&samples[..n]);
        self.written.fetch_add(n as u64, Ordering::Relaxed);
        n
    }

    fn available(&self) -> usize {
        let used = self.buffered();
        self.capacity.saturating_sub(used)
    }

    fn flush(&self) {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.clear();
        }
        self.written.store(0, Ordering::Relaxed);
        self.dropouts.store(0, Ordering::Relaxed);
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    fn written_samples(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    fn dropouts(&self) -> u64 {
        self.dropouts.load(Ordering::Relaxed)
    }

    fn set_volume(&self, volume: f32) {
        self.volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn release(&self) {
        self.released.store(true, Ordering::Relaxed);
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.clear();
        }
    }
}
