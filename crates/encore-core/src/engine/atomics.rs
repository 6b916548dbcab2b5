//! Lock-free playback state for caller threads
//!
//! The worker is the only writer. Callers (UI, remote control) read these
//! without touching the command channel, so a worker stuck in a slow provider
//! call never blocks a status query.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};

use crate::hub::FramesWrittenListener;
use crate::types::{AudioFormat, PlaybackState};

pub struct PlaybackAtomics {
    /// Encoded [`PlaybackState`]
    pub state: AtomicU8,
    /// Queue cursor, -1 when unset
    pub current_index: AtomicI64,
    /// Position in the current track, in microseconds of audio written
    pub elapsed_us: AtomicU64,
    pub repeat: AtomicBool,
    pub shuffle: AtomicBool,
}

impl PlaybackAtomics {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(PlaybackState::Stopped as u8),
            current_index: AtomicI64::new(-1),
            elapsed_us: AtomicU64::new(0),
            repeat: AtomicBool::new(false),
            shuffle: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set_state(&self, state: PlaybackState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    #[inline]
    pub fn current_index(&self) -> Option<usize> {
        let index = self.current_index.load(Ordering::Relaxed);
        (index >= 0).then_some(index as usize)
    }

    #[inline]
    pub fn set_current_index(&self, index: Option<usize>) {
        let raw = index.map(|i| i as i64).unwrap_or(-1);
        self.current_index.store(raw, Ordering::Relaxed);
    }

    #[inline]
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_us.load(Ordering::Relaxed) / 1000
    }

    #[inline]
    pub fn set_elapsed_ms(&self, ms: u64) {
        self.elapsed_us.store(ms * 1000, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_repeat(&self) -> bool {
        self.repeat.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_shuffle(&self) -> bool {
        self.shuffle.load(Ordering::Relaxed)
    }
}

impl Default for PlaybackAtomics {
    fn default() -> Self {
        Self::new()
    }
}

// Elapsed time follows the samples the sink accepted, not the wall clock
impl FramesWrittenListener for PlaybackAtomics {
    fn on_frames_written(&self, samples: usize, format: AudioFormat) {
        let micros = format.samples_to_micros(samples);
        self.elapsed_us.fetch_add(micros, Ordering::Relaxed);
    }
}
