//! Audio output sinks
//!
//! The routing hub writes interleaved 16-bit PCM into an [`AudioSink`]. A sink
//! owns whatever buffering sits between the hub and the output device, and
//! exposes its counters for diagnostics and position tracking.
//!
//! Implementations:
//! - [`MemorySink`]: bounded buffer drained by the caller (tests, headless runs)
//! - `DeviceSink`: CPAL output behind the `cpal-sink` feature

mod error;
mod memory;

#[cfg(feature = "cpal-sink")]
mod device;

pub use error::{SinkError, SinkResult};
pub use memory::MemorySink;

#[cfg(feature = "cpal-sink")]
pub use device::DeviceSink;

use crate::types::AudioFormat;

/// Output device abstraction
///
/// All methods take `&self`: the hub writes from provider threads while the
/// engine worker flushes and pauses. Implementations use atomics or short
/// locks internally.
pub trait AudioSink: Send + Sync {
    /// Configure the output format. Returns false when the device refuses it.
    fn setup(&self, format: AudioFormat) -> bool;

    /// Queue samples for output, returning how many samples were accepted.
    /// Partial writes are possible when the buffer is nearly full.
    fn write(&self, samples: &[i16]) -> usize;

    /// Free buffer space, in samples
    fn available(&self) -> usize;

    /// Drop buffered audio and reset the written/dropout counters
    fn flush(&self);

    /// Paused sinks keep their buffer but output silence
    fn set_paused(&self, paused: bool);

    /// Samples accepted since the last flush
    fn written_samples(&self) -> u64;

    /// Buffer underruns since the last flush
    fn dropouts(&self) -> u64;

    /// Output gain, 0.0 to 1.0
    fn set_volume(&self, volume: f32);

    /// Release device resources. The sink is unusable afterwards.
    fn release(&self) {}
}
