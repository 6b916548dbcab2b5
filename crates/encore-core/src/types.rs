//! Core types shared across the playback engine

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an audio source or effect provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Reference to a playable track
///
/// Only identifies the track; metadata lives in the catalog. Two references
/// are equal when both the track id and the owning provider match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackRef {
    pub track_id: String,
    pub provider: ProviderId,
}

impl TrackRef {
    pub fn new(track_id: impl Into<String>, provider: impl Into<ProviderId>) -> Self {
        Self {
            track_id: track_id.into(),
            provider: provider.into(),
        }
    }
}

impl fmt::Display for TrackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.track_id, self.provider)
    }
}

/// An album as handed in by callers: track ids owned by one provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Album {
    pub id: String,
    pub provider: ProviderId,
    pub track_ids: Vec<String>,
}

/// A playlist as handed in by callers: track ids owned by one provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    pub id: String,
    pub provider: ProviderId,
    pub track_ids: Vec<String>,
}

/// Whether a track can currently be played
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable,
    /// Metadata has not arrived yet
    Loading,
}

/// Catalog metadata the engine needs about a track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackInfo {
    pub duration_ms: u64,
    pub availability: Availability,
}

impl TrackInfo {
    pub fn available(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            availability: Availability::Available,
        }
    }

    /// Metadata is present and usable
    pub fn is_loaded(&self) -> bool {
        self.availability != Availability::Loading
    }

    pub fn is_available(&self) -> bool {
        self.availability == Availability::Available
    }
}

/// Engine playback state
///
/// Stored as a `u8` in [`crate::engine::PlaybackAtomics`] for lock-free reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PlaybackState {
    #[default]
    Stopped = 0,
    Buffering = 1,
    Playing = 2,
    Pausing = 3,
    Paused = 4,
}

impl PlaybackState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Buffering,
            2 => Self::Playing,
            3 => Self::Pausing,
            4 => Self::Paused,
            _ => Self::Stopped,
        }
    }

    /// Playing or about to play
    pub fn is_active(self) -> bool {
        matches!(self, Self::Playing | Self::Buffering)
    }
}

/// PCM format of the interleaved 16-bit audio moving through the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Duration of `samples` interleaved samples, in microseconds
    pub fn samples_to_micros(&self, samples: usize) -> u64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        let frames = samples as u64 / self.channels as u64;
        frames * 1_000_000 / self.sample_rate as u64
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(44_100, 2)
    }
}
