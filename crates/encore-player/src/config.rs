//! Player configuration for encore-player
//!
//! Configuration is stored as YAML in the user's config directory.
//! Default location: ~/.config/encore/player.yaml

use std::path::PathBuf;

use encore_core::config::{default_state_path, EngineConfig};
use serde::{Deserialize, Serialize};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Playback engine tunables
    pub engine: EngineConfig,
    /// Settings file holding the queue, modes and DSP chain
    /// Default: ~/.local/share/encore/state.yaml
    pub state_path: PathBuf,
    /// Folder scanned for WAV files by the local provider
    /// Default: ~/Music
    pub library_path: PathBuf,
    pub output: OutputConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        let library_path = dirs::audio_dir().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("Music")
        });

        Self {
            engine: EngineConfig::default(),
            state_path: default_state_path(),
            library_path,
            output: OutputConfig::default(),
        }
    }
}

/// Output section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Audio buffered between the engine and the output, in milliseconds
    pub buffer_ms: u32,
    /// How long before the end of a track the next one is opened
    pub prefetch_delay_ms: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            buffer_ms: 250,
            prefetch_delay_ms: 5000,
        }
    }
}

impl OutputConfig {
    /// Buffer size in interleaved samples for the given engine format
    pub fn buffer_samples(&self, engine: &EngineConfig) -> usize {
        let format = engine.default_format();
        let frames = format.sample_rate as u64 * self.buffer_ms.max(10) as u64 / 1000;
        (frames * format.channels.max(1) as u64) as usize
    }
}
