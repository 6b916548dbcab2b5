//! Playback engine tunables

use serde::{Deserialize, Serialize};

use crate::types::AudioFormat;

/// Tunables for the playback engine
///
/// Every field has a default so partial YAML files load cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delay before stopping once the last track of a non-repeating queue
    /// ends, so the sink can drain what it still buffers
    pub end_of_queue_grace_ms: u64,
    /// Settle time before re-issuing play + seek to a provider that came back
    pub crash_recovery_delay_ms: u64,
    /// Past this position `previous()` restarts the current track
    pub restart_threshold_ms: u64,
    /// Output gain while ducked for another app
    pub duck_volume: f32,
    /// Ask providers to prepare the next track before the current one ends
    pub prefetch_enabled: bool,
    /// Sink format until a provider announces its own
    pub default_sample_rate: u32,
    pub default_channels: u16,
    /// Prefix of generated audio socket names
    pub socket_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            end_of_queue_grace_ms: 2000,
            crash_recovery_delay_ms: 2000,
            restart_threshold_ms: 4000,
            duck_volume: 0.5,
            prefetch_enabled: true,
            default_sample_rate: 44_100,
            default_channels: 2,
            socket_prefix: "encore.audio_socket".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn default_format(&self) -> AudioFormat {
        AudioFormat::new(self.default_sample_rate, self.default_channels)
    }

    /// Clamp values that would break the engine
    pub fn sanitized(mut self) -> Self {
        if !(0.0..=1.0).contains(&self.duck_volume) || self.duck_volume.is_nan() {
            log::warn!(
                "EngineConfig: duck_volume {} out of range, using 0.5",
                self.duck_volume
            );
            self.duck_volume = 0.5;
        }
        if self.default_sample_rate == 0 || self.default_channels == 0 {
            log::warn!("EngineConfig: invalid default format, using 44100 Hz stereo");
            self.default_sample_rate = 44_100;
            self.default_channels = 2;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: EngineConfig = serde_yaml::from_str("end_of_queue_grace_ms: 500\n").unwrap();
        assert_eq!(config.end_of_queue_grace_ms, 500);
        assert_eq!(config.restart_threshold_ms, 4000);
        assert_eq!(config.duck_volume, 0.5);
    }

    #[test]
    fn test_sanitize_rejects_bad_values() {
        let config = EngineConfig {
            duck_volume: 3.0,
            default_channels: 0,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(config.duck_volume, 0.5);
        assert_eq!(config.default_format(), AudioFormat::new(44_100, 2));
    }
}
