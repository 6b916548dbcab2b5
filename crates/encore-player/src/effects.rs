//! Built-in effect providers
//!
//! Small in-process effects so the DSP chain can be exercised without any
//! plugin installed.

use std::sync::Arc;

use encore_core::provider::{Endpoint, EffectProvider, ProviderConnection, ProviderRegistry, ProviderResult};
use encore_core::{AudioFormat, ProviderId};

/// Fixed attenuation
pub struct GainEffect {
    gain: f32,
}

impl GainEffect {
    pub fn new(gain: f32) -> Self {
        Self {
            gain: gain.clamp(0.0, 1.0),
        }
    }
}

impl EffectProvider for GainEffect {
    fn process(&self, input: &[i16], output: &mut Vec<i16>, _format: AudioFormat) -> ProviderResult<()> {
        output.extend(input.iter().map(|&s| (s as f32 * self.gain) as i16));
        Ok(())
    }
}

/// Folds stereo to mono on both channels
pub struct MonoEffect;

impl EffectProvider for MonoEffect {
    fn process(&self, input: &[i16], output: &mut Vec<i16>, format: AudioFormat) -> ProviderResult<()> {
        if format.channels != 2 {
            output.extend_from_slice(input);
            return Ok(());
        }
        for frame in input.chunks(2) {
            let mixed = ((frame[0] as i32 + *frame.get(1).unwrap_or(&frame[0]) as i32) / 2) as i16;
            output.push(mixed);
            if frame.len() == 2 {
                output.push(mixed);
            }
        }
        Ok(())
    }
}

/// Register the built-in effects, returning their ids
pub fn register_builtin_effects(registry: &ProviderRegistry) -> Vec<ProviderId> {
    let effects: [(&str, &str, Arc<dyn EffectProvider>); 2] = [
        ("gain", "Gain -6dB", Arc::new(GainEffect::new(0.5))),
        ("mono", "Mono", Arc::new(MonoEffect)),
    ];
    effects
        .into_iter()
        .map(|(id, name, effect)| {
            let id = ProviderId::new(id);
            registry.register(ProviderConnection::new(id.clone(), name, Endpoint::Effect(effect)));
            id
        })
        .collect()
}
