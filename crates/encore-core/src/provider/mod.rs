//! Provider contracts
//!
//! Providers are the out-of-process plugins the engine drives: audio sources
//! that decode tracks and push frames through a hub socket, and effects that
//! transform frames in the DSP chain. The traits here are the RPC surface;
//! any transport works as long as a dead peer surfaces as
//! [`ProviderError::PeerUnavailable`].

mod connection;
mod registry;

pub use connection::{assign_audio_socket, Endpoint, ProviderConnection};
pub use registry::{ConnectionListener, ProviderRegistry};

use std::sync::Arc;

use thiserror::Error;

use crate::hub::AudioSocket;
use crate::types::{AudioFormat, ProviderId, TrackRef};

/// Failure of a call into a provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider process is gone or not bound
    #[error("Provider {0} is unavailable")]
    PeerUnavailable(ProviderId),

    /// The provider answered but refused the request
    #[error("Provider {provider} rejected the request: {reason}")]
    Rejected { provider: ProviderId, reason: String },
}

/// Result type for provider calls
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Status callbacks a source provider emits from its own threads
pub trait ProviderCallback: Send + Sync {
    fn on_playing(&self, provider: &ProviderId);
    fn on_paused(&self, provider: &ProviderId);
    fn on_track_ended(&self, provider: &ProviderId);
}

/// Audio source provider
///
/// Calls may block (they cross a process boundary) and may fail at any time.
pub trait MusicProvider: Send + Sync {
    fn play_track(&self, track: &TrackRef) -> ProviderResult<()>;

    fn pause(&self) -> ProviderResult<()>;

    fn resume(&self) -> ProviderResult<()>;

    fn seek(&self, position_ms: u64) -> ProviderResult<()>;

    /// Start preparing a track that is expected to play next
    fn prefetch(&self, track: &TrackRef) -> ProviderResult<()>;

    /// How long before the end of the current track prefetching should start
    fn prefetch_delay_ms(&self) -> ProviderResult<u64>;

    /// Page through the provider's library
    fn get_tracks(&self, offset: usize, limit: usize) -> ProviderResult<Vec<TrackRef>>;

    fn register_callback(&self, callback: Arc<dyn ProviderCallback>) -> ProviderResult<()>;

    fn unregister_callback(&self, callback: &Arc<dyn ProviderCallback>) -> ProviderResult<()>;

    /// Hand the provider the socket it must write decoded audio to
    fn set_audio_socket(&self, socket: AudioSocket) -> ProviderResult<()>;
}

/// DSP effect provider
pub trait EffectProvider: Send + Sync {
    /// Process one block. `output` arrives empty and must receive the result,
    /// with as many samples as `input`; a stage that changes the length is
    /// bypassed.
    fn process(&self, input: &[i16], output: &mut Vec<i16>, format: AudioFormat)
        -> ProviderResult<()>;

    fn on_format_changed(&self, _format: AudioFormat) -> ProviderResult<()> {
        Ok(())
    }
}
