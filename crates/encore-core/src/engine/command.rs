//! Commands consumed by the engine worker
//!
//! Everything that mutates playback goes through one channel, so provider
//! calls (which may block on another process) only ever stall the worker.
//! Caller commands, provider callbacks, connection events and timer firings
//! share the channel and are handled strictly in arrival order.

use tokio::sync::oneshot;

use super::focus::FocusChange;
use crate::types::{Album, Playlist, ProviderId, TrackRef};

pub(crate) enum EngineCommand {
    // ─────────────────────────────────────────────────────────────
    // Queue
    // ─────────────────────────────────────────────────────────────
    /// Replace the queue with one track and play it
    PlaySong(TrackRef),
    PlayAlbum(Album),
    PlayPlaylist(Playlist),
    QueueSong { track: TrackRef, top: bool },
    QueueAlbum { album: Album, top: bool },
    QueuePlaylist { playlist: Playlist, top: bool },
    /// Insert right after the cursor
    PlayNext(TrackRef),
    RemoveFromQueue(usize),
    ClearQueue,

    // ─────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────
    PlayAtIndex(usize),
    Play,
    Pause,
    TogglePlayPause,
    Stop,
    Next,
    Previous,
    Seek(u64),
    SetRepeat(bool),
    SetShuffle(bool),

    // ─────────────────────────────────────────────────────────────
    // Internal follow-ups
    // ─────────────────────────────────────────────────────────────
    /// Start the track at the cursor. At most one is queued at a time.
    StartPlayback,
    /// Coalesced queue-changed notification
    QueueChanged,
    Timer(TimerEvent),

    // ─────────────────────────────────────────────────────────────
    // Provider and platform events
    // ─────────────────────────────────────────────────────────────
    ProviderPlaying(ProviderId),
    ProviderPaused(ProviderId),
    ProviderTrackEnded(ProviderId),
    ProviderConnected(ProviderId),
    ProviderDisconnected(ProviderId),
    FocusChanged(FocusChange),
    AudioBecomingNoisy,
    TracksUpdated(Vec<TrackRef>),

    // ─────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────
    /// Reply once every command queued before it has been handled
    Sync { reply: oneshot::Sender<()> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Scheduled work coming back to the worker
///
/// Every timer carries the ticket it was armed with; a firing whose ticket
/// no longer matches was superseded and is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TimerEvent {
    Prefetch { ticket: u64 },
    EndOfQueueStop { ticket: u64 },
    RecoverPlayback { ticket: u64, provider: ProviderId },
}

impl EngineCommand {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::PlaySong(_) => "PlaySong",
            Self::PlayAlbum(_) => "PlayAlbum",
            Self::PlayPlaylist(_) => "PlayPlaylist",
            Self::QueueSong { .. } => "QueueSong",
            Self::QueueAlbum { .. } => "QueueAlbum",
            Self::QueuePlaylist { .. } => "QueuePlaylist",
            Self::PlayNext(_) => "PlayNext",
            Self::RemoveFromQueue(_) => "RemoveFromQueue",
            Self::ClearQueue => "ClearQueue",
            Self::PlayAtIndex(_) => "PlayAtIndex",
            Self::Play => "Play",
            Self::Pause => "Pause",
            Self::TogglePlayPause => "TogglePlayPause",
            Self::Stop => "Stop",
            Self::Next => "Next",
            Self::Previous => "Previous",
            Self::Seek(_) => "Seek",
            Self::SetRepeat(_) => "SetRepeat",
            Self::SetShuffle(_) => "SetShuffle",
            Self::StartPlayback => "StartPlayback",
            Self::QueueChanged => "QueueChanged",
            Self::Timer(_) => "Timer",
            Self::ProviderPlaying(_) => "ProviderPlaying",
            Self::ProviderPaused(_) => "ProviderPaused",
            Self::ProviderTrackEnded(_) => "ProviderTrackEnded",
            Self::ProviderConnected(_) => "ProviderConnected",
            Self::ProviderDisconnected(_) => "ProviderDisconnected",
            Self::FocusChanged(_) => "FocusChanged",
            Self::AudioBecomingNoisy => "AudioBecomingNoisy",
            Self::TracksUpdated(_) => "TracksUpdated",
            Self::Sync { .. } => "Sync",
            Self::Shutdown { .. } => "Shutdown",
        }
    }
}
