//! Playback engine
//!
//! [`PlaybackEngine`] is the control surface: every mutating call becomes a
//! command on a channel consumed by one worker thread, so a provider blocking
//! on IPC never stalls the caller.
//! Status reads go through [`PlaybackAtomics`] and never touch the channel.
//!
//! ```ignore
//! let engine = EngineBuilder::new(registry, catalog)
//!     .config(config.engine.clone())
//!     .store(store)
//!     .sink(sink)
//!     .build()?;
//!
//! engine.play_song(TrackRef::new("42", "local"))?;
//! assert_eq!(engine.current_index(), Some(0));
//! ```

mod atomics;
mod command;
mod controller;
mod focus;
mod observer;

#[cfg(test)]
mod tests;

pub use atomics::PlaybackAtomics;
pub use focus::{AudioFocus, FocusChange, NoFocus};
pub use observer::{ObserverId, PlaybackObserver};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::catalog::TrackCatalog;
use crate::config::EngineConfig;
use crate::dsp::DspChainManager;
use crate::hub::{BufferInfo, RoutingHub};
use crate::provider::{ConnectionListener, ProviderCallback, ProviderConnection, ProviderRegistry};
use crate::queue::PlaybackQueue;
use crate::scheduler::{TaskScheduler, TimerScheduler};
use crate::sink::AudioSink;
use crate::store::{MemoryStore, SettingsStore, StoreError};
use crate::types::{Album, PlaybackState, Playlist, ProviderId, TrackRef};
use command::EngineCommand;
use controller::{lock_queue, Controller};
use observer::ObserverRegistry;

pub const REPEAT_KEY: &str = "repeatMode";
pub const SHUFFLE_KEY: &str = "shuffleMode";

/// Errors from the engine control surface
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Playback engine is shut down")]
    Disconnected,

    #[error("Failed to persist engine state: {0}")]
    Store(#[from] StoreError),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Snapshot of the engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Samples accepted by the sink since its last flush
    pub written_samples: u64,
    /// Sink underruns since its last flush
    pub dropouts: u64,
    pub commands_handled: u64,
    pub skipped_tracks: u64,
    pub provider_errors: u64,
    pub recoveries: u64,
}

#[derive(Default)]
pub(crate) struct EngineCounters {
    commands: AtomicU64,
    skipped: AtomicU64,
    provider_errors: AtomicU64,
    recoveries: AtomicU64,
}

impl EngineCounters {
    pub fn record_command(&self) {
        self.commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_error(&self) {
        self.provider_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recovery(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
    }
}

/// State shared by the control surface and the worker
pub(crate) struct EngineShared {
    pub config: EngineConfig,
    pub registry: Arc<ProviderRegistry>,
    pub catalog: Arc<dyn TrackCatalog>,
    pub hub: RoutingHub,
    pub store: Arc<dyn SettingsStore>,
    pub dsp: DspChainManager,
    pub atomics: Arc<PlaybackAtomics>,
    pub observers: ObserverRegistry,
    pub queue: Mutex<PlaybackQueue>,
    pub diagnostics: EngineCounters,
    sleep_deadline: Mutex<Option<Instant>>,
    start_pending: AtomicBool,
    queue_change_pending: AtomicBool,
    shutting_down: AtomicBool,
}

impl EngineShared {
    /// Returns true when no start was pending yet
    pub fn mark_start_pending(&self) -> bool {
        !self.start_pending.swap(true, Ordering::Relaxed)
    }

    pub fn clear_start_pending(&self) {
        self.start_pending.store(false, Ordering::Relaxed);
    }

    /// Returns true when no queue-changed notification was pending yet
    pub fn mark_queue_change_pending(&self) -> bool {
        !self.queue_change_pending.swap(true, Ordering::Relaxed)
    }

    pub fn clear_queue_change_pending(&self) {
        self.queue_change_pending.store(false, Ordering::Relaxed);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// Clears the sleep timer and returns true if its deadline has passed
    pub fn take_expired_sleep_timer(&self) -> bool {
        let mut deadline = match self.sleep_deadline.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match *deadline {
            Some(at) if Instant::now() >= at => {
                *deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Turns provider callbacks and connection events into worker commands
struct CommandForwarder {
    command_tx: Sender<EngineCommand>,
}

impl CommandForwarder {
    fn forward(&self, command: EngineCommand) {
        if self.command_tx.send(command).is_err() {
            log::debug!("Engine gone, dropping provider event");
        }
    }
}

impl ProviderCallback for CommandForwarder {
    fn on_playing(&self, provider: &ProviderId) {
        self.forward(EngineCommand::ProviderPlaying(provider.clone()));
    }

    fn on_paused(&self, provider: &ProviderId) {
        self.forward(EngineCommand::ProviderPaused(provider.clone()));
    }

    fn on_track_ended(&self, provider: &ProviderId) {
        self.forward(EngineCommand::ProviderTrackEnded(provider.clone()));
    }
}

impl ConnectionListener for CommandForwarder {
    fn on_connected(&self, connection: &Arc<ProviderConnection>) {
        self.forward(EngineCommand::ProviderConnected(connection.id().clone()));
    }

    fn on_disconnected(&self, connection: &Arc<ProviderConnection>) {
        self.forward(EngineCommand::ProviderDisconnected(connection.id().clone()));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Collects the collaborators the engine is constructed with
pub struct EngineBuilder {
    config: EngineConfig,
    registry: Arc<ProviderRegistry>,
    catalog: Arc<dyn TrackCatalog>,
    store: Arc<dyn SettingsStore>,
    sink: Option<Arc<dyn AudioSink>>,
    focus: Box<dyn AudioFocus>,
    scheduler: Option<Arc<dyn TaskScheduler>>,
    shuffle_seed: Option<u64>,
}

impl EngineBuilder {
    pub fn new(registry: Arc<ProviderRegistry>, catalog: Arc<dyn TrackCatalog>) -> Self {
        Self {
            config: EngineConfig::default(),
            registry,
            catalog,
            store: Arc::new(MemoryStore::new()),
            sink: None,
            focus: Box::new(NoFocus),
            scheduler: None,
            shuffle_seed: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.store = store;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn focus(mut self, focus: Box<dyn AudioFocus>) -> Self {
        self.focus = focus;
        self
    }

    /// Defaults to a [`TimerScheduler`] owned by the engine
    pub fn scheduler(mut self, scheduler: Arc<dyn TaskScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Fixed seed for reproducible shuffle order
    pub fn shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    /// Restore persisted state and start the worker
    pub fn build(self) -> EngineResult<PlaybackEngine> {
        let config = self.config.sanitized();
        let store = self.store;
        let registry = self.registry;

        let hub = RoutingHub::new(config.default_format(), config.duck_volume);
        let atomics = Arc::new(PlaybackAtomics::new());
        hub.set_frames_listener(Some(atomics.clone()));
        if let Some(sink) = self.sink {
            hub.set_sink(sink);
        }

        let mut queue = PlaybackQueue::new();
        if let Err(e) = queue.restore(store.as_ref(), self.catalog.as_ref()) {
            log::error!("Cannot restore playback queue, starting empty: {}", e);
            queue.clear();
        }
        atomics.set_current_index(queue.current_index());
        atomics
            .repeat
            .store(store.get_bool(REPEAT_KEY).unwrap_or(false), Ordering::Relaxed);
        atomics
            .shuffle
            .store(store.get_bool(SHUFFLE_KEY).unwrap_or(false), Ordering::Relaxed);

        let dsp = DspChainManager::new(
            Arc::clone(&registry),
            hub.clone(),
            Arc::clone(&store),
            config.socket_prefix.clone(),
        );
        dsp.restore_chain();

        let scheduler: Arc<dyn TaskScheduler> = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(TimerScheduler::new().map_err(EngineError::Spawn)?),
        };
        let rng = match self.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let shared = Arc::new(EngineShared {
            config,
            registry: Arc::clone(&registry),
            catalog: self.catalog,
            hub,
            store,
            dsp,
            atomics,
            observers: ObserverRegistry::default(),
            queue: Mutex::new(queue),
            diagnostics: EngineCounters::default(),
            sleep_deadline: Mutex::new(None),
            start_pending: AtomicBool::new(false),
            queue_change_pending: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
        });

        let (command_tx, command_rx) = crossbeam::channel::unbounded();
        let forwarder = Arc::new(CommandForwarder {
            command_tx: command_tx.clone(),
        });
        let listener: Arc<dyn ConnectionListener> = forwarder.clone();
        registry.add_listener(Arc::clone(&listener));

        let controller = Controller::new(
            Arc::clone(&shared),
            self.focus,
            scheduler,
            rng,
            command_tx.clone(),
            forwarder,
        );
        let thread_handle = thread::Builder::new()
            .name("encore-engine".into())
            .spawn(move || controller.run(command_rx))
            .map_err(EngineError::Spawn)?;

        // Sources already up get their sockets and callbacks on the worker
        for connection in registry.sources() {
            if connection.is_connected() {
                let _ = command_tx.send(EngineCommand::ProviderConnected(connection.id().clone()));
            }
        }

        Ok(PlaybackEngine {
            shared,
            command_tx,
            listener,
            thread_handle: Mutex::new(Some(thread_handle)),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Control surface
// ─────────────────────────────────────────────────────────────────────────────

pub struct PlaybackEngine {
    shared: Arc<EngineShared>,
    command_tx: Sender<EngineCommand>,
    listener: Arc<dyn ConnectionListener>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackEngine {
    fn send(&self, command: EngineCommand) -> EngineResult<()> {
        self.command_tx
            .send(command)
            .map_err(|_| EngineError::Disconnected)
    }

    // Queue

    /// Replace the queue with `track` and play it
    pub fn play_song(&self, track: TrackRef) -> EngineResult<()> {
        self.send(EngineCommand::PlaySong(track))
    }

    pub fn play_album(&self, album: Album) -> EngineResult<()> {
        self.send(EngineCommand::PlayAlbum(album))
    }

    pub fn play_playlist(&self, playlist: Playlist) -> EngineResult<()> {
        self.send(EngineCommand::PlayPlaylist(playlist))
    }

    /// Append `track`, or put it at the head when `top` is set
    pub fn queue_song(&self, track: TrackRef, top: bool) -> EngineResult<()> {
        self.send(EngineCommand::QueueSong { track, top })
    }

    pub fn queue_album(&self, album: Album, top: bool) -> EngineResult<()> {
        self.send(EngineCommand::QueueAlbum { album, top })
    }

    pub fn queue_playlist(&self, playlist: Playlist, top: bool) -> EngineResult<()> {
        self.send(EngineCommand::QueuePlaylist { playlist, top })
    }

    /// Insert `track` right after the current one
    pub fn play_next(&self, track: TrackRef) -> EngineResult<()> {
        self.send(EngineCommand::PlayNext(track))
    }

    pub fn remove_from_queue(&self, index: usize) -> EngineResult<()> {
        self.send(EngineCommand::RemoveFromQueue(index))
    }

    pub fn clear_queue(&self) -> EngineResult<()> {
        self.send(EngineCommand::ClearQueue)
    }

    // Transport

    /// Out of range indices are clamped when the command runs
    pub fn play_at_index(&self, index: usize) -> EngineResult<()> {
        self.send(EngineCommand::PlayAtIndex(index))
    }

    /// Resume, or start the queue. No-op while playing or buffering.
    pub fn play(&self) -> EngineResult<()> {
        if self.state().is_active() {
            return Ok(());
        }
        self.send(EngineCommand::Play)
    }

    pub fn pause(&self) -> EngineResult<()> {
        self.send(EngineCommand::Pause)
    }

    pub fn toggle_play_pause(&self) -> EngineResult<()> {
        self.send(EngineCommand::TogglePlayPause)
    }

    pub fn stop(&self) -> EngineResult<()> {
        self.send(EngineCommand::Stop)
    }

    pub fn next(&self) -> EngineResult<()> {
        self.send(EngineCommand::Next)
    }

    pub fn previous(&self) -> EngineResult<()> {
        self.send(EngineCommand::Previous)
    }

    pub fn seek(&self, position_ms: u64) -> EngineResult<()> {
        self.send(EngineCommand::Seek(position_ms))
    }

    pub fn set_repeat(&self, repeat: bool) -> EngineResult<()> {
        self.send(EngineCommand::SetRepeat(repeat))
    }

    pub fn set_shuffle(&self, shuffle: bool) -> EngineResult<()> {
        self.send(EngineCommand::SetShuffle(shuffle))
    }

    // Platform events

    pub fn on_focus_change(&self, change: FocusChange) -> EngineResult<()> {
        self.send(EngineCommand::FocusChanged(change))
    }

    /// Output is about to become audible to the room (headphones unplugged)
    pub fn on_audio_becoming_noisy(&self) -> EngineResult<()> {
        self.send(EngineCommand::AudioBecomingNoisy)
    }

    /// Catalog metadata changed for `tracks`
    pub fn on_tracks_updated(&self, tracks: Vec<TrackRef>) -> EngineResult<()> {
        self.send(EngineCommand::TracksUpdated(tracks))
    }

    // Sleep timer

    /// Stop instead of starting the next track once `deadline` has passed
    pub fn set_sleep_timer(&self, deadline: Option<Instant>) {
        if let Ok(mut slot) = self.shared.sleep_deadline.lock() {
            *slot = deadline;
        }
        match deadline {
            Some(at) => log::info!(
                "Sleep timer set to {:?} from now",
                at.saturating_duration_since(Instant::now())
            ),
            None => log::info!("Sleep timer cleared"),
        }
    }

    pub fn set_sleep_timer_in(&self, delay: Duration) {
        self.set_sleep_timer(Some(Instant::now() + delay));
    }

    pub fn sleep_timer(&self) -> Option<Instant> {
        self.shared.sleep_deadline.lock().ok().and_then(|d| *d)
    }

    // DSP chain

    pub fn set_active_chain(&self, chain: &[ProviderId]) {
        self.shared.dsp.set_active_chain(chain);
    }

    pub fn active_chain(&self) -> Vec<ProviderId> {
        self.shared.dsp.active_chain()
    }

    // Observers

    pub fn add_observer(&self, observer: Arc<dyn PlaybackObserver>) -> ObserverId {
        self.shared.observers.add(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.shared.observers.remove(id)
    }

    pub fn observer_count(&self) -> usize {
        self.shared.observers.len()
    }

    // Lock-free reads

    pub fn state(&self) -> PlaybackState {
        self.shared.atomics.state()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.shared.atomics.current_index()
    }

    pub fn current_track(&self) -> Option<TrackRef> {
        lock_queue(&self.shared.queue).current_track().cloned()
    }

    /// Position in the current track, from the audio written to the sink
    pub fn position_ms(&self) -> u64 {
        self.shared.atomics.elapsed_ms()
    }

    pub fn is_repeat(&self) -> bool {
        self.shared.atomics.is_repeat()
    }

    pub fn is_shuffle(&self) -> bool {
        self.shared.atomics.is_shuffle()
    }

    /// Copy of the queue as the worker last left it
    pub fn queue(&self) -> PlaybackQueue {
        lock_queue(&self.shared.queue).clone()
    }

    pub fn atomics(&self) -> Arc<PlaybackAtomics> {
        Arc::clone(&self.shared.atomics)
    }

    /// The routing hub, for adding frame observers
    pub fn hub(&self) -> &RoutingHub {
        &self.shared.hub
    }

    pub fn buffer_info(&self) -> BufferInfo {
        self.shared
            .hub
            .sink()
            .map(|sink| BufferInfo {
                written_samples: sink.written_samples(),
                dropouts: sink.dropouts(),
                available: sink.available(),
            })
            .unwrap_or_default()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let buffer = self.buffer_info();
        let counters = &self.shared.diagnostics;
        Diagnostics {
            written_samples: buffer.written_samples,
            dropouts: buffer.dropouts,
            commands_handled: counters.commands.load(Ordering::Relaxed),
            skipped_tracks: counters.skipped.load(Ordering::Relaxed),
            provider_errors: counters.provider_errors.load(Ordering::Relaxed),
            recoveries: counters.recoveries.load(Ordering::Relaxed),
        }
    }

    // Lifecycle

    /// Block until every command sent so far, and whatever it triggered,
    /// has been handled
    pub fn sync(&self) -> EngineResult<()> {
        let (reply, done) = oneshot::channel();
        self.send(EngineCommand::Sync { reply })?;
        done.blocking_recv().map_err(|_| EngineError::Disconnected)
    }

    /// Write queue and flags to the store now
    pub fn save_state(&self) -> EngineResult<()> {
        let queue = self.queue();
        let store = self.shared.store.as_ref();
        queue.save(store)?;
        store.put_bool(REPEAT_KEY, self.is_repeat())?;
        store.put_bool(SHUFFLE_KEY, self.is_shuffle())?;
        Ok(())
    }

    /// Persist state, release providers and the sink, and stop the worker
    ///
    /// Commands still queued are discarded. Calling it again is a no-op.
    pub fn shutdown(&self) -> EngineResult<()> {
        let handle = self.thread_handle.lock().ok().and_then(|mut h| h.take());
        let Some(handle) = handle else {
            return Ok(());
        };

        self.shared.shutting_down.store(true, Ordering::Relaxed);
        self.shared.registry.remove_listener(&self.listener);

        let (reply, done) = oneshot::channel();
        if self.command_tx.send(EngineCommand::Shutdown { reply }).is_ok() {
            let _ = done.blocking_recv();
        }
        handle.join().map_err(|_| EngineError::Disconnected)
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("Engine shutdown failed: {}", e);
        }
    }
}
