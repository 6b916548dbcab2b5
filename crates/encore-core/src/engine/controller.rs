//! Playback state machine, run on the engine worker thread
//!
//! The controller owns every piece of mutable playback state that is not
//! shared through [`EngineShared`]. It is only ever touched from the worker,
//! so flags like `is_resuming` need no synchronization.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender};
use rand::rngs::StdRng;
use rand::Rng;

use super::command::{EngineCommand, TimerEvent};
use super::focus::{AudioFocus, FocusChange};
use super::{EngineShared, REPEAT_KEY, SHUFFLE_KEY};
use crate::prefetch::PrefetchScheduler;
use crate::provider::{assign_audio_socket, MusicProvider, ProviderCallback, ProviderError};
use crate::queue::PlaybackQueue;
use crate::scheduler::{TaskHandle, TaskScheduler};
use crate::types::{PlaybackState, ProviderId, TrackInfo, TrackRef};

pub(crate) fn lock_queue(queue: &Mutex<PlaybackQueue>) -> MutexGuard<'_, PlaybackQueue> {
    match queue.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A one-shot timer armed by the controller
struct ArmedTimer {
    ticket: u64,
    handle: TaskHandle,
}

/// Where the cursor goes after the current entry
enum Advance {
    To(usize),
    EndOfQueue,
}

pub(crate) struct Controller {
    shared: Arc<EngineShared>,
    focus: Box<dyn AudioFocus>,
    scheduler: Arc<dyn TaskScheduler>,
    prefetch: PrefetchScheduler,
    rng: StdRng,
    command_tx: Sender<EngineCommand>,
    callback: Arc<dyn ProviderCallback>,

    /// Provider of the track most recently started
    current_provider: Option<ProviderId>,
    grace_stop: Option<ArmedTimer>,
    recovery: Option<ArmedTimer>,
    next_ticket: u64,

    /// Next "playing" callback is a resume, keep the position
    is_resuming: bool,
    /// Stop requested, ignore late "paused" callbacks
    is_stopping: bool,
    /// Drop buffered audio once the new track confirms
    should_flush: bool,
    /// The provider was asked to play the current track
    track_loaded: bool,
    /// Start deferred until the current track's metadata arrives
    wait_loading: bool,
    paused_by_focus: bool,
}

impl Controller {
    pub fn new(
        shared: Arc<EngineShared>,
        focus: Box<dyn AudioFocus>,
        scheduler: Arc<dyn TaskScheduler>,
        rng: StdRng,
        command_tx: Sender<EngineCommand>,
        callback: Arc<dyn ProviderCallback>,
    ) -> Self {
        Self {
            prefetch: PrefetchScheduler::new(Arc::clone(&scheduler)),
            shared,
            focus,
            scheduler,
            rng,
            command_tx,
            callback,
            current_provider: None,
            grace_stop: None,
            recovery: None,
            next_ticket: 0,
            is_resuming: false,
            is_stopping: false,
            should_flush: false,
            track_loaded: false,
            wait_loading: false,
            paused_by_focus: false,
        }
    }

    /// Worker loop
    pub fn run(mut self, command_rx: Receiver<EngineCommand>) {
        log::info!("Playback engine started");

        while let Ok(command) = command_rx.recv() {
            match command {
                EngineCommand::Sync { reply } => {
                    // Wait behind anything queued meanwhile, follow-ups included
                    if command_rx.is_empty() || self.shared.is_shutting_down() {
                        let _ = reply.send(());
                    } else if let Err(e) = self.command_tx.send(EngineCommand::Sync { reply }) {
                        if let EngineCommand::Sync { reply } = e.into_inner() {
                            let _ = reply.send(());
                        }
                    }
                }
                EngineCommand::Shutdown { reply } => {
                    self.shutdown();
                    let _ = reply.send(());
                    break;
                }
                command if self.shared.is_shutting_down() => {
                    log::debug!("Discarding {} during shutdown", command.name());
                }
                command => {
                    self.shared.diagnostics.record_command();
                    self.handle(command);
                }
            }
        }

        log::info!("Playback engine stopped");
    }

    fn handle(&mut self, command: EngineCommand) {
        log::trace!("Handling {}", command.name());
        match command {
            EngineCommand::PlaySong(track) => self.replace_queue(vec![Some(track)]),
            EngineCommand::PlayAlbum(album) => {
                let entries = self.resolve_all(&album.track_ids, &album.provider);
                self.replace_queue(entries);
            }
            EngineCommand::PlayPlaylist(playlist) => {
                let entries = self.resolve_all(&playlist.track_ids, &playlist.provider);
                self.replace_queue(entries);
            }
            EngineCommand::QueueSong { track, top } => self.enqueue(vec![Some(track)], top),
            EngineCommand::QueueAlbum { album, top } => {
                let entries = self.resolve_all(&album.track_ids, &album.provider);
                self.enqueue(entries, top);
            }
            EngineCommand::QueuePlaylist { playlist, top } => {
                let entries = self.resolve_all(&playlist.track_ids, &playlist.provider);
                self.enqueue(entries, top);
            }
            EngineCommand::PlayNext(track) => self.play_next(track),
            EngineCommand::RemoveFromQueue(index) => self.remove_from_queue(index),
            EngineCommand::ClearQueue => self.clear_queue(),

            EngineCommand::PlayAtIndex(index) => self.play_at_index(index),
            EngineCommand::Play => self.play(),
            EngineCommand::Pause => self.pause(true),
            EngineCommand::TogglePlayPause => match self.state() {
                PlaybackState::Stopped | PlaybackState::Paused | PlaybackState::Pausing => {
                    self.play()
                }
                _ => self.pause(true),
            },
            EngineCommand::Stop => self.stop(),
            EngineCommand::Next => self.next(),
            EngineCommand::Previous => self.previous(),
            EngineCommand::Seek(position_ms) => self.seek(position_ms),
            EngineCommand::SetRepeat(repeat) => self.set_flag(REPEAT_KEY, repeat),
            EngineCommand::SetShuffle(shuffle) => self.set_flag(SHUFFLE_KEY, shuffle),

            EngineCommand::StartPlayback => {
                self.shared.clear_start_pending();
                self.start_playing_queue();
            }
            EngineCommand::QueueChanged => {
                self.shared.clear_queue_change_pending();
                self.on_queue_changed();
            }
            EngineCommand::Timer(event) => self.on_timer(event),

            EngineCommand::ProviderPlaying(provider) => self.on_playing(&provider),
            EngineCommand::ProviderPaused(provider) => self.on_paused(&provider),
            EngineCommand::ProviderTrackEnded(provider) => self.on_track_ended(&provider),
            EngineCommand::ProviderConnected(provider) => self.on_provider_connected(&provider),
            EngineCommand::ProviderDisconnected(provider) => {
                self.on_provider_disconnected(&provider)
            }
            EngineCommand::FocusChanged(change) => self.on_focus_change(change),
            EngineCommand::AudioBecomingNoisy => {
                log::info!("Audio output becoming noisy, stopping");
                self.stop();
            }
            EngineCommand::TracksUpdated(tracks) => self.on_tracks_updated(&tracks),

            // Handled by the run loop
            EngineCommand::Sync { .. } | EngineCommand::Shutdown { .. } => {}
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn state(&self) -> PlaybackState {
        self.shared.atomics.state()
    }

    fn set_state(&self, state: PlaybackState) {
        let previous = self.shared.atomics.state();
        if previous != state {
            log::debug!("Playback state {:?} -> {:?}", previous, state);
            self.shared.atomics.set_state(state);
        }
    }

    /// Publish the queue cursor for lock-free readers
    fn publish_cursor(&self, queue: &PlaybackQueue) {
        self.shared.atomics.set_current_index(queue.current_index());
    }

    fn current_track(&self) -> Option<TrackRef> {
        lock_queue(&self.shared.queue).current_track().cloned()
    }

    fn track_info(&self, track: &TrackRef) -> Option<TrackInfo> {
        self.shared.catalog.track_info(track)
    }

    fn source_for(&self, provider: &ProviderId) -> Option<Arc<dyn MusicProvider>> {
        let connection = self.shared.registry.provider(provider)?;
        match connection.source() {
            Ok(source) => Some(source),
            Err(e) => {
                log::warn!("{}", e);
                None
            }
        }
    }

    fn provider_failed(&self, action: &str, error: ProviderError) {
        self.shared.diagnostics.record_provider_error();
        log::error!("Provider call {} failed: {}", action, error);
    }

    fn request_start(&self) {
        if self.shared.mark_start_pending() {
            let _ = self.command_tx.send(EngineCommand::StartPlayback);
        }
    }

    fn notify_queue_changed(&self) {
        if self.shared.mark_queue_change_pending() {
            let _ = self.command_tx.send(EngineCommand::QueueChanged);
        }
    }

    fn request_focus(&mut self) {
        if !self.focus.request() {
            log::warn!("Audio focus request denied, playing anyway");
        }
    }

    /// Silence the sink right away; the buffered audio is dropped once the
    /// next track confirms it is playing
    fn cut_current_audio(&mut self) {
        if let Some(sink) = self.shared.hub.sink() {
            sink.set_paused(true);
        }
        self.should_flush = true;
    }

    fn save_queue(&self) {
        let snapshot = lock_queue(&self.shared.queue).clone();
        if let Err(e) = snapshot.save(self.shared.store.as_ref()) {
            log::error!("Cannot persist playback queue: {}", e);
        }
    }

    fn arm_timer(&mut self, delay: Duration, event: impl FnOnce(u64) -> TimerEvent) -> ArmedTimer {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let command = EngineCommand::Timer(event(ticket));
        let tx = self.command_tx.clone();
        let handle = self.scheduler.schedule(
            delay,
            Box::new(move || {
                let _ = tx.send(command);
            }),
        );
        ArmedTimer { ticket, handle }
    }

    fn cancel_grace_stop(&mut self) {
        if let Some(timer) = self.grace_stop.take() {
            log::debug!("Cancelled end of queue stop");
            timer.handle.cancel();
        }
    }

    fn cancel_recovery(&mut self) {
        if let Some(timer) = self.recovery.take() {
            timer.handle.cancel();
        }
    }

    fn resolve_all(&self, track_ids: &[String], provider: &ProviderId) -> Vec<Option<TrackRef>> {
        track_ids
            .iter()
            .map(|id| {
                let resolved = self.shared.catalog.resolve(id, provider);
                if resolved.is_none() {
                    log::warn!("Track {} of {} cannot be resolved, queued as missing", id, provider);
                }
                resolved
            })
            .collect()
    }

    /// An entry the engine can hand to a provider
    fn is_playable(&self, entry: Option<&TrackRef>) -> bool {
        match entry {
            None => false,
            Some(track) => match self.track_info(track) {
                Some(info) if info.is_loaded() => info.is_available(),
                // Unknown or still loading: try it and wait for metadata
                _ => true,
            },
        }
    }

    /// Cursor after `from`: random in shuffle mode, sequential otherwise,
    /// wrapping when repeat is on
    fn advance_from(&mut self, from: usize, len: usize) -> Advance {
        if self.shared.atomics.is_shuffle() && len > 1 {
            loop {
                let candidate = self.rng.random_range(0..len);
                if candidate != from {
                    return Advance::To(candidate);
                }
            }
        }
        if from + 1 < len {
            Advance::To(from + 1)
        } else if self.shared.atomics.is_repeat() && len > 0 {
            Advance::To(0)
        } else {
            Advance::EndOfQueue
        }
    }

    fn abort_to_stopped(&mut self, reason: &str) {
        log::error!("Playback aborted: {}", reason);
        self.prefetch.cancel();
        self.cancel_grace_stop();
        self.track_loaded = false;
        self.set_state(PlaybackState::Stopped);
        self.shared.observers.notify(|o| o.on_playback_pause());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queue commands
    // ─────────────────────────────────────────────────────────────────────────

    fn replace_queue(&mut self, entries: Vec<Option<TrackRef>>) {
        if entries.is_empty() {
            log::warn!("Nothing to play");
            return;
        }
        {
            let shared = Arc::clone(&self.shared);
            let mut queue = lock_queue(&shared.queue);
            queue.clear();
            queue.add_all(entries, false);
            queue.set_current(Some(0));
            self.publish_cursor(&queue);
        }
        self.cut_current_audio();
        self.notify_queue_changed();
        self.request_start();
    }

    fn enqueue(&mut self, entries: Vec<Option<TrackRef>>, top: bool) {
        if entries.is_empty() {
            return;
        }
        let count = entries.len();
        {
            let mut queue = lock_queue(&self.shared.queue);
            queue.add_all(entries, top);
            self.publish_cursor(&queue);
        }
        log::debug!("Queued {} tracks{}", count, if top { " at the top" } else { "" });
        self.notify_queue_changed();
    }

    fn play_next(&mut self, track: TrackRef) {
        {
            let mut queue = lock_queue(&self.shared.queue);
            let index = queue.current_index().map(|i| i + 1).unwrap_or(0);
            queue.insert(index, Some(track));
            self.publish_cursor(&queue);
        }
        self.notify_queue_changed();
    }

    fn remove_from_queue(&mut self, index: usize) {
        let (was_current, now_empty) = {
            let mut queue = lock_queue(&self.shared.queue);
            let was_current = queue.current_index() == Some(index);
            if queue.remove(index).is_none() {
                log::warn!("No queue entry at {}", index);
                return;
            }
            self.publish_cursor(&queue);
            (was_current, queue.is_empty())
        };
        self.notify_queue_changed();

        if was_current {
            if now_empty {
                self.stop();
            } else if self.state().is_active() {
                self.cut_current_audio();
                self.request_start();
            } else {
                self.track_loaded = false;
            }
        }
    }

    fn clear_queue(&mut self) {
        self.stop();
        {
            let mut queue = lock_queue(&self.shared.queue);
            queue.clear();
            self.publish_cursor(&queue);
        }
        self.current_provider = None;
        self.notify_queue_changed();
    }

    fn on_queue_changed(&mut self) {
        self.shared.observers.notify(|o| o.on_playback_queue_changed());
        self.save_queue();
        self.refresh_prefetch();
    }

    fn set_flag(&mut self, key: &str, value: bool) {
        let atomic = if key == REPEAT_KEY {
            &self.shared.atomics.repeat
        } else {
            &self.shared.atomics.shuffle
        };
        atomic.store(value, std::sync::atomic::Ordering::Relaxed);
        log::info!("{} set to {}", key, value);
        if let Err(e) = self.shared.store.put_bool(key, value) {
            log::error!("Cannot persist {}: {}", key, e);
        }
        self.refresh_prefetch();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────────────────

    /// Start the track at the cursor
    ///
    /// Entries that are missing or unavailable are skipped in playback
    /// order, at most once per queue entry.
    fn start_playing_queue(&mut self) {
        self.cancel_grace_stop();

        if self.shared.take_expired_sleep_timer() {
            log::info!("Sleep timer expired, stopping instead of starting");
            self.stop();
            return;
        }

        let shared = Arc::clone(&self.shared);
        let mut skipped = 0;
        let track = loop {
            let (index, entry, len) = {
                let mut queue = lock_queue(&shared.queue);
                if queue.is_empty() {
                    log::debug!("Queue is empty, nothing to start");
                    return;
                }
                if queue.current_index().is_none() {
                    queue.set_current(Some(0));
                }
                let index = queue.current_index().unwrap_or(0);
                self.publish_cursor(&queue);
                (index, queue.get(index).cloned(), queue.len())
            };

            if self.is_playable(entry.as_ref()) {
                if let Some(track) = entry {
                    break track;
                }
            }

            skipped += 1;
            self.shared.diagnostics.record_skip();
            log::info!("Skipping unavailable queue entry {}", index);

            let target = match self.advance_from(index, len) {
                Advance::To(target) if skipped < len => target,
                _ => {
                    log::info!("No playable track left in the queue");
                    self.stop();
                    return;
                }
            };
            let mut queue = lock_queue(&shared.queue);
            queue.set_current(Some(target));
            self.publish_cursor(&queue);
        };

        if let Some(previous) = self.current_provider.take() {
            if previous != track.provider {
                log::debug!("Switching provider {} -> {}", previous, track.provider);
                if let Some(source) = self.source_for(&previous) {
                    if let Err(e) = source.pause() {
                        log::debug!("Pausing previous provider {} failed: {}", previous, e);
                    }
                }
            }
        }

        if matches!(
            self.state(),
            PlaybackState::Paused | PlaybackState::Pausing | PlaybackState::Stopped
        ) {
            if let Some(sink) = self.shared.hub.sink() {
                sink.flush();
            }
        }

        self.current_provider = Some(track.provider.clone());
        self.prefetch.cancel();
        self.track_loaded = false;
        self.is_resuming = false;

        let Some(source) = self.source_for(&track.provider) else {
            log::error!("No provider {} connected for {}", track.provider, track);
            self.set_state(PlaybackState::Stopped);
            return;
        };

        let loaded = self.track_info(&track).is_some_and(|info| info.is_loaded());
        self.set_state(PlaybackState::Buffering);
        self.shared.observers.notify(|o| o.on_song_started(true, &track));

        if !loaded {
            log::debug!("Waiting for metadata of {}", track);
            self.wait_loading = true;
            return;
        }
        self.wait_loading = false;

        self.request_focus();
        log::info!("Playing {}", track);
        if let Err(e) = source.play_track(&track) {
            self.provider_failed("play_track", e);
        }
        self.track_loaded = true;
        self.is_stopping = false;
    }

    fn play(&mut self) {
        let state = self.state();
        if state.is_active() {
            log::debug!("Already {:?}", state);
            return;
        }

        let current = self.current_track();
        match current {
            Some(track)
                if self.track_loaded
                    && matches!(state, PlaybackState::Paused | PlaybackState::Pausing) =>
            {
                if let Some(sink) = self.shared.hub.sink() {
                    sink.set_paused(false);
                }
                self.is_resuming = true;
                self.set_state(PlaybackState::Buffering);
                self.shared.observers.notify(|o| o.on_song_started(true, &track));
                self.request_focus();
                match self.source_for(&track.provider) {
                    Some(source) => {
                        if let Err(e) = source.resume() {
                            self.provider_failed("resume", e);
                        }
                    }
                    None => log::error!("Cannot resume {}: provider gone", track),
                }
            }
            _ => self.request_start(),
        }
    }

    /// Pause playback
    ///
    /// `user` pauses also give up audio focus and forget a focus-loss pause.
    fn pause(&mut self, user: bool) {
        let state = self.state();
        if matches!(
            state,
            PlaybackState::Paused | PlaybackState::Pausing | PlaybackState::Stopped
        ) {
            log::debug!("Pause ignored while {:?}", state);
            return;
        }

        self.set_state(PlaybackState::Pausing);
        if let Some(provider) = self.current_provider.clone() {
            if let Some(source) = self.source_for(&provider) {
                if let Err(e) = source.pause() {
                    self.provider_failed("pause", e);
                }
            }
        }
        if let Some(sink) = self.shared.hub.sink() {
            sink.set_paused(true);
        }

        // A buffering provider may never confirm the pause
        if state == PlaybackState::Buffering {
            self.set_state(PlaybackState::Paused);
            self.shared.observers.notify(|o| o.on_playback_pause());
        }

        if user {
            self.paused_by_focus = false;
            self.focus.abandon();
        }
    }

    fn stop(&mut self) {
        let was = self.state();
        if was.is_active() {
            self.pause(false);
        }
        self.focus.abandon();
        self.paused_by_focus = false;
        if was != PlaybackState::Stopped {
            self.shared.observers.notify(|o| o.on_playback_pause());
        }

        self.set_state(PlaybackState::Stopped);
        self.is_stopping = true;
        self.is_resuming = false;
        self.track_loaded = false;
        self.wait_loading = false;
        self.prefetch.cancel();
        self.cancel_grace_stop();
        self.cancel_recovery();
    }

    fn next(&mut self) {
        let (current, len) = {
            let queue = lock_queue(&self.shared.queue);
            (queue.current_index(), queue.len())
        };
        if len == 0 {
            return;
        }
        let Some(current) = current else {
            self.play_at_index(0);
            return;
        };

        match self.advance_from(current, len) {
            Advance::To(target) => {
                {
                    let mut queue = lock_queue(&self.shared.queue);
                    queue.set_current(Some(target));
                    self.publish_cursor(&queue);
                }
                self.cut_current_audio();
                self.request_start();
            }
            Advance::EndOfQueue => log::debug!("Already at the end of the queue"),
        }
    }

    fn on_track_ended(&mut self, provider: &ProviderId) {
        if self.current_provider.as_ref() != Some(provider) {
            log::debug!("Ignoring track end from inactive provider {}", provider);
            return;
        }

        let (current, len) = {
            let queue = lock_queue(&self.shared.queue);
            (queue.current_index(), queue.len())
        };
        let Some(current) = current else {
            return;
        };

        match self.advance_from(current, len) {
            Advance::To(target) => {
                {
                    let mut queue = lock_queue(&self.shared.queue);
                    queue.set_current(Some(target));
                    self.publish_cursor(&queue);
                }
                // Let the tail of the ended track drain
                self.should_flush = false;
                self.request_start();
            }
            Advance::EndOfQueue => {
                let grace = Duration::from_millis(self.shared.config.end_of_queue_grace_ms);
                log::debug!("End of queue, stopping in {:?}", grace);
                self.cancel_grace_stop();
                let timer = self.arm_timer(grace, |ticket| TimerEvent::EndOfQueueStop { ticket });
                self.grace_stop = Some(timer);
            }
        }
    }

    /// Restart the current track, or step back
    ///
    /// Restarts when past the threshold, or on the first track without
    /// repeat. Stepping back skips unavailable entries and wraps with repeat.
    fn previous(&mut self) {
        let (current, len) = {
            let queue = lock_queue(&self.shared.queue);
            (queue.current_index(), queue.len())
        };
        let Some(current) = current else {
            return;
        };

        let repeat = self.shared.atomics.is_repeat();
        let elapsed = self.shared.atomics.elapsed_ms();
        let restart = elapsed > self.shared.config.restart_threshold_ms || (!repeat && current == 0);

        if restart && self.track_loaded {
            self.restart_current();
            return;
        }

        let mut target = current;
        for _ in 0..len {
            target = match target {
                0 if repeat => len - 1,
                0 => 0,
                t => t - 1,
            };
            let entry = lock_queue(&self.shared.queue).get(target).cloned();
            if self.is_playable(entry.as_ref()) || (target == 0 && !repeat) {
                break;
            }
        }

        {
            let mut queue = lock_queue(&self.shared.queue);
            queue.set_current(Some(target));
            self.publish_cursor(&queue);
        }
        self.cut_current_audio();
        self.request_start();
    }

    fn restart_current(&mut self) {
        let Some(track) = self.current_track() else {
            return;
        };
        if let Some(sink) = self.shared.hub.sink() {
            sink.flush();
        }
        match self.source_for(&track.provider) {
            Some(source) => match source.seek(0) {
                Ok(()) => {
                    self.shared.atomics.set_elapsed_ms(0);
                    self.shared.observers.notify(|o| o.on_song_scrobble(0));
                }
                Err(e) => self.provider_failed("seek", e),
            },
            None => log::error!("Cannot restart {}: provider gone", track),
        }
    }

    fn play_at_index(&mut self, index: usize) {
        {
            let mut queue = lock_queue(&self.shared.queue);
            if queue.is_empty() {
                log::warn!("Cannot play index {} of an empty queue", index);
                return;
            }
            queue.set_current(Some(index));
            self.publish_cursor(&queue);
        }
        self.cut_current_audio();
        self.request_start();
    }

    fn seek(&mut self, position_ms: u64) {
        let Some(track) = self.current_track() else {
            log::debug!("Seek without a current track");
            return;
        };
        if let Some(sink) = self.shared.hub.sink() {
            sink.set_paused(false);
        }
        let Some(source) = self.source_for(&track.provider) else {
            return;
        };
        match source.seek(position_ms) {
            Ok(()) => {
                self.shared.atomics.set_elapsed_ms(position_ms);
                self.shared.observers.notify(|o| o.on_song_scrobble(position_ms));
            }
            Err(e) => self.provider_failed("seek", e),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Provider callbacks
    // ─────────────────────────────────────────────────────────────────────────

    fn on_playing(&mut self, provider: &ProviderId) {
        if self.current_provider.as_ref() != Some(provider) {
            log::debug!("Ignoring playing from inactive provider {}", provider);
            return;
        }
        match self.state() {
            PlaybackState::Stopped => {
                log::debug!("Ignoring playing from {} while stopped", provider);
                return;
            }
            PlaybackState::Paused | PlaybackState::Pausing => {
                // Paused while buffering; hold the provider where it is
                log::debug!("Provider {} started after a pause", provider);
                if let Some(source) = self.source_for(provider) {
                    if let Err(e) = source.pause() {
                        self.provider_failed("pause", e);
                    }
                }
                return;
            }
            _ => {}
        }

        let resuming = std::mem::take(&mut self.is_resuming);
        if let Some(sink) = self.shared.hub.sink() {
            if !resuming && self.should_flush {
                sink.flush();
            }
            sink.set_paused(false);
        }
        if !resuming {
            self.shared.atomics.set_elapsed_ms(0);
            self.should_flush = false;
        }

        let Some(track) = self.current_track() else {
            self.abort_to_stopped("provider playing without a current track");
            return;
        };

        self.set_state(PlaybackState::Playing);
        if resuming {
            self.shared.observers.notify(|o| o.on_playback_resume());
        } else {
            self.shared.observers.notify(|o| o.on_song_started(false, &track));
        }

        self.schedule_prefetch(&track);
        self.save_queue();
    }

    fn on_paused(&mut self, provider: &ProviderId) {
        if self.current_provider.as_ref() != Some(provider) || self.is_stopping {
            log::debug!("Ignoring paused from {}", provider);
            return;
        }
        if matches!(self.state(), PlaybackState::Paused | PlaybackState::Stopped) {
            return;
        }
        self.set_state(PlaybackState::Paused);
        self.shared.observers.notify(|o| o.on_playback_pause());
    }

    fn on_tracks_updated(&mut self, tracks: &[TrackRef]) {
        if !self.wait_loading {
            return;
        }
        let Some(current) = self.current_track() else {
            return;
        };
        let loaded = self.track_info(&current).is_some_and(|info| info.is_loaded());
        if tracks.contains(&current) && loaded {
            log::debug!("Metadata of {} arrived, starting", current);
            self.wait_loading = false;
            self.request_start();
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Prefetch
    // ─────────────────────────────────────────────────────────────────────────

    fn schedule_prefetch(&mut self, current: &TrackRef) {
        if !self.shared.config.prefetch_enabled || self.shared.atomics.is_shuffle() {
            self.prefetch.cancel();
            return;
        }
        let next = lock_queue(&self.shared.queue).next_track().cloned();
        let Some(next) = next else {
            self.prefetch.cancel();
            return;
        };

        let duration = self.track_info(current).map(|i| i.duration_ms).unwrap_or(0);
        let prefetch_delay = match self.source_for(&next.provider) {
            Some(source) => source.prefetch_delay_ms().unwrap_or_else(|e| {
                log::debug!("No prefetch delay from {}: {}", next.provider, e);
                0
            }),
            None => {
                self.prefetch.cancel();
                return;
            }
        };
        let delay = PrefetchScheduler::delay_for(
            duration,
            prefetch_delay,
            self.shared.atomics.elapsed_ms(),
        );

        let tx = self.command_tx.clone();
        self.prefetch.schedule(next, delay, move |ticket| {
            let _ = tx.send(EngineCommand::Timer(TimerEvent::Prefetch { ticket }));
        });
    }

    /// Retarget the pending prefetch after the queue or mode changed
    fn refresh_prefetch(&mut self) {
        if self.state() != PlaybackState::Playing {
            return;
        }
        let (current, next) = {
            let queue = lock_queue(&self.shared.queue);
            (queue.current_track().cloned(), queue.next_track().cloned())
        };
        let pending = self.prefetch.pending().map(|p| p.track.clone());
        let wanted = next.filter(|_| !self.shared.atomics.is_shuffle());
        if pending == wanted {
            return;
        }
        match current {
            Some(current) => self.schedule_prefetch(&current),
            None => self.prefetch.cancel(),
        }
    }

    fn on_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::Prefetch { ticket } => {
                let Some(track) = self.prefetch.take_fired(ticket) else {
                    log::debug!("Stale prefetch {}", ticket);
                    return;
                };
                let next = lock_queue(&self.shared.queue).next_track().cloned();
                if next.as_ref() != Some(&track) {
                    log::debug!("Prefetch target {} is no longer next", track);
                    return;
                }
                if let Some(source) = self.source_for(&track.provider) {
                    log::debug!("Prefetching {}", track);
                    if let Err(e) = source.prefetch(&track) {
                        log::warn!("Prefetch of {} dropped: {}", track, e);
                    }
                }
            }
            TimerEvent::EndOfQueueStop { ticket } => {
                if self.grace_stop.as_ref().map(|t| t.ticket) == Some(ticket) {
                    self.grace_stop = None;
                    log::info!("Reached the end of the queue");
                    self.stop();
                }
            }
            TimerEvent::RecoverPlayback { ticket, provider } => {
                if self.recovery.as_ref().map(|t| t.ticket) == Some(ticket) {
                    self.recovery = None;
                    self.recover_playback(&provider);
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Connections
    // ─────────────────────────────────────────────────────────────────────────

    fn on_provider_connected(&mut self, id: &ProviderId) {
        let Some(connection) = self.shared.registry.get(id) else {
            return;
        };

        if connection.is_effect() {
            if self.shared.dsp.contains(id) {
                self.shared.dsp.refresh();
            }
            return;
        }

        assign_audio_socket(&connection, &self.shared.hub, &self.shared.config.socket_prefix);
        match connection.source() {
            Ok(source) => {
                if let Err(e) = source.register_callback(Arc::clone(&self.callback)) {
                    self.provider_failed("register_callback", e);
                }
            }
            Err(e) => {
                log::warn!("{}", e);
                return;
            }
        }

        let playing_here = self.state().is_active()
            && self.current_track().is_some_and(|t| &t.provider == id);
        if playing_here {
            let delay = Duration::from_millis(self.shared.config.crash_recovery_delay_ms);
            log::warn!("Provider {} came back mid-playback, recovering in {:?}", id, delay);
            self.cancel_recovery();
            let provider = id.clone();
            let timer = self.arm_timer(delay, move |ticket| TimerEvent::RecoverPlayback {
                ticket,
                provider,
            });
            self.recovery = Some(timer);
        }
    }

    fn on_provider_disconnected(&mut self, id: &ProviderId) {
        let Some(connection) = self.shared.registry.get(id) else {
            return;
        };
        log::warn!("Provider {} disconnected", connection.name());
        connection.release_socket(&self.shared.hub);

        if connection.is_effect() && self.shared.dsp.contains(id) {
            self.shared.dsp.refresh();
        }
        if let Err(e) = connection.bind() {
            log::debug!("Awaiting reconnection: {}", e);
        }
    }

    /// Re-issue play and seek to where the crashed provider left off
    fn recover_playback(&mut self, provider: &ProviderId) {
        let Some(track) = self.current_track() else {
            return;
        };
        if &track.provider != provider || !self.state().is_active() {
            log::debug!("Recovery of {} no longer needed", provider);
            return;
        }
        let Some(source) = self.source_for(provider) else {
            return;
        };

        let duration = self.track_info(&track).map(|i| i.duration_ms).unwrap_or(0);
        let mut position = self.shared.atomics.elapsed_ms();
        if duration > 0 && position > duration {
            position = 0;
        }

        log::info!("Recovering {} at {}ms", track, position);
        if let Err(e) = source.play_track(&track) {
            self.provider_failed("play_track", e);
            return;
        }
        if position > 0 {
            if let Err(e) = source.seek(position) {
                self.provider_failed("seek", e);
            }
        }
        self.shared.atomics.set_elapsed_ms(position);
        self.shared.diagnostics.record_recovery();
        self.is_resuming = true;
        self.track_loaded = true;
        self.should_flush = false;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Platform events
    // ─────────────────────────────────────────────────────────────────────────

    fn on_focus_change(&mut self, change: FocusChange) {
        log::debug!("Audio focus {:?}", change);
        match change {
            FocusChange::Gain => {
                self.shared.hub.set_ducking(false);
                if self.paused_by_focus {
                    self.paused_by_focus = false;
                    self.play();
                }
            }
            FocusChange::Loss | FocusChange::LossTransient => {
                if self.state().is_active() {
                    self.pause(false);
                    self.paused_by_focus = true;
                }
            }
            FocusChange::LossTransientCanDuck => self.shared.hub.set_ducking(true),
        }
    }

    fn shutdown(&mut self) {
        log::info!("Playback engine shutting down");

        if self.state().is_active() {
            if let Some(provider) = self.current_provider.clone() {
                if let Some(source) = self.source_for(&provider) {
                    if let Err(e) = source.pause() {
                        log::debug!("Pause on shutdown failed: {}", e);
                    }
                }
            }
        }

        self.save_queue();
        let store = self.shared.store.as_ref();
        for (key, value) in [
            (REPEAT_KEY, self.shared.atomics.is_repeat()),
            (SHUFFLE_KEY, self.shared.atomics.is_shuffle()),
        ] {
            if let Err(e) = store.put_bool(key, value) {
                log::error!("Cannot persist {}: {}", key, e);
            }
        }

        self.prefetch.cancel();
        self.cancel_grace_stop();
        self.cancel_recovery();

        for connection in self.shared.registry.sources() {
            if let Ok(source) = connection.source() {
                if let Err(e) = source.unregister_callback(&self.callback) {
                    log::debug!("Unregister from {} failed: {}", connection.name(), e);
                }
            }
            connection.release_socket(&self.shared.hub);
        }
        for connection in self.shared.registry.dsps() {
            connection.release_socket(&self.shared.hub);
        }

        self.shared.hub.set_frames_listener(None);
        if let Some(sink) = self.shared.hub.take_sink() {
            sink.release();
        }
        self.focus.abandon();
        self.set_state(PlaybackState::Stopped);
    }
}
