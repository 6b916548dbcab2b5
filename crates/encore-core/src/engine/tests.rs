//! Engine scenarios driven through the public control surface
//!
//! Providers are recording doubles and time is a `ManualScheduler`, so every
//! test runs deterministically: send commands, `sync()`, then inspect.

use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::Mutex;

use super::*;
use crate::catalog::MemoryCatalog;
use crate::provider::{Endpoint, ProviderConnection};
use crate::scheduler::ManualScheduler;
use crate::sink::MemorySink;
use crate::store::MemoryStore;
use crate::testing::{ProviderCall, RecordingEffect, RecordingProvider};
use crate::types::{Availability, TrackInfo};

const TRACK_MS: u64 = 180_000;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Started { buffering: bool, track: TrackRef },
    Pause,
    Resume,
    QueueChanged,
    Scrobble(u64),
}

#[derive(Default)]
struct EventLog(Mutex<Vec<Event>>);

impl EventLog {
    fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }
}

impl PlaybackObserver for EventLog {
    fn on_song_started(&self, buffering: bool, track: &TrackRef) {
        self.push(Event::Started {
            buffering,
            track: track.clone(),
        });
    }

    fn on_playback_pause(&self) {
        self.push(Event::Pause);
    }

    fn on_playback_resume(&self) {
        self.push(Event::Resume);
    }

    fn on_playback_queue_changed(&self) {
        self.push(Event::QueueChanged);
    }

    fn on_song_scrobble(&self, elapsed_ms: u64) {
        self.push(Event::Scrobble(elapsed_ms));
    }
}

#[derive(Clone, Default)]
struct CountingFocus {
    requests: Arc<AtomicUsize>,
    abandons: Arc<AtomicUsize>,
}

impl AudioFocus for CountingFocus {
    fn request(&mut self) -> bool {
        self.requests.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn abandon(&mut self) {
        self.abandons.fetch_add(1, Ordering::Relaxed);
    }
}

fn track(i: usize) -> TrackRef {
    TrackRef::new(format!("t{}", i), "local")
}

fn album(count: usize) -> Album {
    Album {
        id: "album".to_string(),
        provider: ProviderId::new("local"),
        track_ids: (0..count).map(|i| format!("t{}", i)).collect(),
    }
}

struct Harness {
    engine: PlaybackEngine,
    provider: Arc<RecordingProvider>,
    registry: Arc<ProviderRegistry>,
    catalog: Arc<MemoryCatalog>,
    sink: Arc<MemorySink>,
    store: Arc<MemoryStore>,
    scheduler: Arc<ManualScheduler>,
    focus: CountingFocus,
    events: Arc<EventLog>,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    fn with_store(store: Arc<MemoryStore>) -> Self {
        crate::testing::init_logging();
        let provider = RecordingProvider::new("local");
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(ProviderConnection::new(
            ProviderId::new("local"),
            "Local",
            Endpoint::Source(provider.clone()),
        ));
        for effect in ["eq", "reverb"] {
            registry.register(ProviderConnection::new(
                ProviderId::new(effect),
                effect,
                Endpoint::Effect(RecordingEffect::new()),
            ));
        }

        let catalog = Arc::new(MemoryCatalog::new());
        for i in 0..10 {
            catalog.insert(track(i), TrackInfo::available(TRACK_MS));
        }

        let sink = Arc::new(MemorySink::new(500_000));
        let scheduler = Arc::new(ManualScheduler::new());
        let focus = CountingFocus::default();
        let engine = EngineBuilder::new(registry.clone(), catalog.clone())
            .store(store.clone())
            .sink(sink.clone())
            .scheduler(scheduler.clone())
            .focus(Box::new(focus.clone()))
            .shuffle_seed(7)
            .build()
            .unwrap();

        let events = Arc::new(EventLog::default());
        engine.add_observer(events.clone());
        engine.sync().unwrap();

        Self {
            engine,
            provider,
            registry,
            catalog,
            sink,
            store,
            scheduler,
            focus,
            events,
        }
    }

    fn sync(&self) {
        self.engine.sync().unwrap();
    }

    /// Queue `count` tracks, start `index` and confirm it from the provider
    fn playing(count: usize, index: usize) -> Self {
        let harness = Self::new();
        harness.engine.queue_album(album(count), false).unwrap();
        harness.engine.play_at_index(index).unwrap();
        harness.sync();
        harness.confirm_playing();
        harness
    }

    fn confirm_playing(&self) {
        self.provider.emit_playing();
        self.sync();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_play_song_on_empty_queue() {
    let h = Harness::new();
    assert_eq!(h.engine.state(), PlaybackState::Stopped);
    assert!(h.provider.has_callback());
    assert!(h.provider.socket_name().is_some());

    h.engine.play_song(track(0)).unwrap();
    h.sync();
    assert_eq!(h.engine.queue().entries(), &[Some(track(0))]);
    assert_eq!(h.engine.current_index(), Some(0));
    assert_eq!(h.engine.state(), PlaybackState::Buffering);
    assert_eq!(h.provider.played(), vec![track(0)]);

    h.confirm_playing();
    assert_eq!(h.engine.state(), PlaybackState::Playing);

    let events = h.events.events();
    assert!(events.contains(&Event::Started { buffering: true, track: track(0) }));
    assert_eq!(
        events.last(),
        Some(&Event::Started { buffering: false, track: track(0) })
    );
}

#[test]
fn test_queue_album_then_play_at_index() {
    let h = Harness::new();
    h.engine.queue_album(album(10), false).unwrap();
    h.engine.play_at_index(5).unwrap();
    h.sync();

    assert_eq!(h.engine.queue().len(), 10);
    assert_eq!(h.provider.played(), vec![track(5)]);
    assert_eq!(h.engine.current_index(), Some(5));
}

#[test]
fn test_play_at_index_clamps() {
    let h = Harness::new();
    h.engine.queue_album(album(3), false).unwrap();
    h.engine.play_at_index(99).unwrap();
    h.sync();
    assert_eq!(h.provider.played(), vec![track(2)]);
}

#[test]
fn test_chain_survives_restart() {
    let store = Arc::new(MemoryStore::new());
    let chain = vec![ProviderId::new("reverb"), ProviderId::new("eq")];
    {
        let h = Harness::with_store(store.clone());
        h.engine.set_active_chain(&chain);
        assert_eq!(h.engine.active_chain(), chain);
        assert_eq!(h.engine.hub().chain().len(), 2);
        h.engine.shutdown().unwrap();
    }

    let h = Harness::with_store(store);
    assert_eq!(h.engine.active_chain(), chain);
    assert_eq!(h.engine.hub().chain().len(), 2);
}

#[test]
fn test_reconnect_resumes_at_last_position() {
    let h = Harness::playing(3, 0);

    // One second of stereo audio reaches the sink
    let socket = h.provider.socket().unwrap();
    assert_eq!(socket.write(&vec![0i16; 88_200]), 88_200);
    assert_eq!(h.engine.position_ms(), 1000);
    let first_socket = h.provider.socket_name().unwrap();

    let id = ProviderId::new("local");
    h.registry.peer_died(&id);
    h.sync();
    assert!(!h.engine.hub().has_socket(&first_socket));
    assert_eq!(h.engine.state(), PlaybackState::Playing);

    let restarted = RecordingProvider::new("local");
    assert!(h.registry.reconnect(&id, Endpoint::Source(restarted.clone())));
    h.sync();
    assert!(restarted.has_callback());
    assert!(restarted.socket_name().is_some());
    assert!(restarted.played().is_empty());

    // Nothing happens before the settle delay
    h.scheduler.advance(Duration::from_millis(1999));
    h.sync();
    assert!(restarted.played().is_empty());

    h.scheduler.advance(Duration::from_millis(1));
    h.sync();
    let calls = restarted.calls();
    let play = calls.iter().position(|c| *c == ProviderCall::Play(track(0))).unwrap();
    let seek = calls.iter().position(|c| *c == ProviderCall::Seek(1000)).unwrap();
    assert!(play < seek);
    assert_eq!(h.engine.diagnostics().recoveries, 1);

    // The confirmation is a resume, position kept
    restarted.emit_playing();
    h.sync();
    assert_eq!(h.engine.state(), PlaybackState::Playing);
    assert_eq!(h.engine.position_ms(), 1000);
    assert_eq!(h.events.events().last(), Some(&Event::Resume));
}

#[test]
fn test_previous_on_first_track_restarts() {
    let h = Harness::playing(3, 0);
    h.provider.clear_calls();

    h.engine.previous().unwrap();
    h.sync();
    assert_eq!(h.provider.calls(), vec![ProviderCall::Seek(0)]);
    assert_eq!(h.engine.current_index(), Some(0));
    assert_eq!(h.engine.position_ms(), 0);
}

#[test]
fn test_previous_steps_back_early_and_restarts_late() {
    let h = Harness::playing(3, 2);

    h.engine.previous().unwrap();
    h.sync();
    assert_eq!(h.engine.current_index(), Some(1));
    assert_eq!(h.provider.played().last(), Some(&track(1)));
    h.confirm_playing();

    h.provider.clear_calls();
    h.engine.atomics().set_elapsed_ms(5000);
    h.engine.previous().unwrap();
    h.sync();
    assert_eq!(h.provider.calls(), vec![ProviderCall::Seek(0)]);
    assert_eq!(h.engine.current_index(), Some(1));
}

#[test]
fn test_previous_skips_unavailable_and_wraps_with_repeat() {
    let h = Harness::playing(4, 1);
    h.catalog.set_availability(&track(0), Availability::Unavailable);
    h.engine.set_repeat(true).unwrap();

    h.engine.previous().unwrap();
    h.sync();
    assert_eq!(h.engine.current_index(), Some(3));
    assert_eq!(h.provider.played().last(), Some(&track(3)));
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_pause_is_idempotent() {
    let h = Harness::playing(2, 0);

    h.engine.pause().unwrap();
    h.sync();
    assert_eq!(h.engine.state(), PlaybackState::Pausing);
    assert!(h.sink.is_paused());

    h.engine.pause().unwrap();
    h.sync();
    assert_eq!(h.provider.count(&ProviderCall::Pause), 1);
    assert_eq!(h.engine.state(), PlaybackState::Pausing);

    h.provider.emit_paused();
    h.sync();
    assert_eq!(h.engine.state(), PlaybackState::Paused);

    h.engine.pause().unwrap();
    h.sync();
    assert_eq!(h.provider.count(&ProviderCall::Pause), 1);
    assert_eq!(h.engine.state(), PlaybackState::Paused);
}

#[test]
fn test_pause_while_buffering_is_immediate() {
    let h = Harness::new();
    h.engine.play_song(track(0)).unwrap();
    h.sync();
    assert_eq!(h.engine.state(), PlaybackState::Buffering);

    h.engine.pause().unwrap();
    h.sync();
    assert_eq!(h.engine.state(), PlaybackState::Paused);
    assert_eq!(h.events.events().last(), Some(&Event::Pause));

    // A late confirmation does not override the pause
    h.provider.emit_playing();
    h.sync();
    assert_eq!(h.engine.state(), PlaybackState::Paused);
}

#[test]
fn test_resume_after_pause() {
    let h = Harness::playing(2, 0);
    h.engine.pause().unwrap();
    h.provider.emit_paused();
    h.sync();
    h.engine.atomics().set_elapsed_ms(12_000);

    h.engine.play().unwrap();
    h.sync();
    assert_eq!(h.provider.count(&ProviderCall::Resume), 1);
    assert_eq!(h.engine.state(), PlaybackState::Buffering);
    assert!(!h.sink.is_paused());

    h.confirm_playing();
    assert_eq!(h.engine.state(), PlaybackState::Playing);
    assert_eq!(h.engine.position_ms(), 12_000);
    assert_eq!(h.events.events().last(), Some(&Event::Resume));
    assert_eq!(h.provider.played(), vec![track(0)]);
}

#[test]
fn test_toggle_play_pause() {
    let h = Harness::playing(2, 0);
    h.engine.toggle_play_pause().unwrap();
    h.sync();
    assert_eq!(h.engine.state(), PlaybackState::Pausing);

    h.engine.toggle_play_pause().unwrap();
    h.sync();
    assert_eq!(h.engine.state(), PlaybackState::Buffering);
    assert_eq!(h.provider.count(&ProviderCall::Resume), 1);
}

#[test]
fn test_stop_then_play_restarts_track() {
    let h = Harness::playing(2, 1);
    h.engine.stop().unwrap();
    h.sync();
    assert_eq!(h.engine.state(), PlaybackState::Stopped);
    assert_eq!(h.events.events().last(), Some(&Event::Pause));

    h.engine.play().unwrap();
    h.sync();
    assert_eq!(h.provider.played(), vec![track(1), track(1)]);
    assert_eq!(h.engine.state(), PlaybackState::Buffering);
}

#[test]
fn test_next_advances_and_stops_at_end() {
    let h = Harness::playing(2, 0);
    h.engine.next().unwrap();
    h.sync();
    assert_eq!(h.provider.played(), vec![track(0), track(1)]);
    assert!(h.sink.is_paused());

    h.confirm_playing();
    assert!(!h.sink.is_paused());

    // User next at the end without repeat is a no-op
    h.engine.next().unwrap();
    h.sync();
    assert_eq!(h.provider.played().len(), 2);
    assert_eq!(h.engine.state(), PlaybackState::Playing);
}

#[test]
fn test_next_wraps_with_repeat() {
    let h = Harness::playing(2, 1);
    h.engine.set_repeat(true).unwrap();
    h.engine.next().unwrap();
    h.sync();
    assert_eq!(h.engine.current_index(), Some(0));
    assert_eq!(h.provider.played().last(), Some(&track(0)));
}

#[test]
fn test_shuffle_never_repeats_immediately() {
    let h = Harness::playing(5, 0);
    h.engine.set_shuffle(true).unwrap();

    for _ in 0..50 {
        let before = h.engine.current_index();
        h.engine.next().unwrap();
        h.sync();
        assert_ne!(h.engine.current_index(), before);
    }
}

#[test]
fn test_unavailable_tracks_are_skipped() {
    let h = Harness::playing(4, 0);
    h.catalog.set_availability(&track(1), Availability::Unavailable);
    h.catalog.set_availability(&track(2), Availability::Unavailable);

    h.engine.next().unwrap();
    h.sync();
    assert_eq!(h.engine.current_index(), Some(3));
    assert_eq!(h.provider.played(), vec![track(0), track(3)]);
    assert_eq!(h.engine.diagnostics().skipped_tracks, 2);
}

#[test]
fn test_unresolvable_album_entries_are_skipped() {
    let h = Harness::new();
    h.engine
        .play_album(Album {
            id: "mixed".to_string(),
            provider: ProviderId::new("local"),
            track_ids: vec!["missing".to_string(), "t4".to_string()],
        })
        .unwrap();
    h.sync();
    assert_eq!(h.engine.queue().entries(), &[None, Some(track(4))]);
    assert_eq!(h.provider.played(), vec![track(4)]);
    assert_eq!(h.engine.current_index(), Some(1));
}

#[test]
fn test_nothing_playable_stops() {
    let h = Harness::new();
    h.catalog.set_availability(&track(0), Availability::Unavailable);
    h.catalog.set_availability(&track(1), Availability::Unavailable);
    h.engine.queue_album(album(2), false).unwrap();
    h.engine.play_at_index(0).unwrap();
    h.sync();
    assert!(h.provider.played().is_empty());
    assert_eq!(h.engine.state(), PlaybackState::Stopped);
}

#[test]
fn test_seek_reports_only_on_success() {
    let h = Harness::playing(1, 0);
    h.engine.seek(30_000).unwrap();
    h.sync();
    assert_eq!(h.engine.position_ms(), 30_000);
    assert_eq!(h.events.events().last(), Some(&Event::Scrobble(30_000)));

    h.provider.set_failing(true);
    h.engine.seek(60_000).unwrap();
    h.sync();
    assert_eq!(h.engine.position_ms(), 30_000);
    assert_eq!(h.events.events().last(), Some(&Event::Scrobble(30_000)));
    assert!(h.engine.diagnostics().provider_errors >= 1);
}

#[test]
fn test_track_end_advances_without_cutting_audio() {
    let h = Harness::playing(2, 0);
    h.provider.emit_track_ended();
    h.sync();
    assert_eq!(h.provider.played(), vec![track(0), track(1)]);
    assert!(!h.sink.is_paused());
}

#[test]
fn test_end_of_queue_stops_after_grace() {
    let h = Harness::playing(1, 0);
    h.provider.emit_track_ended();
    h.sync();
    assert_eq!(h.engine.state(), PlaybackState::Playing);
    assert_eq!(h.scheduler.pending_delays(), vec![Duration::from_millis(2000)]);

    h.scheduler.advance(Duration::from_millis(2000));
    h.sync();
    assert_eq!(h.engine.state(), PlaybackState::Stopped);
}

#[test]
fn test_new_start_cancels_grace_stop() {
    let h = Harness::playing(1, 0);
    h.provider.emit_track_ended();
    h.sync();

    h.engine.play_song(track(3)).unwrap();
    h.sync();
    h.scheduler.advance(Duration::from_millis(5000));
    h.sync();
    assert_eq!(h.engine.state(), PlaybackState::Buffering);
}

#[test]
fn test_stale_callbacks_are_ignored() {
    let h = Harness::playing(2, 0);
    let other = RecordingProvider::new("other");
    h.registry.register(ProviderConnection::new(
        ProviderId::new("other"),
        "Other",
        Endpoint::Source(other.clone()),
    ));
    h.sync();

    other.emit_track_ended();
    other.emit_paused();
    h.sync();
    assert_eq!(h.engine.state(), PlaybackState::Playing);
    assert_eq!(h.engine.current_index(), Some(0));
}

#[test]
fn test_provider_switch_pauses_previous() {
    let h = Harness::new();
    let remote = RecordingProvider::new("remote");
    h.registry.register(ProviderConnection::new(
        ProviderId::new("remote"),
        "Remote",
        Endpoint::Source(remote.clone()),
    ));
    let remote_track = TrackRef::new("r1", "remote");
    h.catalog.insert(remote_track.clone(), TrackInfo::available(TRACK_MS));

    h.engine.play_song(track(0)).unwrap();
    h.engine.queue_song(remote_track.clone(), false).unwrap();
    h.sync();
    h.confirm_playing();

    h.engine.next().unwrap();
    h.sync();
    assert_eq!(h.provider.count(&ProviderCall::Pause), 1);
    assert_eq!(remote.played(), vec![remote_track]);
}

#[test]
fn test_missing_provider_abandons_start() {
    let h = Harness::new();
    let ghost = TrackRef::new("g1", "ghost");
    h.catalog.insert(ghost.clone(), TrackInfo::available(TRACK_MS));
    h.engine.play_song(ghost).unwrap();
    h.sync();
    assert_eq!(h.engine.state(), PlaybackState::Stopped);
    assert!(h.provider.played().is_empty());
}

#[test]
fn test_start_waits_for_metadata() {
    let h = Harness::new();
    let pending = TrackRef::new("late", "local");
    h.catalog.insert(
        pending.clone(),
        TrackInfo {
            duration_ms: 0,
            availability: Availability::Loading,
        },
    );

    h.engine.play_song(pending.clone()).unwrap();
    h.sync();
    assert_eq!(h.engine.state(), PlaybackState::Buffering);
    assert!(h.provider.played().is_empty());

    h.catalog.insert(pending.clone(), TrackInfo::available(TRACK_MS));
    h.engine.on_tracks_updated(vec![pending.clone()]).unwrap();
    h.sync();
    assert_eq!(h.provider.played(), vec![pending]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Prefetch
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_single_pending_prefetch() {
    let h = Harness::new();
    h.provider.set_prefetch_delay_ms(10_000);
    h.engine.queue_album(album(5), false).unwrap();

    for i in 0..4 {
        h.engine.play_at_index(i).unwrap();
        h.sync();
        h.confirm_playing();
        assert!(h.scheduler.pending_count() <= 1);
    }
    assert!(h.scheduler.scheduled_count() >= 4);
    assert_eq!(
        h.scheduler.pending_delays(),
        vec![Duration::from_millis(TRACK_MS - 10_000)]
    );

    h.scheduler.advance(Duration::from_millis(TRACK_MS));
    h.sync();
    let prefetches: Vec<_> = h
        .provider
        .calls()
        .into_iter()
        .filter(|c| matches!(c, ProviderCall::Prefetch(_)))
        .collect();
    assert_eq!(prefetches, vec![ProviderCall::Prefetch(track(4))]);
}

#[test]
fn test_prefetch_follows_queue_changes() {
    let h = Harness::playing(2, 0);
    h.engine.play_next(track(7)).unwrap();
    h.sync();
    assert_eq!(h.engine.queue().get(1), Some(&track(7)));

    h.scheduler.advance(Duration::from_millis(TRACK_MS));
    h.sync();
    assert_eq!(h.provider.count(&ProviderCall::Prefetch(track(7))), 1);
    assert_eq!(h.provider.count(&ProviderCall::Prefetch(track(1))), 0);
}

#[test]
fn test_prefetch_cancelled_by_stop() {
    let h = Harness::playing(2, 0);
    assert_eq!(h.scheduler.pending_count(), 1);
    h.engine.stop().unwrap();
    h.sync();
    assert_eq!(h.scheduler.pending_count(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue, persistence
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_queue_top_and_play_next() {
    let h = Harness::playing(2, 1);
    h.engine.queue_song(track(5), true).unwrap();
    h.engine.play_next(track(6)).unwrap();
    h.sync();

    let queue = h.engine.queue();
    let ids: Vec<_> = queue.entries().iter().flatten().map(|t| t.track_id.clone()).collect();
    assert_eq!(ids, vec!["t5", "t0", "t1", "t6"]);
    assert_eq!(h.engine.current_track(), Some(track(1)));
    assert_eq!(h.engine.current_index(), Some(2));
    assert!(h.events.events().contains(&Event::QueueChanged));
}

/// Holds the worker inside the first queue-changed notification
struct QueueGate {
    entered: crossbeam::channel::Sender<()>,
    release: crossbeam::channel::Receiver<()>,
    armed: AtomicBool,
}

impl PlaybackObserver for QueueGate {
    fn on_playback_queue_changed(&self) {
        if self.armed.swap(false, Ordering::Relaxed) {
            let _ = self.entered.send(());
            let _ = self.release.recv();
        }
    }
}

#[test]
fn test_queue_changes_are_coalesced() {
    let h = Harness::new();
    let (entered_tx, entered_rx) = crossbeam::channel::unbounded();
    let (release_tx, release_rx) = crossbeam::channel::unbounded();
    h.engine.add_observer(Arc::new(QueueGate {
        entered: entered_tx,
        release: release_rx,
        armed: AtomicBool::new(true),
    }));

    h.engine.queue_song(track(0), false).unwrap();
    entered_rx.recv().unwrap();

    // The whole burst is queued while the worker is parked
    for i in 1..5 {
        h.engine.queue_song(track(i), false).unwrap();
    }
    release_tx.send(()).unwrap();
    h.sync();

    let changes = h
        .events
        .events()
        .iter()
        .filter(|e| **e == Event::QueueChanged)
        .count();
    assert_eq!(changes, 2);
    assert_eq!(h.engine.queue().len(), 5);
}

#[test]
fn test_remove_current_moves_on() {
    let h = Harness::playing(3, 1);
    h.engine.remove_from_queue(0).unwrap();
    h.sync();
    assert_eq!(h.engine.current_track(), Some(track(1)));
    assert_eq!(h.provider.played().len(), 1);

    h.engine.remove_from_queue(0).unwrap();
    h.sync();
    assert_eq!(h.engine.current_track(), Some(track(2)));
    assert_eq!(h.provider.played().last(), Some(&track(2)));
}

#[test]
fn test_clear_queue_stops() {
    let h = Harness::playing(3, 1);
    h.engine.clear_queue().unwrap();
    h.sync();
    assert_eq!(h.engine.state(), PlaybackState::Stopped);
    assert!(h.engine.queue().is_empty());
    assert_eq!(h.engine.current_index(), None);
}

#[test]
fn test_queue_and_flags_survive_restart() {
    let store = Arc::new(MemoryStore::new());
    {
        let h = Harness::with_store(store.clone());
        h.engine.queue_album(album(4), false).unwrap();
        h.engine.play_at_index(2).unwrap();
        h.engine.set_repeat(true).unwrap();
        h.sync();
        h.confirm_playing();
        assert_eq!(h.store.get_bool(REPEAT_KEY), Some(true));
        h.engine.shutdown().unwrap();
    }

    let h = Harness::with_store(store);
    assert_eq!(h.engine.queue().len(), 4);
    assert_eq!(h.engine.current_index(), Some(2));
    assert!(h.engine.is_repeat());
    assert!(!h.engine.is_shuffle());
    assert_eq!(h.engine.state(), PlaybackState::Stopped);
}

// ─────────────────────────────────────────────────────────────────────────────
// Platform events
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_sleep_timer_stops_next_start() {
    let h = Harness::new();
    h.engine.set_sleep_timer(Some(Instant::now()));
    assert!(h.engine.sleep_timer().is_some());

    h.engine.play_song(track(0)).unwrap();
    h.sync();
    assert!(h.provider.played().is_empty());
    assert_eq!(h.engine.state(), PlaybackState::Stopped);
    assert_eq!(h.engine.sleep_timer(), None);

    // Cleared once it fired
    h.engine.play().unwrap();
    h.sync();
    assert_eq!(h.provider.played(), vec![track(0)]);
}

#[test]
fn test_future_sleep_timer_does_not_stop() {
    let h = Harness::new();
    h.engine.set_sleep_timer_in(Duration::from_secs(3600));
    h.engine.play_song(track(0)).unwrap();
    h.sync();
    assert_eq!(h.provider.played(), vec![track(0)]);
    assert!(h.engine.sleep_timer().is_some());
}

#[test]
fn test_focus_loss_pauses_and_gain_resumes() {
    let h = Harness::playing(2, 0);
    h.engine.on_focus_change(FocusChange::LossTransient).unwrap();
    h.sync();
    assert_eq!(h.engine.state(), PlaybackState::Pausing);
    h.provider.emit_paused();
    h.sync();

    h.engine.on_focus_change(FocusChange::Gain).unwrap();
    h.sync();
    assert_eq!(h.provider.count(&ProviderCall::Resume), 1);
    assert_eq!(h.engine.state(), PlaybackState::Buffering);
}

#[test]
fn test_gain_does_not_resume_user_pause() {
    let h = Harness::playing(2, 0);
    h.engine.pause().unwrap();
    h.provider.emit_paused();
    h.engine.on_focus_change(FocusChange::Gain).unwrap();
    h.sync();
    assert_eq!(h.provider.count(&ProviderCall::Resume), 0);
    assert_eq!(h.engine.state(), PlaybackState::Paused);
}

#[test]
fn test_duckable_loss_ducks() {
    let h = Harness::playing(1, 0);
    h.engine.on_focus_change(FocusChange::LossTransientCanDuck).unwrap();
    h.sync();
    assert_eq!(h.engine.state(), PlaybackState::Playing);
    assert!(h.engine.hub().is_ducking());
    assert_eq!(h.sink.volume(), 0.5);

    h.engine.on_focus_change(FocusChange::Gain).unwrap();
    h.sync();
    assert!(!h.engine.hub().is_ducking());
    assert_eq!(h.sink.volume(), 1.0);
}

#[test]
fn test_user_pause_abandons_focus() {
    let h = Harness::playing(1, 0);
    let requests = h.focus.requests.load(Ordering::Relaxed);
    assert!(requests >= 1);
    let abandons = h.focus.abandons.load(Ordering::Relaxed);

    h.engine.pause().unwrap();
    h.sync();
    assert_eq!(h.focus.abandons.load(Ordering::Relaxed), abandons + 1);
}

#[test]
fn test_noisy_output_stops() {
    let h = Harness::playing(1, 0);
    h.engine.on_audio_becoming_noisy().unwrap();
    h.sync();
    assert_eq!(h.engine.state(), PlaybackState::Stopped);
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_shutdown_releases_everything() {
    let h = Harness::playing(2, 0);
    let socket = h.provider.socket_name().unwrap();
    h.engine.shutdown().unwrap();

    assert!(h.sink.is_released());
    assert!(!h.provider.has_callback());
    assert!(!h.engine.hub().has_socket(&socket));
    assert!(matches!(h.engine.play(), Err(EngineError::Disconnected)));
    assert!(matches!(h.engine.sync(), Err(EngineError::Disconnected)));

    // Second call is a no-op
    assert!(h.engine.shutdown().is_ok());
}

#[test]
fn test_observer_removal() {
    let h = Harness::new();
    let extra = Arc::new(EventLog::default());
    let id = h.engine.add_observer(extra.clone());
    assert_eq!(h.engine.observer_count(), 2);
    assert!(h.engine.remove_observer(id));
    assert!(!h.engine.remove_observer(id));

    h.engine.play_song(track(0)).unwrap();
    h.sync();
    assert!(extra.events().is_empty());
}
