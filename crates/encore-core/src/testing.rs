//! Recording test doubles shared by the unit and scenario tests

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::hub::AudioSocket;
use crate::provider::{EffectProvider, MusicProvider, ProviderCallback, ProviderError, ProviderResult};
use crate::types::{AudioFormat, ProviderId, TrackRef};

/// Route `log` output through the test harness (`RUST_LOG=debug cargo test`)
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Play(TrackRef),
    Pause,
    Resume,
    Seek(u64),
    Prefetch(TrackRef),
    Register,
    Unregister,
    Socket(String),
}

/// Source provider that records every call and lets tests emit callbacks
pub struct RecordingProvider {
    id: ProviderId,
    calls: Mutex<Vec<ProviderCall>>,
    callback: Mutex<Option<Arc<dyn ProviderCallback>>>,
    socket: Mutex<Option<AudioSocket>>,
    library: Mutex<Vec<TrackRef>>,
    failing: AtomicBool,
    prefetch_delay_ms: AtomicU64,
}

impl RecordingProvider {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: ProviderId::new(id),
            calls: Mutex::new(Vec::new()),
            callback: Mutex::new(None),
            socket: Mutex::new(None),
            library: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            prefetch_delay_ms: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> &ProviderId {
        &self.id
    }

    pub fn socket_name(&self) -> Option<String> {
        self.socket.lock().unwrap().as_ref().map(|s| s.name().to_string())
    }

    pub fn socket(&self) -> Option<AudioSocket> {
        self.socket.lock().unwrap().clone()
    }

    pub fn has_callback(&self) -> bool {
        self.callback.lock().unwrap().is_some()
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Tracks passed to `play_track`, in order
    pub fn played(&self) -> Vec<TrackRef> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ProviderCall::Play(track) => Some(track),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &ProviderCall) -> usize {
        self.calls().iter().filter(|c| *c == wanted).count()
    }

    pub fn set_library(&self, tracks: Vec<TrackRef>) {
        *self.library.lock().unwrap() = tracks;
    }

    /// Make every call fail as if the process had died
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn set_prefetch_delay_ms(&self, delay: u64) {
        self.prefetch_delay_ms.store(delay, Ordering::Relaxed);
    }

    pub fn emit_playing(&self) {
        if let Some(cb) = self.current_callback() {
            cb.on_playing(&self.id);
        }
    }

    pub fn emit_paused(&self) {
        if let Some(cb) = self.current_callback() {
            cb.on_paused(&self.id);
        }
    }

    pub fn emit_track_ended(&self) {
        if let Some(cb) = self.current_callback() {
            cb.on_track_ended(&self.id);
        }
    }

    fn current_callback(&self) -> Option<Arc<dyn ProviderCallback>> {
        self.callback.lock().unwrap().clone()
    }

    fn record(&self, call: ProviderCall) -> ProviderResult<()> {
        self.calls.lock().unwrap().push(call);
        if self.failing.load(Ordering::Relaxed) {
            Err(ProviderError::PeerUnavailable(self.id.clone()))
        } else {
            Ok(())
        }
    }
}

impl MusicProvider for RecordingProvider {
    fn play_track(&self, track: &TrackRef) -> ProviderResult<()> {
        self.record(ProviderCall::Play(track.clone()))
    }

    fn pause(&self) -> ProviderResult<()> {
        self.record(ProviderCall::Pause)
    }

    fn resume(&self) -> ProviderResult<()> {
        self.record(ProviderCall::Resume)
    }

    fn seek(&self, position_ms: u64) -> ProviderResult<()> {
        self.record(ProviderCall::Seek(position_ms))
    }

    fn prefetch(&self, track: &TrackRef) -> ProviderResult<()> {
        self.record(ProviderCall::Prefetch(track.clone()))
    }

    fn prefetch_delay_ms(&self) -> ProviderResult<u64> {
        Ok(self.prefetch_delay_ms.load(Ordering::Relaxed))
    }

    fn get_tracks(&self, offset: usize, limit: usize) -> ProviderResult<Vec<TrackRef>> {
        let library = self.library.lock().unwrap();
        Ok(library.iter().skip(offset).take(limit).cloned().collect())
    }

    fn register_callback(&self, callback: Arc<dyn ProviderCallback>) -> ProviderResult<()> {
        self.record(ProviderCall::Register)?;
        *self.callback.lock().unwrap() = Some(callback);
        Ok(())
    }

    fn unregister_callback(&self, _callback: &Arc<dyn ProviderCallback>) -> ProviderResult<()> {
        self.record(ProviderCall::Unregister)?;
        *self.callback.lock().unwrap() = None;
        Ok(())
    }

    fn set_audio_socket(&self, socket: AudioSocket) -> ProviderResult<()> {
        self.record(ProviderCall::Socket(socket.name().to_string()))?;
        *self.socket.lock().unwrap() = Some(socket);
        Ok(())
    }
}

/// Passthrough effect that counts processed blocks
#[derive(Default)]
pub struct RecordingEffect {
    blocks: AtomicU64,
}

impl RecordingEffect {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn blocks(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }
}

impl EffectProvider for RecordingEffect {
    fn process(
        &self,
        input: &[i16],
        output: &mut Vec<i16>,
        _format: AudioFormat,
    ) -> ProviderResult<()> {
        self.blocks.fetch_add(1, Ordering::Relaxed);
        output.extend_from_slice(input);
        Ok(())
    }
}
