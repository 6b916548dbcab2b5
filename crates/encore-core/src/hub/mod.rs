//! Audio routing hub
//!
//! Owns the signal graph between provider sockets, the effect chain and the
//! output sink:
//!
//! ```text
//! source socket ──► effect₁ ──► effect₂ ──► … ──► sink
//!                                                  │
//!                                                  ├──► frame observers (monitoring)
//!                                                  └──► frames-written listener (elapsed time)
//! ```
//!
//! Sources push blocks through their [`AudioSocket`]; the block is processed
//! on the calling thread, so audio never touches the engine command worker.
//! Control operations (chain changes, ducking, sink swaps) take the graph lock
//! briefly between blocks.

mod socket;

pub use socket::{AudioSocket, BufferInfo};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::provider::EffectProvider;
use crate::sink::AudioSink;
use crate::types::AudioFormat;

/// What a socket is connected to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Audio source provider pushing decoded frames
    Source,
    /// Effect stage in the DSP chain
    Effect,
}

/// Passive listener receiving a copy of everything written to the sink
pub trait FrameObserver: Send + Sync {
    fn on_frames(&self, samples: &[i16], format: AudioFormat);
}

/// Receives the number of samples accepted by the sink after every block
pub trait FramesWrittenListener: Send + Sync {
    fn on_frames_written(&self, samples: usize, format: AudioFormat);
}

struct SocketEntry {
    kind: SocketKind,
    effect: Option<Arc<dyn EffectProvider>>,
}

struct RoutingGraph {
    sockets: HashMap<String, SocketEntry>,
    chain: Vec<String>,
    sink: Option<Arc<dyn AudioSink>>,
    format: AudioFormat,
    // Ping-pong buffers for effect stages (reused across blocks)
    stage_in: Vec<i16>,
    stage_out: Vec<i16>,
}

pub(crate) struct HubShared {
    graph: Mutex<RoutingGraph>,
    observers: RwLock<Vec<Arc<dyn FrameObserver>>>,
    frames_listener: RwLock<Option<Arc<dyn FramesWrittenListener>>>,
    ducking: AtomicBool,
    duck_volume: f32,
}

/// Handle to the routing graph; clones share the same graph
#[derive(Clone)]
pub struct RoutingHub {
    shared: Arc<HubShared>,
}

impl RoutingHub {
    pub fn new(format: AudioFormat, duck_volume: f32) -> Self {
        Self {
            shared: Arc::new(HubShared {
                graph: Mutex::new(RoutingGraph {
                    sockets: HashMap::new(),
                    chain: Vec::new(),
                    sink: None,
                    format,
                    stage_in: Vec::new(),
                    stage_out: Vec::new(),
                }),
                observers: RwLock::new(Vec::new()),
                frames_listener: RwLock::new(None),
                ducking: AtomicBool::new(false),
                duck_volume,
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sockets
    // ─────────────────────────────────────────────────────────────────────────

    /// Allocate a named endpoint
    ///
    /// Idempotent per name: creating an existing socket of the same kind
    /// succeeds without touching it. Fails for empty names and for names
    /// already taken by the other kind.
    pub fn create_socket(&self, name: &str, kind: SocketKind) -> bool {
        if name.is_empty() {
            log::error!("RoutingHub: refusing to create a socket with an empty name");
            return false;
        }
        let mut graph = self.shared.lock_graph();
        if let Some(existing) = graph.sockets.get(name) {
            if existing.kind != kind {
                log::error!(
                    "RoutingHub: socket {} already exists as {:?}",
                    name,
                    existing.kind
                );
                return false;
            }
            return true;
        }
        graph.sockets.insert(
            name.to_string(),
            SocketEntry { kind, effect: None },
        );
        log::debug!("RoutingHub: created {:?} socket {}", kind, name);
        true
    }

    /// Tear down an endpoint and unlink it from the chain
    pub fn release_socket(&self, name: &str) -> bool {
        let mut graph = self.shared.lock_graph();
        let removed = graph.sockets.remove(name).is_some();
        graph.chain.retain(|entry| entry != name);
        if removed {
            log::debug!("RoutingHub: released socket {}", name);
        }
        removed
    }

    /// Handle a source provider writes through
    pub fn socket(&self, name: &str) -> Option<AudioSocket> {
        let graph = self.shared.lock_graph();
        match graph.sockets.get(name) {
            Some(entry) if entry.kind == SocketKind::Source => {
                Some(AudioSocket::new(name.to_string(), Arc::downgrade(&self.shared)))
            }
            _ => None,
        }
    }

    /// Connect an effect process to its socket
    pub fn attach_effect(&self, name: &str, effect: Arc<dyn EffectProvider>) -> bool {
        let mut graph = self.shared.lock_graph();
        let format = graph.format;
        match graph.sockets.get_mut(name) {
            Some(entry) if entry.kind == SocketKind::Effect => {
                if let Err(e) = effect.on_format_changed(format) {
                    log::warn!("RoutingHub: effect on {} rejected format: {}", name, e);
                }
                entry.effect = Some(effect);
                true
            }
            _ => {
                log::error!("RoutingHub: no effect socket named {}", name);
                false
            }
        }
    }

    pub fn has_socket(&self, name: &str) -> bool {
        self.shared.lock_graph().sockets.contains_key(name)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Signal path
    // ─────────────────────────────────────────────────────────────────────────

    /// Reprogram the effect chain, front to back
    ///
    /// Names that are not effect sockets are skipped with an error.
    pub fn set_chain(&self, sockets: &[String]) {
        let mut graph = self.shared.lock_graph();
        let mut chain = Vec::with_capacity(sockets.len());
        for name in sockets {
            match graph.sockets.get(name) {
                Some(entry) if entry.kind == SocketKind::Effect => {
                    if !chain.contains(name) {
                        chain.push(name.clone());
                    }
                }
                _ => log::error!("RoutingHub: {} is not an effect socket, skipping", name),
            }
        }
        log::info!("RoutingHub: chain set to {:?}", chain);
        graph.chain = chain;
    }

    pub fn chain(&self) -> Vec<String> {
        self.shared.lock_graph().chain.clone()
    }

    /// Attach the output sink, configured with the current format
    pub fn set_sink(&self, sink: Arc<dyn AudioSink>) {
        let mut graph = self.shared.lock_graph();
        if !sink.setup(graph.format) {
            log::error!(
                "RoutingHub: sink rejected {}Hz/{}ch",
                graph.format.sample_rate,
                graph.format.channels
            );
        }
        sink.set_volume(self.shared.output_volume());
        graph.sink = Some(sink);
    }

    /// Detach and return the output sink
    pub fn take_sink(&self) -> Option<Arc<dyn AudioSink>> {
        self.shared.lock_graph().sink.take()
    }

    pub fn sink(&self) -> Option<Arc<dyn AudioSink>> {
        self.shared.lock_graph().sink.clone()
    }

    /// Attenuate the output without touching the chain
    pub fn set_ducking(&self, ducking: bool) {
        self.shared.ducking.store(ducking, Ordering::Relaxed);
        let sink = self.sink();
        if let Some(sink) = sink {
            sink.set_volume(self.shared.output_volume());
        }
    }

    pub fn is_ducking(&self) -> bool {
        self.shared.ducking.load(Ordering::Relaxed)
    }

    pub fn format(&self) -> AudioFormat {
        self.shared.lock_graph().format
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Side channels
    // ─────────────────────────────────────────────────────────────────────────

    pub fn add_observer(&self, observer: Arc<dyn FrameObserver>) {
        if let Ok(mut observers) = self.shared.observers.write() {
            observers.push(observer);
        }
    }

    pub fn remove_observer(&self, observer: &Arc<dyn FrameObserver>) {
        if let Ok(mut observers) = self.shared.observers.write() {
            observers.retain(|o| !Arc::ptr_eq(o, observer));
        }
    }

    pub fn set_frames_listener(&self, listener: Option<Arc<dyn FramesWrittenListener>>) {
        if let Ok(mut slot) = self.shared.frames_listener.write() {
            *slot = listener;
        }
    }
}

impl HubShared {
    fn lock_graph(&self) -> MutexGuard<'_, RoutingGraph> {
        match self.graph.lock() {
            Ok(graph) => graph,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn output_volume(&self) -> f32 {
        if self.ducking.load(Ordering::Relaxed) {
            self.duck_volume
        } else {
            1.0
        }
    }

    /// Push one block from a source socket through the chain into the sink
    ///
    /// Returns the number of samples the sink accepted. Zero means the caller
    /// should retry the same block later.
    fn route(&self, socket: &str, samples: &[i16]) -> usize {
        let mut graph = self.lock_graph();
        let RoutingGraph {
            sockets,
            chain,
            sink,
            format,
            stage_in,
            stage_out,
        } = &mut *graph;

        match sockets.get(socket) {
            Some(entry) if entry.kind == SocketKind::Source => {}
            _ => return 0,
        }
        let Some(sink) = sink.as_ref() else {
            return 0;
        };

        // Back-pressure: never run effects on audio the sink cannot take
        if sink.available() < samples.len() {
            return 0;
        }

        stage_in.clear();
        stage_in.extend_from_slice(samples);
        for name in chain.iter() {
            let Some(effect) = sockets.get(name).and_then(|entry| entry.effect.as_ref()) else {
                continue;
            };
            stage_out.clear();
            match effect.process(stage_in, stage_out, *format) {
                // Written counts are reported in source samples, so stages keep the length
                Ok(()) if stage_out.len() == stage_in.len() => std::mem::swap(stage_in, stage_out),
                Ok(()) => log::warn!(
                    "RoutingHub: effect {} returned {} samples for {}, bypassing",
                    name,
                    stage_out.len(),
                    stage_in.len()
                ),
                Err(e) => {
                    // Forward the unprocessed block to the next stage
                    log::warn!("RoutingHub: effect {} failed, bypassing: {}", name, e);
                }
            }
        }

        let written = sink.write(stage_in);
        let format = *format;
        let block = &stage_in[..written];

        if let Ok(observers) = self.observers.read() {
            for observer in observers.iter() {
                observer.on_frames(block, format);
            }
        }
        if let Ok(listener) = self.frames_listener.read() {
            if let Some(listener) = listener.as_ref() {
                listener.on_frames_written(written, format);
            }
        }

        written
    }

    /// Zero-length write from a source: drop what the sink still buffers
    fn flush_from(&self, socket: &str) {
        let graph = self.lock_graph();
        if !graph.sockets.contains_key(socket) {
            return;
        }
        if let Some(sink) = graph.sink.as_ref() {
            sink.flush();
        }
    }

    fn set_format_from(&self, socket: &str, format: AudioFormat) -> bool {
        let mut graph = self.lock_graph();
        if !graph.sockets.contains_key(socket) {
            return false;
        }
        if graph.format == format {
            return true;
        }

        log::info!(
            "RoutingHub: {} switched format to {}Hz/{}ch",
            socket,
            format.sample_rate,
            format.channels
        );
        graph.format = format;

        let mut ok = true;
        if let Some(sink) = graph.sink.as_ref() {
            ok = sink.setup(format);
            if !ok {
                log::error!("RoutingHub: sink rejected new format");
            }
        }
        for name in graph.chain.iter() {
            if let Some(effect) = graph.sockets.get(name).and_then(|e| e.effect.as_ref()) {
                if let Err(e) = effect.on_format_changed(format) {
                    log::warn!("RoutingHub: effect {} rejected format: {}", name, e);
                }
            }
        }
        ok
    }

    fn buffer_info(&self) -> BufferInfo {
        let graph = self.lock_graph();
        match graph.sink.as_ref() {
            Some(sink) => BufferInfo {
                written_samples: sink.written_samples(),
                dropouts: sink.dropouts(),
                available: sink.available(),
            },
            None => BufferInfo::default(),
        }
    }
}
