//! Built-in local file provider
//!
//! Decodes WAV files from the [`LocalLibrary`] on a dedicated thread and
//! pushes interleaved 16-bit blocks through the audio socket the engine
//! assigned. RPC calls only post commands to that thread, so they return
//! immediately the way a well-behaved out-of-process provider would.
//!
//! Back-pressure: when the hub rejects a block (sink full) the decoder keeps
//! it and retries after a short sleep.

use std::fs::File;
use std::io::BufReader;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam::channel::{Receiver, Sender, TryRecvError};
use encore_core::hub::AudioSocket;
use encore_core::provider::{MusicProvider, ProviderCallback, ProviderError, ProviderResult};
use encore_core::{AudioFormat, ProviderId, TrackRef};

use crate::library::{LibraryTrack, LocalLibrary, LOCAL_PROVIDER};

/// Frames decoded per block
const BLOCK_FRAMES: usize = 2048;

/// Wait before retrying a block the hub had no room for
const BACKOFF: Duration = Duration::from_millis(5);

type WavFile = hound::WavReader<BufReader<File>>;

enum DecoderCommand {
    Play(LibraryTrack),
    Prefetch(LibraryTrack),
    Pause,
    Resume,
    Seek(u64),
    Socket(AudioSocket),
    Shutdown,
}

/// Callback slot shared with the decoder thread
#[derive(Default)]
struct CallbackSlot(Mutex<Option<Arc<dyn ProviderCallback>>>);

impl CallbackSlot {
    fn get(&self) -> Option<Arc<dyn ProviderCallback>> {
        self.0.lock().ok().and_then(|slot| slot.clone())
    }

    fn set(&self, callback: Option<Arc<dyn ProviderCallback>>) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = callback;
        }
    }
}

pub struct LocalWavProvider {
    id: ProviderId,
    library: Arc<LocalLibrary>,
    prefetch_delay_ms: u64,
    callback: Arc<CallbackSlot>,
    command_tx: Sender<DecoderCommand>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl LocalWavProvider {
    /// Start the decoder thread
    pub fn spawn(library: Arc<LocalLibrary>, prefetch_delay_ms: u64) -> Result<Arc<Self>> {
        let id = ProviderId::new(LOCAL_PROVIDER);
        let callback = Arc::new(CallbackSlot::default());
        let (command_tx, command_rx) = crossbeam::channel::unbounded();

        let decoder = Decoder {
            id: id.clone(),
            callback: Arc::clone(&callback),
            socket: None,
            current: None,
            prefetched: None,
            paused: false,
            pending: Vec::with_capacity(BLOCK_FRAMES * 2),
        };
        let thread_handle = thread::Builder::new()
            .name("encore-local-decoder".into())
            .spawn(move || decoder.run(command_rx))
            .context("Failed to spawn decoder thread")?;

        Ok(Arc::new(Self {
            id,
            library,
            prefetch_delay_ms,
            callback,
            command_tx,
            thread_handle: Mutex::new(Some(thread_handle)),
        }))
    }

    /// Stop decoding and join the thread. Later calls report the peer gone.
    pub fn shutdown(&self) {
        let handle = self.thread_handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            let _ = self.command_tx.send(DecoderCommand::Shutdown);
            if handle.join().is_err() {
                log::error!("Local decoder thread panicked");
            }
        }
    }

    fn send(&self, command: DecoderCommand) -> ProviderResult<()> {
        self.command_tx
            .send(command)
            .map_err(|_| ProviderError::PeerUnavailable(self.id.clone()))
    }

    fn lookup(&self, track: &TrackRef) -> ProviderResult<LibraryTrack> {
        let found = (track.provider == self.id)
            .then(|| self.library.get(&track.track_id))
            .flatten();
        found.cloned().ok_or_else(|| ProviderError::Rejected {
            provider: self.id.clone(),
            reason: format!("unknown track {}", track),
        })
    }
}

impl Drop for LocalWavProvider {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl MusicProvider for LocalWavProvider {
    fn play_track(&self, track: &TrackRef) -> ProviderResult<()> {
        let entry = self.lookup(track)?;
        self.send(DecoderCommand::Play(entry))
    }

    fn pause(&self) -> ProviderResult<()> {
        self.send(DecoderCommand::Pause)
    }

    fn resume(&self) -> ProviderResult<()> {
        self.send(DecoderCommand::Resume)
    }

    fn seek(&self, position_ms: u64) -> ProviderResult<()> {
        self.send(DecoderCommand::Seek(position_ms))
    }

    fn prefetch(&self, track: &TrackRef) -> ProviderResult<()> {
        let entry = self.lookup(track)?;
        self.send(DecoderCommand::Prefetch(entry))
    }

    fn prefetch_delay_ms(&self) -> ProviderResult<u64> {
        Ok(self.prefetch_delay_ms)
    }

    fn get_tracks(&self, offset: usize, limit: usize) -> ProviderResult<Vec<TrackRef>> {
        Ok(self
            .library
            .tracks()
            .skip(offset)
            .take(limit)
            .map(|t| t.track.clone())
            .collect())
    }

    fn register_callback(&self, callback: Arc<dyn ProviderCallback>) -> ProviderResult<()> {
        self.callback.set(Some(callback));
        Ok(())
    }

    fn unregister_callback(&self, callback: &Arc<dyn ProviderCallback>) -> ProviderResult<()> {
        if self.callback.get().is_some_and(|current| Arc::ptr_eq(&current, callback)) {
            self.callback.set(None);
        }
        Ok(())
    }

    fn set_audio_socket(&self, socket: AudioSocket) -> ProviderResult<()> {
        self.send(DecoderCommand::Socket(socket))
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Decoder thread
// ────────────────────────────────────────────────────────────────────────────────

struct OpenTrack {
    track_id: String,
    reader: WavFile,
    spec: hound::WavSpec,
}

impl OpenTrack {
    fn open(entry: &LibraryTrack) -> Result<Self> {
        let reader = hound::WavReader::open(&entry.path)
            .with_context(|| format!("Failed to open {:?}", entry.path))?;
        let spec = reader.spec();
        Ok(Self {
            track_id: entry.track.track_id.clone(),
            reader,
            spec,
        })
    }

    fn format(&self) -> AudioFormat {
        AudioFormat::new(self.spec.sample_rate, self.spec.channels)
    }

    /// Append up to one block to `out`. Returns false at the end of the file.
    fn read_block(&mut self, out: &mut Vec<i16>) -> Result<bool, hound::Error> {
        let max = BLOCK_FRAMES * self.spec.channels as usize;
        let before = out.len();
        match (self.spec.sample_format, self.spec.bits_per_sample) {
            (hound::SampleFormat::Float, _) => {
                for sample in self.reader.samples::<f32>().take(max) {
                    out.push((sample?.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
                }
            }
            (hound::SampleFormat::Int, bits) if bits <= 16 => {
                for sample in self.reader.samples::<i16>().take(max) {
                    out.push(sample?);
                }
            }
            (hound::SampleFormat::Int, bits) => {
                let shift = bits - 16;
                for sample in self.reader.samples::<i32>().take(max) {
                    out.push((sample? >> shift) as i16);
                }
            }
        }
        Ok(out.len() > before)
    }
}

struct Decoder {
    id: ProviderId,
    callback: Arc<CallbackSlot>,
    socket: Option<AudioSocket>,
    current: Option<OpenTrack>,
    prefetched: Option<OpenTrack>,
    paused: bool,
    /// Decoded samples the hub has not accepted yet
    pending: Vec<i16>,
}

impl Decoder {
    fn run(mut self, command_rx: Receiver<DecoderCommand>) {
        log::info!("Local decoder started");

        loop {
            let command = if self.is_streaming() {
                match command_rx.try_recv() {
                    Ok(command) => Some(command),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                }
            } else {
                match command_rx.recv() {
                    Ok(command) => Some(command),
                    Err(_) => break,
                }
            };

            match command {
                Some(DecoderCommand::Shutdown) => break,
                Some(command) => self.handle(command),
                None => self.pump(),
            }
        }

        log::info!("Local decoder stopped");
    }

    fn is_streaming(&self) -> bool {
        self.current.is_some() && !self.paused && self.socket.is_some()
    }

    fn handle(&mut self, command: DecoderCommand) {
        match command {
            DecoderCommand::Play(entry) => self.play(&entry),
            DecoderCommand::Prefetch(entry) => match OpenTrack::open(&entry) {
                Ok(track) => {
                    log::debug!("Prefetched {}", entry.track);
                    self.prefetched = Some(track);
                }
                Err(e) => log::warn!("Prefetch of {} failed: {:#}", entry.track, e),
            },
            DecoderCommand::Pause => {
                self.paused = true;
                self.emit(|cb, id| cb.on_paused(id));
            }
            DecoderCommand::Resume => {
                if self.current.is_some() {
                    self.paused = false;
                    self.emit(|cb, id| cb.on_playing(id));
                }
            }
            DecoderCommand::Seek(position_ms) => self.seek(position_ms),
            DecoderCommand::Socket(socket) => {
                log::debug!("Writing to socket {}", socket.name());
                if let Some(track) = self.current.as_ref() {
                    socket.set_format(track.format());
                }
                self.socket = Some(socket);
            }
            DecoderCommand::Shutdown => {}
        }
    }

    fn play(&mut self, entry: &LibraryTrack) {
        let prefetched = self
            .prefetched
            .take()
            .filter(|t| t.track_id == entry.track.track_id);
        let opened = match prefetched {
            Some(track) => Ok(track),
            None => OpenTrack::open(entry),
        };

        self.pending.clear();
        match opened {
            Ok(track) => {
                if let Some(socket) = self.socket.as_ref() {
                    socket.set_format(track.format());
                }
                log::info!("Decoding {:?}", entry.path);
                self.current = Some(track);
                self.paused = false;
                self.emit(|cb, id| cb.on_playing(id));
            }
            Err(e) => {
                log::error!("Cannot play {}: {:#}", entry.track, e);
                self.current = None;
                self.emit(|cb, id| cb.on_track_ended(id));
            }
        }
    }

    fn seek(&mut self, position_ms: u64) {
        let Some(track) = self.current.as_mut() else {
            return;
        };
        let frames = track.reader.duration() as u64;
        let target = (position_ms * track.spec.sample_rate as u64 / 1000).min(frames);
        if let Err(e) = track.reader.seek(target as u32) {
            log::error!("Seek to {}ms failed: {}", position_ms, e);
            return;
        }
        self.pending.clear();
        // Zero-length write drops what the sink still buffers
        if let Some(socket) = self.socket.as_ref() {
            socket.write(&[]);
        }
    }

    /// Decode and push one block
    fn pump(&mut self) {
        if self.pending.is_empty() {
            let Some(track) = self.current.as_mut() else {
                return;
            };
            match track.read_block(&mut self.pending) {
                Ok(true) => {}
                Ok(false) => {
                    self.finish_track();
                    return;
                }
                Err(e) => {
                    log::error!("Decoding {} failed: {}", track.track_id, e);
                    self.finish_track();
                    return;
                }
            }
        }

        let Some(socket) = self.socket.as_ref() else {
            return;
        };
        let written = socket.write(&self.pending);
        if written == 0 {
            thread::sleep(BACKOFF);
        } else {
            self.pending.drain(..written.min(self.pending.len()));
        }
    }

    fn finish_track(&mut self) {
        if let Some(track) = self.current.take() {
            log::debug!("Finished {}", track.track_id);
        }
        self.pending.clear();
        self.emit(|cb, id| cb.on_track_ended(id));
    }

    fn emit(&self, f: impl FnOnce(&dyn ProviderCallback, &ProviderId)) {
        if let Some(callback) = self.callback.get() {
            f(callback.as_ref(), &self.id);
        }
    }
}
