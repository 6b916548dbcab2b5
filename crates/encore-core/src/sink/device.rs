//! CPAL device sink
//!
//! ```text
//! ┌──────────────────┐   push()    ┌─────────────────────┐   pop()   ┌──────────────────┐
//! │   Routing hub    │────────────►│  Sample ring buffer │──────────►│ CPAL callback    │
//! │ (provider thread)│             │   (lock-free SPSC)  │           │ (device thread)  │
//! └──────────────────┘             └─────────────────────┘           └──────────────────┘
//!          ▲                                                                  │
//!          │               pause / flush / volume (relaxed atomics)           │
//!          └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The stream lives on its own thread because CPAL streams are not `Send` on
//! every platform. Reformatting rebuilds the stream and swaps in a fresh ring.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, Stream, StreamConfig};
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};

use super::{AudioSink, SinkError, SinkResult};
use crate::types::AudioFormat;

/// State shared with the audio callback
struct DeviceShared {
    paused: AtomicBool,
    flush_requested: AtomicBool,
    /// f32 bits
    volume: AtomicU32,
    dropouts: AtomicU64,
}

enum StreamControl {
    Open {
        format: AudioFormat,
        consumer: rtrb::Consumer<i16>,
        reply: Sender<SinkResult<()>>,
    },
    Shutdown,
}

/// Sink writing to the default output device
pub struct DeviceSink {
    shared: Arc<DeviceShared>,
    producer: Mutex<Option<rtrb::Producer<i16>>>,
    written: AtomicU64,
    buffer_ms: u32,
    control_tx: Sender<StreamControl>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceSink {
    /// Start the output thread
    ///
    /// `buffer_ms` sizes the ring buffer between the hub and the device.
    /// The stream itself is opened by the first [`AudioSink::setup`] call.
    pub fn open(buffer_ms: u32) -> SinkResult<Self> {
        let host = cpal::default_host();
        if host.default_output_device().is_none() {
            return Err(SinkError::NoDevice);
        }

        let shared = Arc::new(DeviceShared {
            paused: AtomicBool::new(false),
            flush_requested: AtomicBool::new(false),
            volume: AtomicU32::new(1.0f32.to_bits()),
            dropouts: AtomicU64::new(0),
        });

        let (control_tx, control_rx) = unbounded();
        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("encore-output".into())
            .spawn(move || run_output_thread(control_rx, thread_shared))
            .map_err(|e| SinkError::StreamBuild(format!("cannot spawn output thread: {}", e)))?;

        Ok(Self {
            shared,
            producer: Mutex::new(None),
            written: AtomicU64::new(0),
            buffer_ms: buffer_ms.max(20),
            control_tx,
            thread: Mutex::new(Some(thread)),
        })
    }
}

fn run_output_thread(control_rx: Receiver<StreamControl>, shared: Arc<DeviceShared>) {
    let mut _stream: Option<Stream> = None;

    while let Ok(control) = control_rx.recv() {
        match control {
            StreamControl::Open {
                format,
                consumer,
                reply,
            } => {
                // Drop the old stream before opening the device again
                _stream = None;
                let result = build_stream(format, consumer, Arc::clone(&shared));
                let outcome = match result {
                    Ok(stream) => {
                        _stream = Some(stream);
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(outcome);
            }
            StreamControl::Shutdown => break,
        }
    }

    log::info!("Output thread stopped");
}

fn build_stream(
    format: AudioFormat,
    mut consumer: rtrb::Consumer<i16>,
    shared: Arc<DeviceShared>,
) -> SinkResult<Stream> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or(SinkError::NoDevice)?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let config = StreamConfig {
        channels: format.channels,
        sample_rate: SampleRate(format.sample_rate),
        buffer_size: BufferSize::Default,
    };

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                if shared.flush_requested.swap(false, Ordering::Relaxed) {
                    while consumer.pop().is_ok() {}
                }

                if shared.paused.load(Ordering::Relaxed) {
                    data.fill(0.0);
                    return;
                }

                let volume = f32::from_bits(shared.volume.load(Ordering::Relaxed));
                let mut popped = 0usize;
                for out in data.iter_mut() {
                    match consumer.pop() {
                        Ok(sample) => {
                            *out = sample as f32 / 32768.0 * volume;
                            popped += 1;
                        }
                        Err(_) => *out = 0.0,
                    }
                }

                // An empty ring is idle, a short one is an underrun
                if popped > 0 && popped < data.len() {
                    shared.dropouts.fetch_add(1, Ordering::Relaxed);
                }
            },
            move |err| {
                log::error!("Output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::StreamConfigNotSupported => SinkError::UnsupportedFormat {
                sample_rate: format.sample_rate,
                channels: format.channels,
            },
            other => SinkError::StreamBuild(other.to_string()),
        })?;

    stream
        .play()
        .map_err(|e| SinkError::StreamPlay(e.to_string()))?;

    log::info!(
        "Output stream open on {}: {}Hz, {} channels",
        device_name,
        format.sample_rate,
        format.channels
    );
    Ok(stream)
}

impl AudioSink for DeviceSink {
    fn setup(&self, format: AudioFormat) -> bool {
        let capacity =
            (format.sample_rate as usize * format.channels as usize * self.buffer_ms as usize)
                / 1000;
        let (producer, consumer) = rtrb::RingBuffer::<i16>::new(capacity.max(1024));
        let (reply_tx, reply_rx) = bounded(1);

        let sent = self.control_tx.send(StreamControl::Open {
            format,
            consumer,
            reply: reply_tx,
        });
        if sent.is_err() {
            log::error!("DeviceSink: {}", SinkError::ThreadGone);
            return false;
        }

        match reply_rx.recv() {
            Ok(Ok(())) => {
                if let Ok(mut slot) = self.producer.lock() {
                    *slot = Some(producer);
                }
                self.written.store(0, Ordering::Relaxed);
                true
            }
            Ok(Err(e)) => {
                log::error!("DeviceSink: setup failed: {}", e);
                false
            }
            Err(_) => {
                log::error!("DeviceSink: {}", SinkError::ThreadGone);
                false
            }
        }
    }

    fn write(&self, samples: &[i16]) -> usize {
        let mut slot = match self.producer.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(producer) = slot.as_mut() else {
            return 0;
        };

        let mut accepted = 0;
        for &sample in samples {
            if producer.push(sample).is_err() {
                break;
            }
            accepted += 1;
        }
        self.written.fetch_add(accepted as u64, Ordering::Relaxed);
        accepted
    }

    fn available(&self) -> usize {
        self.producer
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|p| p.slots()))
            .unwrap_or(0)
    }

    fn flush(&self) {
        self.shared.flush_requested.store(true, Ordering::Relaxed);
        self.written.store(0, Ordering::Relaxed);
        self.shared.dropouts.store(0, Ordering::Relaxed);
    }

    fn set_paused(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::Relaxed);
    }

    fn written_samples(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    fn dropouts(&self) -> u64 {
        self.shared.dropouts.load(Ordering::Relaxed)
    }

    fn set_volume(&self, volume: f32) {
        self.shared
            .volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn release(&self) {
        let _ = self.control_tx.send(StreamControl::Shutdown);
        let handle = self.thread.lock().ok().and_then(|mut t| t.take());
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        if let Ok(mut slot) = self.producer.lock() {
            *slot = None;
        }
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        self.release();
    }
}
