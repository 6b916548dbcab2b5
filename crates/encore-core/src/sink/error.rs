//! Sink error types

use thiserror::Error;

/// Errors raised while opening or driving an output device
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("No default audio output device")]
    NoDevice,

    #[error("Failed to build output stream: {0}")]
    StreamBuild(String),

    #[error("Failed to start output stream: {0}")]
    StreamPlay(String),

    #[error("Unsupported output format: {sample_rate}Hz, {channels} channels")]
    UnsupportedFormat { sample_rate: u32, channels: u16 },

    #[error("Output thread is gone")]
    ThreadGone,
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;
