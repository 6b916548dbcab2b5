//! Encore Core - playback engine for the Encore music player
//!
//! This crate sequences track playback across out-of-process audio source
//! providers, routes their audio through a chain of effect providers to an
//! output sink, and persists the queue and chain between sessions.
//!
//! - [`engine`]: control surface and the worker-driven state machine
//! - [`queue`]: the persisted playback queue
//! - [`dsp`]: active effect chain management
//! - [`hub`]: audio routing from provider sockets through effects to the sink
//! - [`sink`]: output sinks (in-memory, and a cpal device behind `cpal-sink`)
//! - [`provider`]: provider contracts, connections and the registry

pub mod catalog;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod hub;
pub mod prefetch;
pub mod provider;
pub mod queue;
pub mod scheduler;
pub mod sink;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use types::*;
