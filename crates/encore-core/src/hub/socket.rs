//! Source-side handle onto a hub socket

use std::sync::Weak;

use super::HubShared;
use crate::types::AudioFormat;

/// Sink counters as seen from a provider socket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferInfo {
    pub written_samples: u64,
    pub dropouts: u64,
    /// Free sink space in samples
    pub available: usize,
}

/// Named channel a source provider pushes audio through
///
/// Holds only a weak reference to the hub: a provider keeping its socket
/// around does not keep the graph alive, and writes after the hub or the
/// socket is gone are dropped.
#[derive(Clone)]
pub struct AudioSocket {
    name: String,
    hub: Weak<HubShared>,
}

impl AudioSocket {
    pub(crate) fn new(name: String, hub: Weak<HubShared>) -> Self {
        Self { name, hub }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write one block of interleaved samples
    ///
    /// Returns how many samples were accepted; 0 asks the provider to retry
    /// the block later. An empty block flushes the sink.
    pub fn write(&self, samples: &[i16]) -> usize {
        let Some(hub) = self.hub.upgrade() else {
            return 0;
        };
        if samples.is_empty() {
            hub.flush_from(&self.name);
            return 0;
        }
        hub.route(&self.name, samples)
    }

    /// Announce the format of the following blocks
    pub fn set_format(&self, format: AudioFormat) -> bool {
        match self.hub.upgrade() {
            Some(hub) => hub.set_format_from(&self.name, format),
            None => false,
        }
    }

    pub fn buffer_info(&self) -> BufferInfo {
        self.hub
            .upgrade()
            .map(|hub| hub.buffer_info())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for AudioSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSocket").field("name", &self.name).finish()
    }
}
