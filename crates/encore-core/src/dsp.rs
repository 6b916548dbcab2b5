//! DSP chain management
//!
//! Owns the ordered list of active effect providers, persists it, binds and
//! unbinds the matching connections, and pushes the resulting socket list to
//! the routing hub. An entry that cannot be bound is logged and left out of
//! the hub chain; the rest of the chain keeps working.

use std::sync::{Arc, Mutex, RwLock};

use crate::hub::RoutingHub;
use crate::provider::{assign_audio_socket, ProviderRegistry};
use crate::store::SettingsStore;
use crate::types::ProviderId;

pub const DSP_CHAIN_KEY: &str = "dsp_chain";

pub struct DspChainManager {
    registry: Arc<ProviderRegistry>,
    hub: RoutingHub,
    store: Arc<dyn SettingsStore>,
    socket_prefix: String,
    chain: RwLock<Vec<ProviderId>>,
    // Serializes set/restore/update so two callers cannot interleave binds
    ops: Mutex<()>,
}

impl DspChainManager {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        hub: RoutingHub,
        store: Arc<dyn SettingsStore>,
        socket_prefix: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            hub,
            store,
            socket_prefix: socket_prefix.into(),
            chain: RwLock::new(Vec::new()),
            ops: Mutex::new(()),
        }
    }

    /// Currently active chain, front to back
    pub fn active_chain(&self) -> Vec<ProviderId> {
        self.chain.read().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn contains(&self, id: &ProviderId) -> bool {
        self.chain.read().map(|c| c.contains(id)).unwrap_or(false)
    }

    /// Replace the active chain
    ///
    /// Duplicates keep their first position. The chain is persisted in
    /// order, newly listed effects are bound, effects no longer listed are
    /// unbound, and the hub is reprogrammed.
    pub fn set_active_chain(&self, chain: &[ProviderId]) {
        let _guard = self.ops.lock();

        let mut deduped: Vec<ProviderId> = Vec::with_capacity(chain.len());
        for id in chain {
            if deduped.contains(id) {
                log::warn!("DSP {} listed twice, keeping first position", id);
            } else {
                deduped.push(id.clone());
            }
        }

        let serialized: Vec<String> = deduped.iter().map(|id| id.as_str().to_string()).collect();
        if let Err(e) = self.store.put_string_list(DSP_CHAIN_KEY, &serialized) {
            log::error!("Cannot persist DSP chain: {}", e);
        }

        for id in &deduped {
            match self.registry.dsp(id) {
                Some(connection) => {
                    if let Err(e) = connection.bind() {
                        log::error!("Cannot bind DSP {}: {}", id, e);
                    }
                }
                None => log::error!("DSP {} is not installed", id),
            }
        }

        for connection in self.registry.dsps() {
            if !deduped.contains(connection.id()) && connection.is_bound() {
                log::info!("Unbinding DSP {}", connection.name());
                connection.unbind(&self.hub);
            }
        }

        if let Ok(mut current) = self.chain.write() {
            *current = deduped;
        }
        self.push_to_hub();
    }

    /// Reload the persisted chain
    ///
    /// Entries whose connection is no longer installed are dropped.
    pub fn restore_chain(&self) {
        let _guard = self.ops.lock();

        let saved = self
            .store
            .get_string_list(DSP_CHAIN_KEY)
            .unwrap_or_default();

        let mut restored = Vec::with_capacity(saved.len());
        for raw in saved {
            let id = ProviderId::new(raw);
            if restored.contains(&id) {
                continue;
            }
            match self.registry.dsp(&id) {
                Some(connection) => {
                    if let Err(e) = connection.bind() {
                        log::error!("Cannot bind restored DSP {}: {}", id, e);
                    }
                    restored.push(id);
                }
                None => log::error!("Cannot restore DSP {}: not installed", id),
            }
        }

        log::info!("Restored DSP chain {:?}", restored);
        if let Ok(mut current) = self.chain.write() {
            *current = restored;
        }
        self.push_to_hub();
    }

    /// Re-push the socket list after a connection event
    ///
    /// Chain entries that came back since the chain was set are bound now.
    pub fn refresh(&self) {
        let _guard = self.ops.lock();
        for id in self.active_chain() {
            let Some(connection) = self.registry.dsp(&id) else {
                continue;
            };
            if connection.is_connected() && !connection.is_bound() {
                if let Err(e) = connection.bind() {
                    log::error!("Cannot bind DSP {}: {}", id, e);
                }
            }
        }
        self.push_to_hub();
    }

    fn push_to_hub(&self) {
        let chain = self.active_chain();
        let mut sockets = Vec::with_capacity(chain.len());

        for id in &chain {
            let Some(connection) = self.registry.dsp(id) else {
                log::error!("DSP {} in the chain but not connected, skipping", id);
                continue;
            };
            if !connection.is_bound() {
                log::error!("DSP {} could not be bound, skipping", id);
                continue;
            }
            match assign_audio_socket(&connection, &self.hub, &self.socket_prefix) {
                Some(socket) => sockets.push(socket),
                None => log::error!("DSP {} has no audio socket, skipping", id),
            }
        }

        self.hub.set_chain(&sockets);
    }
}
