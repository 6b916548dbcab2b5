//! Lookup of known provider connections
//!
//! Replaces a global plugin lookup: the embedder builds one registry, fills
//! it with connections and hands it to the engine. Connection lifecycle
//! events (process up, process died) are reported here and fanned out to
//! listeners.

use std::sync::{Arc, RwLock};

use super::{Endpoint, ProviderConnection};
use crate::hub::SocketKind;
use crate::types::ProviderId;

/// Notified when a provider process comes up or goes away
///
/// Called on the thread reporting the event; implementations should hand
/// the work off rather than block.
pub trait ConnectionListener: Send + Sync {
    fn on_connected(&self, connection: &Arc<ProviderConnection>);
    fn on_disconnected(&self, connection: &Arc<ProviderConnection>);
}

#[derive(Default)]
pub struct ProviderRegistry {
    connections: RwLock<Vec<Arc<ProviderConnection>>>,
    listeners: RwLock<Vec<Arc<dyn ConnectionListener>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection
    ///
    /// Sources are bound right away; effects stay unbound until the DSP
    /// chain asks for them. Replaces any connection with the same id.
    pub fn register(&self, connection: ProviderConnection) -> Arc<ProviderConnection> {
        let connection = Arc::new(connection);
        if connection.kind() == SocketKind::Source {
            if let Err(e) = connection.bind() {
                log::warn!("Cannot bind {}: {}", connection.name(), e);
            }
        }

        if let Ok(mut connections) = self.connections.write() {
            if let Some(pos) = connections.iter().position(|c| c.id() == connection.id()) {
                log::warn!("Replacing provider connection {}", connection.id());
                connections.remove(pos);
            }
            connections.push(Arc::clone(&connection));
        }

        log::info!(
            "Registered {:?} provider {} ({})",
            connection.kind(),
            connection.name(),
            connection.id()
        );
        self.notify(&connection, true);
        connection
    }

    /// Remove a connection for good
    pub fn unregister(&self, id: &ProviderId) -> Option<Arc<ProviderConnection>> {
        let removed = self.connections.write().ok().and_then(|mut connections| {
            let pos = connections.iter().position(|c| c.id() == id)?;
            Some(connections.remove(pos))
        });
        if let Some(connection) = &removed {
            connection.mark_disconnected();
            self.notify(connection, false);
        }
        removed
    }

    /// Report that a provider process died
    pub fn peer_died(&self, id: &ProviderId) {
        if let Some(connection) = self.get(id) {
            log::warn!("Provider {} died", connection.name());
            connection.mark_disconnected();
            self.notify(&connection, false);
        }
    }

    /// Report that a provider process is back
    pub fn reconnect(&self, id: &ProviderId, endpoint: Endpoint) -> bool {
        let Some(connection) = self.get(id) else {
            log::error!("Reconnect for unknown provider {}", id);
            return false;
        };
        if !connection.mark_connected(endpoint) {
            return false;
        }
        log::info!("Provider {} reconnected", connection.name());
        self.notify(&connection, true);
        true
    }

    pub fn get(&self, id: &ProviderId) -> Option<Arc<ProviderConnection>> {
        self.connections
            .read()
            .ok()?
            .iter()
            .find(|c| c.id() == id)
            .cloned()
    }

    /// Source connection for `id`
    pub fn provider(&self, id: &ProviderId) -> Option<Arc<ProviderConnection>> {
        self.get(id).filter(|c| c.kind() == SocketKind::Source)
    }

    /// Effect connection for `id`
    pub fn dsp(&self, id: &ProviderId) -> Option<Arc<ProviderConnection>> {
        self.get(id).filter(|c| c.kind() == SocketKind::Effect)
    }

    /// All connections in registration order
    pub fn connections(&self) -> Vec<Arc<ProviderConnection>> {
        self.connections
            .read()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn sources(&self) -> Vec<Arc<ProviderConnection>> {
        self.of_kind(SocketKind::Source)
    }

    pub fn dsps(&self) -> Vec<Arc<ProviderConnection>> {
        self.of_kind(SocketKind::Effect)
    }

    pub fn add_listener(&self, listener: Arc<dyn ConnectionListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(listener);
        }
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ConnectionListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.retain(|l| !Arc::ptr_eq(l, listener));
        }
    }

    fn of_kind(&self, kind: SocketKind) -> Vec<Arc<ProviderConnection>> {
        self.connections()
            .into_iter()
            .filter(|c| c.kind() == kind)
            .collect()
    }

    fn notify(&self, connection: &Arc<ProviderConnection>, connected: bool) {
        // Listeners run without the registry locks held
        let listeners = self
            .listeners
            .read()
            .map(|l| l.clone())
            .unwrap_or_default();
        for listener in listeners {
            if connected {
                listener.on_connected(connection);
            } else {
                listener.on_disconnected(connection);
            }
        }
    }
}
