//! Connection to a single provider process

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use super::{EffectProvider, MusicProvider, ProviderError, ProviderResult};
use crate::hub::{RoutingHub, SocketKind};
use crate::types::ProviderId;

/// The live RPC surface of a connected provider
#[derive(Clone)]
pub enum Endpoint {
    Source(Arc<dyn MusicProvider>),
    Effect(Arc<dyn EffectProvider>),
}

impl Endpoint {
    pub fn kind(&self) -> SocketKind {
        match self {
            Endpoint::Source(_) => SocketKind::Source,
            Endpoint::Effect(_) => SocketKind::Effect,
        }
    }
}

/// A provider process as seen by the engine
///
/// Tracks whether the process is connected (its endpoint is reachable),
/// whether the engine asked for it to be bound, and the audio socket it was
/// assigned. The socket name is stable while the connection stays up and is
/// cleared when it goes down.
pub struct ProviderConnection {
    id: ProviderId,
    name: String,
    kind: SocketKind,
    endpoint: RwLock<Option<Endpoint>>,
    bound: AtomicBool,
    // Bound state to restore when the process comes back
    rebind: AtomicBool,
    socket: Mutex<Option<String>>,
}

impl ProviderConnection {
    pub fn new(id: ProviderId, name: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            id,
            name: name.into(),
            kind: endpoint.kind(),
            endpoint: RwLock::new(Some(endpoint)),
            bound: AtomicBool::new(false),
            rebind: AtomicBool::new(false),
            socket: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &ProviderId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    pub fn is_effect(&self) -> bool {
        self.kind == SocketKind::Effect
    }

    pub fn is_connected(&self) -> bool {
        self.endpoint.read().map(|e| e.is_some()).unwrap_or(false)
    }

    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Relaxed)
    }

    /// Source RPC handle, or `PeerUnavailable` while disconnected
    pub fn source(&self) -> ProviderResult<Arc<dyn MusicProvider>> {
        match self.endpoint.read().ok().and_then(|e| e.clone()) {
            Some(Endpoint::Source(provider)) => Ok(provider),
            _ => Err(ProviderError::PeerUnavailable(self.id.clone())),
        }
    }

    /// Effect RPC handle, or `PeerUnavailable` while disconnected
    pub fn effect(&self) -> ProviderResult<Arc<dyn EffectProvider>> {
        match self.endpoint.read().ok().and_then(|e| e.clone()) {
            Some(Endpoint::Effect(effect)) => Ok(effect),
            _ => Err(ProviderError::PeerUnavailable(self.id.clone())),
        }
    }

    /// Ask for the provider to be active. Fails while the process is gone.
    pub fn bind(&self) -> ProviderResult<()> {
        if !self.is_connected() {
            return Err(ProviderError::PeerUnavailable(self.id.clone()));
        }
        if !self.bound.swap(true, Ordering::Relaxed) {
            log::debug!("Bound provider {}", self.name);
        }
        Ok(())
    }

    /// Release the provider and its audio socket
    pub fn unbind(&self, hub: &RoutingHub) {
        self.rebind.store(false, Ordering::Relaxed);
        if self.bound.swap(false, Ordering::Relaxed) {
            log::debug!("Unbound provider {}", self.name);
        }
        self.release_socket(hub);
    }

    pub fn socket_name(&self) -> Option<String> {
        self.socket.lock().ok().and_then(|s| s.clone())
    }

    /// Create `name` on the hub and connect this provider to it
    ///
    /// Any previously assigned socket is released first. Fails when the hub
    /// already holds `name` for another connection.
    pub fn create_audio_socket(&self, hub: &RoutingHub, name: &str) -> bool {
        self.release_socket(hub);

        if hub.has_socket(name) {
            log::error!("Socket {} is already taken, not sharing it with {}", name, self.name);
            return false;
        }

        if !hub.create_socket(name, self.kind) {
            return false;
        }

        let attached = match self.kind {
            SocketKind::Source => match (self.source(), hub.socket(name)) {
                (Ok(provider), Some(socket)) => match provider.set_audio_socket(socket) {
                    Ok(()) => true,
                    Err(e) => {
                        log::warn!("Provider {} refused its socket: {}", self.name, e);
                        false
                    }
                },
                (Err(e), _) => {
                    log::warn!("Cannot hand socket to {}: {}", self.name, e);
                    false
                }
                (Ok(_), None) => false,
            },
            SocketKind::Effect => match self.effect() {
                Ok(effect) => hub.attach_effect(name, effect),
                Err(e) => {
                    log::warn!("Cannot attach effect {}: {}", self.name, e);
                    false
                }
            },
        };

        if !attached {
            hub.release_socket(name);
            return false;
        }

        if let Ok(mut socket) = self.socket.lock() {
            *socket = Some(name.to_string());
        }
        true
    }

    /// Tear down the assigned socket, if any
    pub fn release_socket(&self, hub: &RoutingHub) {
        let previous = self.socket.lock().ok().and_then(|mut s| s.take());
        if let Some(previous) = previous {
            hub.release_socket(&previous);
        }
    }

    /// The process went away
    pub(crate) fn mark_disconnected(&self) {
        if let Ok(mut endpoint) = self.endpoint.write() {
            *endpoint = None;
        }
        let was_bound = self.bound.swap(false, Ordering::Relaxed);
        self.rebind.fetch_or(was_bound, Ordering::Relaxed);
    }

    /// The process is back with a fresh endpoint
    ///
    /// Bound again only if it was bound when it went away.
    pub(crate) fn mark_connected(&self, endpoint: Endpoint) -> bool {
        if endpoint.kind() != self.kind {
            log::error!(
                "Provider {} reconnected as {:?}, expected {:?}",
                self.name,
                endpoint.kind(),
                self.kind
            );
            return false;
        }
        if let Ok(mut slot) = self.endpoint.write() {
            *slot = Some(endpoint);
        }
        self.bound
            .store(self.rebind.swap(false, Ordering::Relaxed), Ordering::Relaxed);
        true
    }
}

static SOCKET_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Give `connection` a socket unless it already has one
///
/// Names follow `<prefix>_<provider id>_<sequence>`, the sequence being
/// process-wide so no two assignments share a name. A failed creation
/// is logged and leaves the connection without a socket until the next
/// connection event retries.
pub fn assign_audio_socket(
    connection: &ProviderConnection,
    hub: &RoutingHub,
    prefix: &str,
) -> Option<String> {
    if let Some(existing) = connection.socket_name() {
        return Some(existing);
    }

    let sequence = SOCKET_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let provider: String = connection
        .id()
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let name = format!("{}_{}_{}", prefix, provider, sequence);

    if connection.create_audio_socket(hub, &name) {
        log::info!("Provider {} connected on socket {}", connection.name(), name);
        Some(name)
    } else {
        log::warn!("Error while creating audio socket for {}", connection.name());
        None
    }
}
