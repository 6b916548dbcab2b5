//! Track metadata lookup
//!
//! The engine never owns metadata. It resolves serialized references and asks
//! for durations and availability through [`TrackCatalog`], which an embedder
//! backs with its cache or aggregator.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::types::{Availability, ProviderId, TrackInfo, TrackRef};

/// Metadata source injected into the engine
pub trait TrackCatalog: Send + Sync {
    /// Turn a serialized id back into a reference, if the track still exists
    fn resolve(&self, track_id: &str, provider: &ProviderId) -> Option<TrackRef>;

    /// Duration and availability, `None` while unknown
    fn track_info(&self, track: &TrackRef) -> Option<TrackInfo>;
}

/// Catalog held in memory
#[derive(Default)]
pub struct MemoryCatalog {
    tracks: RwLock<HashMap<TrackRef, TrackInfo>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, track: TrackRef, info: TrackInfo) {
        if let Ok(mut tracks) = self.tracks.write() {
            tracks.insert(track, info);
        }
    }

    pub fn set_availability(&self, track: &TrackRef, availability: Availability) {
        if let Ok(mut tracks) = self.tracks.write() {
            if let Some(info) = tracks.get_mut(track) {
                info.availability = availability;
            }
        }
    }

    pub fn remove(&self, track: &TrackRef) {
        if let Ok(mut tracks) = self.tracks.write() {
            tracks.remove(track);
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TrackCatalog for MemoryCatalog {
    fn resolve(&self, track_id: &str, provider: &ProviderId) -> Option<TrackRef> {
        let track = TrackRef::new(track_id, provider.clone());
        let tracks = self.tracks.read().ok()?;
        tracks.contains_key(&track).then_some(track)
    }

    fn track_info(&self, track: &TrackRef) -> Option<TrackInfo> {
        self.tracks.read().ok()?.get(track).copied()
    }
}
