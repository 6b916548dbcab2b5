//! Playback observers (UI, notification, remote metadata)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::types::TrackRef;

/// Receives engine events on the worker thread
///
/// Events arrive in the order the worker processed the operations that
/// caused them. Implementations must not block.
pub trait PlaybackObserver: Send + Sync {
    /// A track started. `buffering` is true until the provider confirms.
    fn on_song_started(&self, _buffering: bool, _track: &TrackRef) {}

    fn on_playback_pause(&self) {}

    fn on_playback_resume(&self) {}

    fn on_playback_queue_changed(&self) {}

    /// Position after a successful seek
    fn on_song_scrobble(&self, _elapsed_ms: u64) {}
}

/// Handle returned when an observer is added
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    next_id: AtomicU64,
    observers: RwLock<Vec<(ObserverId, Arc<dyn PlaybackObserver>)>>,
}

impl ObserverRegistry {
    pub fn add(&self, observer: Arc<dyn PlaybackObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut observers) = self.observers.write() {
            observers.push((id, observer));
        }
        id
    }

    pub fn remove(&self, id: ObserverId) -> bool {
        match self.observers.write() {
            Ok(mut observers) => {
                let before = observers.len();
                observers.retain(|(existing, _)| *existing != id);
                observers.len() != before
            }
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.observers.read().map(|o| o.len()).unwrap_or(0)
    }

    /// Call `f` for every observer, outside the lock
    pub fn notify(&self, f: impl Fn(&dyn PlaybackObserver)) {
        let observers: Vec<_> = match self.observers.read() {
            Ok(observers) => observers.iter().map(|(_, o)| Arc::clone(o)).collect(),
            Err(_) => return,
        };
        for observer in observers {
            f(observer.as_ref());
        }
    }
}
