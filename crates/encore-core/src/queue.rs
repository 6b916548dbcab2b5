//! Playback queue
//!
//! Ordered track references plus the cursor of the track being played.
//! Entries may be `None` for tracks that became unavailable; playback skips
//! them. The queue is persisted as JSON under [`QUEUE_KEY`] with the cursor
//! under [`CURRENT_KEY`].

use serde::{Deserialize, Serialize};

use crate::catalog::TrackCatalog;
use crate::store::{SettingsStore, StoreResult};
use crate::types::{ProviderId, TrackRef};

pub const QUEUE_KEY: &str = "queue";
pub const CURRENT_KEY: &str = "current";

/// Serialized queue entry
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    #[serde(rename = "r")]
    track_id: String,
    #[serde(rename = "p")]
    provider: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackQueue {
    entries: Vec<Option<TrackRef>>,
    current: Option<usize>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Option<TrackRef>] {
        &self.entries
    }

    /// Playable track at `index`; `None` for empty entries and out of range
    pub fn get(&self, index: usize) -> Option<&TrackRef> {
        self.entries.get(index).and_then(|e| e.as_ref())
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// Move the cursor, clamping to the last entry
    pub fn set_current(&mut self, index: Option<usize>) {
        self.current = match index {
            Some(_) if self.entries.is_empty() => None,
            Some(i) => Some(i.min(self.entries.len() - 1)),
            None => None,
        };
    }

    pub fn current_track(&self) -> Option<&TrackRef> {
        self.current.and_then(|i| self.get(i))
    }

    /// Entry right after the cursor, in queue order
    pub fn next_track(&self) -> Option<&TrackRef> {
        match self.current {
            Some(i) => self.get(i + 1),
            None => self.get(0),
        }
    }

    /// Append one entry, or put it in front when `top` is set
    pub fn add_song(&mut self, track: Option<TrackRef>, top: bool) {
        self.add_all(vec![track], top);
    }

    /// Append a block of entries, or put it in front keeping its order
    ///
    /// The cursor follows the track it pointed at.
    pub fn add_all(&mut self, tracks: Vec<Option<TrackRef>>, top: bool) {
        if top {
            let shift = tracks.len();
            self.entries.splice(0..0, tracks);
            self.current = self.current.map(|i| i + shift);
        } else {
            self.entries.extend(tracks);
        }
    }

    /// Insert at `index` (clamped to the end), keeping the cursor on its track
    pub fn insert(&mut self, index: usize, track: Option<TrackRef>) {
        let index = index.min(self.entries.len());
        self.entries.insert(index, track);
        if let Some(current) = self.current {
            if index <= current {
                self.current = Some(current + 1);
            }
        }
    }

    /// Remove the entry at `index`
    ///
    /// Removing before the cursor shifts it back; removing the current entry
    /// leaves the cursor on the entry that took its place.
    pub fn remove(&mut self, index: usize) -> Option<Option<TrackRef>> {
        if index >= self.entries.len() {
            return None;
        }
        let removed = self.entries.remove(index);
        self.current = match self.current {
            _ if self.entries.is_empty() => None,
            Some(current) if index < current => Some(current - 1),
            Some(current) => Some(current.min(self.entries.len() - 1)),
            None => None,
        };
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.current = None;
    }

    /// Persist entries and cursor
    pub fn save(&self, store: &dyn SettingsStore) -> StoreResult<()> {
        let stored: Vec<Option<StoredEntry>> = self
            .entries
            .iter()
            .map(|entry| {
                entry.as_ref().map(|track| StoredEntry {
                    track_id: track.track_id.clone(),
                    provider: track.provider.as_str().to_string(),
                })
            })
            .collect();
        let json = serde_json::to_string(&stored)?;
        store.put_string(QUEUE_KEY, &json)?;
        store.put_int(CURRENT_KEY, self.current.map(|i| i as i64).unwrap_or(-1))?;
        Ok(())
    }

    /// Rebuild from the store, resolving every entry through `catalog`
    ///
    /// Entries that are empty or no longer resolve are skipped and logged;
    /// the cursor is shifted so it stays on the same track. Returns the
    /// number of restored entries.
    pub fn restore(
        &mut self,
        store: &dyn SettingsStore,
        catalog: &dyn TrackCatalog,
    ) -> StoreResult<usize> {
        self.clear();

        let Some(json) = store.get_string(QUEUE_KEY) else {
            return Ok(0);
        };
        let stored: Vec<Option<StoredEntry>> = serde_json::from_str(&json)?;
        let saved_current = store.get_int(CURRENT_KEY).unwrap_or(-1);

        let mut current = None;
        for (index, entry) in stored.into_iter().enumerate() {
            if index as i64 == saved_current {
                current = Some(self.entries.len());
            }
            let Some(entry) = entry else {
                continue;
            };
            match catalog.resolve(&entry.track_id, &ProviderId::new(entry.provider.as_str())) {
                Some(track) => self.entries.push(Some(track)),
                None => log::warn!(
                    "Cannot restore queued track {} from {}, skipping",
                    entry.track_id,
                    entry.provider
                ),
            }
        }

        self.set_current(current);
        log::info!(
            "Restored {} queued tracks, current {:?}",
            self.entries.len(),
            self.current
        );
        Ok(self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::store::MemoryStore;
    use crate::types::TrackInfo;

    fn track(id: &str) -> TrackRef {
        TrackRef::new(id, "local")
    }

    fn queue_of(ids: &[&str]) -> PlaybackQueue {
        let mut queue = PlaybackQueue::new();
        queue.add_all(ids.iter().map(|id| Some(track(id))).collect(), false);
        queue
    }

    fn catalog_with(ids: &[&str]) -> MemoryCatalog {
        let catalog = MemoryCatalog::new();
        for id in ids {
            catalog.insert(track(id), TrackInfo::available(1000));
        }
        catalog
    }

    #[test]
    fn test_top_block_keeps_order_and_cursor() {
        let mut queue = queue_of(&["a", "b"]);
        queue.set_current(Some(1));
        queue.add_all(vec![Some(track("x")), Some(track("y"))], true);

        let ids: Vec<_> = queue
            .entries()
            .iter()
            .map(|e| e.as_ref().unwrap().track_id.as_str())
            .collect();
        assert_eq!(ids, vec!["x", "y", "a", "b"]);
        assert_eq!(queue.current_track(), Some(&track("b")));
    }

    #[test]
    fn test_insert_and_remove_adjust_cursor() {
        let mut queue = queue_of(&["a", "b", "c"]);
        queue.set_current(Some(1));

        queue.insert(0, Some(track("z")));
        assert_eq!(queue.current_track(), Some(&track("b")));

        queue.remove(0);
        assert_eq!(queue.current_track(), Some(&track("b")));

        // Removing the current entry moves onto its successor
        queue.remove(1);
        assert_eq!(queue.current_track(), Some(&track("c")));

        // Removing the last entry clamps the cursor
        queue.remove(1);
        assert_eq!(queue.current_track(), Some(&track("a")));

        queue.remove(0);
        assert_eq!(queue.current_index(), None);
        assert_eq!(queue.remove(0), None);
    }

    #[test]
    fn test_next_track_and_clamp() {
        let mut queue = queue_of(&["a", "b"]);
        assert_eq!(queue.next_track(), Some(&track("a")));
        queue.set_current(Some(10));
        assert_eq!(queue.current_index(), Some(1));
        assert_eq!(queue.next_track(), None);

        queue.clear();
        queue.set_current(Some(0));
        assert_eq!(queue.current_index(), None);
    }

    #[test]
    fn test_save_clear_restore_round_trip() {
        let store = MemoryStore::new();
        let catalog = catalog_with(&["a", "b", "c"]);

        let mut queue = queue_of(&["a", "b", "c"]);
        queue.set_current(Some(2));
        queue.save(&store).unwrap();

        let before = queue.clone();
        queue.clear();
        assert_eq!(queue.restore(&store, &catalog).unwrap(), 3);
        assert_eq!(queue, before);
    }

    #[test]
    fn test_restore_skips_unresolvable_and_shifts_cursor() {
        let store = MemoryStore::new();
        let catalog = catalog_with(&["a", "c"]);

        let mut queue = queue_of(&["a", "gone"]);
        queue.add_song(None, false);
        queue.add_song(Some(track("c")), false);
        queue.set_current(Some(3));
        queue.save(&store).unwrap();

        let mut restored = PlaybackQueue::new();
        assert_eq!(restored.restore(&store, &catalog).unwrap(), 2);
        assert_eq!(restored.entries(), &[Some(track("a")), Some(track("c"))]);
        assert_eq!(restored.current_track(), Some(&track("c")));
    }

    #[test]
    fn test_restore_without_saved_queue_is_empty() {
        let store = MemoryStore::new();
        let catalog = MemoryCatalog::new();
        let mut queue = queue_of(&["a"]);
        assert_eq!(queue.restore(&store, &catalog).unwrap(), 0);
        assert!(queue.is_empty());
        assert_eq!(queue.current_index(), None);
    }
}
