//! Prefetch of the next queued track
//!
//! At most one prefetch is ever outstanding. Scheduling a new one cancels the
//! previous task first, and a fired task is matched against its ticket so a
//! stale firing (one that raced with a reschedule) is ignored.

use std::sync::Arc;
use std::time::Duration;

use crate::scheduler::{TaskHandle, TaskScheduler};
use crate::types::TrackRef;

/// The one outstanding prefetch request
#[derive(Debug, Clone)]
pub struct PendingPrefetch {
    pub track: TrackRef,
    pub ticket: u64,
    handle: TaskHandle,
}

pub struct PrefetchScheduler {
    scheduler: Arc<dyn TaskScheduler>,
    pending: Option<PendingPrefetch>,
    next_ticket: u64,
}

impl PrefetchScheduler {
    pub fn new(scheduler: Arc<dyn TaskScheduler>) -> Self {
        Self {
            scheduler,
            pending: None,
            next_ticket: 0,
        }
    }

    /// Time left until the provider wants the next track requested
    ///
    /// `duration - prefetch_delay - elapsed`, clamped at zero.
    pub fn delay_for(duration_ms: u64, prefetch_delay_ms: u64, elapsed_ms: u64) -> Duration {
        Duration::from_millis(
            duration_ms
                .saturating_sub(prefetch_delay_ms)
                .saturating_sub(elapsed_ms),
        )
    }

    /// Replace any pending request with one for `track`
    ///
    /// `on_fire` receives the ticket to hand back to [`take_fired`].
    ///
    /// [`take_fired`]: PrefetchScheduler::take_fired
    pub fn schedule<F>(&mut self, track: TrackRef, delay: Duration, on_fire: F)
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let handle = self
            .scheduler
            .schedule(delay, Box::new(move || on_fire(ticket)));

        log::debug!("Prefetch of {} scheduled in {:?}", track, delay);
        self.pending = Some(PendingPrefetch {
            track,
            ticket,
            handle,
        });
    }

    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.handle.cancel();
        }
    }

    pub fn pending(&self) -> Option<&PendingPrefetch> {
        self.pending.as_ref()
    }

    /// Claim a fired request
    ///
    /// Returns the track it was scheduled for when `ticket` is still the
    /// outstanding one, and clears it.
    pub fn take_fired(&mut self, ticket: u64) -> Option<TrackRef> {
        match &self.pending {
            Some(pending) if pending.ticket == ticket && !pending.handle.is_cancelled() => {
                self.pending.take().map(|p| p.track)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;
    use std::sync::Mutex;

    #[test]
    fn test_delay_is_clamped() {
        assert_eq!(
            PrefetchScheduler::delay_for(180_000, 10_000, 0),
            Duration::from_millis(170_000)
        );
        assert_eq!(
            PrefetchScheduler::delay_for(180_000, 10_000, 100_000),
            Duration::from_millis(70_000)
        );
        assert_eq!(PrefetchScheduler::delay_for(5_000, 10_000, 0), Duration::ZERO);
    }

    #[test]
    fn test_reschedule_keeps_single_pending() {
        let manual = Arc::new(ManualScheduler::new());
        let mut prefetch = PrefetchScheduler::new(manual.clone());
        let fired = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let fired = Arc::clone(&fired);
            prefetch.schedule(
                TrackRef::new(format!("t{}", i), "local"),
                Duration::from_secs(10),
                move |ticket| fired.lock().unwrap().push(ticket),
            );
            assert_eq!(manual.pending_count(), 1);
        }
        assert_eq!(manual.scheduled_count(), 5);

        manual.fire_all();
        let tickets = fired.lock().unwrap().clone();
        assert_eq!(tickets, vec![4]);
        assert_eq!(prefetch.take_fired(4), Some(TrackRef::new("t4", "local")));
        assert!(prefetch.pending().is_none());
    }

    #[test]
    fn test_stale_ticket_is_ignored() {
        let manual = Arc::new(ManualScheduler::new());
        let mut prefetch = PrefetchScheduler::new(manual);

        prefetch.schedule(TrackRef::new("a", "local"), Duration::ZERO, |_| {});
        prefetch.schedule(TrackRef::new("b", "local"), Duration::ZERO, |_| {});

        assert_eq!(prefetch.take_fired(0), None);
        assert_eq!(prefetch.take_fired(1), Some(TrackRef::new("b", "local")));
        assert_eq!(prefetch.take_fired(1), None);
    }
}
