//! Delayed one-shot tasks
//!
//! The engine defers three kinds of work: prefetching the next track, the
//! grace stop at the end of a queue, and crash recovery. All of them go
//! through [`TaskScheduler`] so tests can drive time by hand with
//! [`ManualScheduler`] while the player uses the threaded [`TimerScheduler`].

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, Sender};

/// Work to run once the delay elapses
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Cancellation handle for a scheduled task
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prevent the task from running. No effect once it has run.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

pub trait TaskScheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle;
}

// ─────────────────────────────────────────────────────────────────────────────
// Threaded scheduler
// ─────────────────────────────────────────────────────────────────────────────

enum TimerCommand {
    Schedule {
        deadline: Instant,
        task: Task,
        handle: TaskHandle,
    },
    Shutdown,
}

/// Runs tasks on a dedicated timer thread
///
/// Tasks execute on the timer thread and should only hand work off (the
/// engine's tasks post a command to its worker).
pub struct TimerScheduler {
    command_tx: Sender<TimerCommand>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerScheduler {
    pub fn new() -> std::io::Result<Self> {
        let (command_tx, command_rx) = unbounded();
        let handle = thread::Builder::new()
            .name("encore-timer".into())
            .spawn(move || run_timer(command_rx))?;

        Ok(Self {
            command_tx,
            thread_handle: Mutex::new(Some(handle)),
        })
    }

    pub fn shutdown(&self) {
        let _ = self.command_tx.send(TimerCommand::Shutdown);
        let handle = self.thread_handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl TaskScheduler for TimerScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        let sent = self.command_tx.send(TimerCommand::Schedule {
            deadline: Instant::now() + delay,
            task,
            handle: handle.clone(),
        });
        if sent.is_err() {
            log::warn!("Timer thread is gone, dropping task");
            handle.cancel();
        }
        handle
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_timer(command_rx: Receiver<TimerCommand>) {
    let mut deadlines: BinaryHeap<Reverse<(Instant, u64)>> = BinaryHeap::new();
    let mut tasks: HashMap<u64, (Task, TaskHandle)> = HashMap::new();
    let mut next_id = 0u64;

    loop {
        let timeout = deadlines
            .peek()
            .map(|Reverse((deadline, _))| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_secs(3600));

        crossbeam::select! {
            recv(command_rx) -> cmd => match cmd {
                Ok(TimerCommand::Schedule { deadline, task, handle }) => {
                    deadlines.push(Reverse((deadline, next_id)));
                    tasks.insert(next_id, (task, handle));
                    next_id += 1;
                }
                Ok(TimerCommand::Shutdown) | Err(_) => break,
            },
            default(timeout) => {}
        }

        let now = Instant::now();
        while let Some(Reverse((deadline, id))) = deadlines.peek().copied() {
            if deadline > now {
                break;
            }
            deadlines.pop();
            if let Some((task, handle)) = tasks.remove(&id) {
                if !handle.is_cancelled() {
                    task();
                }
            }
        }
    }

    log::debug!("Timer thread stopped with {} pending tasks", tasks.len());
}

// ─────────────────────────────────────────────────────────────────────────────
// Manual scheduler
// ─────────────────────────────────────────────────────────────────────────────

struct ManualEntry {
    due: Duration,
    seq: u64,
    task: Task,
    handle: TaskHandle,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_seq: u64,
    entries: Vec<ManualEntry>,
}

/// Deterministic scheduler driven by explicit calls to [`advance`]
///
/// Keeps a virtual clock starting at zero. Counters let callers check how
/// many tasks were ever scheduled and how many are still waiting.
///
/// [`advance`]: ManualScheduler::advance
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
    scheduled: AtomicUsize,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks scheduled so far, including cancelled and fired ones
    pub fn scheduled_count(&self) -> usize {
        self.scheduled.load(Ordering::Relaxed)
    }

    /// Tasks neither fired nor cancelled
    pub fn pending_count(&self) -> usize {
        self.lock()
            .entries
            .iter()
            .filter(|e| !e.handle.is_cancelled())
            .count()
    }

    /// Delays of pending tasks relative to the virtual now
    pub fn pending_delays(&self) -> Vec<Duration> {
        let state = self.lock();
        let mut delays: Vec<_> = state
            .entries
            .iter()
            .filter(|e| !e.handle.is_cancelled())
            .map(|e| e.due.saturating_sub(state.now))
            .collect();
        delays.sort();
        delays
    }

    /// Move the clock forward and run everything that became due, in order
    ///
    /// Tasks scheduled by a running task are picked up if they fall inside
    /// the same window. Returns the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.lock().now + by;
        let mut ran = 0;

        loop {
            let next = {
                let mut state = self.lock();
                state.entries.retain(|e| !e.handle.is_cancelled());
                let pos = state
                    .entries
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.due <= target)
                    .min_by_key(|(_, e)| (e.due, e.seq))
                    .map(|(pos, _)| pos);
                match pos {
                    Some(pos) => {
                        let entry = state.entries.remove(pos);
                        state.now = state.now.max(entry.due);
                        Some(entry)
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };

            // Run outside the lock so tasks may schedule more work
            match next {
                Some(entry) => {
                    (entry.task)();
                    ran += 1;
                }
                None => break,
            }
        }
        ran
    }

    /// Run every pending task regardless of its delay
    pub fn fire_all(&self) -> usize {
        let latest = self
            .lock()
            .entries
            .iter()
            .map(|e| e.due)
            .max()
            .unwrap_or_default();
        let now = self.lock().now;
        self.advance(latest.saturating_sub(now))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl TaskScheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        let mut state = self.lock();
        let entry = ManualEntry {
            due: state.now + delay,
            seq: state.next_seq,
            task,
            handle: handle.clone(),
        };
        state.next_seq += 1;
        state.entries.push(entry);
        self.scheduled.fetch_add(1, Ordering::Relaxed);
        handle
    }
}
