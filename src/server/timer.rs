//! One-shot timer manager driven by the main loop.
//!
//! Timers are scheduled in milliseconds and fire only when the main loop
//! drains them with [`TimerManager::take_due`], so callbacks always run on
//! the thread that owns the server state. Cancellation is always safe: a
//! cancelled timer never fires, and cancelling after expiry is a no-op.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use tokio::time::{Duration, Instant};

/// Callback invoked with exclusive access to the owning context when a
/// timer expires.
pub type TimerCallback<C> = Box<dyn FnOnce(&mut C) + Send>;

/// Handle identifying a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

struct Entry<C> {
    deadline: Instant,
    seq: u64,
    callback: TimerCallback<C>,
}

impl<C> PartialEq for Entry<C> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<C> Eq for Entry<C> {}

impl<C> PartialOrd for Entry<C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<C> Ord for Entry<C> {
    // Reversed so the BinaryHeap pops the earliest deadline first, ties
    // broken by registration order.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.deadline, other.seq).cmp(&(self.deadline, self.seq))
    }
}

/// Single-threaded one-shot timer wheel.
///
/// Generic over the context type `C` handed to callbacks; the server
/// instantiates it with its main-thread state.
pub struct TimerManager<C> {
    heap: BinaryHeap<Entry<C>>,
    pending: HashSet<u64>,
    cancelled: HashSet<u64>,
    next_seq: u64,
}

impl<C> Default for TimerManager<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> TimerManager<C> {
    /// Creates an empty timer manager.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            pending: HashSet::new(),
            cancelled: HashSet::new(),
            next_seq: 0,
        }
    }

    /// Schedules `callback` to run after `delay_ms` milliseconds.
    pub fn schedule_ms(&mut self, delay_ms: u64, callback: TimerCallback<C>) -> TimerHandle {
        self.schedule(Duration::from_millis(delay_ms), callback)
    }

    /// Schedules `callback` to run after `delay`.
    pub fn schedule(&mut self, delay: Duration, callback: TimerCallback<C>) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            deadline: Instant::now() + delay,
            seq,
            callback,
        });
        self.pending.insert(seq);
        TimerHandle(seq)
    }

    /// Cancels a timer. Safe to call with a handle that already fired or
    /// was already cancelled.
    pub fn cancel(&mut self, handle: TimerHandle) {
        if self.pending.remove(&handle.0) {
            self.cancelled.insert(handle.0);
        }
    }

    /// True if the timer has neither fired nor been cancelled.
    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.pending.contains(&handle.0)
    }

    /// Number of timers still armed.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Earliest deadline among armed timers, if any.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.skim_cancelled();
        self.heap.peek().map(|e| e.deadline)
    }

    /// Removes and returns the callbacks of every timer whose deadline has
    /// passed, in deadline order with ties broken by registration order.
    ///
    /// The caller runs the callbacks; a callback is free to schedule new
    /// timers on this manager through the context it receives.
    pub fn take_due(&mut self, now: Instant) -> Vec<TimerCallback<C>> {
        let mut due = Vec::new();
        loop {
            self.skim_cancelled();
            let expired = match self.heap.peek() {
                Some(entry) => entry.deadline <= now,
                None => false,
            };
            if !expired {
                break;
            }
            if let Some(entry) = self.heap.pop() {
                self.pending.remove(&entry.seq);
                due.push(entry.callback);
            }
        }
        due
    }

    /// Cancels every armed timer. Used at shutdown.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.pending.clear();
        self.cancelled.clear();
    }

    // Drop cancelled entries sitting at the top of the heap.
    fn skim_cancelled(&mut self) {
        loop {
            let top_cancelled = match self.heap.peek() {
                Some(entry) => self.cancelled.contains(&entry.seq),
                None => false,
            };
            if !top_cancelled {
                break;
            }
            if let Some(entry) = self.heap.pop() {
                self.cancelled.remove(&entry.seq);
            }
        }
    }
}
