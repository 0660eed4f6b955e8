// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Delay-scheduling timer with a single worker thread.
//!
//! Callbacks fire on the worker, outside the queue lock and behind a panic
//! boundary, so one misbehaving callback cannot wedge the timer. Nodes are
//! re-armable: scheduling an already-cancelled node revives it, and
//! cancellation makes any in-queue firing stale.

use parking_lot::{Condvar, Mutex};
use std::collections::BinaryHeap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Receiver of timer firings.
///
/// Implementations are held weakly by their [`TimerNode`]; a node whose
/// callback has been dropped simply stops firing.
pub trait TimerCallback: Send + Sync {
    /// Invoked on the timer worker when the scheduled delay elapses.
    fn callback(&self);

    /// Invoked once for still-pending nodes when the timer shuts down.
    fn timer_stopped(&self) {}
}

struct NodeShared {
    callback: Weak<dyn TimerCallback>,
    /// Bumped by `cancel` so queued entries for older schedules become stale.
    generation: AtomicU64,
    cancelled: AtomicBool,
}

/// Handle to one schedulable callback.
///
/// Cloning shares the underlying node, so a clone placed in the queue and a
/// clone held by the owner observe the same cancellation.
#[derive(Clone)]
pub struct TimerNode {
    shared: Arc<NodeShared>,
}

impl TimerNode {
    pub fn new(callback: Weak<dyn TimerCallback>) -> Self {
        TimerNode {
            shared: Arc::new(NodeShared {
                callback,
                generation: AtomicU64::new(0),
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    /// Invalidate any pending schedule for this node.
    ///
    /// A firing already in flight completes; the next queued firing is
    /// suppressed.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Whether the node is currently cancelled (i.e. not re-armed since the
    /// last `cancel`).
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }
}

struct Entry {
    deadline: Instant,
    /// Insertion order tiebreak for equal deadlines.
    seq: u64,
    generation: u64,
    node: Arc<NodeShared>,
}

impl Entry {
    fn is_current(&self) -> bool {
        self.generation == self.node.generation.load(Ordering::Acquire)
            && !self.node.cancelled.load(Ordering::Acquire)
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed so the std max-heap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TimerShared {
    queue: Mutex<BinaryHeap<Entry>>,
    wakeup: Condvar,
    shutdown: AtomicBool,
    next_seq: AtomicU64,
}

/// Single-threaded delay scheduler.
pub struct Timer {
    shared: Arc<TimerShared>,
    worker: Option<JoinHandle<()>>,
}

impl Timer {
    /// Spawn the timer worker under the given thread name.
    pub fn spawn(name: &str) -> io::Result<Self> {
        let shared = Arc::new(TimerShared {
            queue: Mutex::new(BinaryHeap::new()),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_loop(worker_shared))?;

        Ok(Timer {
            shared,
            worker: Some(worker),
        })
    }

    /// Arm `node` to fire once after `delay`.
    ///
    /// Re-arms a cancelled node and supersedes any earlier schedule of the
    /// same node.
    pub fn schedule_after_delay(&self, node: &TimerNode, delay: Duration) {
        node.shared.cancelled.store(false, Ordering::Release);
        let generation = node.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let entry = Entry {
            deadline: Instant::now() + delay,
            seq: self.shared.next_seq.fetch_add(1, Ordering::Relaxed),
            generation,
            node: Arc::clone(&node.shared),
        };

        self.shared.queue.lock().push(entry);
        self.shared.wakeup.notify_one();
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wakeup.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_loop(shared: Arc<TimerShared>) {
    log::debug!(
        "[timer] worker started thread={:?}",
        std::thread::current().name()
    );

    loop {
        let mut queue = shared.queue.lock();

        if shared.shutdown.load(Ordering::Acquire) {
            let pending = std::mem::take(&mut *queue);
            drop(queue);
            for entry in pending {
                if !entry.is_current() {
                    continue;
                }
                if let Some(callback) = entry.node.callback.upgrade() {
                    callback.timer_stopped();
                }
            }
            break;
        }

        let now = Instant::now();
        let next_deadline = queue.peek().map(|entry| entry.deadline);
        let due = match next_deadline {
            Some(deadline) if deadline <= now => queue.pop(),
            Some(deadline) => {
                shared.wakeup.wait_for(&mut queue, deadline - now);
                None
            }
            None => {
                shared.wakeup.wait(&mut queue);
                None
            }
        };
        drop(queue);

        if let Some(entry) = due {
            if !entry.is_current() {
                continue;
            }
            let Some(callback) = entry.node.callback.upgrade() else {
                continue;
            };
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback.callback();
            }));
            if outcome.is_err() {
                log::error!("[timer] callback panicked; continuing");
            }
        }
    }

    log::debug!("[timer] worker exiting");
}
