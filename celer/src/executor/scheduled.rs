//! Delayed execution of future tasks.

use std::{
    cmp::Ordering as CmpOrdering,
    collections::BinaryHeap,
    sync::{Arc, Weak},
    thread,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use super::{
    error::FutureError,
    future::{CancellationToken, FutureTask},
    pool::QueuedThreadPool,
    task::Runnable,
};
use crate::error::BoxError;

/// A [`FutureTask`] that fires exactly once at a scheduled instant.
///
/// The task is armed on a [`Timer`]; when the deadline passes, the timer
/// hands it to the target [`QueuedThreadPool`] for execution. Cancellation
/// is flag-only: a cancelled task still fires and runs, and its body is
/// expected to observe the token and short-circuit.
pub struct ScheduledFutureTask<T> {
    inner: FutureTask<T>,
    scheduled_at: Mutex<Option<Instant>>,
}

impl<T: Clone + Send> ScheduledFutureTask<T> {
    pub fn new(f: impl FnOnce() -> Result<T, BoxError> + Send + 'static) -> Self {
        Self::with_token(CancellationToken::new(), f)
    }

    pub fn with_token(
        token: CancellationToken,
        f: impl FnOnce() -> Result<T, BoxError> + Send + 'static,
    ) -> Self {
        Self {
            inner: FutureTask::with_token(token, f),
            scheduled_at: Mutex::new(None),
        }
    }

    /// The instant the task is armed for, once scheduled.
    pub fn scheduled_at(&self) -> Option<Instant> {
        *self.scheduled_at.lock()
    }

    pub fn run(&self) {
        self.inner.run();
    }

    pub fn get(&self) -> Result<T, FutureError> {
        self.inner.get()
    }

    pub fn get_timeout(&self, timeout: Duration) -> Result<T, FutureError> {
        self.inner.get_timeout(timeout)
    }

    pub fn cancel(&self, may_interrupt_if_running: bool) -> bool {
        self.inner.cancel(may_interrupt_if_running)
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    pub fn is_done(&self) -> bool {
        self.inner.is_done()
    }

    pub fn token(&self) -> &CancellationToken {
        self.inner.token()
    }

    fn mark_scheduled(&self, at: Instant) {
        *self.scheduled_at.lock() = Some(at);
    }
}

impl<T: Clone + Send> Runnable for ScheduledFutureTask<T> {
    fn run(&self) {
        ScheduledFutureTask::run(self);
    }
}

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    task: Arc<dyn Runnable>,
    pool: Weak<QueuedThreadPool>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    // reversed so the BinaryHeap pops the earliest deadline first
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TimerState {
    entries: BinaryHeap<TimerEntry>,
    next_seq: u64,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

/// One background thread firing scheduled tasks.
///
/// Fired tasks are dispatched to the pool captured at scheduling time; a
/// pool that has been dropped or terminated in the meantime swallows the
/// fire. Dropping the timer wakes and joins its thread without waiting for
/// pending deadlines.
pub struct Timer {
    shared: Arc<TimerShared>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Timer {
    pub fn new() -> Self {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                entries: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
        });
        let worker = shared.clone();
        let thread = thread::Builder::new()
            .name("celer-timer".into())
            .spawn(move || Self::run_loop(worker))
            .expect("failed to spawn timer thread");
        Self {
            shared,
            thread: Some(thread),
        }
    }

    /// Arms `task` to fire after `delay` on `pool`.
    pub fn schedule<T: Clone + Send + 'static>(
        &self,
        task: Arc<ScheduledFutureTask<T>>,
        delay: Duration,
        pool: &Arc<QueuedThreadPool>,
    ) {
        let deadline = Instant::now() + delay;
        task.mark_scheduled(deadline);
        let mut state = self.shared.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push(TimerEntry {
            deadline,
            seq,
            task,
            pool: Arc::downgrade(pool),
        });
        drop(state);
        self.shared.wakeup.notify_one();
    }

    fn run_loop(shared: Arc<TimerShared>) {
        let mut state = shared.state.lock();
        loop {
            if state.shutdown {
                return;
            }
            let now = Instant::now();
            match state.entries.peek().map(|entry| entry.deadline) {
                Some(deadline) if deadline <= now => {
                    if let Some(entry) = state.entries.pop() {
                        drop(state);
                        if let Some(pool) = entry.pool.upgrade() {
                            if let Err(e) = pool.start(entry.task) {
                                tracing::debug!("dropping fired task: {e}");
                            }
                        } else {
                            tracing::trace!("target pool is gone, dropping fired task");
                        }
                        state = shared.state.lock();
                    }
                }
                Some(deadline) => {
                    shared.wakeup.wait_until(&mut state, deadline);
                }
                None => {
                    shared.wakeup.wait(&mut state);
                }
            }
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.wakeup.notify_one();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("timer thread panicked before joining");
            }
        }
    }
}
