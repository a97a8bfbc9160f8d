//! Worker-thread pool fed by a blocking queue.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use parking_lot::Mutex;

use super::{
    error::ExecutorError,
    queue::{BlockingQueue, BoundBlockingQueue},
    task::Runnable,
};

/// Fixed-band pool of worker threads draining a [`BlockingQueue`].
///
/// `start` prefers spinning up a worker for the task; once `max_pool_size`
/// workers are live the task spills into the backing queue instead. Workers
/// never block on an empty queue: a worker runs its seed task, drains the
/// queue, and exits.
pub struct QueuedThreadPool {
    shared: Arc<PoolShared>,
    core_pool_size: u32,
    max_pool_size: u32,
}

impl std::fmt::Debug for QueuedThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedThreadPool")
            .field("core_pool_size", &self.core_pool_size)
            .field("max_pool_size", &self.max_pool_size)
            .finish()
    }
}

struct PoolShared {
    queue: Box<dyn BlockingQueue>,
    state: Mutex<PoolState>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
    terminated: AtomicBool,
}

struct PoolState {
    /// Threads spawned and not yet fully exited.
    live_workers: u32,
    /// Workers still inside their run loop. Decremented as soon as a worker
    /// observes an empty queue, slightly before its thread is gone.
    active_workers: u32,
}

impl QueuedThreadPool {
    pub const DEFAULT_CORE_POOL_SIZE: u32 = 2;
    pub const DEFAULT_MAXIMUM_POOL_SIZE: u32 = 5;

    /// Pool with the default band (2..5) and a default bounded queue.
    pub fn new() -> Self {
        Self::with_queue_and_sizes(
            Self::DEFAULT_CORE_POOL_SIZE,
            Self::DEFAULT_MAXIMUM_POOL_SIZE,
            Box::<BoundBlockingQueue>::default(),
        )
        .expect("default configuration is valid")
    }

    pub fn with_sizes(core_pool_size: u32, max_pool_size: u32) -> Result<Self, ExecutorError> {
        Self::with_queue_and_sizes(
            core_pool_size,
            max_pool_size,
            Box::<BoundBlockingQueue>::default(),
        )
    }

    pub fn with_queue(queue: Box<dyn BlockingQueue>) -> Result<Self, ExecutorError> {
        Self::with_queue_and_sizes(
            Self::DEFAULT_CORE_POOL_SIZE,
            Self::DEFAULT_MAXIMUM_POOL_SIZE,
            queue,
        )
    }

    pub fn with_queue_and_sizes(
        core_pool_size: u32,
        max_pool_size: u32,
        queue: Box<dyn BlockingQueue>,
    ) -> Result<Self, ExecutorError> {
        if core_pool_size == 0 || max_pool_size < core_pool_size {
            return Err(ExecutorError::IllegalArgument(
                "core pool size must be non-zero and not greater than the maximum pool size",
            ));
        }
        Ok(Self {
            shared: Arc::new(PoolShared {
                queue,
                state: Mutex::new(PoolState {
                    live_workers: 0,
                    active_workers: 0,
                }),
                handles: Mutex::new(Vec::new()),
                terminated: AtomicBool::new(false),
            }),
            core_pool_size,
            max_pool_size,
        })
    }

    pub fn core_pool_size(&self) -> u32 {
        self.core_pool_size
    }

    pub fn maximum_pool_size(&self) -> u32 {
        self.max_pool_size
    }

    /// Hands a task to the pool.
    ///
    /// Returns [`ExecutorError::IllegalState`] after shutdown and
    /// [`ExecutorError::TooManyRequests`] when all workers are busy and the
    /// backing queue refuses the task.
    pub fn start(&self, task: Arc<dyn Runnable>) -> Result<(), ExecutorError> {
        loop {
            if self.shared.terminated.load(Ordering::SeqCst) {
                tracing::debug!("start rejected, pool is already terminated");
                return Err(ExecutorError::IllegalState(
                    "cannot start task, pool is already terminated",
                ));
            }

            let mut state = self.shared.state.lock();
            if state.live_workers < self.max_pool_size {
                state.live_workers += 1;
                state.active_workers += 1;
                drop(state);
                if let Err(e) = self.spawn_worker(task.clone()) {
                    let mut state = self.shared.state.lock();
                    state.live_workers -= 1;
                    state.active_workers -= 1;
                    return Err(e);
                }
                return Ok(());
            }

            if state.active_workers == 0 {
                // every worker drained the queue and is tearing down, but
                // its thread slot is not free yet; a slot opens shortly
                drop(state);
                thread::sleep(Duration::from_millis(1));
                continue;
            }

            tracing::trace!("pool saturated, spilling task to the queue");
            if self.shared.queue.push(task) {
                return Ok(());
            }
            tracing::debug!("task count exceeds the backing queue capacity");
            return Err(ExecutorError::TooManyRequests);
        }
    }

    fn spawn_worker(&self, seed: Arc<dyn Runnable>) -> Result<(), ExecutorError> {
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("celer-worker".into())
            .spawn(move || {
                seed.run();
                while let Some(task) = shared.next_task() {
                    task.run();
                }
                shared.state.lock().live_workers -= 1;
            })
            .map_err(|e| ExecutorError::Execution(format!("failed to spawn worker thread: {e}")))?;
        self.shared.handles.lock().push(handle);
        Ok(())
    }

    /// Marks the pool terminated without waiting for the workers. Idempotent.
    pub fn shutdown(&self) {
        self.shared.terminated.store(true, Ordering::SeqCst);
        tracing::debug!("pool shutdown requested");
    }

    /// Marks the pool terminated and waits for every worker to finish its
    /// current task and whatever is still queued. Idempotent.
    pub fn shutdown_and_join_all(&self) {
        self.shared.terminated.store(true, Ordering::SeqCst);
        loop {
            let handles: Vec<_> = self.shared.handles.lock().drain(..).collect();
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if handle.join().is_err() {
                    tracing::warn!("worker thread panicked before joining");
                }
            }
        }
        tracing::debug!("all pool workers joined");
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::SeqCst)
    }
}

impl Default for QueuedThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolShared {
    /// Next queued task, or `None` when the queue is empty. The calling
    /// worker stops being active on `None`.
    fn next_task(&self) -> Option<Arc<dyn Runnable>> {
        let mut state = self.state.lock();
        let task = self.queue.pop();
        if task.is_none() {
            state.active_workers -= 1;
        }
        task
    }
}
