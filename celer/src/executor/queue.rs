//! FIFO work queues shared between producers and pool workers.

use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;

use super::{error::ExecutorError, task::Runnable};

/// Hand-off queue between task producers and pool workers.
///
/// `pop` never blocks; workers poll the queue from the thread-pool harness
/// and exit when it is empty.
pub trait BlockingQueue: Send + Sync {
    /// Enqueues at the tail. Returns `false` when the queue refuses the
    /// task (bounded variant at capacity).
    fn push(&self, task: Arc<dyn Runnable>) -> bool;
    /// Dequeues the head, or `None` when empty.
    fn pop(&self) -> Option<Arc<dyn Runnable>>;
    fn is_empty(&self) -> bool;
    fn clear(&self);
}

/// Bounded FIFO queue. `push` fails once `max_queue_size` tasks are queued.
pub struct BoundBlockingQueue {
    max_queue_size: usize,
    queue: Mutex<VecDeque<Arc<dyn Runnable>>>,
}

impl std::fmt::Debug for BoundBlockingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundBlockingQueue")
            .field("max_queue_size", &self.max_queue_size)
            .finish()
    }
}

impl BoundBlockingQueue {
    pub const DEFAULT_MAX_QUEUE_SIZE: usize = 128;

    pub fn new(max_queue_size: usize) -> Result<Self, ExecutorError> {
        if max_queue_size == 0 {
            return Err(ExecutorError::IllegalArgument(
                "max queue size must not be zero",
            ));
        }
        Ok(Self {
            max_queue_size,
            queue: Mutex::new(VecDeque::new()),
        })
    }

    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }
}

impl Default for BoundBlockingQueue {
    fn default() -> Self {
        Self {
            max_queue_size: Self::DEFAULT_MAX_QUEUE_SIZE,
            queue: Mutex::new(VecDeque::new()),
        }
    }
}

impl BlockingQueue for BoundBlockingQueue {
    fn push(&self, task: Arc<dyn Runnable>) -> bool {
        let mut queue = self.queue.lock();
        if queue.len() == self.max_queue_size {
            tracing::debug!(
                "work queue is full, rejecting task (max_queue_size = {})",
                self.max_queue_size
            );
            return false;
        }
        queue.push_back(task);
        true
    }

    fn pop(&self) -> Option<Arc<dyn Runnable>> {
        self.queue.lock().pop_front()
    }

    fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    fn clear(&self) {
        self.queue.lock().clear();
    }
}

/// Unbounded FIFO queue; `push` always succeeds.
#[derive(Default)]
pub struct UnboundBlockingQueue {
    queue: Mutex<VecDeque<Arc<dyn Runnable>>>,
}

impl UnboundBlockingQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockingQueue for UnboundBlockingQueue {
    fn push(&self, task: Arc<dyn Runnable>) -> bool {
        self.queue.lock().push_back(task);
        true
    }

    fn pop(&self) -> Option<Arc<dyn Runnable>> {
        self.queue.lock().pop_front()
    }

    fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    fn clear(&self) {
        self.queue.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Noop;

    impl Runnable for Noop {
        fn run(&self) {}
    }

    struct Counting(Arc<AtomicUsize>);

    impl Runnable for Counting {
        fn run(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn bound_queue_rejects_push_beyond_max() {
        let queue = BoundBlockingQueue::default();
        for _ in 0..BoundBlockingQueue::DEFAULT_MAX_QUEUE_SIZE {
            assert!(queue.push(Arc::new(Noop)));
        }
        assert!(!queue.push(Arc::new(Noop)));
        // draining one slot makes push succeed again
        assert!(queue.pop().is_some());
        assert!(queue.push(Arc::new(Noop)));
    }

    #[test]
    fn bound_queue_with_zero_max_is_an_illegal_argument() {
        match BoundBlockingQueue::new(0) {
            Err(e @ ExecutorError::IllegalArgument(_)) => assert_eq!(e.code(), 100600),
            other => panic!("expected IllegalArgument, got {other:?}"),
        }
    }

    #[test]
    fn unbound_queue_accepts_more_than_the_default_bound() {
        let queue = UnboundBlockingQueue::new();
        for _ in 0..(BoundBlockingQueue::DEFAULT_MAX_QUEUE_SIZE + 10) {
            assert!(queue.push(Arc::new(Noop)));
        }
    }

    #[test]
    fn pop_is_fifo() {
        let queue = UnboundBlockingQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let first = Arc::new(Counting(counter.clone()));
        queue.push(first);
        queue.push(Arc::new(Noop));

        let popped = queue.pop().expect("first task");
        popped.run();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(queue.pop().is_some());
        assert!(queue.pop().is_none());
    }

    #[test]
    fn clear_empties_the_queue() {
        let queue = BoundBlockingQueue::new(4).unwrap();
        queue.push(Arc::new(Noop));
        queue.push(Arc::new(Noop));
        assert!(!queue.is_empty());
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }
}
