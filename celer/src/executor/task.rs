/// A unit of work that can be executed by a pool worker or the timer.
///
/// Implementations must be safe to share: the same task object may be held
/// by the submitting thread (as a future), by the queue, and by the worker
/// that eventually runs it.
pub trait Runnable: Send + Sync {
    fn run(&self);
}
