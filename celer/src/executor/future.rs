//! Cancellable tasks carrying a typed result slot.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use super::{error::FutureError, task::Runnable};
use crate::error::BoxError;

/// Shared cancellation flag.
///
/// Cancellation is cooperative: setting the token never interrupts a running
/// task, it only makes `is_cancelled` observable from the task body and
/// makes every subsequent [`FutureTask::get`] fail with
/// [`FutureError::Cancelled`].
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One-shot completion latch.
struct Completion {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Completion {
    fn new() -> Self {
        Self {
            done: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn set(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cond.wait(&mut done);
        }
    }

    /// Returns `false` when the latch was still unset at the deadline.
    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock();
        while !*done {
            if self.cond.wait_until(&mut done, deadline).timed_out() {
                return *done;
            }
        }
        true
    }
}

type TaskFn<T> = Box<dyn FnOnce() -> Result<T, BoxError> + Send>;

/// A runnable with a result slot, a cancelled flag and a completion latch.
///
/// `run` executes the wrapped closure exactly once, even if the task was
/// cancelled beforehand, so that every waiter unblocks uniformly; the
/// cancelled flag takes precedence when the result is retrieved. A closure
/// that wants to honor cancellation observes the [`CancellationToken`]
/// passed at construction.
pub struct FutureTask<T> {
    task_fn: Mutex<Option<TaskFn<T>>>,
    outcome: Mutex<Option<Result<T, FutureError>>>,
    completion: Completion,
    token: CancellationToken,
    finished: AtomicBool,
}

impl<T: Clone + Send> FutureTask<T> {
    pub fn new(f: impl FnOnce() -> Result<T, BoxError> + Send + 'static) -> Self {
        Self::with_token(CancellationToken::new(), f)
    }

    /// Builds a task whose cancelled flag is the given shared token.
    pub fn with_token(
        token: CancellationToken,
        f: impl FnOnce() -> Result<T, BoxError> + Send + 'static,
    ) -> Self {
        Self {
            task_fn: Mutex::new(Some(Box::new(f))),
            outcome: Mutex::new(None),
            completion: Completion::new(),
            token,
            finished: AtomicBool::new(false),
        }
    }

    /// Executes the task body and publishes the outcome.
    ///
    /// A second call is a no-op: taking the closure out of its slot is the
    /// re-entry guard.
    pub fn run(&self) {
        let Some(f) = self.task_fn.lock().take() else {
            tracing::debug!("future task already ran, ignoring re-entry");
            return;
        };
        let outcome = match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(cause)) => {
                tracing::debug!("future task failed: {cause}");
                Err(FutureError::execution(cause.to_string()))
            }
            Err(_) => Err(FutureError::execution("unexpected internal error")),
        };
        *self.outcome.lock() = Some(outcome);
        self.finished.store(true, Ordering::SeqCst);
        self.completion.set();
    }

    /// Blocks until the task has terminated and retrieves a copy of the
    /// result.
    pub fn get(&self) -> Result<T, FutureError> {
        self.completion.wait();
        self.collect()
    }

    /// Like [`get`](Self::get) with an upper bound on the wait.
    ///
    /// A timed-out call leaves the task untouched: retrying with a longer
    /// timeout returns the result normally once the task completes.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, FutureError> {
        if !self.completion.wait_timeout(timeout) {
            return Err(FutureError::Timeout);
        }
        self.collect()
    }

    fn collect(&self) -> Result<T, FutureError> {
        if self.is_cancelled() {
            return Err(FutureError::Cancelled);
        }
        match &*self.outcome.lock() {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(e)) => Err(e.clone()),
            // the latch is set strictly after the slot is filled
            None => Err(FutureError::execution("result slot is empty")),
        }
    }

    /// Sets the cancelled flag.
    ///
    /// Always returns `true`, including when the task already completed, so
    /// racing callers observe a uniform answer. The `may_interrupt_if_running`
    /// hint is not acted upon here; cooperative observers see it through the
    /// token.
    pub fn cancel(&self, _may_interrupt_if_running: bool) -> bool {
        self.token.cancel();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// `true` on any terminal state: completed, failed or executed while
    /// cancelled.
    pub fn is_done(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl<T: Clone + Send> Runnable for FutureTask<T> {
    fn run(&self) {
        FutureTask::run(self);
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicUsize, thread};

    use super::*;

    #[test]
    fn get_returns_the_computed_result_every_time() {
        let task = FutureTask::new(|| Ok("ok".to_string()));
        task.run();
        assert_eq!(task.get().unwrap(), "ok");
        assert_eq!(task.get().unwrap(), "ok");
        assert_eq!(task.get_timeout(Duration::from_millis(1)).unwrap(), "ok");
        assert!(task.is_done());
        assert!(!task.is_cancelled());
    }

    #[test]
    fn get_blocks_until_another_thread_runs_the_task() {
        let task = Arc::new(FutureTask::new(|| Ok(7_u32)));
        let runner = task.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            runner.run();
        });
        assert_eq!(task.get().unwrap(), 7);
        handle.join().unwrap();
    }

    #[test]
    fn error_from_the_task_body_surfaces_as_execution() {
        let task: FutureTask<u32> = FutureTask::new(|| Err("boom".into()));
        task.run();
        match task.get() {
            Err(e @ FutureError::Execution { .. }) => {
                assert_eq!(e.code(), 100004);
                assert!(e.to_string().contains("boom"));
            }
            other => panic!("expected Execution, got {other:?}"),
        }
        assert!(task.is_done());
    }

    #[test]
    fn panic_in_the_task_body_surfaces_as_unexpected_execution() {
        let task: FutureTask<u32> = FutureTask::new(|| panic!("broken"));
        task.run();
        match task.get() {
            Err(FutureError::Execution { message }) => {
                assert!(message.contains("unexpected"));
            }
            other => panic!("expected Execution, got {other:?}"),
        }
    }

    #[test]
    fn cancelled_before_run_still_unblocks_waiters_with_cancelled() {
        let ran = Arc::new(AtomicUsize::new(0));
        let observed = ran.clone();
        let task = FutureTask::new(move || {
            observed.fetch_add(1, Ordering::SeqCst);
            Ok(1_u32)
        });
        assert!(task.cancel(false));
        assert!(task.is_cancelled());
        // run still executes so the latch is set
        task.run();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(task.get(), Err(FutureError::Cancelled));
        assert_eq!(
            task.get_timeout(Duration::from_millis(1)),
            Err(FutureError::Cancelled)
        );
        assert!(task.is_done());
    }

    #[test]
    fn cancel_returns_true_even_after_completion() {
        let task = FutureTask::new(|| Ok(1_u32));
        task.run();
        assert_eq!(task.get().unwrap(), 1);
        assert!(task.cancel(true));
        // the flag takes precedence for later retrievals
        assert_eq!(task.get(), Err(FutureError::Cancelled));
    }

    #[test]
    fn timed_out_get_is_retryable() {
        let task = Arc::new(FutureTask::new(|| {
            thread::sleep(Duration::from_millis(200));
            Ok("ok".to_string())
        }));
        let runner = task.clone();
        let handle = thread::spawn(move || runner.run());

        assert_eq!(
            task.get_timeout(Duration::from_millis(10)),
            Err(FutureError::Timeout)
        );
        assert_eq!(task.get_timeout(Duration::from_secs(5)).unwrap(), "ok");
        assert!(task.is_done());
        assert!(!task.is_cancelled());
        handle.join().unwrap();
    }

    #[test]
    fn run_is_guarded_against_re_entry() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let task = FutureTask::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        task.run();
        task.run();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
