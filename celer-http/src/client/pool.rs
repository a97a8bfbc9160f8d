//! Idle connection pool with keep-alive expiry.

use std::{
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use ahash::AHashMap;
use celer::executor::{CancellationToken, QueuedThreadPool, ScheduledFutureTask, Timer};
use parking_lot::Mutex;

use super::connection::{ConnectionKey, PoolableConnection};

#[derive(Clone, Copy, Debug)]
pub struct PoolConfig {
    /// Idle connections kept at most, across all keys.
    pub max_idle_connections: usize,
    /// How long an idle connection may wait for reuse. Zero disables
    /// pooling entirely: returned connections are closed on the spot.
    pub keep_alive_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_connections: 5,
            keep_alive_timeout: Duration::from_secs(60),
        }
    }
}

/// Holds connections the engine is not using, keyed by scheme/host/port.
///
/// Every adopted connection gets a keep-alive task armed on the engine's
/// worker pool; firing removes exactly that connection. Taking a connection
/// out (or evicting it) cancels its task. When the pool is full, the
/// least-recently-returned idle connection makes room.
///
/// Dropping the pool cancels every armed task without waiting for the
/// timers to fire.
pub struct ConnectionPool<T: PoolableConnection> {
    inner: Arc<Mutex<PoolInner<T>>>,
    executor: Arc<QueuedThreadPool>,
    timer: Timer,
    config: PoolConfig,
}

struct PoolInner<T> {
    idle: AHashMap<ConnectionKey, Vec<Idle<T>>>,
    next_id: u64,
}

struct Idle<T> {
    id: u64,
    conn: T,
    idle_at: Instant,
    task: Arc<ScheduledFutureTask<()>>,
}

impl<T: PoolableConnection> ConnectionPool<T> {
    pub fn new(executor: Arc<QueuedThreadPool>) -> Self {
        Self::with_config(executor, PoolConfig::default())
    }

    pub fn with_config(executor: Arc<QueuedThreadPool>, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                idle: AHashMap::new(),
                next_id: 0,
            })),
            executor,
            timer: Timer::new(),
            config,
        }
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    /// Takes an idle connection matching `key`, most recently returned
    /// first. Its keep-alive task is cancelled; connections found closed
    /// are discarded on the way.
    pub fn acquire(&self, key: &ConnectionKey) -> Option<T> {
        let mut inner = self.inner.lock();
        let found = {
            let list = inner.idle.get_mut(key)?;
            let mut found = None;
            while let Some(idle) = list.pop() {
                idle.task.cancel(false);
                if idle.conn.is_open() {
                    tracing::debug!("reusing idle connection for {key}");
                    found = Some(idle.conn);
                    break;
                }
                tracing::trace!("discarding closed idle connection for {key}");
                idle.conn.close();
            }
            found
        };
        if inner.idle.get(key).is_some_and(Vec::is_empty) {
            inner.idle.remove(key);
        }
        found
    }

    /// Adopts a connection the engine has finished with.
    ///
    /// The connection becomes idle under `key` with a keep-alive deadline;
    /// closed connections and a zero keep-alive configuration drop it
    /// immediately.
    pub fn release(&self, key: ConnectionKey, conn: T) {
        if self.config.keep_alive_timeout.is_zero() || self.config.max_idle_connections == 0 {
            tracing::trace!("connection pooling disabled, closing connection for {key}");
            conn.close();
            return;
        }
        if !conn.is_open() {
            tracing::trace!("returned connection is already closed for {key}");
            return;
        }

        let mut inner = self.inner.lock();
        while inner.total_idle() >= self.config.max_idle_connections {
            inner.evict_least_recently_returned();
        }

        let id = inner.next_id;
        inner.next_id += 1;
        let token = CancellationToken::new();
        let task = Arc::new(ScheduledFutureTask::with_token(
            token.clone(),
            expire_task(Arc::downgrade(&self.inner), key.clone(), id, token),
        ));
        self.timer
            .schedule(task.clone(), self.config.keep_alive_timeout, &self.executor);
        tracing::debug!("pooling idle connection for {key}");
        inner.idle.entry(key).or_default().push(Idle {
            id,
            conn,
            idle_at: Instant::now(),
            task,
        });
    }

    pub fn idle_count(&self) -> usize {
        self.inner.lock().total_idle()
    }

    pub fn idle_count_for(&self, key: &ConnectionKey) -> usize {
        self.inner.lock().idle.get(key).map_or(0, Vec::len)
    }
}

/// Body of one keep-alive task: drop the armed connection if it is still
/// waiting when the deadline fires.
fn expire_task<T: PoolableConnection>(
    pool: Weak<Mutex<PoolInner<T>>>,
    key: ConnectionKey,
    id: u64,
    token: CancellationToken,
) -> impl FnOnce() -> Result<(), celer::error::BoxError> + Send + 'static {
    move || {
        if token.is_cancelled() {
            return Ok(());
        }
        let Some(inner) = pool.upgrade() else {
            return Ok(());
        };
        let mut inner = inner.lock();
        let expired = {
            let Some(list) = inner.idle.get_mut(&key) else {
                return Ok(());
            };
            list.iter()
                .position(|idle| idle.id == id)
                .map(|pos| list.remove(pos))
        };
        if let Some(idle) = expired {
            tracing::debug!("keep-alive expired, dropping idle connection for {key}");
            idle.conn.close();
        }
        if inner.idle.get(&key).is_some_and(Vec::is_empty) {
            inner.idle.remove(&key);
        }
        Ok(())
    }
}

impl<T> PoolInner<T> {
    fn total_idle(&self) -> usize {
        self.idle.values().map(Vec::len).sum()
    }
}

impl<T: PoolableConnection> PoolInner<T> {
    fn evict_least_recently_returned(&mut self) {
        let oldest_key = self
            .idle
            .iter()
            .filter_map(|(key, list)| list.first().map(|idle| (key.clone(), idle.idle_at)))
            .min_by_key(|(_, idle_at)| *idle_at)
            .map(|(key, _)| key);
        let Some(key) = oldest_key else {
            return;
        };
        if let Some(list) = self.idle.get_mut(&key) {
            if !list.is_empty() {
                let idle = list.remove(0);
                idle.task.cancel(false);
                tracing::debug!("pool is full, evicting idle connection for {key}");
                idle.conn.close();
            }
            if list.is_empty() {
                self.idle.remove(&key);
            }
        }
    }
}

impl<T: PoolableConnection> Drop for ConnectionPool<T> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        for (_, list) in inner.idle.drain() {
            for idle in list {
                idle.task.cancel(false);
                idle.conn.close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    #[derive(Clone)]
    struct FakeConn {
        open: Arc<AtomicBool>,
        close_count: Arc<AtomicUsize>,
    }

    impl FakeConn {
        fn new() -> Self {
            Self {
                open: Arc::new(AtomicBool::new(true)),
                close_count: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl PoolableConnection for FakeConn {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        fn close(&self) {
            self.open.store(false, Ordering::SeqCst);
            self.close_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn executor() -> Arc<QueuedThreadPool> {
        Arc::new(QueuedThreadPool::new())
    }

    fn key(host: &str) -> ConnectionKey {
        ConnectionKey::new("http", host.to_string(), 80)
    }

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let started = Instant::now();
        while started.elapsed() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        done()
    }

    #[test]
    fn release_then_acquire_reuses_the_connection() {
        let pool = ConnectionPool::new(executor());
        let conn = FakeConn::new();
        let open = conn.open.clone();
        pool.release(key("a"), conn);
        assert_eq!(pool.idle_count(), 1);

        assert!(pool.acquire(&key("b")).is_none());
        let reused = pool.acquire(&key("a")).expect("idle connection");
        assert!(reused.is_open());
        assert!(open.load(Ordering::SeqCst));
        assert_eq!(pool.idle_count(), 0);
        assert!(pool.acquire(&key("a")).is_none());
    }

    #[test]
    fn full_pool_evicts_the_least_recently_returned_connection() {
        let config = PoolConfig {
            max_idle_connections: 2,
            keep_alive_timeout: Duration::from_secs(60),
        };
        let pool = ConnectionPool::with_config(executor(), config);

        let first = FakeConn::new();
        let first_closed = first.close_count.clone();
        pool.release(key("a"), first);
        std::thread::sleep(Duration::from_millis(5));
        pool.release(key("b"), FakeConn::new());
        std::thread::sleep(Duration::from_millis(5));
        pool.release(key("c"), FakeConn::new());

        assert_eq!(pool.idle_count(), 2);
        assert_eq!(first_closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count_for(&key("a")), 0);
        assert_eq!(pool.idle_count_for(&key("b")), 1);
        assert_eq!(pool.idle_count_for(&key("c")), 1);
    }

    #[test]
    fn idle_connection_expires_by_its_keep_alive_deadline() {
        let config = PoolConfig {
            max_idle_connections: 5,
            keep_alive_timeout: Duration::from_millis(50),
        };
        let exec = executor();
        let pool = ConnectionPool::with_config(exec.clone(), config);
        let conn = FakeConn::new();
        let close_count = conn.close_count.clone();
        pool.release(key("a"), conn);
        assert_eq!(pool.idle_count(), 1);

        assert!(wait_until(Duration::from_secs(2), || pool.idle_count() == 0));
        assert!(wait_until(Duration::from_secs(2), || {
            close_count.load(Ordering::SeqCst) == 1
        }));
        exec.shutdown_and_join_all();
    }

    #[test]
    fn acquire_cancels_the_pending_expiry() {
        let config = PoolConfig {
            max_idle_connections: 5,
            keep_alive_timeout: Duration::from_millis(50),
        };
        let exec = executor();
        let pool = ConnectionPool::with_config(exec.clone(), config);
        let conn = FakeConn::new();
        let close_count = conn.close_count.clone();
        pool.release(key("a"), conn);
        let reused = pool.acquire(&key("a")).expect("idle connection");

        std::thread::sleep(Duration::from_millis(200));
        assert!(reused.is_open());
        assert_eq!(close_count.load(Ordering::SeqCst), 0);
        exec.shutdown_and_join_all();
    }

    #[test]
    fn zero_keep_alive_disables_pooling() {
        let config = PoolConfig {
            max_idle_connections: 5,
            keep_alive_timeout: Duration::ZERO,
        };
        let pool = ConnectionPool::with_config(executor(), config);
        let conn = FakeConn::new();
        let close_count = conn.close_count.clone();
        pool.release(key("a"), conn);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(close_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_capacity_disables_pooling() {
        let config = PoolConfig {
            max_idle_connections: 0,
            keep_alive_timeout: Duration::from_secs(60),
        };
        let pool = ConnectionPool::with_config(executor(), config);
        let conn = FakeConn::new();
        let close_count = conn.close_count.clone();
        pool.release(key("a"), conn);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(close_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closed_connections_are_not_handed_out() {
        let pool = ConnectionPool::new(executor());
        let conn = FakeConn::new();
        let open = conn.open.clone();
        pool.release(key("a"), conn);
        open.store(false, Ordering::SeqCst);

        assert!(pool.acquire(&key("a")).is_none());
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn pool_destruction_is_prompt_with_pending_keep_alive_tasks() {
        let exec = executor();
        let pool = ConnectionPool::new(exec.clone());
        for i in 0..5 {
            pool.release(key(&format!("host-{i}")), FakeConn::new());
        }
        let started = Instant::now();
        drop(pool);
        assert!(started.elapsed() < Duration::from_millis(500));
        exec.shutdown_and_join_all();
    }
}
