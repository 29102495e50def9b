use core::time::Duration;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::{
    runtime::Handle,
    sync::Notify,
    time::{Instant, sleep},
};
use tracing::{debug, trace};

use crate::{
    address::Address,
    connection::Connection,
    error::Error,
    route::{Route, RouteDatabase},
    timeout::Select,
};

/// Bounded registry of connections shared by calls.
///
/// Pool is a reference counted handle. Cloning it shares the same connections and it can be shared
/// between multiple clients. Idle connections beyond `max_idle_connections` or idle longer than
/// `keep_alive` are closed by a background task spawned on the current tokio runtime.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    max_idle: usize,
    keep_alive: Duration,
    state: Mutex<PoolState>,
    route_database: RouteDatabase,
    wake: Arc<Notify>,
}

#[derive(Default)]
struct PoolState {
    conns: Vec<Arc<Connection>>,
    cleanup_running: bool,
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::with_limits(5, Duration::from_secs(5 * 60))
    }
}

impl ConnectionPool {
    /// construct a pool keeping at most `max_idle_connections` idle connections for `keep_alive`.
    pub fn new(max_idle_connections: usize, keep_alive: Duration) -> Result<Self, Error> {
        if keep_alive.is_zero() {
            return Err(Error::Std("connection pool keep alive must be positive".into()));
        }
        Ok(Self::with_limits(max_idle_connections, keep_alive))
    }

    fn with_limits(max_idle: usize, keep_alive: Duration) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                max_idle,
                keep_alive,
                state: Mutex::new(PoolState::default()),
                route_database: RouteDatabase::default(),
                wake: Arc::new(Notify::new()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn idle_connection_count(&self) -> usize {
        self.state()
            .conns
            .iter()
            .filter(|c| c.idle_since().is_some())
            .count()
    }

    pub fn connection_count(&self) -> usize {
        self.state().conns.len()
    }

    /// registry of recently failed routes shared by every call using this pool.
    pub fn route_database(&self) -> &RouteDatabase {
        &self.inner.route_database
    }

    /// close and remove every idle connection. connections in use are left alone.
    pub fn evict_all(&self) {
        let evicted = {
            let mut state = self.state();
            let (idle, in_use) = state.conns.drain(..).partition(|c| c.idle_since().is_some());
            state.conns = in_use;
            idle
        };
        shutdown_all(evicted);
    }

    /// find a pooled connection able to carry an exchange of given address and allocate a stream on it.
    pub(crate) fn get(&self, address: &Address, routes: Option<&[Route]>, require_multiplexed: bool) -> Option<Arc<Connection>> {
        let now = Instant::now();
        let state = self.state();
        state
            .conns
            .iter()
            .filter(|c| !require_multiplexed || c.is_multiplexed())
            .filter(|c| c.idle_since().is_none_or(|since| now.duration_since(since) < self.inner.keep_alive))
            .find(|c| c.try_acquire(address, routes))
            .cloned()
    }

    /// admit a newly established connection. the caller holds an allocation on it.
    pub(crate) fn put(&self, conn: Arc<Connection>) {
        let mut state = self.state();
        state.conns.push(conn);
        let evicted = self.trim_idle(&mut state);
        self.ensure_cleanup(&mut state);
        drop(state);
        shutdown_all(evicted);
    }

    /// admit a newly established connection unless another call just pooled a multiplexed connection
    /// for the same address. in that case the pooled one is allocated and returned and the caller
    /// must close its own.
    pub(crate) fn deduplicate(
        &self,
        own: Arc<Connection>,
        address: &Address,
        routes: Option<&[Route]>,
    ) -> Arc<Connection> {
        let mut state = self.state();

        if own.is_multiplexed() {
            let pooled = state
                .conns
                .iter()
                .filter(|c| c.is_multiplexed() && c.is_healthy())
                .find(|c| c.try_acquire(address, routes))
                .cloned();
            if let Some(pooled) = pooled {
                trace!(target: "pool", "adopt {pooled:?} over freshly connected {own:?}");
                return pooled;
            }
        }

        state.conns.push(own.clone());
        let evicted = self.trim_idle(&mut state);
        self.ensure_cleanup(&mut state);
        drop(state);
        shutdown_all(evicted);
        own
    }

    /// connection released its last allocation. return true when it's removed from pool and must be
    /// closed by caller.
    pub(crate) fn connection_became_idle(&self, conn: &Arc<Connection>) -> bool {
        let mut state = self.state();

        if conn.is_no_new_streams() || self.inner.max_idle == 0 {
            state.conns.retain(|c| !Arc::ptr_eq(c, conn));
            return true;
        }

        let evicted = self.trim_idle(&mut state);
        self.ensure_cleanup(&mut state);
        drop(state);

        let removed = evicted.iter().any(|c| Arc::ptr_eq(c, conn));
        shutdown_all(evicted.into_iter().filter(|c| !Arc::ptr_eq(c, conn)));
        removed
    }

    /// Evict idle connections expired at `now`, then evict least recently used idle connections
    /// beyond the idle limit.
    ///
    /// Return the duration until the next connection expires. `None` when pool is empty.
    pub fn cleanup(&self, now: Instant) -> Option<Duration> {
        let keep_alive = self.inner.keep_alive;

        let (evicted, next) = {
            let mut state = self.state();

            let (expired, kept) = state.conns.drain(..).partition::<Vec<_>, _>(|c| {
                c.idle_since()
                    .is_some_and(|since| c.is_no_new_streams() || now.duration_since(since) >= keep_alive)
            });
            state.conns = kept;

            let mut evicted = expired;
            evicted.extend(self.trim_idle(&mut state));

            let next = if state.conns.is_empty() {
                state.cleanup_running = false;
                None
            } else {
                let longest_idle = state
                    .conns
                    .iter()
                    .filter_map(|c| c.idle_since())
                    .map(|since| now.duration_since(since))
                    .max()
                    .unwrap_or_default();
                Some(keep_alive.saturating_sub(longest_idle))
            };

            (evicted, next)
        };

        if !evicted.is_empty() {
            debug!(target: "pool", "evict {} connection(s)", evicted.len());
        }
        shutdown_all(evicted);

        next
    }

    fn trim_idle(&self, state: &mut PoolState) -> Vec<Arc<Connection>> {
        let mut evicted = Vec::new();
        loop {
            let mut idle = state
                .conns
                .iter()
                .enumerate()
                .filter_map(|(i, c)| c.idle_since().map(|since| (i, since)));

            let Some(first) = idle.next() else { break };
            let (count, oldest) = idle.fold((1, first), |(count, oldest), next| {
                (count + 1, if next.1 < oldest.1 { next } else { oldest })
            });

            if count <= self.inner.max_idle {
                break;
            }

            evicted.push(state.conns.remove(oldest.0));
        }
        evicted
    }

    fn ensure_cleanup(&self, state: &mut PoolState) {
        if state.cleanup_running {
            self.inner.wake.notify_one();
            return;
        }

        let Ok(handle) = Handle::try_current() else {
            return;
        };

        state.cleanup_running = true;

        let pool = Arc::downgrade(&self.inner);
        let wake = self.inner.wake.clone();
        handle.spawn(cleanup_task(pool, wake));
    }
}

async fn cleanup_task(pool: Weak<PoolInner>, wake: Arc<Notify>) {
    loop {
        let Some(inner) = pool.upgrade() else { return };
        let Some(wait) = (ConnectionPool { inner }).cleanup(Instant::now()) else {
            return;
        };
        // wake early when connection is released or admitted.
        let _ = wake.notified().select(sleep(wait)).await;
    }
}

fn shutdown_all(conns: impl IntoIterator<Item = Arc<Connection>>) {
    for conn in conns {
        trace!(target: "pool", "close {conn:?}");
        conn.shutdown();
    }
}
