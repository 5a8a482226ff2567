//! Keyed pool of reusable client connections.
//!
//! Capacity is bounded per remote address with a semaphore: a [`Pooled`]
//! entry holds one permit for as long as it is checked out, whether it came
//! from the idle set or was freshly connected. An address is forgotten once
//! nothing is checked out, idle or waiting for it.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, trace};

use crate::protocol::PoolError;

pub const DEFAULT_MAX_CONNECTIONS: usize = 500;
pub const DEFAULT_MAX_PENDING: usize = 1000;
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(45);

/// Health check applied to an idle entry before it is handed out again.
#[cfg_attr(test, mockall::automock)]
pub trait Reusable {
    fn is_reusable(&self) -> bool;
}

/// What `acquire` does when every permit for an address is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingPolicy {
    /// Wait in a queue holding at most `max_pending` callers.
    Queue { max_pending: usize },
    /// Fail with [`PoolError::Saturated`] right away.
    FailFast,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: usize,
    pub pending: PendingPolicy,
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            pending: PendingPolicy::Queue { max_pending: DEFAULT_MAX_PENDING },
            acquire_timeout: Some(DEFAULT_ACQUIRE_TIMEOUT),
        }
    }
}

struct Slot<T> {
    address: SocketAddr,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<T>>,
    pending: AtomicUsize,
}

impl<T> Slot<T> {
    fn idle(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct PoolInner<T> {
    config: PoolConfig,
    slots: Mutex<HashMap<SocketAddr, Arc<Slot<T>>>>,
    disposed: AtomicBool,
}

impl<T> PoolInner<T> {
    /// Removes `slot` from the map when the caller holds its last handle.
    fn prune(&self, slot: &Arc<Slot<T>>) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let mapped = slots.get(&slot.address).is_some_and(|current| Arc::ptr_eq(current, slot));
        // handles are only cloned under the map lock: one for the map, one for the caller
        if mapped && Arc::strong_count(slot) == 2 && slot.idle().is_empty() {
            slots.remove(&slot.address);
            trace!(address = %slot.address, "forgetting unused pool address");
        }
    }
}

pub struct ConnectionPool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for ConnectionPool<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: Reusable + Send> ConnectionPool<T> {
    pub fn new(config: PoolConfig) -> Self {
        let inner = PoolInner { config, slots: Mutex::new(HashMap::new()), disposed: AtomicBool::new(false) };
        Self { inner: Arc::new(inner) }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Checks out a connection to `address`, reusing a healthy idle one when
    /// possible and calling `connect` otherwise.
    pub async fn acquire<F, Fut>(&self, address: SocketAddr, connect: F) -> Result<Pooled<T>, PoolError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = io::Result<T>>,
    {
        if self.is_disposed() {
            return Err(PoolError::Disposed);
        }

        let slot = self.slot(address);
        let permit = match self.permit(address, &slot).await {
            Ok(permit) => permit,
            Err(e) => {
                self.inner.prune(&slot);
                return Err(e);
            }
        };

        loop {
            let candidate = slot.idle().pop_front();
            match candidate {
                Some(entry) if entry.is_reusable() => {
                    trace!(%address, "reusing pooled connection");
                    return Ok(Pooled::new(entry, true, permit, slot, Arc::clone(&self.inner)));
                }
                Some(_stale) => debug!(%address, "dropping stale pooled connection"),
                None => break,
            }
        }

        let entry = match connect().await {
            Ok(entry) => entry,
            Err(e) => {
                drop(permit);
                self.inner.prune(&slot);
                return Err(e.into());
            }
        };
        trace!(%address, "created pooled connection");
        Ok(Pooled::new(entry, false, permit, slot, Arc::clone(&self.inner)))
    }

    async fn permit(&self, address: SocketAddr, slot: &Arc<Slot<T>>) -> Result<OwnedSemaphorePermit, PoolError> {
        let max_connections = self.inner.config.max_connections;
        match Arc::clone(&slot.permits).try_acquire_owned() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => return Err(PoolError::Disposed),
            Err(TryAcquireError::NoPermits) => {}
        }

        let max_pending = match self.inner.config.pending {
            PendingPolicy::FailFast => 0,
            PendingPolicy::Queue { max_pending } => max_pending,
        };

        let pending = slot.pending.fetch_add(1, Ordering::AcqRel);
        let _pending = PendingGuard(&slot.pending);
        if pending >= max_pending {
            debug!(%address, max_connections, pending, "pool saturated");
            return Err(PoolError::Saturated { address, max_connections, pending });
        }

        let acquire = Arc::clone(&slot.permits).acquire_owned();
        let acquired = match self.inner.config.acquire_timeout {
            Some(timeout) => tokio::time::timeout(timeout, acquire).await.map_err(|_elapsed| PoolError::Timeout { address })?,
            None => acquire.await,
        };
        acquired.map_err(|_closed| PoolError::Disposed)
    }

    fn slot(&self, address: SocketAddr) -> Arc<Slot<T>> {
        let mut slots = self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(address).or_insert_with(|| {
            Arc::new(Slot {
                address,
                permits: Arc::new(Semaphore::new(self.inner.config.max_connections.max(1))),
                idle: Mutex::new(VecDeque::new()),
                pending: AtomicUsize::new(0),
            })
        });
        Arc::clone(slot)
    }

    pub fn idle_count(&self, address: SocketAddr) -> usize {
        let slots = self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(&address).map_or(0, |slot| slot.idle().len())
    }

    /// Number of addresses with live, idle or waiting connections.
    pub fn address_count(&self) -> usize {
        self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Drops every idle connection and fails all waiting and future acquires.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let slots = std::mem::take(&mut *self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner));
        debug!(addresses = slots.len(), "disposing connection pool");
        for slot in slots.values() {
            slot.permits.close();
            slot.idle().clear();
        }
    }
}

impl<T> fmt::Debug for ConnectionPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .field("disposed", &self.inner.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

struct PendingGuard<'a>(&'a AtomicUsize);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A checked-out connection.
///
/// [`release`](Self::release) hands a healthy entry back to the idle set;
/// dropping it, or [`discard`](Self::discard), closes it.
pub struct Pooled<T: Reusable> {
    value: Option<T>,
    reused: bool,
    permit: Option<OwnedSemaphorePermit>,
    slot: Arc<Slot<T>>,
    pool: Arc<PoolInner<T>>,
}

impl<T: Reusable> Pooled<T> {
    fn new(value: T, reused: bool, permit: OwnedSemaphorePermit, slot: Arc<Slot<T>>, pool: Arc<PoolInner<T>>) -> Self {
        Self { value: Some(value), reused, permit: Some(permit), slot, pool }
    }

    /// Whether this entry was served from the idle set.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub fn release(mut self) {
        let Some(value) = self.value.take() else {
            return;
        };
        if value.is_reusable() && !self.pool.disposed.load(Ordering::Acquire) {
            self.slot.idle().push_back(value);
        }
    }

    pub fn discard(mut self) {
        self.value.take();
    }

    /// Detaches the connection from the pool for good, e.g. after a protocol upgrade.
    pub fn into_inner(mut self) -> T {
        self.value.take().unwrap_or_else(|| unreachable!("pooled value taken"))
    }
}

impl<T: Reusable> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // only `release` and `discard` take the value, and both consume `self`
        self.value.as_ref().unwrap_or_else(|| unreachable!("pooled value taken"))
    }
}

impl<T: Reusable> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().unwrap_or_else(|| unreachable!("pooled value taken"))
    }
}

impl<T: Reusable> Drop for Pooled<T> {
    fn drop(&mut self) {
        self.value.take();
        self.permit.take();
        self.pool.prune(&self.slot);
    }
}

impl<T: Reusable> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled").field("reused", &self.reused).finish()
    }
}
