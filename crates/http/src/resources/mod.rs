//! Shared transport resources: event loop groups and the connection pool.

mod loops;
mod pool;

pub use loops::{DEFAULT_QUIET_PERIOD, DEFAULT_SELECTOR_COUNT, EventLoop, EventLoopGroup, LoopKind, LoopResources, MIN_DEFAULT_WORKERS};
pub use pool::{
    ConnectionPool, DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_PENDING, PendingPolicy, PoolConfig, Pooled, Reusable,
};
