//! Process-wide event loops and connection pool.
//!
//! Servers and clients that are not given their own [`HttpResources`] share
//! the global one. [`HttpResources::shutdown`] disposes it; the next
//! [`HttpResources::get`] starts a fresh set.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use once_cell::sync::Lazy;
use ripple_http::resources::{ConnectionPool, LoopResources, PoolConfig};
use tracing::debug;

use crate::client::PooledConnection;

pub const DEFAULT_LOOP_PREFIX: &str = "ripple-http";

static HTTP_RESOURCES: Lazy<ArcSwapOption<HttpResources>> = Lazy::new(ArcSwapOption::empty);

pub struct HttpResources {
    loops: LoopResources,
    pool: ConnectionPool<PooledConnection>,
}

impl HttpResources {
    pub fn new(loops: LoopResources, pool: PoolConfig) -> Self {
        Self { loops, pool: ConnectionPool::new(pool) }
    }

    /// The shared instance, created on first use or after a [`shutdown`](Self::shutdown).
    pub fn get() -> Arc<HttpResources> {
        if let Some(current) = HTTP_RESOURCES.load_full() {
            return current;
        }

        let fresh = Arc::new(HttpResources::default());
        let previous = HTTP_RESOURCES.compare_and_swap(&None::<Arc<HttpResources>>, Some(Arc::clone(&fresh)));
        match &*previous {
            // someone else won the race; our loops were never started
            Some(winner) => Arc::clone(winner),
            None => {
                debug!(prefix = fresh.loops.prefix(), "created shared http resources");
                fresh
            }
        }
    }

    /// Disposes the shared instance, if any.
    pub fn shutdown() {
        if let Some(resources) = HTTP_RESOURCES.swap(None) {
            debug!(prefix = resources.loops.prefix(), "disposing shared http resources");
            resources.dispose();
        }
    }

    pub fn loops(&self) -> &LoopResources {
        &self.loops
    }

    pub fn pool(&self) -> &ConnectionPool<PooledConnection> {
        &self.pool
    }

    pub fn dispose(&self) {
        self.pool.dispose();
        self.loops.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.loops.is_disposed()
    }
}

impl Default for HttpResources {
    fn default() -> Self {
        Self::new(LoopResources::create(DEFAULT_LOOP_PREFIX), PoolConfig::default())
    }
}

impl fmt::Debug for HttpResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResources").field("loops", &self.loops).field("pool", &self.pool).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_http::resources::LoopKind;

    #[test]
    fn private_resources_dispose_their_loops() {
        let resources = HttpResources::new(LoopResources::new("private", 1, 1, false), PoolConfig::default());
        let group = resources.loops().on_client(LoopKind::Portable).unwrap();

        resources.dispose();
        assert!(resources.is_disposed());
        assert!(group.is_disposed());
        assert!(resources.pool().is_disposed());
    }
}
