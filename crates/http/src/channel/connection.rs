use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use super::state::{ConnectionStatus, StateCell};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A handle on one established transport session.
///
/// The bridge that created the connection owns the socket; clones of this
/// handle can observe its state and ask for disposal from any thread.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    id: u64,
    local: Option<SocketAddr>,
    remote: Option<SocketAddr>,
    state: StateCell,
    dispose: CancellationToken,
    force: CancellationToken,
    closed: CancellationToken,
    outbound_done: CancellationToken,
}

impl Connection {
    pub fn new(local: Option<SocketAddr>, remote: Option<SocketAddr>) -> Self {
        Self::with_dispose_token(local, remote, CancellationToken::new())
    }

    /// A connection whose graceful disposal also follows `parent`, e.g. a server shutting down.
    pub fn child_of(local: Option<SocketAddr>, remote: Option<SocketAddr>, parent: &CancellationToken) -> Self {
        Self::with_dispose_token(local, remote, parent.child_token())
    }

    fn with_dispose_token(local: Option<SocketAddr>, remote: Option<SocketAddr>, dispose: CancellationToken) -> Self {
        let inner = Inner {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            local,
            remote,
            state: StateCell::new(),
            dispose,
            force: CancellationToken::new(),
            closed: CancellationToken::new(),
            outbound_done: CancellationToken::new(),
        };
        Self { inner: Arc::new(inner) }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn local_address(&self) -> Option<SocketAddr> {
        self.inner.local
    }

    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.inner.remote
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.get()
    }

    pub fn is_active(&self) -> bool {
        self.status() == ConnectionStatus::Active
    }

    /// Closed, or asked to close.
    pub fn is_disposed(&self) -> bool {
        self.inner.dispose.is_cancelled() || self.status() == ConnectionStatus::Closed
    }

    /// Graceful disposal: writes already accepted are flushed before the socket closes.
    pub fn dispose(&self) {
        self.inner.dispose.cancel();
    }

    /// Immediate disposal: pending writes are dropped.
    pub fn dispose_now(&self) {
        self.inner.force.cancel();
        self.inner.dispose.cancel();
    }

    /// Resolves once the connection reached `Closed`.
    pub fn on_dispose(&self) -> impl Future<Output = ()> + Send + 'static {
        self.inner.closed.clone().cancelled_owned()
    }

    /// Resolves once the outbound side completed or the connection closed.
    pub fn on_outbound_complete(&self) -> impl Future<Output = ()> + Send + 'static {
        self.inner.outbound_done.clone().cancelled_owned()
    }

    pub(crate) fn state(&self) -> &StateCell {
        &self.inner.state
    }

    pub(crate) fn dispose_token(&self) -> &CancellationToken {
        &self.inner.dispose
    }

    pub(crate) fn is_forced(&self) -> bool {
        self.inner.force.is_cancelled()
    }

    pub(crate) fn signal_outbound_complete(&self) {
        self.inner.outbound_done.cancel();
    }

    /// Performs the single terminal transition; `false` if someone else already did.
    pub(crate) fn mark_closed(&self) -> bool {
        if self.inner.state.close() {
            self.inner.outbound_done.cancel();
            self.inner.closed.cancel();
            true
        } else {
            false
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("local", &self.inner.local)
            .field("remote", &self.inner.remote)
            .field("status", &self.status())
            .finish()
    }
}
