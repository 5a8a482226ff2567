//! Event loops: one current-thread tokio runtime per OS thread.
//!
//! Every connection is spawned on exactly one [`EventLoop`], so its callbacks
//! never run concurrently. Groups hand out loops round-robin and are owned by
//! [`LoopResources`], which creates them lazily and tears them down when the
//! last handle goes away.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use tokio::runtime::{Builder, Handle};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::protocol::ConfigError;

/// Time a stopping loop gives its pending tasks before the runtime is dropped.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_secs(2);

pub const DEFAULT_SELECTOR_COUNT: usize = 1;

/// Lower bound for the default worker count.
pub const MIN_DEFAULT_WORKERS: usize = 4;

/// Which transport implementation a group stands for.
///
/// Both kinds run on tokio; the distinction decides thread naming and is what
/// a TLS marker requiring the portable implementation rules out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopKind {
    Native,
    Portable,
}

impl LoopKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LoopKind::Native => "native",
            LoopKind::Portable => "portable",
        }
    }
}

/// A single-threaded executor owned by an [`EventLoopGroup`].
#[derive(Clone)]
pub struct EventLoop {
    index: usize,
    group: Arc<str>,
    handle: Handle,
    tracker: TaskTracker,
    thread: ThreadId,
}

impl EventLoop {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Whether the caller is already running on this loop's thread.
    pub fn in_event_loop(&self) -> bool {
        thread::current().id() == self.thread
    }

    /// Runs `future` on this loop. Tasks spawned after the group was disposed
    /// are dropped without being polled.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn_on(future, &self.handle)
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop").field("group", &self.group).field("index", &self.index).finish()
    }
}

/// A fixed set of event loops handed out round-robin.
#[derive(Clone)]
pub struct EventLoopGroup {
    inner: Arc<GroupInner>,
}

struct GroupInner {
    name: Arc<str>,
    kind: LoopKind,
    loops: Vec<EventLoop>,
    next: AtomicUsize,
    disposed: AtomicBool,
    stop: CancellationToken,
    terminated: CancellationToken,
}

impl EventLoopGroup {
    /// Starts `count` loop threads named `<name>-<index>`.
    pub fn new(name: &str, kind: LoopKind, count: usize, quiet_period: Duration) -> io::Result<Self> {
        let count = count.max(1);
        let name: Arc<str> = Arc::from(name);
        let stop = CancellationToken::new();
        let terminated = CancellationToken::new();
        let alive = Arc::new(AtomicUsize::new(count));

        let mut loops = Vec::with_capacity(count);
        for index in 0..count {
            let runtime = Builder::new_current_thread().enable_all().thread_name(format!("{name}-{index}")).build()?;
            let handle = runtime.handle().clone();
            let tracker = TaskTracker::new();

            let stop = stop.clone();
            let terminated = terminated.clone();
            let alive = Arc::clone(&alive);
            let loop_tracker = tracker.clone();
            let thread_name = format!("{name}-{index}");
            let worker = thread::Builder::new().name(thread_name.clone()).spawn(move || {
                runtime.block_on(async {
                    stop.cancelled().await;
                    loop_tracker.close();
                    if tokio::time::timeout(quiet_period, loop_tracker.wait()).await.is_err() {
                        warn!(event_loop = %thread_name, pending = loop_tracker.len(), "quiet period elapsed, dropping tasks");
                    }
                });
                drop(runtime);
                debug!(event_loop = %thread_name, "event loop stopped");
                if alive.fetch_sub(1, Ordering::AcqRel) == 1 {
                    terminated.cancel();
                }
            })?;

            loops.push(EventLoop { index, group: Arc::clone(&name), handle, tracker, thread: worker.thread().id() });
        }

        info!(group = %name, kind = kind.as_str(), loops = count, "event loop group started");
        let inner = GroupInner { name, kind, loops, next: AtomicUsize::new(0), disposed: AtomicBool::new(false), stop, terminated };
        Ok(Self { inner: Arc::new(inner) })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> LoopKind {
        self.inner.kind
    }

    pub fn len(&self) -> usize {
        self.inner.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.loops.is_empty()
    }

    /// The next loop in round-robin order.
    pub fn next(&self) -> EventLoop {
        let index = self.inner.next.fetch_add(1, Ordering::Relaxed) % self.inner.loops.len();
        self.inner.loops[index].clone()
    }

    /// The loop whose thread the caller runs on, if any.
    pub fn current(&self) -> Option<EventLoop> {
        self.inner.loops.iter().find(|event_loop| event_loop.in_event_loop()).cloned()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Stops every loop. Pending tasks get the quiet period to finish.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(group = %self.inner.name, "disposing event loop group");
        self.inner.stop.cancel();
    }

    /// Resolves once every loop thread has exited.
    pub fn on_terminated(&self) -> impl Future<Output = ()> + Send + 'static {
        self.inner.terminated.clone().cancelled_owned()
    }
}

impl fmt::Debug for EventLoopGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoopGroup")
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .field("loops", &self.inner.loops.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum GroupRole {
    ServerSelect,
    Server,
    Client,
}

impl GroupRole {
    fn as_str(self) -> &'static str {
        match self {
            GroupRole::ServerSelect => "select",
            GroupRole::Server => "server",
            GroupRole::Client => "client",
        }
    }
}

/// Shared, reference-counted owner of event loop groups.
///
/// Every clone is one reference. Groups are created on first use, once per
/// role and kind. [`dispose`](Self::dispose) or dropping the last reference
/// stops them all.
#[derive(Clone)]
pub struct LoopResources {
    inner: Arc<ResourcesInner>,
}

struct ResourcesInner {
    prefix: String,
    selector_count: usize,
    worker_count: usize,
    prefer_native: bool,
    quiet_period: Duration,
    groups: Mutex<HashMap<(GroupRole, LoopKind), EventLoopGroup>>,
    disposed: AtomicBool,
}

impl LoopResources {
    pub fn new(prefix: &str, selector_count: usize, worker_count: usize, prefer_native: bool) -> Self {
        let inner = ResourcesInner {
            prefix: prefix.to_string(),
            selector_count: selector_count.max(1),
            worker_count: worker_count.max(1),
            prefer_native,
            quiet_period: DEFAULT_QUIET_PERIOD,
            groups: Mutex::new(HashMap::new()),
            disposed: AtomicBool::new(false),
        };
        Self { inner: Arc::new(inner) }
    }

    /// One selector, and a worker per core with at least [`MIN_DEFAULT_WORKERS`].
    pub fn create(prefix: &str) -> Self {
        let workers = thread::available_parallelism().map_or(MIN_DEFAULT_WORKERS, NonZeroUsize::get).max(MIN_DEFAULT_WORKERS);
        Self::new(prefix, DEFAULT_SELECTOR_COUNT, workers, true)
    }

    /// Sets the quiet period of groups created from now on.
    ///
    /// Only takes effect on a handle that has not been cloned yet.
    #[must_use]
    pub fn with_quiet_period(mut self, quiet_period: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.quiet_period = quiet_period;
        }
        self
    }

    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    pub fn prefers_native(&self) -> bool {
        self.inner.prefer_native
    }

    pub fn worker_count(&self) -> usize {
        self.inner.worker_count
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// The group accepting server connections.
    pub fn on_server_select(&self, kind: LoopKind) -> Result<EventLoopGroup, ConfigError> {
        self.group(GroupRole::ServerSelect, kind)
    }

    /// The group running accepted server connections.
    pub fn on_server(&self, kind: LoopKind) -> Result<EventLoopGroup, ConfigError> {
        self.group(GroupRole::Server, kind)
    }

    pub fn on_client(&self, kind: LoopKind) -> Result<EventLoopGroup, ConfigError> {
        self.group(GroupRole::Client, kind)
    }

    fn group(&self, role: GroupRole, kind: LoopKind) -> Result<EventLoopGroup, ConfigError> {
        let name = format!("{}-{}-{}", self.inner.prefix, role.as_str(), kind.as_str());
        if self.is_disposed() {
            return Err(ConfigError::invalid_group(name, "loop resources have been disposed"));
        }

        let mut groups = self.inner.groups.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(group) = groups.get(&(role, kind)) {
            return Ok(group.clone());
        }

        let count = match role {
            GroupRole::ServerSelect => self.inner.selector_count,
            GroupRole::Server | GroupRole::Client => self.inner.worker_count,
        };
        let group = EventLoopGroup::new(&name, kind, count, self.inner.quiet_period)?;
        groups.insert((role, kind), group.clone());
        Ok(group)
    }

    /// Stops every group created so far; later lookups fail.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl ResourcesInner {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let groups = std::mem::take(&mut *self.groups.lock().unwrap_or_else(PoisonError::into_inner));
        info!(prefix = %self.prefix, groups = groups.len(), "disposing loop resources");
        for group in groups.values() {
            group.dispose();
        }
    }
}

impl Drop for ResourcesInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for LoopResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopResources")
            .field("prefix", &self.inner.prefix)
            .field("selectors", &self.inner.selector_count)
            .field("workers", &self.inner.worker_count)
            .field("prefer_native", &self.inner.prefer_native)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
