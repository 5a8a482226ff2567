//! The mutable carrier a configuration chain is materialized into.
//!
//! A [`Bootstrap`] lives for exactly one assembly pass: it is created fresh,
//! threaded through every transform of a [`ConfigChain`](crate::config::ConfigChain)
//! and then consumed by the [`PipelineAssembler`](crate::pipeline::PipelineAssembler).

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::attr::{AttributeKey, AttributeStore};
use crate::channel::ConnectionHooks;
use crate::protocol::ConfigError;
use crate::resources::{EventLoopGroup, LoopKind};

pub const DEFAULT_BACKLOG: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// TLS marker. Only [`TlsMode::Portable`] affects the assembly: it rules out
/// native event loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    Native,
    Portable,
}

/// Evaluated on every bind or connect, so one configuration can target a
/// different address each time.
pub type AddressSupplier = Arc<dyn Fn() -> io::Result<SocketAddr> + Send + Sync>;

/// Socket level options applied when a listener is bound or a stream connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpOptions {
    pub nodelay: bool,
    pub reuse_address: bool,
    pub backlog: u32,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self { nodelay: true, reuse_address: true, backlog: DEFAULT_BACKLOG }
    }
}

pub struct Bootstrap {
    role: Role,
    attrs: AttributeStore,
    selector: Option<EventLoopGroup>,
    workers: Option<EventLoopGroup>,
    channel: Option<LoopKind>,
    address: Option<AddressSupplier>,
    wiretap: bool,
    tls: Option<TlsMode>,
    connection_hooks: ConnectionHooks,
    tcp: TcpOptions,
}

impl Bootstrap {
    fn new(role: Role) -> Self {
        Self {
            role,
            attrs: AttributeStore::new(),
            selector: None,
            workers: None,
            channel: None,
            address: None,
            wiretap: false,
            tls: None,
            connection_hooks: ConnectionHooks::new(),
            tcp: TcpOptions::default(),
        }
    }

    pub fn server() -> Self {
        Self::new(Role::Server)
    }

    pub fn client() -> Self {
        Self::new(Role::Client)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn attr<T: Send + Sync + 'static>(mut self, key: AttributeKey<T>, value: T) -> Self {
        self.attrs.set(key, value);
        self
    }

    pub fn attrs(&self) -> &AttributeStore {
        &self.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut AttributeStore {
        &mut self.attrs
    }

    /// Pins the event loops; `selector` is only used by servers.
    #[must_use]
    pub fn group(mut self, selector: Option<EventLoopGroup>, workers: EventLoopGroup) -> Self {
        self.selector = selector;
        self.workers = Some(workers);
        self
    }

    pub fn selector_group(&self) -> Option<&EventLoopGroup> {
        self.selector.as_ref()
    }

    pub fn worker_group(&self) -> Option<&EventLoopGroup> {
        self.workers.as_ref()
    }

    #[must_use]
    pub fn channel(mut self, kind: LoopKind) -> Self {
        self.channel = Some(kind);
        self
    }

    pub fn loop_kind(&self) -> Option<LoopKind> {
        self.channel
    }

    #[must_use]
    pub fn address<F>(mut self, supplier: F) -> Self
    where
        F: Fn() -> io::Result<SocketAddr> + Send + Sync + 'static,
    {
        self.address = Some(Arc::new(supplier));
        self
    }

    #[must_use]
    pub fn address_supplier(mut self, supplier: AddressSupplier) -> Self {
        self.address = Some(supplier);
        self
    }

    pub fn has_address(&self) -> bool {
        self.address.is_some()
    }

    pub(crate) fn supplier(&self) -> Option<AddressSupplier> {
        self.address.clone()
    }

    /// Evaluates the address supplier.
    pub fn resolve_address(&self) -> Result<SocketAddr, ConfigError> {
        let supplier = self.address.as_ref().ok_or_else(|| ConfigError::missing_address("no address configured"))?;
        Ok(supplier()?)
    }

    #[must_use]
    pub fn wiretap(mut self, enabled: bool) -> Self {
        self.wiretap = enabled;
        self
    }

    pub fn is_wiretap(&self) -> bool {
        self.wiretap
    }

    #[must_use]
    pub fn tls(mut self, mode: TlsMode) -> Self {
        self.tls = Some(mode);
        self
    }

    pub fn tls_mode(&self) -> Option<TlsMode> {
        self.tls
    }

    /// Adds connection hooks nested inside the ones already registered.
    #[must_use]
    pub fn connection_hooks(mut self, hooks: &ConnectionHooks) -> Self {
        self.connection_hooks = self.connection_hooks.concat(hooks);
        self
    }

    pub fn hooks(&self) -> &ConnectionHooks {
        &self.connection_hooks
    }

    #[must_use]
    pub fn tcp<F>(mut self, configure: F) -> Self
    where
        F: FnOnce(TcpOptions) -> TcpOptions,
    {
        self.tcp = configure(self.tcp);
        self
    }

    pub fn tcp_options(&self) -> TcpOptions {
        self.tcp
    }

    pub(crate) fn take_groups(&mut self) -> (Option<EventLoopGroup>, Option<EventLoopGroup>) {
        (self.selector.take(), self.workers.take())
    }
}

impl fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrap")
            .field("role", &self.role)
            .field("attrs", &self.attrs)
            .field("selector", &self.selector)
            .field("workers", &self.workers)
            .field("channel", &self.channel)
            .field("address", &self.address.is_some())
            .field("wiretap", &self.wiretap)
            .field("tls", &self.tls)
            .field("connection_hooks", &self.connection_hooks)
            .field("tcp", &self.tcp)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU16, Ordering};

    #[test]
    fn missing_address_is_a_config_error() {
        let err = Bootstrap::client().resolve_address().unwrap_err();
        assert!(matches!(err, ConfigError::MissingAddress { .. }));
    }

    #[test]
    fn supplier_is_evaluated_per_resolve() {
        let port = Arc::new(AtomicU16::new(9000));
        let next = Arc::clone(&port);
        let bootstrap = Bootstrap::client().address(move || Ok(SocketAddr::from(([127, 0, 0, 1], next.fetch_add(1, Ordering::SeqCst)))));

        assert_eq!(bootstrap.resolve_address().unwrap().port(), 9000);
        assert_eq!(bootstrap.resolve_address().unwrap().port(), 9001);
    }

    #[test]
    fn failing_supplier_surfaces_io_error() {
        let bootstrap = Bootstrap::client().address(|| Err(io::Error::new(io::ErrorKind::NotFound, "no such host")));
        assert!(matches!(bootstrap.resolve_address(), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn connection_hooks_accumulate() {
        let first = ConnectionHooks::new().with_before(|_, _| Ok(()));
        let second = ConnectionHooks::new().with_after(|_, _| Ok(()));
        let bootstrap = Bootstrap::server().connection_hooks(&first).connection_hooks(&second);
        assert_eq!(bootstrap.hooks().len(), 2);
    }

    #[test]
    fn tcp_options_are_transformed() {
        let bootstrap = Bootstrap::server().tcp(|options| TcpOptions { backlog: 16, ..options });
        assert_eq!(bootstrap.tcp_options(), TcpOptions { backlog: 16, ..TcpOptions::default() });
    }
}
