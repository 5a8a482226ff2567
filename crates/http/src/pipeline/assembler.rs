use std::fmt;
use std::net::SocketAddr;

use tracing::{debug, trace};

use super::compression::{Compression, CompressionPolicy};
use super::{Pipeline, Stage, keys};
use crate::bootstrap::{AddressSupplier, Bootstrap, Role, TcpOptions, TlsMode};
use crate::channel::ConnectionHooks;
use crate::codec::{
    CodecConfig, DEFAULT_INITIAL_BUFFER_SIZE, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MAX_HEADER_SIZE, DEFAULT_MAX_INITIAL_LINE_LENGTH,
    DEFAULT_VALIDATE_HEADERS,
};
use crate::protocol::ConfigError;
use crate::resources::{EventLoopGroup, LoopKind, LoopResources};

/// Client side exchange behaviour decided at assembly time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeOptions {
    pub follow_redirect: bool,
    pub chunked_transfer: bool,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self { follow_redirect: keys::DEFAULT_FOLLOW_REDIRECT, chunked_transfer: keys::DEFAULT_CHUNKED_TRANSFER }
    }
}

/// Turns a materialized [`Bootstrap`] into an [`Assembly`].
#[derive(Debug, Clone, Copy)]
pub struct PipelineAssembler {
    role: Role,
}

impl PipelineAssembler {
    pub fn server() -> Self {
        Self { role: Role::Server }
    }

    pub fn client() -> Self {
        Self { role: Role::Client }
    }

    /// Assigns event loops, reads and clears every pipeline attribute and
    /// installs the stages with `handler` as the terminal one.
    ///
    /// Fails before any socket is touched when a group is disposed or a
    /// threshold is invalid. The attributes are cleared either way.
    pub fn assemble<H>(&self, bootstrap: &mut Bootstrap, loops: &LoopResources, handler: H) -> Result<Assembly<H>, ConfigError> {
        let attrs = bootstrap.attrs_mut();
        let codec = CodecConfig {
            max_initial_line_length: attrs.get_and_clear(keys::MAX_INITIAL_LINE_LENGTH, DEFAULT_MAX_INITIAL_LINE_LENGTH),
            max_header_size: attrs.get_and_clear(keys::MAX_HEADER_SIZE, DEFAULT_MAX_HEADER_SIZE),
            max_chunk_size: attrs.get_and_clear(keys::MAX_CHUNK_SIZE, DEFAULT_MAX_CHUNK_SIZE),
            validate_headers: attrs.get_and_clear(keys::VALIDATE_HEADERS, DEFAULT_VALIDATE_HEADERS),
            initial_buffer_size: attrs.get_and_clear(keys::INITIAL_BUFFER_SIZE, DEFAULT_INITIAL_BUFFER_SIZE),
        };
        let min_size = attrs.take(keys::COMPRESSION_MIN_SIZE);
        let predicate = attrs.take(keys::COMPRESSION_PREDICATE);
        let accept_compression = attrs.get_and_clear(keys::ACCEPT_COMPRESSION, keys::DEFAULT_ACCEPT_COMPRESSION);
        let options = ExchangeOptions {
            follow_redirect: attrs.get_and_clear(keys::FOLLOW_REDIRECT, keys::DEFAULT_FOLLOW_REDIRECT),
            chunked_transfer: attrs.get_and_clear(keys::CHUNKED_TRANSFER, keys::DEFAULT_CHUNKED_TRANSFER),
        };
        if !attrs.is_empty() {
            trace!(remaining = attrs.len(), "attributes left for the protocol handler");
        }
        let (selector, workers) = self.event_loops(bootstrap, loops)?;
        codec.validate()?;

        let mut pipeline = Pipeline::new();
        if bootstrap.is_wiretap() {
            pipeline.add_last(Stage::Wiretap)?;
        }
        pipeline.add_last(Stage::HttpCodec(codec))?;

        let compression = match self.role {
            Role::Server => CompressionPolicy::new(min_size, predicate).map(Compression::Encode),
            Role::Client => accept_compression.then_some(Compression::Decode),
        };
        if let Some(compression) = compression {
            pipeline.add_last(Stage::Compression(compression))?;
        }
        pipeline.add_last(Stage::ProtocolHandler(handler))?;

        debug!(role = ?self.role, stages = ?pipeline.names(), workers = workers.name(), "pipeline assembled");
        Ok(Assembly {
            role: self.role,
            pipeline,
            selector,
            workers,
            options,
            address: bootstrap.supplier(),
            hooks: bootstrap.hooks().clone(),
            tcp: bootstrap.tcp_options(),
        })
    }

    fn event_loops(&self, bootstrap: &mut Bootstrap, loops: &LoopResources) -> Result<(Option<EventLoopGroup>, EventLoopGroup), ConfigError> {
        let kind = self.loop_kind(bootstrap, loops);
        let (selector, workers) = bootstrap.take_groups();

        let workers = match workers {
            Some(group) => group,
            None => match self.role {
                Role::Server => loops.on_server(kind)?,
                Role::Client => loops.on_client(kind)?,
            },
        };
        let selector = match (self.role, selector) {
            (Role::Server, Some(group)) => Some(group),
            (Role::Server, None) => Some(loops.on_server_select(kind)?),
            (Role::Client, _) => None,
        };

        for group in selector.iter().chain(Some(&workers)) {
            if group.is_disposed() {
                return Err(ConfigError::invalid_group(group.name(), "event loop group has been disposed"));
            }
        }
        Ok((selector, workers))
    }

    fn loop_kind(&self, bootstrap: &Bootstrap, loops: &LoopResources) -> LoopKind {
        let portable_tls = bootstrap.tls_mode() == Some(TlsMode::Portable);
        match bootstrap.loop_kind() {
            Some(LoopKind::Native) if portable_tls => {
                debug!("portable tls requested, native loops are not used");
                LoopKind::Portable
            }
            Some(kind) => kind,
            None if loops.prefers_native() && !portable_tls => LoopKind::Native,
            None => LoopKind::Portable,
        }
    }
}

/// Everything a server or client needs to open connections for one
/// configuration: the pipeline, its event loops and the socket settings.
pub struct Assembly<H> {
    role: Role,
    pipeline: Pipeline<H>,
    selector: Option<EventLoopGroup>,
    workers: EventLoopGroup,
    options: ExchangeOptions,
    address: Option<AddressSupplier>,
    hooks: ConnectionHooks,
    tcp: TcpOptions,
}

impl<H> Assembly<H> {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn pipeline(&self) -> &Pipeline<H> {
        &self.pipeline
    }

    /// The codec configuration; every assembled pipeline has one.
    pub fn codec_config(&self) -> CodecConfig {
        self.pipeline.codec_config().copied().unwrap_or_default()
    }

    /// Only servers have a selector group.
    pub fn selector(&self) -> Option<&EventLoopGroup> {
        self.selector.as_ref()
    }

    pub fn workers(&self) -> &EventLoopGroup {
        &self.workers
    }

    pub fn options(&self) -> ExchangeOptions {
        self.options
    }

    pub fn hooks(&self) -> &ConnectionHooks {
        &self.hooks
    }

    pub fn tcp_options(&self) -> TcpOptions {
        self.tcp
    }

    /// Evaluates the address supplier; called once per bind or connect.
    pub fn resolve_address(&self) -> Result<SocketAddr, ConfigError> {
        let supplier = self.address.as_ref().ok_or_else(|| ConfigError::missing_address("no address configured"))?;
        Ok(supplier()?)
    }
}

impl<H> fmt::Debug for Assembly<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assembly")
            .field("role", &self.role)
            .field("pipeline", &self.pipeline)
            .field("selector", &self.selector)
            .field("workers", &self.workers)
            .field("options", &self.options)
            .field("tcp", &self.tcp)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{CompressionPredicate, StageName};
    use std::sync::Arc;
    use std::time::Duration;

    fn loops() -> LoopResources {
        LoopResources::new("assembler-test", 1, 1, true).with_quiet_period(Duration::ZERO)
    }

    #[test]
    fn server_defaults() {
        let loops = loops();
        let mut bootstrap = Bootstrap::server();
        let assembly = PipelineAssembler::server().assemble(&mut bootstrap, &loops, ()).unwrap();

        assert_eq!(assembly.pipeline().names(), vec![StageName::HttpCodec, StageName::ProtocolHandler]);
        assert_eq!(assembly.codec_config(), CodecConfig::default());
        assert_eq!(assembly.options(), ExchangeOptions::default());
        assert_eq!(assembly.workers().kind(), LoopKind::Native);
        assert!(assembly.selector().is_some());
        loops.dispose();
    }

    #[test]
    fn attributes_are_consumed_once() {
        let loops = loops();
        let mut bootstrap = Bootstrap::server()
            .attr(keys::COMPRESSION_MIN_SIZE, 25)
            .attr(keys::MAX_CHUNK_SIZE, 1024)
            .attr(keys::FOLLOW_REDIRECT, true);

        let assembly = PipelineAssembler::server().assemble(&mut bootstrap, &loops, ()).unwrap();
        assert!(bootstrap.attrs().is_empty());
        assert_eq!(assembly.codec_config().max_chunk_size, 1024);
        assert!(assembly.options().follow_redirect);
        match assembly.pipeline().compression() {
            Some(Compression::Encode(policy)) => assert_eq!(policy.min_size(), Some(25)),
            other => panic!("unexpected compression stage {other:?}"),
        }

        // a second pass over the same carrier sees the defaults
        let again = PipelineAssembler::server().assemble(&mut bootstrap, &loops, ()).unwrap();
        assert!(again.pipeline().compression().is_none());
        assert_eq!(again.codec_config().max_chunk_size, DEFAULT_MAX_CHUNK_SIZE);
        loops.dispose();
    }

    #[test]
    fn predicate_alone_enables_compression() {
        let loops = loops();
        let predicate: CompressionPredicate = Arc::new(|_, _| true);
        let mut bootstrap = Bootstrap::server().attr(keys::COMPRESSION_PREDICATE, predicate);

        let assembly = PipelineAssembler::server().assemble(&mut bootstrap, &loops, ()).unwrap();
        match assembly.pipeline().compression() {
            Some(Compression::Encode(policy)) => assert!(policy.has_predicate() && policy.min_size().is_none()),
            other => panic!("unexpected compression stage {other:?}"),
        }
        loops.dispose();
    }

    #[test]
    fn client_decodes_only_when_asked() {
        let loops = loops();
        let mut plain = Bootstrap::client().attr(keys::COMPRESSION_MIN_SIZE, 0);
        let assembly = PipelineAssembler::client().assemble(&mut plain, &loops, ()).unwrap();
        assert!(assembly.pipeline().compression().is_none());
        assert!(assembly.selector().is_none());

        let mut decoding = Bootstrap::client().attr(keys::ACCEPT_COMPRESSION, true).wiretap(true);
        let assembly = PipelineAssembler::client().assemble(&mut decoding, &loops, ()).unwrap();
        assert_eq!(
            assembly.pipeline().names(),
            vec![StageName::Wiretap, StageName::HttpCodec, StageName::Compression, StageName::ProtocolHandler]
        );
        loops.dispose();
    }

    #[test]
    fn invalid_threshold_fails_assembly() {
        let loops = loops();
        let mut bootstrap = Bootstrap::server().attr(keys::MAX_HEADER_SIZE, 0);
        let err = PipelineAssembler::server().assemble(&mut bootstrap, &loops, ()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThreshold { name: "max_header_size", .. }));
        loops.dispose();
    }

    #[test]
    fn portable_tls_rules_out_native_loops() {
        let loops = loops();
        let mut bootstrap = Bootstrap::client().tls(TlsMode::Portable);
        let assembly = PipelineAssembler::client().assemble(&mut bootstrap, &loops, ()).unwrap();
        assert_eq!(assembly.workers().kind(), LoopKind::Portable);
        loops.dispose();
    }

    #[test]
    fn disposed_group_is_rejected() {
        let group = EventLoopGroup::new("disposed", LoopKind::Portable, 1, Duration::ZERO).unwrap();
        group.dispose();

        let mut bootstrap = Bootstrap::client().group(None, group);
        let err = PipelineAssembler::client().assemble(&mut bootstrap, &loops(), ()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEventLoopGroup { .. }));
    }

    #[test]
    fn disposed_resources_are_rejected() {
        let loops = loops();
        loops.dispose();
        let err = PipelineAssembler::server().assemble(&mut Bootstrap::server(), &loops, ()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEventLoopGroup { .. }));
    }

    #[test]
    fn failed_assembly_still_clears_attributes() {
        let disposed = loops();
        disposed.dispose();
        let mut bootstrap = Bootstrap::server().attr(keys::MAX_CHUNK_SIZE, 1024).attr(keys::FOLLOW_REDIRECT, true);

        let err = PipelineAssembler::server().assemble(&mut bootstrap, &disposed, ()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEventLoopGroup { .. }));
        assert!(bootstrap.attrs().is_empty());

        let fresh = loops();
        let assembly = PipelineAssembler::server().assemble(&mut bootstrap, &fresh, ()).unwrap();
        assert_eq!(assembly.codec_config().max_chunk_size, DEFAULT_MAX_CHUNK_SIZE);
        assert!(!assembly.options().follow_redirect);
        fresh.dispose();
    }
}
