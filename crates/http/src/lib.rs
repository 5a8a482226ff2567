//! Deferred configuration and connection lifecycle for HTTP/1.1 on tokio.
//!
//! This crate is the engine underneath `ripple-web`. It does not expose a
//! server or client by itself; it provides the pieces those are assembled from:
//!
//! - [`config`]: immutable configuration chains, materialized against a fresh
//!   [`bootstrap::Bootstrap`] right before bind or connect
//! - [`attr`]: typed attributes that carry late-bound decisions through exactly
//!   one assembly pass
//! - [`pipeline`]: the assembler that reads those attributes and installs the
//!   wiretap, codec, compression and protocol-handler stages in order
//! - [`channel`]: the bridge between one framed socket and a [`channel::Connection`]
//!   with demand-driven inbound and bounded outbound handles
//! - [`resources`]: event loop groups and the keyed connection pool
//! - [`hooks`]: composable before/after lifecycle callbacks
//! - [`codec`]: the HTTP/1.1 wire codec for both ends
//! - [`connection`]: the per-connection server and client drivers
//!
//! # Example
//!
//! ```no_run
//! use ripple_http::bootstrap::Bootstrap;
//! use ripple_http::config::ConfigChain;
//! use ripple_http::pipeline::{PipelineAssembler, keys};
//! use ripple_http::resources::LoopResources;
//!
//! # fn main() -> Result<(), ripple_http::protocol::ConfigError> {
//! let chain = ConfigChain::new()
//!     .map(|b| b.attr(keys::COMPRESSION_MIN_SIZE, 1024))
//!     .map(|b| b.wiretap(true));
//!
//! let mut bootstrap = chain.materialize(Bootstrap::server())?;
//! let loops = LoopResources::create("example");
//! let assembly = PipelineAssembler::server().assemble(&mut bootstrap, &loops, ())?;
//! assert_eq!(assembly.pipeline().names().len(), 4);
//! # Ok(())
//! # }
//! ```
//!
//! # Limitations
//!
//! - HTTP/1.1 only
//! - TLS is only a marker that influences event loop selection
//! - Maximum number of headers: 64

pub mod attr;
pub mod bootstrap;
pub mod channel;
pub mod codec;
pub mod config;
pub mod connection;
pub mod handler;
pub mod hooks;
pub mod pipeline;
pub mod protocol;
pub mod resources;

mod utils;
pub(crate) use utils::ensure;
