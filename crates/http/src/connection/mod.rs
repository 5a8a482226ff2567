//! Per-connection HTTP/1.1 drivers.
//!
//! - [`ServerConnection`] serves requests on an accepted socket, one exchange
//!   at a time, with keep-alive, `100-continue`, optional response
//!   compression and protocol upgrades
//! - [`ClientConnection`] runs exchanges on a connected socket and reports
//!   whether it can go back to the pool
//!
//! Both read request or response bodies only as fast as their consumer asks
//! for them.

mod client;
mod pump;
mod server;

pub use client::ClientConnection;
pub use server::ServerConnection;
