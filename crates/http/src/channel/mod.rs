//! Connection-lifecycle bridge.
//!
//! [`ChannelOperations`] adapts one framed transport session into a
//! [`Connection`] that moves `Idle -> Active -> (Draining) -> Closed`, a
//! demand-driven [`Inbound`] handle and a bounded [`Outbound`] handle.

mod connection;
mod inbound;
mod operations;
mod outbound;
mod state;
mod upgrade;
mod wiretap;

pub use connection::Connection;
pub use inbound::{Demand, Inbound, InboundSender, inbound};
pub use operations::{ChannelOperations, ConnectionHooks};
pub use outbound::{Outbound, OutboundReceiver, outbound};
pub use state::ConnectionStatus;
pub use upgrade::{OnUpgrade, UpgradeIo, Upgraded};
pub use wiretap::Wiretap;
