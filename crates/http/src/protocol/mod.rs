//! Protocol level types shared by the codecs, the channel bridge and the
//! connection drivers.
//!
//! - [`Message`], [`PayloadItem`] and [`PayloadSize`] describe what travels over the wire
//! - [`RequestHead`] and [`ResponseHead`] are header-only `http` messages
//! - the error types cover parsing, sending, configuration, hooks, channels and pools

mod message;
pub use message::BoxBody;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHead;
pub use request::expects_continue;
pub use request::is_keep_alive;
pub use request::is_upgrade;

mod response;
pub use response::ResponseHead;
pub use response::response_has_body;

mod error;
pub use error::BoxError;
pub use error::ChannelError;
pub use error::ConfigError;
pub use error::HookError;
pub use error::HttpError;
pub use error::ParseError;
pub use error::PoolError;
pub use error::SendError;
