//! Immutable HTTP/1.1 server and client configuration on tokio.
//!
//! [`HttpServer`] and [`HttpClient`] are values: every configuration method
//! returns a new one, and nothing touches a socket until
//! [`bind`](HttpServer::bind) or a request's `response*` method is awaited.
//! Both run on the event loops of an [`HttpResources`], the process-wide one
//! unless another is configured.
//!
//! # Example
//!
//! ```no_run
//! use http::{Request, Response};
//! use ripple_http::channel::Inbound;
//! use ripple_http::handler::make_handler;
//! use ripple_web::{HttpClient, HttpServer, ResponseBody};
//! use bytes::Bytes;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let server = HttpServer::create()
//!     .host("127.0.0.1")
//!     .compress_min_size(1024)
//!     .handle(make_handler(|_req: Request<Inbound<Bytes>>| async {
//!         Ok::<_, std::convert::Infallible>(Response::new(ResponseBody::from("hello")))
//!     }))
//!     .bind()
//!     .await?;
//!
//! let (head, body) = HttpClient::create()
//!     .port(server.port())
//!     .compress()
//!     .get()
//!     .uri("/")
//!     .response_single()
//!     .await?;
//! assert_eq!(head.status(), 200);
//! assert_eq!(body, "hello");
//!
//! server.dispose();
//! # Ok(())
//! # }
//! ```

mod body;
mod date;
mod error;
mod resources;

pub mod client;
pub mod server;
pub mod websocket;

pub use body::ResponseBody;
pub use client::{HttpClient, RequestSender, ResponseContent};
pub use date::{DateHandler, DateService};
pub use error::{ClientError, RedirectError, ServerError, WebsocketError};
pub use resources::HttpResources;
pub use server::{DisposableServer, HttpServer};
pub use websocket::WebsocketSession;
