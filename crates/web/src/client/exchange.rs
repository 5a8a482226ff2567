//! One request/response exchange, run on the event loop owning the connection.
//!
//! The caller gets the response head as soon as it arrives. The body stays on
//! the connection until the caller says what to do with it through a
//! [`Disposition`]: stream it, skip it, or take the connection over after a
//! protocol switch. A caller that goes away counts as skipping it.

use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::CONTENT_LENGTH;
use http::{Request, StatusCode};
use http_body::SizeHint;
use http_body_util::BodyExt;
use ripple_http::channel::{Connection, Inbound, InboundSender, Outbound, Upgraded, inbound, outbound};
use ripple_http::hooks::LifecycleHooks;
use ripple_http::protocol::{BoxBody, BoxError, ChannelError, RequestHead, ResponseHead};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use super::connect::Lease;
use crate::error::ClientError;

/// Produces a request body through an [`Outbound`] once the connection is known.
pub(crate) type Writer = Box<dyn FnOnce(&mut RequestHead, Outbound) -> BoxFuture<'static, Result<(), ChannelError>> + Send>;

pub(crate) enum Outgoing {
    Body(BoxBody),
    Writer(Writer),
}

pub(crate) enum Disposition {
    Consume(InboundSender<Bytes>),
    Discard,
    Upgrade(oneshot::Sender<Upgraded>),
}

#[derive(Clone, Default)]
pub(crate) struct ExchangeHooks {
    pub(crate) request: LifecycleHooks<RequestHead>,
    pub(crate) response: LifecycleHooks<ResponseHead>,
}

/// A response head whose body is still on the connection.
pub(crate) struct Delivered {
    pub(crate) head: ResponseHead,
    pub(crate) connection: Connection,
    disposition: oneshot::Sender<Disposition>,
}

impl Delivered {
    /// Leaves the body to be drained in the background.
    pub(crate) fn into_head(self) -> ResponseHead {
        let _ = self.disposition.send(Disposition::Discard);
        self.head
    }

    pub(crate) fn discard(self) {
        let _ = self.disposition.send(Disposition::Discard);
    }

    /// The body as a demand-driven stream.
    pub(crate) fn consume(self) -> (ResponseHead, Connection, Inbound<Bytes>) {
        let (sender, body) = inbound();
        let size_hint = self
            .head
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .map_or_else(SizeHint::new, SizeHint::with_exact);
        let _ = self.disposition.send(Disposition::Consume(sender));
        (self.head, self.connection, body.with_size_hint(size_hint))
    }

    /// The raw connection after `101 Switching Protocols`.
    pub(crate) async fn upgrade(self) -> Result<(ResponseHead, Upgraded), ChannelError> {
        let (tx, rx) = oneshot::channel();
        if self.disposition.send(Disposition::Upgrade(tx)).is_err() {
            return Err(ChannelError::Closed);
        }
        let upgraded = rx.await.map_err(|_dropped| ChannelError::Closed)?;
        Ok((self.head, upgraded))
    }
}

/// Runs `request` on the leased connection's loop and waits for the response head.
pub(crate) async fn dispatch(lease: Lease, request: Request<Outgoing>, chunked: bool, hooks: ExchangeHooks) -> Result<Delivered, ClientError> {
    let (head_tx, head_rx) = oneshot::channel();
    let (disposition_tx, disposition_rx) = oneshot::channel();

    let event_loop = lease.event_loop().clone();
    event_loop.spawn(run(lease, request, chunked, hooks, head_tx, disposition_rx));

    // a disposed loop drops the task without running it
    let (head, connection) = head_rx.await.map_err(|_dropped| ChannelError::Closed)??;
    Ok(Delivered { head, connection, disposition: disposition_tx })
}

type HeadReply = Result<(ResponseHead, Connection), ClientError>;

async fn run(
    mut lease: Lease,
    request: Request<Outgoing>,
    chunked: bool,
    hooks: ExchangeHooks,
    head_tx: oneshot::Sender<HeadReply>,
    disposition: oneshot::Receiver<Disposition>,
) {
    let (head, connection) = match exchange_head(&mut lease, request, chunked, &hooks).await {
        Ok(received) => received,
        Err(e) => {
            let _ = head_tx.send(Err(e));
            lease.finish(false).await;
            return;
        }
    };

    let status = head.status();
    let snapshot = copy_response_head(&head);
    if head_tx.send(Ok((head, connection.clone()))).is_err() {
        trace!(connection_id = connection.id(), "response receiver went away");
    }

    let outcome = match disposition.await {
        Ok(Disposition::Consume(sender)) => lease.get_mut().conn.pump_body(sender).await,
        Ok(Disposition::Upgrade(slot)) => {
            let upgraded = lease.into_inner().conn.into_upgraded();
            if slot.send(upgraded).is_err() {
                debug!(connection_id = connection.id(), "upgrade receiver went away");
            }
            return;
        }
        Ok(Disposition::Discard) | Err(_) => lease.get_mut().conn.discard_body().await,
    };

    if let Err(e) = &outcome {
        debug!(connection_id = connection.id(), cause = %e, "response body failed");
    }
    if let Err(e) = hooks.response.fire_after("after_response", &snapshot, &connection) {
        warn!(connection_id = connection.id(), cause = %e, "after response hook failed");
    }
    lease.finish(outcome.is_ok() && status != StatusCode::SWITCHING_PROTOCOLS).await;
}

async fn exchange_head(lease: &mut Lease, request: Request<Outgoing>, chunked: bool, hooks: &ExchangeHooks) -> HeadReply {
    let conn = &mut lease.get_mut().conn;
    let connection = conn.connection().clone();

    let (parts, outgoing) = request.into_parts();
    let mut head = Request::from_parts(parts, ());
    let (body, writing) = match outgoing {
        Outgoing::Body(body) => (body, None),
        Outgoing::Writer(write) => {
            let (outbound, receiver) = outbound(connection.clone());
            let writing = write(&mut head, outbound);
            (receiver.map_err(BoxError::from).boxed_unsync(), Some(writing))
        }
    };

    hooks.request.fire_before("on_request", &head, &connection)?;
    let snapshot = copy_request_head(&head);
    let request = head.map(|()| body);

    match writing {
        Some(writing) => {
            let (sent, written) = tokio::join!(conn.send_request(request, chunked), writing);
            sent?;
            written?;
        }
        None => conn.send_request(request, chunked).await?,
    }
    hooks.request.fire_after("after_request", &snapshot, &connection)?;

    let (head, _size) = conn.receive_head().await?;
    hooks.response.fire_before("on_response", &head, &connection)?;
    Ok((head, connection))
}

fn copy_request_head(head: &RequestHead) -> RequestHead {
    let mut copy = Request::new(());
    *copy.method_mut() = head.method().clone();
    *copy.uri_mut() = head.uri().clone();
    *copy.version_mut() = head.version();
    *copy.headers_mut() = head.headers().clone();
    copy
}

pub(crate) fn copy_response_head(head: &ResponseHead) -> ResponseHead {
    let mut copy = http::Response::new(());
    *copy.status_mut() = head.status();
    *copy.version_mut() = head.version();
    *copy.headers_mut() = head.headers().clone();
    copy
}
