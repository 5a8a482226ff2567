//! HTTP date header value management service.
//!
//! Formatting a date on every response is wasteful under load, so the current
//! value is kept in an [`ArcSwap`] and replaced periodically by a background
//! thread. Every response served through [`DateHandler`] gets a `date` header
//! from that cache.

use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::DATE;
use http::{HeaderValue, Request, Response};
use once_cell::sync::Lazy;
use ripple_http::handler::Handler;
use tracing::{trace, warn};

pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_millis(800);

/// Maintains the current HTTP date string.
pub struct DateService {
    current: Arc<ArcSwap<Bytes>>,
}

static DATE_SERVICE: Lazy<DateService> = Lazy::new(|| DateService::with_update_interval(DEFAULT_UPDATE_INTERVAL));

impl DateService {
    /// The process-wide instance, started on first use.
    pub fn get_global_instance() -> &'static DateService {
        &DATE_SERVICE
    }

    /// Starts a service refreshing its value every `update_interval`. The
    /// refresh thread stops once the service is dropped.
    pub fn with_update_interval(update_interval: Duration) -> Self {
        let current = Arc::new(ArcSwap::from_pointee(now()));
        let weak = Arc::downgrade(&current);

        let spawned = thread::Builder::new().name("ripple-date".to_string()).spawn(move || refresh(&weak, update_interval));
        if let Err(e) = spawned {
            warn!(cause = %e, "date refresh thread could not be started, date header will not advance");
        }

        DateService { current }
    }

    /// Provides the current value to `f`.
    pub fn with_http_date<F>(&self, f: F)
    where
        F: FnOnce(HeaderValue),
    {
        let date = self.current.load().as_ref().clone();
        match HeaderValue::from_maybe_shared(date) {
            Ok(value) => f(value),
            Err(e) => warn!(cause = %e, "cached date is not a valid header value"),
        }
    }
}

fn refresh(current: &Weak<ArcSwap<Bytes>>, update_interval: Duration) {
    loop {
        thread::sleep(update_interval);
        let Some(current) = current.upgrade() else {
            trace!("date service dropped, stopping refresh");
            return;
        };
        current.store(Arc::new(now()));
    }
}

fn now() -> Bytes {
    let mut buf = faf_http_date::get_date_buff_no_key();
    faf_http_date::get_date_no_key(&mut buf);
    Bytes::from_owner(buf)
}

/// Adds a `date` header to every response of the wrapped handler, unless the
/// handler set one itself.
#[derive(Debug)]
pub struct DateHandler<H> {
    handler: H,
}

impl<H> DateHandler<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<ReqBody, H> Handler<ReqBody> for DateHandler<H>
where
    ReqBody: Send + 'static,
    H: Handler<ReqBody>,
{
    type RespBody = H::RespBody;
    type Error = H::Error;

    async fn call(&self, req: Request<ReqBody>) -> Result<Response<Self::RespBody>, Self::Error> {
        let mut resp = self.handler.call(req).await?;

        if !resp.headers().contains_key(DATE) {
            DateService::get_global_instance().with_http_date(|date_header_value| {
                resp.headers_mut().insert(DATE, date_header_value);
            });
        }

        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResponseBody;
    use ripple_http::handler::make_handler;
    use std::convert::Infallible;

    #[test]
    fn date_has_imf_fixdate_shape() {
        let mut seen = None;
        DateService::get_global_instance().with_http_date(|value| seen = Some(value));

        let value = seen.unwrap();
        let text = value.to_str().unwrap();
        assert_eq!(text.len(), 29);
        assert!(text.ends_with(" GMT"));
    }

    #[test]
    fn value_is_refreshed() {
        let service = DateService::with_update_interval(Duration::from_millis(10));
        let first = service.current.load_full();
        thread::sleep(Duration::from_millis(50));
        // same formatted second is possible, but the buffer itself was replaced
        assert!(!Arc::ptr_eq(&first, &service.current.load_full()));
    }

    #[tokio::test]
    async fn handler_gets_a_date_header() {
        let handler = DateHandler::new(make_handler(|_req: Request<()>| async {
            Ok::<_, Infallible>(Response::new(ResponseBody::from("hi")))
        }));

        let resp = handler.call(Request::new(())).await.unwrap();
        assert!(resp.headers().contains_key(DATE));
    }

    #[tokio::test]
    async fn explicit_date_header_is_kept() {
        let handler = DateHandler::new(make_handler(|_req: Request<()>| async {
            let mut resp = Response::new(ResponseBody::empty());
            resp.headers_mut().insert(DATE, HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT"));
            Ok::<_, Infallible>(resp)
        }));

        let resp = handler.call(Request::new(())).await.unwrap();
        assert_eq!(resp.headers()[DATE], "Thu, 01 Jan 1970 00:00:00 GMT");
    }
}
