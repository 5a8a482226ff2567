//! Redirect following for the client.
//!
//! A redirect is a 301, 302, 303, 307 or 308 response carrying a `location`.
//! Following stops at the first other response, after [`MAX_REDIRECTS`]
//! hops, or as soon as a location repeats.

use http::header::LOCATION;
use http::uri::PathAndQuery;
use http::{HeaderMap, Method, StatusCode, Uri};

use crate::error::RedirectError;

pub const MAX_REDIRECTS: usize = 5;

pub(crate) fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Whether the next hop is a `GET` without a body instead of a replay.
pub(crate) fn switches_to_get(status: StatusCode, method: &Method) -> bool {
    match status {
        StatusCode::SEE_OTHER => true,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => method != Method::GET && method != Method::HEAD,
        _ => false,
    }
}

/// Resolves a `location` value against the uri that answered with it.
pub(crate) fn resolve_location(base: &Uri, location: &str) -> Result<Uri, RedirectError> {
    let invalid = |reason: String| RedirectError::InvalidLocation { location: location.to_string(), reason };
    let target = location.split('#').next().unwrap_or_default();

    if let Some(rest) = target.strip_prefix("//") {
        let scheme = base.scheme_str().unwrap_or("http");
        return format!("{scheme}://{rest}").parse().map_err(|e: http::uri::InvalidUri| invalid(e.to_string()));
    }
    if target.contains("://") {
        return target.parse().map_err(|e: http::uri::InvalidUri| invalid(e.to_string()));
    }

    let path = if target.starts_with('/') {
        target.to_string()
    } else {
        let base_path = base.path();
        let dir = base_path.rfind('/').map_or("/", |end| &base_path[..=end]);
        format!("{dir}{target}")
    };

    let mut parts = base.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(path).map_err(|e| invalid(e.to_string()))?);
    Uri::from_parts(parts).map_err(|e| invalid(e.to_string()))
}

/// Remembers every uri of one request's redirect chain.
#[derive(Debug)]
pub(crate) struct RedirectTracker {
    current: Uri,
    visited: Vec<Uri>,
    max: usize,
}

impl RedirectTracker {
    pub(crate) fn new(origin: Uri) -> Self {
        Self::with_max(origin, MAX_REDIRECTS)
    }

    pub(crate) fn with_max(origin: Uri, max: usize) -> Self {
        Self { visited: vec![origin.clone()], current: origin, max }
    }

    pub(crate) fn hops(&self) -> usize {
        self.visited.len() - 1
    }

    /// The uri to request next, or `None` when the response is final.
    pub(crate) fn follow(&mut self, status: StatusCode, headers: &HeaderMap) -> Result<Option<Uri>, RedirectError> {
        if !is_redirect(status) {
            return Ok(None);
        }
        let Some(location) = headers.get(LOCATION) else {
            return Ok(None);
        };
        let location = location.to_str().map_err(|e| RedirectError::InvalidLocation {
            location: String::from_utf8_lossy(location.as_bytes()).into_owned(),
            reason: e.to_string(),
        })?;

        let next = resolve_location(&self.current, location)?;

        if self.visited.contains(&next) {
            return Err(RedirectError::Cycle { location: next.to_string() });
        }
        if self.hops() >= self.max {
            return Err(RedirectError::TooManyRedirects { max: self.max, location: next.to_string() });
        }
        self.visited.push(next.clone());
        self.current = next.clone();
        Ok(Some(next))
    }
}
