//! Request head helpers.
//!
//! A request head is a plain `http::Request<()>`; the body travels separately as
//! payload items.

use http::header::{CONNECTION, EXPECT, UPGRADE};
use http::{HeaderMap, Request, Version};

pub type RequestHead = Request<()>;

/// Whether the client asked for `100 Continue` before sending its body.
pub fn expects_continue(head: &RequestHead) -> bool {
    head.headers()
        .get(EXPECT)
        .is_some_and(|value| value.as_bytes().len() >= 4 && value.as_bytes()[..4].eq_ignore_ascii_case(b"100-"))
}

/// Whether the connection may serve another exchange after this one.
pub fn is_keep_alive(version: Version, headers: &HeaderMap) -> bool {
    let connection = headers.get(CONNECTION).and_then(|v| v.to_str().ok());
    match version {
        Version::HTTP_10 => connection.is_some_and(|v| has_token(v, "keep-alive")),
        _ => !connection.is_some_and(|v| has_token(v, "close")),
    }
}

/// Whether the head asks to switch protocols.
pub fn is_upgrade(headers: &HeaderMap) -> bool {
    headers.contains_key(UPGRADE)
        && headers.get(CONNECTION).and_then(|v| v.to_str().ok()).is_some_and(|v| has_token(v, "upgrade"))
}

fn has_token(value: &str, token: &str) -> bool {
    value.split(',').any(|part| part.trim().eq_ignore_ascii_case(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_alive_defaults_per_version() {
        let mut headers = HeaderMap::new();
        assert!(is_keep_alive(Version::HTTP_11, &headers));
        assert!(!is_keep_alive(Version::HTTP_10, &headers));

        headers.insert(CONNECTION, "Keep-Alive".parse().unwrap());
        assert!(is_keep_alive(Version::HTTP_10, &headers));

        headers.insert(CONNECTION, "close".parse().unwrap());
        assert!(!is_keep_alive(Version::HTTP_11, &headers));
    }

    #[test]
    fn detects_upgrade_and_continue() {
        let req = Request::builder()
            .header(CONNECTION, "keep-alive, Upgrade")
            .header(UPGRADE, "websocket")
            .header(EXPECT, "100-continue")
            .body(())
            .unwrap();

        assert!(is_upgrade(req.headers()));
        assert!(expects_continue(&req));
    }
}
