//! Response head helpers.

use http::{Method, Response, StatusCode};

pub type ResponseHead = Response<()>;

/// Whether a response to `method` with `status` carries a payload.
pub fn response_has_body(method: &Method, status: StatusCode) -> bool {
    if method == Method::HEAD {
        return false;
    }
    !(status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED)
}
