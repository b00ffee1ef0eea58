//! Response construction for statuses the proxy writes itself.
//!
//! # Design Decisions
//! - Bodies are short plain text, never structured
//! - Origin responses are relayed as-is; nothing here touches them
//! - Responses that end a tunnel carry `Connection: close`

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::header::{HeaderValue, CONNECTION, CONTENT_TYPE};
use hyper::{Response, StatusCode};

/// Error carried by a [`ProxyBody`]: a read failure on either side, or an
/// expired request deadline on a relayed origin body.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type used on both sides of the proxy.
pub type ProxyBody = BoxBody<Bytes, BoxError>;

pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

pub fn full(content: impl Into<Bytes>) -> ProxyBody {
    Full::new(content.into())
        .map_err(|never| match never {})
        .boxed()
}

/// A status line with a short text body.
pub fn text(status: StatusCode, message: &'static str) -> Response<ProxyBody> {
    let mut response = Response::new(full(message));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

/// Like [`text`], and asks the peer to close the connection afterwards.
pub fn closing(status: StatusCode, message: &'static str) -> Response<ProxyBody> {
    let mut response = text(status, message);
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

/// `200` with no body, the reply that opens a CONNECT tunnel.
pub fn tunnel_established() -> Response<ProxyBody> {
    Response::new(empty())
}

pub fn too_many_requests() -> Response<ProxyBody> {
    text(StatusCode::TOO_MANY_REQUESTS, "Too many requests")
}

pub fn internal_error() -> Response<ProxyBody> {
    text(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

pub fn method_not_allowed() -> Response<ProxyBody> {
    let mut response = text(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    response
        .headers_mut()
        .insert(hyper::header::ALLOW, HeaderValue::from_static("CONNECT"));
    response
}
