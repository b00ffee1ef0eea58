//! Outbound forwarding to the real origin.
//!
//! # Responsibilities
//! - Open an independent TLS connection to the request's destination
//! - Bound dial, handshake and request time separately
//! - Relay the origin response without touching status, headers or body
//!
//! # Design Decisions
//! - One origin connection per forwarded request; nothing is pooled
//! - The request timeout is one deadline for the whole exchange: sending the
//!   request, waiting for headers and streaming the response body back. A
//!   body still incomplete at the deadline fails with `ForwardingError::Timeout`
//! - Failures are returned to the caller and never retried

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::{Body, Frame, SizeHint};
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tokio::time::{sleep_until, timeout, timeout_at, Instant, Sleep};
use tokio_rustls::TlsConnector;

use super::error::ForwardingError;
use super::request::origin_form;
use super::response::{BoxError, ProxyBody};
use crate::config::schema::TimeoutConfig;
use crate::net::tls;

/// Sends a rewritten request to its origin.
///
/// The request URI is absolute (`https://host:port/path?query`).
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn send(&self, request: Request<ProxyBody>) -> Result<Response<ProxyBody>, ForwardingError>;
}

/// Bounds applied to each forwarded request.
#[derive(Debug, Clone, Copy)]
pub struct ForwardTimeouts {
    pub connect: Duration,
    pub handshake: Duration,
    pub request: Duration,
}

impl From<&TimeoutConfig> for ForwardTimeouts {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            connect: config.connect(),
            handshake: config.handshake(),
            request: config.request(),
        }
    }
}

/// HTTPS forwarder over rustls and hyper's HTTP/1.1 client.
#[derive(Clone)]
pub struct Forwarder {
    connector: TlsConnector,
    timeouts: ForwardTimeouts,
}

impl Forwarder {
    pub fn new(client_config: Arc<ClientConfig>, timeouts: ForwardTimeouts) -> Self {
        Self {
            connector: TlsConnector::from(client_config),
            timeouts,
        }
    }
}

#[async_trait]
impl Upstream for Forwarder {
    async fn send(&self, mut request: Request<ProxyBody>) -> Result<Response<ProxyBody>, ForwardingError> {
        let uri = request.uri().clone();
        let host = uri
            .host()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .ok_or_else(|| ForwardingError::Destination(uri.to_string()))?;
        let port = uri.port_u16().unwrap_or(443);
        let addr = format!("{}:{}", uri.host().unwrap_or_default(), port);

        let tcp = timeout(self.timeouts.connect, TcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| ForwardingError::ConnectTimeout(addr.clone()))?
            .map_err(|source| ForwardingError::Connect {
                addr: addr.clone(),
                source,
            })?;
        let _ = tcp.set_nodelay(true);

        let server_name = tls::server_name(&host)?;
        let stream = timeout(self.timeouts.handshake, self.connector.connect(server_name, tcp))
            .await
            .map_err(|_| ForwardingError::HandshakeTimeout)?
            .map_err(ForwardingError::Handshake)?;

        let (mut sender, connection) = hyper::client::conn::http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(false)
            .handshake(TokioIo::new(stream))
            .await
            .map_err(ForwardingError::Request)?;

        let origin = addr.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(origin = %origin, error = %e, "Origin connection closed with error");
            }
        });

        *request.uri_mut() = origin_form(&uri);

        let deadline = Instant::now() + self.timeouts.request;
        let response = timeout_at(deadline, sender.send_request(request))
            .await
            .map_err(|_| ForwardingError::Timeout)?
            .map_err(ForwardingError::Request)?;

        tracing::debug!(origin = %addr, status = %response.status(), "Origin responded");
        Ok(response.map(|body| {
            DeadlineBody::new(body.map_err(BoxError::from).boxed(), deadline).boxed()
        }))
    }
}

/// Origin body bounded by what is left of the request deadline.
struct DeadlineBody {
    inner: ProxyBody,
    deadline: Pin<Box<Sleep>>,
}

impl DeadlineBody {
    fn new(inner: ProxyBody, deadline: Instant) -> Self {
        Self {
            inner,
            deadline: Box::pin(sleep_until(deadline)),
        }
    }
}

impl Body for DeadlineBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        let this = &mut *self;
        if this.deadline.as_mut().poll(cx).is_ready() {
            let err: BoxError = Box::new(ForwardingError::Timeout);
            return Poll::Ready(Some(Err(err)));
        }
        Pin::new(&mut this.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
