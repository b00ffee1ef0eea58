//! Interception of one CONNECT tunnel.
//!
//! # Responsibilities
//! - Take over the upgraded client socket once `200` has been sent
//! - Terminate the client's TLS with the tunnel's own leaf certificate
//! - Serve the decrypted HTTP/1.1 stream request by request through the pipeline
//!
//! # Design Decisions
//! - Requests on one tunnel are answered strictly in the order they arrive
//! - A clean end of stream closes the tunnel normally
//! - Handshake and read failures end only this tunnel and are never retried
//! - Origin response headers pass through unchanged; hyper adds no `Date`

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::upgrade::Upgraded;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio_rustls::TlsAcceptor;

use super::error::ProxyError;
use super::pipeline::RequestPipeline;
use super::request::ConnectTarget;
use super::response::BoxError;
use crate::auth::TunnelContext;
use crate::authority::LeafCertificate;
use crate::net::connection::TunnelState;

/// Everything a hijacked tunnel needs, owned by its task.
pub struct Tunnel {
    pub context: Arc<TunnelContext>,
    pub target: Arc<ConnectTarget>,
    pub leaf: LeafCertificate,
    pub pipeline: Arc<RequestPipeline>,
    pub handshake_timeout: Duration,
}

impl Tunnel {
    /// Run the tunnel on the upgraded socket until the client is done.
    pub async fn run(self, upgraded: Upgraded) -> Result<(), ProxyError> {
        let acceptor = TlsAcceptor::from(self.leaf.server_config()?);

        let tls_stream = tokio::time::timeout(
            self.handshake_timeout,
            acceptor.accept(TokioIo::new(upgraded)),
        )
        .await
        .map_err(|_| ProxyError::HandshakeTimeout)?
        .map_err(ProxyError::Handshake)?;

        // The leaf is only needed for the handshake.
        drop(acceptor);
        tracing::debug!(
            state = %TunnelState::Established,
            hostnames = ?self.leaf.hostnames,
            "Client TLS established"
        );

        let context = self.context;
        let target = self.target;
        let pipeline = self.pipeline;
        let service = service_fn(move |request: Request<Incoming>| {
            let context = Arc::clone(&context);
            let target = Arc::clone(&target);
            let pipeline = Arc::clone(&pipeline);
            async move {
                let request = request.map(|body| body.map_err(BoxError::from).boxed());
                Ok::<_, Infallible>(pipeline.handle(&context, &target, request).await)
            }
        });

        // Relayed responses keep exactly the origin's headers, so no Date is added.
        http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(false)
            .auto_date_header(false)
            .serve_connection(TokioIo::new(tls_stream), service)
            .await
            .map_err(ProxyError::Connection)
    }
}
