//! CONNECT proxy server.
//!
//! # Responsibilities
//! - Accept client connections (optionally over TLS) within the connection limit
//! - Answer anything but CONNECT with 405
//! - Authenticate each CONNECT before the socket is hijacked
//! - Mint the tunnel's leaf and hand the upgraded socket to a tunnel task
//! - Stop accepting on shutdown and drain open tunnels

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::header::PROXY_AUTHORIZATION;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tracing::Instrument;

use super::error::ProxyError;
use super::pipeline::RequestPipeline;
use super::request::ConnectTarget;
use super::response::{self, ProxyBody};
use super::tunnel::Tunnel;
use crate::auth::{AuthError, CredentialError, TunnelAuthenticator};
use crate::authority::{self, RootAuthority};
use crate::net::connection::{TunnelState, TunnelTracker};
use crate::net::listener::{Listener, ListenerError};
use crate::observability::metrics;

/// How long open tunnels may keep running after shutdown is requested.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared collaborators for every connection.
pub struct ProxyState {
    pub authenticator: TunnelAuthenticator,
    pub authority: Arc<RootAuthority>,
    pub pipeline: Arc<RequestPipeline>,
    pub leaf_validity: Duration,
    pub handshake_timeout: Duration,
    pub listener_tls: Option<TlsAcceptor>,
}

/// The intercepting proxy.
pub struct ProxyServer {
    state: Arc<ProxyState>,
    tracker: TunnelTracker,
}

impl ProxyServer {
    pub fn new(state: ProxyState) -> Self {
        Self {
            state: Arc::new(state),
            tracker: TunnelTracker::new(),
        }
    }

    pub fn tracker(&self) -> &TunnelTracker {
        &self.tracker
    }

    /// Accept connections until `shutdown` fires, then drain open tunnels.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Accept)?;
        tracing::info!(address = %addr, tls = self.state.listener_tls.is_some(), "Proxy server starting");

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }
            };

            let (stream, peer, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(ListenerError::Accept(e)) => {
                    tracing::warn!(error = %e, "Accept failed");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let _ = stream.set_nodelay(true);

            let state = Arc::clone(&self.state);
            let tracker = self.tracker.clone();
            tokio::spawn(async move {
                let result = match &state.listener_tls {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls) => serve_client(tls, peer, state.clone(), tracker).await,
                        Err(e) => Err(ProxyError::ListenerTls(e)),
                    },
                    None => serve_client(stream, peer, state.clone(), tracker).await,
                };
                if let Err(e) = result {
                    tracing::debug!(peer_addr = %peer, error = %e, "Client connection ended with error");
                }
                drop(permit);
            });
        }

        let open = self.tracker.active_count();
        if open > 0 {
            tracing::info!(open_tunnels = open, "Draining open tunnels");
            if !self.tracker.wait_idle(DRAIN_TIMEOUT).await {
                tracing::warn!(
                    open_tunnels = self.tracker.active_count(),
                    "Drain deadline passed, abandoning tunnels"
                );
            }
        }

        tracing::info!("Proxy server stopped");
        Ok(())
    }
}

async fn serve_client<S>(
    io: S,
    peer: SocketAddr,
    state: Arc<ProxyState>,
    tracker: TunnelTracker,
) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |request: Request<Incoming>| {
        let state = Arc::clone(&state);
        let tracker = tracker.clone();
        async move { Ok::<_, Infallible>(handle_connect(request, peer, state, tracker).await) }
    });

    http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(false)
        .serve_connection(TokioIo::new(io), service)
        .with_upgrades()
        .await
        .map_err(ProxyError::Connection)
}

/// Answer one request on the proxy listener.
async fn handle_connect(
    mut request: Request<Incoming>,
    peer: SocketAddr,
    state: Arc<ProxyState>,
    tracker: TunnelTracker,
) -> Response<ProxyBody> {
    if request.method() != Method::CONNECT {
        tracing::debug!(peer_addr = %peer, method = %request.method(), "Rejected non-CONNECT request");
        return response::method_not_allowed();
    }

    let target = match ConnectTarget::from_uri(request.uri()) {
        Ok(target) => target,
        Err(e) => {
            tracing::warn!(peer_addr = %peer, uri = %request.uri(), error = %e, "Invalid CONNECT target");
            metrics::record_tunnel("rejected");
            return response::text(StatusCode::BAD_REQUEST, "Invalid CONNECT target");
        }
    };

    let header = match request.headers().get(PROXY_AUTHORIZATION).map(|value| value.to_str()) {
        None => None,
        Some(Ok(value)) => Some(value),
        Some(Err(_)) => return reject(&AuthError::Malformed(CredentialError::Format), peer, &target),
    };
    let context = match state.authenticator.authenticate(header).await {
        Ok(context) => context,
        Err(e) => return reject(&e, peer, &target),
    };

    let leaf = match authority::issue(&[target.host.as_str()], &state.authority, state.leaf_validity) {
        Ok(leaf) => leaf,
        Err(e) => {
            tracing::error!(connect_target = %target, error = %e, "Leaf certificate issuance failed");
            metrics::record_tunnel("failed");
            return response::internal_error();
        }
    };

    let guard = tracker.track();
    let span = tracing::info_span!(
        "tunnel",
        tunnel_id = %guard.id(),
        connect_target = %target,
        tenant_id = %context.tenant_id,
        config_id = %context.configuration.id,
    );

    let tunnel = Tunnel {
        context: Arc::new(context),
        target: Arc::new(target),
        leaf,
        pipeline: Arc::clone(&state.pipeline),
        handshake_timeout: state.handshake_timeout,
    };

    let upgrade = hyper::upgrade::on(&mut request);
    tokio::spawn(
        async move {
            tracing::debug!(state = %TunnelState::AwaitingHandshake, "Tunnel accepted");
            let result = match upgrade.await {
                Ok(upgraded) => tunnel.run(upgraded).await,
                Err(e) => Err(ProxyError::Upgrade(e)),
            };
            match result {
                Ok(()) => tracing::debug!(state = %TunnelState::Closed, "Tunnel finished"),
                Err(e) => tracing::info!(state = %TunnelState::Closed, error = %e, "Tunnel ended"),
            }
            drop(guard);
        }
        .instrument(span),
    );

    metrics::record_tunnel("established");
    response::tunnel_established()
}

fn reject(err: &AuthError, peer: SocketAddr, target: &ConnectTarget) -> Response<ProxyBody> {
    match err {
        AuthError::Store(_) => {
            tracing::error!(peer_addr = %peer, connect_target = %target, error = %err, "Tunnel authentication failed")
        }
        _ => tracing::warn!(peer_addr = %peer, connect_target = %target, error = %err, "Tunnel rejected"),
    }
    metrics::record_tunnel(err.outcome());
    response::text(err.status(), err.message())
}
