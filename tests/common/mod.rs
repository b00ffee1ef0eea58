//! Shared utilities for integration testing: a TLS origin, a running proxy
//! and a CONNECT client.

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use api_key_limiter::auth::TunnelAuthenticator;
use api_key_limiter::authority::{self, RootAuthority};
use api_key_limiter::http::{ForwardTimeouts, Forwarder, ProxyServer, ProxyState, RequestPipeline};
use api_key_limiter::lifecycle::Shutdown;
use api_key_limiter::net::listener::{Listener, ListenerError};
use api_key_limiter::net::tls;
use api_key_limiter::security::rate_limit::{AdmissionController, MemoryRateLimitStore};
use api_key_limiter::security::secrets::{HeaderRewriter, SecretCipher};
use api_key_limiter::store::{Configuration, HeaderReplacement, MemoryStore, RatePolicy, Tenant};
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use http_body_util::{Empty, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1::SendRequest;
use hyper::service::service_fn;
use hyper::{HeaderMap, Request, Response};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::{TlsAcceptor, TlsConnector};

pub const KEY_HEX: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";
pub const TENANT: &str = "tenant-1";
pub const ACCESS_SECRET: &str = "s3cret";
pub const CONFIG: &str = "config-1";

pub fn cipher() -> SecretCipher {
    SecretCipher::from_hex(KEY_HEX).unwrap()
}

/// `Basic base64(tenant:secret:config)`.
pub fn proxy_authorization(tenant: &str, secret: &str, config: &str) -> String {
    let payload = format!("{}:{}:{}", tenant, secret, config);
    format!("Basic {}", general_purpose::STANDARD.encode(payload))
}

/// Store with one tenant and `CONFIG` limited to `per_second` requests per
/// second, injecting `X-Key: secret123`.
pub fn seeded_store(per_second: u32) -> MemoryStore {
    let store = MemoryStore::new();
    store.insert_tenant(Tenant {
        id: TENANT.into(),
        access_key: ACCESS_SECRET.into(),
    });
    store.insert_configuration(Configuration {
        id: CONFIG.into(),
        tenant_id: TENANT.into(),
        rate_limit: RatePolicy {
            count: per_second,
            per: "second".into(),
        },
        header_replacements: Vec::new(),
    });
    store.push_header_replacement(HeaderReplacement {
        id: "hr-1".into(),
        config_id: CONFIG.into(),
        header_name: "X-Key".into(),
        encrypted_value: cipher().encrypt("secret123").unwrap(),
    });
    store.insert_configuration(Configuration {
        id: "weekly".into(),
        tenant_id: TENANT.into(),
        rate_limit: RatePolicy {
            count: 10,
            per: "week".into(),
        },
        header_replacements: Vec::new(),
    });
    store
}

/// In-process HTTPS origin that records every request it serves.
pub struct Origin {
    pub addr: SocketAddr,
    pub authority: RootAuthority,
    hits: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<(String, HeaderMap)>>>,
    handle: JoinHandle<()>,
}

impl Origin {
    pub async fn start() -> Self {
        let authority = RootAuthority::generate("Test Origin Root").unwrap();
        let leaf = authority::issue(&["127.0.0.1"], &authority, Duration::from_secs(3600)).unwrap();
        let acceptor = TlsAcceptor::from(leaf.server_config().unwrap());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let handle = {
            let hits = hits.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((socket, _)) = listener.accept().await else {
                        break;
                    };
                    let acceptor = acceptor.clone();
                    let hits = hits.clone();
                    let seen = seen.clone();
                    tokio::spawn(async move {
                        let Ok(tls) = acceptor.accept(socket).await else {
                            return;
                        };
                        let service = service_fn(move |request: Request<Incoming>| {
                            hits.fetch_add(1, Ordering::SeqCst);
                            seen.lock()
                                .unwrap()
                                .push((request.uri().to_string(), request.headers().clone()));
                            async move {
                                Ok::<_, Infallible>(
                                    Response::builder()
                                        .status(200)
                                        .header("X-Origin", "yes")
                                        .body(Full::new(Bytes::from_static(b"origin ok")))
                                        .unwrap(),
                                )
                            }
                        });
                        let _ = hyper::server::conn::http1::Builder::new()
                            .auto_date_header(false)
                            .serve_connection(TokioIo::new(tls), service)
                            .await;
                    });
                }
            })
        };

        Self {
            addr,
            authority,
            hits,
            seen,
            handle,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// `(request target, headers)` of every request served so far.
    pub fn seen(&self) -> Vec<(String, HeaderMap)> {
        self.seen.lock().unwrap().clone()
    }
}

impl Drop for Origin {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// HTTPS origin that answers with headers and three bytes of a 100-byte
/// body, then never sends the rest.
pub struct StallingOrigin {
    pub addr: SocketAddr,
    pub authority: RootAuthority,
    handle: JoinHandle<()>,
}

impl StallingOrigin {
    pub async fn start() -> Self {
        let authority = RootAuthority::generate("Stalling Origin Root").unwrap();
        let leaf = authority::issue(&["127.0.0.1"], &authority, Duration::from_secs(3600)).unwrap();
        let acceptor = TlsAcceptor::from(leaf.server_config().unwrap());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let Ok(mut tls) = acceptor.accept(socket).await else {
                        return;
                    };
                    let mut buf = [0u8; 4096];
                    let _ = tls.read(&mut buf).await;
                    let _ = tls
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nabc")
                        .await;
                    let _ = tls.flush().await;
                    tokio::time::sleep(Duration::from_secs(60)).await;
                });
            }
        });

        Self {
            addr,
            authority,
            handle,
        }
    }
}

impl Drop for StallingOrigin {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A proxy running on an ephemeral port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub authority: Arc<RootAuthority>,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), ListenerError>>,
}

pub const TIMEOUTS: ForwardTimeouts = ForwardTimeouts {
    connect: Duration::from_secs(2),
    handshake: Duration::from_secs(2),
    request: Duration::from_secs(5),
};

/// Start a proxy over `store` that trusts `origin_root` for outbound TLS.
pub async fn spawn_proxy(store: MemoryStore, origin_root: &RootAuthority) -> TestProxy {
    spawn_proxy_with_timeouts(store, origin_root, TIMEOUTS).await
}

pub async fn spawn_proxy_with_timeouts(
    store: MemoryStore,
    origin_root: &RootAuthority,
    timeouts: ForwardTimeouts,
) -> TestProxy {
    let authority = Arc::new(RootAuthority::generate("Test Proxy Root").unwrap());

    let mut roots = rustls::RootCertStore::empty();
    roots.add(origin_root.cert_der().clone()).unwrap();
    let forwarder = Forwarder::new(tls::upstream_client_config(roots).unwrap(), timeouts);

    let store = Arc::new(store);
    let pipeline = RequestPipeline::new(
        AdmissionController::new(Arc::new(MemoryRateLimitStore::new())),
        Arc::new(HeaderRewriter::new(cipher())),
        Arc::new(forwarder),
    );
    let server = ProxyServer::new(ProxyState {
        authenticator: TunnelAuthenticator::new(store.clone(), store),
        authority: authority.clone(),
        pipeline: Arc::new(pipeline),
        leaf_validity: Duration::from_secs(3600),
        handshake_timeout: Duration::from_secs(5),
        listener_tls: None,
    });

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let listener = Listener::from_tcp(tcp, 64);

    let shutdown = Shutdown::new();
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    TestProxy {
        addr,
        authority,
        shutdown,
        handle,
    }
}

/// Status line and headers of a plain-HTTP exchange with the proxy.
pub struct ProxyReply {
    pub status: u16,
    pub head: String,
    pub stream: TcpStream,
}

/// Send raw `head` (without the blank line) and read the reply head.
pub async fn send_raw(proxy: SocketAddr, head: &str) -> ProxyReply {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream
        .write_all(format!("{}\r\n\r\n", head).as_bytes())
        .await
        .unwrap();

    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.unwrap();
        assert!(n > 0, "proxy closed before finishing the response head");
        buf.push(byte[0]);
    }

    let head = String::from_utf8(buf).unwrap();
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap();
    ProxyReply { status, head, stream }
}

/// Issue `CONNECT target` with an optional Proxy-Authorization value.
pub async fn connect(proxy: SocketAddr, target: &str, authorization: Option<&str>) -> ProxyReply {
    let mut head = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}");
    if let Some(value) = authorization {
        head.push_str(&format!("\r\nProxy-Authorization: {}", value));
    }
    send_raw(proxy, &head).await
}

/// CONNECT to `origin`, complete TLS trusting `proxy_root` and return an
/// HTTP/1.1 sender speaking through the tunnel.
pub async fn open_tunnel(
    proxy: &TestProxy,
    origin: SocketAddr,
    authorization: &str,
) -> SendRequest<Empty<Bytes>> {
    let reply = connect(proxy.addr, &origin.to_string(), Some(authorization)).await;
    assert_eq!(reply.status, 200, "CONNECT refused: {}", reply.head);

    let mut roots = rustls::RootCertStore::empty();
    roots.add(proxy.authority.cert_der().clone()).unwrap();
    let connector = TlsConnector::from(tls::upstream_client_config(roots).unwrap());
    let server_name = tls::server_name(&origin.ip().to_string()).unwrap();
    let tls = connector.connect(server_name, reply.stream).await.unwrap();

    let (sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(tls))
        .await
        .unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    sender
}

/// GET `path` through a tunnel to `origin`, sending a client-side `X-Key`.
pub fn get(origin: SocketAddr, path: &str) -> Request<Empty<Bytes>> {
    Request::builder()
        .uri(path)
        .header(hyper::header::HOST, origin.to_string())
        .header("X-Key", "client-supplied")
        .body(Empty::new())
        .unwrap()
}
