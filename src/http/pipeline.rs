//! Per-request processing inside an established tunnel.
//!
//! # Data Flow
//! ```text
//! Decrypted request (tunnel already authenticated)
//!     → admission check on the tunnel's tenant:config key
//!         → denied: 429, tunnel stays open
//!     → destination rewrite (CONNECT target + path and query)
//!     → secret header injection
//!         → decryption failure: 500, tunnel stays open
//!     → forward to origin
//!         → failure: 502/504 with Connection: close
//!     → origin response relayed unchanged
//! ```
//!
//! # Design Decisions
//! - Admission runs per request, never per tunnel
//! - Identity comes from the tunnel context, never re-validated here

use std::sync::Arc;
use std::time::Instant;

use hyper::{Request, Response, StatusCode};

use super::forward::Upstream;
use super::request::{rewrite_destination, ConnectTarget, RequestId};
use super::response::{self, ProxyBody};
use crate::auth::TunnelContext;
use crate::observability::metrics;
use crate::security::rate_limit::AdmissionController;
use crate::security::secrets::HeaderRewriter;

/// Admission, rewrite and forwarding for tunneled requests.
#[derive(Clone)]
pub struct RequestPipeline {
    admission: AdmissionController,
    rewriter: Arc<HeaderRewriter>,
    upstream: Arc<dyn Upstream>,
}

impl RequestPipeline {
    pub fn new(
        admission: AdmissionController,
        rewriter: Arc<HeaderRewriter>,
        upstream: Arc<dyn Upstream>,
    ) -> Self {
        Self {
            admission,
            rewriter,
            upstream,
        }
    }

    /// Process one request read off the tunnel to `target`.
    ///
    /// Always yields a response; error statuses are written like any other.
    pub async fn handle(
        &self,
        context: &TunnelContext,
        target: &ConnectTarget,
        mut request: Request<ProxyBody>,
    ) -> Response<ProxyBody> {
        let start = Instant::now();
        let request_id = RequestId::new();
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        tracing::debug!(
            request_id = %request_id,
            method = %method,
            path = %path,
            "Tunneled request"
        );

        match self.admission.allow(&context.rate_key, &context.limit).await {
            Ok(true) => {}
            Ok(false) => {
                return finish(response::too_many_requests(), start);
            }
            Err(e) => {
                tracing::error!(request_id = %request_id, error = %e, "Admission check failed");
                return finish(response::internal_error(), start);
            }
        }

        if let Err(e) = rewrite_destination(&mut request, target) {
            tracing::warn!(request_id = %request_id, error = %e, "Destination rewrite failed");
            return finish(response::text(StatusCode::BAD_REQUEST, "Bad request"), start);
        }

        if let Err(e) = self
            .rewriter
            .apply(request.headers_mut(), &context.configuration.header_replacements)
        {
            tracing::error!(
                request_id = %request_id,
                config_id = %context.configuration.id,
                error = %e,
                "Header decryption failed"
            );
            return finish(response::internal_error(), start);
        }

        match self.upstream.send(request).await {
            Ok(upstream_response) => {
                tracing::info!(
                    request_id = %request_id,
                    method = %method,
                    path = %path,
                    status = upstream_response.status().as_u16(),
                    "Forwarded request"
                );
                finish(upstream_response, start)
            }
            Err(e) => {
                tracing::error!(request_id = %request_id, connect_target = %target, error = %e, "Forwarding failed");
                let message = if e.is_timeout() {
                    "Upstream request timed out"
                } else {
                    "Upstream request failed"
                };
                finish(response::closing(e.status(), message), start)
            }
        }
    }
}

fn finish(response: Response<ProxyBody>, start: Instant) -> Response<ProxyBody> {
    metrics::record_request(response.status().as_u16(), start);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::error::ForwardingError;
    use crate::http::response::full;
    use crate::security::rate_limit::{Limit, MemoryRateLimitStore, RateUnit};
    use crate::security::secrets::SecretCipher;
    use crate::store::{Configuration, HeaderReplacement, RatePolicy};
    use async_trait::async_trait;
    use http_body_util::BodyExt;
    use hyper::header::{CONNECTION, HOST};
    use std::sync::Mutex;

    const KEY_HEX: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

    /// Records what reached the origin and answers with a fixed response.
    #[derive(Default)]
    struct RecordingUpstream {
        seen: Mutex<Vec<(String, hyper::HeaderMap)>>,
        fail_with: Mutex<Option<ForwardingError>>,
    }

    #[async_trait]
    impl Upstream for RecordingUpstream {
        async fn send(&self, request: Request<ProxyBody>) -> Result<Response<ProxyBody>, ForwardingError> {
            if let Some(err) = self.fail_with.lock().unwrap().take() {
                return Err(err);
            }
            self.seen
                .lock()
                .unwrap()
                .push((request.uri().to_string(), request.headers().clone()));
            Ok(Response::builder()
                .status(StatusCode::CREATED)
                .header("X-Origin", "yes")
                .body(full("origin body"))
                .unwrap())
        }
    }

    fn cipher() -> SecretCipher {
        SecretCipher::from_hex(KEY_HEX).unwrap()
    }

    fn context(replacements: Vec<HeaderReplacement>, count: u32) -> TunnelContext {
        TunnelContext {
            tenant_id: "T".into(),
            configuration: Configuration {
                id: "C".into(),
                tenant_id: "T".into(),
                rate_limit: RatePolicy {
                    count,
                    per: "second".into(),
                },
                header_replacements: replacements,
            },
            limit: Limit::per(count, RateUnit::Second),
            rate_key: "T:C".into(),
        }
    }

    fn replacement(name: &str, encrypted_value: String) -> HeaderReplacement {
        HeaderReplacement {
            id: "h".into(),
            config_id: "C".into(),
            header_name: name.into(),
            encrypted_value,
        }
    }

    fn pipeline(upstream: Arc<RecordingUpstream>) -> RequestPipeline {
        RequestPipeline::new(
            AdmissionController::new(Arc::new(MemoryRateLimitStore::new())),
            Arc::new(HeaderRewriter::new(cipher())),
            upstream,
        )
    }

    fn request(path: &str) -> Request<ProxyBody> {
        Request::builder()
            .uri(path)
            .header("X-Key", "client-supplied")
            .body(full("payload"))
            .unwrap()
    }

    fn target() -> ConnectTarget {
        ConnectTarget::parse("api.example.com:443").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_with_injected_header_then_rate_limits() {
        let upstream = Arc::new(RecordingUpstream::default());
        let pipeline = pipeline(upstream.clone());
        let sealed = cipher().encrypt("secret123").unwrap();
        let context = context(vec![replacement("X-Key", sealed)], 1);

        let response = pipeline.handle(&context, &target(), request("/v1/data?x=1")).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-origin"], "yes");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"origin body");

        let response = pipeline.handle(&context, &target(), request("/v1/data")).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get(CONNECTION).is_none());

        let seen = upstream.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (uri, headers) = &seen[0];
        assert_eq!(uri, "https://api.example.com:443/v1/data?x=1");
        assert_eq!(headers["x-key"], "secret123");
        assert_eq!(headers.get_all("x-key").iter().count(), 1);
        assert_eq!(headers[HOST], "api.example.com");
    }

    #[tokio::test(start_paused = true)]
    async fn admission_recovers_after_window() {
        let upstream = Arc::new(RecordingUpstream::default());
        let pipeline = pipeline(upstream.clone());
        let context = context(Vec::new(), 1);

        assert_eq!(pipeline.handle(&context, &target(), request("/")).await.status(), StatusCode::CREATED);
        assert_eq!(
            pipeline.handle(&context, &target(), request("/")).await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        tokio::time::advance(std::time::Duration::from_secs(1)).await;
        assert_eq!(pipeline.handle(&context, &target(), request("/")).await.status(), StatusCode::CREATED);
        assert_eq!(upstream.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn decryption_failure_is_internal_and_keeps_tunnel() {
        let upstream = Arc::new(RecordingUpstream::default());
        let pipeline = pipeline(upstream.clone());
        let context = context(vec![replacement("X-Key", "00".repeat(40))], 10);

        let response = pipeline.handle(&context, &target(), request("/")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(CONNECTION).is_none());
        assert!(upstream.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn forwarding_failure_closes_tunnel() {
        let upstream = Arc::new(RecordingUpstream::default());
        *upstream.fail_with.lock().unwrap() = Some(ForwardingError::Destination("x".into()));
        let pipeline = pipeline(upstream.clone());
        let context = context(Vec::new(), 10);

        let response = pipeline.handle(&context, &target(), request("/")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers()[CONNECTION], "close");

        *upstream.fail_with.lock().unwrap() = Some(ForwardingError::Timeout);
        let response = pipeline.handle(&context, &target(), request("/")).await;
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn invalid_limit_is_internal_error() {
        let upstream = Arc::new(RecordingUpstream::default());
        let pipeline = pipeline(upstream.clone());
        let mut context = context(Vec::new(), 1);
        context.limit.rate = 0;

        let response = pipeline.handle(&context, &target(), request("/")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(upstream.seen.lock().unwrap().is_empty());
    }
}
