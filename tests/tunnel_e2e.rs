//! End-to-end interception: CONNECT, TLS with a minted leaf, secret header
//! injection, forwarding and admission across tunnels.

mod common;

use std::time::Duration;

use common::*;
use http_body_util::BodyExt;
use api_key_limiter::http::ForwardTimeouts;
use hyper::header::{CONNECTION, DATE};

#[tokio::test]
async fn request_is_forwarded_with_secret_then_rate_limited() {
    let origin = Origin::start().await;
    let proxy = spawn_proxy(seeded_store(1), &origin.authority).await;
    let authorization = proxy_authorization(TENANT, ACCESS_SECRET, CONFIG);

    let mut sender = open_tunnel(&proxy, origin.addr, &authorization).await;

    let response = sender.send_request(get(origin.addr, "/v1/data?x=1")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-origin"], "yes");
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"origin ok");

    let seen = origin.seen();
    assert_eq!(seen.len(), 1);
    let (path, headers) = &seen[0];
    assert_eq!(path, "/v1/data?x=1");
    assert_eq!(headers["x-key"], "secret123");
    assert_eq!(headers.get_all("x-key").iter().count(), 1);

    // Same tunnel, second request inside the one-second window.
    let response = sender.send_request(get(origin.addr, "/v1/data")).await.unwrap();
    assert_eq!(response.status(), 429);
    assert!(response.headers().get(CONNECTION).is_none());
    response.into_body().collect().await.unwrap();
    assert_eq!(origin.hits(), 1);
}

#[tokio::test]
async fn tunnels_on_one_config_share_a_budget() {
    let origin = Origin::start().await;
    let proxy = spawn_proxy(seeded_store(1), &origin.authority).await;
    let authorization = proxy_authorization(TENANT, ACCESS_SECRET, CONFIG);

    let mut first = open_tunnel(&proxy, origin.addr, &authorization).await;
    let mut second = open_tunnel(&proxy, origin.addr, &authorization).await;

    let response = first.send_request(get(origin.addr, "/")).await.unwrap();
    assert_eq!(response.status(), 200);
    response.into_body().collect().await.unwrap();

    let response = second.send_request(get(origin.addr, "/")).await.unwrap();
    assert_eq!(response.status(), 429);
    assert_eq!(origin.hits(), 1);
}

#[tokio::test]
async fn budget_refills_after_the_period() {
    let origin = Origin::start().await;
    let proxy = spawn_proxy(seeded_store(1), &origin.authority).await;
    let authorization = proxy_authorization(TENANT, ACCESS_SECRET, CONFIG);
    let mut sender = open_tunnel(&proxy, origin.addr, &authorization).await;

    let response = sender.send_request(get(origin.addr, "/")).await.unwrap();
    assert_eq!(response.status(), 200);
    response.into_body().collect().await.unwrap();

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let response = sender.send_request(get(origin.addr, "/")).await.unwrap();
    assert_eq!(response.status(), 200);
    response.into_body().collect().await.unwrap();
    assert_eq!(origin.hits(), 2);
}

#[tokio::test]
async fn unreachable_origin_is_bad_gateway_and_closes() {
    let origin = Origin::start().await;
    let proxy = spawn_proxy(seeded_store(10), &origin.authority).await;
    let authorization = proxy_authorization(TENANT, ACCESS_SECRET, CONFIG);

    let closed = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let mut sender = open_tunnel(&proxy, closed, &authorization).await;
    let response = sender.send_request(get(closed, "/")).await.unwrap();
    assert_eq!(response.status(), 502);
    assert_eq!(response.headers()[CONNECTION], "close");
}

#[tokio::test]
async fn relayed_response_keeps_origin_headers_exactly() {
    let origin = Origin::start().await;
    let proxy = spawn_proxy(seeded_store(10), &origin.authority).await;
    let authorization = proxy_authorization(TENANT, ACCESS_SECRET, CONFIG);

    let mut sender = open_tunnel(&proxy, origin.addr, &authorization).await;
    let response = sender.send_request(get(origin.addr, "/")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-origin"], "yes");
    assert!(response.headers().get(DATE).is_none());
}

#[tokio::test]
async fn stalled_origin_body_is_cut_at_the_request_deadline() {
    let origin = StallingOrigin::start().await;
    let timeouts = ForwardTimeouts {
        request: Duration::from_millis(500),
        ..TIMEOUTS
    };
    let proxy = spawn_proxy_with_timeouts(seeded_store(10), &origin.authority, timeouts).await;
    let authorization = proxy_authorization(TENANT, ACCESS_SECRET, CONFIG);

    let mut sender = open_tunnel(&proxy, origin.addr, &authorization).await;
    let response = sender.send_request(get(origin.addr, "/slow")).await.unwrap();
    assert_eq!(response.status(), 200);

    let body = tokio::time::timeout(Duration::from_secs(5), response.into_body().collect())
        .await
        .expect("relayed body was not bounded by the request deadline");
    assert!(body.is_err());
}

#[tokio::test]
async fn shutdown_stops_the_accept_loop() {
    let origin = Origin::start().await;
    let proxy = spawn_proxy(seeded_store(1), &origin.authority).await;

    proxy.shutdown.trigger();
    let result = tokio::time::timeout(Duration::from_secs(5), proxy.handle)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());
}
