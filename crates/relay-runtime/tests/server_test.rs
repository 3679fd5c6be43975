//! Integration tests for the Relay server

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, Request, Response, StatusCode};
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use relay_config::{Config, ConfigBuilder};
use relay_core::{Error, ProxyTarget, Result};
use relay_discovery::BackendResolver;
use relay_proxy::LifecycleState;
use relay_runtime::{RuntimeState, Server, ServerBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Backend that answers with the request path and reports the `Via` and
/// `X-Forwarded-For` headers it received
async fn spawn_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let service = service_fn(|req: Request<Incoming>| async move {
                    let mut response = Response::builder().header("x-seen-path", req.uri().path());
                    for name in [header::VIA.as_str(), "x-forwarded-for"] {
                        if let Some(value) = req.headers().get(name) {
                            response = response.header(format!("x-seen-{name}"), value);
                        }
                    }
                    response.body(Full::new(Bytes::from_static(b"hello from backend")))
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

fn config_for(authority: &str) -> Config {
    ConfigBuilder::new()
        .listen("127.0.0.1:0".parse().unwrap())
        .shutdown_timeout(Duration::from_secs(2))
        .service("backend")
        .static_backend(authority)
        .build()
        .unwrap()
}

async fn start(server: Server) -> (Arc<Server>, SocketAddr, JoinHandle<Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(server);

    let running = Arc::clone(&server);
    let handle = tokio::spawn(async move { running.run_with_listener(listener).await });

    (server, addr, handle)
}

async fn get(addr: SocketAddr, path: &str) -> Response<Incoming> {
    let client = Client::builder(TokioExecutor::new()).build_http::<Empty<Bytes>>();
    let uri = format!("http://{addr}{path}").parse().unwrap();
    client.get(uri).await.unwrap()
}

#[derive(Debug)]
struct FailingResolver;

#[async_trait]
impl BackendResolver for FailingResolver {
    fn name(&self) -> &str {
        "failing"
    }

    async fn resolve_backend(&self, service_name: &str) -> Result<ProxyTarget> {
        Err(Error::resolution(service_name, "registry unavailable"))
    }
}

#[tokio::test]
async fn test_proxies_to_backend() {
    let backend = spawn_backend().await;
    let server = ServerBuilder::new()
        .config(config_for(&backend.to_string()))
        .build()
        .unwrap();
    let (server, addr, handle) = start(server).await;

    let response = get(addr, "/hello").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-seen-path"], "/hello");
    assert_eq!(response.headers()["x-seen-via"], "1.1 relay");
    assert_eq!(response.headers()["x-seen-x-forwarded-for"], "127.0.0.1");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, "hello from backend");

    assert_eq!(server.request_count(), 1);
    assert_eq!(server.manager().state(), LifecycleState::Active);

    server.shutdown_signal().trigger();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unreachable_backend_is_bad_gateway() {
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let authority = closed.local_addr().unwrap().to_string();
    drop(closed);

    let server = ServerBuilder::new()
        .config(config_for(&authority))
        .build()
        .unwrap();
    let (server, addr, handle) = start(server).await;

    let response = get(addr, "/").await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(String::from_utf8_lossy(&body).starts_with("Error: "));

    server.shutdown_signal().trigger();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_resolution_failure_is_service_unavailable() {
    let server = ServerBuilder::new()
        .config(config_for("localhost:9000"))
        .resolver(Arc::new(FailingResolver))
        .build()
        .unwrap();
    let (server, addr, handle) = start(server).await;

    let response = get(addr, "/").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(server.manager().state(), LifecycleState::Uninitialized);

    server.shutdown_signal().trigger();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_graceful_shutdown() {
    let backend = spawn_backend().await;
    let server = ServerBuilder::new()
        .config(config_for(&backend.to_string()))
        .build()
        .unwrap();
    let (server, addr, handle) = start(server).await;

    let response = get(addr, "/warmup").await;
    assert_eq!(response.status(), StatusCode::OK);
    response.into_body().collect().await.unwrap();
    assert!(server.manager().current().is_some());

    server.shutdown_signal().trigger();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(server.state().await, RuntimeState::Stopped);
    assert!(server.manager().current().is_none());
}
