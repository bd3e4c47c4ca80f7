//! Gateway behavior against real HTTP backends on ephemeral ports

use fleet_api::RegisterInstance;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use router_core::{RouteRule, RoutingTable, ServiceRegistry};
use router_proxy::{
    GatewayRouter, ProxyRequest, ReferenceMode, ReferencePolicy, RequestForwarder, TimeoutPolicy,
    TrafficPolicy, GATEWAY_ERROR_HEADER,
};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Clone, Copy)]
enum Backend {
    /// Answer every request with this status and the backend name as body
    Status(StatusCode, &'static str),
    /// Echo the request body back with 201
    Echo,
    /// Wait before answering 200
    Slow(Duration),
}

async fn answer(
    backend: Backend,
    request: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match backend {
        Backend::Status(status, name) => {
            let mut response = Response::new(Full::new(Bytes::from(name)));
            *response.status_mut() = status;
            response
        }
        Backend::Echo => {
            let body = request
                .into_body()
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .unwrap_or_default();
            let mut response = Response::new(Full::new(body));
            *response.status_mut() = StatusCode::CREATED;
            response
        }
        Backend::Slow(delay) => {
            tokio::time::sleep(delay).await;
            Response::new(Full::new(Bytes::from("slow")))
        }
    };
    Ok(response)
}

async fn spawn_backend(backend: Backend) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let service = service_fn(move |request| answer(backend, request));
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    port
}

async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

async fn register(registry: &ServiceRegistry, service: &str, id: &str, port: u16) {
    registry
        .register(RegisterInstance {
            service_name: service.to_string(),
            instance_id: Some(id.to_string()),
            host: "127.0.0.1".to_string(),
            port,
        })
        .await
        .unwrap();
}

fn gateway(registry: Arc<ServiceRegistry>, attempt_timeout: Duration) -> GatewayRouter {
    let routes = RoutingTable::new(vec![
        RouteRule::new("/api/clients", "client-service"),
        RouteRule::new("/api/vehicles", "vehicle-service"),
    ])
    .unwrap();
    let policy = TrafficPolicy {
        timeout: TimeoutPolicy {
            attempt_timeout,
            connect_timeout: Duration::from_millis(500),
        },
        ..Default::default()
    };
    let forwarder = Arc::new(RequestForwarder::new(&policy.timeout));
    GatewayRouter::new(routes, registry, forwarder).with_policy(policy)
}

#[tokio::test]
async fn test_failover_from_dead_instance() {
    let registry = Arc::new(ServiceRegistry::new());
    register(&registry, "client-service", "a", closed_port().await).await;
    let healthy = spawn_backend(Backend::Status(StatusCode::OK, "b")).await;
    register(&registry, "client-service", "b", healthy).await;
    let router = gateway(registry, Duration::from_secs(2));

    let response = router.handle(ProxyRequest::new(Method::GET, "/api/clients")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body().as_ref(), b"b");
}

#[tokio::test]
async fn test_hung_instance_times_out() {
    let registry = Arc::new(ServiceRegistry::new());
    let slow = spawn_backend(Backend::Slow(Duration::from_secs(5))).await;
    register(&registry, "client-service", "a", slow).await;
    let router = gateway(registry.clone(), Duration::from_millis(200));

    let response = router.handle(ProxyRequest::new(Method::GET, "/api/clients")).await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(response.headers()[GATEWAY_ERROR_HEADER], "upstream-failure");

    // with a responsive alternate the timeout is absorbed by the retry
    let healthy = spawn_backend(Backend::Status(StatusCode::OK, "b")).await;
    register(&registry, "client-service", "b", healthy).await;
    let router = gateway(registry, Duration::from_millis(200));
    let response = router.handle(ProxyRequest::new(Method::GET, "/api/clients")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body().as_ref(), b"b");
}

#[tokio::test]
async fn test_dangling_reference_is_stored_when_unchecked() {
    let registry = Arc::new(ServiceRegistry::new());
    register(&registry, "vehicle-service", "v", spawn_backend(Backend::Echo).await).await;
    register(
        &registry,
        "client-service",
        "c",
        spawn_backend(Backend::Status(StatusCode::NOT_FOUND, "no such client")).await,
    )
    .await;
    let router = gateway(registry, Duration::from_secs(2));

    let body = r#"{"make":"Fiat","model":"Panda","plate":"AB123CD","price":9000,"clientId":77}"#;
    let response = router
        .handle(ProxyRequest::new(Method::POST, "/api/vehicles").with_body(body))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.body().as_ref(), body.as_bytes());

    // the join is the caller's second lookup, which sees the domain 404
    let response = router.handle(ProxyRequest::new(Method::GET, "/api/clients/77")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers().get(GATEWAY_ERROR_HEADER).is_none());
}

#[tokio::test]
async fn test_dangling_reference_is_rejected_when_checked() {
    let registry = Arc::new(ServiceRegistry::new());
    register(&registry, "vehicle-service", "v", spawn_backend(Backend::Echo).await).await;
    register(
        &registry,
        "client-service",
        "c",
        spawn_backend(Backend::Status(StatusCode::NOT_FOUND, "no such client")).await,
    )
    .await;
    let router = gateway(registry, Duration::from_secs(2)).with_references(ReferencePolicy {
        mode: ReferenceMode::Checked,
        ..Default::default()
    });

    let response = router
        .handle(ProxyRequest::new(Method::POST, "/api/vehicles").with_body(r#"{"clientId":77}"#))
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.headers()[GATEWAY_ERROR_HEADER], "dangling-reference");
}
