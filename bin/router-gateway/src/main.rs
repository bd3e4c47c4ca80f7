use anyhow::{Context, Result};
use hyper::{
    body::{Bytes, Incoming},
    header::{HeaderValue, CONTENT_TYPE},
    server::conn::http1,
    service::service_fn,
    Method, Request, Response, StatusCode,
};
use http_body_util::Full;
use hyper_util::rt::tokio::TokioIo;
use router_core::ServiceRegistry;
use router_proxy::{
    text_response, GatewayRouter, HealthMonitor, LoggingMiddleware, MetricsCollector,
    MetricsMiddleware, MiddlewareChain, MiddlewareContext, ProxyRequest, RequestForwarder,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod registry_api;

use config::GatewayConfig;

/// Shared state of the request path
struct Gateway {
    router: GatewayRouter,
    registry: Arc<ServiceRegistry>,
    middleware: MiddlewareChain,
    metrics: MetricsCollector,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting router-gateway...");

    let config = GatewayConfig::load().context("loading gateway configuration")?;
    let listen_addr = config.listen_addr()?;

    // Create service registry
    let registry = Arc::new(ServiceRegistry::new());
    info!("Service registry initialized");

    let metrics = MetricsCollector::new().context("creating metrics collector")?;
    info!("Metrics collector initialized");

    let policy = config.traffic_policy();
    info!("Traffic policy initialized");
    info!("  - Attempt timeout: {:?}", policy.timeout.attempt_timeout);
    info!("  - Max attempts: {}", policy.retry.max_attempts());
    info!("  - Degraded fallback: {}", policy.degraded_fallback);

    let references = config.reference_policy();
    info!("Reference policy: {:?} for {}", references.mode, references.vehicle_service);

    let forwarder = Arc::new(RequestForwarder::new(&policy.timeout));
    let routes = config.routing_table()?;
    for rule in routes.rules() {
        info!("Route {} -> {}", rule.prefix, rule.service);
    }

    let router = GatewayRouter::new(routes, registry.clone(), forwarder)
        .with_policy(policy)
        .with_references(references)
        .with_metrics(metrics.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = HealthMonitor::new(registry.clone(), config.health_config()?)
        .with_metrics(metrics.clone())
        .spawn(shutdown_rx);

    let middleware = MiddlewareChain::new()
        .add(LoggingMiddleware)
        .add(MetricsMiddleware::new(metrics.clone()));
    info!("Middleware chain initialized with logging and metrics");

    let gateway = Arc::new(Gateway {
        router,
        registry,
        middleware,
        metrics,
    });

    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("binding {}", listen_addr))?;
    info!("HTTP server listening on {}", listen_addr);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    // Accept HTTP connections until Ctrl-C
    loop {
        let (stream, peer_addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Error accepting connection: {}", e);
                    continue;
                }
            },
            _ = &mut ctrl_c => {
                info!("Shutdown signal received");
                break;
            }
        };
        let io = TokioIo::new(stream);
        let gateway = gateway.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| handle_request(req, gateway.clone()));

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving HTTP connection from {}: {}", peer_addr, e);
            }
        });
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = monitor.await {
        warn!("Health monitor ended abnormally: {}", e);
    }
    info!("router-gateway stopped");
    Ok(())
}

async fn handle_request(
    req: Request<Incoming>,
    gateway: Arc<Gateway>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let context = MiddlewareContext::from_request(&req);

    if let Err(e) = gateway.middleware.on_request(&context).await {
        debug!("Middleware on_request error: {}", e);
    }

    let request = match ProxyRequest::from_incoming(req).await {
        Ok(request) => request,
        Err(e) => {
            if let Err(mw_err) = gateway.middleware.on_error(&context, &e.to_string()).await {
                debug!("Middleware on_error error: {}", mw_err);
            }
            return Err(e);
        }
    };

    let response = route(&gateway, request).await;

    let status = response.status().as_u16();
    if let Err(e) = gateway.middleware.on_response(&context, status).await {
        debug!("Middleware on_response error: {}", e);
    }

    Ok(response.map(Full::new))
}

async fn route(gateway: &Gateway, request: ProxyRequest) -> Response<Bytes> {
    // Gateway liveness
    if request.path() == "/healthz" {
        return text_response(StatusCode::OK, "OK\n");
    }

    // Metrics endpoint
    if request.path() == "/metrics" && request.method == Method::GET {
        return match gateway.metrics.gather() {
            Ok(text) => {
                let mut response = text_response(StatusCode::OK, text);
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4"));
                response
            }
            Err(e) => {
                warn!("Failed to gather metrics: {}", e);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to gather metrics\n")
            }
        };
    }

    if let Some(response) = registry_api::handle(&gateway.registry, &request).await {
        return response;
    }

    gateway.router.handle(request).await
}
