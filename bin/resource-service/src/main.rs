use anyhow::{Context, Result};
use fleet_api::{Client, RegisterInstance, Resource, Vehicle, CLIENTS_PATH, VEHICLES_PATH};
use hyper::{
    body::{Bytes, Incoming},
    server::conn::http1,
    service::service_fn,
    Request, Response,
};
use http_body_util::Full;
use hyper_util::rt::tokio::TokioIo;
use router_discovery::{AgentConfig, RegistrationAgent, RegistryClient};
use router_proxy::ProxyRequest;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod handlers;
mod settings;
mod store;

use handlers::ResourceApi;
use settings::{ResourceKind, Settings};

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

    let settings = Settings::from_env().context("reading resource service settings")?;
    info!("Starting {} ({:?} records)...", settings.service_name, settings.kind);

    match settings.kind {
        ResourceKind::Client => serve(settings, ResourceApi::<Client>::new(CLIENTS_PATH)).await,
        ResourceKind::Vehicle => {
            let api = ResourceApi::<Vehicle>::new(VEHICLES_PATH).with_client_filter();
            serve(settings, api).await
        }
    }
}

async fn serve<T: Resource>(settings: Settings, api: ResourceApi<T>) -> Result<()> {
    let listener = TcpListener::bind((settings.bind_host.as_str(), settings.port))
        .await
        .with_context(|| format!("binding {}:{}", settings.bind_host, settings.port))?;
    let port = listener.local_addr()?.port();
    info!("HTTP server listening on {}:{}", settings.bind_host, port);

    let registry = Arc::new(RegistryClient::new(settings.gateway_url.as_str())?);
    let registration = RegisterInstance {
        service_name: settings.service_name.clone(),
        instance_id: None,
        host: settings.advertise_host.clone(),
        port,
    };
    let config = AgentConfig::new(registration, settings.heartbeat_interval);
    let agent = RegistrationAgent::start(registry, config)
        .await
        .context("registering with the gateway")?;
    info!("Instance {} registered with {}", agent.instance_id(), settings.gateway_url);

    let api = Arc::new(api);
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
        let api = api.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| handle_request(req, api.clone()));

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving HTTP connection from {}: {}", peer_addr, e);
            }
        });
    }

    if let Err(e) = agent.shutdown().await {
        warn!("Deregistration failed: {}", e);
    }
    info!("{} stopped with {} records", settings.service_name, api.store().len().await);
    Ok(())
}

async fn handle_request<T: Resource>(
    req: Request<Incoming>,
    api: Arc<ResourceApi<T>>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let request = ProxyRequest::from_incoming(req).await?;
    let response = api.handle(&request).await;
    debug!("{} {} -> {}", request.method, request.path_and_query, response.status());
    Ok(response.map(Full::new))
}
