//! HTTP surface of the service registry under `/registry`

use fleet_api::{InstanceView, RegisterInstance};
use hyper::{body::Bytes, Method, Response, StatusCode};
use router_core::{CoreError, ServiceRegistry};
use router_proxy::{empty_response, json_response, ProxyRequest};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

pub const REGISTRY_PREFIX: &str = "/registry";

#[derive(Serialize)]
struct RegistryError {
    error: &'static str,
    message: String,
}

fn error_response(
    status: StatusCode,
    error: &'static str,
    message: impl Into<String>,
) -> Response<Bytes> {
    json_response(
        status,
        &RegistryError {
            error,
            message: message.into(),
        },
    )
}

fn core_error_response(error: CoreError) -> Response<Bytes> {
    match error {
        CoreError::InstanceNotFound { .. } => {
            error_response(StatusCode::NOT_FOUND, "not-found", error.to_string())
        }
        other => error_response(StatusCode::BAD_REQUEST, "invalid-registration", other.to_string()),
    }
}

/// Serve a registry request. Returns None for paths outside `/registry`.
pub async fn handle(registry: &ServiceRegistry, request: &ProxyRequest) -> Option<Response<Bytes>> {
    let path = request.path();
    let rest = path.strip_prefix(REGISTRY_PREFIX)?;
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

    let response = match (&request.method, segments.as_slice()) {
        (&Method::GET, ["services"]) => json_response(StatusCode::OK, &registry.services().await),
        (&Method::POST, ["instances"]) => register(registry, &request.body).await,
        (&Method::GET, ["instances", service]) => {
            let now = Instant::now();
            let views: Vec<InstanceView> = registry
                .list_instances(service)
                .await
                .iter()
                .map(|instance| instance.view(now))
                .collect();
            json_response(StatusCode::OK, &views)
        }
        (&Method::PUT, ["instances", service, instance_id, "heartbeat"]) => {
            match registry.heartbeat(service, instance_id).await {
                Ok(instance) => json_response(StatusCode::OK, &instance.view(Instant::now())),
                Err(e) => {
                    debug!("Heartbeat rejected: {}", e);
                    core_error_response(e)
                }
            }
        }
        (&Method::DELETE, ["instances", service, instance_id]) => {
            if registry.deregister(service, instance_id).await {
                info!(service = %service, instance = %instance_id, "Instance deregistered");
            }
            empty_response(StatusCode::NO_CONTENT)
        }
        (_, ["services"]) | (_, ["instances", ..]) => error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "method-not-allowed",
            format!("{} not allowed on {}", request.method, path),
        ),
        _ => error_response(
            StatusCode::NOT_FOUND,
            "not-found",
            format!("No registry resource at {}", path),
        ),
    };

    Some(response)
}

async fn register(registry: &ServiceRegistry, body: &Bytes) -> Response<Bytes> {
    let registration: RegisterInstance = match serde_json::from_slice(body) {
        Ok(registration) => registration,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid-registration", e.to_string());
        }
    };

    match registry.register(registration).await {
        Ok(instance) => {
            info!(
                service = %instance.service_name,
                instance = %instance.instance_id,
                address = %instance.address(),
                "Instance registered"
            );
            json_response(StatusCode::OK, &instance.view(Instant::now()))
        }
        Err(e) => core_error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_api::InstanceStatus;

    fn post(path: &str, body: &'static str) -> ProxyRequest {
        ProxyRequest::new(Method::POST, path).with_body(body)
    }

    async fn call(registry: &ServiceRegistry, request: ProxyRequest) -> Response<Bytes> {
        handle(registry, &request).await.expect("registry path")
    }

    #[tokio::test]
    async fn test_register_and_list() {
        let registry = ServiceRegistry::new();
        let response = call(
            &registry,
            post(
                "/registry/instances",
                r#"{"serviceName":"client-service","host":"127.0.0.1","port":8081}"#,
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let view: InstanceView = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(view.service_name, "client-service");
        assert_eq!(view.status, InstanceStatus::Healthy);
        assert!(!view.instance_id.is_empty());

        let response = call(&registry, ProxyRequest::new(Method::GET, "/registry/services")).await;
        let services: Vec<String> = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(services, vec!["client-service"]);

        let response = call(
            &registry,
            ProxyRequest::new(Method::GET, "/registry/instances/client-service"),
        )
        .await;
        let views: Vec<InstanceView> = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].instance_id, view.instance_id);
    }

    #[tokio::test]
    async fn test_invalid_registration() {
        let registry = ServiceRegistry::new();
        let response = call(&registry, post("/registry/instances", "not json")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = call(
            &registry,
            post("/registry/instances", r#"{"serviceName":"","host":"h","port":1}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(registry.instance_count().await, 0);
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_is_not_found() {
        let registry = ServiceRegistry::new();
        let response = call(
            &registry,
            ProxyRequest::new(Method::PUT, "/registry/instances/client-service/ghost/heartbeat"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_heartbeat_and_deregister() {
        let registry = ServiceRegistry::new();
        call(
            &registry,
            post(
                "/registry/instances",
                r#"{"serviceName":"client-service","instanceId":"a","host":"127.0.0.1","port":8081}"#,
            ),
        )
        .await;

        let response = call(
            &registry,
            ProxyRequest::new(Method::PUT, "/registry/instances/client-service/a/heartbeat"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        for _ in 0..2 {
            let response = call(
                &registry,
                ProxyRequest::new(Method::DELETE, "/registry/instances/client-service/a"),
            )
            .await;
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }
        assert_eq!(registry.instance_count().await, 0);
    }

    #[tokio::test]
    async fn test_non_registry_paths_are_ignored() {
        let registry = ServiceRegistry::new();
        assert!(handle(&registry, &ProxyRequest::new(Method::GET, "/api/clients")).await.is_none());
        assert!(handle(&registry, &ProxyRequest::new(Method::GET, "/registryx")).await.is_none());

        let response =
            call(&registry, ProxyRequest::new(Method::PATCH, "/registry/services")).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let response = call(&registry, ProxyRequest::new(Method::GET, "/registry/unknown")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
