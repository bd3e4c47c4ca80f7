//! Gateway router: resolves a request to a logical service, picks an
//! instance and forwards, failing over to one alternate instance at most.

use async_trait::async_trait;
use fleet_api::ClientId;
use hyper::{body::Bytes, Method, Response, StatusCode};
use router_core::{RoutingTable, ServiceInstance, ServiceRegistry};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::forwarder::{ForwardError, ProxyRequest, Upstream};
use crate::load_balancer::LoadBalancer;
use crate::metrics::MetricsCollector;
use crate::policy::TrafficPolicy;
use crate::referential::{ClientLookup, LookupOutcome, ReferencePolicy};

/// Service label used for requests that matched no route
const UNMATCHED_SERVICE: &str = "unmatched";

/// Lifecycle of one proxied request.
///
/// `Resolving -> Selecting -> Forwarding -> {Succeeded | RetryingOnce ->
/// {Succeeded | Failed}}`. Succeeded and Failed are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    Resolving,
    Selecting,
    Forwarding,
    RetryingOnce,
    Succeeded,
    Failed,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Resolving => "resolving",
            RequestState::Selecting => "selecting",
            RequestState::Forwarding => "forwarding",
            RequestState::RetryingOnce => "retrying_once",
            RequestState::Succeeded => "succeeded",
            RequestState::Failed => "failed",
        }
    }
}

/// Why a single attempt did not produce a usable response
struct AttemptFailure {
    reason: String,
    timed_out: bool,
}

impl AttemptFailure {
    fn into_error(self, service: &str) -> GatewayError {
        GatewayError::UpstreamFailure {
            service: service.to_string(),
            reason: self.reason,
            timed_out: self.timed_out,
        }
    }
}

pub struct GatewayRouter {
    routes: RoutingTable,
    registry: Arc<ServiceRegistry>,
    balancer: LoadBalancer,
    upstream: Arc<dyn Upstream>,
    policy: TrafficPolicy,
    references: ReferencePolicy,
    metrics: Option<MetricsCollector>,
}

impl GatewayRouter {
    pub fn new(
        routes: RoutingTable,
        registry: Arc<ServiceRegistry>,
        upstream: Arc<dyn Upstream>,
    ) -> Self {
        Self {
            routes,
            registry,
            balancer: LoadBalancer::new(),
            upstream,
            policy: TrafficPolicy::default(),
            references: ReferencePolicy::default(),
            metrics: None,
        }
    }

    pub fn with_policy(mut self, policy: TrafficPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_references(mut self, references: ReferencePolicy) -> Self {
        self.references = references;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Handle one inbound request. Gateway failures become tagged error
    /// responses; backend responses are returned unchanged.
    pub async fn handle(&self, request: ProxyRequest) -> Response<Bytes> {
        let started = Instant::now();
        let (service, result) = self.route(&request).await;

        match result {
            Ok(response) => {
                self.record_request(&service, RequestState::Succeeded.as_str(), started);
                response
            }
            Err(error) => {
                debug!(
                    service = %service,
                    state = RequestState::Failed.as_str(),
                    "{} {}: {}",
                    request.method,
                    request.path_and_query,
                    error
                );
                self.record_request(&service, error.kind(), started);
                error.into_response()
            }
        }
    }

    /// Resolve, apply the reference policy and dispatch. Returns the service
    /// label the outcome is accounted under.
    async fn route(
        &self,
        request: &ProxyRequest,
    ) -> (String, Result<Response<Bytes>, GatewayError>) {
        debug!(state = RequestState::Resolving.as_str(), "Resolving {}", request.path());
        let service = match self.routes.resolve(request.path()) {
            Ok(rule) => rule.service.clone(),
            Err(_) => {
                return (
                    UNMATCHED_SERVICE.to_string(),
                    Err(GatewayError::NoRoute(request.path().to_string())),
                )
            }
        };

        if let Err(error) = self.references.check(self, &service, request).await {
            return (service, Err(error));
        }

        let result = self.dispatch(&service, request).await;
        (service, result)
    }

    /// Select an instance of `service` and forward, retrying once on a
    /// different instance when the attempt fails
    pub async fn dispatch(
        &self,
        service: &str,
        request: &ProxyRequest,
    ) -> Result<Response<Bytes>, GatewayError> {
        debug!(service = %service, state = RequestState::Selecting.as_str(), "Selecting instance");
        let selection = self
            .registry
            .list_selectable(service, self.policy.degraded_fallback)
            .await;
        if selection.degraded {
            warn!(service = %service, "No healthy instance, routing to suspect instances");
        }

        // backpressure: nothing selectable means no outbound connection
        let Some(first) = self.balancer.select(service, &selection.instances) else {
            return Err(GatewayError::ServiceUnavailable(service.to_string()));
        };

        debug!(
            service = %service,
            state = RequestState::Forwarding.as_str(),
            "Forwarding to {}",
            first.address()
        );
        let failure = match self.attempt(service, first, request).await {
            Ok(response) => return Ok(response),
            Err(failure) => failure,
        };

        if self.policy.retry.max_attempts() < 2 {
            return Err(failure.into_error(service));
        }
        let Some(alternate) = self
            .balancer
            .select_excluding(service, &selection.instances, &first.instance_id)
        else {
            debug!(service = %service, "No alternate instance to retry on");
            return Err(failure.into_error(service));
        };

        debug!(
            service = %service,
            state = RequestState::RetryingOnce.as_str(),
            failed = %first.instance_id,
            instance = %alternate.instance_id,
            "Retrying on alternate instance: {}",
            failure.reason
        );
        if let Some(metrics) = &self.metrics {
            metrics.gateway_retries_total.with_label_values(&[service]).inc();
        }

        self.attempt(service, alternate, request)
            .await
            .map_err(|failure| failure.into_error(service))
    }

    async fn attempt(
        &self,
        service: &str,
        instance: &ServiceInstance,
        request: &ProxyRequest,
    ) -> Result<Response<Bytes>, AttemptFailure> {
        let (result, failure) = match self.upstream.send(instance, request).await {
            Ok(response) if !self.policy.retry.is_failure(response.status()) => {
                self.record_attempt(service, "ok");
                return Ok(response);
            }
            Ok(response) => (
                "error_status",
                AttemptFailure {
                    reason: format!("{} answered {}", instance.address(), response.status()),
                    timed_out: false,
                },
            ),
            Err(ForwardError::Timeout(after)) => (
                "timeout",
                AttemptFailure {
                    reason: format!("{} timed out after {:?}", instance.address(), after),
                    timed_out: true,
                },
            ),
            Err(e) => (
                "transport",
                AttemptFailure {
                    reason: format!("{}: {}", instance.address(), e),
                    timed_out: false,
                },
            ),
        };

        self.record_attempt(service, result);
        warn!(
            service = %service,
            instance = %instance.instance_id,
            "Forward attempt failed: {}",
            failure.reason
        );
        Err(failure)
    }

    fn record_attempt(&self, service: &str, result: &str) {
        if let Some(metrics) = &self.metrics {
            metrics
                .gateway_upstream_attempts_total
                .with_label_values(&[service, result])
                .inc();
        }
    }

    fn record_request(&self, service: &str, outcome: &str, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics
                .gateway_requests_total
                .with_label_values(&[service, outcome])
                .inc();
            metrics
                .gateway_request_duration_seconds
                .with_label_values(&[service])
                .observe(started.elapsed().as_secs_f64());
        }
    }
}

#[async_trait]
impl ClientLookup for GatewayRouter {
    /// Fetch the client through the regular dispatch path, so the lookup gets
    /// the same selection and single retry as any proxied request
    async fn lookup_client(&self, client_id: ClientId) -> LookupOutcome {
        let request = ProxyRequest::new(Method::GET, self.references.client_path(client_id));

        match self.dispatch(&self.references.client_service, &request).await {
            Ok(response) if response.status().is_success() => LookupOutcome::Found,
            Ok(response) if response.status() == StatusCode::NOT_FOUND => LookupOutcome::Missing,
            Ok(response) => LookupOutcome::Unreachable(format!(
                "{} answered {}",
                self.references.client_service,
                response.status()
            )),
            Err(error) => LookupOutcome::Unreachable(error.to_string()),
        }
    }
}
