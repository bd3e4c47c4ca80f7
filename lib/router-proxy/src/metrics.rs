//! Prometheus metrics for the gateway and the registry

use anyhow::Result;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use router_core::InstanceStatus;
use std::sync::Arc;
use tracing::debug;

use crate::middleware::{Middleware, MiddlewareContext};

/// Prometheus metrics collector. Clones share the same registry.
#[derive(Clone)]
pub struct MetricsCollector {
    /// Inbound HTTP requests by method and response status
    pub http_requests_total: CounterVec,
    /// Inbound request latency by method
    pub http_request_duration_seconds: HistogramVec,
    /// Proxied requests by service and outcome (succeeded / failed kind)
    pub gateway_requests_total: CounterVec,
    /// Proxied request latency by service, retries included
    pub gateway_request_duration_seconds: HistogramVec,
    /// Forward attempts by service and result
    pub gateway_upstream_attempts_total: CounterVec,
    /// Failover attempts by service
    pub gateway_retries_total: CounterVec,
    /// Registered instances by service and status
    pub registry_instances: IntGaugeVec,
    pub registry: Arc<Registry>,
}

impl MetricsCollector {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total inbound HTTP requests"),
            &["method", "status"],
        )?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Inbound request latency in seconds",
            ),
            &["method"],
        )?;

        let gateway_requests_total = CounterVec::new(
            Opts::new("gateway_requests_total", "Proxied requests by outcome"),
            &["service", "outcome"],
        )?;

        let gateway_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "gateway_request_duration_seconds",
                "Proxied request latency in seconds, retries included",
            ),
            &["service"],
        )?;

        let gateway_upstream_attempts_total = CounterVec::new(
            Opts::new("gateway_upstream_attempts_total", "Forward attempts by result"),
            &["service", "result"],
        )?;

        let gateway_retries_total = CounterVec::new(
            Opts::new("gateway_retries_total", "Failover attempts on an alternate instance"),
            &["service"],
        )?;

        let registry_instances = IntGaugeVec::new(
            Opts::new("registry_instances", "Registered instances by status"),
            &["service", "status"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(gateway_requests_total.clone()))?;
        registry.register(Box::new(gateway_request_duration_seconds.clone()))?;
        registry.register(Box::new(gateway_upstream_attempts_total.clone()))?;
        registry.register(Box::new(gateway_retries_total.clone()))?;
        registry.register(Box::new(registry_instances.clone()))?;

        Ok(Self {
            http_requests_total,
            http_request_duration_seconds,
            gateway_requests_total,
            gateway_request_duration_seconds,
            gateway_upstream_attempts_total,
            gateway_retries_total,
            registry_instances,
            registry,
        })
    }

    /// Replace the registry gauges with fresh counts
    pub fn set_instance_counts(&self, counts: &[(String, InstanceStatus, usize)]) {
        self.registry_instances.reset();
        for (service, status, count) in counts {
            self.registry_instances
                .with_label_values(&[service.as_str(), status.as_str()])
                .set(*count as i64);
        }
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Records inbound request counts and latency
pub struct MetricsMiddleware {
    pub collector: MetricsCollector,
}

impl MetricsMiddleware {
    pub fn new(collector: MetricsCollector) -> Self {
        Self { collector }
    }
}

#[async_trait::async_trait]
impl Middleware for MetricsMiddleware {
    fn name(&self) -> &'static str {
        "MetricsMiddleware"
    }

    async fn on_response(&self, context: &MiddlewareContext, status: u16) -> Result<()> {
        debug!("Recording metrics for {} {} -> {}", context.method, context.path, status);

        let status = status.to_string();
        self.collector
            .http_requests_total
            .with_label_values(&[context.method.as_str(), status.as_str()])
            .inc();
        self.collector
            .http_request_duration_seconds
            .with_label_values(&[context.method.as_str()])
            .observe(context.elapsed().as_secs_f64());

        Ok(())
    }
}
