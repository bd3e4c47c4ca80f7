//! Request path of the gateway
//!
//! This library provides:
//! - Gateway router with round-robin selection and a single failover attempt
//! - Request forwarding over pooled HTTP/1 connections
//! - Health monitor applying heartbeat thresholds and optional probes
//! - Vehicle → client reference policy
//! - Middleware chain and Prometheus metrics
pub mod error;
pub mod forwarder;
pub mod gateway;
pub mod health_check;
pub mod http;
pub mod load_balancer;
pub mod metrics;
pub mod middleware;
pub mod policy;
pub mod referential;

pub use error::{GatewayError, GATEWAY_ERROR_HEADER};
pub use forwarder::{ForwardError, ProxyRequest, RequestForwarder, Upstream};
pub use gateway::{GatewayRouter, RequestState};
pub use health_check::{HealthCheckConfig, HealthChecker, HealthMonitor, ProbeConfig};
pub use http::{empty_response, json_response, text_response};
pub use load_balancer::LoadBalancer;
pub use metrics::{MetricsCollector, MetricsMiddleware};
pub use middleware::{LoggingMiddleware, Middleware, MiddlewareChain, MiddlewareContext};
pub use policy::{RetryPolicy, TimeoutPolicy, TrafficPolicy};
pub use referential::{ClientLookup, LookupOutcome, ReferenceMode, ReferencePolicy};
