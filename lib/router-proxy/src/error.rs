use fleet_api::ClientId;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{body::Bytes, Response, StatusCode};
use serde::Serialize;
use thiserror::Error;

use crate::http::json_response;

/// Header naming the kind of a gateway-generated failure
pub const GATEWAY_ERROR_HEADER: &str = "x-gateway-error";

/// Failures produced by the gateway itself, as opposed to domain answers
/// from a resource service, which pass through unchanged
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("No route for {0}")]
    NoRoute(String),

    #[error("No available instance of {0}")]
    ServiceUnavailable(String),

    #[error("Upstream {service} failed: {reason}")]
    UpstreamFailure {
        service: String,
        reason: String,
        timed_out: bool,
    },

    #[error("Client {0} does not exist")]
    DanglingReference(ClientId),

    #[error("Dependency {service} unavailable: {reason}")]
    DependencyUnavailable { service: String, reason: String },
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl GatewayError {
    /// Stable identifier, sent in the `x-gateway-error` header
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::NoRoute(_) => "no-route",
            GatewayError::ServiceUnavailable(_) => "service-unavailable",
            GatewayError::UpstreamFailure { .. } => "upstream-failure",
            GatewayError::DanglingReference(_) => "dangling-reference",
            GatewayError::DependencyUnavailable { .. } => "dependency-unavailable",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NoRoute(_) => StatusCode::NOT_FOUND,
            GatewayError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UpstreamFailure { timed_out: true, .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamFailure { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::DanglingReference(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::DependencyUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn into_response(self) -> Response<Bytes> {
        let kind = self.kind();
        let mut response = json_response(
            self.status(),
            &ErrorBody {
                error: kind,
                message: self.to_string(),
            },
        );
        response.headers_mut().insert(
            HeaderName::from_static(GATEWAY_ERROR_HEADER),
            HeaderValue::from_static(kind),
        );
        response
    }
}
