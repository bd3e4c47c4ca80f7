//! HTTP request forwarding to selected backend instances

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::HeaderMap;
use hyper::{Method, Request, Response, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use router_core::ServiceInstance;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout as tokio_timeout;
use tracing::debug;

use crate::policy::TimeoutPolicy;

/// Prefix of headers that steer the gateway and never reach a backend
pub const GATEWAY_HEADER_PREFIX: &str = "x-gateway-";

/// An inbound request with its body buffered, so it can be sent to a
/// second instance when the first attempt fails
#[derive(Clone, Debug)]
pub struct ProxyRequest {
    pub method: Method,
    /// Path plus query string, forwarded unchanged
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyRequest {
    pub fn new(method: Method, path_and_query: impl Into<String>) -> Self {
        Self {
            method,
            path_and_query: path_and_query.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Buffer an inbound hyper request
    pub async fn from_incoming(request: Request<Incoming>) -> Result<Self, hyper::Error> {
        let (parts, body) = request.into_parts();
        let body = body.collect().await?.to_bytes();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());

        Ok(Self {
            method: parts.method,
            path_and_query,
            headers: parts.headers,
            body,
        })
    }

    /// Path without the query string
    pub fn path(&self) -> &str {
        self.path_and_query
            .split_once('?')
            .map(|(path, _)| path)
            .unwrap_or(&self.path_and_query)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForwardError {
    #[error("invalid upstream uri {0}")]
    InvalidUri(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Sends one attempt of a request to one instance
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn send(
        &self,
        instance: &ServiceInstance,
        request: &ProxyRequest,
    ) -> Result<Response<Bytes>, ForwardError>;
}

/// HTTP request forwarder with connection pooling and a per-attempt timeout
pub struct RequestForwarder {
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl RequestForwarder {
    pub fn new(policy: &TimeoutPolicy) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(policy.connect_timeout));
        connector.set_keepalive(Some(Duration::from_secs(30)));

        let client = Client::builder(TokioExecutor::new()).build::<_, Full<Bytes>>(connector);

        Self {
            client,
            timeout: policy.attempt_timeout,
        }
    }

    /// Build a target URL for an instance
    pub fn build_target_url(instance: &ServiceInstance, path_and_query: &str) -> String {
        format!("{}{}", instance.base_url(), path_and_query)
    }

    /// Headers sent upstream: everything but hop-by-hop, `host` (set by the
    /// client for the target) and gateway-internal headers
    pub fn outbound_headers(headers: &HeaderMap) -> HeaderMap {
        let mut filtered = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers.iter() {
            let name_str = name.as_str();
            if Self::is_hop_by_hop_header(name_str)
                || name_str == "host"
                || name_str.starts_with(GATEWAY_HEADER_PREFIX)
            {
                continue;
            }
            filtered.append(name.clone(), value.clone());
        }
        filtered
    }

    /// Headers returned to the caller: the backend's, minus hop-by-hop ones,
    /// which belong to the gateway-to-backend connection
    pub fn response_headers(headers: &HeaderMap) -> HeaderMap {
        let mut filtered = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers.iter() {
            if !Self::is_hop_by_hop_header(name.as_str()) {
                filtered.append(name.clone(), value.clone());
            }
        }
        filtered
    }

    /// Check if header is hop-by-hop (should not be forwarded)
    fn is_hop_by_hop_header(name: &str) -> bool {
        matches!(
            name,
            "connection"
                | "keep-alive"
                | "proxy-authenticate"
                | "proxy-authorization"
                | "te"
                | "trailers"
                | "transfer-encoding"
                | "upgrade"
        )
    }

    async fn send_once(
        &self,
        uri: Uri,
        request: &ProxyRequest,
    ) -> Result<Response<Bytes>, ForwardError> {
        let mut outbound = Request::new(Full::new(request.body.clone()));
        *outbound.method_mut() = request.method.clone();
        *outbound.uri_mut() = uri;
        *outbound.headers_mut() = Self::outbound_headers(&request.headers);

        let response = self
            .client
            .request(outbound)
            .await
            .map_err(|e| ForwardError::Transport(e.to_string()))?;

        let (mut parts, body) = response.into_parts();
        parts.headers = Self::response_headers(&parts.headers);
        let body = body
            .collect()
            .await
            .map_err(|e| ForwardError::Transport(format!("reading response body: {}", e)))?
            .to_bytes();

        Ok(Response::from_parts(parts, body))
    }
}

#[async_trait]
impl Upstream for RequestForwarder {
    async fn send(
        &self,
        instance: &ServiceInstance,
        request: &ProxyRequest,
    ) -> Result<Response<Bytes>, ForwardError> {
        let target = Self::build_target_url(instance, &request.path_and_query);
        let uri: Uri = target
            .parse()
            .map_err(|_| ForwardError::InvalidUri(target.clone()))?;

        debug!("Forwarding {} to {}", request.method, target);

        match tokio_timeout(self.timeout, self.send_once(uri, request)).await {
            Ok(result) => result,
            Err(_) => Err(ForwardError::Timeout(self.timeout)),
        }
    }
}
