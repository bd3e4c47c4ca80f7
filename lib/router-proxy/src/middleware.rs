//! Middleware framework for request/response processing

use anyhow::Result;
use hyper::Request;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, span, warn, Instrument, Level};

/// Context passed through middleware chain
#[derive(Clone)]
pub struct MiddlewareContext {
    /// Per-request id, logged by every hook
    pub request_id: String,
    pub path: String,
    pub method: String,
    pub started: Instant,
}

impl MiddlewareContext {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            path: path.to_string(),
            method: method.to_string(),
            started: Instant::now(),
        }
    }

    pub fn from_request<B>(req: &Request<B>) -> Self {
        Self::new(req.method().as_str(), req.uri().path())
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Middleware trait for processing requests and responses
#[async_trait::async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str {
        "UnnamedMiddleware"
    }

    /// Called before request is processed
    async fn on_request(&self, _context: &MiddlewareContext) -> Result<()> {
        Ok(())
    }

    /// Called once the response status is known
    async fn on_response(&self, _context: &MiddlewareContext, _status: u16) -> Result<()> {
        Ok(())
    }

    /// Called on error
    async fn on_error(&self, _context: &MiddlewareContext, _error: &str) -> Result<()> {
        Ok(())
    }
}

/// Chain of middleware to execute in order
pub struct MiddlewareChain {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self {
            middleware: Vec::new(),
        }
    }

    pub fn add<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Process request through all middleware
    pub async fn on_request(&self, context: &MiddlewareContext) -> Result<()> {
        for mw in &self.middleware {
            let span = span!(Level::DEBUG, "middleware", name = mw.name());
            mw.on_request(context).instrument(span).await?;
        }
        Ok(())
    }

    /// Process response through all middleware (in reverse order)
    pub async fn on_response(&self, context: &MiddlewareContext, status: u16) -> Result<()> {
        for mw in self.middleware.iter().rev() {
            let span = span!(Level::DEBUG, "middleware", name = mw.name());
            mw.on_response(context, status).instrument(span).await?;
        }
        Ok(())
    }

    /// Process error through all middleware
    pub async fn on_error(&self, context: &MiddlewareContext, error: &str) -> Result<()> {
        for mw in &self.middleware {
            let span = span!(Level::DEBUG, "middleware", name = mw.name());
            mw.on_error(context, error).instrument(span).await?;
        }
        Ok(())
    }
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs request start and completion with the request id and latency
pub struct LoggingMiddleware;

#[async_trait::async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "LoggingMiddleware"
    }

    async fn on_request(&self, context: &MiddlewareContext) -> Result<()> {
        debug!(
            request_id = %context.request_id,
            method = %context.method,
            path = %context.path,
            "Request started"
        );
        Ok(())
    }

    async fn on_response(&self, context: &MiddlewareContext, status: u16) -> Result<()> {
        info!(
            request_id = %context.request_id,
            method = %context.method,
            path = %context.path,
            status = status,
            elapsed_ms = context.elapsed().as_millis() as u64,
            "Request completed"
        );
        Ok(())
    }

    async fn on_error(&self, context: &MiddlewareContext, error: &str) -> Result<()> {
        warn!(
            request_id = %context.request_id,
            method = %context.method,
            path = %context.path,
            error = %error,
            "Request failed"
        );
        Ok(())
    }
}
