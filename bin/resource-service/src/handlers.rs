//! CRUD routes of one resource collection

use fleet_api::Resource;
use hyper::{body::Bytes, Method, Response, StatusCode};
use router_proxy::{empty_response, json_response, text_response, ProxyRequest};
use serde::Serialize;
use tracing::{debug, info};

use crate::store::{Store, StoreError};

#[derive(Serialize)]
struct ErrorBody {
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
        &ErrorBody {
            error,
            message: message.into(),
        },
    )
}

fn store_error_response(error: StoreError) -> Response<Bytes> {
    match &error {
        StoreError::Invalid(_) => {
            error_response(StatusCode::BAD_REQUEST, "validation", error.to_string())
        }
        StoreError::Conflict { .. } => {
            error_response(StatusCode::CONFLICT, "conflict", error.to_string())
        }
        StoreError::NotFound { .. } => {
            error_response(StatusCode::NOT_FOUND, "not-found", error.to_string())
        }
    }
}

/// ResourceApi serves `{base}`, `{base}/{id}`, `{base}/health` and, when
/// enabled, `{base}/client/{clientId}`
pub struct ResourceApi<T: Resource> {
    base: String,
    store: Store<T>,
    client_filter: bool,
}

impl<T: Resource> ResourceApi<T> {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            store: Store::new(),
            client_filter: false,
        }
    }

    /// Serve the list-by-client route
    pub fn with_client_filter(mut self) -> Self {
        self.client_filter = true;
        self
    }

    pub fn store(&self) -> &Store<T> {
        &self.store
    }

    pub async fn handle(&self, request: &ProxyRequest) -> Response<Bytes> {
        let path = request.path();
        if path == "/health" {
            return text_response(StatusCode::OK, format!("{} service is up\n", T::KIND));
        }

        let Some(rest) = path.strip_prefix(self.base.as_str()) else {
            return error_response(
                StatusCode::NOT_FOUND,
                "not-found",
                format!("No resource at {}", path),
            );
        };
        if !rest.is_empty() && !rest.starts_with('/') {
            return error_response(
                StatusCode::NOT_FOUND,
                "not-found",
                format!("No resource at {}", path),
            );
        }
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

        match (&request.method, segments.as_slice()) {
            (&Method::GET, []) => json_response(StatusCode::OK, &self.store.list().await),
            (&Method::POST, []) => self.create(&request.body).await,
            (&Method::GET, ["health"]) => {
                text_response(StatusCode::OK, format!("{} service is up\n", T::KIND))
            }
            (&Method::GET, ["client", client_id]) if self.client_filter => {
                self.by_client(client_id).await
            }
            (method, [id]) => {
                let Ok(id) = id.parse::<u64>() else {
                    return error_response(
                        StatusCode::BAD_REQUEST,
                        "validation",
                        format!("Invalid id {}", id),
                    );
                };
                match *method {
                    Method::GET => match self.store.get(id).await {
                        Some(record) => json_response(StatusCode::OK, &record),
                        None => store_error_response(StoreError::NotFound { kind: T::KIND, id }),
                    },
                    Method::PUT => self.update(id, &request.body).await,
                    Method::DELETE => match self.store.delete(id).await {
                        Ok(_) => {
                            info!("Deleted {} {}", T::KIND, id);
                            empty_response(StatusCode::NO_CONTENT)
                        }
                        Err(e) => store_error_response(e),
                    },
                    _ => Self::method_not_allowed(request),
                }
            }
            (_, []) => Self::method_not_allowed(request),
            _ => error_response(
                StatusCode::NOT_FOUND,
                "not-found",
                format!("No resource at {}", path),
            ),
        }
    }

    async fn by_client(&self, client_id: &str) -> Response<Bytes> {
        let Ok(client_id) = client_id.parse::<u64>() else {
            return error_response(
                StatusCode::BAD_REQUEST,
                "validation",
                format!("Invalid client id {}", client_id),
            );
        };
        let records = self
            .store
            .filter(|r| r.client_reference() == Some(client_id))
            .await;
        json_response(StatusCode::OK, &records)
    }

    fn method_not_allowed(request: &ProxyRequest) -> Response<Bytes> {
        error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "method-not-allowed",
            format!("{} not allowed on {}", request.method, request.path()),
        )
    }

    fn parse(body: &Bytes) -> Result<T, Response<Bytes>> {
        serde_json::from_slice(body).map_err(|e| {
            debug!("Rejected {} body: {}", T::KIND, e);
            error_response(
                StatusCode::BAD_REQUEST,
                "validation",
                format!("Invalid {} document: {}", T::KIND, e),
            )
        })
    }

    async fn create(&self, body: &Bytes) -> Response<Bytes> {
        let record = match Self::parse(body) {
            Ok(record) => record,
            Err(response) => return response,
        };
        match self.store.create(record).await {
            Ok(created) => {
                info!("Created {} {:?}", T::KIND, created.id());
                json_response(StatusCode::CREATED, &created)
            }
            Err(e) => store_error_response(e),
        }
    }

    async fn update(&self, id: u64, body: &Bytes) -> Response<Bytes> {
        let record = match Self::parse(body) {
            Ok(record) => record,
            Err(response) => return response,
        };
        match self.store.update(id, record).await {
            Ok(updated) => json_response(StatusCode::OK, &updated),
            Err(e) => store_error_response(e),
        }
    }
}
