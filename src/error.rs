// src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

use crate::article::StoreError;
use crate::engine::EnrichError;
use crate::jobs::DispatchError;

/// Errors a handler can return; each maps to one HTTP status.
#[derive(Debug)]
pub enum ApiError {
    Enrich(EnrichError),
    Dispatch(DispatchError),
    Store(StoreError),
    NotFound(String),
    BadRequest(String),
    /// The request needs an integration that is not configured (e.g. no NewsAPI key).
    Unavailable(String),
    /// An upstream service answered with an error.
    Upstream(anyhow::Error),
    Internal(anyhow::Error),
}

impl From<EnrichError> for ApiError {
    fn from(err: EnrichError) -> Self {
        ApiError::Enrich(err)
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        ApiError::Dispatch(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Persist(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Enrich(e) => {
                let status = match &e {
                    EnrichError::NotFound(_) => StatusCode::NOT_FOUND,
                    EnrichError::EmptyText(_) => StatusCode::BAD_REQUEST,
                    EnrichError::Store(s) => store_status(s),
                };
                (status, e.to_string())
            }
            ApiError::Dispatch(e) => {
                let status = match &e {
                    DispatchError::QueueFull { .. } | DispatchError::Closed => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    DispatchError::Store(s) => store_status(s),
                };
                warn!(error = %e, "dispatch rejected");
                (status, e.to_string())
            }
            ApiError::Store(e) => {
                error!(error = %e, "store error");
                (store_status(&e), e.to_string())
            }
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            ApiError::Upstream(e) => {
                warn!(error = %e, "upstream error");
                (StatusCode::BAD_GATEWAY, format!("{e:#}"))
            }
            ApiError::Internal(e) => {
                error!(error = ?e, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred.".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
