pub mod chains;
pub mod device;
pub mod routines;
pub mod selection;
pub mod states;

use crate::error::EngineError;
use crate::state::SharedState;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

/// Error returned by handlers. Engine errors map onto 404/503 so clients can
/// fall back to bundled assets.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorResponse {
                error: "bad_request",
                message: message.into(),
            },
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: ErrorResponse {
                error: "not_found",
                message: message.into(),
            },
        }
    }

    pub fn store_unavailable() -> Self {
        EngineError::BackingStoreUnavailable("write was not persisted".into()).into()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let (status, error) = match &err {
            EngineError::NoContentAvailable => (StatusCode::NOT_FOUND, "no_content"),
            EngineError::ConfigurationMissing { .. } => {
                (StatusCode::NOT_FOUND, "configuration_missing")
            }
            EngineError::BackingStoreUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
            }
        };
        Self {
            status,
            body: ErrorResponse {
                error,
                message: err.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

async fn health() -> &'static str {
    "OK"
}

pub fn routes(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(selection::router(state.clone()))
        .merge(states::router())
        .nest("/routines", routines::router(state.clone()))
        .nest("/chains", chains::router(state))
}
