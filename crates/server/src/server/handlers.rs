//! Axum request handlers.

use std::any::Any;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::protocol::{ErrorResponse, HealthResponse};
use tracing::error;

/// Body of `GET /`.
pub const GREETING: &str = "Hello World";

/// `GET /`
pub async fn hello() -> &'static str {
    GREETING
}

/// `GET /health`: liveness check.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Catch-all 404 handler.
pub async fn not_found() -> impl IntoResponse {
    let err = ErrorResponse::new("not_found", "the requested resource does not exist");
    (StatusCode::NOT_FOUND, Json(err))
}

/// Response for a handler that panicked. The panic payload is logged, never
/// returned to the client.
pub fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    };
    error!(panic = %detail, "request handler panicked");

    let err = ErrorResponse::new("internal_error", "the server failed to handle the request");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(err)).into_response()
}
