//! The routing pipeline shared by every connector.

use std::time::Duration;

use axum::{routing::get, Router};
use common::BootstrapError;
use tower_http::{
    catch_panic::CatchPanicLayer,
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, TraceLayer},
    LatencyUnit,
};
use tracing::Level;

use super::{
    handlers,
    middleware::{self, AccessSpan, CorsPolicy},
};

/// Settings for [`Pipeline::build`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub cors: CorsPolicy,
    pub request_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cors: CorsPolicy::permissive(),
            request_timeout: middleware::REQUEST_TIMEOUT,
        }
    }
}

/// Immutable middleware chain + route table. Cloning is cheap; every
/// connector serves the same pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    router: Router,
}

impl Pipeline {
    /// Assemble the application routes behind the standard layers.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Parameter`] if the CORS policy is invalid.
    pub fn build(config: &PipelineConfig) -> Result<Self, BootstrapError> {
        Self::with_routes(routes(), config)
    }

    /// Wrap an arbitrary route table in the standard layers.
    ///
    /// Per request: access log, CORS, timeout, panic capture, routes.
    pub fn with_routes(routes: Router, config: &PipelineConfig) -> Result<Self, BootstrapError> {
        let access_log = TraceLayer::new_for_http()
            .make_span_with(AccessSpan)
            .on_response(
                DefaultOnResponse::new()
                    .level(Level::INFO)
                    .latency_unit(LatencyUnit::Millis),
            );

        let router = routes
            .fallback(handlers::not_found)
            .layer(CatchPanicLayer::custom(handlers::panic_response))
            .layer(TimeoutLayer::new(config.request_timeout))
            .layer(config.cors.layer()?)
            .layer(access_log);

        Ok(Self { router })
    }

    /// The router, ready to be driven as a `tower::Service`.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

/// Application route table.
fn routes() -> Router {
    Router::new()
        .route("/", get(handlers::hello))
        .route("/health", get(handlers::health))
}
