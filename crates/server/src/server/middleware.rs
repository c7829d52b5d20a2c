//! Tower layers applied to the router: access logging, CORS and timeouts.

use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, Request};
use common::BootstrapError;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::MakeSpan,
};
use tracing::{info_span, Span};

use super::connector::ConnectionInfo;

/// Default per-request timeout applied to all routes.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Which request headers a CORS preflight may ask for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedHeaders {
    /// Echo whatever the preflight requests.
    Any,
    List(Vec<String>),
}

impl AllowedHeaders {
    /// Parse a comma-separated list; `*` means [`AllowedHeaders::Any`].
    pub fn parse(raw: &str) -> Self {
        let names = split_list(raw);
        if names.is_empty() || names.iter().any(|n| n == "*") {
            AllowedHeaders::Any
        } else {
            AllowedHeaders::List(names)
        }
    }
}

/// Cross-origin policy of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsPolicy {
    pub allow_any_origin: bool,
    /// Origins granted when `allow_any_origin` is off.
    pub allowed_origins: Vec<String>,
    pub allowed_headers: AllowedHeaders,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self::permissive()
    }
}

impl CorsPolicy {
    /// Any origin, any requested header.
    pub fn permissive() -> Self {
        Self {
            allow_any_origin: true,
            allowed_origins: Vec::new(),
            allowed_headers: AllowedHeaders::Any,
        }
    }

    /// Build the `tower-http` layer for this policy.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Parameter`] if an origin or header name is
    /// not a valid HTTP header value.
    pub fn layer(&self) -> Result<CorsLayer, BootstrapError> {
        let wildcard = self.allowed_origins.iter().any(|o| o == "*");
        let origin = if self.allow_any_origin || wildcard {
            AllowOrigin::any()
        } else {
            let origins = self
                .allowed_origins
                .iter()
                .map(|o| {
                    HeaderValue::from_str(o).map_err(|_| {
                        BootstrapError::Parameter(format!("invalid CORS origin {o:?}"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            AllowOrigin::list(origins)
        };

        let headers = match &self.allowed_headers {
            AllowedHeaders::Any => AllowHeaders::mirror_request(),
            AllowedHeaders::List(names) => {
                let names = names
                    .iter()
                    .map(|n| {
                        HeaderName::try_from(n.as_str()).map_err(|_| {
                            BootstrapError::Parameter(format!("invalid CORS header name {n:?}"))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                AllowHeaders::list(names)
            }
        };

        Ok(CorsLayer::new()
            .allow_origin(origin)
            .allow_headers(headers)
            .allow_methods(AllowMethods::mirror_request()))
    }
}

/// Split a comma-separated setting, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Span for one request, tagged with the connector that accepted it.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessSpan;

impl<B> MakeSpan<B> for AccessSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let (scheme, peer) = match request.extensions().get::<ConnectionInfo>() {
            Some(info) => (info.scheme.as_str(), info.peer.to_string()),
            None => ("-", "-".to_owned()),
        };
        info_span!(
            "request",
            method = %request.method(),
            path = %request.uri().path(),
            scheme,
            peer = %peer,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_list_parsing() {
        assert_eq!(AllowedHeaders::parse("*"), AllowedHeaders::Any);
        assert_eq!(AllowedHeaders::parse(""), AllowedHeaders::Any);
        assert_eq!(
            AllowedHeaders::parse("content-type, x-token ,"),
            AllowedHeaders::List(vec!["content-type".into(), "x-token".into()])
        );
    }

    #[test]
    fn invalid_origin_is_a_parameter_error() {
        let policy = CorsPolicy {
            allow_any_origin: false,
            allowed_origins: vec!["http://ok.test".into(), "bad\norigin".into()],
            allowed_headers: AllowedHeaders::Any,
        };
        assert!(matches!(policy.layer(), Err(BootstrapError::Parameter(_))));
    }

    #[test]
    fn invalid_header_name_is_a_parameter_error() {
        let policy = CorsPolicy {
            allow_any_origin: true,
            allowed_origins: Vec::new(),
            allowed_headers: AllowedHeaders::List(vec!["not a header".into()]),
        };
        assert!(matches!(policy.layer(), Err(BootstrapError::Parameter(_))));
    }

    #[test]
    fn wildcard_origin_entry_means_any() {
        let policy = CorsPolicy {
            allow_any_origin: false,
            allowed_origins: vec!["*".into()],
            allowed_headers: AllowedHeaders::Any,
        };
        assert!(policy.layer().is_ok());
    }
}
