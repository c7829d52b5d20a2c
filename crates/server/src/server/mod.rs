//! HTTP/HTTPS serving: connectors, lifecycle, routing, and TLS.
//!
//! # Responsibilities
//! - Build the `rustls` server context from the credential store ([`tls`]).
//! - Assemble the shared middleware + route pipeline ([`router`]).
//! - Bind every connector all-or-nothing and run their accept loops
//!   ([`bootstrap`], [`connector`]).

pub mod bootstrap;
pub mod connector;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod tls;

pub use bootstrap::{LifecycleState, ServerBootstrap, ServerProcess, DEFAULT_GRACE_PERIOD};
pub use connector::{ConnectionInfo, ConnectorSpec, Endpoint, Protocol, Scheme};
pub use middleware::{AllowedHeaders, CorsPolicy};
pub use router::{Pipeline, PipelineConfig};
pub use tls::{TlsContextFactory, TlsServerContext};
