//! Structured logging and optional OpenTelemetry span export.
//!
//! # Telemetry invariants
//!
//! - **No key material or passwords** may appear in any span attribute or
//!   log field. Types carrying them redact their `Debug` output.
//! - Log level is configurable via `LOCALSERVE_LOG_LEVEL` (default: `info`),
//!   overridden by `RUST_LOG` when set.

pub mod init;

pub use init::{init_telemetry, shutdown_telemetry};
