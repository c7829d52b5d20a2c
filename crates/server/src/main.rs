//! `localserve` binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise the telemetry pipeline (tracing + optional OTLP).
//! 3. Provision the TLS identity and bind both connectors.
//! 4. Serve until SIGINT / SIGTERM, then stop gracefully.

use anyhow::Result;
use tracing::{error, info};

use localserve::{config::Config, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(&cfg.log_level, cfg.otel_exporter_otlp_endpoint.as_deref())?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        http_port = cfg.http_port,
        https_port = cfg.https_port,
        keystore = %cfg.keystore_path.display(),
        "localserve starting"
    );

    // -----------------------------------------------------------------------
    // 3. Credential store + connectors
    // -----------------------------------------------------------------------
    let mut process = match localserve::launch(&cfg).await {
        Ok(process) => process,
        Err(e) => {
            error!(
                stage = e.stage(),
                retriable = e.is_retriable(),
                error = %e,
                "startup failed"
            );
            telemetry::shutdown_telemetry();
            return Err(e.into());
        }
    };
    for endpoint in process.endpoints() {
        info!(scheme = %endpoint.scheme, url = %endpoint.url(), "serving");
    }

    // -----------------------------------------------------------------------
    // 4. Run until signalled
    // -----------------------------------------------------------------------
    shutdown_signal().await;
    info!("shutdown signal received");
    process.stop().await;
    telemetry::shutdown_telemetry();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
