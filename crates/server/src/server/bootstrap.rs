//! Server process lifecycle: all-or-nothing start, graceful idempotent stop.
//!
//! ```text
//! Created --start--> Starting --all bound--> Running --stop--> Stopping --> Stopped
//!                        \--bind failure--------------------------------------^
//! ```

use std::{collections::HashSet, fmt, time::Duration};

use common::BootstrapError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{
    connector::{self, ConnectorSpec, Endpoint, RunningConnector, Scheme},
    router::Pipeline,
};

/// Time in-flight connections get to finish after `stop()`.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Extra time allowed for an accept loop to wind down past the grace period.
const JOIN_SLACK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Created => "created",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// A set of connectors sharing one pipeline and one shutdown signal.
pub struct ServerProcess {
    specs: Vec<ConnectorSpec>,
    pipeline: Pipeline,
    grace_period: Duration,
    state: LifecycleState,
    shutdown: CancellationToken,
    connectors: Vec<RunningConnector>,
}

impl ServerProcess {
    pub fn new(specs: Vec<ConnectorSpec>, pipeline: Pipeline, grace_period: Duration) -> Self {
        Self {
            specs,
            pipeline,
            grace_period,
            state: LifecycleState::Created,
            shutdown: CancellationToken::new(),
            connectors: Vec::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Bound endpoints, in connector order. Empty unless running.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.connectors.iter().map(|c| c.endpoint).collect()
    }

    /// First bound endpoint serving `scheme`.
    pub fn endpoint(&self, scheme: Scheme) -> Option<Endpoint> {
        self.connectors
            .iter()
            .map(|c| c.endpoint)
            .find(|e| e.scheme == scheme)
    }

    /// Bind every connector and start serving.
    ///
    /// Either every connector is bound and the process is `Running`, or none
    /// is and the process is `Stopped`.
    ///
    /// # Errors
    ///
    /// - [`BootstrapError::InvalidState`] unless the process is `Created`.
    /// - [`BootstrapError::Parameter`] for duplicate addresses or no connectors.
    /// - [`BootstrapError::Bind`] for the first connector that fails to bind.
    pub async fn start(&mut self) -> Result<(), BootstrapError> {
        if self.state != LifecycleState::Created {
            return Err(BootstrapError::InvalidState {
                state: self.state.to_string(),
                action: "start",
            });
        }
        self.state = LifecycleState::Starting;

        if let Err(e) = check_specs(&self.specs) {
            self.state = LifecycleState::Stopped;
            return Err(e);
        }

        let specs = std::mem::take(&mut self.specs);
        let mut bound = Vec::with_capacity(specs.len());
        for spec in &specs {
            match connector::bind(spec).await {
                Ok(b) => bound.push(b),
                Err(e) => {
                    // Release whatever this call already bound.
                    drop(bound);
                    self.state = LifecycleState::Stopped;
                    error!(error = %e, "startup aborted");
                    return Err(e);
                }
            }
        }

        let router = self.pipeline.router();
        self.connectors = bound
            .into_iter()
            .map(|b| b.spawn(router.clone(), self.shutdown.clone(), self.grace_period))
            .collect();
        self.state = LifecycleState::Running;

        info!(connectors = self.connectors.len(), "server running");
        Ok(())
    }

    /// Stop accepting, let in-flight requests finish within the grace
    /// period, then release every port. Safe to call in any state.
    pub async fn stop(&mut self) {
        match self.state {
            LifecycleState::Stopped => {
                debug!("stop requested on a stopped server");
                return;
            }
            LifecycleState::Created => {
                self.state = LifecycleState::Stopped;
                return;
            }
            _ => {}
        }

        self.state = LifecycleState::Stopping;
        info!(grace_ms = self.grace_period.as_millis() as u64, "server stopping");
        self.shutdown.cancel();

        let limit = self.grace_period + JOIN_SLACK;
        for connector in self.connectors.drain(..) {
            connector.join(limit).await;
        }

        self.state = LifecycleState::Stopped;
        info!("server stopped");
    }
}

impl fmt::Debug for ServerProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerProcess")
            .field("state", &self.state)
            .field("endpoints", &self.endpoints())
            .finish_non_exhaustive()
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Entry point owning the lifecycle policy (grace period).
#[derive(Debug, Clone, Copy)]
pub struct ServerBootstrap {
    grace_period: Duration,
}

impl Default for ServerBootstrap {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}

impl ServerBootstrap {
    pub fn new(grace_period: Duration) -> Self {
        Self { grace_period }
    }

    /// Create a process for `specs` and start it.
    ///
    /// # Errors
    ///
    /// See [`ServerProcess::start`].
    pub async fn start(
        &self,
        specs: Vec<ConnectorSpec>,
        pipeline: &Pipeline,
    ) -> Result<ServerProcess, BootstrapError> {
        let mut process = ServerProcess::new(specs, pipeline.clone(), self.grace_period);
        process.start().await?;
        Ok(process)
    }

    pub async fn stop(&self, process: &mut ServerProcess) {
        process.stop().await;
    }
}

fn check_specs(specs: &[ConnectorSpec]) -> Result<(), BootstrapError> {
    if specs.is_empty() {
        return Err(BootstrapError::Parameter("no connectors configured".into()));
    }
    let mut seen = HashSet::new();
    for spec in specs.iter().filter(|s| s.port != 0) {
        if !seen.insert(spec.socket_addr()) {
            return Err(BootstrapError::Parameter(format!(
                "connector address {} configured twice",
                spec.socket_addr()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::router::PipelineConfig;

    fn pipeline() -> Pipeline {
        Pipeline::build(&PipelineConfig::default()).unwrap()
    }

    fn loopback(port: u16) -> ConnectorSpec {
        ConnectorSpec::plain(port).with_address("127.0.0.1".parse().unwrap())
    }

    #[tokio::test]
    async fn start_then_stop_transitions() {
        let mut process =
            ServerProcess::new(vec![loopback(0)], pipeline(), Duration::from_millis(100));
        assert_eq!(process.state(), LifecycleState::Created);
        assert!(process.endpoints().is_empty());

        process.start().await.unwrap();
        assert_eq!(process.state(), LifecycleState::Running);
        assert_eq!(process.endpoints().len(), 1);
        assert!(process.endpoint(Scheme::Http).is_some());
        assert!(process.endpoint(Scheme::Https).is_none());

        process.stop().await;
        assert_eq!(process.state(), LifecycleState::Stopped);
        process.stop().await;
        assert_eq!(process.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn start_twice_is_invalid_state() {
        let mut process =
            ServerProcess::new(vec![loopback(0)], pipeline(), Duration::from_millis(100));
        process.start().await.unwrap();
        let err = process.start().await.unwrap_err();
        assert!(matches!(err, BootstrapError::InvalidState { action: "start", .. }));
        assert_eq!(process.state(), LifecycleState::Running);
        process.stop().await;
    }

    #[tokio::test]
    async fn stop_before_start_is_allowed() {
        let mut process = ServerProcess::new(vec![loopback(0)], pipeline(), DEFAULT_GRACE_PERIOD);
        process.stop().await;
        assert_eq!(process.state(), LifecycleState::Stopped);
        assert!(process.start().await.is_err());
    }

    #[tokio::test]
    async fn duplicate_addresses_rejected_before_binding() {
        let specs = vec![loopback(45_871), loopback(45_871)];
        let err = ServerBootstrap::default()
            .start(specs, &pipeline())
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::Parameter(_)));
    }

    #[tokio::test]
    async fn ephemeral_ports_may_repeat() {
        let specs = vec![loopback(0), loopback(0)];
        let mut process = ServerBootstrap::new(Duration::from_millis(100))
            .start(specs, &pipeline())
            .await
            .unwrap();
        let endpoints = process.endpoints();
        assert_ne!(endpoints[0].local_addr, endpoints[1].local_addr);
        process.stop().await;
    }

    #[tokio::test]
    async fn failed_bind_releases_earlier_listeners() {
        let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken = blocker.local_addr().unwrap().port();

        // Reserve a free port for the first connector, then release it.
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let free = probe.local_addr().unwrap().port();
        drop(probe);

        let mut process = ServerProcess::new(
            vec![loopback(free), loopback(taken)],
            pipeline(),
            DEFAULT_GRACE_PERIOD,
        );
        let err = process.start().await.unwrap_err();
        assert!(matches!(err, BootstrapError::Bind { port, .. } if port == taken));
        assert_eq!(process.state(), LifecycleState::Stopped);
        assert!(process.endpoints().is_empty());

        // The first connector's port was released.
        std::net::TcpListener::bind(("127.0.0.1", free)).unwrap();
    }
}
