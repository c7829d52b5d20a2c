//! Listening connectors: bind, accept loop, per-connection serving.

use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use axum::{extract::ConnectInfo, Router};
use common::BootstrapError;
use hyper::{body::Incoming, Request};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    task::{JoinHandle, JoinSet},
};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::{debug, info, warn};

use super::tls::TlsServerContext;

/// Upper bound on a TLS handshake; runs on the connection task.
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a failed `accept` (e.g. file descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// URL scheme served by a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request extension identifying the connector and peer of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub scheme: Scheme,
    pub peer: SocketAddr,
}

/// Transport of a connector.
#[derive(Debug, Clone)]
pub enum Protocol {
    Plain,
    Tls(TlsServerContext),
}

/// One listening endpoint to bind.
#[derive(Debug, Clone)]
pub struct ConnectorSpec {
    pub address: IpAddr,
    /// `0` asks the OS for an ephemeral port.
    pub port: u16,
    pub protocol: Protocol,
}

impl ConnectorSpec {
    /// Plaintext connector on all IPv4 interfaces.
    pub fn plain(port: u16) -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
            protocol: Protocol::Plain,
        }
    }

    /// TLS connector on all IPv4 interfaces.
    pub fn tls(port: u16, context: TlsServerContext) -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
            protocol: Protocol::Tls(context),
        }
    }

    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    pub fn scheme(&self) -> Scheme {
        match self.protocol {
            Protocol::Plain => Scheme::Http,
            Protocol::Tls(_) => Scheme::Https,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// A bound, listening connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub local_addr: SocketAddr,
}

impl Endpoint {
    /// URL of this endpoint as reached through `host`, e.g. a LAN address
    /// when the connector is bound to the wildcard address.
    pub fn url_for(&self, host: IpAddr) -> String {
        format!(
            "{}://{}",
            self.scheme,
            SocketAddr::new(host, self.local_addr.port())
        )
    }

    /// URL of the bound address; wildcard binds are reported as loopback.
    pub fn url(&self) -> String {
        let host = match self.local_addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(std::net::Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        self.url_for(host)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.local_addr)
    }
}

pub(crate) struct BoundConnector {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    endpoint: Endpoint,
}

/// Bind the listening socket of `spec`.
pub(crate) async fn bind(spec: &ConnectorSpec) -> Result<BoundConnector, BootstrapError> {
    let bind_error = |source| BootstrapError::Bind {
        address: spec.address,
        port: spec.port,
        source,
    };

    let listener = TcpListener::bind(spec.socket_addr())
        .await
        .map_err(bind_error)?;
    let local_addr = listener.local_addr().map_err(bind_error)?;
    let acceptor = match &spec.protocol {
        Protocol::Plain => None,
        Protocol::Tls(ctx) => Some(ctx.acceptor()),
    };

    let endpoint = Endpoint {
        scheme: spec.scheme(),
        local_addr,
    };
    info!(endpoint = %endpoint, "listening");

    Ok(BoundConnector {
        listener,
        acceptor,
        endpoint,
    })
}

impl BoundConnector {
    /// Start the accept loop on its own task.
    pub(crate) fn spawn(
        self,
        router: Router,
        shutdown: CancellationToken,
        grace_period: Duration,
    ) -> RunningConnector {
        let endpoint = self.endpoint;
        let task = tokio::spawn(accept_loop(self, router, shutdown, grace_period));
        RunningConnector { endpoint, task }
    }
}

pub(crate) struct RunningConnector {
    pub(crate) endpoint: Endpoint,
    task: JoinHandle<()>,
}

impl RunningConnector {
    /// Wait for the accept loop to finish draining, aborting it after `limit`.
    pub(crate) async fn join(mut self, limit: Duration) {
        match tokio::time::timeout(limit, &mut self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(endpoint = %self.endpoint, error = %e, "accept loop panicked"),
            Err(_) => {
                warn!(endpoint = %self.endpoint, "accept loop did not stop in time; aborting");
                self.task.abort();
            }
        }
    }
}

async fn accept_loop(
    bound: BoundConnector,
    router: Router,
    shutdown: CancellationToken,
    grace_period: Duration,
) {
    let BoundConnector {
        listener,
        acceptor,
        endpoint,
    } = bound;
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let info = ConnectionInfo { scheme: endpoint.scheme, peer };
                    connections.spawn(serve_stream(
                        stream,
                        acceptor.clone(),
                        info,
                        router.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    // Stop accepting before draining so the port is released promptly.
    drop(listener);
    debug!(endpoint = %endpoint, in_flight = connections.len(), "listener closed");

    let drained = tokio::time::timeout(grace_period, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            endpoint = %endpoint,
            remaining = connections.len(),
            "grace period elapsed; aborting connections"
        );
        connections.abort_all();
        while connections.join_next().await.is_some() {}
    }

    info!(endpoint = %endpoint, "connector stopped");
}

async fn serve_stream(
    stream: TcpStream,
    acceptor: Option<TlsAcceptor>,
    info: ConnectionInfo,
    router: Router,
    shutdown: CancellationToken,
) {
    let Some(acceptor) = acceptor else {
        serve_connection(stream, info, router, shutdown).await;
        return;
    };

    let handshake = tokio::select! {
        _ = shutdown.cancelled() => return,
        result = tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream)) => result,
    };
    match handshake {
        Ok(Ok(tls)) => serve_connection(tls, info, router, shutdown).await,
        Ok(Err(e)) => debug!(peer = %info.peer, error = %e, "TLS handshake failed"),
        Err(_) => debug!(peer = %info.peer, "TLS handshake timed out"),
    }
}

async fn serve_connection<I>(
    io: I,
    info: ConnectionInfo,
    router: Router,
    shutdown: CancellationToken,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(info);
        request.extensions_mut().insert(ConnectInfo(info.peer));
        router.clone().oneshot(request)
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection(TokioIo::new(io), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.as_mut().await
        }
    };
    if let Err(e) = result {
        debug!(peer = %info.peer, error = %e, "connection closed with error");
    }
}
