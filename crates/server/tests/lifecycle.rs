//! Provisioning reuse, bind conflicts and graceful stop.

mod support;

use std::time::{Duration, Instant};

use axum::{routing::get, Router};
use common::{BootstrapError, CredentialLayer};
use localserve::{
    config::Config,
    server::{ConnectorSpec, Pipeline, PipelineConfig},
    LifecycleState, Scheme, ServerBootstrap,
};
use support::*;

#[tokio::test]
async fn second_launch_reuses_the_identity() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());

    let mut first = localserve::launch(&cfg).await.unwrap();
    let cert_before = stored_certificate(&cfg);
    let store_before = std::fs::read(&cfg.keystore_path).unwrap();
    first.stop().await;

    let mut second = localserve::launch(&cfg).await.unwrap();
    assert_eq!(stored_certificate(&cfg), cert_before);
    // Reuse never rewrites the store.
    assert_eq!(std::fs::read(&cfg.keystore_path).unwrap(), store_before);

    let https = second.endpoint(Scheme::Https).unwrap();
    let tls = connect_tls(https.local_addr, cert_before.clone()).await;
    assert_eq!(
        tls.get_ref().1.peer_certificates().unwrap()[0].as_ref(),
        cert_before.as_slice()
    );
    second.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_launches_share_one_identity() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());

    let (first, second) = tokio::join!(localserve::launch(&cfg), localserve::launch(&cfg));
    let (mut first, mut second) = (first.unwrap(), second.unwrap());
    let cert = stored_certificate(&cfg);

    for process in [&first, &second] {
        let https = process.endpoint(Scheme::Https).unwrap();
        let tls = connect_tls(https.local_addr, cert.clone()).await;
        assert_eq!(
            tls.get_ref().1.peer_certificates().unwrap()[0].as_ref(),
            cert.as_slice()
        );
    }

    first.stop().await;
    second.stop().await;
}

#[tokio::test]
async fn occupied_ports_fail_while_first_server_keeps_serving() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let mut first = localserve::launch(&cfg).await.unwrap();
    let http = first.endpoint(Scheme::Http).unwrap();
    let https = first.endpoint(Scheme::Https).unwrap();

    let clash = Config {
        http_port: http.local_addr.port(),
        https_port: https.local_addr.port(),
        ..test_config(dir.path())
    };
    let err = localserve::launch(&clash).await.unwrap_err();
    assert_eq!(err.stage(), "bind");
    assert!(err.is_retriable());
    match err {
        BootstrapError::Bind { port, .. } => assert_eq!(port, http.local_addr.port()),
        other => panic!("expected bind error, got {other}"),
    }

    assert_eq!(first.state(), LifecycleState::Running);
    let response = plain_get(http.local_addr, "/").await;
    assert_eq!(status_line(&response), "HTTP/1.1 200 OK");

    first.stop().await;
}

#[tokio::test]
async fn stop_is_idempotent_and_releases_ports() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let mut process = localserve::launch(&cfg).await.unwrap();
    let endpoints = process.endpoints();
    assert_eq!(endpoints.len(), 2);

    process.stop().await;
    process.stop().await;
    assert_eq!(process.state(), LifecycleState::Stopped);
    assert!(process.endpoints().is_empty());

    for endpoint in endpoints {
        assert!(tokio::net::TcpStream::connect(endpoint.local_addr).await.is_err());
        std::net::TcpListener::bind(endpoint.local_addr).unwrap();
    }
}

#[tokio::test]
async fn wrong_certificate_password_aborts_startup() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    localserve::launch(&cfg).await.unwrap().stop().await;

    let wrong = Config {
        cert_password: "not-the-password".into(),
        ..test_config(dir.path())
    };
    let err = localserve::launch(&wrong).await.unwrap_err();
    assert!(matches!(
        err,
        BootstrapError::Authentication {
            layer: CredentialLayer::Entry,
            ..
        }
    ));
    assert_eq!(err.stage(), "tls-context");
    assert!(!err.is_retriable());
}

#[tokio::test]
async fn wrong_store_password_aborts_without_touching_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    localserve::launch(&cfg).await.unwrap().stop().await;
    let before = std::fs::read(&cfg.keystore_path).unwrap();

    let wrong = Config {
        keystore_password: "not-the-password".into(),
        ..test_config(dir.path())
    };
    let err = localserve::launch(&wrong).await.unwrap_err();
    assert!(matches!(err, BootstrapError::StoreCorrupt { .. }));
    assert_eq!(std::fs::read(&cfg.keystore_path).unwrap(), before);
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_millis(300)).await;
    "done"
}

async fn stuck() -> &'static str {
    tokio::time::sleep(Duration::from_secs(60)).await;
    "never"
}

fn loopback_plain() -> ConnectorSpec {
    ConnectorSpec::plain(0).with_address([127, 0, 0, 1].into())
}

#[tokio::test]
async fn in_flight_request_finishes_during_stop() {
    let routes = Router::new().route("/slow", get(slow));
    let pipeline = Pipeline::with_routes(routes, &PipelineConfig::default()).unwrap();
    let mut process = ServerBootstrap::new(Duration::from_secs(5))
        .start(vec![loopback_plain()], &pipeline)
        .await
        .unwrap();
    let addr = process.endpoint(Scheme::Http).unwrap().local_addr;

    let client = tokio::spawn(async move { plain_get(addr, "/slow").await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    process.stop().await;

    let response = client.await.unwrap();
    assert_eq!(status_line(&response), "HTTP/1.1 200 OK");
    assert!(response.ends_with("done"));
}

#[tokio::test]
async fn grace_period_bounds_stop() {
    let routes = Router::new().route("/stuck", get(stuck));
    let pipeline = Pipeline::with_routes(routes, &PipelineConfig::default()).unwrap();
    let bootstrap = ServerBootstrap::new(Duration::from_millis(200));
    let mut process = bootstrap
        .start(vec![loopback_plain()], &pipeline)
        .await
        .unwrap();
    let addr = process.endpoint(Scheme::Http).unwrap().local_addr;

    let client = tokio::spawn(async move { plain_get(addr, "/stuck").await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    bootstrap.stop(&mut process).await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(process.state(), LifecycleState::Stopped);

    // The aborted connection is closed without a response.
    let response = client.await.unwrap();
    assert!(response.is_empty());
}
