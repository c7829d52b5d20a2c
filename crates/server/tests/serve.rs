//! End-to-end requests against both connectors of a launched server.

mod support;

use localserve::{LifecycleState, Scheme};
use support::*;
use tokio::task::JoinSet;
use x509_parser::prelude::{FromDer, X509Certificate};

#[tokio::test]
async fn plaintext_and_tls_both_say_hello() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let mut process = localserve::launch(&cfg).await.unwrap();
    assert_eq!(process.state(), LifecycleState::Running);

    let http = process.endpoint(Scheme::Http).unwrap();
    let https = process.endpoint(Scheme::Https).unwrap();
    assert_ne!(http.local_addr.port(), https.local_addr.port());

    let response = plain_get(http.local_addr, "/").await;
    assert_eq!(status_line(&response), "HTTP/1.1 200 OK");
    assert!(response.ends_with("Hello World"), "{response}");

    let tls = connect_tls(https.local_addr, stored_certificate(&cfg)).await;
    let response = exchange(tls, &request("GET", "/", &[])).await;
    assert_eq!(status_line(&response), "HTTP/1.1 200 OK");
    assert!(response.ends_with("Hello World"), "{response}");

    process.stop().await;
}

#[tokio::test]
async fn tls_connector_presents_the_stored_certificate() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let mut process = localserve::launch(&cfg).await.unwrap();
    let stored = stored_certificate(&cfg);

    let https = process.endpoint(Scheme::Https).unwrap();
    let tls = connect_tls(https.local_addr, stored.clone()).await;
    let presented = tls.get_ref().1.peer_certificates().unwrap()[0].to_vec();
    assert_eq!(presented, stored);

    let (_, cert) = X509Certificate::from_der(&presented).unwrap();
    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap();
    assert_eq!(cn, "verifybyme");

    process.stop().await;
}

#[tokio::test]
async fn preflight_over_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let mut process = localserve::launch(&cfg).await.unwrap();
    let http = process.endpoint(Scheme::Http).unwrap();

    let stream = tokio::net::TcpStream::connect(http.local_addr).await.unwrap();
    let response = exchange(
        stream,
        &request(
            "OPTIONS",
            "/",
            &[
                ("Origin", "http://192.168.1.30:8080"),
                ("Access-Control-Request-Method", "GET"),
            ],
        ),
    )
    .await;

    assert_eq!(status_line(&response), "HTTP/1.1 200 OK");
    assert!(response
        .to_ascii_lowercase()
        .contains("access-control-allow-origin: *"));

    process.stop().await;
}

#[tokio::test]
async fn preflight_over_tls() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let mut process = localserve::launch(&cfg).await.unwrap();
    let https = process.endpoint(Scheme::Https).unwrap();

    let tls = connect_tls(https.local_addr, stored_certificate(&cfg)).await;
    let response = exchange(
        tls,
        &request(
            "OPTIONS",
            "/",
            &[
                ("Origin", "https://192.168.1.30:8443"),
                ("Access-Control-Request-Method", "GET"),
            ],
        ),
    )
    .await;

    assert_eq!(status_line(&response), "HTTP/1.1 200 OK");
    let lower = response.to_ascii_lowercase();
    assert!(lower.contains("access-control-allow-origin: *"), "{response}");
    assert!(lower.contains("access-control-allow-methods: get"), "{response}");

    process.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_across_both_connectors() {
    const PER_SCHEME: usize = 8;
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let mut process = localserve::launch(&cfg).await.unwrap();
    let http = process.endpoint(Scheme::Http).unwrap().local_addr;
    let https = process.endpoint(Scheme::Https).unwrap().local_addr;
    let cert = stored_certificate(&cfg);

    let mut requests = JoinSet::new();
    for _ in 0..PER_SCHEME {
        requests.spawn(async move { (Scheme::Http, plain_get(http, "/").await) });
        let cert = cert.clone();
        requests.spawn(async move {
            let tls = connect_tls(https, cert).await;
            (Scheme::Https, exchange(tls, &request("GET", "/", &[])).await)
        });
    }

    let mut served = Vec::new();
    while let Some(joined) = requests.join_next().await {
        let (scheme, response) = joined.unwrap();
        assert_eq!(status_line(&response), "HTTP/1.1 200 OK", "{scheme}: {response}");
        assert!(response.ends_with("Hello World"), "{scheme}: {response}");
        served.push(scheme);
    }
    assert_eq!(served.len(), 2 * PER_SCHEME);
    assert_eq!(
        served.iter().filter(|s| **s == Scheme::Https).count(),
        PER_SCHEME
    );

    process.stop().await;
}

#[tokio::test]
async fn unknown_path_is_404_on_tls_too() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let mut process = localserve::launch(&cfg).await.unwrap();
    let https = process.endpoint(Scheme::Https).unwrap();

    let tls = connect_tls(https.local_addr, stored_certificate(&cfg)).await;
    let response = exchange(tls, &request("GET", "/missing", &[])).await;
    assert_eq!(status_line(&response), "HTTP/1.1 404 Not Found");
    assert!(response.contains("not_found"));

    process.stop().await;
}

#[tokio::test]
async fn untrusted_client_cannot_complete_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let mut process = localserve::launch(&cfg).await.unwrap();
    let https = process.endpoint(Scheme::Https).unwrap();

    // Trust a different self-signed certificate.
    let other_dir = tempfile::tempdir().unwrap();
    let other_cfg = test_config(other_dir.path());
    let mut other = localserve::launch(&other_cfg).await.unwrap();
    let wrong_anchor = stored_certificate(&other_cfg);
    other.stop().await;

    let tcp = tokio::net::TcpStream::connect(https.local_addr).await.unwrap();
    let result = tls_connector(wrong_anchor)
        .connect(
            rustls::pki_types::ServerName::try_from("localhost").unwrap(),
            tcp,
        )
        .await;
    assert!(result.is_err());

    // The server keeps serving after a failed handshake.
    let http = process.endpoint(Scheme::Http).unwrap();
    assert_eq!(
        status_line(&plain_get(http.local_addr, "/").await),
        "HTTP/1.1 200 OK"
    );

    process.stop().await;
}
