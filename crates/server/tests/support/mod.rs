#![allow(dead_code)]

use std::{io, net::SocketAddr, path::Path, sync::Arc};

use localserve::{
    config::Config,
    crypto::{kdf::MIN_ROUNDS, Password},
    keystore::CredentialStore,
};
use rustls::{pki_types::CertificateDer, pki_types::ServerName, ClientConfig, RootCertStore};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{client::TlsStream, TlsConnector};

/// Loopback config with ephemeral ports and a cheap KDF.
pub fn test_config(dir: &Path) -> Config {
    Config {
        bind_address: [127, 0, 0, 1].into(),
        http_port: 0,
        https_port: 0,
        keystore_path: dir.join("ssl.keystore"),
        kdf_rounds: MIN_ROUNDS,
        shutdown_grace_secs: 1,
        ..Config::default()
    }
}

/// Leaf certificate of the configured alias, read back from the store.
pub fn stored_certificate(cfg: &Config) -> Vec<u8> {
    let file = CredentialStore::new()
        .load(
            &cfg.keystore_path,
            &Password::new(cfg.keystore_password.as_str()),
        )
        .unwrap();
    file.certificate_chain(&cfg.cert_alias).unwrap().remove(0)
}

pub fn tls_connector(trusted_cert: Vec<u8>) -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.add(CertificateDer::from(trusted_cert)).unwrap();
    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_root_certificates(roots)
    .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

pub async fn connect_tls(addr: SocketAddr, trusted_cert: Vec<u8>) -> TlsStream<TcpStream> {
    let tcp = TcpStream::connect(addr).await.unwrap();
    tls_connector(trusted_cert)
        .connect(ServerName::try_from("localhost").unwrap(), tcp)
        .await
        .unwrap()
}

/// Raw HTTP/1.1 request with `Connection: close`.
pub fn request(method: &str, path: &str, extra_headers: &[(&str, &str)]) -> String {
    let mut req = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n");
    for (name, value) in extra_headers {
        req.push_str(&format!("{name}: {value}\r\n"));
    }
    req.push_str("\r\n");
    req
}

/// Send `request` and read until the server closes the connection.
pub async fn exchange<S>(mut stream: S, request: &str) -> String
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut buf = Vec::new();
    match stream.read_to_end(&mut buf).await {
        Ok(_) => {}
        // Peers may close without a TLS close_notify.
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {}
        Err(e) => panic!("read failed: {e}"),
    }
    String::from_utf8_lossy(&buf).into_owned()
}

pub async fn plain_get(addr: SocketAddr, path: &str) -> String {
    let stream = TcpStream::connect(addr).await.unwrap();
    exchange(stream, &request("GET", path, &[])).await
}

pub fn status_line(response: &str) -> &str {
    response.lines().next().unwrap_or_default()
}
