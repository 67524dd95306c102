//! Integration tests: TLS client adapter against a blocking rustls peer.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use rustls::{RootCertStore, StreamOwned};
use rustls_pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use wireline::{Address, Callbacks, Connecter, Reactor, SecureSocket, SerialExecutor, TcpSocket};

const TIMEOUT: Duration = Duration::from_secs(5);

struct TestPki {
    server_config: Arc<rustls::ServerConfig>,
    client_config: Arc<rustls::ClientConfig>,
}

fn test_pki() -> TestPki {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_der = cert.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der()));

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der.clone()], key)
        .unwrap();

    let mut roots = RootCertStore::empty();
    roots.add(cert_der).unwrap();
    let client_config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    TestPki {
        server_config: Arc::new(server_config),
        client_config: Arc::new(client_config),
    }
}

#[test]
fn tls_client_handshakes_and_echoes() {
    let pki = test_pki();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server_config = pki.server_config.clone();
    let peer = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let conn = rustls::ServerConnection::new(server_config).unwrap();
        let mut tls = StreamOwned::new(conn, stream);
        let mut buf = [0u8; 6];
        tls.read_exact(&mut buf).unwrap();
        tls.write_all(&buf).unwrap();
        tls.conn.send_close_notify();
        let _ = tls.flush();
        buf
    });

    let reactor = Reactor::new().unwrap();
    let executor = Arc::new(SerialExecutor::new("test-callbacks"));
    let inner = TcpSocket::new(
        reactor.handle(),
        executor.clone(),
        Address::new("127.0.0.1", port),
    );
    let mut socket = SecureSocket::client(
        Box::new(inner),
        executor,
        pki.client_config.clone(),
        ServerName::try_from("localhost").unwrap(),
    );

    let (connected_tx, connected_rx) = mpsc::channel();
    let (received_tx, received_rx) = mpsc::channel();
    let (closed_tx, closed_rx) = mpsc::channel();
    socket.connect(Box::new(
        Callbacks::new()
            .on_connected(move || {
                let _ = connected_tx.send(());
            })
            .on_received(move |_from, data| {
                let _ = received_tx.send(data);
            })
            .on_closed(move || {
                let _ = closed_tx.send(());
            }),
    ));
    connected_rx.recv_timeout(TIMEOUT).unwrap();
    socket.send(None, Bytes::from_static(b"secret"));

    let mut plain = Vec::new();
    while plain.len() < 6 {
        plain.extend_from_slice(&received_rx.recv_timeout(TIMEOUT).unwrap());
    }
    assert_eq!(plain, b"secret");
    assert_eq!(&peer.join().unwrap(), b"secret");
    // close_notify from the peer surfaces as a clean close.
    closed_rx.recv_timeout(TIMEOUT).unwrap();
    socket.close();
    reactor.shutdown();
}

#[test]
fn certificate_rejection_reports_failure() {
    let pki = test_pki();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server_config = pki.server_config.clone();
    let peer = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let conn = rustls::ServerConnection::new(server_config).unwrap();
        let mut tls = StreamOwned::new(conn, stream);
        // Handshake fails; the read surfaces the client's alert.
        let mut buf = [0u8; 1];
        let _ = tls.read(&mut buf);
    });

    // Empty trust store: the server certificate cannot verify.
    let empty_roots = RootCertStore::empty();
    let distrusting = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(empty_roots)
            .with_no_client_auth(),
    );

    let reactor = Reactor::new().unwrap();
    let executor = Arc::new(SerialExecutor::new("test-callbacks"));
    let inner = TcpSocket::new(
        reactor.handle(),
        executor.clone(),
        Address::new("127.0.0.1", port),
    );
    let mut socket = SecureSocket::client(
        Box::new(inner),
        executor,
        distrusting,
        ServerName::try_from("localhost").unwrap(),
    );

    let (failed_tx, failed_rx) = mpsc::channel();
    socket.connect(Box::new(Callbacks::new().on_failed(move |error| {
        let _ = failed_tx.send(error.to_string());
    })));

    failed_rx.recv_timeout(TIMEOUT).unwrap();
    peer.join().unwrap();
    reactor.shutdown();
}
