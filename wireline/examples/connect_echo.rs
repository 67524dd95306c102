//! Connects to an echo server, sends one line, prints the reply.
//!
//! Start a peer first:  cargo run --example echo_server
//! Then run:            cargo run --example connect_echo
//! Or point elsewhere:  TARGET=10.0.0.1:8080 cargo run --example connect_echo

use std::sync::mpsc;
use std::sync::Arc;

use bytes::Bytes;
use wireline::{Address, Callbacks, Connecter, Reactor, SerialExecutor, TcpSocket};

fn main() {
    tracing_subscriber::fmt::init();

    let target = std::env::var("TARGET").unwrap_or_else(|_| "127.0.0.1:7878".to_string());
    let (host, port) = target.rsplit_once(':').expect("TARGET must be host:port");
    let address = Address::new(host, port.parse().expect("invalid TARGET port"));

    let reactor = Reactor::new().expect("reactor");
    let executor = Arc::new(SerialExecutor::new("callbacks"));
    let (done_tx, done_rx) = mpsc::channel();
    let failed_tx = done_tx.clone();

    let mut socket = TcpSocket::new(reactor.handle(), executor, address.clone());
    socket.connect(Box::new(
        Callbacks::new()
            .on_connected({
                let address = address.clone();
                move || eprintln!("connected to {address}")
            })
            .on_received(move |_from, data| {
                print!("{}", String::from_utf8_lossy(&data));
                let _ = done_tx.send(Ok(()));
            })
            .on_failed(move |error| {
                let _ = failed_tx.send(Err(error));
            }),
    ));
    socket.send(None, Bytes::from_static(b"Hello from wireline!\n"));

    match done_rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(error)) => eprintln!("connection failed: {error}"),
        Err(_) => eprintln!("reactor went away"),
    }
    socket.close();
    reactor.shutdown();
}
