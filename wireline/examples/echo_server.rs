//! Echo server on the reactor: every accepted stream gets its bytes back.
//!
//! Run:  cargo run --example echo_server
//! Bind elsewhere:  BIND=0.0.0.0:8080 cargo run --example echo_server

use std::sync::Arc;

use bytes::Bytes;
use wireline::{Accepted, Address, Connection, Listening, Reactor, SerialExecutor, TcpSocketServer};

struct Echo {
    peer: Address,
    accepted: Accepted,
}

impl Connection for Echo {
    fn received(&mut self, _from: Option<Address>, data: Bytes) {
        self.accepted.send(data);
    }

    fn closed(&mut self) {
        eprintln!("{} disconnected", self.peer);
    }
}

struct EchoListening;

impl Listening for EchoListening {
    fn connected(&mut self, peer: Address, accepted: Accepted) -> Box<dyn Connection> {
        eprintln!("{peer} connected");
        Box::new(Echo { peer, accepted })
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let bind = std::env::var("BIND").unwrap_or_else(|_| "127.0.0.1:7878".to_string());
    let (host, port) = bind.rsplit_once(':').expect("BIND must be host:port");
    let address = Address::new(host, port.parse().expect("invalid BIND port"));

    let reactor = Reactor::new().expect("reactor");
    let executor = Arc::new(SerialExecutor::new("callbacks"));
    let mut server = TcpSocketServer::new(reactor.handle(), executor, address.clone());
    server.listen(Box::new(EchoListening));
    eprintln!("echoing on {address}");

    loop {
        std::thread::park();
    }
}
