//! Integration tests: accepting side, driven by std TCP clients.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use wireline::{
    Accepted, Address, Connection, Listening, Reactor, SerialExecutor, TcpSocketServer,
};

const TIMEOUT: Duration = Duration::from_secs(5);

struct Echo {
    accepted: Accepted,
}

impl Connection for Echo {
    fn received(&mut self, _from: Option<Address>, data: Bytes) {
        self.accepted.send(data);
    }
}

struct EchoListening {
    accepts: mpsc::Sender<Address>,
}

impl Listening for EchoListening {
    fn connected(&mut self, peer: Address, accepted: Accepted) -> Box<dyn Connection> {
        let _ = self.accepts.send(peer);
        Box::new(Echo { accepted })
    }
}

fn serve(listening: Box<dyn Listening>) -> (Reactor, TcpSocketServer, u16) {
    let reactor = Reactor::new().unwrap();
    let executor = Arc::new(SerialExecutor::new("test-callbacks"));
    // Bind to :0 is not resolvable back through the server handle, so pick
    // the port first the way the peer tests do.
    let port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };
    let mut server = TcpSocketServer::new(reactor.handle(), executor, Address::new("127.0.0.1", port));
    server.listen(listening);
    (reactor, server, port)
}

#[test]
fn accepts_and_echoes() {
    let (accepts_tx, accepts_rx) = mpsc::channel();
    let (reactor, mut server, port) = serve(Box::new(EchoListening { accepts: accepts_tx }));

    let mut client = loop {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(stream) => break stream,
            Err(_) => std::thread::sleep(Duration::from_millis(10)),
        }
    };
    client.write_all(b"ping").unwrap();
    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"ping");
    accepts_rx.recv_timeout(TIMEOUT).unwrap();

    server.close();
    reactor.shutdown();
}

#[test]
fn multiple_clients_are_independent() {
    let (accepts_tx, accepts_rx) = mpsc::channel();
    let (reactor, mut server, port) = serve(Box::new(EchoListening { accepts: accepts_tx }));

    let connect = || loop {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(stream) => break stream,
            Err(_) => std::thread::sleep(Duration::from_millis(10)),
        }
    };
    let mut first = connect();
    let mut second = connect();
    second.write_all(b"two").unwrap();
    first.write_all(b"one").unwrap();

    let mut buf = [0u8; 3];
    first.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"one");
    second.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"two");
    accepts_rx.recv_timeout(TIMEOUT).unwrap();
    accepts_rx.recv_timeout(TIMEOUT).unwrap();

    server.close();
    reactor.shutdown();
}

#[test]
fn close_stops_accepting_but_keeps_streams() {
    let (accepts_tx, accepts_rx) = mpsc::channel();
    let (reactor, mut server, port) = serve(Box::new(EchoListening { accepts: accepts_tx }));

    let mut client = loop {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(stream) => break stream,
            Err(_) => std::thread::sleep(Duration::from_millis(10)),
        }
    };
    accepts_rx.recv_timeout(TIMEOUT).unwrap();
    server.close();

    // The accepted stream stays usable after the listener is gone.
    client.write_all(b"still here").unwrap();
    let mut buf = [0u8; 10];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"still here");

    reactor.shutdown();
}
