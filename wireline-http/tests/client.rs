//! Integration tests: the HTTP client against a blocking std-socket peer.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use wireline::{Address, Reactor, SerialExecutor};
use wireline_http::content::{ContentReceiver, ReceiveState};
use wireline_http::{
    ClientConfig, HttpClient, HttpError, HttpMethod, HttpReceiver, HttpRequest, HttpResponse,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn client(config: ClientConfig) -> (Reactor, HttpClient) {
    let reactor = Reactor::new().unwrap();
    let executor = Arc::new(SerialExecutor::new("test-callbacks"));
    let http = HttpClient::new(reactor.handle(), executor, config);
    (reactor, http)
}

/// Read one request head off the stream; returns the full head text.
fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).unwrap();
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

fn body_length(head: &str) -> usize {
    head.lines()
        .find_map(|line| line.strip_prefix("Content-Length: "))
        .map(|v| v.parse().unwrap())
        .unwrap_or(0)
}

/// Terminal receiver relaying head and decoded body over channels.
struct Collect {
    status: Arc<Mutex<Vec<u16>>>,
    body: Arc<Mutex<Vec<u8>>>,
    done: mpsc::Sender<Result<(), String>>,
}

struct CollectBody {
    body: Arc<Mutex<Vec<u8>>>,
    done: mpsc::Sender<Result<(), String>>,
}

impl Collect {
    fn new() -> (
        Self,
        Arc<Mutex<Vec<u16>>>,
        Arc<Mutex<Vec<u8>>>,
        mpsc::Receiver<Result<(), String>>,
    ) {
        let status = Arc::new(Mutex::new(Vec::new()));
        let body = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = mpsc::channel();
        (
            Collect {
                status: status.clone(),
                body: body.clone(),
                done: done_tx,
            },
            status,
            body,
            done_rx,
        )
    }
}

impl HttpReceiver for Collect {
    fn received(&mut self, response: HttpResponse) -> Box<dyn ContentReceiver> {
        self.status.lock().unwrap().push(response.status);
        Box::new(CollectBody {
            body: self.body.clone(),
            done: self.done.clone(),
        })
    }

    fn failed(&mut self, error: HttpError) {
        let _ = self.done.send(Err(error.to_string()));
    }
}

impl ContentReceiver for CollectBody {
    fn received(&mut self, data: &mut Bytes) -> Result<ReceiveState, HttpError> {
        self.body.lock().unwrap().extend_from_slice(data);
        data.clear();
        Ok(ReceiveState::Continue)
    }

    fn ended(&mut self) -> Result<(), HttpError> {
        let _ = self.done.send(Ok(()));
        Ok(())
    }
}

#[test]
fn get_with_content_length() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let head = read_head(&mut stream);
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
            .unwrap();
        head
    });

    let (reactor, http) = client(ClientConfig::default());
    let (collect, status, body, done) = Collect::new();
    http.request()
        .receiving(Box::new(collect))
        .build(HttpRequest::get(Address::new("127.0.0.1", port), "/index"))
        .finish();

    done.recv_timeout(TIMEOUT).unwrap().unwrap();
    assert_eq!(*status.lock().unwrap(), vec![200]);
    assert_eq!(body.lock().unwrap().as_slice(), b"hello");

    let head = peer.join().unwrap();
    assert!(head.starts_with("GET /index HTTP/1.1\r\n"), "{head}");
    assert!(head.contains(&format!("Host: 127.0.0.1:{port}\r\n")), "{head}");
    assert!(head.contains("Accept-Encoding: gzip\r\n"), "{head}");
    http.close();
    reactor.shutdown();
}

#[test]
fn keep_alive_reuses_the_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepts = Arc::new(AtomicUsize::new(0));
    let accepts_peer = accepts.clone();
    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        accepts_peer.fetch_add(1, Ordering::SeqCst);
        for reply in [&b"first"[..], &b"again"[..]] {
            read_head(&mut stream);
            let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", reply.len());
            stream.write_all(head.as_bytes()).unwrap();
            stream.write_all(reply).unwrap();
        }
    });

    let (reactor, http) = client(ClientConfig::default());
    for expected in [&b"first"[..], &b"again"[..]] {
        let (collect, _status, body, done) = Collect::new();
        http.request()
            .receiving(Box::new(collect))
            .build(HttpRequest::get(Address::new("127.0.0.1", port), "/"))
            .finish();
        done.recv_timeout(TIMEOUT).unwrap().unwrap();
        assert_eq!(body.lock().unwrap().as_slice(), expected);
    }

    peer.join().unwrap();
    assert_eq!(accepts.load(Ordering::SeqCst), 1);
    http.close();
    reactor.shutdown();
}

#[test]
fn idle_connection_past_ttl_is_not_reused() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepts = Arc::new(AtomicUsize::new(0));
    let accepts_peer = accepts.clone();
    let peer = thread::spawn(move || {
        for _ in 0..2 {
            let (mut stream, _) = listener.accept().unwrap();
            accepts_peer.fetch_add(1, Ordering::SeqCst);
            read_head(&mut stream);
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                .unwrap();
        }
    });

    let config = ClientConfig {
        recycle_ttl: Duration::from_millis(50),
        ..ClientConfig::default()
    };
    let (reactor, http) = client(config);
    for _ in 0..2 {
        let (collect, _status, body, done) = Collect::new();
        http.request()
            .receiving(Box::new(collect))
            .build(HttpRequest::get(Address::new("127.0.0.1", port), "/"))
            .finish();
        done.recv_timeout(TIMEOUT).unwrap().unwrap();
        assert_eq!(body.lock().unwrap().as_slice(), b"ok");
        // Let the pooled connection age past the recycle ttl.
        thread::sleep(Duration::from_millis(200));
    }

    peer.join().unwrap();
    assert_eq!(accepts.load(Ordering::SeqCst), 2);
    http.close();
    reactor.shutdown();
}

#[test]
fn chunked_gzip_response_is_decoded() {
    let compressed = {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"the decoded payload").unwrap();
        encoder.finish().unwrap()
    };
    let mut wire = Vec::new();
    wire.extend_from_slice(
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nContent-Encoding: gzip\r\n\r\n",
    );
    // Split the gzip stream across two chunks.
    for part in [&compressed[..7], &compressed[7..]] {
        wire.extend_from_slice(format!("{:x}\r\n", part.len()).as_bytes());
        wire.extend_from_slice(part);
        wire.extend_from_slice(b"\r\n");
    }
    wire.extend_from_slice(b"0\r\n\r\n");

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        read_head(&mut stream);
        stream.write_all(&wire).unwrap();
    });

    let (reactor, http) = client(ClientConfig::default());
    let (collect, _status, body, done) = Collect::new();
    http.request()
        .receiving(Box::new(collect))
        .build(HttpRequest::get(Address::new("127.0.0.1", port), "/"))
        .finish();

    done.recv_timeout(TIMEOUT).unwrap().unwrap();
    assert_eq!(body.lock().unwrap().as_slice(), b"the decoded payload");
    peer.join().unwrap();
    http.close();
    reactor.shutdown();
}

#[test]
fn redirect_is_followed() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let first = read_head(&mut stream);
        stream
            .write_all(b"HTTP/1.1 302 Found\r\nLocation: /target\r\nContent-Length: 0\r\n\r\n")
            .unwrap();
        let second = read_head(&mut stream);
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 7\r\n\r\narrived")
            .unwrap();
        (first, second)
    });

    let (reactor, http) = client(ClientConfig::default());
    let (collect, status, body, done) = Collect::new();
    http.request()
        .receiving(Box::new(collect))
        .build(HttpRequest::get(Address::new("127.0.0.1", port), "/start"))
        .finish();

    done.recv_timeout(TIMEOUT).unwrap().unwrap();
    // The intermediate 302 never reaches the caller.
    assert_eq!(*status.lock().unwrap(), vec![200]);
    assert_eq!(body.lock().unwrap().as_slice(), b"arrived");

    let (first, second) = peer.join().unwrap();
    assert!(first.starts_with("GET /start"), "{first}");
    assert!(second.starts_with("GET /target"), "{second}");
    http.close();
    reactor.shutdown();
}

#[test]
fn close_delimited_body_completes_on_close() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        read_head(&mut stream);
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\neverything until close")
            .unwrap();
    });

    let (reactor, http) = client(ClientConfig::default());
    let (collect, _status, body, done) = Collect::new();
    http.request()
        .receiving(Box::new(collect))
        .build(HttpRequest::get(Address::new("127.0.0.1", port), "/"))
        .finish();

    done.recv_timeout(TIMEOUT).unwrap().unwrap();
    assert_eq!(body.lock().unwrap().as_slice(), b"everything until close");
    peer.join().unwrap();
    http.close();
    reactor.shutdown();
}

#[test]
fn post_body_with_content_length() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let head = read_head(&mut stream);
        let mut request_body = vec![0u8; body_length(&head)];
        stream.read_exact(&mut request_body).unwrap();
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .unwrap();
        (head, request_body)
    });

    let (reactor, http) = client(ClientConfig::default());
    let (collect, _status, _body, done) = Collect::new();
    let sender = http
        .request()
        .receiving(Box::new(collect))
        .build(
            HttpRequest::new(
                Address::new("127.0.0.1", port),
                false,
                HttpMethod::Post,
                "/submit",
            )
            .with_header("Content-Length", "11"),
        );
    sender.send(Bytes::from_static(b"the payload"));
    sender.finish();

    done.recv_timeout(TIMEOUT).unwrap().unwrap();
    let (head, request_body) = peer.join().unwrap();
    assert!(head.starts_with("POST /submit"), "{head}");
    assert_eq!(request_body, b"the payload");
    http.close();
    reactor.shutdown();
}

#[test]
fn pipelined_requests_complete_in_order() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        // Both heads arrive before either response goes out.
        let first = read_head(&mut stream);
        let second = read_head(&mut stream);
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\none")
            .unwrap();
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\ntwo")
            .unwrap();
        (first, second)
    });

    let config = ClientConfig {
        pipelining: true,
        ..ClientConfig::default()
    };
    let (reactor, http) = client(config);
    let (collect_a, _status_a, body_a, done_a) = Collect::new();
    let (collect_b, _status_b, body_b, done_b) = Collect::new();
    http.request()
        .receiving(Box::new(collect_a))
        .build(HttpRequest::get(Address::new("127.0.0.1", port), "/a"))
        .finish();
    http.request()
        .receiving(Box::new(collect_b))
        .build(HttpRequest::get(Address::new("127.0.0.1", port), "/b"))
        .finish();

    done_a.recv_timeout(TIMEOUT).unwrap().unwrap();
    done_b.recv_timeout(TIMEOUT).unwrap().unwrap();
    assert_eq!(body_a.lock().unwrap().as_slice(), b"one");
    assert_eq!(body_b.lock().unwrap().as_slice(), b"two");

    let (first, second) = peer.join().unwrap();
    assert!(first.starts_with("GET /a"), "{first}");
    assert!(second.starts_with("GET /b"), "{second}");
    http.close();
    reactor.shutdown();
}

#[test]
fn premature_close_reports_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        read_head(&mut stream);
        // Declared 100 bytes, deliver 3, then close.
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nabc")
            .unwrap();
    });

    let (reactor, http) = client(ClientConfig::default());
    let (collect, _status, _body, done) = Collect::new();
    http.request()
        .receiving(Box::new(collect))
        .build(HttpRequest::get(Address::new("127.0.0.1", port), "/"))
        .finish();

    let outcome = done.recv_timeout(TIMEOUT).unwrap();
    assert!(outcome.is_err(), "expected a failure, got {outcome:?}");
    peer.join().unwrap();
    http.close();
    reactor.shutdown();
}
