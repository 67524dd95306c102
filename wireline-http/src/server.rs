//! HTTP/1.x server listener with keep-alive.

use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use wireline::{Accepted, Address, Connection, Executor, Listening};

use crate::chunked::{ChunkedReader, ChunkedWriter};
use crate::content::{ContentReceiver, ContentSender, ReceiveState, SinkSender};
use crate::content_length::{ContentLengthReader, ContentLengthWriter};
use crate::error::HttpError;
use crate::gzip::{GzipReader, GzipWriter, DEFAULT_BUFFER_SIZE};
use crate::headers::{content_length_of, is_chunked, is_gzip, name, value, Headers};
use crate::line::LineReader;
use crate::lock;
use crate::model::{
    negotiate_keep_alive, parse_header_line, split_request_line, HttpMethod, HttpRequest,
    HttpResponse, HttpVersion,
};

/// Per-request callback surface. `request` runs once the head is parsed and
/// returns the receiver for the decoded request body; the response is
/// streamed through the [`Responder`] at any later point.
pub trait HttpHandler: Send {
    fn request(&mut self, request: HttpRequest, responder: Responder) -> Box<dyn ContentReceiver>;
    fn closed(&mut self) {}
    fn failed(&mut self, _error: HttpError) {}
}

/// Produces one [`HttpHandler`] per accepted connection.
pub trait HttpListeningHandler: Send {
    fn connection(&mut self) -> Box<dyn HttpHandler>;
}

/// [`Listening`] implementation turning accepted streams into HTTP
/// connections; hand it to a `TcpSocketServer`.
pub struct HttpListening {
    executor: Arc<dyn Executor>,
    factory: Box<dyn HttpListeningHandler>,
    gzip_buffer_size: usize,
}

impl HttpListening {
    pub fn new(executor: Arc<dyn Executor>, factory: Box<dyn HttpListeningHandler>) -> Self {
        HttpListening {
            executor,
            factory,
            gzip_buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl Listening for HttpListening {
    fn connected(&mut self, peer: Address, accepted: Accepted) -> Box<dyn Connection> {
        let handler = self.factory.connection();
        let conn = Arc::new(Mutex::new(ServerConn {
            accepted,
            handler,
            executor: self.executor.clone(),
            peer,
            gzip_buffer_size: self.gzip_buffer_size,
            line: LineReader::new(),
            phase: Phase::RequestLine,
            method: HttpMethod::Get,
            path: String::new(),
            version: HttpVersion::V11,
            headers: Headers::new(),
            keep_alive: true,
            body: None,
            request_complete: false,
            response_started: false,
            response_finished: false,
            closed: false,
            pending: BytesMut::new(),
            writer: None,
        }));
        Box::new(ServerBridge { conn })
    }
}

enum Phase {
    RequestLine,
    Headers,
    Body,
    /// Request fully read; parsing paused until the response finishes.
    Waiting,
}

struct ServerConn {
    accepted: Accepted,
    handler: Box<dyn HttpHandler>,
    executor: Arc<dyn Executor>,
    peer: Address,
    gzip_buffer_size: usize,
    line: LineReader,
    phase: Phase,
    method: HttpMethod,
    path: String,
    version: HttpVersion,
    headers: Headers,
    keep_alive: bool,
    body: Option<Box<dyn ContentReceiver>>,
    request_complete: bool,
    response_started: bool,
    response_finished: bool,
    closed: bool,
    /// Pipelined bytes parked until the current exchange completes.
    pending: BytesMut,
    writer: Option<Box<dyn ContentSender>>,
}

impl ServerConn {
    fn process(&mut self, conn: &Arc<Mutex<ServerConn>>, data: &mut Bytes) {
        if let Err(error) = self.step(conn, data) {
            tracing::debug!(peer = %self.peer, %error, "rejecting connection");
            self.reject();
        }
    }

    fn step(&mut self, conn: &Arc<Mutex<ServerConn>>, data: &mut Bytes) -> Result<(), HttpError> {
        loop {
            if self.closed {
                return Ok(());
            }
            match self.phase {
                Phase::RequestLine => {
                    let Some(line) = self.line.feed(data)? else {
                        return Ok(());
                    };
                    let (method, path, version) = split_request_line(&line)?;
                    self.method = method;
                    self.path = path;
                    self.version = version;
                    self.phase = Phase::Headers;
                }
                Phase::Headers => {
                    let Some(line) = self.line.feed(data)? else {
                        return Ok(());
                    };
                    if !line.is_empty() {
                        let (key, value) = parse_header_line(&line)?;
                        self.headers.add(key, value);
                        continue;
                    }
                    self.head_complete(conn)?;
                }
                Phase::Body => {
                    let Some(body) = self.body.as_mut() else {
                        return Ok(());
                    };
                    match body.received(data)? {
                        ReceiveState::Continue => return Ok(()),
                        ReceiveState::Ended => {
                            self.body = None;
                            self.request_complete = true;
                            self.phase = Phase::Waiting;
                            self.maybe_reset(conn);
                        }
                    }
                }
                Phase::Waiting => {
                    if !data.is_empty() {
                        self.pending.extend_from_slice(data);
                        data.clear();
                    }
                    return Ok(());
                }
            }
        }
    }

    fn head_complete(&mut self, conn: &Arc<Mutex<ServerConn>>) -> Result<(), HttpError> {
        self.keep_alive = negotiate_keep_alive(self.version, &self.headers);
        let chunked = is_chunked(&self.headers);
        let content_length = content_length_of(&self.headers)?;
        let body_bearing = matches!(
            self.method,
            HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch
        );
        if body_bearing && !chunked && content_length.is_none() {
            return Err(HttpError::MissingBodyFraming);
        }
        let request = HttpRequest {
            address: self.peer.clone(),
            secure: false,
            method: self.method,
            path: self.path.clone(),
            headers: self.headers.clone(),
        };
        let responder = Responder {
            conn: conn.clone(),
            executor: self.executor.clone(),
        };
        let terminal = self.handler.request(request, responder);
        if !chunked && content_length.is_none() {
            // no body to read
            let mut terminal = terminal;
            terminal.ended()?;
            self.request_complete = true;
            self.phase = Phase::Waiting;
            self.maybe_reset(conn);
            return Ok(());
        }
        let mut stack: Box<dyn ContentReceiver> = terminal;
        if is_gzip(&self.headers) {
            stack = Box::new(GzipReader::with_buffer_size(stack, self.gzip_buffer_size));
        }
        if chunked {
            stack = Box::new(ChunkedReader::new(stack));
        } else if let Some(length) = content_length {
            stack = Box::new(ContentLengthReader::new(length, stack));
        }
        self.body = Some(stack);
        self.request_complete = false;
        self.phase = Phase::Body;
        Ok(())
    }

    fn start_response(&mut self, response: HttpResponse) {
        if self.response_started || self.closed {
            return;
        }
        self.response_started = true;
        let mut headers = response.headers.clone();
        let content_length = match content_length_of(&headers) {
            Ok(length) => length,
            Err(error) => {
                tracing::warn!(%error, "ignoring unusable Content-Length");
                None
            }
        };
        let mut chunked = is_chunked(&headers);
        // Without explicit framing: chunked on keep-alive connections,
        // close-delimited otherwise (HTTP/1.0 peers).
        if content_length.is_none() && !chunked && self.keep_alive {
            headers.add(name::TRANSFER_ENCODING, value::CHUNKED);
            chunked = true;
        }
        if !headers.contains(name::CONNECTION) {
            headers.add(
                name::CONNECTION,
                if self.keep_alive {
                    value::KEEP_ALIVE
                } else {
                    value::CLOSE
                },
            );
        }
        let mut head = format!(
            "{} {} {}\r\n",
            HttpVersion::V11,
            response.status,
            response.reason
        );
        for (key, value) in headers.iter() {
            head.push_str(key);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        self.accepted.send(Bytes::from(head));

        let accepted = self.accepted.clone();
        let mut writer: Box<dyn ContentSender> =
            Box::new(SinkSender::new(move |data| accepted.send(data), || {}));
        if chunked {
            writer = Box::new(ChunkedWriter::new(writer));
        } else if let Some(length) = content_length {
            writer = Box::new(ContentLengthWriter::new(length, writer));
        }
        if is_gzip(&headers) {
            writer = Box::new(GzipWriter::with_buffer_size(writer, self.gzip_buffer_size));
        }
        self.writer = Some(writer);
    }

    fn finish_response(&mut self, conn: &Arc<Mutex<ServerConn>>) {
        let Some(mut writer) = self.writer.take() else {
            // finish with no response in flight would wedge the keep-alive
            // cycle; tear down instead
            self.abort();
            return;
        };
        if let Err(error) = writer.finish() {
            tracing::debug!(peer = %self.peer, %error, "response finish failed");
            self.abort();
            return;
        }
        self.response_finished = true;
        self.maybe_reset(conn);
    }

    /// Once both sides of the exchange are done, either reset for the next
    /// request or close the connection.
    fn maybe_reset(&mut self, conn: &Arc<Mutex<ServerConn>>) {
        if !self.request_complete || !self.response_finished {
            return;
        }
        if !self.keep_alive {
            self.closed = true;
            self.accepted.close();
            return;
        }
        self.phase = Phase::RequestLine;
        self.line = LineReader::new();
        self.headers = Headers::new();
        self.body = None;
        self.writer = None;
        self.request_complete = false;
        self.response_started = false;
        self.response_finished = false;
        if !self.pending.is_empty() {
            let mut parked = self.pending.split().freeze();
            self.process(conn, &mut parked);
        }
    }

    /// Protocol error: minimal 400 and close.
    fn reject(&mut self) {
        if self.closed {
            return;
        }
        self.accepted.send(Bytes::from_static(
            b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        ));
        self.closed = true;
        self.accepted.close();
    }

    fn abort(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.writer = None;
        self.accepted.close();
    }

    /// Peer closed the stream. Mid-body that is a framing error for the
    /// in-flight receiver and surfaces through `failed`.
    fn transport_closed(&mut self) {
        self.closed = true;
        if let Some(mut body) = self.body.take() {
            if let Err(error) = body.ended() {
                self.handler.failed(error);
                return;
            }
        }
        self.handler.closed();
    }
}

struct ServerBridge {
    conn: Arc<Mutex<ServerConn>>,
}

impl Connection for ServerBridge {
    fn received(&mut self, _from: Option<Address>, data: Bytes) {
        let conn = self.conn.clone();
        let mut data = data;
        lock(&self.conn).process(&conn, &mut data);
    }

    fn closed(&mut self) {
        lock(&self.conn).transport_closed();
    }

    fn failed(&mut self, error: wireline::Error) {
        let mut guard = lock(&self.conn);
        guard.closed = true;
        guard.handler.failed(HttpError::Transport(error));
    }
}

/// Response write capability handed to the handler. All operations are
/// deferred onto the connection's executor.
#[derive(Clone)]
pub struct Responder {
    conn: Arc<Mutex<ServerConn>>,
    executor: Arc<dyn Executor>,
}

impl Responder {
    /// Write the response head; stream the body through the returned sender.
    /// Without an explicit `Content-Length`, chunked framing is forced and
    /// advertised.
    pub fn send(&self, response: HttpResponse) -> ResponseSender {
        let conn = self.conn.clone();
        self.executor.execute(Box::new(move || {
            lock(&conn).start_response(response);
        }));
        ResponseSender {
            conn: self.conn.clone(),
            executor: self.executor.clone(),
        }
    }
}

/// Body sender for one response.
pub struct ResponseSender {
    conn: Arc<Mutex<ServerConn>>,
    executor: Arc<dyn Executor>,
}

impl ResponseSender {
    pub fn send(&self, data: Bytes) {
        let conn = self.conn.clone();
        self.executor.execute(Box::new(move || {
            let mut guard = lock(&conn);
            let error = match guard.writer.as_mut() {
                Some(writer) => writer.send(data).err(),
                None => None,
            };
            if let Some(error) = error {
                tracing::debug!(%error, "response write failed");
                guard.abort();
            }
        }));
    }

    pub fn finish(&self) {
        let conn = self.conn.clone();
        self.executor.execute(Box::new(move || {
            let arc = conn.clone();
            lock(&conn).finish_response(&arc);
        }));
    }

    pub fn cancel(&self) {
        let conn = self.conn.clone();
        self.executor.execute(Box::new(move || {
            let mut guard = lock(&conn);
            if let Some(mut writer) = guard.writer.take() {
                writer.cancel();
            }
            guard.abort();
        }));
    }
}
