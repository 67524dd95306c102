//! HTTP/1.x client with connection reuse, optional pipelining, and
//! transparent redirect following.
//!
//! All operations are deferred onto the client's executor; callbacks run
//! there too, so the serial-FIFO contract of the executor orders request
//! writes and response delivery.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use rustls_pki_types::ServerName;
use wireline::{Address, Connecter, Connection, Executor, ReactorHandle, SecureSocket, TcpSocket};

use crate::chunked::{ChunkedReader, ChunkedWriter};
use crate::content::{ContentReceiver, ContentSender, DrainReceiver, ReceiveState};
use crate::content_length::{ContentLengthReader, ContentLengthWriter};
use crate::error::HttpError;
use crate::gzip::{GzipReader, GzipWriter, DEFAULT_BUFFER_SIZE};
use crate::headers::{content_length_of, is_chunked, is_gzip, name, value, Headers};
use crate::line::LineReader;
use crate::lock;
use crate::model::{
    negotiate_keep_alive, parse_header_line, split_status_line, HttpMethod, HttpRequest,
    HttpResponse, HttpVersion, DEFAULT_PORT, DEFAULT_SECURE_PORT,
};
use crate::redirect::RedirectFollower;

#[derive(Clone)]
pub struct ClientConfig {
    /// Redirect budget per request; `0` relays redirects to the caller.
    pub max_redirections: usize,
    /// Write a request on a connection that is still reading an earlier
    /// response; responses are delivered in request order.
    pub pipelining: bool,
    pub gzip_buffer_size: usize,
    /// Idle pooled connections older than this are evicted at selection
    /// time. `Duration::ZERO` disables eviction.
    pub recycle_ttl: Duration,
    pub user_agent: String,
    pub accept: String,
    /// Required for https requests.
    pub tls: Option<Arc<rustls::ClientConfig>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            max_redirections: 10,
            pipelining: false,
            gzip_buffer_size: DEFAULT_BUFFER_SIZE,
            recycle_ttl: Duration::from_secs(60),
            user_agent: concat!("wireline/", env!("CARGO_PKG_VERSION")).to_string(),
            accept: "*/*".to_string(),
            tls: None,
        }
    }
}

/// Response observer for one request.
///
/// `received` gets the parsed head and returns the receiver for the decoded
/// body; framing and content codings are already stripped by the time bytes
/// reach it.
pub trait HttpReceiver: Send {
    fn received(&mut self, response: HttpResponse) -> Box<dyn ContentReceiver>;
    fn failed(&mut self, _error: HttpError) {}
}

struct IgnoreReceiver;

impl HttpReceiver for IgnoreReceiver {
    fn received(&mut self, _response: HttpResponse) -> Box<dyn ContentReceiver> {
        Box::new(DrainReceiver)
    }
}

#[derive(Clone)]
pub struct HttpClient {
    pub(crate) reactor: ReactorHandle,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) config: Arc<ClientConfig>,
    pool: Arc<Mutex<Pool>>,
}

impl HttpClient {
    pub fn new(reactor: ReactorHandle, executor: Arc<dyn Executor>, config: ClientConfig) -> Self {
        HttpClient {
            reactor,
            executor,
            config: Arc::new(config),
            pool: Arc::new(Mutex::new(Pool {
                entries: HashMap::new(),
                next_id: 0,
            })),
        }
    }

    pub fn request(&self) -> HttpRequestBuilder {
        HttpRequestBuilder {
            client: self.clone(),
            receiver: None,
            max_redirections: None,
        }
    }

    /// Close every pooled connection; outstanding requests fail with
    /// [`HttpError::Canceled`].
    pub fn close(&self) {
        let pool = self.pool.clone();
        self.executor.execute(Box::new(move || {
            let mut pool = lock(&pool);
            let ids: Vec<u64> = pool.entries.keys().copied().collect();
            for id in ids {
                pool.fail_entry(id, HttpError::Canceled);
            }
        }));
    }
}

pub struct HttpRequestBuilder {
    client: HttpClient,
    receiver: Option<Box<dyn HttpReceiver>>,
    max_redirections: Option<usize>,
}

impl HttpRequestBuilder {
    pub fn receiving(mut self, receiver: Box<dyn HttpReceiver>) -> Self {
        self.receiver = Some(receiver);
        self
    }

    pub fn max_redirections(mut self, max_redirections: usize) -> Self {
        self.max_redirections = Some(max_redirections);
        self
    }

    /// Freeze the request head. The returned sender streams the body;
    /// `finish` alone sends a bodyless request.
    pub fn build(self, request: HttpRequest) -> RequestSender {
        let budget = self
            .max_redirections
            .unwrap_or(self.client.config.max_redirections);
        let user = self
            .receiver
            .unwrap_or_else(|| Box::new(IgnoreReceiver));
        let receiver: Box<dyn HttpReceiver> = Box::new(RedirectFollower::new(
            self.client.clone(),
            budget,
            request.clone(),
            user,
        ));
        RequestSender {
            client: self.client,
            state: Arc::new(Mutex::new(RequestState {
                request,
                receiver: Some(receiver),
                started: false,
                failed: false,
                writer: None,
                entry_id: None,
            })),
        }
    }
}

struct RequestState {
    request: HttpRequest,
    receiver: Option<Box<dyn HttpReceiver>>,
    started: bool,
    failed: bool,
    writer: Option<Box<dyn ContentSender>>,
    entry_id: Option<u64>,
}

/// Body sender for one request. Operations are deferred; failures surface
/// through the request's [`HttpReceiver`].
pub struct RequestSender {
    client: HttpClient,
    state: Arc<Mutex<RequestState>>,
}

impl RequestSender {
    pub fn send(&self, data: Bytes) {
        let client = self.client.clone();
        let state = self.state.clone();
        self.client.executor.execute(Box::new(move || {
            start_request(&client, &state, false);
            let error = {
                let mut st = lock(&state);
                if st.failed {
                    return;
                }
                match st.writer.as_mut() {
                    Some(writer) => writer.send(data).err(),
                    None => None,
                }
            };
            if let Some(error) = error {
                fail_request(&client, &state, error);
            }
        }));
    }

    pub fn finish(&self) {
        let client = self.client.clone();
        let state = self.state.clone();
        self.client.executor.execute(Box::new(move || {
            start_request(&client, &state, true);
            let error = {
                let mut st = lock(&state);
                if st.failed {
                    return;
                }
                match st.writer.take() {
                    Some(mut writer) => writer.finish().err(),
                    None => None,
                }
            };
            if let Some(error) = error {
                fail_request(&client, &state, error);
            }
        }));
    }

    pub fn cancel(&self) {
        let client = self.client.clone();
        let state = self.state.clone();
        self.client.executor.execute(Box::new(move || {
            let (writer, entry_id) = {
                let mut st = lock(&state);
                st.failed = true;
                (st.writer.take(), st.entry_id.take())
            };
            if let Some(mut writer) = writer {
                writer.cancel();
            }
            if let Some(id) = entry_id {
                lock(&client.pool).fail_entry(id, HttpError::Canceled);
            }
        }));
    }
}

/// Runs on the executor; picks or opens a connection, writes the head, and
/// installs the body writer stack.
fn start_request(client: &HttpClient, state: &Arc<Mutex<RequestState>>, empty_body: bool) {
    let failure = {
        let mut st = lock(state);
        if st.started || st.failed {
            return;
        }
        st.started = true;
        let mut headers = st.request.headers.clone();
        complete_request_headers(&mut headers, &st.request, empty_body, &client.config);
        match prepare(client, &mut st, &headers, empty_body) {
            Ok(()) => None,
            Err(error) => {
                st.failed = true;
                st.receiver.take().map(|receiver| (receiver, error))
            }
        }
    };
    if let Some((mut receiver, error)) = failure {
        receiver.failed(error);
    }
}

fn prepare(
    client: &HttpClient,
    st: &mut RequestState,
    headers: &Headers,
    empty_body: bool,
) -> Result<(), HttpError> {
    let chunked = is_chunked(headers);
    let content_length = content_length_of(headers)?;
    if !empty_body && !chunked && content_length.is_none() {
        return Err(HttpError::MissingBodyFraming);
    }
    let Some(receiver) = st.receiver.take() else {
        return Err(HttpError::Canceled);
    };
    let reader = ResponseReader::new(
        st.request.method,
        receiver,
        client.config.gzip_buffer_size,
    );
    let id = {
        let mut pool = lock(&client.pool);
        let id = match pool.acquire(client, &st.request, reader) {
            Ok(id) => id,
            Err((reader, error)) => {
                // hand the receiver back for the failure path
                st.receiver = reader.into_user();
                return Err(error);
            }
        };
        let head = format_head(&st.request, headers);
        if let Some(entry) = pool.entries.get_mut(&id) {
            entry.connecter.send(None, head);
        }
        id
    };
    st.entry_id = Some(id);
    let mut writer: Box<dyn ContentSender> = Box::new(WireSender {
        client: client.clone(),
        id,
    });
    if chunked {
        writer = Box::new(ChunkedWriter::new(writer));
    } else if let Some(length) = content_length {
        writer = Box::new(ContentLengthWriter::new(length, writer));
    }
    if is_gzip(headers) {
        writer = Box::new(GzipWriter::with_buffer_size(
            writer,
            client.config.gzip_buffer_size,
        ));
    }
    st.writer = Some(writer);
    Ok(())
}

fn fail_request(client: &HttpClient, state: &Arc<Mutex<RequestState>>, error: HttpError) {
    let (receiver, entry_id) = {
        let mut st = lock(state);
        if st.failed {
            return;
        }
        st.failed = true;
        st.writer = None;
        (st.receiver.take(), st.entry_id.take())
    };
    match entry_id {
        Some(id) => lock(&client.pool).fail_entry(id, error),
        None => {
            if let Some(mut receiver) = receiver {
                receiver.failed(error);
            }
        }
    }
}

/// Defaults applied only for headers the caller did not set.
fn complete_request_headers(
    headers: &mut Headers,
    request: &HttpRequest,
    empty_body: bool,
    config: &ClientConfig,
) {
    if !headers.contains(name::HOST) {
        let default_port = if request.secure {
            DEFAULT_SECURE_PORT
        } else {
            DEFAULT_PORT
        };
        let host = if request.address.port == default_port {
            request.address.host.clone()
        } else {
            format!("{}:{}", request.address.host, request.address.port)
        };
        headers.add(name::HOST, host);
    }
    if empty_body
        && !matches!(request.method, HttpMethod::Get | HttpMethod::Head)
        && !headers.contains(name::CONTENT_LENGTH)
        && !is_chunked(headers)
    {
        headers.add(name::CONTENT_LENGTH, "0");
    }
    if !headers.contains(name::ACCEPT_ENCODING) {
        headers.add(name::ACCEPT_ENCODING, value::GZIP);
    }
    if !headers.contains(name::CONNECTION) {
        headers.add(name::CONNECTION, value::KEEP_ALIVE);
    }
    if !headers.contains(name::USER_AGENT) {
        headers.add(name::USER_AGENT, config.user_agent.clone());
    }
    if !headers.contains(name::ACCEPT) {
        headers.add(name::ACCEPT, config.accept.clone());
    }
}

fn format_head(request: &HttpRequest, headers: &Headers) -> Bytes {
    let mut head = format!(
        "{} {} {}\r\n",
        request.method,
        request.path,
        HttpVersion::V11
    );
    for (key, value) in headers.iter() {
        head.push_str(key);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    Bytes::from(head)
}

/// Terminal sender of the request writer stack; `finish` marks the pooled
/// connection reusable again.
struct WireSender {
    client: HttpClient,
    id: u64,
}

impl ContentSender for WireSender {
    fn send(&mut self, data: Bytes) -> Result<(), HttpError> {
        let mut pool = lock(&self.client.pool);
        match pool.entries.get_mut(&self.id) {
            Some(entry) => {
                entry.connecter.send(None, data);
                Ok(())
            }
            None => Err(HttpError::PrematureClose),
        }
    }

    fn finish(&mut self) -> Result<(), HttpError> {
        let mut pool = lock(&self.client.pool);
        match pool.entries.get_mut(&self.id) {
            Some(entry) => {
                entry.reusable = true;
                Ok(())
            }
            None => Err(HttpError::PrematureClose),
        }
    }

    fn cancel(&mut self) {
        lock(&self.client.pool).fail_entry(self.id, HttpError::Canceled);
    }
}

struct Pool {
    entries: HashMap<u64, PoolEntry>,
    next_id: u64,
}

struct PoolEntry {
    connecter: Box<dyn Connecter>,
    address: Address,
    secure: bool,
    /// False while a request is being written on this connection.
    reusable: bool,
    current: Option<ResponseReader>,
    queued: VecDeque<ResponseReader>,
    idle_since: Option<Instant>,
}

impl PoolEntry {
    fn push_reader(&mut self, reader: ResponseReader) {
        match self.current {
            None => self.current = Some(reader),
            Some(_) => self.queued.push_back(reader),
        }
    }

    fn finish_current(&mut self) {
        self.current = self.queued.pop_front();
        if self.current.is_none() {
            self.idle_since = Some(Instant::now());
        }
    }
}

enum Outcome {
    Completed { keep_alive: bool },
    Failed(HttpError),
}

impl Pool {
    /// Select a matching reusable connection or open a new one, then queue
    /// the response reader on it.
    fn acquire(
        &mut self,
        client: &HttpClient,
        request: &HttpRequest,
        reader: ResponseReader,
    ) -> Result<u64, (ResponseReader, HttpError)> {
        self.evict_idle(client.config.recycle_ttl);
        let mut selected = None;
        for (id, entry) in self.entries.iter() {
            if entry.address != request.address || entry.secure != request.secure {
                continue;
            }
            let available = if client.config.pipelining {
                entry.reusable
            } else {
                entry.reusable && entry.current.is_none() && entry.queued.is_empty()
            };
            if available {
                selected = Some(*id);
                break;
            }
        }
        let id = match selected {
            Some(id) => id,
            None => match self.open_entry(client, request) {
                Ok(id) => id,
                Err(error) => return Err((reader, error)),
            },
        };
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.reusable = false;
            entry.idle_since = None;
            entry.push_reader(reader);
        }
        Ok(id)
    }

    fn evict_idle(&mut self, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let now = Instant::now();
        let expired: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry.current.is_none()
                    && entry.queued.is_empty()
                    && entry
                        .idle_since
                        .is_some_and(|idle| now.duration_since(idle) > ttl)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(mut entry) = self.entries.remove(&id) {
                tracing::debug!(address = %entry.address, "evicting idle connection");
                entry.connecter.close();
            }
        }
    }

    fn open_entry(&mut self, client: &HttpClient, request: &HttpRequest) -> Result<u64, HttpError> {
        let id = self.next_id;
        self.next_id += 1;
        let mut connecter: Box<dyn Connecter> = Box::new(TcpSocket::new(
            client.reactor.clone(),
            client.executor.clone(),
            request.address.clone(),
        ));
        if request.secure {
            let Some(tls) = client.config.tls.clone() else {
                return Err(HttpError::MissingTlsConfig);
            };
            let server_name = ServerName::try_from(request.address.host.clone())
                .map_err(|_| HttpError::InvalidServerName(request.address.host.clone()))?;
            connecter = Box::new(SecureSocket::client(
                connecter,
                client.executor.clone(),
                tls,
                server_name,
            ));
        }
        connecter.connect(Box::new(PoolBridge {
            pool: Arc::downgrade(&client.pool),
            id,
        }));
        tracing::debug!(address = %request.address, secure = request.secure, "opening connection");
        self.entries.insert(
            id,
            PoolEntry {
                connecter,
                address: request.address.clone(),
                secure: request.secure,
                reusable: false,
                current: None,
                queued: VecDeque::new(),
                idle_since: None,
            },
        );
        Ok(id)
    }

    fn on_received(&mut self, id: u64, data: &mut Bytes) {
        loop {
            let outcome = {
                let Some(entry) = self.entries.get_mut(&id) else {
                    return;
                };
                let Some(reader) = entry.current.as_mut() else {
                    if !data.is_empty() {
                        tracing::trace!(bytes = data.len(), "dropping bytes outside a response");
                    }
                    return;
                };
                match reader.feed(data) {
                    Ok(Feed::NeedMore) => return,
                    Ok(Feed::Complete) => {
                        let keep_alive = reader.keep_alive();
                        entry.finish_current();
                        Outcome::Completed { keep_alive }
                    }
                    Err(error) => Outcome::Failed(error),
                }
            };
            match outcome {
                Outcome::Completed { keep_alive: true } => continue,
                Outcome::Completed { keep_alive: false } => {
                    self.fail_entry(id, HttpError::PrematureClose);
                    return;
                }
                Outcome::Failed(error) => {
                    self.fail_entry(id, error);
                    return;
                }
            }
        }
    }

    fn on_closed(&mut self, id: u64) {
        let Some(mut entry) = self.entries.remove(&id) else {
            return;
        };
        if let Some(mut reader) = entry.current.take() {
            match reader.transport_closed() {
                Ok(()) => {}
                Err(error) => reader.fail(error),
            }
        }
        for mut reader in entry.queued.drain(..) {
            reader.fail(HttpError::PrematureClose);
        }
    }

    /// Drop the connection; the current reader gets `error`, queued readers
    /// get `PrematureClose`.
    fn fail_entry(&mut self, id: u64, error: HttpError) {
        let Some(mut entry) = self.entries.remove(&id) else {
            return;
        };
        entry.connecter.close();
        if let Some(mut reader) = entry.current.take() {
            reader.fail(error);
        }
        for mut reader in entry.queued.drain(..) {
            reader.fail(HttpError::PrematureClose);
        }
    }
}

/// The [`Connection`] observing one pooled socket.
struct PoolBridge {
    pool: Weak<Mutex<Pool>>,
    id: u64,
}

impl Connection for PoolBridge {
    fn received(&mut self, _from: Option<Address>, data: Bytes) {
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        let mut data = data;
        lock(&pool).on_received(self.id, &mut data);
    }

    fn closed(&mut self) {
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        lock(&pool).on_closed(self.id);
    }

    fn failed(&mut self, error: wireline::Error) {
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        lock(&pool).fail_entry(self.id, HttpError::Transport(error));
    }
}

enum Feed {
    NeedMore,
    Complete,
}

enum Phase {
    StatusLine,
    Headers,
    Body,
    Done,
}

/// Streaming parser for one response: status line, headers, then the body
/// stack assembled from the framing headers.
struct ResponseReader {
    method: HttpMethod,
    user: Option<Box<dyn HttpReceiver>>,
    line: LineReader,
    phase: Phase,
    version: HttpVersion,
    status: u16,
    reason: String,
    headers: Headers,
    keep_alive: bool,
    body: Option<Box<dyn ContentReceiver>>,
    /// Body delimited by connection close (no framing headers).
    unbounded: bool,
    gzip_buffer_size: usize,
}

impl ResponseReader {
    fn new(method: HttpMethod, user: Box<dyn HttpReceiver>, gzip_buffer_size: usize) -> Self {
        ResponseReader {
            method,
            user: Some(user),
            line: LineReader::new(),
            phase: Phase::StatusLine,
            version: HttpVersion::V11,
            status: 0,
            reason: String::new(),
            headers: Headers::new(),
            keep_alive: true,
            body: None,
            unbounded: false,
            gzip_buffer_size,
        }
    }

    fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    fn into_user(self) -> Option<Box<dyn HttpReceiver>> {
        self.user
    }

    fn fail(&mut self, error: HttpError) {
        if let Some(user) = self.user.as_mut() {
            user.failed(error);
        }
    }

    fn feed(&mut self, data: &mut Bytes) -> Result<Feed, HttpError> {
        loop {
            match self.phase {
                Phase::StatusLine => {
                    let Some(line) = self.line.feed(data)? else {
                        return Ok(Feed::NeedMore);
                    };
                    let (version, status, reason) = split_status_line(&line)?;
                    self.version = version;
                    self.status = status;
                    self.reason = reason;
                    self.phase = Phase::Headers;
                }
                Phase::Headers => {
                    let Some(line) = self.line.feed(data)? else {
                        return Ok(Feed::NeedMore);
                    };
                    if !line.is_empty() {
                        let (key, value) = parse_header_line(&line)?;
                        self.headers.add(key, value);
                        continue;
                    }
                    self.head_complete()?;
                    if matches!(self.phase, Phase::Done) {
                        return Ok(Feed::Complete);
                    }
                }
                Phase::Body => {
                    if self.unbounded {
                        if !data.is_empty() {
                            let mut chunk = data.split_to(data.len());
                            if let Some(body) = self.body.as_mut() {
                                body.received(&mut chunk)?;
                            }
                        }
                        return Ok(Feed::NeedMore);
                    }
                    let Some(body) = self.body.as_mut() else {
                        return Ok(Feed::NeedMore);
                    };
                    match body.received(data)? {
                        ReceiveState::Continue => return Ok(Feed::NeedMore),
                        ReceiveState::Ended => {
                            self.phase = Phase::Done;
                            return Ok(Feed::Complete);
                        }
                    }
                }
                Phase::Done => return Ok(Feed::Complete),
            }
        }
    }

    fn head_complete(&mut self) -> Result<(), HttpError> {
        self.keep_alive = negotiate_keep_alive(self.version, &self.headers);
        let response = HttpResponse {
            status: self.status,
            reason: self.reason.clone(),
            headers: self.headers.clone(),
        };
        let Some(user) = self.user.as_mut() else {
            return Err(HttpError::Canceled);
        };
        let terminal = user.received(response);
        if self.method == HttpMethod::Head
            || self.status == 204
            || self.status == 304
            || (100..200).contains(&self.status)
        {
            let mut terminal = terminal;
            terminal.ended()?;
            self.phase = Phase::Done;
            return Ok(());
        }
        let mut stack: Box<dyn ContentReceiver> = terminal;
        if is_gzip(&self.headers) {
            stack = Box::new(GzipReader::with_buffer_size(stack, self.gzip_buffer_size));
        }
        let content_length = content_length_of(&self.headers)?;
        if is_chunked(&self.headers) {
            stack = Box::new(ChunkedReader::new(stack));
        } else if let Some(length) = content_length {
            stack = Box::new(ContentLengthReader::new(length, stack));
        } else {
            // read-until-close body forbids reuse
            self.unbounded = true;
            self.keep_alive = false;
        }
        self.body = Some(stack);
        self.phase = Phase::Body;
        Ok(())
    }

    fn transport_closed(&mut self) -> Result<(), HttpError> {
        match self.phase {
            Phase::Body if self.unbounded => {
                if let Some(body) = self.body.as_mut() {
                    body.ended()?;
                }
                self.phase = Phase::Done;
                Ok(())
            }
            Phase::Done => Ok(()),
            _ => Err(HttpError::PrematureClose),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct Capture {
        status: Arc<StdMutex<Option<u16>>>,
        body: Arc<StdMutex<Vec<u8>>>,
        ended: Arc<StdMutex<bool>>,
        failed: Arc<StdMutex<Option<String>>>,
    }

    struct CaptureBody {
        body: Arc<StdMutex<Vec<u8>>>,
        ended: Arc<StdMutex<bool>>,
    }

    impl ContentReceiver for CaptureBody {
        fn received(&mut self, data: &mut Bytes) -> Result<ReceiveState, HttpError> {
            self.body.lock().unwrap().extend_from_slice(data);
            data.clear();
            Ok(ReceiveState::Continue)
        }
        fn ended(&mut self) -> Result<(), HttpError> {
            *self.ended.lock().unwrap() = true;
            Ok(())
        }
    }

    impl HttpReceiver for Capture {
        fn received(&mut self, response: HttpResponse) -> Box<dyn ContentReceiver> {
            *self.status.lock().unwrap() = Some(response.status);
            Box::new(CaptureBody {
                body: self.body.clone(),
                ended: self.ended.clone(),
            })
        }
        fn failed(&mut self, error: HttpError) {
            *self.failed.lock().unwrap() = Some(error.to_string());
        }
    }

    #[allow(clippy::type_complexity)]
    fn capture() -> (
        Box<Capture>,
        Arc<StdMutex<Option<u16>>>,
        Arc<StdMutex<Vec<u8>>>,
        Arc<StdMutex<bool>>,
        Arc<StdMutex<Option<String>>>,
    ) {
        let status = Arc::new(StdMutex::new(None));
        let body = Arc::new(StdMutex::new(Vec::new()));
        let ended = Arc::new(StdMutex::new(false));
        let failed = Arc::new(StdMutex::new(None));
        (
            Box::new(Capture {
                status: status.clone(),
                body: body.clone(),
                ended: ended.clone(),
                failed: failed.clone(),
            }),
            status,
            body,
            ended,
            failed,
        )
    }

    #[test]
    fn parses_content_length_response() {
        let (user, status, body, ended, _) = capture();
        let mut reader = ResponseReader::new(HttpMethod::Get, user, DEFAULT_BUFFER_SIZE);
        let mut wire = Bytes::from_static(
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhelloEXTRA",
        );
        assert!(matches!(reader.feed(&mut wire).unwrap(), Feed::Complete));
        assert_eq!(*status.lock().unwrap(), Some(200));
        assert_eq!(body.lock().unwrap().as_slice(), b"hello");
        assert!(*ended.lock().unwrap());
        assert_eq!(wire.as_ref(), b"EXTRA");
        assert!(reader.keep_alive());
    }

    #[test]
    fn parses_chunked_response_split_feeds() {
        let (user, _, body, ended, _) = capture();
        let mut reader = ResponseReader::new(HttpMethod::Get, user, DEFAULT_BUFFER_SIZE);
        let wire = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";
        let mut complete = false;
        for part in wire.chunks(3) {
            let mut part = Bytes::copy_from_slice(part);
            if matches!(reader.feed(&mut part).unwrap(), Feed::Complete) {
                complete = true;
            }
        }
        assert!(complete);
        assert_eq!(body.lock().unwrap().as_slice(), b"hello");
        assert!(*ended.lock().unwrap());
    }

    #[test]
    fn head_response_completes_without_body() {
        let (user, status, _, ended, _) = capture();
        let mut reader = ResponseReader::new(HttpMethod::Head, user, DEFAULT_BUFFER_SIZE);
        let mut wire = Bytes::from_static(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n");
        assert!(matches!(reader.feed(&mut wire).unwrap(), Feed::Complete));
        assert_eq!(*status.lock().unwrap(), Some(200));
        assert!(*ended.lock().unwrap());
    }

    #[test]
    fn unbounded_body_completes_on_close() {
        let (user, _, body, ended, _) = capture();
        let mut reader = ResponseReader::new(HttpMethod::Get, user, DEFAULT_BUFFER_SIZE);
        let mut wire = Bytes::from_static(b"HTTP/1.0 200 OK\r\n\r\nall until close");
        assert!(matches!(reader.feed(&mut wire).unwrap(), Feed::NeedMore));
        assert!(!reader.keep_alive());
        reader.transport_closed().unwrap();
        assert_eq!(body.lock().unwrap().as_slice(), b"all until close");
        assert!(*ended.lock().unwrap());
    }

    #[test]
    fn close_mid_framed_body_is_premature() {
        let (user, _, _, _, _) = capture();
        let mut reader = ResponseReader::new(HttpMethod::Get, user, DEFAULT_BUFFER_SIZE);
        let mut wire = Bytes::from_static(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc");
        assert!(matches!(reader.feed(&mut wire).unwrap(), Feed::NeedMore));
        assert!(matches!(
            reader.transport_closed(),
            Err(HttpError::PrematureClose)
        ));
    }

    #[test]
    fn completed_headers_fill_only_missing() {
        let config = ClientConfig::default();
        let request = HttpRequest::get(Address::new("example.com", 8080), "/x")
            .with_header("User-Agent", "custom");
        let mut headers = request.headers.clone();
        complete_request_headers(&mut headers, &request, true, &config);
        assert_eq!(headers.first(name::HOST), Some("example.com:8080"));
        assert_eq!(headers.first(name::USER_AGENT), Some("custom"));
        assert_eq!(headers.first(name::ACCEPT_ENCODING), Some("gzip"));
        assert_eq!(headers.first(name::CONNECTION), Some("keep-alive"));
        // GET with no body gets no Content-Length
        assert!(!headers.contains(name::CONTENT_LENGTH));
    }

    #[test]
    fn default_port_omitted_from_host() {
        let config = ClientConfig::default();
        let request = HttpRequest::get(Address::new("example.com", 80), "/");
        let mut headers = request.headers.clone();
        complete_request_headers(&mut headers, &request, true, &config);
        assert_eq!(headers.first(name::HOST), Some("example.com"));
    }

    #[test]
    fn bodyless_post_gets_zero_content_length() {
        let config = ClientConfig::default();
        let request = HttpRequest::new(
            Address::new("example.com", 80),
            false,
            HttpMethod::Post,
            "/submit",
        );
        let mut headers = request.headers.clone();
        complete_request_headers(&mut headers, &request, true, &config);
        assert_eq!(headers.first(name::CONTENT_LENGTH), Some("0"));
    }
}
