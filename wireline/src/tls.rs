//! TLS adapter layered over any [`Connecter`].
//!
//! `SecureSocket` wraps an inner connector with a rustls engine. The engine
//! is created lazily on connect; `connected` is reported as soon as the
//! engine exists and the handshake proceeds in-line with traffic. Plaintext
//! submitted before the handshake completes is buffered by the engine and
//! flushed once keys are established.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use bytes::{Buf, Bytes};
use rustls::{ClientConnection, ServerConnection};
use rustls_pki_types::ServerName;

use crate::address::Address;
use crate::connection::{Connecter, Connection, Dispatch};
use crate::error::Error;
use crate::executor::Executor;
use crate::lock;

// rustls caps plaintext records at 16 KiB
const PLAINTEXT_CHUNK: usize = 16 * 1024;

enum EngineSetup {
    Client {
        config: Arc<rustls::ClientConfig>,
        server_name: ServerName<'static>,
    },
    Server {
        config: Arc<rustls::ServerConfig>,
    },
}

impl EngineSetup {
    fn create(&self) -> Result<rustls::Connection, Error> {
        match self {
            EngineSetup::Client {
                config,
                server_name,
            } => Ok(rustls::Connection::Client(ClientConnection::new(
                config.clone(),
                server_name.clone(),
            )?)),
            EngineSetup::Server { config } => Ok(rustls::Connection::Server(
                ServerConnection::new(config.clone())?,
            )),
        }
    }
}

enum Step {
    Progress,
    Idle,
}

struct SecureState {
    inner: Box<dyn Connecter>,
    setup: EngineSetup,
    engine: Option<rustls::Connection>,
    /// Plaintext waiting to be wrapped. `None` once torn down.
    outbound: Option<VecDeque<Bytes>>,
    /// Ciphertext waiting to be unwrapped. `None` once torn down.
    inbound: Option<VecDeque<Bytes>>,
    dispatch: Option<Dispatch>,
}

impl SecureState {
    fn torn_down(&self) -> bool {
        self.inbound.is_none() || self.outbound.is_none()
    }

    fn tear_down(&mut self) {
        self.inbound = None;
        self.outbound = None;
        self.engine = None;
        self.inner.close();
    }

    fn fail(&mut self, dispatch: &Dispatch, error: Error) {
        self.tear_down();
        dispatch.failed(error);
    }

    /// Re-entered after every event; loops while any of the three pumps
    /// makes progress.
    fn continue_session(&mut self) {
        let Some(dispatch) = self.dispatch.clone() else {
            return;
        };
        if self.torn_down() {
            return;
        }
        if self.engine.is_none() {
            match self.setup.create() {
                Ok(engine) => {
                    self.engine = Some(engine);
                    dispatch.connected();
                }
                Err(error) => {
                    self.fail(&dispatch, error);
                    return;
                }
            }
        }
        loop {
            let mut progress = false;
            loop {
                match self.unwrap_one(&dispatch) {
                    Ok(Step::Progress) => progress = true,
                    Ok(Step::Idle) => break,
                    Err(error) => {
                        // flush the alert the engine queued before tearing down
                        let _ = self.pump_ciphertext_out();
                        self.fail(&dispatch, error);
                        return;
                    }
                }
                if self.torn_down() {
                    return;
                }
            }
            loop {
                match self.wrap_one() {
                    Ok(Step::Progress) => progress = true,
                    Ok(Step::Idle) => break,
                    Err(error) => {
                        self.fail(&dispatch, error);
                        return;
                    }
                }
            }
            match self.pump_ciphertext_out() {
                Ok(sent) => progress = progress || sent,
                Err(error) => {
                    self.fail(&dispatch, error);
                    return;
                }
            }
            if !progress {
                break;
            }
        }
    }

    /// Feed one queued ciphertext buffer into the engine and drain whatever
    /// plaintext it yields. Reports peer close through `dispatch`.
    fn unwrap_one(&mut self, dispatch: &Dispatch) -> Result<Step, Error> {
        let Some(queue) = self.inbound.as_mut() else {
            return Ok(Step::Idle);
        };
        let Some(front) = queue.front_mut() else {
            return Ok(Step::Idle);
        };
        let Some(engine) = self.engine.as_mut() else {
            return Ok(Step::Idle);
        };
        let mut slice: &[u8] = front.as_ref();
        let n = engine.read_tls(&mut slice).map_err(Error::Io)?;
        if n == 0 {
            return Ok(Step::Idle);
        }
        front.advance(n);
        if front.is_empty() {
            queue.pop_front();
        }
        let io_state = engine.process_new_packets().map_err(Error::Tls)?;
        let mut remaining = io_state.plaintext_bytes_to_read();
        while remaining > 0 {
            let mut buf = vec![0u8; remaining.min(PLAINTEXT_CHUNK)];
            match engine.reader().read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    buf.truncate(n);
                    remaining -= n;
                    dispatch.received(None, Bytes::from(buf));
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) => return Err(Error::Io(error)),
            }
        }
        if io_state.peer_has_closed() {
            let _ = self.pump_ciphertext_out();
            self.tear_down();
            dispatch.closed();
        }
        Ok(Step::Progress)
    }

    /// Move one queued plaintext buffer (or part of it) into the engine.
    fn wrap_one(&mut self) -> Result<Step, Error> {
        let Some(queue) = self.outbound.as_mut() else {
            return Ok(Step::Idle);
        };
        let Some(front) = queue.front_mut() else {
            return Ok(Step::Idle);
        };
        let Some(engine) = self.engine.as_mut() else {
            return Ok(Step::Idle);
        };
        let n = engine.writer().write(front.as_ref()).map_err(Error::Io)?;
        if n == 0 {
            return Ok(Step::Idle);
        }
        front.advance(n);
        if front.is_empty() {
            queue.pop_front();
        }
        Ok(Step::Progress)
    }

    /// Drain engine-produced records to the inner connector.
    fn pump_ciphertext_out(&mut self) -> Result<bool, Error> {
        let Some(engine) = self.engine.as_mut() else {
            return Ok(false);
        };
        let mut sent = false;
        while engine.wants_write() {
            let mut buf = Vec::new();
            engine.write_tls(&mut buf).map_err(Error::Io)?;
            if buf.is_empty() {
                break;
            }
            self.inner.send(None, Bytes::from(buf));
            sent = true;
        }
        Ok(sent)
    }
}

/// The [`Connection`] given to the inner connector.
struct SecureBridge {
    state: Arc<Mutex<SecureState>>,
}

impl Connection for SecureBridge {
    fn connected(&mut self) {
        lock(&self.state).continue_session();
    }

    fn received(&mut self, _from: Option<Address>, data: Bytes) {
        let mut state = lock(&self.state);
        if let Some(queue) = state.inbound.as_mut() {
            queue.push_back(data);
            state.continue_session();
        }
    }

    fn closed(&mut self) {
        let mut state = lock(&self.state);
        let dispatch = state.dispatch.clone();
        state.inbound = None;
        state.outbound = None;
        state.engine = None;
        if let Some(dispatch) = dispatch {
            dispatch.closed();
        }
    }

    fn failed(&mut self, error: Error) {
        let mut state = lock(&self.state);
        let dispatch = state.dispatch.clone();
        state.inbound = None;
        state.outbound = None;
        state.engine = None;
        if let Some(dispatch) = dispatch {
            dispatch.failed(error);
        }
    }
}

/// TLS client or server endpoint over any inner connector.
///
/// The inner connector must dispatch on the same executor; all adapter work
/// runs there, so callbacks keep the ordering the executor guarantees.
pub struct SecureSocket {
    executor: Arc<dyn Executor>,
    state: Arc<Mutex<SecureState>>,
}

impl SecureSocket {
    pub fn client(
        inner: Box<dyn Connecter>,
        executor: Arc<dyn Executor>,
        config: Arc<rustls::ClientConfig>,
        server_name: ServerName<'static>,
    ) -> Self {
        SecureSocket::with_setup(
            inner,
            executor,
            EngineSetup::Client {
                config,
                server_name,
            },
        )
    }

    pub fn server(
        inner: Box<dyn Connecter>,
        executor: Arc<dyn Executor>,
        config: Arc<rustls::ServerConfig>,
    ) -> Self {
        SecureSocket::with_setup(inner, executor, EngineSetup::Server { config })
    }

    fn with_setup(
        inner: Box<dyn Connecter>,
        executor: Arc<dyn Executor>,
        setup: EngineSetup,
    ) -> Self {
        SecureSocket {
            executor,
            state: Arc::new(Mutex::new(SecureState {
                inner,
                setup,
                engine: None,
                outbound: Some(VecDeque::new()),
                inbound: Some(VecDeque::new()),
                dispatch: None,
            })),
        }
    }
}

impl Connecter for SecureSocket {
    fn connect(&mut self, connection: Box<dyn Connection>) {
        let dispatch = Dispatch::new(self.executor.clone(), connection);
        let state = self.state.clone();
        self.executor.execute(Box::new(move || {
            let mut guard = lock(&state);
            if guard.dispatch.is_some() {
                dispatch.failed(Error::AlreadyConnected);
                return;
            }
            if guard.torn_down() {
                dispatch.failed(Error::Closed);
                return;
            }
            guard.dispatch = Some(dispatch);
            let bridge = SecureBridge {
                state: state.clone(),
            };
            guard.inner.connect(Box::new(bridge));
            guard.continue_session();
        }));
    }

    fn send(&mut self, _to: Option<Address>, data: Bytes) {
        let state = self.state.clone();
        self.executor.execute(Box::new(move || {
            let mut guard = lock(&state);
            match guard.outbound.as_mut() {
                Some(queue) => queue.push_back(data),
                None => return,
            }
            guard.continue_session();
        }));
    }

    fn close(&mut self) {
        let state = self.state.clone();
        self.executor.execute(Box::new(move || {
            let mut guard = lock(&state);
            if guard.torn_down() {
                return;
            }
            guard.tear_down();
        }));
    }
}
