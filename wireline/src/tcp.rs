//! TCP client connector.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use socket2::{Domain, Protocol, Socket, Type};

use crate::address::Address;
use crate::config::Config;
use crate::connection::{Connecter, Connection, Dispatch};
use crate::error::Error;
use crate::executor::Executor;
use crate::lock;
use crate::queue::WriteQueue;
use crate::reactor::{Action, Core, ReactorHandle};

/// Handle-side state, shared with the reactor-side driver.
pub(crate) struct HandleState {
    pub(crate) token: Option<usize>,
    pub(crate) connect_called: bool,
    pub(crate) closed: bool,
    pub(crate) dispatch: Option<Dispatch>,
    /// Buffers sent before the connect task installed the driver; drained
    /// into the write queue once the token exists.
    pub(crate) parked: Vec<(Option<Address>, Bytes)>,
}

impl HandleState {
    pub(crate) fn new() -> Arc<Mutex<HandleState>> {
        Arc::new(Mutex::new(HandleState {
            token: None,
            connect_called: false,
            closed: false,
            dispatch: None,
            parked: Vec::new(),
        }))
    }
}

/// Single-shot non-blocking TCP connector.
///
/// `connect` resolves the address, opens the stream and fires `connected`
/// once the three-way handshake completes. EOF reports `closed`, an OS error
/// reports `failed`; either way the socket is torn down and no further
/// callbacks arrive.
pub struct TcpSocket {
    reactor: ReactorHandle,
    executor: Arc<dyn Executor>,
    address: Address,
    bind: Option<Address>,
    shared: Arc<Mutex<HandleState>>,
}

impl TcpSocket {
    pub fn new(reactor: ReactorHandle, executor: Arc<dyn Executor>, address: Address) -> Self {
        TcpSocket {
            reactor,
            executor,
            address,
            bind: None,
            shared: HandleState::new(),
        }
    }

    /// Bind the local end before connecting.
    pub fn bind(mut self, bind: Address) -> Self {
        self.bind = Some(bind);
        self
    }
}

impl Connecter for TcpSocket {
    fn connect(&mut self, connection: Box<dyn Connection>) {
        let dispatch = Dispatch::new(self.executor.clone(), connection);
        let shared = self.shared.clone();
        let address = self.address.clone();
        let bind = self.bind.clone();
        self.reactor.execute_loop(Box::new(move |core| {
            {
                let mut state = lock(&shared);
                if state.closed {
                    dispatch.failed(Error::Closed);
                    return;
                }
                if state.connect_called {
                    dispatch.failed(Error::AlreadyConnected);
                    return;
                }
                state.connect_called = true;
                state.dispatch = Some(dispatch.clone());
            }
            let mut stream = match open_stream(&address, bind.as_ref(), &core.config) {
                Ok(stream) => stream,
                Err(error) => {
                    lock(&shared).closed = true;
                    dispatch.failed(error);
                    return;
                }
            };
            let token = core.reserve();
            if let Err(error) =
                core.registry()
                    .register(&mut stream, Token(token), Interest::WRITABLE)
            {
                core.release(token);
                lock(&shared).closed = true;
                dispatch.failed(error.into());
                return;
            }
            let parked = {
                let mut state = lock(&shared);
                state.token = Some(token);
                std::mem::take(&mut state.parked)
            };
            let limit = core.config.write_buffer_limit;
            core.install(
                token,
                Box::new(TcpDriver::connecting(
                    stream,
                    token,
                    dispatch,
                    shared.clone(),
                    limit,
                )),
            );
            for (to, data) in parked {
                core.send(token, to, data);
            }
        }));
    }

    fn send(&mut self, _to: Option<Address>, data: Bytes) {
        let shared = self.shared.clone();
        self.reactor.execute_loop(Box::new(move |core| {
            let token = {
                let mut state = lock(&shared);
                if state.closed {
                    return;
                }
                match state.token {
                    Some(token) => token,
                    None => {
                        state.parked.push((None, data));
                        return;
                    }
                }
            };
            core.send(token, None, data);
        }));
    }

    fn close(&mut self) {
        let shared = self.shared.clone();
        self.reactor.execute_loop(Box::new(move |core| {
            let (token, dispatch) = {
                let mut state = lock(&shared);
                state.closed = true;
                (state.token.take(), state.dispatch.clone())
            };
            if let Some(token) = token {
                core.remove(token);
            }
            if let Some(dispatch) = dispatch {
                dispatch.closed();
            }
        }));
    }
}

fn open_stream(
    address: &Address,
    bind: Option<&Address>,
    config: &Config,
) -> Result<TcpStream, Error> {
    let target = address.resolve()?;
    let socket = Socket::new(
        Domain::for_address(target),
        Type::STREAM,
        Some(Protocol::TCP),
    )
    .map_err(Error::Io)?;
    socket.set_nonblocking(true).map_err(Error::Io)?;
    if config.socket_read_buffer > 0 {
        socket
            .set_recv_buffer_size(config.socket_read_buffer)
            .map_err(Error::Io)?;
    }
    if config.socket_write_buffer > 0 {
        socket
            .set_send_buffer_size(config.socket_write_buffer)
            .map_err(Error::Io)?;
    }
    if let Some(bind) = bind {
        let local = bind.resolve()?;
        socket.bind(&local.into()).map_err(Error::Io)?;
    }
    match socket.connect(&target.into()) {
        Ok(()) => {}
        Err(error) if connect_in_progress(&error) => {}
        Err(error) => return Err(error.into()),
    }
    Ok(TcpStream::from_std(socket.into()))
}

fn connect_in_progress(error: &io::Error) -> bool {
    #[cfg(unix)]
    if error.raw_os_error() == Some(libc::EINPROGRESS) {
        return true;
    }
    error.kind() == io::ErrorKind::WouldBlock
}

enum StreamState {
    Connecting,
    Open,
}

/// Reactor-side state machine for one TCP stream, client or accepted.
pub(crate) struct TcpDriver {
    stream: TcpStream,
    token: usize,
    queue: WriteQueue,
    dispatch: Dispatch,
    shared: Arc<Mutex<HandleState>>,
    state: StreamState,
    interest: Interest,
}

impl TcpDriver {
    pub(crate) fn connecting(
        stream: TcpStream,
        token: usize,
        dispatch: Dispatch,
        shared: Arc<Mutex<HandleState>>,
        write_limit: u64,
    ) -> Self {
        TcpDriver {
            stream,
            token,
            queue: WriteQueue::new(write_limit),
            dispatch,
            shared,
            state: StreamState::Connecting,
            interest: Interest::WRITABLE,
        }
    }

    /// For accepted streams, already connected and registered READABLE.
    pub(crate) fn open(
        stream: TcpStream,
        token: usize,
        dispatch: Dispatch,
        shared: Arc<Mutex<HandleState>>,
        write_limit: u64,
    ) -> Self {
        TcpDriver {
            stream,
            token,
            queue: WriteQueue::new(write_limit),
            dispatch,
            shared,
            state: StreamState::Open,
            interest: Interest::READABLE,
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        while let Some(front) = self.queue.front() {
            match self.stream.write(&front.data) {
                Ok(n) => {
                    let done = n == front.data.len();
                    self.queue.advance(n);
                    if !done {
                        break;
                    }
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    fn update_interest(&mut self, core: &Core) -> io::Result<()> {
        let mut want = Interest::READABLE;
        if !self.queue.is_empty() {
            want = want.add(Interest::WRITABLE);
        }
        if want != self.interest {
            core.registry()
                .reregister(&mut self.stream, Token(self.token), want)?;
            self.interest = want;
        }
        Ok(())
    }

    fn drain_reads(&mut self, core: &Core) -> Option<Action> {
        loop {
            let mut buf = vec![0u8; core.config.read_buffer_size];
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    self.dispatch.closed();
                    return Some(Action::Remove);
                }
                Ok(n) => {
                    buf.truncate(n);
                    self.dispatch.received(None, Bytes::from(buf));
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return None,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    self.dispatch.failed(error.into());
                    return Some(Action::Remove);
                }
            }
        }
    }
}

impl crate::reactor::Driver for TcpDriver {
    fn ready(&mut self, core: &mut Core, readable: bool, writable: bool) -> Action {
        match self.state {
            StreamState::Connecting => {
                if !writable {
                    return Action::Keep;
                }
                match self.stream.take_error() {
                    Ok(None) => {}
                    Ok(Some(error)) | Err(error) => {
                        self.dispatch.failed(error.into());
                        return Action::Remove;
                    }
                }
                match self.stream.peer_addr() {
                    Ok(_) => {}
                    Err(error)
                        if error.kind() == io::ErrorKind::NotConnected
                            || connect_in_progress(&error) =>
                    {
                        return Action::Keep;
                    }
                    Err(error) => {
                        self.dispatch.failed(error.into());
                        return Action::Remove;
                    }
                }
                self.state = StreamState::Open;
                self.dispatch.connected();
                if let Err(error) = self.flush() {
                    self.dispatch.failed(error.into());
                    return Action::Remove;
                }
                if let Err(error) = self.update_interest(core) {
                    self.dispatch.failed(error.into());
                    return Action::Remove;
                }
                Action::Keep
            }
            StreamState::Open => {
                if writable {
                    if let Err(error) = self.flush() {
                        self.dispatch.failed(error.into());
                        return Action::Remove;
                    }
                }
                if readable {
                    if let Some(action) = self.drain_reads(core) {
                        return action;
                    }
                }
                if let Err(error) = self.update_interest(core) {
                    self.dispatch.failed(error.into());
                    return Action::Remove;
                }
                Action::Keep
            }
        }
    }

    fn enqueue(&mut self, core: &mut Core, _to: Option<Address>, data: Bytes) -> Action {
        if !self.queue.push(None, data) {
            tracing::warn!(token = self.token, "write queue over high-watermark, dropping buffer");
            return Action::Keep;
        }
        if matches!(self.state, StreamState::Connecting) {
            // flushed when the handshake completes
            return Action::Keep;
        }
        if let Err(error) = self.flush() {
            self.dispatch.failed(error.into());
            return Action::Remove;
        }
        if let Err(error) = self.update_interest(core) {
            self.dispatch.failed(error.into());
            return Action::Remove;
        }
        Action::Keep
    }

    fn detach(&mut self, registry: &Registry) {
        let _ = registry.deregister(&mut self.stream);
        self.queue.clear();
        let mut state = lock(&self.shared);
        state.token = None;
        state.closed = true;
    }
}
