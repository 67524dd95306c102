//! TCP accept listener.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use mio::net::TcpListener;
use mio::{Interest, Registry, Token};

use crate::address::Address;
use crate::connection::{Connection, Dispatch};
use crate::error::Error;
use crate::executor::Executor;
use crate::lock;
use crate::reactor::{Action, Core, Driver, ReactorHandle};
use crate::tcp::{HandleState, TcpDriver};

/// Callback surface of a listening socket.
///
/// `connected` runs on the listener's executor for every accepted stream and
/// returns the [`Connection`] that will observe that stream. Events for the
/// stream cannot outrun the returned object: the installing task is the
/// first one queued for it.
pub trait Listening: Send {
    fn connected(&mut self, peer: Address, accepted: Accepted) -> Box<dyn Connection>;
    fn closed(&mut self) {}
    fn failed(&mut self, _error: Error) {}
}

/// Send/close handle for one accepted stream.
#[derive(Clone)]
pub struct Accepted {
    reactor: ReactorHandle,
    shared: Arc<Mutex<HandleState>>,
}

impl Accepted {
    pub fn send(&self, data: Bytes) {
        let shared = self.shared.clone();
        self.reactor.execute_loop(Box::new(move |core| {
            let token = {
                let state = lock(&shared);
                if state.closed {
                    return;
                }
                state.token
            };
            if let Some(token) = token {
                core.send(token, None, data);
            }
        }));
    }

    pub fn close(&self) {
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

/// Non-blocking TCP accept loop bound to one address.
pub struct TcpSocketServer {
    reactor: ReactorHandle,
    executor: Arc<dyn Executor>,
    bind: Address,
    shared: Arc<Mutex<HandleState>>,
}

impl TcpSocketServer {
    pub fn new(reactor: ReactorHandle, executor: Arc<dyn Executor>, bind: Address) -> Self {
        TcpSocketServer {
            reactor,
            executor,
            bind,
            shared: HandleState::new(),
        }
    }

    /// Bind, register, and start accepting. Single-shot, like `connect`.
    pub fn listen(&mut self, listening: Box<dyn Listening>) {
        let shared = self.shared.clone();
        let bind = self.bind.clone();
        let executor = self.executor.clone();
        let reactor = self.reactor.clone();
        let listening = Arc::new(Mutex::new(listening));
        self.reactor.execute_loop(Box::new(move |core| {
            {
                let mut state = lock(&shared);
                if state.closed {
                    fail_listening(&executor, &listening, Error::Closed);
                    return;
                }
                if state.connect_called {
                    fail_listening(&executor, &listening, Error::AlreadyConnected);
                    return;
                }
                state.connect_called = true;
            }
            let local = match bind.resolve() {
                Ok(local) => local,
                Err(error) => {
                    lock(&shared).closed = true;
                    fail_listening(&executor, &listening, error);
                    return;
                }
            };
            let mut socket = match TcpListener::bind(local) {
                Ok(socket) => socket,
                Err(error) => {
                    lock(&shared).closed = true;
                    fail_listening(&executor, &listening, error.into());
                    return;
                }
            };
            let token = core.reserve();
            if let Err(error) =
                core.registry()
                    .register(&mut socket, Token(token), Interest::READABLE)
            {
                core.release(token);
                lock(&shared).closed = true;
                fail_listening(&executor, &listening, error.into());
                return;
            }
            lock(&shared).token = Some(token);
            core.install(
                token,
                Box::new(AcceptDriver {
                    socket,
                    executor,
                    reactor,
                    listening,
                    shared,
                }),
            );
        }));
    }

    /// Stop accepting. Streams already accepted stay open.
    pub fn close(&mut self) {
        let shared = self.shared.clone();
        self.reactor.execute_loop(Box::new(move |core| {
            let token = {
                let mut state = lock(&shared);
                state.closed = true;
                state.token.take()
            };
            if let Some(token) = token {
                core.remove(token);
            }
        }));
    }
}

fn fail_listening(
    executor: &Arc<dyn Executor>,
    listening: &Arc<Mutex<Box<dyn Listening>>>,
    error: Error,
) {
    let listening = listening.clone();
    executor.execute(Box::new(move || {
        lock(&listening).failed(error);
    }));
}

struct AcceptDriver {
    socket: TcpListener,
    executor: Arc<dyn Executor>,
    reactor: ReactorHandle,
    listening: Arc<Mutex<Box<dyn Listening>>>,
    shared: Arc<Mutex<HandleState>>,
}

impl Driver for AcceptDriver {
    fn ready(&mut self, core: &mut Core, readable: bool, _writable: bool) -> Action {
        if !readable {
            return Action::Keep;
        }
        loop {
            match self.socket.accept() {
                Ok((mut stream, peer)) => {
                    let token = core.reserve();
                    if let Err(error) = core.registry().register(
                        &mut stream,
                        Token(token),
                        Interest::READABLE,
                    ) {
                        core.release(token);
                        tracing::warn!(%error, "could not register accepted stream");
                        continue;
                    }
                    let shared = HandleState::new();
                    {
                        let mut state = lock(&shared);
                        state.token = Some(token);
                        state.connect_called = true;
                    }
                    let accepted = Accepted {
                        reactor: self.reactor.clone(),
                        shared: shared.clone(),
                    };
                    let listening = self.listening.clone();
                    let peer_address = Address::from(peer);
                    let install_peer = peer_address.clone();
                    let dispatch = Dispatch::deferred(self.executor.clone(), move || {
                        lock(&listening).connected(install_peer, accepted)
                    });
                    lock(&shared).dispatch = Some(dispatch.clone());
                    let limit = core.config.write_buffer_limit;
                    core.install(
                        token,
                        Box::new(TcpDriver::open(stream, token, dispatch, shared, limit)),
                    );
                    tracing::debug!(peer = %peer_address, "accepted");
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    fail_listening(&self.executor, &self.listening, error.into());
                    return Action::Remove;
                }
            }
        }
        Action::Keep
    }

    fn enqueue(&mut self, _core: &mut Core, _to: Option<Address>, _data: Bytes) -> Action {
        Action::Keep
    }

    fn detach(&mut self, registry: &Registry) {
        let _ = registry.deregister(&mut self.socket);
        let mut state = lock(&self.shared);
        state.token = None;
        state.closed = true;
        let listening = self.listening.clone();
        self.executor.execute(Box::new(move || {
            lock(&listening).closed();
        }));
    }
}
