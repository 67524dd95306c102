//! UDP datagram connector.

use std::io;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use mio::net::UdpSocket as MioUdpSocket;
use mio::{Interest, Registry, Token};

use crate::address::Address;
use crate::connection::{Connecter, Connection, Dispatch};
use crate::error::Error;
use crate::executor::Executor;
use crate::lock;
use crate::queue::WriteQueue;
use crate::reactor::{Action, Core, Driver, ReactorHandle};
use crate::tcp::HandleState;

/// Bind-oriented datagram connector.
///
/// `connected` fires once the socket is bound; `send` carries a destination
/// per buffer. Destination names resolve lazily at flush time; a failed
/// resolution discards that entry alone and flushing continues.
pub struct UdpSocket {
    reactor: ReactorHandle,
    executor: Arc<dyn Executor>,
    bind: Option<Address>,
    shared: Arc<Mutex<HandleState>>,
}

impl UdpSocket {
    pub fn new(reactor: ReactorHandle, executor: Arc<dyn Executor>) -> Self {
        UdpSocket {
            reactor,
            executor,
            bind: None,
            shared: HandleState::new(),
        }
    }

    /// Bind to a specific local address instead of an ephemeral port.
    pub fn bind(mut self, bind: Address) -> Self {
        self.bind = Some(bind);
        self
    }
}

impl Connecter for UdpSocket {
    fn connect(&mut self, connection: Box<dyn Connection>) {
        let dispatch = Dispatch::new(self.executor.clone(), connection);
        let shared = self.shared.clone();
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
            let local = match &bind {
                Some(bind) => match bind.resolve() {
                    Ok(local) => local,
                    Err(error) => {
                        lock(&shared).closed = true;
                        dispatch.failed(error);
                        return;
                    }
                },
                None => std::net::SocketAddr::from((std::net::Ipv4Addr::UNSPECIFIED, 0)),
            };
            let mut socket = match MioUdpSocket::bind(local) {
                Ok(socket) => socket,
                Err(error) => {
                    lock(&shared).closed = true;
                    dispatch.failed(error.into());
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
                Box::new(UdpDriver {
                    socket,
                    token,
                    queue: WriteQueue::new(limit),
                    dispatch: dispatch.clone(),
                    shared: shared.clone(),
                    interest: Interest::READABLE,
                }),
            );
            for (to, data) in parked {
                core.send(token, to, data);
            }
            dispatch.connected();
        }));
    }

    fn send(&mut self, to: Option<Address>, data: Bytes) {
        let Some(to) = to else {
            tracing::warn!("udp send without destination, dropping buffer");
            return;
        };
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
                        state.parked.push((Some(to), data));
                        return;
                    }
                }
            };
            core.send(token, Some(to), data);
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

struct UdpDriver {
    socket: MioUdpSocket,
    token: usize,
    queue: WriteQueue,
    dispatch: Dispatch,
    shared: Arc<Mutex<HandleState>>,
    interest: Interest,
}

impl UdpDriver {
    fn flush(&mut self) -> io::Result<()> {
        while let Some(front) = self.queue.front() {
            let target = match &front.to {
                Some(to) => match to.resolve() {
                    Ok(target) => target,
                    Err(error) => {
                        tracing::warn!(%error, "dropping datagram");
                        self.queue.discard_front();
                        continue;
                    }
                },
                None => {
                    self.queue.discard_front();
                    continue;
                }
            };
            match self.socket.send_to(&front.data, target) {
                Ok(_) => {
                    // datagrams go out whole or not at all
                    self.queue.discard_front();
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
                .reregister(&mut self.socket, Token(self.token), want)?;
            self.interest = want;
        }
        Ok(())
    }
}

impl Driver for UdpDriver {
    fn ready(&mut self, core: &mut Core, readable: bool, writable: bool) -> Action {
        if writable {
            if let Err(error) = self.flush() {
                self.dispatch.failed(error.into());
                return Action::Remove;
            }
        }
        if readable {
            loop {
                let mut buf = vec![0u8; core.config.read_buffer_size];
                match self.socket.recv_from(&mut buf) {
                    Ok((n, from)) => {
                        buf.truncate(n);
                        self.dispatch.received(Some(Address::from(from)), Bytes::from(buf));
                    }
                    Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                    Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                    Err(error) => {
                        self.dispatch.failed(error.into());
                        return Action::Remove;
                    }
                }
            }
        }
        if let Err(error) = self.update_interest(core) {
            self.dispatch.failed(error.into());
            return Action::Remove;
        }
        Action::Keep
    }

    fn enqueue(&mut self, core: &mut Core, to: Option<Address>, data: Bytes) -> Action {
        if !self.queue.push(to, data) {
            tracing::warn!(token = self.token, "write queue over high-watermark, dropping buffer");
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
        let _ = registry.deregister(&mut self.socket);
        self.queue.clear();
        let mut state = lock(&self.shared);
        state.token = None;
        state.closed = true;
    }
}
