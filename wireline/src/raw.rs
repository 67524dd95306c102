//! Raw IP datagram connector (unix only).
//!
//! Requires the privileges raw sockets demand (root or CAP_NET_RAW). The
//! IPv4 receive path strips the IP header before delivery; the send path
//! writes payload only, the kernel prepends the header.

use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::os::fd::AsRawFd;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::address::Address;
use crate::connection::{Connecter, Connection, Dispatch};
use crate::error::Error;
use crate::executor::Executor;
use crate::lock;
use crate::queue::WriteQueue;
use crate::reactor::{Action, Core, Driver, ReactorHandle};
use crate::tcp::HandleState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

/// Raw IP connector for one protocol number (e.g. 1 for ICMP).
pub struct RawSocket {
    reactor: ReactorHandle,
    executor: Arc<dyn Executor>,
    family: IpFamily,
    protocol: u32,
    bind: Option<Address>,
    shared: Arc<Mutex<HandleState>>,
}

impl RawSocket {
    pub fn new(
        reactor: ReactorHandle,
        executor: Arc<dyn Executor>,
        family: IpFamily,
        protocol: u32,
    ) -> Self {
        RawSocket {
            reactor,
            executor,
            family,
            protocol,
            bind: None,
            shared: HandleState::new(),
        }
    }

    pub fn bind(mut self, bind: Address) -> Self {
        self.bind = Some(bind);
        self
    }
}

impl Connecter for RawSocket {
    fn connect(&mut self, connection: Box<dyn Connection>) {
        let dispatch = Dispatch::new(self.executor.clone(), connection);
        let shared = self.shared.clone();
        let family = self.family;
        let protocol = self.protocol;
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
            let socket = match open_raw(family, protocol, bind.as_ref()) {
                Ok(socket) => socket,
                Err(error) => {
                    lock(&shared).closed = true;
                    dispatch.failed(error);
                    return;
                }
            };
            let token = core.reserve();
            if let Err(error) = core.registry().register(
                &mut SourceFd(&socket.as_raw_fd()),
                Token(token),
                Interest::READABLE,
            ) {
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
                Box::new(RawDriver {
                    socket,
                    token,
                    family,
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
            tracing::warn!("raw send without destination, dropping buffer");
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

fn open_raw(family: IpFamily, protocol: u32, bind: Option<&Address>) -> Result<Socket, Error> {
    let domain = match family {
        IpFamily::V4 => Domain::IPV4,
        IpFamily::V6 => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::RAW, Some(Protocol::from(protocol as i32)))
        .map_err(Error::Io)?;
    socket.set_nonblocking(true).map_err(Error::Io)?;
    if let Some(bind) = bind {
        let ip: IpAddr = bind
            .host
            .parse()
            .map_err(|_| Error::Resolution(bind.clone()))?;
        socket
            .bind(&SockAddr::from(SocketAddr::new(ip, 0)))
            .map_err(Error::Io)?;
    }
    Ok(socket)
}

struct RawDriver {
    socket: Socket,
    token: usize,
    family: IpFamily,
    queue: WriteQueue,
    dispatch: Dispatch,
    shared: Arc<Mutex<HandleState>>,
    interest: Interest,
}

impl RawDriver {
    fn flush(&mut self) -> io::Result<()> {
        while let Some(front) = self.queue.front() {
            let target = match &front.to {
                Some(to) => {
                    let ip: Result<IpAddr, _> = to.host.parse();
                    match ip {
                        Ok(ip) => SockAddr::from(SocketAddr::new(ip, 0)),
                        Err(_) => {
                            tracing::warn!(to = %to, "unresolvable raw destination, dropping");
                            self.queue.discard_front();
                            continue;
                        }
                    }
                }
                None => {
                    self.queue.discard_front();
                    continue;
                }
            };
            match self.socket.send_to(&front.data, &target) {
                Ok(_) => self.queue.discard_front(),
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
            core.registry().reregister(
                &mut SourceFd(&self.socket.as_raw_fd()),
                Token(self.token),
                want,
            )?;
            self.interest = want;
        }
        Ok(())
    }

    fn deliver(&mut self, packet: &[u8], from: SockAddr) {
        let payload = match self.family {
            IpFamily::V4 => {
                // strip the IP header, IHL is in 32-bit words
                if packet.is_empty() {
                    return;
                }
                let header_len = ((packet[0] & 0x0f) as usize) * 4;
                if packet.len() < header_len {
                    return;
                }
                &packet[header_len..]
            }
            IpFamily::V6 => packet,
        };
        let from = from
            .as_socket()
            .map(Address::from)
            .unwrap_or_else(|| match self.family {
                IpFamily::V4 => Address::from(SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)),
                IpFamily::V6 => Address::from(SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0)),
            });
        self.dispatch
            .received(Some(from), Bytes::copy_from_slice(payload));
    }
}

impl Driver for RawDriver {
    fn ready(&mut self, core: &mut Core, readable: bool, writable: bool) -> Action {
        if writable {
            if let Err(error) = self.flush() {
                self.dispatch.failed(error.into());
                return Action::Remove;
            }
        }
        if readable {
            loop {
                let mut buf = vec![MaybeUninit::<u8>::uninit(); core.config.read_buffer_size];
                match self.socket.recv_from(&mut buf) {
                    Ok((n, from)) => {
                        // recv_from initialized the first n bytes
                        let packet = unsafe {
                            std::slice::from_raw_parts(buf.as_ptr() as *const u8, n)
                        };
                        self.deliver(packet, from);
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
        let _ = registry.deregister(&mut SourceFd(&self.socket.as_raw_fd()));
        self.queue.clear();
        let mut state = lock(&self.shared);
        state.token = None;
        state.closed = true;
    }
}
