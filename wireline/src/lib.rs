//! Non-blocking socket framework built around a single-threaded readiness
//! reactor.
//!
//! One reactor thread multiplexes every socket; user code talks to uniform
//! [`Connecter`] endpoints (TCP client, TCP listener, UDP, raw IP) and
//! observes them through [`Connection`] callbacks running on a serial
//! [`Executor`]. [`SecureSocket`] layers TLS over any connector. The
//! `wireline-http` crate builds HTTP/1.x on the same contract.
//!
//! ```no_run
//! use std::sync::Arc;
//! use wireline::{Address, Callbacks, Connecter, Reactor, SerialExecutor, TcpSocket};
//!
//! let reactor = Reactor::new().unwrap();
//! let executor = Arc::new(SerialExecutor::new("callbacks"));
//! let mut socket = TcpSocket::new(reactor.handle(), executor, Address::new("example.com", 80));
//! socket.connect(Box::new(
//!     Callbacks::new().on_received(|_from, data| println!("{} bytes", data.len())),
//! ));
//! socket.send(None, bytes::Bytes::from_static(b"GET / HTTP/1.0\r\n\r\n"));
//! ```

use std::sync::{Mutex, MutexGuard};

pub mod address;
pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod listener;
mod queue;
#[cfg(unix)]
pub mod raw;
pub mod reactor;
pub mod tcp;
pub mod tls;
pub mod udp;

pub use address::Address;
pub use config::Config;
pub use connection::{Callbacks, Connecter, Connection};
pub use error::Error;
pub use executor::{Executor, SerialExecutor};
pub use listener::{Accepted, Listening, TcpSocketServer};
#[cfg(unix)]
pub use raw::{IpFamily, RawSocket};
pub use reactor::{Reactor, ReactorHandle};
pub use tcp::TcpSocket;
pub use tls::SecureSocket;
pub use udp::UdpSocket;

/// Lock that survives a poisoning panic; callback state must stay reachable
/// for teardown.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
