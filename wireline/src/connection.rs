//! The connector contract shared by every transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::address::Address;
use crate::error::Error;
use crate::executor::Executor;
use crate::lock;

/// Callback surface of one connection.
///
/// All methods run on the executor the connector was created with, never on
/// the reactor thread. `received` order matches wire order. Exactly one of
/// `closed`/`failed` is delivered per connection, after which no further
/// callbacks arrive.
pub trait Connection: Send {
    fn connected(&mut self) {}
    fn received(&mut self, _from: Option<Address>, _data: Bytes) {}
    fn closed(&mut self) {}
    fn failed(&mut self, _error: Error) {}
}

/// Uniform non-blocking transport endpoint.
pub trait Connecter: Send {
    /// Begin connecting, reporting all subsequent events to `connection`.
    ///
    /// Single-shot: a second call reports `Error::AlreadyConnected` through
    /// the `failed` slot.
    fn connect(&mut self, connection: Box<dyn Connection>);

    /// Queue bytes for transmission. `to` carries the destination on
    /// datagram transports and is ignored on connection-oriented ones.
    /// Never blocks; buffers past the configured high-watermark are dropped.
    fn send(&mut self, to: Option<Address>, data: Bytes);

    /// Tear the connection down. Idempotent.
    fn close(&mut self);
}

/// Closure-slot [`Connection`] for ad-hoc callers.
///
/// ```no_run
/// # use wireline::Callbacks;
/// let connection = Callbacks::new()
///     .on_connected(|| println!("up"))
///     .on_received(|_from, data| println!("{} bytes", data.len()))
///     .on_closed(|| println!("down"));
/// ```
#[derive(Default)]
pub struct Callbacks {
    connected: Option<Box<dyn FnMut() + Send>>,
    received: Option<Box<dyn FnMut(Option<Address>, Bytes) + Send>>,
    closed: Option<Box<dyn FnOnce() + Send>>,
    failed: Option<Box<dyn FnOnce(Error) + Send>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Callbacks::default()
    }

    pub fn on_connected(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.connected = Some(Box::new(f));
        self
    }

    pub fn on_received(mut self, f: impl FnMut(Option<Address>, Bytes) + Send + 'static) -> Self {
        self.received = Some(Box::new(f));
        self
    }

    pub fn on_closed(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.closed = Some(Box::new(f));
        self
    }

    pub fn on_failed(mut self, f: impl FnOnce(Error) + Send + 'static) -> Self {
        self.failed = Some(Box::new(f));
        self
    }
}

impl Connection for Callbacks {
    fn connected(&mut self) {
        if let Some(f) = &mut self.connected {
            f();
        }
    }

    fn received(&mut self, from: Option<Address>, data: Bytes) {
        if let Some(f) = &mut self.received {
            f(from, data);
        }
    }

    fn closed(&mut self) {
        if let Some(f) = self.closed.take() {
            f();
        }
    }

    fn failed(&mut self, error: Error) {
        if let Some(f) = self.failed.take() {
            f(error);
        }
    }
}

/// Executor-side dispatcher for one connection.
///
/// Enforces the terminal contract: exactly one of `closed`/`failed`, never
/// both, never twice. The connection object itself may be installed lazily
/// (accept path); because the executor is serial, the installing task always
/// runs before any event task.
#[derive(Clone)]
pub(crate) struct Dispatch {
    executor: Arc<dyn Executor>,
    connection: Arc<Mutex<Option<Box<dyn Connection>>>>,
    terminated: Arc<AtomicBool>,
}

impl Dispatch {
    pub(crate) fn new(executor: Arc<dyn Executor>, connection: Box<dyn Connection>) -> Self {
        Dispatch {
            executor,
            connection: Arc::new(Mutex::new(Some(connection))),
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A dispatcher whose connection is produced by `install`, run as the
    /// first task on the executor.
    pub(crate) fn deferred(
        executor: Arc<dyn Executor>,
        install: impl FnOnce() -> Box<dyn Connection> + Send + 'static,
    ) -> Self {
        let dispatch = Dispatch {
            executor,
            connection: Arc::new(Mutex::new(None)),
            terminated: Arc::new(AtomicBool::new(false)),
        };
        let slot = dispatch.connection.clone();
        dispatch.executor.execute(Box::new(move || {
            *lock(&slot) = Some(install());
        }));
        dispatch
    }

    pub(crate) fn connected(&self) {
        if self.terminated.load(Ordering::SeqCst) {
            return;
        }
        let slot = self.connection.clone();
        self.executor.execute(Box::new(move || {
            if let Some(connection) = lock(&slot).as_mut() {
                connection.connected();
            }
        }));
    }

    pub(crate) fn received(&self, from: Option<Address>, data: Bytes) {
        if self.terminated.load(Ordering::SeqCst) {
            return;
        }
        let slot = self.connection.clone();
        self.executor.execute(Box::new(move || {
            if let Some(connection) = lock(&slot).as_mut() {
                connection.received(from, data);
            }
        }));
    }

    pub(crate) fn closed(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        let slot = self.connection.clone();
        self.executor.execute(Box::new(move || {
            if let Some(connection) = lock(&slot).as_mut() {
                connection.closed();
            }
        }));
    }

    pub(crate) fn failed(&self, error: Error) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        let slot = self.connection.clone();
        self.executor.execute(Box::new(move || {
            if let Some(connection) = lock(&slot).as_mut() {
                connection.failed(error);
            }
        }));
    }
}
