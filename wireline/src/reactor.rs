//! Single-threaded readiness reactor.
//!
//! One thread blocks on `mio::Poll` and owns every socket driver. All
//! cross-thread interaction goes through [`ReactorHandle::execute`], which
//! enqueues a task and wakes the loop. Drivers live in a slot table indexed
//! by `mio::Token`; a slot is taken out of the table while its driver runs
//! so the driver can register or remove other slots.

use std::collections::VecDeque;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use mio::{Events, Poll, Registry, Token, Waker};

use crate::address::Address;
use crate::config::Config;
use crate::error::Error;

const WAKER_TOKEN: Token = Token(usize::MAX);
const POLL_RETRY_DELAY: Duration = Duration::from_millis(500);

/// What the loop should do with a driver after dispatch.
pub(crate) enum Action {
    Keep,
    Remove,
}

/// A socket state machine owned by the reactor thread.
pub(crate) trait Driver: Send {
    /// Readiness notification for this driver's token.
    fn ready(&mut self, core: &mut Core, readable: bool, writable: bool) -> Action;

    /// Queue outgoing bytes, flushing opportunistically.
    fn enqueue(&mut self, core: &mut Core, to: Option<Address>, data: Bytes) -> Action;

    /// Release the OS handle. Called exactly once, on removal or loop
    /// teardown.
    fn detach(&mut self, registry: &Registry);
}

pub(crate) type LoopTask = Box<dyn FnOnce(&mut Core) + Send>;

/// Loop-side state handed to drivers and tasks.
pub(crate) struct Core {
    registry: Registry,
    slots: Vec<Option<Box<dyn Driver>>>,
    free: Vec<usize>,
    pub(crate) config: Config,
}

impl Core {
    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Reserve a token for a driver about to register its socket.
    pub(crate) fn reserve(&mut self) -> usize {
        match self.free.pop() {
            Some(token) => token,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        }
    }

    pub(crate) fn install(&mut self, token: usize, driver: Box<dyn Driver>) {
        self.slots[token] = Some(driver);
    }

    /// Return an unused reserved token to the free list.
    pub(crate) fn release(&mut self, token: usize) {
        if let Some(slot) = self.slots.get(token) {
            if slot.is_none() {
                self.free.push(token);
            }
        }
    }

    /// Detach and drop the driver at `token`, releasing the slot.
    pub(crate) fn remove(&mut self, token: usize) {
        if let Some(slot) = self.slots.get_mut(token) {
            if let Some(mut driver) = slot.take() {
                driver.detach(&self.registry);
                self.free.push(token);
            }
        }
    }

    pub(crate) fn send(&mut self, token: usize, to: Option<Address>, data: Bytes) {
        self.dispatch(token, |driver, core| driver.enqueue(core, to, data));
    }

    fn ready(&mut self, token: usize, readable: bool, writable: bool) {
        self.dispatch(token, |driver, core| driver.ready(core, readable, writable));
    }

    fn dispatch(
        &mut self,
        token: usize,
        f: impl FnOnce(&mut Box<dyn Driver>, &mut Core) -> Action,
    ) {
        let Some(slot) = self.slots.get_mut(token) else {
            return;
        };
        let Some(mut driver) = slot.take() else {
            return;
        };
        match catch_unwind(AssertUnwindSafe(|| f(&mut driver, self))) {
            Ok(Action::Keep) => {
                self.slots[token] = Some(driver);
            }
            Ok(Action::Remove) => {
                driver.detach(&self.registry);
                self.free.push(token);
            }
            Err(_) => {
                tracing::error!(token, "driver panicked, tearing connection down");
                driver.detach(&self.registry);
                self.free.push(token);
            }
        }
    }
}

struct Shared {
    tasks: Mutex<VecDeque<LoopTask>>,
    waker: Waker,
    shutdown: AtomicBool,
}

/// Owner of the loop thread. Dropping it (or calling [`Reactor::shutdown`])
/// stops the loop, detaches every driver, and joins the thread.
pub struct Reactor {
    shared: Arc<Shared>,
    thread: Option<thread::JoinHandle<()>>,
}

/// Cheap cloneable submission handle to a running reactor.
#[derive(Clone)]
pub struct ReactorHandle {
    shared: Arc<Shared>,
}

impl Reactor {
    pub fn new() -> Result<Reactor, Error> {
        Reactor::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Result<Reactor, Error> {
        config.validate()?;
        let poll = Poll::new().map_err(Error::Io)?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN).map_err(Error::Io)?;
        let registry = poll.registry().try_clone().map_err(Error::Io)?;
        let shared = Arc::new(Shared {
            tasks: Mutex::new(VecDeque::new()),
            waker,
            shutdown: AtomicBool::new(false),
        });
        let loop_shared = shared.clone();
        let thread = thread::Builder::new()
            .name("wireline-reactor".to_string())
            .spawn(move || run_loop(poll, registry, loop_shared, config))
            .map_err(Error::Io)?;
        Ok(Reactor {
            shared,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle {
            shared: self.shared.clone(),
        }
    }

    /// Stop the loop and join its thread. Tasks submitted after this point
    /// are dropped.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        let _ = self.shared.waker.wake();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ReactorHandle {
    /// Run `task` on the reactor thread. Thread-safe; tasks run in
    /// submission order, after the readiness events of the current turn.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) {
        self.execute_loop(Box::new(move |_core| task()));
    }

    pub(crate) fn execute_loop(&self, task: LoopTask) {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut tasks = self
                .shared
                .tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            tasks.push_back(task);
        }
        let _ = self.shared.waker.wake();
    }
}

fn run_loop(mut poll: Poll, registry: Registry, shared: Arc<Shared>, config: Config) {
    let mut events = Events::with_capacity(config.events_capacity);
    let mut core = Core {
        registry,
        slots: Vec::new(),
        free: Vec::new(),
        config,
    };
    loop {
        if let Err(error) = poll.poll(&mut events, None) {
            if error.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            tracing::warn!(%error, "poll failed, retrying");
            thread::sleep(POLL_RETRY_DELAY);
            continue;
        }
        for event in events.iter() {
            if event.token() == WAKER_TOKEN {
                continue;
            }
            let readable = event.is_readable() || event.is_read_closed();
            let writable = event.is_writable() || event.is_write_closed();
            core.ready(event.token().0, readable, writable);
        }
        loop {
            let task = {
                let mut tasks = shared
                    .tasks
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                tasks.pop_front()
            };
            let Some(task) = task else { break };
            if catch_unwind(AssertUnwindSafe(|| task(&mut core))).is_err() {
                tracing::error!("reactor task panicked");
            }
        }
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
    }
    for token in 0..core.slots.len() {
        core.remove(token);
    }
}
