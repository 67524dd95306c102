//! Callback executors.
//!
//! Every user-visible callback in this crate runs on an [`Executor`] supplied
//! at connector creation, never on the reactor thread. Executors used with
//! connectors must run tasks serially in submission order; all callback
//! ordering guarantees build on that.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Executor: Send + Sync {
    fn execute(&self, task: Task);
}

/// A dedicated FIFO worker thread.
///
/// Tasks run in submission order. A panicking task is logged and does not
/// take the worker down. Dropping the last handle stops the thread after the
/// queued tasks drain.
pub struct SerialExecutor {
    sender: Option<mpsc::Sender<Task>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl SerialExecutor {
    pub fn new(name: &str) -> Self {
        let (sender, receiver) = mpsc::channel::<Task>();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(task) = receiver.recv() {
                    if catch_unwind(AssertUnwindSafe(task)).is_err() {
                        tracing::error!("executor task panicked");
                    }
                }
            })
            .ok();
        SerialExecutor {
            sender: Some(sender),
            worker,
        }
    }
}

impl Executor for SerialExecutor {
    fn execute(&self, task: Task) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(task);
        }
    }
}

impl Drop for SerialExecutor {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
