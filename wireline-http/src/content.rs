//! Streaming content contracts shared by every codec stage.

use bytes::Bytes;

use crate::error::HttpError;

/// Outcome of feeding bytes to a receiver stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiveState {
    /// More content expected.
    Continue,
    /// Content logically complete; unconsumed bytes were left in the
    /// caller's buffer (pipelined successor).
    Ended,
}

/// Consumer side of a codec stack.
///
/// `received` consumes what belongs to this stage from the front of `data`
/// and leaves the rest. A stage signals its own completion by returning
/// [`ReceiveState::Ended`] after propagating `ended` to its inner receiver.
/// `ended` called from the transport side (peer closed) is a framing error
/// for length-delimited stages.
pub trait ContentReceiver: Send {
    fn received(&mut self, data: &mut Bytes) -> Result<ReceiveState, HttpError>;
    fn ended(&mut self) -> Result<(), HttpError>;
}

/// Producer side of a codec stack.
pub trait ContentSender: Send {
    fn send(&mut self, data: Bytes) -> Result<(), HttpError>;
    fn finish(&mut self) -> Result<(), HttpError>;
    /// Abandon the content; no further framing is emitted.
    fn cancel(&mut self);
}

/// Terminal receiver that discards everything, used to drain bodies nobody
/// wants (redirect intermediates).
pub struct DrainReceiver;

impl ContentReceiver for DrainReceiver {
    fn received(&mut self, data: &mut Bytes) -> Result<ReceiveState, HttpError> {
        data.clear();
        Ok(ReceiveState::Continue)
    }

    fn ended(&mut self) -> Result<(), HttpError> {
        Ok(())
    }
}

/// Terminal sender funneling framed bytes into closures; the wire side of a
/// writer stack.
pub struct SinkSender<S, F>
where
    S: FnMut(Bytes) + Send,
    F: FnMut() + Send,
{
    sink: S,
    on_finish: F,
    finished: bool,
}

impl<S, F> SinkSender<S, F>
where
    S: FnMut(Bytes) + Send,
    F: FnMut() + Send,
{
    pub fn new(sink: S, on_finish: F) -> Self {
        SinkSender {
            sink,
            on_finish,
            finished: false,
        }
    }
}

impl<S, F> ContentSender for SinkSender<S, F>
where
    S: FnMut(Bytes) + Send,
    F: FnMut() + Send,
{
    fn send(&mut self, data: Bytes) -> Result<(), HttpError> {
        if self.finished {
            return Err(HttpError::AlreadyFinished);
        }
        (self.sink)(data);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), HttpError> {
        if self.finished {
            return Err(HttpError::AlreadyFinished);
        }
        self.finished = true;
        (self.on_finish)();
        Ok(())
    }

    fn cancel(&mut self) {
        self.finished = true;
    }
}
