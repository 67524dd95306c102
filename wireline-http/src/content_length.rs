//! `Content-Length` framing.

use bytes::Bytes;

use crate::content::{ContentReceiver, ContentSender, ReceiveState};
use crate::error::HttpError;

/// Passes exactly `length` bytes through, then ends the inner receiver and
/// leaves any surplus in the caller's buffer.
pub struct ContentLengthReader {
    remaining: u64,
    inner: Box<dyn ContentReceiver>,
    done: bool,
}

impl ContentLengthReader {
    pub fn new(length: u64, inner: Box<dyn ContentReceiver>) -> Self {
        ContentLengthReader {
            remaining: length,
            inner,
            done: false,
        }
    }
}

impl ContentReceiver for ContentLengthReader {
    fn received(&mut self, data: &mut Bytes) -> Result<ReceiveState, HttpError> {
        if self.done {
            return Ok(ReceiveState::Ended);
        }
        let take = (self.remaining.min(data.len() as u64)) as usize;
        if take > 0 {
            let mut chunk = data.split_to(take);
            self.remaining -= take as u64;
            self.inner.received(&mut chunk)?;
        }
        if self.remaining == 0 {
            self.done = true;
            self.inner.ended()?;
            return Ok(ReceiveState::Ended);
        }
        Ok(ReceiveState::Continue)
    }

    fn ended(&mut self) -> Result<(), HttpError> {
        if self.done {
            return Ok(());
        }
        Err(HttpError::PrematureClose)
    }
}

/// Truncates outgoing content at the declared length; `finish` before the
/// declared length is the caller's framing problem, detected by the peer.
pub struct ContentLengthWriter {
    remaining: u64,
    inner: Box<dyn ContentSender>,
    finished: bool,
}

impl ContentLengthWriter {
    pub fn new(length: u64, inner: Box<dyn ContentSender>) -> Self {
        ContentLengthWriter {
            remaining: length,
            inner,
            finished: false,
        }
    }
}

impl ContentSender for ContentLengthWriter {
    fn send(&mut self, mut data: Bytes) -> Result<(), HttpError> {
        if self.finished {
            return Err(HttpError::AlreadyFinished);
        }
        if data.len() as u64 > self.remaining {
            data.truncate(self.remaining as usize);
        }
        if data.is_empty() {
            return Ok(());
        }
        self.remaining -= data.len() as u64;
        self.inner.send(data)
    }

    fn finish(&mut self) -> Result<(), HttpError> {
        if self.finished {
            return Err(HttpError::AlreadyFinished);
        }
        self.finished = true;
        self.inner.finish()
    }

    fn cancel(&mut self) {
        self.finished = true;
        self.inner.cancel();
    }
}
