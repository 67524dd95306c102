//! `Transfer-Encoding: chunked` framing.

use bytes::Bytes;

use crate::content::{ContentReceiver, ContentSender, ReceiveState};
use crate::error::HttpError;
use crate::line::LineReader;

/// Decodes chunked framing and passes chunk payloads through. Chunk
/// extensions after `;` are tolerated and ignored. Ends on the zero-size
/// chunk, leaving pipelined surplus in the caller's buffer.
pub struct ChunkedReader {
    inner: Box<dyn ContentReceiver>,
    line: LineReader,
    header_read: bool,
    chunk_length: u64,
    chunk_read: u64,
    done: bool,
}

impl ChunkedReader {
    pub fn new(inner: Box<dyn ContentReceiver>) -> Self {
        ChunkedReader {
            inner,
            line: LineReader::new(),
            header_read: false,
            chunk_length: 0,
            chunk_read: 0,
            done: false,
        }
    }
}

impl ContentReceiver for ChunkedReader {
    fn received(&mut self, data: &mut Bytes) -> Result<ReceiveState, HttpError> {
        loop {
            if self.done {
                return Ok(ReceiveState::Ended);
            }
            if !self.header_read {
                let Some(line) = self.line.feed(data)? else {
                    return Ok(ReceiveState::Continue);
                };
                let size = line.split(';').next().unwrap_or("").trim();
                self.chunk_length = u64::from_str_radix(size, 16)
                    .map_err(|_| HttpError::InvalidChunkSize(line.clone()))?;
                self.chunk_read = 0;
                self.header_read = true;
            }
            if self.chunk_read < self.chunk_length {
                if data.is_empty() {
                    return Ok(ReceiveState::Continue);
                }
                let take = ((self.chunk_length - self.chunk_read).min(data.len() as u64)) as usize;
                let mut chunk = data.split_to(take);
                self.chunk_read += take as u64;
                self.inner.received(&mut chunk)?;
                continue;
            }
            // chunk payload done, expect the empty footer line
            let Some(footer) = self.line.feed(data)? else {
                return Ok(ReceiveState::Continue);
            };
            if !footer.is_empty() {
                return Err(HttpError::InvalidChunkFooter);
            }
            let last = self.chunk_length == 0;
            self.header_read = false;
            if last {
                self.done = true;
                self.inner.ended()?;
                return Ok(ReceiveState::Ended);
            }
        }
    }

    fn ended(&mut self) -> Result<(), HttpError> {
        if self.done {
            return Ok(());
        }
        Err(HttpError::PrematureClose)
    }
}

/// Emits `<hex-size>CRLF payload CRLF` per send and the `0CRLF CRLF`
/// terminator on finish. Empty sends emit nothing, the zero chunk is
/// reserved for the terminator.
pub struct ChunkedWriter {
    inner: Box<dyn ContentSender>,
    finished: bool,
}

impl ChunkedWriter {
    pub fn new(inner: Box<dyn ContentSender>) -> Self {
        ChunkedWriter {
            inner,
            finished: false,
        }
    }
}

impl ContentSender for ChunkedWriter {
    fn send(&mut self, data: Bytes) -> Result<(), HttpError> {
        if self.finished {
            return Err(HttpError::AlreadyFinished);
        }
        if data.is_empty() {
            return Ok(());
        }
        self.inner
            .send(Bytes::from(format!("{:x}\r\n", data.len())))?;
        self.inner.send(data)?;
        self.inner.send(Bytes::from_static(b"\r\n"))
    }

    fn finish(&mut self) -> Result<(), HttpError> {
        if self.finished {
            return Err(HttpError::AlreadyFinished);
        }
        self.finished = true;
        self.inner.send(Bytes::from_static(b"0\r\n\r\n"))?;
        self.inner.finish()
    }

    fn cancel(&mut self) {
        self.finished = true;
        self.inner.cancel();
    }
}
