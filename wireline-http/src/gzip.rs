//! Gzip (RFC 1952) content coding over raw deflate.

use bytes::{Buf, Bytes};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::content::{ContentReceiver, ContentSender, ReceiveState};
use crate::error::HttpError;

pub(crate) const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

const MAGIC: [u8; 2] = [0x1f, 0x8b];
const METHOD_DEFLATE: u8 = 8;

const FHCRC: u8 = 2;
const FEXTRA: u8 = 4;
const FNAME: u8 = 8;
const FCOMMENT: u8 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Header,
    ExtraLength,
    Extra,
    Name,
    Comment,
    HeaderCrc,
    Body,
    Trailer,
}

/// Streaming gzip decoder.
///
/// Parses the full header (skipping FEXTRA/FNAME/FCOMMENT/FHCRC fields),
/// inflates the member, and validates the CRC32 + ISIZE trailer. Stream end
/// comes from the inflater itself, so the trailer is always checked; a
/// mismatch is an error, not a silent pass.
pub struct GzipReader {
    inner: Box<dyn ContentReceiver>,
    inflate: Decompress,
    crc: flate2::Crc,
    stage: Stage,
    flags: u8,
    header: Vec<u8>,
    extra_length: Vec<u8>,
    extra_remaining: usize,
    header_crc_remaining: usize,
    trailer: Vec<u8>,
    buffer_size: usize,
    done: bool,
}

impl GzipReader {
    pub fn new(inner: Box<dyn ContentReceiver>) -> Self {
        GzipReader::with_buffer_size(inner, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(inner: Box<dyn ContentReceiver>, buffer_size: usize) -> Self {
        GzipReader {
            inner,
            inflate: Decompress::new(false),
            crc: flate2::Crc::new(),
            stage: Stage::Header,
            flags: 0,
            header: Vec::with_capacity(10),
            extra_length: Vec::with_capacity(2),
            extra_remaining: 0,
            header_crc_remaining: 2,
            trailer: Vec::with_capacity(8),
            buffer_size,
            done: false,
        }
    }

    fn stage_after(&self, stage: Stage) -> Stage {
        match stage {
            Stage::Header if self.flags & FEXTRA != 0 => Stage::ExtraLength,
            Stage::Header | Stage::Extra if self.flags & FNAME != 0 => Stage::Name,
            Stage::Header | Stage::Extra | Stage::Name if self.flags & FCOMMENT != 0 => {
                Stage::Comment
            }
            Stage::Header | Stage::Extra | Stage::Name | Stage::Comment
                if self.flags & FHCRC != 0 =>
            {
                Stage::HeaderCrc
            }
            Stage::ExtraLength => Stage::Extra,
            _ => Stage::Body,
        }
    }
}

impl ContentReceiver for GzipReader {
    fn received(&mut self, data: &mut Bytes) -> Result<ReceiveState, HttpError> {
        loop {
            match self.stage {
                Stage::Header => {
                    while self.header.len() < 10 {
                        if data.is_empty() {
                            return Ok(ReceiveState::Continue);
                        }
                        self.header.push(data[0]);
                        data.advance(1);
                    }
                    if self.header[0..2] != MAGIC {
                        return Err(HttpError::BadGzipMagic);
                    }
                    if self.header[2] != METHOD_DEFLATE {
                        return Err(HttpError::BadGzipMethod);
                    }
                    self.flags = self.header[3];
                    // mtime, xfl and os bytes carry no framing information
                    self.stage = self.stage_after(Stage::Header);
                }
                Stage::ExtraLength => {
                    while self.extra_length.len() < 2 {
                        if data.is_empty() {
                            return Ok(ReceiveState::Continue);
                        }
                        self.extra_length.push(data[0]);
                        data.advance(1);
                    }
                    self.extra_remaining =
                        u16::from_le_bytes([self.extra_length[0], self.extra_length[1]]) as usize;
                    self.stage = self.stage_after(Stage::ExtraLength);
                }
                Stage::Extra => {
                    let skip = self.extra_remaining.min(data.len());
                    data.advance(skip);
                    self.extra_remaining -= skip;
                    if self.extra_remaining > 0 {
                        return Ok(ReceiveState::Continue);
                    }
                    self.stage = self.stage_after(Stage::Extra);
                }
                Stage::Name | Stage::Comment => {
                    loop {
                        if data.is_empty() {
                            return Ok(ReceiveState::Continue);
                        }
                        let b = data[0];
                        data.advance(1);
                        if b == 0 {
                            break;
                        }
                    }
                    self.stage = self.stage_after(self.stage);
                }
                Stage::HeaderCrc => {
                    let skip = self.header_crc_remaining.min(data.len());
                    data.advance(skip);
                    self.header_crc_remaining -= skip;
                    if self.header_crc_remaining > 0 {
                        return Ok(ReceiveState::Continue);
                    }
                    self.stage = Stage::Body;
                }
                Stage::Body => {
                    if data.is_empty() {
                        return Ok(ReceiveState::Continue);
                    }
                    let mut out = vec![0u8; self.buffer_size];
                    let before_in = self.inflate.total_in();
                    let before_out = self.inflate.total_out();
                    let status = self
                        .inflate
                        .decompress(data.as_ref(), &mut out, FlushDecompress::None)
                        .map_err(|e| HttpError::Inflate(e.to_string()))?;
                    let consumed = (self.inflate.total_in() - before_in) as usize;
                    let produced = (self.inflate.total_out() - before_out) as usize;
                    data.advance(consumed);
                    if produced > 0 {
                        out.truncate(produced);
                        self.crc.update(&out);
                        let mut chunk = Bytes::from(out);
                        self.inner.received(&mut chunk)?;
                    }
                    if matches!(status, Status::StreamEnd) {
                        self.stage = Stage::Trailer;
                    } else if consumed == 0 && produced == 0 {
                        return Ok(ReceiveState::Continue);
                    }
                }
                Stage::Trailer => {
                    while self.trailer.len() < 8 {
                        if data.is_empty() {
                            return Ok(ReceiveState::Continue);
                        }
                        self.trailer.push(data[0]);
                        data.advance(1);
                    }
                    let wire_crc = u32::from_le_bytes([
                        self.trailer[0],
                        self.trailer[1],
                        self.trailer[2],
                        self.trailer[3],
                    ]);
                    let wire_size = u32::from_le_bytes([
                        self.trailer[4],
                        self.trailer[5],
                        self.trailer[6],
                        self.trailer[7],
                    ]);
                    if wire_crc != self.crc.sum() {
                        return Err(HttpError::CrcMismatch);
                    }
                    if wire_size != self.crc.amount() {
                        return Err(HttpError::LengthMismatch);
                    }
                    self.done = true;
                    self.inner.ended()?;
                    return Ok(ReceiveState::Ended);
                }
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

/// Streaming gzip encoder; header on first send, trailer on finish.
pub struct GzipWriter {
    inner: Box<dyn ContentSender>,
    deflate: Compress,
    crc: flate2::Crc,
    header_written: bool,
    finished: bool,
    buffer_size: usize,
}

impl GzipWriter {
    pub fn new(inner: Box<dyn ContentSender>) -> Self {
        GzipWriter::with_buffer_size(inner, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(inner: Box<dyn ContentSender>, buffer_size: usize) -> Self {
        GzipWriter {
            inner,
            deflate: Compress::new(Compression::default(), false),
            crc: flate2::Crc::new(),
            header_written: false,
            finished: false,
            buffer_size,
        }
    }

    fn write_header(&mut self) -> Result<(), HttpError> {
        if self.header_written {
            return Ok(());
        }
        self.header_written = true;
        // mtime zero, no extra flags, unknown os
        let header: [u8; 10] = [
            MAGIC[0],
            MAGIC[1],
            METHOD_DEFLATE,
            0,
            0,
            0,
            0,
            0,
            0,
            0xff,
        ];
        self.inner.send(Bytes::copy_from_slice(&header))
    }

    fn deflate_all(&mut self, mut input: &[u8], flush: FlushCompress) -> Result<(), HttpError> {
        loop {
            let mut out = vec![0u8; self.buffer_size];
            let before_in = self.deflate.total_in();
            let before_out = self.deflate.total_out();
            let status = self
                .deflate
                .compress(input, &mut out, flush)
                .map_err(|e| HttpError::Deflate(e.to_string()))?;
            let consumed = (self.deflate.total_in() - before_in) as usize;
            let produced = (self.deflate.total_out() - before_out) as usize;
            input = &input[consumed..];
            if produced > 0 {
                out.truncate(produced);
                self.inner.send(Bytes::from(out))?;
            }
            if matches!(status, Status::StreamEnd) {
                return Ok(());
            }
            // not finishing: done once the input is in and the output drained
            if !matches!(flush, FlushCompress::Finish)
                && input.is_empty()
                && produced < self.buffer_size
            {
                return Ok(());
            }
            if matches!(status, Status::BufError) && consumed == 0 && produced == 0 {
                return Ok(());
            }
        }
    }
}

impl ContentSender for GzipWriter {
    fn send(&mut self, data: Bytes) -> Result<(), HttpError> {
        if self.finished {
            return Err(HttpError::AlreadyFinished);
        }
        self.write_header()?;
        self.crc.update(&data);
        self.deflate_all(&data, FlushCompress::None)
    }

    fn finish(&mut self) -> Result<(), HttpError> {
        if self.finished {
            return Err(HttpError::AlreadyFinished);
        }
        self.finished = true;
        self.write_header()?;
        self.deflate_all(&[], FlushCompress::Finish)?;
        let mut trailer = Vec::with_capacity(8);
        trailer.extend_from_slice(&self.crc.sum().to_le_bytes());
        trailer.extend_from_slice(&self.crc.amount().to_le_bytes());
        self.inner.send(Bytes::from(trailer))?;
        self.inner.finish()
    }

    fn cancel(&mut self) {
        self.finished = true;
        self.inner.cancel();
    }
}
