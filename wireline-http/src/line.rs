//! Incremental CRLF line reader for HTTP heads.

use bytes::{Buf, Bytes};

use crate::error::HttpError;

const DEFAULT_LINE_LIMIT: usize = 16 * 1024;

/// Accumulates bytes across `feed` calls until a full line arrives.
/// Tolerates bare LF; the trailing CR is stripped.
pub(crate) struct LineReader {
    buf: Vec<u8>,
    limit: usize,
}

impl LineReader {
    pub(crate) fn new() -> Self {
        LineReader {
            buf: Vec::new(),
            limit: DEFAULT_LINE_LIMIT,
        }
    }

    /// Consume from `data` up to and including the next LF. `None` means
    /// the line is still incomplete.
    pub(crate) fn feed(&mut self, data: &mut Bytes) -> Result<Option<String>, HttpError> {
        while !data.is_empty() {
            let b = data[0];
            data.advance(1);
            if b == b'\n' {
                if self.buf.last() == Some(&b'\r') {
                    self.buf.pop();
                }
                let line = std::mem::take(&mut self.buf);
                return String::from_utf8(line)
                    .map(Some)
                    .map_err(|e| {
                        HttpError::InvalidHeader(String::from_utf8_lossy(e.as_bytes()).into_owned())
                    });
            }
            self.buf.push(b);
            if self.buf.len() > self.limit {
                return Err(HttpError::LineTooLong);
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_line_split_across_feeds() {
        let mut reader = LineReader::new();
        let mut part1 = Bytes::from_static(b"HTTP/1.1 20");
        let mut part2 = Bytes::from_static(b"0 OK\r\nrest");
        assert_eq!(reader.feed(&mut part1).unwrap(), None);
        assert_eq!(reader.feed(&mut part2).unwrap(), Some("HTTP/1.1 200 OK".to_string()));
        assert_eq!(part2.as_ref(), b"rest");
    }

    #[test]
    fn tolerates_bare_lf() {
        let mut reader = LineReader::new();
        let mut data = Bytes::from_static(b"hello\nworld\r\n");
        assert_eq!(reader.feed(&mut data).unwrap(), Some("hello".to_string()));
        assert_eq!(reader.feed(&mut data).unwrap(), Some("world".to_string()));
    }

    #[test]
    fn overlong_line_is_an_error() {
        let mut reader = LineReader::new();
        let mut data = Bytes::from(vec![b'a'; DEFAULT_LINE_LIMIT + 2]);
        assert!(matches!(reader.feed(&mut data), Err(HttpError::LineTooLong)));
    }
}
