//! HTTP codec and client/server errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    /// Transport-level failure from the underlying connector.
    #[error(transparent)]
    Transport(#[from] wireline::Error),

    #[error("invalid status line: {0}")]
    InvalidStatusLine(String),

    #[error("invalid request line: {0}")]
    InvalidRequestLine(String),

    #[error("unsupported version: {0}")]
    UnsupportedVersion(String),

    #[error("invalid method: {0}")]
    InvalidMethod(String),

    #[error("invalid header line: {0}")]
    InvalidHeader(String),

    #[error("head line exceeds the length limit")]
    LineTooLong,

    #[error("invalid Content-Length: {0}")]
    InvalidContentLength(String),

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("invalid chunk footer")]
    InvalidChunkFooter,

    #[error("invalid gzip magic number")]
    BadGzipMagic,

    #[error("invalid gzip method")]
    BadGzipMethod,

    #[error("gzip crc mismatch")]
    CrcMismatch,

    #[error("gzip length mismatch")]
    LengthMismatch,

    #[error("could not inflate: {0}")]
    Inflate(String),

    #[error("could not deflate: {0}")]
    Deflate(String),

    /// Connection ended before the framing said the content was complete.
    #[error("connection closed before content ended")]
    PrematureClose,

    /// `send` after `finish`, or similar misuse of a content sender.
    #[error("content already finished")]
    AlreadyFinished,

    /// Request body present but neither `Content-Length` nor chunked
    /// framing declared.
    #[error("request body requires Content-Length or chunked framing")]
    MissingBodyFraming,

    /// An https request was made without a TLS client configuration.
    #[error("no tls client configuration")]
    MissingTlsConfig,

    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    #[error("request canceled")]
    Canceled,
}
