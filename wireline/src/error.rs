//! Error types reported through the `failed` callback slot.

use std::io;

use thiserror::Error;

use crate::address::Address;

#[derive(Debug, Error)]
pub enum Error {
    /// Underlying socket operation failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Name resolution produced no usable socket address.
    #[error("could not resolve {0}")]
    Resolution(Address),

    /// Operation on a connector that was already closed.
    #[error("connector closed")]
    Closed,

    /// `connect` was called a second time on a single-shot connector.
    #[error("already connected")]
    AlreadyConnected,

    /// TLS engine rejected the session or a record.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(&'static str),
}
