//! Streaming HTTP/1.x on top of [`wireline`] connectors.
//!
//! Everything is callback-driven and single-reactor: requests and responses
//! stream through [`ContentSender`]/[`ContentReceiver`] stacks that add or
//! strip `Content-Length`, chunked and gzip framing incrementally, without
//! buffering whole bodies.
//!
//! [`HttpClient`] keeps a reuse pool of keep-alive connections (plain or
//! TLS) and can follow redirects transparently; [`HttpListening`] turns a
//! `TcpSocketServer` into an HTTP server with per-connection handlers.

pub mod chunked;
pub mod client;
pub mod content;
pub mod content_length;
pub mod error;
pub mod gzip;
pub mod headers;
mod line;
pub mod model;
mod redirect;
pub mod server;

pub use client::{ClientConfig, HttpClient, HttpReceiver, HttpRequestBuilder, RequestSender};
pub use content::{ContentReceiver, ContentSender, ReceiveState};
pub use error::HttpError;
pub use headers::Headers;
pub use model::{HttpMethod, HttpRequest, HttpResponse, HttpVersion};
pub use server::{
    HttpHandler, HttpListening, HttpListeningHandler, Responder, ResponseSender,
};

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the data from a poisoned lock. Callback
/// panics are isolated upstream; the state itself stays usable.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
