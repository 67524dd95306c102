//! Request/response model types.

use std::fmt;
use std::str::FromStr;

use wireline::Address;

use crate::error::HttpError;
use crate::headers::Headers;

pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_SECURE_PORT: u16 = 443;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
    Trace,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Trace => "TRACE",
        }
    }
}

impl FromStr for HttpMethod {
    type Err = HttpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(HttpMethod::Get),
            "HEAD" => Ok(HttpMethod::Head),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "OPTIONS" => Ok(HttpMethod::Options),
            "PATCH" => Ok(HttpMethod::Patch),
            "TRACE" => Ok(HttpMethod::Trace),
            other => Err(HttpError::InvalidMethod(other.to_string())),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpVersion {
    V10,
    V11,
}

impl HttpVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::V10 => "HTTP/1.0",
            HttpVersion::V11 => "HTTP/1.1",
        }
    }

    pub(crate) fn parse(token: &str) -> Result<HttpVersion, HttpError> {
        match token {
            "HTTP/1.0" => Ok(HttpVersion::V10),
            "HTTP/1.1" => Ok(HttpVersion::V11),
            other => Err(HttpError::UnsupportedVersion(other.to_string())),
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outgoing request (client side) or a parsed request head (server side).
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub address: Address,
    pub secure: bool,
    pub method: HttpMethod,
    pub path: String,
    pub headers: Headers,
}

impl HttpRequest {
    pub fn new(
        address: Address,
        secure: bool,
        method: HttpMethod,
        path: impl Into<String>,
    ) -> Self {
        HttpRequest {
            address,
            secure,
            method,
            path: path.into(),
            headers: Headers::new(),
        }
    }

    pub fn get(address: Address, path: impl Into<String>) -> Self {
        HttpRequest::new(address, false, HttpMethod::Get, path)
    }

    pub fn with_header(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.add(key, value);
        self
    }
}

/// A response head.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
}

impl HttpResponse {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        HttpResponse {
            status,
            reason: reason.into(),
            headers: Headers::new(),
        }
    }

    pub fn ok() -> Self {
        HttpResponse::new(200, "OK")
    }

    pub fn with_header(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.add(key, value);
        self
    }
}

/// Split a head line into its parts: `HTTP/1.1 200 OK` or `GET /p HTTP/1.1`.
pub(crate) fn split_status_line(line: &str) -> Result<(HttpVersion, u16, String), HttpError> {
    let mut parts = line.splitn(3, ' ');
    let version = parts
        .next()
        .ok_or_else(|| HttpError::InvalidStatusLine(line.to_string()))?;
    let status = parts
        .next()
        .ok_or_else(|| HttpError::InvalidStatusLine(line.to_string()))?;
    let reason = parts.next().unwrap_or("").to_string();
    let version = HttpVersion::parse(version)?;
    let status: u16 = status
        .parse()
        .map_err(|_| HttpError::InvalidStatusLine(line.to_string()))?;
    Ok((version, status, reason))
}

pub(crate) fn split_request_line(
    line: &str,
) -> Result<(HttpMethod, String, HttpVersion), HttpError> {
    let mut parts = line.split(' ');
    let (Some(method), Some(path), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(HttpError::InvalidRequestLine(line.to_string()));
    };
    Ok((method.parse()?, path.to_string(), HttpVersion::parse(version)?))
}

/// Parse one `Key: value` header line.
pub(crate) fn parse_header_line(line: &str) -> Result<(String, String), HttpError> {
    let Some((key, value)) = line.split_once(':') else {
        return Err(HttpError::InvalidHeader(line.to_string()));
    };
    Ok((key.trim().to_string(), value.trim().to_string()))
}

/// Keep-alive negotiation: HTTP/1.1 defaults on, HTTP/1.0 off, an explicit
/// `Connection` token overrides either way.
pub(crate) fn negotiate_keep_alive(version: HttpVersion, headers: &Headers) -> bool {
    let mut keep_alive = version == HttpVersion::V11;
    for header in headers.all(crate::headers::name::CONNECTION) {
        for token in header.split(',') {
            let token = token.trim();
            if token.eq_ignore_ascii_case(crate::headers::value::CLOSE) {
                keep_alive = false;
            } else if token.eq_ignore_ascii_case(crate::headers::value::KEEP_ALIVE) {
                keep_alive = true;
            }
        }
    }
    keep_alive
}
