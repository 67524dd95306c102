//! Ordered, case-insensitive header multimap.

use std::fmt;

/// Well-known header names, canonical casing.
pub mod name {
    pub const ACCEPT: &str = "Accept";
    pub const ACCEPT_ENCODING: &str = "Accept-Encoding";
    pub const CONNECTION: &str = "Connection";
    pub const CONTENT_ENCODING: &str = "Content-Encoding";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const HOST: &str = "Host";
    pub const LOCATION: &str = "Location";
    pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
    pub const USER_AGENT: &str = "User-Agent";
}

/// Well-known header values.
pub mod value {
    pub const CHUNKED: &str = "chunked";
    pub const CLOSE: &str = "close";
    pub const GZIP: &str = "gzip";
    pub const KEEP_ALIVE: &str = "keep-alive";
}

const CANONICAL: &[&str] = &[
    name::ACCEPT,
    name::ACCEPT_ENCODING,
    name::CONNECTION,
    name::CONTENT_ENCODING,
    name::CONTENT_LENGTH,
    "Content-Type",
    name::HOST,
    name::LOCATION,
    name::TRANSFER_ENCODING,
    name::USER_AGENT,
];

/// Insertion-ordered multimap; lookups are case-insensitive, well-known
/// names are stored with canonical casing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Headers::default()
    }

    pub fn add(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .push((sanitize(key.as_ref()), value.into()));
    }

    pub fn first(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.first(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn sanitize(key: &str) -> String {
    for canonical in CANONICAL {
        if canonical.eq_ignore_ascii_case(key) {
            return (*canonical).to_string();
        }
    }
    key.to_string()
}

/// `Content-Length` if present; an unparseable value is an error.
pub(crate) fn content_length_of(
    headers: &Headers,
) -> Result<Option<u64>, crate::error::HttpError> {
    match headers.first(name::CONTENT_LENGTH) {
        None => Ok(None),
        Some(v) => v
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| crate::error::HttpError::InvalidContentLength(v.to_string())),
    }
}

pub(crate) fn is_chunked(headers: &Headers) -> bool {
    headers
        .all(name::TRANSFER_ENCODING)
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case(value::CHUNKED))
}

pub(crate) fn is_gzip(headers: &Headers) -> bool {
    headers
        .all(name::CONTENT_ENCODING)
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case(value::GZIP))
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in self.iter() {
            writeln!(f, "{k}: {v}")?;
        }
        Ok(())
    }
}
