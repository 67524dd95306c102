//! Transparent redirect following.

use wireline::Address;

use crate::client::{HttpClient, HttpReceiver};
use crate::content::{ContentReceiver, DrainReceiver};
use crate::error::HttpError;
use crate::headers::name;
use crate::model::{HttpRequest, HttpResponse, DEFAULT_PORT, DEFAULT_SECURE_PORT};

/// Wraps the caller's receiver; 3xx responses with a usable `Location` and
/// remaining budget re-issue the request and drain the intermediate body,
/// so only the terminal response reaches the caller.
pub(crate) struct RedirectFollower {
    client: HttpClient,
    budget: usize,
    request: HttpRequest,
    user: Option<Box<dyn HttpReceiver>>,
}

impl RedirectFollower {
    pub(crate) fn new(
        client: HttpClient,
        budget: usize,
        request: HttpRequest,
        user: Box<dyn HttpReceiver>,
    ) -> Self {
        RedirectFollower {
            client,
            budget,
            request,
            user: Some(user),
        }
    }
}

impl HttpReceiver for RedirectFollower {
    fn received(&mut self, response: HttpResponse) -> Box<dyn ContentReceiver> {
        if self.budget > 0 && (300..400).contains(&response.status) {
            if let Some(location) = response.headers.first(name::LOCATION) {
                if let Some(next) = resolve_location(&self.request, location) {
                    if let Some(user) = self.user.take() {
                        tracing::debug!(
                            status = response.status,
                            to = %next.address,
                            path = %next.path,
                            "following redirect"
                        );
                        self.client
                            .request()
                            .receiving(user)
                            .max_redirections(self.budget - 1)
                            .build(next)
                            .finish();
                        return Box::new(DrainReceiver);
                    }
                }
            }
        }
        match self.user.as_mut() {
            Some(user) => user.received(response),
            None => Box::new(DrainReceiver),
        }
    }

    fn failed(&mut self, error: HttpError) {
        if let Some(user) = self.user.as_mut() {
            user.failed(error);
        }
    }
}

/// Absolute http/https targets switch address and scheme; targets starting
/// with `/` keep the connection's address; other relative targets resolve
/// against the directory of the current path. Unusable targets return
/// `None` and the response is relayed as-is.
fn resolve_location(request: &HttpRequest, location: &str) -> Option<HttpRequest> {
    let (secure, rest) = if let Some(rest) = location.strip_prefix("http://") {
        (false, rest)
    } else if let Some(rest) = location.strip_prefix("https://") {
        (true, rest)
    } else {
        let path = if location.starts_with('/') {
            location.to_string()
        } else {
            let base = request
                .path
                .rsplit_once('/')
                .map(|(dir, _)| dir)
                .unwrap_or("");
            format!("{base}/{location}")
        };
        let mut next = request.clone();
        next.path = path;
        next.headers = crate::headers::Headers::new();
        return Some(next);
    };
    let (host_port, path) = match rest.find('/') {
        Some(at) => (&rest[..at], rest[at..].to_string()),
        None => (rest, "/".to_string()),
    };
    if host_port.is_empty() {
        return None;
    }
    let (host, port) = match host_port.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().ok()?),
        None => (
            host_port,
            if secure { DEFAULT_SECURE_PORT } else { DEFAULT_PORT },
        ),
    };
    Some(HttpRequest::new(
        Address::new(host, port),
        secure,
        request.method,
        path,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> HttpRequest {
        HttpRequest::get(Address::new("a.example", 8080), "/dir/page")
    }

    #[test]
    fn absolute_target_switches_address() {
        let next = resolve_location(&base(), "http://b.example:9090/other").unwrap();
        assert_eq!(next.address, Address::new("b.example", 9090));
        assert!(!next.secure);
        assert_eq!(next.path, "/other");
    }

    #[test]
    fn https_target_switches_scheme_and_default_port() {
        let next = resolve_location(&base(), "https://secure.example/x").unwrap();
        assert_eq!(next.address, Address::new("secure.example", 443));
        assert!(next.secure);
    }

    #[test]
    fn rooted_target_keeps_address() {
        let next = resolve_location(&base(), "/new").unwrap();
        assert_eq!(next.address, Address::new("a.example", 8080));
        assert_eq!(next.path, "/new");
    }

    #[test]
    fn relative_target_resolves_against_directory() {
        let next = resolve_location(&base(), "sibling").unwrap();
        assert_eq!(next.path, "/dir/sibling");
    }

    #[test]
    fn host_without_path_gets_root() {
        let next = resolve_location(&base(), "http://c.example").unwrap();
        assert_eq!(next.path, "/");
        assert_eq!(next.address, Address::new("c.example", 80));
    }

    #[test]
    fn empty_host_is_unusable() {
        assert!(resolve_location(&base(), "http://").is_none());
    }
}
