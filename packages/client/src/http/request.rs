//! HTTP request descriptors
//!
//! A [`Request`] is immutable once enqueued except for the one-time
//! [`Request::prepare`] transform, which injects the standard headers the
//! caller left out (host, content-length, accept-encoding, user-agent,
//! connection) just before the request is first serialized.

use std::fmt;

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use url::Url;

use crate::body::ByteSource;

const DEFAULT_USER_AGENT: &str = concat!("tether/", env!("CARGO_PKG_VERSION"));

/// Dispatch priority. High fully drains before Normal or Low are touched;
/// Normal and Low share a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

/// One HTTP call to be multiplexed over a connection's channels.
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    priority: Priority,
    body: Option<Box<dyn ByteSource>>,
    pipelining_allowed: bool,
    with_credentials: bool,
    connect_only: bool,
    auto_decompress: bool,
    prepared: bool,
}

impl Request {
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            priority: Priority::Normal,
            body: None,
            pipelining_allowed: true,
            with_credentials: true,
            connect_only: false,
            auto_decompress: true,
            prepared: false,
        }
    }

    #[must_use]
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// A request that only warms a transport; its reply completes on
    /// connection establishment without writing any bytes.
    #[must_use]
    pub fn pre_connect(url: Url) -> Self {
        let mut request = Self::new(Method::GET, url);
        request.connect_only = true;
        request
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.append(name, value);
    }

    pub fn set_body(&mut self, body: Box<dyn ByteSource>) {
        self.body = Some(body);
    }

    pub fn body_mut(&mut self) -> Option<&mut (dyn ByteSource + 'static)> {
        match self.body.as_mut() {
            Some(body) => Some(body.as_mut()),
            None => None,
        }
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub fn body_size(&self) -> Option<u64> {
        self.body.as_deref().and_then(ByteSource::size)
    }

    /// Whether the caller allows this request to be pipelined at all.
    /// Eligibility is still gated on the method being GET.
    pub fn pipelining_allowed(&self) -> bool {
        self.pipelining_allowed
    }

    pub fn set_pipelining_allowed(&mut self, allowed: bool) {
        self.pipelining_allowed = allowed;
    }

    /// Whether 401/407 challenges may be surfaced to the caller; when
    /// false, challenges fail the reply immediately.
    pub fn with_credentials(&self) -> bool {
        self.with_credentials
    }

    pub fn set_with_credentials(&mut self, with_credentials: bool) {
        self.with_credentials = with_credentials;
    }

    pub fn is_connect_only(&self) -> bool {
        self.connect_only
    }

    pub fn auto_decompress(&self) -> bool {
        self.auto_decompress
    }

    pub fn set_auto_decompress(&mut self, auto_decompress: bool) {
        self.auto_decompress = auto_decompress;
    }

    /// Whether the target scheme demands an encrypted transport.
    pub fn is_ssl_required(&self) -> bool {
        self.url.scheme() == "https"
    }

    /// Only idempotent GETs ride an existing pipeline.
    pub fn is_pipeline_eligible(&self) -> bool {
        self.pipelining_allowed && self.method == Method::GET && !self.connect_only
    }

    /// `Host` header value: host name, IPv6 literals bracketed, with the
    /// port appended unless it is the scheme default.
    #[must_use]
    pub fn host_header_value(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        let bracketed = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]")
        } else {
            host.to_string()
        };
        let default = match self.url.scheme() {
            "https" => 443,
            _ => 80,
        };
        match self.url.port() {
            Some(port) if port != default => format!("{bracketed}:{port}"),
            _ => bracketed,
        }
    }

    /// Request-target in origin-form, or absolute-form when routed through
    /// an HTTP proxy.
    #[must_use]
    pub fn request_target(&self, absolute_form: bool) -> String {
        if absolute_form {
            return self.url.to_string();
        }
        let path = self.url.path();
        match self.url.query() {
            Some(query) => format!("{path}?{query}"),
            None => path.to_string(),
        }
    }

    /// One-time transform injecting the standard headers the caller left
    /// out. Repeated calls are no-ops.
    pub fn prepare(&mut self) {
        if self.prepared {
            return;
        }
        self.prepared = true;

        if !self.headers.contains_key(http::header::HOST) {
            if let Ok(value) = HeaderValue::from_str(&self.host_header_value()) {
                self.headers.insert(http::header::HOST, value);
            }
        }

        if !self.headers.contains_key(http::header::CONTENT_LENGTH) {
            if let Some(size) = self.body_size() {
                self.headers
                    .insert(http::header::CONTENT_LENGTH, HeaderValue::from(size));
            }
        }

        if self.auto_decompress && !self.headers.contains_key(http::header::ACCEPT_ENCODING) {
            self.headers.insert(
                http::header::ACCEPT_ENCODING,
                HeaderValue::from_static("gzip, deflate"),
            );
        }

        if !self.headers.contains_key(http::header::USER_AGENT) {
            self.headers.insert(
                http::header::USER_AGENT,
                HeaderValue::from_static(DEFAULT_USER_AGENT),
            );
        }

        if !self.headers.contains_key(http::header::CONNECTION) {
            self.headers.insert(
                http::header::CONNECTION,
                HeaderValue::from_static("Keep-Alive"),
            );
        }
    }

    /// Rewind the body for a resend. Trivially succeeds with no body; a
    /// non-resettable source fails.
    pub fn reset_body(&mut self) -> bool {
        match self.body.as_deref_mut() {
            Some(body) => body.reset(),
            None => true,
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("priority", &self.priority)
            .field("has_body", &self.body.is_some())
            .field("connect_only", &self.connect_only)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BytesSource;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn prepare_injects_missing_headers() {
        let mut request = Request::new(Method::POST, url("http://example.com/submit"));
        request.set_body(Box::new(BytesSource::new(&b"payload"[..])));
        request.prepare();

        assert_eq!(request.headers()["host"], "example.com");
        assert_eq!(request.headers()["content-length"], "7");
        assert_eq!(request.headers()["accept-encoding"], "gzip, deflate");
        assert_eq!(request.headers()["connection"], "Keep-Alive");
        assert!(request.headers().contains_key("user-agent"));
    }

    #[test]
    fn prepare_keeps_caller_headers() {
        let mut request = Request::get(url("http://example.com/"));
        request.set_header(
            http::header::USER_AGENT,
            HeaderValue::from_static("custom/9"),
        );
        request.prepare();
        assert_eq!(request.headers()["user-agent"], "custom/9");
    }

    #[test]
    fn host_header_includes_non_default_port() {
        let request = Request::get(url("http://example.com:8080/"));
        assert_eq!(request.host_header_value(), "example.com:8080");

        let request = Request::get(url("https://example.com:443/"));
        assert_eq!(request.host_header_value(), "example.com");
    }

    #[test]
    fn host_header_brackets_ipv6_literals() {
        let request = Request::get(url("http://[2001:db8::1]:8080/"));
        assert_eq!(request.host_header_value(), "[2001:db8::1]:8080");
    }

    #[test]
    fn request_target_forms() {
        let request = Request::get(url("http://example.com/a/b?x=1"));
        assert_eq!(request.request_target(false), "/a/b?x=1");
        assert_eq!(request.request_target(true), "http://example.com/a/b?x=1");
    }

    #[test]
    fn only_allowed_gets_are_pipeline_eligible() {
        let get = Request::get(url("http://example.com/"));
        assert!(get.is_pipeline_eligible());

        let mut opted_out = Request::get(url("http://example.com/"));
        opted_out.set_pipelining_allowed(false);
        assert!(!opted_out.is_pipeline_eligible());

        let post = Request::new(Method::POST, url("http://example.com/"));
        assert!(!post.is_pipeline_eligible());
    }
}
