//! Fluent request builder
//!
//! Collects method, URL, headers, body, and dispatch flags, then hands a
//! finished [`Request`] to a [`Connection`]. URL parse failures are held
//! until [`RequestBuilder::send`] so chaining stays infallible.

use bytes::Bytes;
use http::{HeaderName, HeaderValue, Method};
use url::Url;

use tether_client::{BytesSource, Connection, Priority, Reply, Request};

/// Builder for one request.
pub struct RequestBuilder {
    method: Method,
    url: Result<Url, url::ParseError>,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Option<Bytes>,
    priority: Priority,
    pipelining_allowed: bool,
    with_credentials: bool,
    auto_decompress: bool,
}

impl RequestBuilder {
    #[must_use]
    pub fn new(method: Method, url: &str) -> Self {
        Self {
            method,
            url: Url::parse(url),
            headers: Vec::new(),
            body: None,
            priority: Priority::Normal,
            pipelining_allowed: true,
            with_credentials: true,
            auto_decompress: true,
        }
    }

    /// Add a header; invalid names or values are silently dropped, in
    /// keeping with the infallible chain.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            HeaderValue::from_str(value),
        ) {
            self.headers.push((name, value));
        }
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn high_priority(self) -> Self {
        self.priority(Priority::High)
    }

    #[must_use]
    pub fn low_priority(self) -> Self {
        self.priority(Priority::Low)
    }

    /// Opt this request out of pipelining.
    #[must_use]
    pub fn no_pipelining(mut self) -> Self {
        self.pipelining_allowed = false;
        self
    }

    /// Fail 401/407 challenges immediately instead of prompting.
    #[must_use]
    pub fn without_credentials(mut self) -> Self {
        self.with_credentials = false;
        self
    }

    /// Deliver the body exactly as the server sent it.
    #[must_use]
    pub fn no_decompress(mut self) -> Self {
        self.auto_decompress = false;
        self
    }

    /// Build the engine-level [`Request`].
    pub fn build(self) -> Result<Request, url::ParseError> {
        let url = self.url?;
        let mut request = Request::new(self.method, url);
        request.set_priority(self.priority);
        request.set_pipelining_allowed(self.pipelining_allowed);
        request.set_with_credentials(self.with_credentials);
        request.set_auto_decompress(self.auto_decompress);
        for (name, value) in self.headers {
            request.append_header(name, value);
        }
        if let Some(body) = self.body {
            request.set_body(Box::new(BytesSource::new(body)));
        }
        Ok(request)
    }

    /// Build and enqueue on `connection`.
    pub fn send(self, connection: &Connection) -> Result<Reply, url::ParseError> {
        Ok(connection.send_request(self.build()?))
    }
}
