//! HTTP/1.1 wire format
//!
//! Serialization writes `<METHOD> <request-target> HTTP/1.1` followed by
//! the header block; the request-target is absolute-form when the exchange
//! is routed through an HTTP proxy and origin-form otherwise. Parsing
//! delegates to the reply's incremental state machine.

use bytes::{BufMut, BytesMut};

use crate::error::Error;
use crate::http::reply::ParseEvent;
use crate::http::{Reply, Request};

use super::handler::ProtocolHandler;

/// The HTTP/1.1 protocol handler.
#[derive(Debug, Default)]
pub struct Http1Handler;

impl Http1Handler {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ProtocolHandler for Http1Handler {
    fn serialize_request(&self, request: &Request, absolute_form: bool, out: &mut BytesMut) {
        let target = request.request_target(absolute_form);

        out.reserve(target.len() + 64);
        out.put_slice(request.method().as_str().as_bytes());
        out.put_u8(b' ');
        out.put_slice(target.as_bytes());
        out.put_slice(b" HTTP/1.1\r\n");

        // HeaderMap iteration preserves insertion order; repeated names
        // are emitted as separate lines.
        for (name, value) in request.headers().iter() {
            out.put_slice(name.as_str().as_bytes());
            out.put_slice(b": ");
            out.put_slice(value.as_bytes());
            out.put_slice(b"\r\n");
        }

        out.put_slice(b"\r\n");
    }

    fn feed(
        &mut self,
        reply: &Reply,
        input: &mut BytesMut,
        max_read: usize,
    ) -> Result<Vec<ParseEvent>, Error> {
        reply.receive(input, max_read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderValue, Method};
    use url::Url;

    fn serialize(request: &Request, absolute: bool) -> String {
        let handler = Http1Handler::new();
        let mut out = BytesMut::new();
        handler.serialize_request(request, absolute, &mut out);
        String::from_utf8(out.to_vec()).unwrap()
    }

    #[test]
    fn origin_form_request_line() {
        let mut request = Request::get(Url::parse("http://example.com/x/y?q=1").unwrap());
        request.prepare();
        let wire = serialize(&request, false);
        assert!(wire.starts_with("GET /x/y?q=1 HTTP/1.1\r\n"));
        assert!(wire.contains("host: example.com\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[test]
    fn absolute_form_through_proxy() {
        let mut request = Request::get(Url::parse("http://example.com/x").unwrap());
        request.prepare();
        let wire = serialize(&request, true);
        assert!(wire.starts_with("GET http://example.com/x HTTP/1.1\r\n"));
    }

    #[test]
    fn headers_serialized_in_insertion_order() {
        let mut request = Request::new(Method::POST, Url::parse("http://h/").unwrap());
        request.set_header("x-first".parse().unwrap(), HeaderValue::from_static("1"));
        request.set_header("x-second".parse().unwrap(), HeaderValue::from_static("2"));
        let wire = serialize(&request, false);
        let first = wire.find("x-first").unwrap();
        let second = wire.find("x-second").unwrap();
        assert!(first < second);
    }

    #[test]
    fn blank_line_separates_header_block_from_body() {
        let request = Request::get(Url::parse("http://h/").unwrap());
        let wire = serialize(&request, false);
        assert!(wire.ends_with("\r\n\r\n"));
    }
}
