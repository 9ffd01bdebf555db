use bytes::BytesMut;

use crate::error::Error;
use crate::http::reply::ParseEvent;
use crate::http::{Reply, Request};

/// Application protocol negotiated during the TLS handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlpnProtocol {
    #[default]
    Http11,
    /// Legacy alternate protocol token; recognized but not implemented.
    Spdy,
}

impl AlpnProtocol {
    #[must_use]
    pub fn from_token(token: &str) -> Self {
        match token {
            "spdy/3" | "spdy/3.1" => AlpnProtocol::Spdy,
            _ => AlpnProtocol::Http11,
        }
    }
}

/// Per-channel strategy: how to put a request on the wire and how to feed
/// received bytes into the current reply.
pub trait ProtocolHandler {
    /// Append the request line and header block to the outbound buffer.
    /// The body, if any, is streamed separately by the channel.
    fn serialize_request(&self, request: &Request, absolute_form: bool, out: &mut BytesMut);

    /// Feed readable bytes to `reply`, consuming only what belongs to it.
    fn feed(
        &mut self,
        reply: &Reply,
        input: &mut BytesMut,
        max_read: usize,
    ) -> Result<Vec<ParseEvent>, Error>;
}

/// Pick the handler for a negotiated protocol. Unrecognized or alternate
/// tokens fall back to HTTP/1.1, the only wire format implemented here.
#[must_use]
pub fn select_handler(negotiated: Option<&str>) -> Box<dyn ProtocolHandler> {
    match negotiated.map(AlpnProtocol::from_token) {
        Some(AlpnProtocol::Spdy) => {
            tracing::warn!("alternate protocol negotiated but not supported, using HTTP/1.1");
            Box::new(super::Http1Handler::new())
        }
        _ => Box::new(super::Http1Handler::new()),
    }
}
