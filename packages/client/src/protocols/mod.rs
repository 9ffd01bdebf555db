//! Pluggable per-channel protocol handlers
//!
//! A channel picks its [`ProtocolHandler`] once, when the transport
//! reports the ALPN-negotiated application protocol. Only the HTTP/1.1
//! handler is implemented; the seam exists so an alternate multiplexing
//! protocol can slot in without touching the channel state machine.

pub mod h1;
mod handler;

pub use h1::Http1Handler;
pub use handler::{select_handler, AlpnProtocol, ProtocolHandler};
