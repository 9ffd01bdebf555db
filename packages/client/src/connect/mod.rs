//! Transport seam
//!
//! A [`Transport`] is one byte pipe: TCP, or TLS-over-TCP supplied by an
//! external factory. The engine never blocks on it; each drive pass calls
//! [`Transport::poll`] and reacts to the events it reports. TLS internals
//! stay outside the engine: the trait only exposes "is encrypted" and the
//! ALPN-negotiated protocol token.

pub mod tcp;

use std::io;
use std::net::SocketAddr;

pub use tcp::{TcpTransport, TcpTransportFactory};

use crate::config::NetworkConfig;
use crate::error::Error;

/// Lifecycle of one transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Unconnected,
    Connecting,
    Connected,
    Closing,
}

/// Readiness notifications surfaced by one poll pass.
#[derive(Debug)]
pub enum TransportEvent {
    /// Connect (and handshake, when encrypted) completed.
    Connected,
    /// Received bytes are buffered and readable.
    Readable,
    /// Buffered outbound bytes were accepted by the socket.
    BytesWritten(usize),
    /// Orderly remote close; buffered received bytes remain readable.
    Disconnected,
    /// Transport fault; the transport is unusable afterwards.
    Failed(Error),
}

/// Where a channel should connect.
#[derive(Debug, Clone)]
pub struct ConnectTarget {
    pub addr: SocketAddr,
    /// Host name for TLS SNI; kept even for plain transports.
    pub host: String,
    pub tls: bool,
}

/// One physical connection.
pub trait Transport {
    fn state(&self) -> TransportState;

    /// Drive the transport: progress the connect, flush pending writes,
    /// pull received bytes into the internal buffer. Returns every event
    /// since the last poll.
    fn poll(&mut self) -> Vec<TransportEvent>;

    /// Drain up to `buf.len()` buffered received bytes. `Ok(0)` only at
    /// EOF; starvation is `ErrorKind::WouldBlock`.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Look at buffered received bytes without consuming them.
    fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Queue bytes for writing; always accepts the full slice, flushing
    /// opportunistically. Returns the number of bytes newly queued.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Received bytes currently buffered.
    fn bytes_available(&self) -> usize;

    /// Outbound bytes accepted by `write` but not yet on the wire.
    fn bytes_to_write(&self) -> usize;

    /// Cap on how many received bytes one poll pass may buffer.
    fn set_read_buffer_cap(&mut self, cap: usize);

    fn close(&mut self);

    /// Address family actually in use, once connected.
    fn peer_addr(&self) -> Option<SocketAddr>;

    fn is_encrypted(&self) -> bool {
        false
    }

    /// ALPN token negotiated during the handshake, when encrypted.
    fn negotiated_protocol(&self) -> Option<&str> {
        None
    }
}

/// Creates transports; the engine asks for one per channel connect
/// attempt. A TLS-capable factory wraps the handshake behind the same
/// trait.
pub trait TransportFactory {
    fn connect(&self, target: &ConnectTarget, network: &NetworkConfig) -> Box<dyn Transport>;

    /// Whether `tls: true` targets can be honored.
    fn supports_tls(&self) -> bool {
        false
    }
}
