//! Plain TCP transport
//!
//! Nonblocking `std::net::TcpStream` configured through `socket2`
//! (nodelay, keepalive). Connect completion is detected by polling the
//! socket rather than a reactor; the engine's drive loop sets the cadence.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Instant;

use bytes::{Buf, BytesMut};
use socket2::{Domain, Protocol, Socket, Type};

use crate::config::NetworkConfig;
use crate::error;

use super::{ConnectTarget, Transport, TransportEvent, TransportFactory, TransportState};

const DEFAULT_READ_CAP: usize = 64 * 1024;

/// Nonblocking TCP transport.
pub struct TcpTransport {
    stream: Option<TcpStream>,
    state: TransportState,
    addr: SocketAddr,
    connect_started: Instant,
    connect_timeout: std::time::Duration,
    recv: BytesMut,
    send: BytesMut,
    read_cap: usize,
    eof: bool,
}

impl TcpTransport {
    fn start_connect(target: &ConnectTarget, network: &NetworkConfig, timeout: std::time::Duration) -> Self {
        let addr = target.addr;
        let stream = match Self::open_socket(addr, network) {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::debug!(%addr, error = %e, "tcp connect failed to start");
                None
            }
        };
        Self {
            // Even a failed socket open starts in Connecting; the first
            // poll reports the failure as an event.
            state: TransportState::Connecting,
            stream,
            addr,
            connect_started: Instant::now(),
            connect_timeout: timeout,
            recv: BytesMut::new(),
            send: BytesMut::new(),
            read_cap: DEFAULT_READ_CAP,
            eof: false,
        }
    }

    fn open_socket(addr: SocketAddr, network: &NetworkConfig) -> io::Result<TcpStream> {
        let domain = if addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        socket.set_tcp_nodelay(network.nodelay)?;
        if let Some(interval) = network.keepalive {
            let keepalive = socket2::TcpKeepalive::new().with_time(interval);
            socket.set_tcp_keepalive(&keepalive)?;
        }
        match socket.connect(&addr.into()) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc_einprogress()) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }
        Ok(socket.into())
    }

    fn poll_connecting(&mut self, events: &mut Vec<TransportEvent>) {
        let Some(stream) = self.stream.as_ref() else {
            self.state = TransportState::Unconnected;
            events.push(TransportEvent::Failed(error::connect_failed(
                io::Error::new(io::ErrorKind::Other, "socket creation failed"),
            )));
            return;
        };

        if let Ok(Some(e)) | Err(e) = stream.take_error() {
            self.state = TransportState::Unconnected;
            self.stream = None;
            let failure = if e.kind() == io::ErrorKind::ConnectionRefused {
                error::connection_refused()
            } else {
                error::connect_failed(e)
            };
            events.push(TransportEvent::Failed(failure));
            return;
        }

        // peer_addr succeeds once the three-way handshake completed.
        match stream.peer_addr() {
            Ok(_) => {
                self.state = TransportState::Connected;
                events.push(TransportEvent::Connected);
            }
            Err(e)
                if e.kind() == io::ErrorKind::NotConnected
                    || e.raw_os_error() == Some(libc_einprogress()) =>
            {
                if self.connect_started.elapsed() >= self.connect_timeout {
                    self.state = TransportState::Unconnected;
                    self.stream = None;
                    events.push(TransportEvent::Failed(error::timeout()));
                }
            }
            Err(e) => {
                self.state = TransportState::Unconnected;
                self.stream = None;
                events.push(TransportEvent::Failed(error::connect_failed(e)));
            }
        }
    }

    fn flush_send(&mut self, events: &mut Vec<TransportEvent>) {
        let mut written = 0usize;
        let mut io_error = None;
        {
            let Some(stream) = self.stream.as_mut() else {
                return;
            };
            while !self.send.is_empty() {
                match stream.write(&self.send) {
                    Ok(0) => break,
                    Ok(n) => {
                        self.send.advance(n);
                        written += n;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        io_error = Some(e);
                        break;
                    }
                }
            }
        }
        if written > 0 {
            events.push(TransportEvent::BytesWritten(written));
        }
        if let Some(e) = io_error {
            self.fail(events, e);
        }
    }

    fn fill_recv(&mut self, events: &mut Vec<TransportEvent>) {
        let mut buf = [0u8; 8 * 1024];
        let mut got_data = false;
        let mut io_error = None;
        {
            let Some(stream) = self.stream.as_mut() else {
                return;
            };
            while self.recv.len() < self.read_cap {
                match stream.read(&mut buf) {
                    Ok(0) => {
                        self.eof = true;
                        break;
                    }
                    Ok(n) => {
                        self.recv.extend_from_slice(&buf[..n]);
                        got_data = true;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        io_error = Some(e);
                        break;
                    }
                }
            }
        }
        // Leftover bytes the engine has not drained yet keep signaling,
        // so a capped read pass can resume on the next poll.
        if got_data || !self.recv.is_empty() {
            events.push(TransportEvent::Readable);
        }
        if let Some(e) = io_error {
            self.fail(events, e);
            return;
        }
        if self.eof {
            self.state = TransportState::Closing;
            self.stream = None;
            events.push(TransportEvent::Disconnected);
        }
    }

    fn fail(&mut self, events: &mut Vec<TransportEvent>, e: io::Error) {
        self.state = TransportState::Unconnected;
        self.stream = None;
        let failure = match e.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionAborted => error::remote_closed(),
            io::ErrorKind::TimedOut => error::timeout(),
            _ => error::connect_failed(e),
        };
        events.push(TransportEvent::Failed(failure));
    }
}

fn libc_einprogress() -> i32 {
    115 // EINPROGRESS on Linux; harmless mismatch elsewhere
}

impl Transport for TcpTransport {
    fn state(&self) -> TransportState {
        self.state
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        match self.state {
            TransportState::Connecting => {
                self.poll_connecting(&mut events);
                if self.state == TransportState::Connected {
                    self.flush_send(&mut events);
                }
            }
            TransportState::Connected => {
                self.flush_send(&mut events);
                if self.state == TransportState::Connected {
                    self.fill_recv(&mut events);
                }
            }
            TransportState::Unconnected | TransportState::Closing => {}
        }
        events
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.recv.is_empty() {
            if self.eof {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(self.recv.len());
        buf[..n].copy_from_slice(&self.recv[..n]);
        self.recv.advance(n);
        Ok(n)
    }

    fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.recv.len());
        buf[..n].copy_from_slice(&self.recv[..n]);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.state != TransportState::Connected && self.state != TransportState::Connecting {
            return Err(io::ErrorKind::NotConnected.into());
        }
        self.send.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn bytes_available(&self) -> usize {
        self.recv.len()
    }

    fn bytes_to_write(&self) -> usize {
        self.send.len()
    }

    fn set_read_buffer_cap(&mut self, cap: usize) {
        self.read_cap = cap.max(1);
    }

    fn close(&mut self) {
        self.stream = None;
        self.state = TransportState::Unconnected;
        self.send.clear();
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        match self.state {
            TransportState::Connected => Some(self.addr),
            _ => None,
        }
    }
}

/// Factory for plain TCP transports. TLS targets need an external
/// TLS-capable factory implementing the same trait.
#[derive(Debug, Clone)]
pub struct TcpTransportFactory {
    connect_timeout: std::time::Duration,
}

impl TcpTransportFactory {
    #[must_use]
    pub fn new(connect_timeout: std::time::Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpTransportFactory {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(30))
    }
}

impl TransportFactory for TcpTransportFactory {
    fn connect(&self, target: &ConnectTarget, network: &NetworkConfig) -> Box<dyn Transport> {
        tracing::debug!(addr = %target.addr, host = %target.host, "starting tcp connect");
        Box::new(TcpTransport::start_connect(
            target,
            network,
            self.connect_timeout,
        ))
    }
}
