//! Scripted test doubles
//!
//! [`MockTransportFactory`] hands out transports whose connects, received
//! bytes, and failures are driven by the test through [`MockHandle`]s;
//! [`ManualResolver`] answers lookups from a canned address set. Both live
//! in the crate proper so integration tests can exercise the engine
//! without sockets.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use bytes::{Buf, BytesMut};

use crate::config::NetworkConfig;
use crate::connect::{
    ConnectTarget, Transport, TransportEvent, TransportFactory, TransportState,
};
use crate::dns::{AddressFamily, ResolveHandle, ResolvedAddresses, Resolver};
use crate::error;

struct MockState {
    state: TransportState,
    target: ConnectTarget,
    pending: VecDeque<TransportEvent>,
    recv: BytesMut,
    written: Vec<u8>,
    eof: bool,
    closed_by_engine: bool,
    auto_connect: bool,
}

/// Transport double; all behavior is scripted through [`MockHandle`].
pub struct MockTransport {
    shared: Rc<RefCell<MockState>>,
}

/// Test-side handle to one created transport.
#[derive(Clone)]
pub struct MockHandle {
    shared: Rc<RefCell<MockState>>,
}

impl MockHandle {
    /// Address family this transport was asked to connect over.
    #[must_use]
    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.shared.borrow().target.addr)
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.shared.borrow().target.addr
    }

    #[must_use]
    pub fn tls_requested(&self) -> bool {
        self.shared.borrow().target.tls
    }

    /// Complete the connect on the next poll.
    pub fn connect_now(&self) {
        let mut state = self.shared.borrow_mut();
        state.state = TransportState::Connected;
        state.pending.push_back(TransportEvent::Connected);
    }

    /// Fail the connect attempt.
    pub fn refuse(&self) {
        let mut state = self.shared.borrow_mut();
        state.state = TransportState::Unconnected;
        state
            .pending
            .push_back(TransportEvent::Failed(error::connection_refused()));
    }

    /// Queue response bytes and a readability notification.
    pub fn push_response(&self, bytes: &[u8]) {
        let mut state = self.shared.borrow_mut();
        state.recv.extend_from_slice(bytes);
        state.pending.push_back(TransportEvent::Readable);
    }

    /// Orderly close from the peer.
    pub fn close_by_peer(&self) {
        let mut state = self.shared.borrow_mut();
        state.eof = true;
        state.state = TransportState::Closing;
        state.pending.push_back(TransportEvent::Disconnected);
    }

    /// Abrupt transport failure.
    pub fn fail_with_reset(&self) {
        let mut state = self.shared.borrow_mut();
        state.state = TransportState::Unconnected;
        state
            .pending
            .push_back(TransportEvent::Failed(error::remote_closed()));
    }

    /// Everything the engine has written so far.
    #[must_use]
    pub fn written(&self) -> Vec<u8> {
        self.shared.borrow().written.clone()
    }

    #[must_use]
    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.shared.borrow().written).into_owned()
    }

    pub fn clear_written(&self) {
        self.shared.borrow_mut().written.clear();
    }

    /// Whether the engine closed this transport.
    #[must_use]
    pub fn engine_closed(&self) -> bool {
        self.shared.borrow().closed_by_engine
    }

    #[must_use]
    pub fn state(&self) -> TransportState {
        self.shared.borrow().state
    }
}

impl Transport for MockTransport {
    fn state(&self) -> TransportState {
        self.shared.borrow().state
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut state = self.shared.borrow_mut();
        if state.auto_connect && state.state == TransportState::Connecting {
            state.state = TransportState::Connected;
            state.pending.push_back(TransportEvent::Connected);
        }
        let mut events: Vec<TransportEvent> = state.pending.drain(..).collect();
        // Undrained received bytes keep signaling readability, matching
        // the real transport's capped-read behavior.
        if !state.recv.is_empty()
            && state.state == TransportState::Connected
            && !events
                .iter()
                .any(|e| matches!(e, TransportEvent::Readable))
        {
            events.push(TransportEvent::Readable);
        }
        events
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.shared.borrow_mut();
        if state.recv.is_empty() {
            if state.eof {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(state.recv.len());
        buf[..n].copy_from_slice(&state.recv[..n]);
        state.recv.advance(n);
        Ok(n)
    }

    fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let state = self.shared.borrow();
        let n = buf.len().min(state.recv.len());
        buf[..n].copy_from_slice(&state.recv[..n]);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.shared.borrow_mut();
        if state.state == TransportState::Unconnected {
            return Err(io::ErrorKind::NotConnected.into());
        }
        state.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn bytes_available(&self) -> usize {
        self.shared.borrow().recv.len()
    }

    fn bytes_to_write(&self) -> usize {
        0 // writes land instantly in the capture buffer
    }

    fn set_read_buffer_cap(&mut self, _cap: usize) {}

    fn close(&mut self) {
        let mut state = self.shared.borrow_mut();
        state.closed_by_engine = true;
        state.state = TransportState::Unconnected;
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        let state = self.shared.borrow();
        match state.state {
            TransportState::Connected => Some(state.target.addr),
            _ => None,
        }
    }
}

/// Factory producing [`MockTransport`]s and retaining a handle to each.
pub struct MockTransportFactory {
    handles: Rc<RefCell<Vec<MockHandle>>>,
    auto_connect: bool,
    supports_tls: bool,
}

/// Test-side view of every transport the engine created.
#[derive(Clone)]
pub struct FactoryHandle {
    handles: Rc<RefCell<Vec<MockHandle>>>,
}

impl MockTransportFactory {
    /// Transports connect successfully on their first poll.
    #[must_use]
    pub fn auto_connecting() -> (Self, FactoryHandle) {
        Self::build(true)
    }

    /// Transports stay in `Connecting` until the test scripts an outcome.
    #[must_use]
    pub fn manual() -> (Self, FactoryHandle) {
        Self::build(false)
    }

    fn build(auto_connect: bool) -> (Self, FactoryHandle) {
        let handles = Rc::new(RefCell::new(Vec::new()));
        (
            Self {
                handles: handles.clone(),
                auto_connect,
                supports_tls: true,
            },
            FactoryHandle { handles },
        )
    }
}

impl FactoryHandle {
    #[must_use]
    pub fn created(&self) -> usize {
        self.handles.borrow().len()
    }

    #[must_use]
    pub fn handle(&self, index: usize) -> MockHandle {
        self.handles.borrow()[index].clone()
    }

    #[must_use]
    pub fn last(&self) -> MockHandle {
        self.handles.borrow().last().expect("no transports created").clone()
    }

    /// All handles created so far.
    #[must_use]
    pub fn all(&self) -> Vec<MockHandle> {
        self.handles.borrow().clone()
    }
}

impl TransportFactory for MockTransportFactory {
    fn connect(&self, target: &ConnectTarget, _network: &NetworkConfig) -> Box<dyn Transport> {
        let shared = Rc::new(RefCell::new(MockState {
            state: TransportState::Connecting,
            target: target.clone(),
            pending: VecDeque::new(),
            recv: BytesMut::new(),
            written: Vec::new(),
            eof: false,
            closed_by_engine: false,
            auto_connect: self.auto_connect,
        }));
        self.handles.borrow_mut().push(MockHandle {
            shared: shared.clone(),
        });
        Box::new(MockTransport { shared })
    }

    fn supports_tls(&self) -> bool {
        self.supports_tls
    }
}

/// Resolver answering from a canned address list, synchronously.
pub struct ManualResolver {
    addrs: Vec<SocketAddr>,
    fail: bool,
}

impl ManualResolver {
    #[must_use]
    pub fn returning(addrs: Vec<SocketAddr>) -> Self {
        Self { addrs, fail: false }
    }

    /// Every lookup fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            addrs: Vec::new(),
            fail: true,
        }
    }
}

impl Resolver for ManualResolver {
    fn resolve(&self, host: &str, _port: u16) -> ResolveHandle {
        if self.fail {
            return ResolveHandle::ready(Err(error::unknown(format!(
                "scripted lookup failure for {host}"
            ))));
        }
        ResolveHandle::ready(Ok(ResolvedAddresses::new(self.addrs.clone())))
    }
}

/// Convenience addresses for dual-stack tests.
#[must_use]
pub fn v4_addr(last: u8) -> SocketAddr {
    format!("192.0.2.{last}:80").parse().expect("valid v4")
}

#[must_use]
pub fn v6_addr() -> SocketAddr {
    "[2001:db8::1]:80".parse().expect("valid v6")
}
