//! Channel: one transport plus its protocol state
//!
//! A channel owns at most one socket and at most one current exchange,
//! with already-pipelined exchanges queued behind it. State moves
//! `Idle → Connecting → Idle → Writing → Waiting → Reading → Idle|Closing`;
//! `Closing` covers protocol-mandated close and returns to `Idle` once
//! the transport reports disconnected.

use std::collections::VecDeque;
use std::net::SocketAddr;

use bytes::BytesMut;

use crate::auth::Authenticator;
use crate::connect::{Transport, TransportState};
use crate::dns::AddressFamily;
use crate::protocols::{select_handler, ProtocolHandler};

use super::queue::InFlight;

/// Channel state machine positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Idle,
    Connecting,
    Writing,
    Waiting,
    Reading,
    Closing,
}

/// Pipelining capability inferred from the first response on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineSupport {
    #[default]
    Unknown,
    Supported,
    Unsupported,
}

/// Servers whose pipelining is known broken; matched as `Server` header
/// prefixes.
const BROKEN_PIPELINE_SERVERS: &[&str] = &[
    "Microsoft-IIS/4.",
    "Microsoft-IIS/5.",
    "Netscape-Enterprise/3.",
];

pub struct Channel {
    pub id: usize,
    pub state: ChannelState,
    pub transport: Option<Box<dyn Transport>>,
    pub handler: Box<dyn ProtocolHandler>,

    pub current: Option<InFlight>,
    pub pipeline: VecDeque<InFlight>,
    pub recv_buf: BytesMut,

    pub auth: Authenticator,
    pub proxy_auth: Authenticator,

    /// Remaining reconnect budget for unexpected EOFs.
    pub reconnect_budget: u32,
    /// The current exchange must be serialized and sent again.
    pub resend_pending: bool,
    pub pipeline_support: PipelineSupport,

    /// Family this channel is connecting over, during dual-stack racing.
    pub family: Option<AddressFamily>,
    /// Fallback addresses for the in-progress connect attempt.
    pub connect_addrs: VecDeque<SocketAddr>,

    /// Body fully handed to the transport; waiting for the send buffer to
    /// drain before moving to `Waiting`.
    pub upload_done: bool,
}

impl Channel {
    #[must_use]
    pub fn new(id: usize, reconnect_budget: u32) -> Self {
        Self {
            id,
            state: ChannelState::Idle,
            transport: None,
            handler: select_handler(None),
            current: None,
            pipeline: VecDeque::new(),
            recv_buf: BytesMut::new(),
            auth: Authenticator::new(),
            proxy_auth: Authenticator::new(),
            reconnect_budget,
            resend_pending: false,
            pipeline_support: PipelineSupport::Unknown,
            family: None,
            connect_addrs: VecDeque::new(),
            upload_done: false,
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport
            .as_ref()
            .is_some_and(|t| t.state() == TransportState::Connected)
    }

    #[must_use]
    pub fn is_connecting(&self) -> bool {
        self.state == ChannelState::Connecting
    }

    /// Idle, connected, and carrying no exchange: ready for new work.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.state == ChannelState::Idle && self.is_connected() && self.current.is_none()
    }

    /// No transport and no exchange: available for a fresh connect.
    #[must_use]
    pub fn is_vacant(&self) -> bool {
        self.state == ChannelState::Idle && self.transport.is_none() && self.current.is_none()
    }

    /// Depth of requests written whose responses have not completed.
    #[must_use]
    pub fn pipeline_depth(&self) -> usize {
        self.pipeline.len()
    }

    /// Tear down the transport. Exchanges are NOT touched; callers take
    /// `current`/`pipeline` first when they need to requeue or fail them.
    pub fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.recv_buf.clear();
        self.state = ChannelState::Idle;
        self.family = None;
        self.connect_addrs.clear();
        self.pipeline_support = PipelineSupport::Unknown;
        self.upload_done = false;
    }

    /// Detach every exchange from this channel, clearing back-references.
    #[must_use]
    pub fn take_exchanges(&mut self) -> (Option<InFlight>, Vec<InFlight>) {
        let current = self.current.take();
        if let Some(pair) = current.as_ref() {
            pair.reply.clear_channel();
        }
        let pipeline: Vec<InFlight> = self.pipeline.drain(..).collect();
        for pair in &pipeline {
            pair.reply.clear_channel();
            pair.reply.set_pipelined(false);
        }
        self.resend_pending = false;
        (current, pipeline)
    }

    /// Promote the next pipelined exchange to current. The channel stays
    /// in `Reading`; it never returns through `Idle` between pipelined
    /// replies.
    pub fn promote_pipelined(&mut self) -> bool {
        match self.pipeline.pop_front() {
            Some(next) => {
                self.current = Some(next);
                self.state = ChannelState::Reading;
                true
            }
            None => false,
        }
    }

    /// Infer pipelining capability from the first response on this
    /// transport.
    pub fn update_pipeline_support(
        &mut self,
        version: (u8, u8),
        connection_close: bool,
        server: Option<&str>,
    ) {
        if self.pipeline_support != PipelineSupport::Unknown {
            return;
        }
        let broken_server = server.is_some_and(|s| {
            BROKEN_PIPELINE_SERVERS
                .iter()
                .any(|prefix| s.starts_with(prefix))
        });
        self.pipeline_support = if version == (1, 1) && !connection_close && !broken_server {
            PipelineSupport::Supported
        } else {
            PipelineSupport::Unsupported
        };
        tracing::trace!(
            channel = self.id,
            support = ?self.pipeline_support,
            "pipelining capability inferred"
        );
    }

    /// Pipelining eligibility gates that depend only on channel-local
    /// state; queue-side checks happen in the dispatcher.
    #[must_use]
    pub fn may_extend_pipeline(&self, max_depth: usize, refill_threshold: usize) -> bool {
        if self.pipeline_support != PipelineSupport::Supported {
            return false;
        }
        if !self.is_connected() {
            return false;
        }
        if !matches!(self.state, ChannelState::Waiting | ChannelState::Reading) {
            return false;
        }
        let Some(current) = self.current.as_ref() else {
            return false;
        };
        if !current.request.is_pipeline_eligible() {
            return false;
        }
        if self.auth.is_pending() || self.proxy_auth.is_pending() {
            return false;
        }
        if self.pipeline.len() >= max_depth {
            return false;
        }
        max_depth - self.pipeline.len() >= refill_threshold
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("connected", &self.is_connected())
            .field("pipeline_depth", &self.pipeline.len())
            .field("reconnect_budget", &self.reconnect_budget)
            .finish()
    }
}
