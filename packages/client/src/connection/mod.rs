//! Connection: channel pool, queueing, and dispatch
//!
//! One [`Connection`] owns a bounded pool of channels to a single origin
//! (or proxy), two priority FIFO queues of pending exchanges, the
//! dual-stack racing state, and the pause flag. The whole engine is
//! single-threaded and cooperative: `send_request` may run one synchronous
//! dispatch round, and every other trigger is posted and drained by
//! [`Connection::drive`].
//!
//! User callbacks are emitted only between mutation passes, never while
//! engine state is borrowed, so a callback may re-enter the connection.

pub mod channel;
pub mod events;
pub mod queue;

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use http::HeaderValue;

use crate::auth::ChallengeOutcome;
use crate::config::EngineConfig;
use crate::connect::{ConnectTarget, TcpTransportFactory, TransportEvent, TransportFactory};
use crate::dns::{AddressFamily, GaiResolver, ResolveHandle, ResolvedAddresses, Resolver};
use crate::error::{self, Error};
use crate::http::reply::{Credentials, ParseEvent, ReplyNotify};
use crate::http::{Reply, Request};
use crate::proxy::ProxySettings;
use crate::stats::ConnectionStats;

use channel::{Channel, ChannelState};
use events::{Post, PostQueue, TimerKind, Timers};
use queue::{InFlight, RequestQueues};

/// Cap on challenge-driven retries per exchange; NTLM needs three
/// round trips, anything beyond that is a credential rejection loop.
const MAX_AUTH_RETRIES: u8 = 3;

/// Network-layer selection for dual-stack hosts.
enum NetworkLayer {
    Unknown,
    HostLookupPending(ResolveHandle),
    RacingBoth,
    Decided(AddressFamily),
}

/// A pending caller prompt for credentials.
struct AuthPrompt {
    reply: Reply,
    proxy: bool,
    channel: usize,
}

struct ConnectionInner {
    host: String,
    port: u16,
    ssl: bool,
    proxy: Option<ProxySettings>,
    config: EngineConfig,

    resolver: Box<dyn Resolver>,
    factory: Box<dyn TransportFactory>,

    channels: Vec<Channel>,
    queues: RequestQueues,
    netlayer: NetworkLayer,
    addresses: ResolvedAddresses,
    paused: bool,

    posts: PostQueue,
    timers: Timers,
    notifies: Vec<(Reply, ReplyNotify)>,
    prompts: Vec<AuthPrompt>,

    stats: Arc<ConnectionStats>,
}

/// Cloneable handle to one connection. Single-thread confined by
/// construction (`Rc` inside).
#[derive(Clone)]
pub struct Connection {
    inner: Rc<RefCell<ConnectionInner>>,
}

impl Connection {
    /// Connection with the system resolver and plain-TCP transports.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, ssl: bool) -> Self {
        Self::with_transport(
            host,
            port,
            ssl,
            EngineConfig::default(),
            Box::new(GaiResolver::new()),
            Box::new(TcpTransportFactory::default()),
        )
    }

    /// Fully parameterized constructor; tests inject scripted resolvers
    /// and transports here.
    #[must_use]
    pub fn with_transport(
        host: impl Into<String>,
        port: u16,
        ssl: bool,
        config: EngineConfig,
        resolver: Box<dyn Resolver>,
        factory: Box<dyn TransportFactory>,
    ) -> Self {
        let channel_count = config.connection.channel_count;
        let budget = config.connection.reconnect_attempts;
        let channels = (0..channel_count).map(|id| Channel::new(id, budget)).collect();
        Self {
            inner: Rc::new(RefCell::new(ConnectionInner {
                host: host.into(),
                port,
                ssl,
                proxy: None,
                config,
                resolver,
                factory,
                channels,
                queues: RequestQueues::new(),
                netlayer: NetworkLayer::Unknown,
                addresses: ResolvedAddresses::default(),
                paused: false,
                posts: PostQueue::new(),
                timers: Timers::new(),
                notifies: Vec::new(),
                prompts: Vec::new(),
                stats: ConnectionStats::new(),
            })),
        }
    }

    /// Route exchanges through an HTTP proxy. Must be set before the
    /// first request.
    pub fn set_proxy(&self, proxy: ProxySettings) {
        self.inner.borrow_mut().proxy = Some(proxy);
    }

    /// Enqueue one request and run the synchronous dispatch round allowed
    /// on the initiating path.
    pub fn send_request(&self, mut request: Request) -> Reply {
        request.prepare();
        let reply = Reply::new(request.method().clone(), request.auto_decompress());
        reply.set_upload_total(request.body_size());

        {
            let mut inner = self.inner.borrow_mut();
            inner.stats.add(&inner.stats.requests_enqueued, 1);
            inner.queues.enqueue(InFlight::new(request, reply.clone()));
            if !inner.paused {
                inner.dispatch(Instant::now());
            }
        }
        self.emit();
        reply
    }

    /// One cooperative pass: fire due timers, poll the resolver and every
    /// transport, drain posted work, then emit callbacks. Loops until the
    /// engine settles.
    pub fn drive(&self, now: Instant) {
        loop {
            {
                let mut inner = self.inner.borrow_mut();
                inner.pump(now);
            }
            if !self.emit() {
                break;
            }
        }
    }

    /// `drive` against the wall clock.
    pub fn run_once(&self) {
        self.drive(Instant::now());
    }

    /// Suspend all socket processing, e.g. while the caller handles an
    /// authentication prompt out of band.
    pub fn pause(&self) {
        self.inner.borrow_mut().paused = true;
    }

    /// Resume processing; reschedules dispatch and any in-flight upload
    /// continuations.
    pub fn resume(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.paused = false;
        inner.posts.push(Post::Dispatch);
        for idx in 0..inner.channels.len() {
            if inner.channels[idx].state == ChannelState::Writing {
                inner.posts.push(Post::ResumeUpload(idx));
            }
        }
    }

    /// Abort one reply: detach it from its channel or queue, requeue any
    /// pipelined siblings, and close the channel when the response was
    /// unfinished or the server mandated close.
    pub fn abort(&self, reply: &Reply) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.abort(reply);
        }
        self.emit();
    }

    #[must_use]
    pub fn stats(&self) -> Arc<ConnectionStats> {
        self.inner.borrow().stats.clone()
    }

    #[must_use]
    pub fn queued_requests(&self) -> usize {
        self.inner.borrow().queues.len()
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.borrow().paused
    }

    /// Decided address family, once dual-stack selection has settled.
    #[must_use]
    pub fn network_family(&self) -> Option<AddressFamily> {
        match self.inner.borrow().netlayer {
            NetworkLayer::Decided(family) => Some(family),
            _ => None,
        }
    }

    #[must_use]
    pub fn channel_state(&self, idx: usize) -> ChannelState {
        self.inner.borrow().channels[idx].state
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.inner.borrow().channels.len()
    }

    #[must_use]
    pub fn pipeline_depth(&self, idx: usize) -> usize {
        self.inner.borrow().channels[idx].pipeline_depth()
    }

    /// Emit queued notifications and credential prompts with no engine
    /// borrow held. Returns whether anything was emitted.
    fn emit(&self) -> bool {
        let (notifies, prompts) = {
            let mut inner = self.inner.borrow_mut();
            (
                std::mem::take(&mut inner.notifies),
                std::mem::take(&mut inner.prompts),
            )
        };
        let emitted = !notifies.is_empty() || !prompts.is_empty();

        for (reply, kind) in notifies {
            reply.notify(kind);
        }
        for prompt in prompts {
            let credentials = prompt.reply.ask_credentials(prompt.proxy);
            let mut inner = self.inner.borrow_mut();
            inner.finish_prompt(prompt, credentials);
        }
        emitted
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Connection")
            .field("host", &inner.host)
            .field("port", &inner.port)
            .field("ssl", &inner.ssl)
            .field("queued", &inner.queues.len())
            .field("channels", &inner.channels)
            .finish()
    }
}

impl ConnectionInner {
    // --- drive loop ---------------------------------------------------

    fn pump(&mut self, now: Instant) {
        if self.paused {
            return;
        }

        for kind in self.timers.due(now) {
            match kind {
                TimerKind::DelayedFamilyRace => self.start_delayed_family(now),
            }
        }

        let resolved = match &mut self.netlayer {
            NetworkLayer::HostLookupPending(handle) => handle.poll(),
            _ => None,
        };
        if let Some(result) = resolved {
            self.on_resolved(result, now);
        }

        for idx in 0..self.channels.len() {
            let events = match self.channels[idx].transport.as_mut() {
                Some(transport) => transport.poll(),
                None => continue,
            };
            for event in events {
                self.on_transport_event(idx, event, now);
            }
        }

        while let Some(post) = self.posts.pop() {
            match post {
                Post::Dispatch => self.dispatch(now),
                Post::ResumeUpload(idx) => self.continue_upload(idx),
                Post::ProcessReceived(idx) => self.process_received(idx),
            }
        }
    }

    fn notify(&mut self, reply: &Reply, kind: ReplyNotify) {
        self.notifies.push((reply.clone(), kind));
    }

    // --- dispatch -----------------------------------------------------

    fn dispatch(&mut self, now: Instant) {
        if self.paused {
            return;
        }

        // (a) channels whose current exchange must be sent again
        self.do_resends();

        // (b) hand queued pairs to idle, connected, free channels
        loop {
            let Some(idx) = self.channels.iter().position(Channel::is_free) else {
                break;
            };
            let Some(pair) = self.queues.dequeue() else {
                break;
            };
            self.send_on_channel(idx, pair);
        }

        // (c) extend pipelines on busy channels
        for idx in 0..self.channels.len() {
            self.extend_pipeline(idx);
        }

        // (d) open new channels for the remaining backlog
        self.open_channels(now);
    }

    fn do_resends(&mut self) {
        for idx in 0..self.channels.len() {
            if !self.channels[idx].resend_pending {
                continue;
            }
            self.channels[idx].resend_pending = false;
            let Some(mut pair) = self.channels[idx].current.take() else {
                continue;
            };
            pair.reply.clear_channel();

            if !pair.request.reset_body() {
                // The body is gone; the retry cannot happen.
                let (_, pipeline) = self.channels[idx].take_exchanges();
                self.requeue_all(pipeline);
                self.channels[idx].close_transport();
                self.fail_pair(pair, error::content_resend());
                continue;
            }
            pair.reply.reset_for_resend();

            let must_close = pair.reply.connection_close()
                || !self.channels[idx].is_connected()
                || !self.channels[idx].pipeline.is_empty();
            if must_close {
                let (_, pipeline) = self.channels[idx].take_exchanges();
                self.requeue_all(pipeline);
                self.channels[idx].close_transport();
                self.queues.requeue(pair);
                self.posts.push(Post::Dispatch);
            } else {
                // Same transport, fresh serialization (NTLM binds to the
                // session).
                self.send_on_channel(idx, pair);
            }
        }
    }

    fn send_on_channel(&mut self, idx: usize, mut pair: InFlight) {
        if pair.request.is_connect_only() {
            // The transport is warm; that is all this request wanted.
            pair.reply.finish_connect_only();
            self.stats.add(&self.stats.requests_finished, 1);
            self.notify(&pair.reply, ReplyNotify::Finished);
            return;
        }

        let absolute = self.proxy.is_some();
        pair.reply.set_channel(idx);
        self.apply_auth_headers(idx, &mut pair);

        let mut out = BytesMut::new();
        let written = {
            let ch = &mut self.channels[idx];
            ch.handler.serialize_request(&pair.request, absolute, &mut out);
            let transport = ch.transport.as_mut().expect("free channel has transport");
            transport.write(&out)
        };

        match written {
            Ok(n) => {
                self.stats.add(&self.stats.bytes_sent, n as u64);
                tracing::debug!(
                    channel = idx,
                    method = %pair.request.method(),
                    target = %pair.request.request_target(absolute),
                    "request serialized"
                );
            }
            Err(e) => {
                let (_, pipeline) = self.channels[idx].take_exchanges();
                self.requeue_all(pipeline);
                self.channels[idx].close_transport();
                self.fail_pair(pair, error::connect_failed(e));
                return;
            }
        }

        let ch = &mut self.channels[idx];
        ch.state = ChannelState::Writing;
        ch.upload_done = !pair.request.has_body();
        ch.current = Some(pair);
        self.continue_upload(idx);
    }

    fn apply_auth_headers(&mut self, idx: usize, pair: &mut InFlight) {
        let absolute = self.proxy.is_some();
        let target = pair.request.request_target(absolute);
        let method = pair.request.method().as_str().to_string();

        let ch = &mut self.channels[idx];
        if let Some(value) = ch.auth.authorization_value(&method, &target) {
            if let Ok(value) = HeaderValue::from_str(&value) {
                pair.request.set_header(http::header::AUTHORIZATION, value);
            }
        }
        if self.proxy.is_some() {
            if let Some(value) = ch.proxy_auth.authorization_value(&method, &target) {
                if let Ok(value) = HeaderValue::from_str(&value) {
                    pair.request
                        .set_header(http::header::PROXY_AUTHORIZATION, value);
                }
            }
        }
    }

    /// Stream the request body: pull bounded chunks from the byte source
    /// while the transport's outstanding write buffer stays under its cap.
    fn continue_upload(&mut self, idx: usize) {
        if self.paused {
            return;
        }
        let write_chunk = self.config.limits.write_chunk_size;
        let write_cap = self.config.limits.write_buffer_cap;

        let mut fatal: Option<Error> = None;
        let mut progress: Option<u64> = None;
        let mut sent_bytes = 0u64;

        {
            let ch = &mut self.channels[idx];
            if ch.state != ChannelState::Writing || ch.resend_pending {
                return;
            }
            let Some(pair) = ch.current.as_mut() else {
                return;
            };

            while !ch.upload_done {
                let outstanding = ch
                    .transport
                    .as_ref()
                    .map_or(usize::MAX, |t| t.bytes_to_write());
                if outstanding >= write_cap {
                    break;
                }

                let Some(body) = pair.request.body_mut() else {
                    ch.upload_done = true;
                    break;
                };
                if body.at_end() {
                    ch.upload_done = true;
                    break;
                }
                let chunk: Vec<u8> = match body.peek(write_chunk) {
                    Ok(chunk) => chunk.to_vec(),
                    Err(e) => {
                        fatal = Some(error::write_incomplete().with(e));
                        break;
                    }
                };
                if chunk.is_empty() {
                    if body.at_end() {
                        ch.upload_done = true;
                    }
                    break;
                }

                let transport = ch.transport.as_mut().expect("writing channel has transport");
                match transport.write(&chunk) {
                    Ok(n) if n == chunk.len() => {
                        pair.request
                            .body_mut()
                            .expect("body exists mid-upload")
                            .advance(n);
                        sent_bytes += n as u64;
                        progress = Some(pair.reply.add_uploaded(n as u64));
                    }
                    Ok(_) | Err(_) => {
                        // Wrote something other than what was read.
                        fatal = Some(error::write_incomplete());
                        break;
                    }
                }
            }

            if fatal.is_none()
                && ch.upload_done
                && ch.transport.as_ref().is_some_and(|t| t.bytes_to_write() == 0)
            {
                ch.state = ChannelState::Waiting;
            }
        }

        if sent_bytes > 0 {
            self.stats.add(&self.stats.bytes_sent, sent_bytes);
        }
        if let Some(sent) = progress {
            let reply = self.channels[idx]
                .current
                .as_ref()
                .map(|pair| pair.reply.clone());
            if let Some(reply) = reply {
                self.notify(&reply, ReplyNotify::UploadProgress(sent));
            }
        }

        if let Some(error) = fatal {
            let (current, pipeline) = self.channels[idx].take_exchanges();
            self.requeue_all(pipeline);
            self.channels[idx].close_transport();
            if let Some(pair) = current {
                self.fail_pair(pair, error);
            }
            self.posts.push(Post::Dispatch);
        }
    }

    /// Append eligible queued GETs behind the current exchange,
    /// serialized into one buffer and flushed as a unit so the OS has the
    /// best chance of coalescing them into one packet.
    fn extend_pipeline(&mut self, idx: usize) {
        let max_depth = self.config.pipeline.max_depth;
        let refill = self.config.pipeline.refill_threshold;
        if !self.channels[idx].may_extend_pipeline(max_depth, refill) {
            return;
        }

        let absolute = self.proxy.is_some();
        let mut batch = BytesMut::new();
        let mut added = 0u64;

        while self.channels[idx].pipeline.len() < max_depth {
            let Some(mut pair) = self.queues.dequeue_pipeline_candidate() else {
                break;
            };
            pair.reply.set_channel(idx);
            pair.reply.set_pipelined(true);
            self.apply_auth_headers(idx, &mut pair);
            let ch = &mut self.channels[idx];
            ch.handler.serialize_request(&pair.request, absolute, &mut batch);
            ch.pipeline.push_back(pair);
            added += 1;
        }

        if batch.is_empty() {
            return;
        }

        let result = {
            let transport = self.channels[idx]
                .transport
                .as_mut()
                .expect("pipelining channel has transport");
            transport.write(&batch)
        };
        match result {
            Ok(n) => {
                self.stats.add(&self.stats.bytes_sent, n as u64);
                self.stats.add(&self.stats.requests_pipelined, added);
                tracing::debug!(channel = idx, added, "pipeline extended");
            }
            Err(e) => {
                tracing::debug!(channel = idx, error = %e, "pipeline write failed");
                self.handle_unexpected_eof(idx, error::remote_closed());
            }
        }
    }

    // --- channel opening and dual-stack racing ------------------------

    fn open_channels(&mut self, now: Instant) {
        if self.queues.is_empty() {
            return;
        }
        if self.channels.iter().any(Channel::is_connecting) {
            return;
        }
        if self.ssl && self.proxy.is_none() && !self.factory.supports_tls() {
            let pairs = self.queues.drain();
            for pair in pairs {
                self.fail_pair(
                    pair,
                    error::unknown("encrypted transport required but not configured"),
                );
            }
            return;
        }

        match self.netlayer {
            NetworkLayer::Unknown => self.start_resolve(now),
            NetworkLayer::HostLookupPending(_) | NetworkLayer::RacingBoth => {}
            NetworkLayer::Decided(family) => {
                let mut remaining = self.queues.len();
                for idx in 0..self.channels.len() {
                    if remaining == 0 {
                        break;
                    }
                    if self.channels[idx].is_vacant() {
                        self.connect_channel(idx, family);
                        remaining -= 1;
                    }
                }
            }
        }
    }

    fn start_resolve(&mut self, now: Instant) {
        let (host, port) = match &self.proxy {
            Some(proxy) => (proxy.host().to_string(), proxy.port()),
            None => (self.host.clone(), self.port),
        };
        tracing::debug!(%host, port, "starting host lookup");
        let mut handle = self.resolver.resolve(&host, port);
        // IP literals and scripted resolvers complete synchronously.
        match handle.poll() {
            Some(result) => self.on_resolved(result, now),
            None => self.netlayer = NetworkLayer::HostLookupPending(handle),
        }
    }

    fn on_resolved(&mut self, result: Result<ResolvedAddresses, Error>, now: Instant) {
        let addrs = match result {
            Ok(addrs) if !addrs.is_empty() => addrs,
            Ok(_) => {
                self.netlayer = NetworkLayer::Unknown;
                self.fail_all_queued(error::Kind::Transport(
                    error::TransportCause::ConnectFailed,
                ));
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "host lookup failed");
                self.netlayer = NetworkLayer::Unknown;
                self.fail_all_queued(e.kind());
                return;
            }
        };

        self.addresses = addrs;
        if self.addresses.is_dual_stack() {
            let preferred = self.config.network.preferred_family;
            tracing::debug!(?preferred, "dual-stack host, racing address families");
            self.netlayer = NetworkLayer::RacingBoth;
            if let Some(idx) = self.vacant_channel() {
                self.connect_channel(idx, preferred);
            }
            self.timers.schedule(
                TimerKind::DelayedFamilyRace,
                now + self.config.network.delayed_connect,
            );
        } else {
            let family = if self.addresses.has_family(AddressFamily::V6) {
                AddressFamily::V6
            } else {
                AddressFamily::V4
            };
            self.netlayer = NetworkLayer::Decided(family);
            self.posts.push(Post::Dispatch);
        }
    }

    /// The delayed-connect timer fired: the preferred family has not won
    /// yet, so race the other one.
    fn start_delayed_family(&mut self, _now: Instant) {
        if !matches!(self.netlayer, NetworkLayer::RacingBoth) {
            return;
        }
        let other = self.config.network.preferred_family.other();
        if let Some(idx) = self.vacant_channel() {
            tracing::debug!(family = ?other, "starting delayed family connect");
            self.connect_channel(idx, other);
        }
    }

    fn vacant_channel(&self) -> Option<usize> {
        self.channels.iter().position(Channel::is_vacant)
    }

    fn connect_channel(&mut self, idx: usize, family: AddressFamily) {
        let mut addrs = self.addresses.family(family);
        if addrs.is_empty() {
            addrs = self.addresses.all().to_vec();
        }
        let Some(first) = addrs.first().copied() else {
            return;
        };

        let target = self.connect_target(first);
        let transport = self.factory.connect(&target, &self.config.network);
        let proxy_credentials = self
            .proxy
            .as_ref()
            .and_then(|proxy| proxy.credentials().cloned());

        let ch = &mut self.channels[idx];
        // Fresh transport: auth phases return to Start so credential
        // prompts can be re-asked; cached credentials survive.
        ch.auth.reset_for_reconnect();
        ch.proxy_auth.reset_for_reconnect();
        if let Some(credentials) = proxy_credentials {
            ch.proxy_auth.set_credentials(credentials);
        }

        ch.family = Some(family);
        ch.connect_addrs = addrs.into_iter().skip(1).collect();
        ch.state = ChannelState::Connecting;
        ch.transport = Some(transport);
        tracing::debug!(channel = idx, addr = %first, family = ?family, "channel connecting");
    }

    fn connect_target(&self, addr: SocketAddr) -> ConnectTarget {
        ConnectTarget {
            addr,
            host: self.host.clone(),
            tls: self.ssl && self.proxy.is_none(),
        }
    }

    // --- transport events ---------------------------------------------

    fn on_transport_event(&mut self, idx: usize, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Connected => self.on_channel_connected(idx, now),
            TransportEvent::Readable => self.on_channel_readable(idx),
            TransportEvent::BytesWritten(_) => self.on_channel_written(idx),
            TransportEvent::Disconnected => self.on_channel_eof(idx),
            TransportEvent::Failed(e) => {
                if self.channels[idx].state == ChannelState::Connecting {
                    self.handle_connect_failure(idx, e);
                } else {
                    self.on_channel_error(idx, e);
                }
            }
        }
    }

    fn on_channel_connected(&mut self, idx: usize, _now: Instant) {
        let negotiated = self.channels[idx]
            .transport
            .as_ref()
            .and_then(|t| t.negotiated_protocol().map(str::to_string));
        let ch = &mut self.channels[idx];
        ch.state = ChannelState::Idle;
        ch.handler = crate::protocols::select_handler(negotiated.as_deref());
        ch.connect_addrs.clear();
        let family = ch.family;
        tracing::debug!(channel = idx, family = ?family, "channel connected");

        if matches!(self.netlayer, NetworkLayer::RacingBoth) {
            // First connect wins: fix the layer, stop the race.
            let winner = family.unwrap_or(self.config.network.preferred_family);
            self.netlayer = NetworkLayer::Decided(winner);
            self.timers.cancel(TimerKind::DelayedFamilyRace);
            for other in 0..self.channels.len() {
                if other != idx && self.channels[other].state == ChannelState::Connecting {
                    tracing::debug!(channel = other, "closing losing race channel");
                    self.channels[other].close_transport();
                }
            }
        }

        self.posts.push(Post::Dispatch);
    }

    fn on_channel_readable(&mut self, idx: usize) {
        let read_cap = self.config.limits.read_chunk_size as u64;
        let mut received = 0u64;
        {
            let ch = &mut self.channels[idx];
            let Some(transport) = ch.transport.as_mut() else {
                return;
            };
            let mut buf = [0u8; 8 * 1024];
            // Bounded per pass; leftover bytes surface as another
            // readable notification on the next poll.
            while received < read_cap {
                match transport.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        ch.recv_buf.extend_from_slice(&buf[..n]);
                        received += n as u64;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(_) => break,
                }
            }
        }
        if received > 0 {
            self.stats.add(&self.stats.bytes_received, received);
            self.process_received(idx);
        }
    }

    fn on_channel_written(&mut self, idx: usize) {
        let (writing, flushed) = {
            let ch = &self.channels[idx];
            (
                ch.state == ChannelState::Writing,
                ch.upload_done
                    && ch.transport.as_ref().is_some_and(|t| t.bytes_to_write() == 0),
            )
        };
        if !writing {
            return;
        }
        if flushed {
            self.channels[idx].state = ChannelState::Waiting;
        } else {
            self.continue_upload(idx);
        }
    }

    fn process_received(&mut self, idx: usize) {
        loop {
            if self.channels[idx].current.is_none() {
                if !self.channels[idx].recv_buf.is_empty() {
                    tracing::warn!(
                        channel = idx,
                        "server sent bytes with no outstanding request"
                    );
                    self.channels[idx].close_transport();
                }
                break;
            }
            if self.channels[idx].recv_buf.is_empty() {
                break;
            }

            if self.channels[idx].state == ChannelState::Waiting {
                self.channels[idx].state = ChannelState::Reading;
            }

            let reply = self.channels[idx]
                .current
                .as_ref()
                .expect("checked above")
                .reply
                .clone();
            let max = self.read_budget(&reply);
            if max == 0 {
                // Caller backpressure: resume once the buffer is drained.
                break;
            }

            let before = self.channels[idx].recv_buf.len();
            let result = {
                let ch = &mut self.channels[idx];
                ch.handler.feed(&reply, &mut ch.recv_buf, max)
            };

            match result {
                Err(e) => {
                    self.fail_current_and_close(idx, e);
                    break;
                }
                Ok(events) => {
                    let mut finished = false;
                    for event in events {
                        match event {
                            ParseEvent::HeadersComplete => {
                                self.channels[idx].state = ChannelState::Reading;
                                self.notify(&reply, ReplyNotify::HeaderChanged);
                            }
                            ParseEvent::DataReady => {
                                self.notify(&reply, ReplyNotify::ReadyToRead);
                                self.notify(&reply, ReplyNotify::DownloadProgress);
                            }
                            ParseEvent::Finished => finished = true,
                        }
                    }
                    if finished {
                        if !self.handle_reply_finished(idx) {
                            break;
                        }
                    } else if self.channels[idx].recv_buf.len() == before {
                        // Parser needs more bytes than we have.
                        break;
                    }
                }
            }
        }
    }

    fn read_budget(&self, reply: &Reply) -> usize {
        match self.config.limits.max_read_buffer {
            Some(cap) => cap.saturating_sub(reply.bytes_available()),
            None => usize::MAX,
        }
    }

    /// A reply reached `AllDone`. Returns true when a pipelined successor
    /// was promoted and parsing should continue on the same buffer.
    fn handle_reply_finished(&mut self, idx: usize) -> bool {
        let pair = self.channels[idx]
            .current
            .take()
            .expect("finished reply was current");
        let status = pair.reply.status();

        if status == 401 || status == 407 {
            self.handle_auth_challenge(idx, pair);
            return false;
        }

        // Success clears challenge-pending state on both authenticators.
        self.channels[idx].auth.mark_authenticated();
        self.channels[idx].proxy_auth.mark_authenticated();

        let version = pair.reply.version();
        let close = pair.reply.connection_close() || !self.channels[idx].is_connected();
        let server = pair.reply.header("server");
        self.channels[idx].update_pipeline_support(version, close, server.as_deref());

        pair.reply.clear_channel();
        self.stats.add(&self.stats.requests_finished, 1);
        self.notify(&pair.reply, ReplyNotify::Finished);
        tracing::debug!(channel = idx, status, close, "reply finished");

        if close {
            let (_, pipeline) = self.channels[idx].take_exchanges();
            self.requeue_all(pipeline);
            self.channels[idx].close_transport();
            self.posts.push(Post::Dispatch);
            false
        } else {
            let promoted = self.channels[idx].promote_pipelined();
            if !promoted {
                self.channels[idx].state = ChannelState::Idle;
            }
            self.posts.push(Post::Dispatch);
            promoted
        }
    }

    // --- authentication -----------------------------------------------

    fn handle_auth_challenge(&mut self, idx: usize, mut pair: InFlight) {
        let proxy = pair.reply.status() == 407;
        let header_name = if proxy {
            "proxy-authenticate"
        } else {
            "www-authenticate"
        };
        let headers = pair.reply.headers();

        let outcome = {
            let ch = &mut self.channels[idx];
            let authenticator = if proxy { &mut ch.proxy_auth } else { &mut ch.auth };
            authenticator.handle_challenge(&headers, header_name)
        };
        tracing::debug!(channel = idx, proxy, ?outcome, "authentication challenge");

        let declined = !pair.request.with_credentials();
        match outcome {
            ChallengeOutcome::Unsupported => {
                self.fail_after_challenge(idx, pair, proxy);
            }
            _ if declined => {
                self.fail_after_challenge(idx, pair, proxy);
            }
            ChallengeOutcome::NeedCredentials => {
                // Pause while the caller fills the credential slot; the
                // prompt is emitted outside the engine borrow.
                self.paused = true;
                let reply = pair.reply.clone();
                self.channels[idx].current = Some(pair);
                self.prompts.push(AuthPrompt {
                    reply,
                    proxy,
                    channel: idx,
                });
            }
            ChallengeOutcome::Retry => {
                pair.auth_retries += 1;
                if pair.auth_retries > MAX_AUTH_RETRIES {
                    self.fail_after_challenge(idx, pair, proxy);
                    return;
                }
                self.channels[idx].current = Some(pair);
                self.channels[idx].resend_pending = true;
                self.posts.push(Post::Dispatch);
            }
        }
    }

    /// Credential slot came back from the caller: resume and either retry
    /// with the new credentials or surface the auth failure.
    fn finish_prompt(&mut self, prompt: AuthPrompt, credentials: Option<Credentials>) {
        self.paused = false;
        let idx = prompt.channel;

        match credentials {
            Some(credentials) => {
                {
                    let ch = &mut self.channels[idx];
                    let authenticator = if prompt.proxy {
                        &mut ch.proxy_auth
                    } else {
                        &mut ch.auth
                    };
                    authenticator.set_credentials(credentials.clone());
                }

                // Copy to sibling channels so they do not each re-prompt;
                // NTLM holds its credentials back until the handshake is
                // done.
                if self.channels[idx].authenticator(prompt.proxy).may_propagate() {
                    for other in 0..self.channels.len() {
                        if other != idx {
                            self.channels[other]
                                .authenticator_mut(prompt.proxy)
                                .set_credentials(credentials.clone());
                        }
                    }
                    if prompt.proxy {
                        if let Some(proxy) = &mut self.proxy {
                            proxy.set_credentials(credentials);
                        }
                    }
                }

                if let Some(pair) = self.channels[idx].current.as_mut() {
                    pair.auth_retries += 1;
                }
                self.channels[idx].resend_pending = true;
                self.posts.push(Post::Dispatch);
            }
            None => {
                if let Some(pair) = self.channels[idx].current.take() {
                    self.fail_after_challenge(idx, pair, prompt.proxy);
                }
                self.posts.push(Post::Dispatch);
            }
        }
    }

    /// Fail an exchange whose challenge could not be satisfied. Buffered
    /// body bytes stay readable; the channel is reused or closed exactly
    /// like a finished reply.
    fn fail_after_challenge(&mut self, idx: usize, pair: InFlight, proxy: bool) {
        let close = pair.reply.connection_close() || !self.channels[idx].is_connected();
        let error = if proxy {
            error::proxy_authentication_required()
        } else {
            error::authentication_required()
        };
        self.fail_pair(pair, error);

        if close {
            let (_, pipeline) = self.channels[idx].take_exchanges();
            self.requeue_all(pipeline);
            self.channels[idx].close_transport();
        } else if self.channels[idx].promote_pipelined() {
            // The successor's bytes may already be buffered.
            self.posts.push(Post::ProcessReceived(idx));
        } else {
            self.channels[idx].state = ChannelState::Idle;
        }
        self.posts.push(Post::Dispatch);
    }

    // --- failure handling ---------------------------------------------

    fn on_channel_eof(&mut self, idx: usize) {
        match self.channels[idx].state {
            ChannelState::Reading | ChannelState::Waiting
                if self.channels[idx].current.is_some() =>
            {
                let reply = self.channels[idx]
                    .current
                    .as_ref()
                    .expect("checked above")
                    .reply
                    .clone();
                match reply.transport_eof() {
                    Ok(events) => {
                        // Until-close bodies legitimately end on EOF.
                        for event in events {
                            match event {
                                ParseEvent::DataReady => {
                                    self.notify(&reply, ReplyNotify::ReadyToRead);
                                    self.notify(&reply, ReplyNotify::DownloadProgress);
                                }
                                ParseEvent::Finished => {
                                    self.handle_reply_finished(idx);
                                }
                                ParseEvent::HeadersComplete => {}
                            }
                        }
                    }
                    Err(e) => self.handle_unexpected_eof(idx, e),
                }
            }
            ChannelState::Writing => {
                self.handle_unexpected_eof(idx, error::remote_closed());
            }
            _ => {
                // Keep-alive transport closed between exchanges.
                self.channels[idx].close_transport();
                self.posts.push(Post::Dispatch);
            }
        }
    }

    fn on_channel_error(&mut self, idx: usize, error: Error) {
        if self.channels[idx].current.is_some() || !self.channels[idx].pipeline.is_empty() {
            self.handle_unexpected_eof(idx, error);
        } else {
            self.channels[idx].close_transport();
            self.posts.push(Post::Dispatch);
        }
    }

    /// The transport died under an in-flight exchange: retry on a fresh
    /// transport while the reconnect budget lasts, otherwise surface the
    /// fault.
    fn handle_unexpected_eof(&mut self, idx: usize, error: Error) {
        let budget = self.channels[idx].reconnect_budget;
        tracing::debug!(channel = idx, budget, error = %error, "unexpected eof");

        if budget > 0 {
            self.channels[idx].reconnect_budget = budget - 1;
            self.stats.add(&self.stats.reconnects, 1);
            let (current, pipeline) = self.channels[idx].take_exchanges();
            self.channels[idx].close_transport();

            self.requeue_all(pipeline);
            if let Some(mut pair) = current {
                pair.reply.reset_for_resend();
                if pair.request.reset_body() {
                    self.queues.requeue(pair);
                } else {
                    self.fail_pair(pair, error::content_resend());
                }
            }
        } else {
            let (current, pipeline) = self.channels[idx].take_exchanges();
            self.channels[idx].close_transport();
            self.requeue_all(pipeline);
            if let Some(pair) = current {
                // Budget exhausted: the caller sees the disconnect.
                self.fail_pair(pair, error::remote_closed());
            }
        }
        self.posts.push(Post::Dispatch);
    }

    fn handle_connect_failure(&mut self, idx: usize, error: Error) {
        // Walk the remaining addresses for this attempt first.
        if let Some(next) = self.channels[idx].connect_addrs.pop_front() {
            let target = self.connect_target(next);
            let transport = self.factory.connect(&target, &self.config.network);
            self.channels[idx].transport = Some(transport);
            tracing::debug!(channel = idx, addr = %next, "trying next address");
            return;
        }

        let family = self.channels[idx].family;
        self.channels[idx].close_transport();
        tracing::debug!(channel = idx, family = ?family, error = %error, "connect failed");

        if matches!(self.netlayer, NetworkLayer::RacingBoth) {
            if self.timers.is_scheduled(TimerKind::DelayedFamilyRace) {
                // The preferred family lost outright; give the other one
                // its shot immediately.
                self.timers.cancel(TimerKind::DelayedFamilyRace);
                self.start_delayed_family(Instant::now());
            }
            if self.channels.iter().any(Channel::is_connecting) {
                return;
            }
        }

        if !self.channels.iter().any(|c| c.is_connecting() || c.is_connected()) {
            // Nothing left in flight: start from scratch on the next
            // request.
            self.netlayer = NetworkLayer::Unknown;
            self.fail_all_queued(error.kind());
        }
    }

    fn fail_current_and_close(&mut self, idx: usize, error: Error) {
        let (current, pipeline) = self.channels[idx].take_exchanges();
        self.requeue_all(pipeline);
        self.channels[idx].close_transport();
        if let Some(pair) = current {
            self.fail_pair(pair, error);
        }
        self.posts.push(Post::Dispatch);
    }

    fn fail_pair(&mut self, pair: InFlight, error: Error) {
        pair.reply.clear_channel();
        pair.reply.fail(error);
        self.stats.add(&self.stats.requests_failed, 1);
        self.notify(&pair.reply, ReplyNotify::FinishedWithError);
    }

    fn fail_all_queued(&mut self, kind: error::Kind) {
        let pairs = self.queues.drain();
        for pair in pairs {
            self.fail_pair(pair, Error::new(kind));
        }
    }

    /// Requeue detached pipeline pairs so they are serviced next, oldest
    /// first.
    fn requeue_all(&mut self, pipeline: Vec<InFlight>) {
        for pair in pipeline.into_iter().rev() {
            pair.reply.reset_for_resend();
            self.queues.requeue(pair);
        }
    }

    // --- cancellation -------------------------------------------------

    fn abort(&mut self, reply: &Reply) {
        // Still queued: drop it before it ever touches a channel.
        if let Some(pair) = self.queues.remove(reply) {
            self.fail_pair(pair, error::unknown("request aborted"));
            return;
        }

        // The reply's back-reference names the owning channel, if any.
        let Some(idx) = reply.channel() else {
            return;
        };

        let is_current = self.channels[idx]
            .current
            .as_ref()
            .is_some_and(|pair| pair.reply.same_reply(reply));
        if is_current {
            let unfinished = !reply.is_finished();
            let close = unfinished || reply.connection_close();
            let (current, pipeline) = self.channels[idx].take_exchanges();
            self.requeue_all(pipeline);
            if close {
                self.channels[idx].close_transport();
            } else {
                self.channels[idx].state = ChannelState::Idle;
            }
            if let Some(pair) = current {
                self.fail_pair(pair, error::unknown("request aborted"));
            }
            self.posts.push(Post::Dispatch);
            return;
        }

        let in_pipeline = self.channels[idx]
            .pipeline
            .iter()
            .position(|pair| pair.reply.same_reply(reply));
        if let Some(pos) = in_pipeline {
            if let Some(pair) = self.channels[idx].pipeline.remove(pos) {
                self.fail_pair(pair, error::unknown("request aborted"));
            }
            self.posts.push(Post::Dispatch);
        }
    }
}

impl Channel {
    fn authenticator(&self, proxy: bool) -> &crate::auth::Authenticator {
        if proxy {
            &self.proxy_auth
        } else {
            &self.auth
        }
    }

    fn authenticator_mut(&mut self, proxy: bool) -> &mut crate::auth::Authenticator {
        if proxy {
            &mut self.proxy_auth
        } else {
            &mut self.auth
        }
    }
}
