//! Incremental response accumulator
//!
//! A [`Reply`] is the caller's handle to one in-flight response. The
//! engine feeds it raw bytes off the wire; it advances through
//! `NothingDone → ReadingStatus → ReadingHeader → ReadingData → AllDone`,
//! buffering decoded body bytes until the caller drains them. Once
//! `AllDone` no further bytes are appended, but the buffer may still be
//! read until empty.
//!
//! Callbacks are registered per reply and invoked only from the engine's
//! notification phase, never while engine state is borrowed, so a callback
//! may legally re-enter the connection.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, Method};

use crate::error::{self, Error, Kind};
use crate::http::body_reader::{BodyReader, LengthMode};
use crate::http::inflate::{ContentCoding, Inflater};
use crate::http::{header_contains_token, header_str};

/// Parser position of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    NothingDone,
    ReadingStatus,
    ReadingHeader,
    ReadingData,
    AllDone,
}

/// Username/password pair filled in by an authentication callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

/// Mutable slot handed to authentication callbacks; leaving it empty
/// declines the challenge.
#[derive(Debug, Default)]
pub struct CredentialSlot {
    value: Option<Credentials>,
}

impl CredentialSlot {
    pub fn provide(&mut self, user: impl Into<String>, password: impl Into<String>) {
        self.value = Some(Credentials {
            user: user.into(),
            password: password.into(),
        });
    }

    #[must_use]
    pub fn take(&mut self) -> Option<Credentials> {
        self.value.take()
    }

    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.value.is_some()
    }
}

type Callback = Box<dyn FnMut()>;
type ErrorCallback = Box<dyn FnMut(Kind, &str)>;
type ProgressCallback = Box<dyn FnMut(u64, Option<u64>)>;
type AuthCallback = Box<dyn FnMut(&mut CredentialSlot)>;

#[derive(Default)]
struct Callbacks {
    header_changed: Option<Callback>,
    ready_to_read: Option<Callback>,
    finished: Option<Callback>,
    finished_with_error: Option<ErrorCallback>,
    upload_progress: Option<ProgressCallback>,
    download_progress: Option<ProgressCallback>,
    authentication_required: Option<AuthCallback>,
    proxy_authentication_required: Option<AuthCallback>,
}

/// Notification kinds emitted by the engine's notify phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplyNotify {
    HeaderChanged,
    ReadyToRead,
    Finished,
    FinishedWithError,
    UploadProgress(u64),
    DownloadProgress,
}

/// Events surfaced to the channel by one parse pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParseEvent {
    HeadersComplete,
    DataReady,
    Finished,
}

struct ReplyState {
    state: ParseState,
    status: u16,
    reason: String,
    version_major: u8,
    version_minor: u8,
    headers: HeaderMap,
    request_method: Method,

    // incremental parse scratch
    line: Vec<u8>,
    pending_header: Option<(String, String)>,

    body_reader: Option<BodyReader>,
    inflater: Option<Inflater>,
    /// Content length captured before auto-decompress strips the header.
    raw_body_length: Option<u64>,

    buffer: VecDeque<Bytes>,
    buffered: usize,
    downloaded: u64,
    uploaded: u64,
    upload_total: Option<u64>,

    connection_close: bool,
    force_close: bool,
    auto_decompress: bool,
    pipelined: bool,
    finished: bool,
    error: Option<Error>,

    channel: Option<usize>,
    callbacks: Callbacks,
}

impl ReplyState {
    fn new(request_method: Method, auto_decompress: bool) -> Self {
        Self {
            state: ParseState::NothingDone,
            status: 0,
            reason: String::new(),
            version_major: 1,
            version_minor: 1,
            headers: HeaderMap::new(),
            request_method,
            line: Vec::new(),
            pending_header: None,
            body_reader: None,
            inflater: None,
            raw_body_length: None,
            buffer: VecDeque::new(),
            buffered: 0,
            downloaded: 0,
            uploaded: 0,
            upload_total: None,
            connection_close: false,
            force_close: false,
            auto_decompress,
            pipelined: false,
            finished: false,
            error: None,
            channel: None,
            callbacks: Callbacks::default(),
        }
    }
}

/// Cloneable handle to one in-flight response.
#[derive(Clone)]
pub struct Reply {
    inner: Rc<RefCell<ReplyState>>,
}

impl Reply {
    pub(crate) fn new(request_method: Method, auto_decompress: bool) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ReplyState::new(
                request_method,
                auto_decompress,
            ))),
        }
    }

    /// Identity comparison for abort/teardown lookups.
    #[must_use]
    pub fn same_reply(&self, other: &Reply) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // --- caller-facing accessors -------------------------------------

    #[must_use]
    pub fn parse_state(&self) -> ParseState {
        self.inner.borrow().state
    }

    /// Status code, 0 until the status line has been read.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.inner.borrow().status
    }

    #[must_use]
    pub fn reason(&self) -> String {
        self.inner.borrow().reason.clone()
    }

    /// `(major, minor)` from the status line.
    #[must_use]
    pub fn version(&self) -> (u8, u8) {
        let state = self.inner.borrow();
        (state.version_major, state.version_minor)
    }

    #[must_use]
    pub fn headers(&self) -> HeaderMap {
        self.inner.borrow().headers.clone()
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        header_str(&self.inner.borrow().headers, name).map(str::to_string)
    }

    /// Declared body length: `None` for chunked or until-close bodies.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        let state = self.inner.borrow();
        match state.body_reader.as_ref().map(BodyReader::mode) {
            Some(LengthMode::Known(n)) => Some(n),
            Some(LengthMode::NoBody) => Some(0),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_chunked(&self) -> bool {
        matches!(
            self.inner.borrow().body_reader.as_ref().map(BodyReader::mode),
            Some(LengthMode::Chunked)
        )
    }

    /// The server mandated (or the parser inferred) that the channel must
    /// close after this reply.
    #[must_use]
    pub fn connection_close(&self) -> bool {
        let state = self.inner.borrow();
        state.connection_close || state.force_close
    }

    #[must_use]
    pub fn is_pipelined(&self) -> bool {
        self.inner.borrow().pipelined
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.borrow().finished
    }

    #[must_use]
    pub fn error_kind(&self) -> Option<Kind> {
        self.inner.borrow().error.as_ref().map(Error::kind)
    }

    #[must_use]
    pub fn bytes_available(&self) -> usize {
        self.inner.borrow().buffered
    }

    /// Drain up to `max` decoded body bytes.
    #[must_use]
    pub fn read(&self, max: usize) -> Bytes {
        let mut state = self.inner.borrow_mut();
        let Some(front) = state.buffer.pop_front() else {
            return Bytes::new();
        };
        if front.len() <= max {
            state.buffered -= front.len();
            front
        } else {
            let out = front.slice(..max);
            let rest = front.slice(max..);
            state.buffer.push_front(rest);
            state.buffered -= max;
            out
        }
    }

    /// Drain the whole buffered body.
    #[must_use]
    pub fn read_all(&self) -> Bytes {
        let mut state = self.inner.borrow_mut();
        let mut out = BytesMut::with_capacity(state.buffered);
        while let Some(chunk) = state.buffer.pop_front() {
            out.extend_from_slice(&chunk);
        }
        state.buffered = 0;
        out.freeze()
    }

    // --- callback registration ---------------------------------------

    pub fn on_header_changed(&self, f: impl FnMut() + 'static) {
        self.inner.borrow_mut().callbacks.header_changed = Some(Box::new(f));
    }

    pub fn on_ready_to_read(&self, f: impl FnMut() + 'static) {
        self.inner.borrow_mut().callbacks.ready_to_read = Some(Box::new(f));
    }

    pub fn on_finished(&self, f: impl FnMut() + 'static) {
        self.inner.borrow_mut().callbacks.finished = Some(Box::new(f));
    }

    pub fn on_finished_with_error(&self, f: impl FnMut(Kind, &str) + 'static) {
        self.inner.borrow_mut().callbacks.finished_with_error = Some(Box::new(f));
    }

    pub fn on_upload_progress(&self, f: impl FnMut(u64, Option<u64>) + 'static) {
        self.inner.borrow_mut().callbacks.upload_progress = Some(Box::new(f));
    }

    pub fn on_download_progress(&self, f: impl FnMut(u64, Option<u64>) + 'static) {
        self.inner.borrow_mut().callbacks.download_progress = Some(Box::new(f));
    }

    pub fn on_authentication_required(&self, f: impl FnMut(&mut CredentialSlot) + 'static) {
        self.inner.borrow_mut().callbacks.authentication_required = Some(Box::new(f));
    }

    pub fn on_proxy_authentication_required(&self, f: impl FnMut(&mut CredentialSlot) + 'static) {
        self.inner.borrow_mut().callbacks.proxy_authentication_required = Some(Box::new(f));
    }

    // --- engine-facing plumbing --------------------------------------

    pub(crate) fn set_channel(&self, channel: usize) {
        self.inner.borrow_mut().channel = Some(channel);
    }

    pub(crate) fn clear_channel(&self) {
        self.inner.borrow_mut().channel = None;
    }

    pub(crate) fn channel(&self) -> Option<usize> {
        self.inner.borrow().channel
    }

    pub(crate) fn set_pipelined(&self, pipelined: bool) {
        self.inner.borrow_mut().pipelined = pipelined;
    }

    pub(crate) fn set_upload_total(&self, total: Option<u64>) {
        self.inner.borrow_mut().upload_total = total;
    }

    pub(crate) fn add_uploaded(&self, n: u64) -> u64 {
        let mut state = self.inner.borrow_mut();
        state.uploaded += n;
        state.uploaded
    }

    /// Reset parser state so the exchange can be replayed on a fresh
    /// transport after a mid-flight disconnect.
    pub(crate) fn reset_for_resend(&self) {
        let mut state = self.inner.borrow_mut();
        state.state = ParseState::NothingDone;
        state.status = 0;
        state.reason.clear();
        state.headers = HeaderMap::new();
        state.line.clear();
        state.pending_header = None;
        state.body_reader = None;
        state.inflater = None;
        state.raw_body_length = None;
        state.buffer.clear();
        state.buffered = 0;
        state.downloaded = 0;
        state.uploaded = 0;
        state.connection_close = false;
        state.force_close = false;
        state.finished = false;
        state.error = None;
        state.channel = None;
    }

    /// Mark terminally failed. Buffered body bytes stay readable (some
    /// servers send content alongside 401/407).
    pub(crate) fn fail(&self, error: Error) {
        let mut state = self.inner.borrow_mut();
        // First failure wins; a reply that already carries an error is
        // not re-failed by teardown paths.
        if state.error.is_some() {
            return;
        }
        state.finished = true;
        state.state = ParseState::AllDone;
        state.error = Some(error);
    }

    /// Complete a pre-connect reply: the transport is warm, nothing was
    /// sent.
    pub(crate) fn finish_connect_only(&self) {
        let mut state = self.inner.borrow_mut();
        state.finished = true;
        state.state = ParseState::AllDone;
    }

    // --- incremental parsing -----------------------------------------

    /// Feed bytes from the channel's receive buffer. Consumes only what
    /// belongs to this reply; pipelined successors' bytes are left in
    /// `input`.
    pub(crate) fn receive(
        &self,
        input: &mut BytesMut,
        max_read: usize,
    ) -> Result<Vec<ParseEvent>, Error> {
        let mut events = Vec::new();
        let mut state = self.inner.borrow_mut();

        loop {
            match state.state {
                ParseState::NothingDone => {
                    state.state = ParseState::ReadingStatus;
                }
                ParseState::ReadingStatus => {
                    // Whitespace left over from the tail of a previous
                    // pipelined response is discarded.
                    if state.line.is_empty() {
                        while input
                            .first()
                            .is_some_and(|&b| matches!(b, b'\r' | b'\n' | b' ' | b'\t'))
                        {
                            let _ = input.split_to(1);
                        }
                    }
                    let Some(line) = take_line(&mut state.line, input) else {
                        break;
                    };
                    parse_status_line(&line, &mut state)?;
                    state.state = ParseState::ReadingHeader;
                }
                ParseState::ReadingHeader => {
                    let Some(line) = take_line(&mut state.line, input) else {
                        break;
                    };
                    if line.is_empty() {
                        finish_pending_header(&mut state)?;
                        if state.status == 100 {
                            // Informational continue: discard and restart.
                            state.headers = HeaderMap::new();
                            state.status = 0;
                            state.reason.clear();
                            state.state = ParseState::ReadingStatus;
                            continue;
                        }
                        self.headers_complete(&mut state)?;
                        events.push(ParseEvent::HeadersComplete);
                        if state
                            .body_reader
                            .as_ref()
                            .is_some_and(BodyReader::is_done)
                        {
                            self.complete(&mut state)?;
                            events.push(ParseEvent::Finished);
                            break;
                        }
                        state.state = ParseState::ReadingData;
                    } else {
                        accumulate_header_line(&line, &mut state)?;
                    }
                }
                ParseState::ReadingData => {
                    let reader = state
                        .body_reader
                        .as_mut()
                        .expect("body reader exists in ReadingData");
                    let progress = reader.read(input, max_read)?;
                    let done = progress.done;
                    if reader.force_close() {
                        state.force_close = true;
                    }
                    if !progress.data.is_empty() {
                        let decoded = match state.inflater.as_mut() {
                            Some(inflater) => inflater.feed(&progress.data)?,
                            None => progress.data,
                        };
                        if !decoded.is_empty() {
                            append_body(&mut state, decoded);
                            events.push(ParseEvent::DataReady);
                        }
                    }
                    if done {
                        self.complete(&mut state)?;
                        if state.buffered > 0 && !events.contains(&ParseEvent::DataReady) {
                            events.push(ParseEvent::DataReady);
                        }
                        events.push(ParseEvent::Finished);
                    }
                    break;
                }
                ParseState::AllDone => break,
            }
            if input.is_empty() && state.state != ParseState::NothingDone {
                break;
            }
        }

        Ok(events)
    }

    /// The transport hit EOF while this reply was current.
    pub(crate) fn transport_eof(&self) -> Result<Vec<ParseEvent>, Error> {
        let mut state = self.inner.borrow_mut();
        match state.state {
            ParseState::AllDone => Ok(Vec::new()),
            ParseState::ReadingData => {
                let reader = state
                    .body_reader
                    .as_mut()
                    .expect("body reader exists in ReadingData");
                reader.on_eof()?;
                self.complete(&mut state)?;
                let mut events = Vec::new();
                if state.buffered > 0 {
                    events.push(ParseEvent::DataReady);
                }
                events.push(ParseEvent::Finished);
                Ok(events)
            }
            // EOF before or inside the header block is always premature.
            _ => Err(error::premature_eof()),
        }
    }

    fn headers_complete(&self, state: &mut ReplyState) -> Result<(), Error> {
        let chunked = header_contains_token(&state.headers, "transfer-encoding", "chunked");

        let explicit_close = header_contains_token(&state.headers, "connection", "close")
            || header_contains_token(&state.headers, "proxy-connection", "close");
        let explicit_keep_alive = header_contains_token(&state.headers, "connection", "keep-alive")
            || header_contains_token(&state.headers, "proxy-connection", "keep-alive");
        state.connection_close =
            explicit_close || (state.version_minor == 0 && !explicit_keep_alive);

        let content_length = header_str(&state.headers, "content-length")
            .and_then(|v| v.trim().parse::<u64>().ok());

        if state.auto_decompress {
            if let Some(coding) = ContentCoding::from_headers(&state.headers) {
                // The declared length frames the compressed stream; the
                // header would misstate the decoded size, so strip it but
                // keep the raw length for framing.
                state.raw_body_length = content_length;
                state.headers.remove(http::header::CONTENT_LENGTH);
                state.inflater = Some(Inflater::new(coding));
            }
        }

        let no_body_status = matches!(state.status, 100..=199 | 204 | 304);
        let mode = if no_body_status || state.request_method == Method::HEAD {
            LengthMode::NoBody
        } else if chunked {
            LengthMode::Chunked
        } else if let Some(n) = state.raw_body_length.or(content_length) {
            if n == 0 {
                LengthMode::NoBody
            } else {
                LengthMode::Known(n)
            }
        } else {
            LengthMode::UntilClose
        };

        tracing::trace!(
            status = state.status,
            ?mode,
            close = state.connection_close,
            "response headers complete"
        );
        state.body_reader = Some(BodyReader::new(mode));
        Ok(())
    }

    fn complete(&self, state: &mut ReplyState) -> Result<(), Error> {
        if let Some(mut inflater) = state.inflater.take() {
            let tail = inflater.finish()?;
            if !tail.is_empty() {
                append_body(state, tail);
            }
        }
        state.state = ParseState::AllDone;
        state.finished = true;
        Ok(())
    }

    // --- notification phase ------------------------------------------

    /// Invoke a registered callback. Must be called with no outstanding
    /// borrows of engine or reply state; callbacks may re-enter both.
    pub(crate) fn notify(&self, kind: ReplyNotify) {
        match kind {
            ReplyNotify::HeaderChanged => {
                let mut cb = self.inner.borrow_mut().callbacks.header_changed.take();
                if let Some(f) = cb.as_mut() {
                    f();
                }
                let mut state = self.inner.borrow_mut();
                if state.callbacks.header_changed.is_none() {
                    state.callbacks.header_changed = cb;
                }
            }
            ReplyNotify::ReadyToRead => {
                let mut cb = self.inner.borrow_mut().callbacks.ready_to_read.take();
                if let Some(f) = cb.as_mut() {
                    f();
                }
                let mut state = self.inner.borrow_mut();
                if state.callbacks.ready_to_read.is_none() {
                    state.callbacks.ready_to_read = cb;
                }
            }
            ReplyNotify::Finished => {
                let mut cb = self.inner.borrow_mut().callbacks.finished.take();
                if let Some(f) = cb.as_mut() {
                    f();
                }
                let mut state = self.inner.borrow_mut();
                if state.callbacks.finished.is_none() {
                    state.callbacks.finished = cb;
                }
            }
            ReplyNotify::FinishedWithError => {
                let (kind, message) = {
                    let state = self.inner.borrow();
                    match state.error.as_ref() {
                        Some(err) => (err.kind(), err.to_string()),
                        None => return,
                    }
                };
                let mut cb = self.inner.borrow_mut().callbacks.finished_with_error.take();
                if let Some(f) = cb.as_mut() {
                    f(kind, &message);
                }
                let mut state = self.inner.borrow_mut();
                if state.callbacks.finished_with_error.is_none() {
                    state.callbacks.finished_with_error = cb;
                }
            }
            ReplyNotify::UploadProgress(sent) => {
                let total = self.inner.borrow().upload_total;
                let mut cb = self.inner.borrow_mut().callbacks.upload_progress.take();
                if let Some(f) = cb.as_mut() {
                    f(sent, total);
                }
                let mut state = self.inner.borrow_mut();
                if state.callbacks.upload_progress.is_none() {
                    state.callbacks.upload_progress = cb;
                }
            }
            ReplyNotify::DownloadProgress => {
                let (done, total) = {
                    let state = self.inner.borrow();
                    let total = state.body_reader.as_ref().and_then(|r| match r.mode() {
                        LengthMode::Known(n) => Some(n),
                        _ => None,
                    });
                    (state.downloaded, total)
                };
                let mut cb = self.inner.borrow_mut().callbacks.download_progress.take();
                if let Some(f) = cb.as_mut() {
                    f(done, total);
                }
                let mut state = self.inner.borrow_mut();
                if state.callbacks.download_progress.is_none() {
                    state.callbacks.download_progress = cb;
                }
            }
        }
    }

    /// Run the (proxy-)authentication callback against a fresh slot.
    pub(crate) fn ask_credentials(&self, proxy: bool) -> Option<Credentials> {
        let mut slot = CredentialSlot::default();
        let mut cb = {
            let mut state = self.inner.borrow_mut();
            if proxy {
                state.callbacks.proxy_authentication_required.take()
            } else {
                state.callbacks.authentication_required.take()
            }
        };
        if let Some(f) = cb.as_mut() {
            f(&mut slot);
        }
        {
            let mut state = self.inner.borrow_mut();
            let dest = if proxy {
                &mut state.callbacks.proxy_authentication_required
            } else {
                &mut state.callbacks.authentication_required
            };
            if dest.is_none() {
                *dest = cb;
            }
        }
        slot.take()
    }

}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("Reply")
            .field("state", &state.state)
            .field("status", &state.status)
            .field("buffered", &state.buffered)
            .field("finished", &state.finished)
            .finish()
    }
}

fn append_body(state: &mut ReplyState, data: Vec<u8>) {
    debug_assert!(state.state != ParseState::AllDone);
    state.buffered += data.len();
    state.downloaded += data.len() as u64;
    state.buffer.push_back(Bytes::from(data));
}

/// Accumulate bytes into `scratch` until a line terminator (CRLF or bare
/// LF); returns the completed line without its terminator.
fn take_line(scratch: &mut Vec<u8>, input: &mut BytesMut) -> Option<Vec<u8>> {
    match input.iter().position(|&b| b == b'\n') {
        Some(lf) => {
            scratch.extend_from_slice(&input.split_to(lf + 1));
            let mut line = std::mem::take(scratch);
            line.pop(); // LF
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            Some(line)
        }
        None => {
            scratch.extend_from_slice(&input.split_to(input.len()));
            None
        }
    }
}

fn parse_status_line(line: &[u8], state: &mut ReplyState) -> Result<(), Error> {
    let text = std::str::from_utf8(line)
        .map_err(|_| error::malformed_status_line(String::from_utf8_lossy(line).into_owned()))?;
    let malformed = || error::malformed_status_line(text.to_string());

    let rest = text.strip_prefix("HTTP/").ok_or_else(malformed)?;
    let bytes = rest.as_bytes();
    if bytes.len() < 3 || !bytes[0].is_ascii_digit() || bytes[1] != b'.' || !bytes[2].is_ascii_digit()
    {
        return Err(malformed());
    }
    state.version_major = bytes[0] - b'0';
    state.version_minor = bytes[2] - b'0';

    let after_version = &rest[3..];
    let after_version = after_version.strip_prefix(' ').ok_or_else(malformed)?;
    if after_version.len() < 3 || !after_version.as_bytes()[..3].iter().all(u8::is_ascii_digit) {
        return Err(malformed());
    }
    state.status = after_version[..3].parse().map_err(|_| malformed())?;

    state.reason = match after_version.as_bytes().get(3) {
        None => String::new(),
        Some(b' ') => after_version[4..].to_string(),
        Some(_) => return Err(malformed()),
    };

    tracing::trace!(status = state.status, reason = %state.reason, "status line");
    Ok(())
}

/// One header line: either a continuation (leading space/tab, folded into
/// the previous value with a single space) or a fresh `name: value` pair.
fn accumulate_header_line(line: &[u8], state: &mut ReplyState) -> Result<(), Error> {
    let text = std::str::from_utf8(line)
        .map_err(|_| error::malformed_header(String::from_utf8_lossy(line).into_owned()))?;

    if text.starts_with(' ') || text.starts_with('\t') {
        match state.pending_header.as_mut() {
            Some((_, value)) => {
                value.push(' ');
                value.push_str(text.trim());
                return Ok(());
            }
            None => return Err(error::malformed_header(text.to_string())),
        }
    }

    finish_pending_header(state)?;

    let colon = text
        .find(':')
        .ok_or_else(|| error::malformed_header(text.to_string()))?;
    let name = text[..colon].trim().to_string();
    let value = text[colon + 1..].trim().to_string();
    if name.is_empty() {
        return Err(error::malformed_header(text.to_string()));
    }
    state.pending_header = Some((name, value));
    Ok(())
}

fn finish_pending_header(state: &mut ReplyState) -> Result<(), Error> {
    let Some((name, value)) = state.pending_header.take() else {
        return Ok(());
    };
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| error::malformed_header(name.clone()))?;
    let value =
        HeaderValue::from_str(&value).map_err(|_| error::malformed_header(value.clone()))?;
    state.headers.append(name, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(reply: &Reply, bytes: &[u8]) -> Result<Vec<ParseEvent>, Error> {
        let mut input = BytesMut::from(bytes);
        reply.receive(&mut input, usize::MAX)
    }

    #[test]
    fn simple_response_with_content_length() {
        let reply = Reply::new(Method::GET, true);
        let events = feed(
            &reply,
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello",
        )
        .unwrap();
        assert!(events.contains(&ParseEvent::HeadersComplete));
        assert!(events.contains(&ParseEvent::Finished));
        assert_eq!(reply.status(), 200);
        assert_eq!(reply.reason(), "OK");
        assert_eq!(reply.version(), (1, 1));
        assert_eq!(reply.content_length(), Some(5));
        assert_eq!(reply.parse_state(), ParseState::AllDone);
        assert_eq!(&reply.read_all()[..], b"hello");
        assert_eq!(reply.bytes_available(), 0);
    }

    #[test]
    fn exact_length_no_overread() {
        let reply = Reply::new(Method::GET, true);
        let mut input = BytesMut::from(
            &b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabcHTTP/1.1 204 No Content\r\n"[..],
        );
        let events = reply.receive(&mut input, usize::MAX).unwrap();
        assert!(events.contains(&ParseEvent::Finished));
        assert_eq!(&reply.read_all()[..], b"abc");
        // Next pipelined response's bytes stay put.
        assert!(input.starts_with(b"HTTP/1.1 204"));
    }

    #[test]
    fn chunked_round_trip() {
        let reply = Reply::new(Method::GET, true);
        let events = feed(
            &reply,
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
        )
        .unwrap();
        assert!(events.contains(&ParseEvent::Finished));
        assert!(reply.is_chunked());
        assert_eq!(&reply.read_all()[..], b"hello");
        assert_eq!(reply.parse_state(), ParseState::AllDone);
    }

    #[test]
    fn byte_at_a_time_parsing() {
        let reply = Reply::new(Method::GET, true);
        let raw = b"HTTP/1.1 404 Not Found\r\nContent-Length: 2\r\nX-A: b\r\n\r\nno";
        let mut finished = false;
        for &byte in raw.iter() {
            let events = feed(&reply, &[byte]).unwrap();
            finished |= events.contains(&ParseEvent::Finished);
        }
        assert!(finished);
        assert_eq!(reply.status(), 404);
        assert_eq!(reply.header("x-a").as_deref(), Some("b"));
        assert_eq!(&reply.read_all()[..], b"no");
    }

    #[test]
    fn malformed_status_line_is_fatal() {
        let reply = Reply::new(Method::GET, true);
        assert!(feed(&reply, b"HTP/1.1 200 OK\r\n").is_err());

        let reply = Reply::new(Method::GET, true);
        assert!(feed(&reply, b"HTTP/1.1 2x0 OK\r\n").is_err());
    }

    #[test]
    fn status_without_reason_is_accepted() {
        let reply = Reply::new(Method::GET, true);
        feed(&reply, b"HTTP/1.1 204\r\n\r\n").unwrap();
        assert_eq!(reply.status(), 204);
        assert_eq!(reply.reason(), "");
        assert!(reply.is_finished());
    }

    #[test]
    fn informational_continue_is_discarded() {
        let reply = Reply::new(Method::GET, true);
        let events = feed(
            &reply,
            b"HTTP/1.1 100 Continue\r\nX-Skip: 1\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok",
        )
        .unwrap();
        assert!(events.contains(&ParseEvent::Finished));
        assert_eq!(reply.status(), 200);
        assert!(reply.header("x-skip").is_none());
        assert_eq!(&reply.read_all()[..], b"ok");
    }

    #[test]
    fn folded_header_lines_join_with_single_space() {
        let reply = Reply::new(Method::GET, true);
        feed(
            &reply,
            b"HTTP/1.1 200 OK\r\nX-Long: first\r\n  second\r\n\tthird\r\nContent-Length: 0\r\n\r\n",
        )
        .unwrap();
        assert_eq!(
            reply.header("x-long").as_deref(),
            Some("first second third")
        );
    }

    #[test]
    fn lf_only_terminators_accepted() {
        let reply = Reply::new(Method::GET, true);
        let events = feed(&reply, b"HTTP/1.0 200 OK\nContent-Length: 2\n\nhi").unwrap();
        assert!(events.contains(&ParseEvent::Finished));
        assert_eq!(&reply.read_all()[..], b"hi");
    }

    #[test]
    fn http10_implies_connection_close() {
        let reply = Reply::new(Method::GET, true);
        feed(&reply, b"HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n").unwrap();
        assert!(reply.connection_close());

        let reply = Reply::new(Method::GET, true);
        feed(
            &reply,
            b"HTTP/1.0 200 OK\r\nConnection: keep-alive\r\nContent-Length: 0\r\n\r\n",
        )
        .unwrap();
        assert!(!reply.connection_close());
    }

    #[test]
    fn head_response_has_no_body() {
        let reply = Reply::new(Method::HEAD, true);
        let events = feed(
            &reply,
            b"HTTP/1.1 200 OK\r\nContent-Length: 4242\r\n\r\n",
        )
        .unwrap();
        assert!(events.contains(&ParseEvent::Finished));
        assert_eq!(reply.bytes_available(), 0);
    }

    #[test]
    fn status_204_and_304_have_no_body() {
        for status in ["204 No Content", "304 Not Modified"] {
            let reply = Reply::new(Method::GET, true);
            let raw = format!("HTTP/1.1 {status}\r\n\r\n");
            let events = feed(&reply, raw.as_bytes()).unwrap();
            assert!(events.contains(&ParseEvent::Finished), "{status}");
        }
    }

    #[test]
    fn until_close_body_finishes_on_eof() {
        let reply = Reply::new(Method::GET, true);
        feed(&reply, b"HTTP/1.1 200 OK\r\n\r\nsome data").unwrap();
        assert!(!reply.is_finished());
        let events = reply.transport_eof().unwrap();
        assert!(events.contains(&ParseEvent::Finished));
        assert_eq!(&reply.read_all()[..], b"some data");
    }

    #[test]
    fn eof_inside_headers_is_premature() {
        let reply = Reply::new(Method::GET, true);
        feed(&reply, b"HTTP/1.1 200 OK\r\nContent-").unwrap();
        assert!(reply.transport_eof().is_err());
    }

    #[test]
    fn gzip_body_is_decoded_and_content_length_stripped() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"decompressed payload").unwrap();
        let compressed = enc.finish().unwrap();

        let reply = Reply::new(Method::GET, true);
        let mut raw = format!(
            "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
            compressed.len()
        )
        .into_bytes();
        raw.extend_from_slice(&compressed);

        let events = feed(&reply, &raw).unwrap();
        assert!(events.contains(&ParseEvent::Finished));
        assert!(reply.header("content-length").is_none());
        assert_eq!(&reply.read_all()[..], b"decompressed payload");
    }

    #[test]
    fn leading_whitespace_before_status_is_discarded() {
        let reply = Reply::new(Method::GET, true);
        let events = feed(
            &reply,
            b"\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n",
        )
        .unwrap();
        assert!(events.contains(&ParseEvent::Finished));
        assert_eq!(reply.status(), 200);
    }

    #[test]
    fn read_respects_max_and_preserves_rest() {
        let reply = Reply::new(Method::GET, true);
        feed(&reply, b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\nabcdef").unwrap();
        assert_eq!(&reply.read(4)[..], b"abcd");
        assert_eq!(reply.bytes_available(), 2);
        assert_eq!(&reply.read(4)[..], b"ef");
    }

    #[test]
    fn failed_reply_keeps_buffered_body_readable() {
        let reply = Reply::new(Method::GET, true);
        feed(
            &reply,
            b"HTTP/1.1 401 Unauthorized\r\nContent-Length: 9\r\n\r\nforbidden",
        )
        .unwrap();
        reply.fail(crate::error::authentication_required());
        assert_eq!(reply.error_kind(), Some(Kind::AuthenticationRequired));
        assert_eq!(&reply.read_all()[..], b"forbidden");
    }
}
