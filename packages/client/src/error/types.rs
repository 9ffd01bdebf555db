use std::error::Error as StdError;
use std::fmt;

/// A Result alias where the Err case is `tether_client::Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents errors that can occur while driving requests over a
/// connection.
pub struct Error {
    inner: Box<Inner>,
}

struct Inner {
    kind: Kind,
    message: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

/// Failure taxonomy for the connection engine.
///
/// Every terminal per-reply failure resolves to one of these kinds; there
/// are no process-fatal conditions in this component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Transport-level fault (connect, refused, timeout, closed).
    Transport(TransportCause),
    /// The peer sent bytes that do not parse as HTTP/1.x.
    Protocol(ParseCause),
    /// A 401 challenge was not satisfied by the caller.
    AuthenticationRequired,
    /// A 407 challenge was not satisfied by the caller.
    ProxyAuthenticationRequired,
    /// The request body could not be re-read for a retry.
    ContentResend,
    /// The inflate stream rejected the response body.
    Decompression,
    /// Catch-all for faults with no better classification.
    Unknown,
}

/// What went wrong at the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCause {
    ConnectFailed,
    ConnectionRefused,
    Timeout,
    RemoteClosed,
    WriteIncomplete,
}

/// What the response parser choked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseCause {
    MalformedStatusLine,
    MalformedHeader,
    MalformedChunkFraming,
    PrematureEof,
}

impl Error {
    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(Inner {
                kind,
                message: None,
                source: None,
            }),
        }
    }

    pub(crate) fn with_message(mut self, message: impl Into<String>) -> Error {
        self.inner.message = Some(message.into());
        self
    }

    #[must_use = "Error builder methods return a new Error and should be used"]
    pub fn with<E: Into<Box<dyn StdError + Send + Sync>>>(mut self, source: E) -> Error {
        self.inner.source = Some(source.into());
        self
    }

    /// The failure class of this error.
    #[must_use]
    pub fn kind(&self) -> Kind {
        self.inner.kind
    }

    /// Extra human-readable detail, when the failure site supplied one.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.inner.message.as_deref()
    }

    /// True for transport faults; these are the only faults the engine
    /// retries locally while a reconnect budget remains.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self.inner.kind, Kind::Transport(_))
    }

    /// True when the error came out of the response parser. Parse faults
    /// are protocol violations and are never retried.
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(self.inner.kind, Kind::Protocol(_))
    }

    /// True when the failure is an unsatisfied 401/407 challenge.
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(
            self.inner.kind,
            Kind::AuthenticationRequired | Kind::ProxyAuthenticationRequired
        )
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("tether_client::Error");

        f.field("kind", &self.inner.kind);

        if let Some(ref message) = self.inner.message {
            f.field("message", message);
        }

        if let Some(ref source) = self.inner.source {
            f.field("source", source);
        }

        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.kind {
            Kind::Transport(TransportCause::ConnectFailed) => {
                f.write_str("error connecting to host")?
            }
            Kind::Transport(TransportCause::ConnectionRefused) => {
                f.write_str("connection refused")?
            }
            Kind::Transport(TransportCause::Timeout) => f.write_str("network operation timed out")?,
            Kind::Transport(TransportCause::RemoteClosed) => {
                f.write_str("remote host closed the connection")?
            }
            Kind::Transport(TransportCause::WriteIncomplete) => {
                f.write_str("request body was not written completely")?
            }
            Kind::Protocol(ParseCause::MalformedStatusLine) => {
                f.write_str("malformed HTTP status line")?
            }
            Kind::Protocol(ParseCause::MalformedHeader) => f.write_str("malformed HTTP header")?,
            Kind::Protocol(ParseCause::MalformedChunkFraming) => {
                f.write_str("malformed chunked transfer framing")?
            }
            Kind::Protocol(ParseCause::PrematureEof) => {
                f.write_str("connection closed before the response was complete")?
            }
            Kind::AuthenticationRequired => f.write_str("host requires authentication")?,
            Kind::ProxyAuthenticationRequired => f.write_str("proxy requires authentication")?,
            Kind::ContentResend => {
                f.write_str("request body could not be re-read for a retry")?
            }
            Kind::Decompression => f.write_str("error decompressing response body")?,
            Kind::Unknown => f.write_str("unknown network error")?,
        }

        if let Some(ref message) = self.inner.message {
            write!(f, ": {message}")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .source
            .as_ref()
            .map(|err| &**err as &(dyn StdError + 'static))
    }
}
