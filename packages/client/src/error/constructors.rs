use super::types::{Error, Kind, ParseCause, TransportCause};

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Connect attempt failed before the transport was established.
pub fn connect_failed<E: Into<BoxError>>(source: E) -> Error {
    Error::new(Kind::Transport(TransportCause::ConnectFailed)).with(source)
}

/// The peer actively refused the connection.
pub fn connection_refused() -> Error {
    Error::new(Kind::Transport(TransportCause::ConnectionRefused))
}

/// A connect or I/O deadline elapsed.
pub fn timeout() -> Error {
    Error::new(Kind::Transport(TransportCause::Timeout))
}

/// The transport disconnected underneath an in-flight exchange.
pub fn remote_closed() -> Error {
    Error::new(Kind::Transport(TransportCause::RemoteClosed))
}

/// Fewer bytes reached the socket than were consumed from the body source.
pub fn write_incomplete() -> Error {
    Error::new(Kind::Transport(TransportCause::WriteIncomplete))
}

/// The status line did not match `HTTP/<d>.<d> <3-digit> <reason>`.
pub fn malformed_status_line(line: impl Into<String>) -> Error {
    Error::new(Kind::Protocol(ParseCause::MalformedStatusLine)).with_message(line)
}

/// A header line could not be split into name and value.
pub fn malformed_header(line: impl Into<String>) -> Error {
    Error::new(Kind::Protocol(ParseCause::MalformedHeader)).with_message(line)
}

/// Chunked framing violated the hex-size/CRLF grammar.
pub fn malformed_chunk_framing() -> Error {
    Error::new(Kind::Protocol(ParseCause::MalformedChunkFraming))
}

/// The transport reported EOF before the declared body length arrived.
pub fn premature_eof() -> Error {
    Error::new(Kind::Protocol(ParseCause::PrematureEof))
}

/// The caller declined to supply credentials for a 401 challenge.
pub fn authentication_required() -> Error {
    Error::new(Kind::AuthenticationRequired)
}

/// The caller declined to supply credentials for a 407 challenge.
pub fn proxy_authentication_required() -> Error {
    Error::new(Kind::ProxyAuthenticationRequired)
}

/// A retry needed the request body again but the source could not rewind.
pub fn content_resend() -> Error {
    Error::new(Kind::ContentResend)
}

/// The inflate stream reported a data error that framing fallback could
/// not recover.
pub fn decompression<E: Into<BoxError>>(source: E) -> Error {
    Error::new(Kind::Decompression).with(source)
}

/// Unclassifiable network failure.
pub fn unknown(message: impl Into<String>) -> Error {
    Error::new(Kind::Unknown).with_message(message)
}
