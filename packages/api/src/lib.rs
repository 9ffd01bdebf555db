//! # Tether public API
//!
//! Fluent request construction on top of the `tether_client` HTTP/1.1
//! connection engine. Build a [`RequestBuilder`], point it at a
//! [`Connection`], and drive the connection to completion.
//!
//! ```no_run
//! use tether::{Connection, Tether};
//!
//! let connection = Connection::new("example.com", 80, false);
//! let reply = Tether::get("http://example.com/")
//!     .header("accept", "text/html")
//!     .high_priority()
//!     .send(&connection)
//!     .expect("valid url");
//! ```

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod builder;

pub use builder::RequestBuilder;

// Re-export the engine's caller-facing surface.
pub use tether_client::{
    ByteSource, BytesSource, ChannelState, Connection, ConnectionStats, CredentialSlot,
    Credentials, EngineConfig, Error, Kind, ParseState, Priority, ProxySettings, Reply, Request,
    Result, StatsSnapshot,
};

/// Entry point with static builder shorthands.
pub struct Tether;

impl Tether {
    /// Builder for a GET request.
    #[must_use]
    pub fn get(url: &str) -> RequestBuilder {
        RequestBuilder::new(http::Method::GET, url)
    }

    /// Builder for a HEAD request.
    #[must_use]
    pub fn head(url: &str) -> RequestBuilder {
        RequestBuilder::new(http::Method::HEAD, url)
    }

    /// Builder for a POST request.
    #[must_use]
    pub fn post(url: &str) -> RequestBuilder {
        RequestBuilder::new(http::Method::POST, url)
    }

    /// Builder for a PUT request.
    #[must_use]
    pub fn put(url: &str) -> RequestBuilder {
        RequestBuilder::new(http::Method::PUT, url)
    }

    /// Builder for a DELETE request.
    #[must_use]
    pub fn delete(url: &str) -> RequestBuilder {
        RequestBuilder::new(http::Method::DELETE, url)
    }

    /// Builder for an arbitrary method.
    #[must_use]
    pub fn request(method: http::Method, url: &str) -> RequestBuilder {
        RequestBuilder::new(method, url)
    }
}
