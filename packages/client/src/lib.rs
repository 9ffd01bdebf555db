//! # Tether HTTP/1.1 connection engine
//!
//! A bounded pool of transports ("channels") to one origin, a prioritized
//! queue of requests multiplexed over them, incremental response parsing
//! off the wire, and the policies that make HTTP/1.1 clients survive the
//! real world: pipelining heuristics, reconnect-and-resend on mid-stream
//! disconnects, 401/407 challenge handling, and dual-stack connection
//! racing.
//!
//! ## Design
//!
//! The engine is single-threaded and cooperative. One logical thread owns
//! a [`Connection`] and everything under it; suspension points are socket
//! readiness, timers, and explicitly posted continuations drained by
//! [`Connection::drive`]. Caller callbacks are only ever invoked between
//! engine passes, so a callback may safely re-enter the connection.
//!
//! ## Usage
//!
//! ```no_run
//! use std::time::Instant;
//! use tether_client::{Connection, Request};
//! use url::Url;
//!
//! let connection = Connection::new("example.com", 80, false);
//! let request = Request::get(Url::parse("http://example.com/").unwrap());
//! let reply = connection.send_request(request);
//! reply.on_finished(|| println!("done"));
//!
//! loop {
//!     connection.drive(Instant::now());
//!     if reply.is_finished() {
//!         break;
//!     }
//!     std::thread::sleep(std::time::Duration::from_millis(5));
//! }
//! println!("{} {}", reply.status(), String::from_utf8_lossy(&reply.read_all()));
//! ```

pub mod auth;
pub mod body;
pub mod config;
pub mod connect;
pub mod connection;
pub mod dns;
pub mod error;
pub mod http;
pub mod protocols;
pub mod proxy;
pub mod stats;
pub mod testing;

pub mod prelude;

pub use crate::body::{ByteSource, BytesSource};
pub use crate::config::EngineConfig;
pub use crate::connection::channel::ChannelState;
pub use crate::connection::Connection;
pub use crate::error::{Error, Kind, Result};
pub use crate::http::reply::{CredentialSlot, Credentials};
pub use crate::http::{ParseState, Priority, Reply, Request};
pub use crate::proxy::ProxySettings;
pub use crate::stats::{ConnectionStats, StatsSnapshot};
