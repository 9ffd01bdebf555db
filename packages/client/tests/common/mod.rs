//! Shared harness for engine integration tests: scripted transports, a
//! canned resolver, and drive helpers.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Instant;

use tether_client::testing::{FactoryHandle, ManualResolver, MockTransportFactory};
use tether_client::{Connection, EngineConfig};

pub fn v4(last: u8) -> SocketAddr {
    format!("192.0.2.{last}:80").parse().unwrap()
}

pub fn v6() -> SocketAddr {
    "[2001:db8::1]:80".parse().unwrap()
}

/// Connection over auto-connecting mock transports.
pub fn connection(addrs: Vec<SocketAddr>, config: EngineConfig) -> (Connection, FactoryHandle) {
    let (factory, handle) = MockTransportFactory::auto_connecting();
    let connection = Connection::with_transport(
        "example.com",
        80,
        false,
        config,
        Box::new(ManualResolver::returning(addrs)),
        Box::new(factory),
    );
    (connection, handle)
}

/// Connection whose transports stay `Connecting` until scripted.
pub fn manual_connection(
    addrs: Vec<SocketAddr>,
    config: EngineConfig,
) -> (Connection, FactoryHandle) {
    let (factory, handle) = MockTransportFactory::manual();
    let connection = Connection::with_transport(
        "example.com",
        80,
        false,
        config,
        Box::new(ManualResolver::returning(addrs)),
        Box::new(factory),
    );
    (connection, handle)
}

pub fn single_channel_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.connection.channel_count = 1;
    config
}

/// Drive until the engine settles; a handful of passes covers connect,
/// write, and parse hops.
pub fn settle(connection: &Connection) {
    for _ in 0..8 {
        connection.drive(Instant::now());
    }
}

pub fn settle_at(connection: &Connection, now: Instant) {
    for _ in 0..8 {
        connection.drive(now);
    }
}

pub fn ok_response(body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

/// Count occurrences of a request line in a channel's captured writes.
pub fn count_requests(written: &str, line_start: &str) -> usize {
    written
        .lines()
        .filter(|line| line.starts_with(line_start))
        .count()
}
