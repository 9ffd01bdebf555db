//! Dual-stack connection racing.

mod common;

use std::time::{Duration, Instant};

use common::*;
use tether_client::dns::AddressFamily;
use tether_client::Request;
use url::Url;

fn get(path: &str) -> Request {
    Request::get(Url::parse(&format!("http://example.com{path}")).unwrap())
}

#[test]
fn preferred_family_winning_cancels_the_race() {
    let start = Instant::now();
    let (connection, transports) = manual_connection(vec![v6(), v4(1)], Default::default());

    let reply = connection.send_request(get("/"));
    settle_at(&connection, start);

    // Only the preferred family (IPv6 by default) has started.
    assert_eq!(transports.created(), 1);
    assert_eq!(transports.handle(0).family(), AddressFamily::V6);

    transports.handle(0).connect_now();
    settle_at(&connection, start);
    assert_eq!(connection.network_family(), Some(AddressFamily::V6));

    // Long after the delay, the losing family must never be attempted.
    settle_at(&connection, start + Duration::from_secs(2));
    assert_eq!(transports.created(), 1);

    transports.handle(0).push_response(&ok_response("v6 wins"));
    settle_at(&connection, start + Duration::from_secs(2));
    assert!(reply.is_finished());
    assert_eq!(&reply.read_all()[..], b"v6 wins");
}

#[test]
fn delayed_family_starts_after_300ms_and_can_win() {
    let start = Instant::now();
    let (connection, transports) = manual_connection(vec![v6(), v4(1)], Default::default());

    let reply = connection.send_request(get("/"));
    settle_at(&connection, start);
    assert_eq!(transports.created(), 1);

    // Preferred family dawdles; the timer starts the other family.
    settle_at(&connection, start + Duration::from_millis(350));
    assert_eq!(transports.created(), 2);
    assert_eq!(transports.handle(1).family(), AddressFamily::V4);

    transports.handle(1).connect_now();
    settle_at(&connection, start + Duration::from_millis(400));

    // Exactly one channel wins; the loser is closed and never carries a
    // request.
    assert_eq!(connection.network_family(), Some(AddressFamily::V4));
    assert!(transports.handle(0).engine_closed());
    assert!(transports.handle(0).written_text().is_empty());
    assert!(transports.handle(1).written_text().starts_with("GET / "));

    transports.handle(1).push_response(&ok_response("v4 wins"));
    settle_at(&connection, start + Duration::from_millis(450));
    assert!(reply.is_finished());
}

#[test]
fn refused_preferred_family_races_the_other_immediately() {
    let start = Instant::now();
    let (connection, transports) = manual_connection(vec![v6(), v4(1)], Default::default());

    let reply = connection.send_request(get("/"));
    settle_at(&connection, start);
    assert_eq!(transports.created(), 1);

    // IPv6 refused well before the 300ms delay elapses.
    transports.handle(0).refuse();
    settle_at(&connection, start + Duration::from_millis(10));

    assert_eq!(transports.created(), 2);
    assert_eq!(transports.handle(1).family(), AddressFamily::V4);

    transports.handle(1).connect_now();
    transports.handle(1).push_response(&ok_response("fallback"));
    settle_at(&connection, start + Duration::from_millis(20));

    assert_eq!(connection.network_family(), Some(AddressFamily::V4));
    assert!(reply.is_finished());
    assert_eq!(&reply.read_all()[..], b"fallback");
}

#[test]
fn single_family_hosts_skip_the_race() {
    let start = Instant::now();
    let (connection, transports) = manual_connection(vec![v4(1), v4(2)], Default::default());

    connection.send_request(get("/"));
    settle_at(&connection, start);

    assert_eq!(transports.created(), 1);
    assert_eq!(transports.handle(0).family(), AddressFamily::V4);
    // No delayed-race timer: nothing else starts later.
    settle_at(&connection, start + Duration::from_secs(1));
    assert_eq!(transports.created(), 1);
    assert_eq!(connection.network_family(), Some(AddressFamily::V4));
}

#[test]
fn connect_falls_back_across_addresses_within_a_family() {
    let start = Instant::now();
    let (connection, transports) = manual_connection(vec![v4(1), v4(2)], Default::default());

    let reply = connection.send_request(get("/"));
    settle_at(&connection, start);
    assert_eq!(transports.created(), 1);
    assert_eq!(transports.handle(0).addr(), v4(1));

    transports.handle(0).refuse();
    settle_at(&connection, start);
    assert_eq!(transports.created(), 2);
    assert_eq!(transports.handle(1).addr(), v4(2));

    transports.handle(1).connect_now();
    transports.handle(1).push_response(&ok_response("second addr"));
    settle_at(&connection, start);
    assert!(reply.is_finished());
    assert_eq!(&reply.read_all()[..], b"second addr");
}

#[test]
fn exhausted_addresses_fail_queued_requests() {
    let start = Instant::now();
    let (connection, transports) = manual_connection(vec![v4(1)], Default::default());

    let reply = connection.send_request(get("/"));
    settle_at(&connection, start);
    transports.handle(0).refuse();
    settle_at(&connection, start);

    assert!(reply.is_finished());
    assert!(matches!(
        reply.error_kind(),
        Some(tether_client::Kind::Transport(_))
    ));
}
