//! Whole-engine flows: parsing off the wire, reconnect budgets, pause and
//! resume.

mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use common::*;
use tether_client::{ChannelState, Kind, ParseState, Request};
use url::Url;

fn get(path: &str) -> Request {
    Request::get(Url::parse(&format!("http://example.com{path}")).unwrap())
}

#[test]
fn content_length_body_is_delivered_exactly() {
    let (connection, transports) = connection(vec![v4(1)], single_channel_config());

    let reply = connection.send_request(get("/data"));
    settle(&connection);
    transports
        .handle(0)
        .push_response(b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\n\r\nhello world");
    settle(&connection);

    assert_eq!(reply.parse_state(), ParseState::AllDone);
    assert_eq!(reply.content_length(), Some(11));
    assert_eq!(reply.bytes_available(), 11);
    assert_eq!(&reply.read_all()[..], b"hello world");
    assert_eq!(reply.bytes_available(), 0);
}

#[test]
fn chunked_body_is_decoded_off_the_wire() {
    let (connection, transports) = connection(vec![v4(1)], single_channel_config());

    let reply = connection.send_request(get("/chunked"));
    settle(&connection);
    transports.handle(0).push_response(
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
    );
    settle(&connection);

    assert!(reply.is_chunked());
    assert_eq!(&reply.read_all()[..], b"hello");
    assert_eq!(reply.parse_state(), ParseState::AllDone);
}

#[test]
fn response_split_across_many_reads_still_parses() {
    let (connection, transports) = connection(vec![v4(1)], single_channel_config());

    let reply = connection.send_request(get("/split"));
    settle(&connection);

    let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\nX-Tag: z\r\n\r\nbody";
    for piece in raw.chunks(7) {
        transports.handle(0).push_response(piece);
        connection.drive(Instant::now());
    }
    settle(&connection);

    assert!(reply.is_finished());
    assert_eq!(reply.header("x-tag").as_deref(), Some("z"));
    assert_eq!(&reply.read_all()[..], b"body");
}

#[test]
fn callbacks_fire_in_protocol_order() {
    let (connection, transports) = connection(vec![v4(1)], single_channel_config());

    let reply = connection.send_request(get("/events"));
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
    let l = log.clone();
    reply.on_header_changed(move || l.borrow_mut().push("headers"));
    let l = log.clone();
    reply.on_ready_to_read(move || l.borrow_mut().push("data"));
    let l = log.clone();
    reply.on_finished(move || l.borrow_mut().push("finished"));

    settle(&connection);
    transports.handle(0).push_response(&ok_response("payload"));
    settle(&connection);

    let events = log.borrow();
    assert_eq!(events.first(), Some(&"headers"));
    assert!(events.contains(&"data"));
    assert_eq!(events.last(), Some(&"finished"));
}

#[test]
fn reconnect_budget_retries_twice_then_surfaces_the_error() {
    let (connection, transports) = connection(vec![v4(1)], single_channel_config());

    let reply = connection.send_request(get("/flaky"));
    let errors: Rc<RefCell<Vec<Kind>>> = Rc::new(RefCell::new(Vec::new()));
    let seen = errors.clone();
    reply.on_finished_with_error(move |kind, _| seen.borrow_mut().push(kind));

    // First two disconnects are retried on fresh transports.
    for attempt in 0..2 {
        settle(&connection);
        assert_eq!(transports.created(), attempt + 1);
        transports.last().close_by_peer();
        settle(&connection);
        assert!(!reply.is_finished(), "retried on attempt {attempt}");
    }

    // Third transport, third disconnect: budget exhausted.
    settle(&connection);
    assert_eq!(transports.created(), 3);
    transports.last().close_by_peer();
    settle(&connection);

    assert!(reply.is_finished());
    assert_eq!(
        errors.borrow().as_slice(),
        &[Kind::Transport(tether_client::error::TransportCause::RemoteClosed)]
    );
    assert_eq!(connection.stats().snapshot().reconnects, 2);
}

#[test]
fn until_close_bodies_finish_on_clean_eof() {
    let (connection, transports) = connection(vec![v4(1)], single_channel_config());

    let reply = connection.send_request(get("/stream"));
    settle(&connection);
    transports
        .handle(0)
        .push_response(b"HTTP/1.1 200 OK\r\n\r\nstreaming until close");
    settle(&connection);
    assert!(!reply.is_finished());

    transports.handle(0).close_by_peer();
    settle(&connection);

    assert!(reply.is_finished());
    assert!(reply.error_kind().is_none());
    assert_eq!(&reply.read_all()[..], b"streaming until close");
}

#[test]
fn malformed_status_line_is_fatal_and_never_retried() {
    let (connection, transports) = connection(vec![v4(1)], single_channel_config());

    let reply = connection.send_request(get("/bad"));
    settle(&connection);
    transports.handle(0).push_response(b"BOGUS/9.9 banana\r\n\r\n");
    settle(&connection);

    assert!(reply.is_finished());
    assert!(matches!(reply.error_kind(), Some(Kind::Protocol(_))));
    // No reconnect attempt for protocol violations.
    assert_eq!(transports.created(), 1);
    assert_eq!(connection.stats().snapshot().reconnects, 0);
}

#[test]
fn pause_holds_the_engine_and_resume_restarts_it() {
    let (connection, transports) = connection(vec![v4(1)], single_channel_config());

    let reply = connection.send_request(get("/paused"));
    settle(&connection);

    connection.pause();
    transports.handle(0).push_response(&ok_response("late"));
    settle(&connection);
    assert!(!reply.is_finished());
    assert!(connection.is_paused());

    connection.resume();
    settle(&connection);
    assert!(reply.is_finished());
    assert_eq!(&reply.read_all()[..], b"late");
}

#[test]
fn abort_mid_response_closes_the_channel() {
    let (connection, transports) = connection(vec![v4(1)], single_channel_config());

    let reply = connection.send_request(get("/huge"));
    settle(&connection);
    transports
        .handle(0)
        .push_response(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\nstart");
    settle(&connection);
    assert_eq!(reply.parse_state(), ParseState::ReadingData);

    connection.abort(&reply);
    assert!(reply.is_finished());
    assert!(transports.handle(0).engine_closed());
    assert_eq!(connection.channel_state(0), ChannelState::Idle);
}

#[test]
fn engine_statistics_track_the_exchange() {
    let (connection, transports) = connection(vec![v4(1)], single_channel_config());

    let reply = connection.send_request(get("/stats"));
    settle(&connection);
    transports.handle(0).push_response(&ok_response("counted"));
    settle(&connection);
    assert!(reply.is_finished());

    let snapshot = connection.stats().snapshot();
    assert_eq!(snapshot.requests_enqueued, 1);
    assert_eq!(snapshot.requests_finished, 1);
    assert_eq!(snapshot.requests_failed, 0);
    assert!(snapshot.bytes_sent > 0);
    assert!(snapshot.bytes_received > 0);
}
