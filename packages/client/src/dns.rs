//! Host name resolution
//!
//! The engine only needs "resolve(host) -> set of addresses, async". A
//! [`Resolver`] hands back a [`ResolveHandle`] the connection polls while
//! it drives its channels; the production [`GaiResolver`] runs the
//! blocking system resolver on a helper thread and reports over a channel.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::mpsc;
use std::thread;

use crate::error::{self, Error};

/// IP address family, used for dual-stack connection racing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    #[must_use]
    pub fn of(addr: &SocketAddr) -> Self {
        match addr.ip() {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    #[must_use]
    pub fn other(self) -> Self {
        match self {
            AddressFamily::V4 => AddressFamily::V6,
            AddressFamily::V6 => AddressFamily::V4,
        }
    }
}

/// Result set of one lookup, tagged by family on demand.
#[derive(Debug, Clone, Default)]
pub struct ResolvedAddresses {
    addrs: Vec<SocketAddr>,
}

impl ResolvedAddresses {
    #[must_use]
    pub fn new(addrs: Vec<SocketAddr>) -> Self {
        Self { addrs }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    #[must_use]
    pub fn all(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Addresses belonging to one family, order preserved.
    #[must_use]
    pub fn family(&self, family: AddressFamily) -> Vec<SocketAddr> {
        self.addrs
            .iter()
            .copied()
            .filter(|a| AddressFamily::of(a) == family)
            .collect()
    }

    #[must_use]
    pub fn has_family(&self, family: AddressFamily) -> bool {
        self.addrs.iter().any(|a| AddressFamily::of(a) == family)
    }

    /// True when the set spans both address families and a dual-stack race
    /// is worth running.
    #[must_use]
    pub fn is_dual_stack(&self) -> bool {
        self.has_family(AddressFamily::V4) && self.has_family(AddressFamily::V6)
    }
}

/// In-flight lookup, polled by the connection between I/O passes.
pub struct ResolveHandle {
    inner: HandleInner,
}

enum HandleInner {
    Ready(Option<Result<ResolvedAddresses, Error>>),
    Pending(mpsc::Receiver<Result<ResolvedAddresses, Error>>),
}

impl ResolveHandle {
    /// A handle that is already resolved, used for IP literals and tests.
    #[must_use]
    pub fn ready(result: Result<ResolvedAddresses, Error>) -> Self {
        Self {
            inner: HandleInner::Ready(Some(result)),
        }
    }

    #[must_use]
    pub fn pending(rx: mpsc::Receiver<Result<ResolvedAddresses, Error>>) -> Self {
        Self {
            inner: HandleInner::Pending(rx),
        }
    }

    /// Non-blocking poll; yields the result exactly once.
    pub fn poll(&mut self) -> Option<Result<ResolvedAddresses, Error>> {
        match &mut self.inner {
            HandleInner::Ready(slot) => slot.take(),
            HandleInner::Pending(rx) => match rx.try_recv() {
                Ok(result) => Some(result),
                Err(mpsc::TryRecvError::Empty) => None,
                Err(mpsc::TryRecvError::Disconnected) => {
                    Some(Err(error::unknown("resolver thread vanished")))
                }
            },
        }
    }
}

/// Host name resolution seam.
pub trait Resolver {
    fn resolve(&self, host: &str, port: u16) -> ResolveHandle;
}

/// System resolver on a helper thread.
#[derive(Debug, Default)]
pub struct GaiResolver;

impl GaiResolver {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Resolver for GaiResolver {
    fn resolve(&self, host: &str, port: u16) -> ResolveHandle {
        // IP literals short-circuit the thread entirely.
        if let Ok(ip) = host.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
            let addrs = ResolvedAddresses::new(vec![SocketAddr::new(ip, port)]);
            return ResolveHandle::ready(Ok(addrs));
        }

        let (tx, rx) = mpsc::channel();
        let host = host.to_string();
        thread::spawn(move || {
            let result = match (host.as_str(), port).to_socket_addrs() {
                Ok(iter) => {
                    let addrs: Vec<SocketAddr> = iter.collect();
                    if addrs.is_empty() {
                        Err(error::unknown(format!("no addresses found for {host}")))
                    } else {
                        Ok(ResolvedAddresses::new(addrs))
                    }
                }
                Err(e) => Err(error::connect_failed(e)),
            };
            let _ = tx.send(result);
        });

        ResolveHandle::pending(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6};

    fn v4(last: u8) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, last), 80))
    }

    fn v6() -> SocketAddr {
        SocketAddr::V6(SocketAddrV6::new(
            Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1),
            80,
            0,
            0,
        ))
    }

    #[test]
    fn dual_stack_detection() {
        let set = ResolvedAddresses::new(vec![v4(1), v6()]);
        assert!(set.is_dual_stack());
        assert_eq!(set.family(AddressFamily::V4), vec![v4(1)]);

        let only_v4 = ResolvedAddresses::new(vec![v4(1), v4(2)]);
        assert!(!only_v4.is_dual_stack());
    }

    #[test]
    fn ip_literal_resolves_without_lookup() {
        let mut handle = GaiResolver::new().resolve("192.0.2.7", 8080);
        let addrs = handle.poll().expect("literal is immediate").expect("ok");
        assert_eq!(addrs.all(), &["192.0.2.7:8080".parse().unwrap()][..]);
    }

    #[test]
    fn bracketed_v6_literal_resolves() {
        let mut handle = GaiResolver::new().resolve("[2001:db8::1]", 443);
        let addrs = handle.poll().expect("literal is immediate").expect("ok");
        assert_eq!(AddressFamily::of(&addrs.all()[0]), AddressFamily::V6);
    }

    #[test]
    fn ready_handle_yields_once() {
        let mut handle = ResolveHandle::ready(Ok(ResolvedAddresses::default()));
        assert!(handle.poll().is_some());
        assert!(handle.poll().is_none());
    }
}
