//! HTTP proxy settings
//!
//! When a connection is routed through an HTTP proxy, channels connect to
//! the proxy's address, requests are serialized with absolute-form
//! targets, and 407 challenges drive the proxy authenticator.

use crate::http::reply::Credentials;

/// One HTTP proxy endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    host: String,
    port: u16,
    /// Cached proxy credentials, seeded into new channels' proxy
    /// authenticators.
    credentials: Option<Credentials>,
}

impl ProxySettings {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            credentials: None,
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = Some(credentials);
    }
}
