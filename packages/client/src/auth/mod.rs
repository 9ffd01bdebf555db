//! Challenge-response authentication
//!
//! Each channel carries two [`Authenticator`]s, one for the origin and
//! one for the proxy. A 401/407 response feeds the strongest supported
//! challenge into the matching authenticator; once it reports
//! [`AuthPhase::Done`] the connection pauses, asks the caller for
//! credentials, and resends. Basic and Digest complete in a single round;
//! NTLM runs its three-message handshake on one transport, and its
//! credentials are not copied to sibling channels until the handshake
//! finishes.

pub mod basic;
pub mod challenge;
pub mod digest;
pub mod ntlm;

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use http::HeaderMap;

use crate::http::reply::Credentials;

pub use challenge::{strongest_challenge, Challenge, Scheme};
use digest::DigestState;
use ntlm::NtlmState;

/// Handshake position of one authenticator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthPhase {
    /// No challenge seen since the last transport (re-)connect.
    #[default]
    Start,
    /// Multi-round handshake underway.
    InProgress,
    /// Challenge fully absorbed; headers can be produced.
    Done,
}

/// Outcome of absorbing one 401/407 challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// Retry the request with a freshly computed header.
    Retry,
    /// Ask the caller for credentials before retrying.
    NeedCredentials,
    /// No supported scheme was offered, or the handshake already failed
    /// with these credentials; surface the failure.
    Unsupported,
}

/// Per-channel authentication state for one peer (origin or proxy).
#[derive(Default)]
pub struct Authenticator {
    phase: AuthPhase,
    scheme: Option<Scheme>,
    credentials: Option<Credentials>,
    digest: Option<DigestState>,
    ntlm: Option<NtlmState>,
    /// A challenge arrived and the retried exchange has not succeeded yet.
    pending: bool,
    /// Header was produced for the current challenge; a repeat challenge
    /// with the same credentials means they were rejected.
    header_sent: bool,
}

impl Authenticator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn phase(&self) -> AuthPhase {
        self.phase
    }

    #[must_use]
    pub fn scheme(&self) -> Option<Scheme> {
        self.scheme
    }

    #[must_use]
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// A challenge is outstanding; pipelining stays off while true.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Reset for a fresh transport. Credentials survive so reconnects can
    /// re-authenticate silently, but the phase returns to `Start` so
    /// prompts can be re-asked.
    pub fn reset_for_reconnect(&mut self) {
        self.phase = AuthPhase::Start;
        self.ntlm = None;
        self.header_sent = false;
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = Some(credentials);
        self.header_sent = false;
    }

    /// Whether credentials must be asked from the caller before a retry
    /// can work.
    #[must_use]
    pub fn needs_credentials(&self) -> bool {
        self.credentials.is_none()
    }

    /// Whether this authenticator's credentials may be copied to sibling
    /// channels. NTLM authenticates a transport, not a request, so its
    /// credentials stay put until the handshake completes.
    #[must_use]
    pub fn may_propagate(&self) -> bool {
        match self.scheme {
            Some(Scheme::Ntlm) => self.phase == AuthPhase::Done,
            _ => true,
        }
    }

    /// Absorb the strongest challenge from a 401/407 response.
    pub fn handle_challenge(&mut self, headers: &HeaderMap, header_name: &str) -> ChallengeOutcome {
        let Some(challenge) = strongest_challenge(headers, header_name) else {
            return ChallengeOutcome::Unsupported;
        };

        if self.scheme != Some(challenge.scheme) {
            // Scheme switch: start over.
            self.scheme = Some(challenge.scheme);
            self.digest = None;
            self.ntlm = None;
            self.phase = AuthPhase::Start;
            self.header_sent = false;
        }

        self.pending = true;

        match challenge.scheme {
            Scheme::Basic => {
                if self.header_sent {
                    // Same credentials bounced once already.
                    return ChallengeOutcome::Unsupported;
                }
                self.phase = AuthPhase::Done;
            }
            Scheme::Digest => {
                if self.header_sent {
                    return ChallengeOutcome::Unsupported;
                }
                match DigestState::from_challenge(&challenge) {
                    Some(state) => self.digest = Some(state),
                    None => return ChallengeOutcome::Unsupported,
                }
                self.phase = AuthPhase::Done;
            }
            Scheme::Ntlm => {
                let state = self.ntlm.get_or_insert_with(NtlmState::new);
                match challenge.token.as_deref() {
                    Some(token) => {
                        let Ok(raw) = BASE64_STANDARD.decode(token) else {
                            return ChallengeOutcome::Unsupported;
                        };
                        if !state.parse_challenge_message(&raw) {
                            return ChallengeOutcome::Unsupported;
                        }
                        // Server challenge in hand; the next header
                        // completes the handshake.
                        self.phase = AuthPhase::InProgress;
                    }
                    None => {
                        if self.header_sent && self.phase == AuthPhase::Done {
                            // Completed handshake bounced back to square
                            // one: the credentials were wrong.
                            return ChallengeOutcome::Unsupported;
                        }
                        self.ntlm = Some(NtlmState::new());
                        self.phase = AuthPhase::InProgress;
                    }
                }
            }
        }

        if self.needs_credentials() {
            ChallengeOutcome::NeedCredentials
        } else {
            ChallengeOutcome::Retry
        }
    }

    /// The retried exchange came back with a non-challenge status.
    pub fn mark_authenticated(&mut self) {
        self.pending = false;
    }

    /// Compute the `Authorization`/`Proxy-Authorization` value for an
    /// outgoing request. `None` when nothing should be attached (no
    /// challenge yet, or NTLM already completed its handshake).
    pub fn authorization_value(&mut self, method: &str, uri: &str) -> Option<String> {
        let credentials = self.credentials.clone()?;
        let value = match self.scheme? {
            Scheme::Basic => {
                if self.phase != AuthPhase::Done {
                    return None;
                }
                basic::authorization_value(&credentials)
            }
            Scheme::Digest => {
                if self.phase != AuthPhase::Done {
                    return None;
                }
                let digest = self.digest.as_mut()?;
                digest.authorization_value(&credentials, method, uri)
            }
            Scheme::Ntlm => {
                let ntlm = self.ntlm.as_mut()?;
                match self.phase {
                    AuthPhase::Start => return None,
                    AuthPhase::Done => return None, // session is authenticated
                    AuthPhase::InProgress => {
                        if ntlm.has_challenge() {
                            let msg = ntlm.authenticate_message(&credentials)?;
                            self.phase = AuthPhase::Done;
                            format!("NTLM {}", BASE64_STANDARD.encode(msg))
                        } else {
                            format!(
                                "NTLM {}",
                                BASE64_STANDARD.encode(ntlm.negotiate_message())
                            )
                        }
                    }
                }
            }
        };
        self.header_sent = true;
        Some(value)
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("phase", &self.phase)
            .field("scheme", &self.scheme)
            .field("has_credentials", &self.credentials.is_some())
            .field("pending", &self.pending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn challenge_headers(value: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert("www-authenticate", HeaderValue::from_str(value).unwrap());
        map
    }

    fn credentials() -> Credentials {
        Credentials {
            user: "user".to_string(),
            password: "pass".to_string(),
        }
    }

    #[test]
    fn basic_single_round() {
        let mut auth = Authenticator::new();
        let outcome =
            auth.handle_challenge(&challenge_headers(r#"Basic realm="x""#), "www-authenticate");
        assert_eq!(outcome, ChallengeOutcome::NeedCredentials);
        assert_eq!(auth.phase(), AuthPhase::Done);

        auth.set_credentials(credentials());
        let value = auth.authorization_value("GET", "/").unwrap();
        assert!(value.starts_with("Basic "));
        assert!(auth.is_pending());

        auth.mark_authenticated();
        assert!(!auth.is_pending());
        // Later requests still carry the header preemptively.
        assert!(auth.authorization_value("GET", "/next").is_some());
    }

    #[test]
    fn repeated_basic_challenge_means_bad_credentials() {
        let mut auth = Authenticator::new();
        auth.handle_challenge(&challenge_headers(r#"Basic realm="x""#), "www-authenticate");
        auth.set_credentials(credentials());
        let _ = auth.authorization_value("GET", "/");

        let outcome =
            auth.handle_challenge(&challenge_headers(r#"Basic realm="x""#), "www-authenticate");
        assert_eq!(outcome, ChallengeOutcome::Unsupported);
    }

    #[test]
    fn ntlm_three_message_flow() {
        let mut auth = Authenticator::new();
        auth.set_credentials(credentials());

        let outcome = auth.handle_challenge(&challenge_headers("NTLM"), "www-authenticate");
        assert_eq!(outcome, ChallengeOutcome::Retry);
        assert_eq!(auth.phase(), AuthPhase::InProgress);
        assert!(!auth.may_propagate());

        let type1 = auth.authorization_value("GET", "/").unwrap();
        assert!(type1.starts_with("NTLM "));

        // Server answers with a type 2 token.
        let mut type2 = Vec::new();
        type2.extend_from_slice(b"NTLMSSP\0");
        type2.extend_from_slice(&2u32.to_le_bytes());
        type2.extend_from_slice(&[0u8; 8]);
        type2.extend_from_slice(&0u32.to_le_bytes());
        type2.extend_from_slice(&[1u8; 8]);
        let header = format!("NTLM {}", BASE64_STANDARD.encode(&type2));
        let outcome = auth.handle_challenge(&challenge_headers(&header), "www-authenticate");
        assert_eq!(outcome, ChallengeOutcome::Retry);

        let type3 = auth.authorization_value("GET", "/").unwrap();
        assert!(type3.starts_with("NTLM "));
        assert_eq!(auth.phase(), AuthPhase::Done);
        assert!(auth.may_propagate());

        // Handshake complete: the session authenticates later requests.
        assert!(auth.authorization_value("GET", "/next").is_none());
    }

    #[test]
    fn unsupported_challenge() {
        let mut auth = Authenticator::new();
        let outcome =
            auth.handle_challenge(&challenge_headers("Negotiate"), "www-authenticate");
        assert_eq!(outcome, ChallengeOutcome::Unsupported);
    }

    #[test]
    fn reconnect_resets_phase_but_keeps_credentials() {
        let mut auth = Authenticator::new();
        auth.handle_challenge(&challenge_headers(r#"Basic realm="x""#), "www-authenticate");
        auth.set_credentials(credentials());
        let _ = auth.authorization_value("GET", "/");

        auth.reset_for_reconnect();
        assert_eq!(auth.phase(), AuthPhase::Start);
        assert!(!auth.needs_credentials());
    }
}
