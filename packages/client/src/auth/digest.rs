//! Digest authentication (RFC 2617, MD5 / qop="auth")
//!
//! `auth-int` and the SHA-256 variants are not offered by the servers this
//! engine targets and are rejected at challenge-selection time.

use md5::{Digest as _, Md5};

use crate::http::reply::Credentials;

use super::challenge::Challenge;

/// Parsed Digest challenge state plus the client-side nonce counter.
#[derive(Debug, Clone)]
pub struct DigestState {
    realm: String,
    nonce: String,
    opaque: Option<String>,
    qop_auth: bool,
    session_algorithm: bool,
    nonce_count: u32,
}

impl DigestState {
    /// Build from a challenge; `None` when the challenge asks for an
    /// unsupported algorithm or qop.
    pub fn from_challenge(challenge: &Challenge) -> Option<Self> {
        let algorithm = challenge.param("algorithm").unwrap_or("MD5");
        let session_algorithm = match algorithm {
            a if a.eq_ignore_ascii_case("md5") => false,
            a if a.eq_ignore_ascii_case("md5-sess") => true,
            _ => return None,
        };

        let qop_auth = match challenge.param("qop") {
            None => false,
            Some(qop) => {
                if !qop
                    .split(',')
                    .any(|q| q.trim().eq_ignore_ascii_case("auth"))
                {
                    return None;
                }
                true
            }
        };

        Some(Self {
            realm: challenge.param("realm").unwrap_or_default().to_string(),
            nonce: challenge.param("nonce")?.to_string(),
            opaque: challenge.param("opaque").map(str::to_string),
            qop_auth,
            session_algorithm,
            nonce_count: 0,
        })
    }

    /// Compute an `Authorization: Digest ...` value for one request.
    /// Increments the nonce counter.
    pub fn authorization_value(
        &mut self,
        credentials: &Credentials,
        method: &str,
        uri: &str,
    ) -> String {
        self.nonce_count += 1;
        let nc = format!("{:08x}", self.nonce_count);
        let cnonce = format!("{:016x}", fastrand::u64(..));

        let response = self.response(credentials, method, uri, &nc, &cnonce);

        let mut value = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
            credentials.user, self.realm, self.nonce, uri, response
        );
        if self.qop_auth {
            value.push_str(&format!(", qop=auth, nc={nc}, cnonce=\"{cnonce}\""));
        }
        if let Some(opaque) = &self.opaque {
            value.push_str(&format!(", opaque=\"{opaque}\""));
        }
        value.push_str(", algorithm=MD5");
        value
    }

    fn response(
        &self,
        credentials: &Credentials,
        method: &str,
        uri: &str,
        nc: &str,
        cnonce: &str,
    ) -> String {
        let mut ha1 = md5_hex(format!(
            "{}:{}:{}",
            credentials.user, self.realm, credentials.password
        ));
        if self.session_algorithm {
            ha1 = md5_hex(format!("{ha1}:{}:{cnonce}", self.nonce));
        }
        let ha2 = md5_hex(format!("{method}:{uri}"));

        if self.qop_auth {
            md5_hex(format!("{ha1}:{}:{nc}:{cnonce}:auth:{ha2}", self.nonce))
        } else {
            md5_hex(format!("{ha1}:{}:{ha2}", self.nonce))
        }
    }
}

fn md5_hex(input: String) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::challenge::Scheme;

    fn challenge(params: &[(&str, &str)]) -> Challenge {
        Challenge {
            scheme: Scheme::Digest,
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            token: None,
        }
    }

    fn rfc2617_state() -> DigestState {
        DigestState::from_challenge(&challenge(&[
            ("realm", "testrealm@host.com"),
            ("nonce", "dcd98b7102dd2f0e8b11d0f600bfb0c093"),
            ("opaque", "5ccc069c403ebaf9f0171e9517f40e41"),
            ("qop", "auth"),
        ]))
        .unwrap()
    }

    #[test]
    fn rfc2617_response_vector() {
        // The worked example from RFC 2617 §3.5.
        let state = rfc2617_state();
        let credentials = Credentials {
            user: "Mufasa".to_string(),
            password: "Circle Of Life".to_string(),
        };
        let response = state.response(
            &credentials,
            "GET",
            "/dir/index.html",
            "00000001",
            "0a4f113b",
        );
        assert_eq!(response, "6629fae49393a05397450978507c4ef1");
    }

    #[test]
    fn authorization_value_shape() {
        let mut state = rfc2617_state();
        let credentials = Credentials {
            user: "Mufasa".to_string(),
            password: "Circle Of Life".to_string(),
        };
        let value = state.authorization_value(&credentials, "GET", "/dir/index.html");
        assert!(value.starts_with("Digest username=\"Mufasa\""));
        assert!(value.contains("realm=\"testrealm@host.com\""));
        assert!(value.contains("uri=\"/dir/index.html\""));
        assert!(value.contains("qop=auth"));
        assert!(value.contains("nc=00000001"));
        assert!(value.contains("opaque=\"5ccc069c403ebaf9f0171e9517f40e41\""));
    }

    #[test]
    fn nonce_count_increments() {
        let mut state = rfc2617_state();
        let credentials = Credentials::default();
        let first = state.authorization_value(&credentials, "GET", "/");
        let second = state.authorization_value(&credentials, "GET", "/");
        assert!(first.contains("nc=00000001"));
        assert!(second.contains("nc=00000002"));
    }

    #[test]
    fn unsupported_algorithm_rejected() {
        let c = challenge(&[("realm", "r"), ("nonce", "n"), ("algorithm", "SHA-256")]);
        assert!(DigestState::from_challenge(&c).is_none());
    }

    #[test]
    fn auth_int_only_rejected() {
        let c = challenge(&[("realm", "r"), ("nonce", "n"), ("qop", "auth-int")]);
        assert!(DigestState::from_challenge(&c).is_none());
    }

    #[test]
    fn missing_nonce_rejected() {
        let c = challenge(&[("realm", "r")]);
        assert!(DigestState::from_challenge(&c).is_none());
    }
}
