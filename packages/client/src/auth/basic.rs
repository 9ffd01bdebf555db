//! Basic authentication encoding

use std::io::Write;

use base64::prelude::BASE64_STANDARD;
use base64::{write::EncoderWriter, Engine};

use crate::http::reply::Credentials;

/// `Basic <base64(user:password)>` header value.
#[must_use]
pub fn authorization_value(credentials: &Credentials) -> String {
    let mut buf = b"Basic ".to_vec();
    {
        let mut encoder = EncoderWriter::new(&mut buf, &BASE64_STANDARD);
        let _ = write!(encoder, "{}:{}", credentials.user, credentials.password);
    }
    // base64 output over UTF-8 input is always valid ASCII
    String::from_utf8(buf).unwrap_or_default()
}

/// Decode a `user:password` pair from a base64 credential blob.
pub fn decode(encoded: &str) -> Option<Credentials> {
    let decoded = BASE64_STANDARD.decode(encoded).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, password) = text.split_once(':')?;
    Some(Credentials {
        user: user.to_string(),
        password: password.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(user: &str, password: &str) -> Credentials {
        Credentials {
            user: user.to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn rfc7617_example() {
        // "Aladdin:open sesame" from RFC 7617 §2
        assert_eq!(
            authorization_value(&creds("Aladdin", "open sesame")),
            "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="
        );
    }

    #[test]
    fn round_trip() {
        let original = creds("user", "pa:ss");
        let value = authorization_value(&original);
        let encoded = value.strip_prefix("Basic ").unwrap();
        assert_eq!(decode(encoded), Some(original));
    }
}
