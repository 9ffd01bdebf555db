//! HTTP vocabulary and response machinery
//!
//! Request descriptors, the incremental reply parser, the three body
//! framing algorithms, and response decompression. Shared header-token
//! helpers used by several of those live at the module root.

pub mod body_reader;
pub mod inflate;
pub mod reply;
pub mod request;

pub use reply::{ParseState, Reply};
pub use request::{Priority, Request};

use http::HeaderMap;

/// Case-insensitive token search over every comma-separated value of a
/// header. `Connection`, `Transfer-Encoding`, and friends are token lists
/// per RFC 9110; exact-match comparison would miss `keep-alive, close`.
pub(crate) fn header_contains_token(headers: &HeaderMap, name: &str, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|candidate| candidate.trim().eq_ignore_ascii_case(token))
}

/// First value of a header as a string, when present and valid UTF-8.
pub(crate) fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn token_search_is_case_insensitive_and_list_aware() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("Keep-Alive, Close"));
        assert!(header_contains_token(&headers, "connection", "close"));
        assert!(header_contains_token(&headers, "connection", "keep-alive"));
        assert!(!header_contains_token(&headers, "connection", "upgrade"));
    }

    #[test]
    fn token_search_spans_repeated_headers() {
        let mut headers = HeaderMap::new();
        headers.append("transfer-encoding", HeaderValue::from_static("gzip"));
        headers.append("transfer-encoding", HeaderValue::from_static("chunked"));
        assert!(header_contains_token(&headers, "transfer-encoding", "chunked"));
    }
}
