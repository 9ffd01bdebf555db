//! `WWW-Authenticate` / `Proxy-Authenticate` challenge parsing
//!
//! A server may send several challenges, either as repeated headers or
//! comma-separated within one value. Challenges are ranked
//! Digest > NTLM > Basic; `Negotiate` and unknown schemes are ignored.

use http::HeaderMap;

/// Supported authentication schemes, strongest last for `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Scheme {
    Basic,
    Ntlm,
    Digest,
}

impl Scheme {
    fn from_token(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("basic") {
            Some(Scheme::Basic)
        } else if token.eq_ignore_ascii_case("ntlm") {
            Some(Scheme::Ntlm)
        } else if token.eq_ignore_ascii_case("digest") {
            Some(Scheme::Digest)
        } else {
            // Negotiate and anything else are not handled.
            None
        }
    }
}

/// One parsed challenge.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub scheme: Scheme,
    /// `k=v` parameters, quotes stripped, names lowercased.
    pub params: Vec<(String, String)>,
    /// Raw base64 payload for token-style challenges (`NTLM <token>`).
    pub token: Option<String>,
}

impl Challenge {
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Parse every challenge in `header_name` and return the strongest
/// supported one.
#[must_use]
pub fn strongest_challenge(headers: &HeaderMap, header_name: &str) -> Option<Challenge> {
    let mut best: Option<Challenge> = None;
    for value in headers.get_all(header_name) {
        let Ok(text) = value.to_str() else { continue };
        for challenge in parse_header_value(text) {
            match &best {
                Some(current) if current.scheme >= challenge.scheme => {}
                _ => best = Some(challenge),
            }
        }
    }
    best
}

/// Split one header value into challenges.
///
/// Segments are comma-separated outside quotes. A segment that is a bare
/// scheme token, or `scheme param=value`, or `scheme <base64>` starts a
/// new challenge; `param=value` segments attach to the current one.
fn parse_header_value(value: &str) -> Vec<Challenge> {
    let mut challenges: Vec<Challenge> = Vec::new();

    for segment in split_unquoted_commas(value) {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }

        let (head, rest) = match segment.find(char::is_whitespace) {
            Some(pos) => (&segment[..pos], segment[pos..].trim_start()),
            None => (segment, ""),
        };

        // A `param=value` segment attaches to the current challenge.
        if head.contains('=') {
            if let (Some(current), Some(param)) = (challenges.last_mut(), parse_param(segment)) {
                current.params.push(param);
            }
            continue;
        }

        if let Some(scheme) = Scheme::from_token(head) {
            let mut challenge = Challenge {
                scheme,
                params: Vec::new(),
                token: None,
            };
            if !rest.is_empty() {
                if scheme == Scheme::Ntlm {
                    // Base64 tokens can contain `=` padding; never treat
                    // an NTLM payload as a parameter list.
                    challenge.token = Some(rest.to_string());
                } else if let Some(param) = parse_param(rest) {
                    challenge.params.push(param);
                }
            }
            challenges.push(challenge);
        }
        // Unknown bare scheme tokens (e.g. Negotiate) are skipped.
    }

    challenges
}

fn parse_param(text: &str) -> Option<(String, String)> {
    let eq = text.find('=')?;
    let name = text[..eq].trim().to_ascii_lowercase();
    let mut value = text[eq + 1..].trim();
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value = &value[1..value.len() - 1];
    }
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    Some((name, value.replace("\\\"", "\"")))
}

fn split_unquoted_commas(value: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in value.char_indices() {
        match c {
            '\\' if in_quotes => escaped = !escaped,
            '"' if !escaped => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                segments.push(&value[start..i]);
                start = i + 1;
            }
            _ => escaped = false,
        }
    }
    segments.push(&value[start..]);
    segments
}
