//! NTLM authentication (NTLMv2)
//!
//! Three-message handshake: the client sends a Negotiate (type 1) token,
//! the server answers with a Challenge (type 2) carrying an 8-byte server
//! challenge and a target-info block, and the client finishes with an
//! Authenticate (type 3) token holding the NTLMv2 response. Responses are
//! HMAC-MD5 over an MD4 password hash; no LM hashes are ever emitted.
//!
//! Tokens are exchanged base64-encoded inside `Authorization: NTLM <tok>`
//! headers. After the handshake completes, subsequent requests on the
//! same transport are implicitly authenticated and carry no header.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use md4::Md4;
use md5::{Digest as _, Md5};

use crate::http::reply::Credentials;

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

// Negotiate Unicode | OEM | Request Target | NTLM | Always Sign
const NEGOTIATE_FLAGS: u32 = 0x0000_8207;

/// Seconds between the Windows epoch (1601) and the Unix epoch (1970).
const FILETIME_UNIX_OFFSET: u64 = 11_644_473_600;

/// Per-channel NTLM handshake state.
#[derive(Debug, Clone, Default)]
pub struct NtlmState {
    server_challenge: Option<[u8; 8]>,
    target_info: Vec<u8>,
}

impl NtlmState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the server's Challenge message has been absorbed and the
    /// Authenticate message can be produced.
    #[must_use]
    pub fn has_challenge(&self) -> bool {
        self.server_challenge.is_some()
    }

    /// Type 1 message: signature, type, flags, and two empty security
    /// buffers for domain and workstation.
    #[must_use]
    pub fn negotiate_message(&self) -> Vec<u8> {
        let mut msg = Vec::with_capacity(32);
        msg.extend_from_slice(SIGNATURE);
        msg.extend_from_slice(&1u32.to_le_bytes());
        msg.extend_from_slice(&NEGOTIATE_FLAGS.to_le_bytes());
        put_secbuf(&mut msg, 0, 32);
        put_secbuf(&mut msg, 0, 32);
        msg
    }

    /// Absorb a Type 2 (Challenge) message. Returns `false` on a message
    /// that is not a well-formed NTLM challenge.
    pub fn parse_challenge_message(&mut self, data: &[u8]) -> bool {
        if data.len() < 32 || &data[..8] != SIGNATURE {
            return false;
        }
        if u32::from_le_bytes([data[8], data[9], data[10], data[11]]) != 2 {
            return false;
        }
        let mut challenge = [0u8; 8];
        challenge.copy_from_slice(&data[24..32]);
        self.server_challenge = Some(challenge);

        self.target_info.clear();
        if data.len() >= 48 {
            let len = u16::from_le_bytes([data[40], data[41]]) as usize;
            let offset = u32::from_le_bytes([data[44], data[45], data[46], data[47]]) as usize;
            if len > 0 && offset + len <= data.len() {
                self.target_info.extend_from_slice(&data[offset..offset + len]);
            }
        }
        true
    }

    /// Type 3 message carrying the NTLMv2 and LMv2 responses. `None`
    /// until a server challenge has been parsed.
    #[must_use]
    pub fn authenticate_message(&self, credentials: &Credentials) -> Option<Vec<u8>> {
        let server_challenge = self.server_challenge?;
        let (domain, user) = split_domain(&credentials.user);

        let hash = ntlmv2_hash(user, domain, &credentials.password);
        let client_challenge = fastrand::u64(..).to_le_bytes();
        let time = filetime_now();

        let nt_response = nt_response(
            &hash,
            &server_challenge,
            time,
            &client_challenge,
            &self.target_info,
        );
        let lm_response = lmv2_response(&hash, &server_challenge, &client_challenge);

        let domain_utf16 = utf16le(domain);
        let user_utf16 = utf16le(user);
        let workstation_utf16: Vec<u8> = Vec::new();

        // Header is 64 bytes; payload order: domain, user, workstation,
        // LM response, NT response.
        let mut offset = 64u32;
        let mut msg = Vec::with_capacity(64 + domain_utf16.len() + user_utf16.len() + 24 + nt_response.len());
        msg.extend_from_slice(SIGNATURE);
        msg.extend_from_slice(&3u32.to_le_bytes());

        let mut payload = Vec::new();
        let domain_off = reserve(&mut payload, &mut offset, &domain_utf16);
        let user_off = reserve(&mut payload, &mut offset, &user_utf16);
        let ws_off = reserve(&mut payload, &mut offset, &workstation_utf16);
        let lm_off = reserve(&mut payload, &mut offset, &lm_response);
        let nt_off = reserve(&mut payload, &mut offset, &nt_response);

        put_secbuf(&mut msg, lm_response.len() as u16, lm_off);
        put_secbuf(&mut msg, nt_response.len() as u16, nt_off);
        put_secbuf(&mut msg, domain_utf16.len() as u16, domain_off);
        put_secbuf(&mut msg, user_utf16.len() as u16, user_off);
        put_secbuf(&mut msg, workstation_utf16.len() as u16, ws_off);
        put_secbuf(&mut msg, 0, offset); // empty session key
        msg.extend_from_slice(&NEGOTIATE_FLAGS.to_le_bytes());
        msg.extend_from_slice(&payload);

        Some(msg)
    }
}

/// Security buffer: length, max length, payload offset.
fn put_secbuf(msg: &mut Vec<u8>, len: u16, offset: u32) {
    msg.extend_from_slice(&len.to_le_bytes());
    msg.extend_from_slice(&len.to_le_bytes());
    msg.extend_from_slice(&offset.to_le_bytes());
}

fn reserve(payload: &mut Vec<u8>, offset: &mut u32, data: &[u8]) -> u32 {
    let at = *offset;
    payload.extend_from_slice(data);
    *offset += data.len() as u32;
    at
}

/// `DOMAIN\user` split; the domain is empty when absent.
fn split_domain(user: &str) -> (&str, &str) {
    match user.split_once('\\') {
        Some((domain, user)) => (domain, user),
        None => ("", user),
    }
}

fn utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn hmac_md5(key: &[u8], data: &[u8]) -> [u8; 16] {
    let mut mac =
        Hmac::<Md5>::new_from_slice(key).expect("HMAC-MD5 accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// NTLMv2 hash: HMAC-MD5 over UTF-16LE(upper(user) + domain), keyed with
/// the MD4 of the UTF-16LE password.
fn ntlmv2_hash(user: &str, domain: &str, password: &str) -> [u8; 16] {
    let nt_hash = Md4::digest(utf16le(password));
    let identity = utf16le(&format!("{}{}", user.to_uppercase(), domain));
    hmac_md5(&nt_hash, &identity)
}

fn nt_response(
    hash: &[u8; 16],
    server_challenge: &[u8; 8],
    time: u64,
    client_challenge: &[u8; 8],
    target_info: &[u8],
) -> Vec<u8> {
    // The "blob": version, timestamp, client challenge, target info.
    let mut blob = Vec::with_capacity(28 + target_info.len() + 4);
    blob.extend_from_slice(&[0x01, 0x01, 0x00, 0x00]);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(&time.to_le_bytes());
    blob.extend_from_slice(client_challenge);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(target_info);
    blob.extend_from_slice(&[0u8; 4]);

    let mut keyed = Vec::with_capacity(8 + blob.len());
    keyed.extend_from_slice(server_challenge);
    keyed.extend_from_slice(&blob);
    let proof = hmac_md5(hash, &keyed);

    let mut response = Vec::with_capacity(16 + blob.len());
    response.extend_from_slice(&proof);
    response.extend_from_slice(&blob);
    response
}

fn lmv2_response(hash: &[u8; 16], server_challenge: &[u8; 8], client_challenge: &[u8; 8]) -> Vec<u8> {
    let mut keyed = Vec::with_capacity(16);
    keyed.extend_from_slice(server_challenge);
    keyed.extend_from_slice(client_challenge);
    let proof = hmac_md5(hash, &keyed);

    let mut response = Vec::with_capacity(24);
    response.extend_from_slice(&proof);
    response.extend_from_slice(client_challenge);
    response
}

fn filetime_now() -> u64 {
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    (unix + FILETIME_UNIX_OFFSET) * 10_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_message_layout() {
        let msg = NtlmState::new().negotiate_message();
        assert_eq!(msg.len(), 32);
        assert_eq!(&msg[..8], b"NTLMSSP\0");
        assert_eq!(u32::from_le_bytes([msg[8], msg[9], msg[10], msg[11]]), 1);
    }

    #[test]
    fn ntlmv2_hash_vector() {
        // MS-NLMP 4.2.4.1.1: user "User", domain "Domain", password
        // "Password".
        let hash = ntlmv2_hash("User", "Domain", "Password");
        assert_eq!(
            hex::encode(hash),
            "0c868a403bfd7a93a3001ef22ef02e3f"
        );
    }

    #[test]
    fn nt_proof_vector() {
        // MS-NLMP 4.2.4: server challenge 0102030405060708, client
        // challenge aa*8, zero timestamp, the documented target info.
        let hash = ntlmv2_hash("User", "Domain", "Password");
        let server_challenge = [1, 2, 3, 4, 5, 6, 7, 8];
        let client_challenge = [0xaa; 8];
        let target_info = hex::decode(
            "02000c0044006f006d00610069006e0001000c00530065007200760065007200\
             00000000",
        )
        .unwrap();
        let response = nt_response(&hash, &server_challenge, 0, &client_challenge, &target_info);
        assert_eq!(
            hex::encode(&response[..16]),
            "68cd0ab851e51c96aabc927bebef6a1c"
        );
    }

    #[test]
    fn challenge_round_trip() {
        // Build a minimal type 2 message by hand.
        let mut type2 = Vec::new();
        type2.extend_from_slice(b"NTLMSSP\0");
        type2.extend_from_slice(&2u32.to_le_bytes());
        type2.extend_from_slice(&[0u8; 8]); // target name secbuf
        type2.extend_from_slice(&0u32.to_le_bytes()); // flags
        type2.extend_from_slice(&[9, 8, 7, 6, 5, 4, 3, 2]); // challenge

        let mut state = NtlmState::new();
        assert!(state.parse_challenge_message(&type2));
        assert!(state.has_challenge());

        let credentials = Credentials {
            user: "DOMAIN\\user".to_string(),
            password: "secret".to_string(),
        };
        let type3 = state.authenticate_message(&credentials).unwrap();
        assert_eq!(&type3[..8], b"NTLMSSP\0");
        assert_eq!(u32::from_le_bytes([type3[8], type3[9], type3[10], type3[11]]), 3);
        // NT response secbuf points inside the message.
        let nt_len = u16::from_le_bytes([type3[20], type3[21]]) as usize;
        let nt_off = u32::from_le_bytes([type3[24], type3[25], type3[26], type3[27]]) as usize;
        assert!(nt_len > 16);
        assert_eq!(nt_off + nt_len, type3.len());
    }

    #[test]
    fn garbage_challenge_rejected() {
        let mut state = NtlmState::new();
        assert!(!state.parse_challenge_message(b"not an ntlm message"));
        assert!(!state.has_challenge());
    }

    #[test]
    fn authenticate_requires_challenge() {
        let state = NtlmState::new();
        assert!(state.authenticate_message(&Credentials::default()).is_none());
    }
}
