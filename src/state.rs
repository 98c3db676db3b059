use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::origin::OriginUrl;

const NONCE_LEN: usize = 32;

/// Single-use random CSRF token. Its only records are the encoded state
/// parameter round-tripped through the IdP and the browser's nonce cookie;
/// the two are compared once, at callback time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nonce(String);

impl Nonce {
    /// Fresh random value from the thread-local CSPRNG. No shared counter,
    /// safe under unlimited concurrent calls.
    pub fn generate() -> Self {
        Self(
            rand::thread_rng()
                .sample_iter(Alphanumeric)
                .take(NONCE_LEN)
                .map(char::from)
                .collect(),
        )
    }

    pub fn value(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Nonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reversible `{origin, nonce}` token carried through the IdP's `state`
/// parameter. This is the only mechanism returning the original request
/// context across the redirect round trip; nothing is stored server-side.
///
/// The encoding is plain base64url over JSON. It is deliberately not
/// signed or encrypted: the nonce half of the CSRF check lives in a
/// browser cookie only the legitimate caller can present back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub origin: OriginUrl,
    pub nonce: Nonce,
}

impl State {
    pub fn new(origin: OriginUrl, nonce: Nonce) -> Self {
        Self { origin, nonce }
    }

    pub fn encode(&self) -> Result<String, AuthError> {
        let payload = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(payload))
    }

    /// Fails with a distinct error on malformed input; never substitutes
    /// defaults.
    pub fn decode(value: &str) -> Result<Self, AuthError> {
        let raw = URL_SAFE_NO_PAD
            .decode(value)
            .map_err(|_| AuthError::InvalidState("state is not valid base64url".to_string()))?;
        serde_json::from_slice(&raw)
            .map_err(|_| AuthError::InvalidState("state payload is not valid".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_nonces_are_distinct() {
        let a = Nonce::generate();
        let b = Nonce::generate();
        assert_ne!(a, b);
        assert_eq!(a.value().len(), NONCE_LEN);
    }

    #[test]
    fn state_roundtrips_exactly() {
        let origin = OriginUrl::new("https", "example.com", "/path");
        let state = State::new(origin, Nonce::generate());
        let decoded = State::decode(&state.encode().unwrap()).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn state_roundtrips_with_reserved_characters() {
        let origin = OriginUrl::new("https", "example.com", "/a b/c?d=e&f=%20#frag");
        let state = State::new(origin, Nonce::generate());
        let decoded = State::decode(&state.encode().unwrap()).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn decode_rejects_garbage_with_distinct_error() {
        match State::decode("not base64url!!") {
            Err(AuthError::InvalidState(msg)) => assert!(msg.contains("base64url")),
            other => panic!("expected InvalidState, got {other:?}"),
        }

        let not_json = URL_SAFE_NO_PAD.encode(b"plain text");
        match State::decode(&not_json) {
            Err(AuthError::InvalidState(_)) => {}
            other => panic!("expected InvalidState, got {other:?}"),
        }
    }
}
