use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde_json::{Map, Value};

use crate::error::AuthError;
use crate::jwks::{fetch_key_set, KeySet, RsaKeyMaterial};
use crate::util::now_secs;

/// Validates JWT signature, audience, issuer and expiry against the IdP's
/// key set and exposes the verified claims.
///
/// A missing token is the caller's concern; a present-but-invalid token is
/// always reported as an error here, never a panic. The key-set mutex is
/// only held for map access, never across a network await.
pub struct TokenVerifier {
    issuer: String,
    jwks_uri: String,
    client: Client,
    keys: Mutex<KeySet>,
}

impl TokenVerifier {
    /// Fetches the key set eagerly; startup fails closed if the JWKS
    /// endpoint is unreachable.
    pub async fn new(client: Client, issuer: &str, jwks_uri: &str) -> Result<Self, AuthError> {
        let keys = fetch_key_set(&client, jwks_uri).await?;
        Ok(Self {
            issuer: issuer.to_string(),
            jwks_uri: jwks_uri.to_string(),
            client,
            keys: Mutex::new(keys),
        })
    }

    pub async fn verify(
        &self,
        token: &str,
        expected_audience: &str,
    ) -> Result<VerifiedToken, AuthError> {
        self.refresh_if_expired().await?;

        let header = decode_header(token)?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::InvalidToken(
                "only RS256 tokens are supported".to_string(),
            ));
        }

        let key = self.decoding_key_for_kid(header.kid.as_deref()).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[expected_audience]);
        validation.required_spec_claims =
            HashSet::from(["exp".to_string(), "aud".to_string(), "iss".to_string()]);

        let token_data = decode::<Value>(token, &key, &validation)?;
        let claims = token_data
            .claims
            .as_object()
            .cloned()
            .ok_or_else(|| AuthError::InvalidToken("claims payload is not an object".to_string()))?;

        Ok(VerifiedToken { claims })
    }

    async fn refresh_if_expired(&self) -> Result<(), AuthError> {
        let expired = {
            let keys = self.lock_keys()?;
            now_secs() >= keys.expires_at
        };
        if expired {
            self.refresh(true).await?;
        }
        Ok(())
    }

    async fn refresh(&self, required_for_request: bool) -> Result<(), AuthError> {
        let now = now_secs();
        let prev_expires_at;
        {
            let keys = self.lock_keys()?;
            if now < keys.backoff_until {
                return Err(AuthError::InvalidToken(
                    "jwks refresh in backoff window".to_string(),
                ));
            }
            if !required_for_request && now < keys.expires_at {
                return Ok(());
            }
            prev_expires_at = keys.expires_at;
        }

        match fetch_key_set(&self.client, &self.jwks_uri).await {
            Ok(new_keys) => {
                let mut keys = self.lock_keys()?;
                // Only update if no other task refreshed while we were fetching.
                if keys.expires_at == prev_expires_at {
                    *keys = new_keys;
                }
                Ok(())
            }
            Err(err) => {
                let mut keys = self.lock_keys()?;
                // Only set backoff if no other task refreshed successfully.
                if keys.expires_at == prev_expires_at {
                    keys.record_failure();
                }
                Err(err)
            }
        }
    }

    async fn decoding_key_for_kid(&self, kid: Option<&str>) -> Result<DecodingKey, AuthError> {
        if let Some(key) = self.lookup_key(kid)? {
            return decoding_key(&key);
        }

        // Unknown kid: the IdP may have rotated keys.
        self.refresh(true).await?;

        if let Some(key) = self.lookup_key(kid)? {
            return decoding_key(&key);
        }

        Err(AuthError::InvalidToken(
            "no matching jwk found for token kid".to_string(),
        ))
    }

    fn lookup_key(&self, kid: Option<&str>) -> Result<Option<RsaKeyMaterial>, AuthError> {
        Ok(self.lock_keys()?.lookup(kid))
    }

    fn lock_keys(&self) -> Result<std::sync::MutexGuard<'_, KeySet>, AuthError> {
        self.keys
            .lock()
            .map_err(|_| AuthError::Internal("jwks mutex poisoned".to_string()))
    }
}

fn decoding_key(key: &RsaKeyMaterial) -> Result<DecodingKey, AuthError> {
    DecodingKey::from_rsa_components(&key.n, &key.e)
        .map_err(|e| AuthError::InvalidToken(format!("invalid jwk: {e}")))
}

/// Claim map produced only after signature, audience, issuer and expiry
/// checks have all passed.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    claims: Map<String, Value>,
}

impl VerifiedToken {
    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    /// Restricts the claims to the whitelist and flattens each value to a
    /// string. Claim kinds outside the closed set are dropped, not errors.
    pub fn flattened(&self, whitelist: &[String]) -> HashMap<String, String> {
        self.claims
            .iter()
            .filter(|(name, _)| whitelist.iter().any(|w| w == *name))
            .filter_map(|(name, value)| flatten_claim(value).map(|v| (name.clone(), v)))
            .collect()
    }
}

/// The closed set of downstream-representable claim kinds: strings,
/// booleans, numbers and arrays of strings. Everything else has no
/// header-safe rendering and is silently omitted.
fn flatten_claim(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let strings: Option<Vec<&str>> = items.iter().map(Value::as_str).collect();
            strings.map(|s| s.join(", "))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const RSA_PRIVATE_PEM: &str = include_str!("../fixtures/test-keys/rsa-private.pem");
    const WRONG_RSA_PRIVATE_PEM: &str =
        include_str!("../fixtures/test-keys/wrong-key-private.pem");
    const JWKS_JSON: &str = include_str!("../fixtures/test-keys/jwks.json");

    fn sign(claims: &Value, private_pem: &str, kid: &str) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        let key = EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("valid rsa key");
        encode(&header, claims, &key).expect("token should sign")
    }

    async fn verifier_with_jwks(server: &mut mockito::ServerGuard) -> TokenVerifier {
        server
            .mock("GET", "/jwks")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(JWKS_JSON)
            .create_async()
            .await;
        TokenVerifier::new(
            Client::new(),
            "https://idp.example.test/",
            &format!("{}/jwks", server.url()),
        )
        .await
        .expect("verifier should initialize")
    }

    fn claims(audience: &str, issuer: &str, exp_offset: i64) -> Value {
        json!({
            "sub": "1234567890",
            "email": "user@example.com",
            "iss": issuer,
            "aud": audience,
            "iat": now_secs() as i64,
            "exp": now_secs() as i64 + exp_offset,
        })
    }

    #[tokio::test]
    async fn accepts_valid_signed_token() {
        let mut server = mockito::Server::new_async().await;
        let verifier = verifier_with_jwks(&mut server).await;

        let token = sign(
            &claims("client-123", "https://idp.example.test/", 300),
            RSA_PRIVATE_PEM,
            "test-key",
        );
        let verified = verifier.verify(&token, "client-123").await.unwrap();
        assert_eq!(
            verified.claims().get("email").and_then(Value::as_str),
            Some("user@example.com")
        );
    }

    #[tokio::test]
    async fn rejects_invalid_token_variants() {
        let mut server = mockito::Server::new_async().await;
        let verifier = verifier_with_jwks(&mut server).await;
        let issuer = "https://idp.example.test/";

        let expired = sign(&claims("client-123", issuer, -3600), RSA_PRIVATE_PEM, "test-key");
        assert!(verifier.verify(&expired, "client-123").await.is_err());

        let wrong_aud = sign(&claims("other-client", issuer, 300), RSA_PRIVATE_PEM, "test-key");
        assert!(verifier.verify(&wrong_aud, "client-123").await.is_err());

        let wrong_iss = sign(
            &claims("client-123", "https://wrong-issuer/", 300),
            RSA_PRIVATE_PEM,
            "test-key",
        );
        assert!(verifier.verify(&wrong_iss, "client-123").await.is_err());

        let wrong_sig = sign(
            &claims("client-123", issuer, 300),
            WRONG_RSA_PRIVATE_PEM,
            "test-key",
        );
        assert!(verifier.verify(&wrong_sig, "client-123").await.is_err());

        assert!(verifier.verify("not-a-jwt", "client-123").await.is_err());
    }

    #[tokio::test]
    async fn unknown_kid_triggers_refresh_then_fails() {
        let mut server = mockito::Server::new_async().await;
        // Two hits expected: initial fetch plus the unknown-kid refresh.
        let jwks_mock = server
            .mock("GET", "/jwks")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(JWKS_JSON)
            .expect(2)
            .create_async()
            .await;

        let verifier = TokenVerifier::new(
            Client::new(),
            "https://idp.example.test/",
            &format!("{}/jwks", server.url()),
        )
        .await
        .unwrap();

        let token = sign(
            &claims("client-123", "https://idp.example.test/", 300),
            RSA_PRIVATE_PEM,
            "rotated-key",
        );
        let err = verifier.verify(&token, "client-123").await.unwrap_err();
        assert!(err.to_string().contains("no matching jwk"));
        jwks_mock.assert_async().await;
    }

    #[tokio::test]
    async fn failed_refresh_backs_off_without_refetching() {
        let mut server = mockito::Server::new_async().await;
        // max-age=0: the key set is already stale by the first verify.
        let initial = server
            .mock("GET", "/jwks")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("cache-control", "max-age=0")
            .with_body(JWKS_JSON)
            .expect(1)
            .create_async()
            .await;

        let verifier = TokenVerifier::new(
            Client::new(),
            "https://idp.example.test/",
            &format!("{}/jwks", server.url()),
        )
        .await
        .unwrap();

        let failing = server
            .mock("GET", "/jwks")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let token = sign(
            &claims("client-123", "https://idp.example.test/", 300),
            RSA_PRIVATE_PEM,
            "test-key",
        );

        // First verify hits the endpoint once and fails on the 500.
        assert!(verifier.verify(&token, "client-123").await.is_err());

        // Second verify is rejected by the backoff window, no new request.
        let err = verifier.verify(&token, "client-123").await.unwrap_err();
        assert!(err.to_string().contains("backoff window"));
        failing.assert_async().await;
        initial.assert_async().await;
    }

    #[test]
    fn flatten_claim_covers_the_closed_variant_set() {
        assert_eq!(flatten_claim(&json!("a@b.com")), Some("a@b.com".to_string()));
        assert_eq!(flatten_claim(&json!(true)), Some("true".to_string()));
        assert_eq!(flatten_claim(&json!(false)), Some("false".to_string()));
        assert_eq!(flatten_claim(&json!(42)), Some("42".to_string()));
        assert_eq!(flatten_claim(&json!(["x", "y"])), Some("x, y".to_string()));
        assert_eq!(flatten_claim(&json!({"nested": 1})), None);
        assert_eq!(flatten_claim(&json!(null)), None);
        assert_eq!(flatten_claim(&json!([1, 2])), None);
    }

    #[test]
    fn flattened_respects_whitelist_and_drops_unrepresentable() {
        let token = VerifiedToken {
            claims: json!({
                "email": "a@b.com",
                "admin": true,
                "roles": ["x", "y"],
                "profile": {"name": "ignored"}
            })
            .as_object()
            .cloned()
            .unwrap(),
        };
        let whitelist = vec!["email".to_string(), "roles".to_string(), "profile".to_string()];
        let flat = token.flattened(&whitelist);
        assert_eq!(flat.get("email").map(String::as_str), Some("a@b.com"));
        assert_eq!(flat.get("roles").map(String::as_str), Some("x, y"));
        assert!(!flat.contains_key("admin"));
        assert!(!flat.contains_key("profile"));
    }
}
