//! Key-set provider for token signature verification.
//!
//! The key set is fetched from the IdP's JWKS endpoint, cached for the
//! advertised Cache-Control max-age and refreshed on expiry or when a
//! token references an unknown key id. Refresh failures back off
//! exponentially so a broken IdP cannot be hammered.

use std::collections::HashMap;

use reqwest::header::CACHE_CONTROL;
use reqwest::Client;
use serde::Deserialize;

use crate::error::AuthError;
use crate::util::now_secs;

const DEFAULT_JWKS_MAX_AGE_SECS: u64 = 300;
const MAX_BACKOFF_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<Jwk>,
}

#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    kty: String,
    #[serde(default)]
    alg: Option<String>,
    #[serde(default, rename = "use")]
    key_use: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct RsaKeyMaterial {
    pub(crate) n: String,
    pub(crate) e: String,
}

#[derive(Debug, Clone)]
pub(crate) struct KeySet {
    keyed: HashMap<String, RsaKeyMaterial>,
    unkeyed: Vec<RsaKeyMaterial>,
    total_keys: usize,
    pub(crate) expires_at: u64,
    pub(crate) refresh_failures: u32,
    pub(crate) backoff_until: u64,
}

impl KeySet {
    /// A token without a `kid` is only acceptable when the key set holds
    /// exactly one key.
    pub(crate) fn lookup(&self, kid: Option<&str>) -> Option<RsaKeyMaterial> {
        match kid {
            Some(kid) => self.keyed.get(kid).cloned(),
            None => {
                if self.total_keys == 1 {
                    self.unkeyed
                        .first()
                        .cloned()
                        .or_else(|| self.keyed.values().next().cloned())
                } else {
                    None
                }
            }
        }
    }

    pub(crate) fn record_failure(&mut self) {
        let exponent = self.refresh_failures.min(6);
        let backoff = (1u64 << exponent).min(MAX_BACKOFF_SECS);
        self.refresh_failures = self.refresh_failures.saturating_add(1);
        self.backoff_until = now_secs() + backoff;
    }
}

pub(crate) async fn fetch_key_set(client: &Client, jwks_uri: &str) -> Result<KeySet, AuthError> {
    let response = client.get(jwks_uri).send().await?.error_for_status()?;
    let max_age = response
        .headers()
        .get(CACHE_CONTROL)
        .and_then(|h| h.to_str().ok())
        .and_then(parse_max_age)
        .unwrap_or(DEFAULT_JWKS_MAX_AGE_SECS);

    let body: JwksDocument = response.json().await?;

    let mut keyed = HashMap::new();
    let mut unkeyed = Vec::new();

    for key in body.keys {
        if key.kty != "RSA" {
            continue;
        }
        if key.alg.as_deref().is_some_and(|alg| alg != "RS256") {
            continue;
        }
        if key.key_use.as_deref().is_some_and(|u| u != "sig") {
            continue;
        }

        let n = match key.n {
            Some(v) if !v.trim().is_empty() => v,
            _ => continue,
        };
        let e = match key.e {
            Some(v) if !v.trim().is_empty() => v,
            _ => continue,
        };

        let material = RsaKeyMaterial { n, e };
        match key.kid {
            Some(kid) if !kid.trim().is_empty() => {
                keyed.insert(kid, material);
            }
            _ => unkeyed.push(material),
        }
    }

    let total_keys = keyed.len() + unkeyed.len();
    if total_keys == 0 {
        return Err(AuthError::InvalidToken(
            "jwks does not contain usable RSA keys".to_string(),
        ));
    }

    Ok(KeySet {
        keyed,
        unkeyed,
        total_keys,
        expires_at: now_secs().saturating_add(max_age),
        refresh_failures: 0,
        backoff_until: 0,
    })
}

fn parse_max_age(cache_control: &str) -> Option<u64> {
    cache_control
        .split(',')
        .map(str::trim)
        .find_map(|directive| {
            directive
                .strip_prefix("max-age=")
                .and_then(|val| val.parse::<u64>().ok())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const JWKS_JSON: &str = include_str!("../fixtures/test-keys/jwks.json");

    #[test]
    fn parse_max_age_extracts_correct_value() {
        assert_eq!(parse_max_age("max-age=300"), Some(300));
        assert_eq!(parse_max_age("public, max-age=120"), Some(120));
        assert_eq!(parse_max_age("no-cache, no-store"), None);
        assert_eq!(parse_max_age("max-age=abc"), None);
        assert_eq!(parse_max_age("s-maxage=300"), None);
    }

    #[test]
    fn lookup_without_kid_requires_a_single_key() {
        let material = RsaKeyMaterial {
            n: "AQAB".to_string(),
            e: "AQAB".to_string(),
        };
        let single = KeySet {
            keyed: HashMap::from([("a".to_string(), material.clone())]),
            unkeyed: Vec::new(),
            total_keys: 1,
            expires_at: now_secs() + 60,
            refresh_failures: 0,
            backoff_until: 0,
        };
        assert!(single.lookup(None).is_some());
        assert!(single.lookup(Some("a")).is_some());
        assert!(single.lookup(Some("b")).is_none());

        let multi = KeySet {
            keyed: HashMap::from([
                ("a".to_string(), material.clone()),
                ("b".to_string(), material),
            ]),
            unkeyed: Vec::new(),
            total_keys: 2,
            expires_at: now_secs() + 60,
            refresh_failures: 0,
            backoff_until: 0,
        };
        assert!(multi.lookup(None).is_none());
    }

    #[tokio::test]
    async fn absurd_max_age_saturates_instead_of_overflowing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/jwks")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("cache-control", &format!("max-age={}", u64::MAX))
            .with_body(JWKS_JSON)
            .create_async()
            .await;

        let set = fetch_key_set(&Client::new(), &format!("{}/jwks", server.url()))
            .await
            .unwrap();
        assert_eq!(set.expires_at, u64::MAX);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let mut set = KeySet {
            keyed: HashMap::new(),
            unkeyed: Vec::new(),
            total_keys: 0,
            expires_at: 0,
            refresh_failures: 0,
            backoff_until: 0,
        };
        set.record_failure();
        assert!(set.backoff_until >= now_secs() + 1);
        for _ in 0..10 {
            set.record_failure();
        }
        assert!(set.backoff_until <= now_secs() + MAX_BACKOFF_SECS);
    }
}
