//! HTTP surface consumed by the edge proxy and the browser.
//!
//! `/authorize` is the forward-auth hook: the proxy sends the original
//! request metadata in `x-forwarded-*` headers and acts on the verdict.
//! `/signin` is the OAuth2 callback the IdP redirects back to.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use axum_extra::extract::cookie::{Cookie, SameSite};
use axum_extra::extract::CookieJar;
use reqwest::Client;
use serde::Deserialize;
use tracing::error;

use crate::authorize::{AuthorizationEngine, AuthorizeRequest};
use crate::config::AppConfig;
use crate::error::AuthError;
use crate::idp::IdpClient;
use crate::signin::{SigninFlow, SigninRequest};
use crate::token::TokenVerifier;

pub const ACCESS_TOKEN_COOKIE: &str = "ACCESS_TOKEN";
pub const JWT_TOKEN_COOKIE: &str = "JWT_TOKEN";
pub const NONCE_COOKIE: &str = "AUTH_NONCE";

const CLAIM_HEADER_PREFIX: &str = "x-forwardauth-";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AuthorizationEngine>,
    pub signin: Arc<SigninFlow>,
}

impl AppState {
    /// Wires the engine and sign-in flow from a normalized config.
    /// Fails closed if the initial JWKS fetch does.
    pub async fn from_config(config: &AppConfig, client: Client) -> Result<Self, AuthError> {
        let verifier = Arc::new(
            TokenVerifier::new(client.clone(), &config.domain, &config.jwks_uri).await?,
        );
        let policies = Arc::new(config.policy_set());
        let idp = IdpClient::new(client, &config.token_endpoint);

        Ok(Self {
            engine: Arc::new(AuthorizationEngine::new(
                policies.clone(),
                verifier.clone(),
                &config.domain,
            )),
            signin: Arc::new(SigninFlow::new(policies, verifier, idp, &config.domain)),
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/authorize", get(authorize))
        .route("/signin", get(signin))
        .with_state(state)
}

async fn authorize(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<Response, AuthError> {
    let request = AuthorizeRequest {
        protocol: required_header(&headers, "x-forwarded-proto")?,
        host: required_header(&headers, "x-forwarded-host")?,
        uri: required_header(&headers, "x-forwarded-uri")?,
        method: header_value(&headers, "x-forwarded-method").unwrap_or_else(|| "GET".to_string()),
        access_token: jar
            .get(ACCESS_TOKEN_COOKIE)
            .map(|c| c.value().to_string())
            .or_else(|| bearer_token(&headers)),
        id_token: jar.get(JWT_TOKEN_COOKIE).map(|c| c.value().to_string()),
    };

    let result = state.engine.authorize(&request).await?;

    if result.is_authenticated || !result.is_restricted_url {
        let mut claim_headers = HeaderMap::new();
        for (name, value) in &result.claims {
            let header = format!("{CLAIM_HEADER_PREFIX}{name}");
            match (
                HeaderName::from_bytes(header.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    claim_headers.insert(name, value);
                }
                // Claim names or values that cannot travel as headers are
                // dropped, same as unrepresentable claim kinds.
                _ => continue,
            }
        }
        return Ok((StatusCode::NO_CONTENT, claim_headers).into_response());
    }

    let nonce_cookie = Cookie::build((NONCE_COOKIE, result.nonce.value().to_string()))
        .domain(result.cookie_domain.clone())
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .build();

    Ok((
        jar.add(nonce_cookie),
        Redirect::temporary(result.redirect_url.as_str()),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct SigninParams {
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
    #[serde(default)]
    state: String,
}

async fn signin(
    State(state): State<AppState>,
    Query(params): Query<SigninParams>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<Response, AuthError> {
    let request = SigninRequest {
        code: params.code,
        error: params.error,
        error_description: params.error_description,
        state: params.state,
        forwarded_host: required_header(&headers, "x-forwarded-host")?,
        nonce_cookie: jar.get(NONCE_COOKIE).map(|c| c.value().to_string()),
    };

    let outcome = state.signin.handle(&request).await?;

    let jar = jar
        .add(session_cookie(
            ACCESS_TOKEN_COOKIE,
            outcome.access_token.clone(),
            &outcome.cookie_domain,
        ))
        .add(session_cookie(
            JWT_TOKEN_COOKIE,
            outcome.id_token.clone(),
            &outcome.cookie_domain,
        ))
        .add(expired_nonce_cookie(&outcome.cookie_domain));

    Ok((jar, Redirect::temporary(&outcome.redirect_target)).into_response())
}

/// Session cookies carry no explicit max-age; they live until the browser
/// session ends or the token inside them expires.
fn session_cookie(name: &'static str, value: String, domain: &str) -> Cookie<'static> {
    Cookie::build((name, value))
        .domain(domain.to_string())
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Empty value with zero lifetime clears the nonce immediately; it has
/// served its single use.
fn expired_nonce_cookie(domain: &str) -> Cookie<'static> {
    Cookie::build((NONCE_COOKIE, ""))
        .domain(domain.to_string())
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::ZERO)
        .build()
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn required_header(headers: &HeaderMap, name: &str) -> Result<String, AuthError> {
    header_value(headers, name)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::bad_request("missing header", format!("'{name}' is required")))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    header_value(headers, "authorization")
        .and_then(|v| v.strip_prefix("Bearer ").map(str::to_string))
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error, description) = match self {
            AuthError::BadRequest { error, description } => {
                (StatusCode::BAD_REQUEST, error, description)
            }
            AuthError::Unauthorized { error, description } => {
                (StatusCode::FORBIDDEN, error, description)
            }
            AuthError::NonceMismatch => (
                StatusCode::FORBIDDEN,
                "csrf_failure".to_string(),
                "state nonce does not match the nonce cookie".to_string(),
            ),
            AuthError::InvalidState(description) => {
                (StatusCode::BAD_REQUEST, "invalid_state".to_string(), description)
            }
            AuthError::InvalidToken(_) | AuthError::Jwt(_) => (
                StatusCode::FORBIDDEN,
                "invalid_token".to_string(),
                "token verification failed".to_string(),
            ),
            other => {
                error!(error = %other, "unclassified failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "server_fault".to_string(),
                    "unexpected error".to_string(),
                )
            }
        };

        (
            status,
            Json(serde_json::json!({
                "error": error,
                "error_description": description
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_requires_the_scheme_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc123"));

        headers.insert("authorization", HeaderValue::from_static("Basic abc123"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn required_header_rejects_missing_and_empty() {
        let mut headers = HeaderMap::new();
        assert!(required_header(&headers, "x-forwarded-host").is_err());
        headers.insert("x-forwarded-host", HeaderValue::from_static(""));
        assert!(required_header(&headers, "x-forwarded-host").is_err());
        headers.insert("x-forwarded-host", HeaderValue::from_static("a.example"));
        assert_eq!(
            required_header(&headers, "x-forwarded-host").unwrap(),
            "a.example"
        );
    }
}
