use std::sync::Arc;

use tracing::{debug, info};

use crate::error::AuthError;
use crate::idp::IdpClient;
use crate::policy::PolicySet;
use crate::state::State;
use crate::token::TokenVerifier;

/// Callback inputs: query parameters from the IdP redirect plus the
/// forwarded host header and the browser's nonce cookie.
#[derive(Debug, Clone, Default)]
pub struct SigninRequest {
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub state: String,
    pub forwarded_host: String,
    pub nonce_cookie: Option<String>,
}

/// A completed sign-in: everything the HTTP layer needs to issue session
/// cookies and send the browser back where it came from.
#[derive(Debug)]
pub struct SigninOutcome {
    /// Full-encoded original URL, used verbatim as the redirect target.
    pub redirect_target: String,
    pub access_token: String,
    pub id_token: String,
    pub cookie_domain: String,
}

/// Completes the IdP callback: branch on the callback outcome, check the
/// CSRF nonce, exchange the code and hand back the session material.
pub struct SigninFlow {
    policies: Arc<PolicySet>,
    verifier: Arc<TokenVerifier>,
    idp: IdpClient,
    domain: String,
}

impl SigninFlow {
    pub fn new(
        policies: Arc<PolicySet>,
        verifier: Arc<TokenVerifier>,
        idp: IdpClient,
        domain: &str,
    ) -> Self {
        Self {
            policies,
            verifier,
            idp,
            domain: domain.to_string(),
        }
    }

    /// Four mutually exclusive branches over `{code, error}`; empty strings
    /// count as absent.
    pub async fn handle(&self, request: &SigninRequest) -> Result<SigninOutcome, AuthError> {
        let code = request.code.as_deref().filter(|c| !c.is_empty());
        let error = request.error.as_deref().filter(|e| !e.is_empty());
        let description = request.error_description.clone().unwrap_or_default();

        match (code, error) {
            (None, None) => Err(AuthError::bad_request(
                "missing field",
                "one of 'code' or 'error' must be present",
            )),
            (_, Some("unauthorized")) => Err(AuthError::unauthorized("unauthorized", description)),
            (_, Some(error)) => Err(AuthError::bad_request(error, description)),
            (Some(code), None) => self.complete(code, request).await,
        }
    }

    async fn complete(&self, code: &str, request: &SigninRequest) -> Result<SigninOutcome, AuthError> {
        debug!(host = %request.forwarded_host, "sign-in callback");
        let policy = self.policies.resolve(&request.forwarded_host);

        let state = State::decode(&request.state)?;
        let sent_nonce = request.nonce_cookie.as_deref().unwrap_or_default();
        if state.nonce.value() != sent_nonce {
            return Err(AuthError::NonceMismatch);
        }

        let tokens = self
            .idp
            .exchange_code(
                code,
                &policy.client_id,
                &policy.client_secret,
                &policy.redirect_uri,
            )
            .await?;

        // Opaque access tokens cannot be verified locally; everything else
        // must pass before a session cookie is ever issued.
        if !policy.is_opaque_audience(&self.domain) {
            self.verifier
                .verify(&tokens.access_token, &policy.audience)
                .await?;
        }

        info!(origin = %state.origin, "sign-in successful");
        Ok(SigninOutcome {
            redirect_target: state.origin.redirect_target(),
            access_token: tokens.access_token,
            id_token: tokens.id_token,
            cookie_domain: policy.cookie_domain.clone(),
        })
    }
}
