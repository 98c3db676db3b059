use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use crate::error::AuthError;
use crate::origin::OriginUrl;
use crate::policy::{ApplicationPolicy, PolicySet};
use crate::state::{Nonce, State};
use crate::token::TokenVerifier;

/// Inputs forwarded by the edge proxy for one request.
#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub protocol: String,
    pub host: String,
    pub uri: String,
    pub method: String,
    pub access_token: Option<String>,
    pub id_token: Option<String>,
}

/// The verdict for one request. Built fresh every time, never cached.
#[derive(Debug)]
pub struct AuthorizeResult {
    pub is_authenticated: bool,
    pub is_restricted_url: bool,
    /// Always computed; whether to use it is the proxy's decision.
    pub redirect_url: Url,
    pub nonce: Nonce,
    pub cookie_domain: String,
    pub claims: HashMap<String, String>,
}

/// The authorize decision function: stateless over the immutable policy
/// snapshot plus request-scoped inputs.
pub struct AuthorizationEngine {
    policies: Arc<PolicySet>,
    verifier: Arc<TokenVerifier>,
    domain: String,
}

impl AuthorizationEngine {
    pub fn new(policies: Arc<PolicySet>, verifier: Arc<TokenVerifier>, domain: &str) -> Self {
        Self {
            policies,
            verifier,
            domain: domain.to_string(),
        }
    }

    /// Decides authentication and restriction for one request.
    ///
    /// Token verification failures never surface as errors; the proxy
    /// always needs a definite decision, so they collapse to
    /// `is_authenticated = false`. The only `Err` cases are
    /// infrastructure faults such as state encoding.
    pub async fn authorize(&self, request: &AuthorizeRequest) -> Result<AuthorizeResult, AuthError> {
        let policy = self.policies.resolve(&request.host);
        let origin = OriginUrl::new(&request.protocol, &request.host, &request.uri);
        debug!(origin = %origin, app = %policy.name, "authorize request");

        let nonce = Nonce::generate();
        let state = State::new(origin.clone(), nonce.clone());
        let redirect_url = policy.authorize_redirect(&state.encode()?)?;

        let mut claims = HashMap::new();
        let is_authenticated = match self.verify_tokens(request, policy, &mut claims).await {
            Ok(authenticated) => authenticated,
            Err(err) => {
                warn!(error = %err, "token verification failed");
                false
            }
        };

        let is_restricted_url = policy.is_restricted_method(&request.method)
            && !origin.starts_with(&policy.redirect_uri);

        Ok(AuthorizeResult {
            is_authenticated,
            is_restricted_url,
            redirect_url,
            nonce,
            cookie_domain: policy.cookie_domain.clone(),
            claims,
        })
    }

    /// Both tokens are required. The ID token carries the identity and is
    /// always verified against the policy's client id; the access token is
    /// verified against the policy audience unless the policy runs in
    /// opaque-audience mode, where presence alone suffices.
    async fn verify_tokens(
        &self,
        request: &AuthorizeRequest,
        policy: &ApplicationPolicy,
        claims: &mut HashMap<String, String>,
    ) -> Result<bool, AuthError> {
        let id_token = match non_empty(request.id_token.as_deref()) {
            Some(token) => token,
            None => return Ok(false),
        };
        let verified = self.verifier.verify(id_token, &policy.client_id).await?;
        *claims = verified.flattened(&policy.claims);

        let access_token = match non_empty(request.access_token.as_deref()) {
            Some(token) => token,
            None => return Ok(false),
        };
        if !policy.is_opaque_audience(&self.domain) {
            self.verifier.verify(access_token, &policy.audience).await?;
        }

        Ok(true)
    }
}

fn non_empty(token: Option<&str>) -> Option<&str> {
    token.filter(|t| !t.is_empty())
}
