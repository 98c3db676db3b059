use serde::Deserialize;
use url::Url;

use crate::error::AuthError;

const DEFAULT_SCOPE: &str = "profile openid email";

fn default_restricted_methods() -> Vec<String> {
    ["DELETE", "GET", "HEAD", "OPTIONS", "PATCH", "POST", "PUT", "TRACE"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

/// Per-application security policy, resolved by forwarded host name.
///
/// Loaded once at startup and immutable afterwards; shared behind an `Arc`
/// with no synchronization.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationPolicy {
    /// Host name this policy applies to. Empty for the default policy.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Expected access-token audience. The sentinel `{domain}userinfo`
    /// selects opaque-audience mode where the access token is not locally
    /// verified.
    #[serde(default)]
    pub audience: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub cookie_domain: String,
    /// Base URL of the IdP authorize endpoint for this application.
    #[serde(default)]
    pub authorize_url: String,
    /// HTTP methods that require authentication.
    #[serde(default = "default_restricted_methods")]
    pub restricted_methods: Vec<String>,
    /// Claim names exposed downstream after a successful ID-token check.
    #[serde(default)]
    pub claims: Vec<String>,
}

impl ApplicationPolicy {
    /// Fill defaults and reject unusable policies, mirroring what the
    /// config layer does for the top-level settings. `domain` is the
    /// issuer base URL and always ends with a slash.
    pub(crate) fn normalize(mut self, domain: &str) -> Result<Self, AuthError> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::InvalidConfig(format!(
                "policy '{}': client_id is required",
                self.name
            )));
        }
        if self.client_secret.trim().is_empty() {
            return Err(AuthError::InvalidConfig(format!(
                "policy '{}': client_secret is required",
                self.name
            )));
        }
        if self.redirect_uri.trim().is_empty() {
            return Err(AuthError::InvalidConfig(format!(
                "policy '{}': redirect_uri is required",
                self.name
            )));
        }
        if self.cookie_domain.trim().is_empty() {
            return Err(AuthError::InvalidConfig(format!(
                "policy '{}': cookie_domain is required",
                self.name
            )));
        }
        if self.scope.trim().is_empty() {
            self.scope = DEFAULT_SCOPE.to_string();
        }
        if self.audience.trim().is_empty() {
            self.audience = format!("{domain}userinfo");
        }
        if self.authorize_url.trim().is_empty() {
            self.authorize_url = format!("{domain}authorize");
        }
        Url::parse(&self.authorize_url).map_err(|e| {
            AuthError::InvalidConfig(format!(
                "policy '{}': authorize_url is not a valid URL: {e}",
                self.name
            ))
        })?;
        Ok(self)
    }

    /// Opaque-audience mode: the access token is provider-introspectable
    /// and skipped by local verification.
    pub fn is_opaque_audience(&self, domain: &str) -> bool {
        self.audience
            .eq_ignore_ascii_case(&format!("{domain}userinfo"))
    }

    pub fn is_restricted_method(&self, method: &str) -> bool {
        self.restricted_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method))
    }

    /// Full IdP authorize redirect for this application carrying the
    /// encoded state. The base URL is validated at load time.
    pub fn authorize_redirect(&self, state: &str) -> Result<Url, AuthError> {
        let mut url = Url::parse(&self.authorize_url)?;
        url.query_pairs_mut()
            .append_pair("audience", &self.audience)
            .append_pair("scope", &self.scope)
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("state", state);
        Ok(url)
    }
}

/// Immutable policy snapshot: one default plus any number of per-host
/// applications. Pure lookup, no I/O.
#[derive(Debug)]
pub struct PolicySet {
    default: ApplicationPolicy,
    applications: Vec<ApplicationPolicy>,
}

impl PolicySet {
    pub fn new(default: ApplicationPolicy, applications: Vec<ApplicationPolicy>) -> Self {
        Self {
            default,
            applications,
        }
    }

    /// Exact (case-insensitive) host match, falling back to the default.
    pub fn resolve(&self, host: &str) -> &ApplicationPolicy {
        self.applications
            .iter()
            .find(|app| app.name.eq_ignore_ascii_case(host))
            .unwrap_or(&self.default)
    }
}
