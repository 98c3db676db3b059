use std::fs;
use std::path::Path;

use serde::Deserialize;
use url::Url;

use crate::error::AuthError;
use crate::policy::{ApplicationPolicy, PolicySet};

/// Top-level service configuration, read from a JSON file once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// IdP issuer base URL (e.g. `https://tenant.example.auth0.com/`).
    /// Always normalized to end with a slash.
    pub domain: String,
    /// Token endpoint used for the authorization-code exchange.
    /// Defaults to `{domain}oauth/token`.
    #[serde(default)]
    pub token_endpoint: String,
    /// JWKS endpoint for signature verification keys.
    /// Defaults to `{domain}.well-known/jwks.json`.
    #[serde(default)]
    pub jwks_uri: String,
    /// Fallback policy for hosts with no dedicated application entry.
    pub default: ApplicationPolicy,
    #[serde(default)]
    pub applications: Vec<ApplicationPolicy>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            AuthError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: AppConfig = serde_json::from_str(&raw)
            .map_err(|e| AuthError::InvalidConfig(format!("{}: {e}", path.display())))?;
        config.normalize()
    }

    pub fn normalize(mut self) -> Result<Self, AuthError> {
        if self.domain.trim().is_empty() {
            return Err(AuthError::InvalidConfig("domain is required".to_string()));
        }
        if !self.domain.ends_with('/') {
            self.domain.push('/');
        }
        Url::parse(&self.domain)
            .map_err(|e| AuthError::InvalidConfig(format!("domain is not a valid URL: {e}")))?;

        if self.token_endpoint.trim().is_empty() {
            self.token_endpoint = format!("{}oauth/token", self.domain);
        }
        if self.jwks_uri.trim().is_empty() {
            self.jwks_uri = format!("{}.well-known/jwks.json", self.domain);
        }

        let domain = self.domain.clone();
        self.default = self.default.normalize(&domain)?;
        self.applications = std::mem::take(&mut self.applications)
            .into_iter()
            .map(|app| {
                if app.name.trim().is_empty() {
                    return Err(AuthError::InvalidConfig(
                        "application entries must name the host they apply to".to_string(),
                    ));
                }
                app.normalize(&domain)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(self)
    }

    pub fn policy_set(&self) -> PolicySet {
        PolicySet::new(self.default.clone(), self.applications.clone())
    }
}
