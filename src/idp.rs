use reqwest::Client;
use serde::Deserialize;

use crate::error::AuthError;

/// Tokens returned by the IdP for an authorization code.
#[derive(Debug, Deserialize)]
pub struct TokenExchange {
    pub access_token: String,
    pub id_token: String,
}

/// Thin client for the IdP token endpoint. One exchange per sign-in
/// attempt, bounded by the shared client's timeouts, no retries.
#[derive(Debug, Clone)]
pub struct IdpClient {
    client: Client,
    token_endpoint: String,
}

impl IdpClient {
    pub fn new(client: Client, token_endpoint: &str) -> Self {
        Self {
            client,
            token_endpoint: token_endpoint.to_string(),
        }
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
    ) -> Result<TokenExchange, AuthError> {
        let response = self
            .client
            .post(&self.token_endpoint)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::InvalidToken(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let exchange: TokenExchange = response.json().await?;
        if exchange.access_token.is_empty() || exchange.id_token.is_empty() {
            return Err(AuthError::InvalidToken(
                "token response missing access_token or id_token".to_string(),
            ));
        }
        Ok(exchange)
    }
}
