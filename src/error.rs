use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{error}: {description}")]
    BadRequest { error: String, description: String },
    #[error("{error}: {description}")]
    Unauthorized { error: String, description: String },
    #[error("nonce mismatch between state and cookie")]
    NonceMismatch,
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn bad_request(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::BadRequest {
            error: error.into(),
            description: description.into(),
        }
    }

    pub fn unauthorized(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Unauthorized {
            error: error.into(),
            description: description.into(),
        }
    }
}
