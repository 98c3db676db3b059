//! Forward-auth decision engine for edge proxies.
//!
//! The proxy (Traefik or similar) delegates each request to `/authorize`
//! and enforces the verdict; `/signin` completes the OAuth2
//! authorization-code flow with the IdP. All browser round-trip state is
//! carried in the `state` parameter and a nonce cookie, so the service
//! itself keeps no sessions.

pub mod api;
pub mod authorize;
pub mod config;
pub mod error;
pub mod idp;
pub mod jwks;
pub mod origin;
pub mod policy;
pub mod signin;
pub mod state;
pub mod token;

mod util;

pub use authorize::{AuthorizationEngine, AuthorizeRequest, AuthorizeResult};
pub use config::AppConfig;
pub use error::AuthError;
pub use origin::OriginUrl;
pub use policy::{ApplicationPolicy, PolicySet};
pub use signin::{SigninFlow, SigninOutcome, SigninRequest};
pub use state::{Nonce, State};
pub use token::{TokenVerifier, VerifiedToken};
