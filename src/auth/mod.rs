//! Bearer credential verification.
//!
//! Two strategies co-exist: a preshared-secret HMAC verifier ([`JwtVerifier`])
//! and an OIDC ID-token verifier ([`OidcVerifier`]); both produce the same
//! [`Claims`] record. [`AuthVerifier`] dispatches on the configured auth type
//! and owns the skip list, which is consulted before any credential is
//! inspected.
pub mod jwt;
pub mod oidc;

use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

pub use jwt::JwtVerifier;
pub use oidc::OidcVerifier;

use crate::{
    config::{AuthConfig, AuthType},
    ports::http_client::HttpClient,
};

/// Verified identity attached to a request. Immutable after verification and
/// discarded with the request.
#[derive(Debug, Clone)]
pub struct Claims {
    pub subject: String,
    pub user_id: String,
    pub email: String,
    pub roles: Vec<String>,
    /// Raw claim bag for attributes the gateway does not model
    pub raw: Map<String, Value>,
}

impl Claims {
    /// Build a claims record from a raw claim map.
    pub fn from_raw(raw: Map<String, Value>) -> Self {
        Self {
            subject: extract_string(&raw, "sub"),
            user_id: extract_string(&raw, "user_id"),
            email: extract_string(&raw, "email"),
            roles: extract_string_list(&raw, "roles"),
            raw,
        }
    }

    /// The identity admissions are counted under: `user_id` when present,
    /// else the token subject.
    pub fn principal(&self) -> &str {
        if self.user_id.is_empty() {
            &self.subject
        } else {
            &self.user_id
        }
    }

    /// Whether the user carries a specific role.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Fixed claims for the `mock` auth type (test-only).
    pub fn mock() -> Self {
        Self {
            subject: "mock-user".to_string(),
            user_id: "mock-user-id".to_string(),
            email: "mock@example.com".to_string(),
            roles: vec!["user".to_string()],
            raw: Map::new(),
        }
    }
}

fn extract_string(claims: &Map<String, Value>, key: &str) -> String {
    claims
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn extract_string_list(claims: &Map<String, Value>, key: &str) -> Vec<String> {
    claims
        .get(key)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Credential verification failures.
///
/// Display strings are the fixed short messages shown to callers; internal
/// detail stays in [`AuthError::detail`] for logging only.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken(String),

    #[error("Invalid authentication configuration")]
    NotConfigured(&'static str),
}

impl AuthError {
    /// Label for the `auth_failures_total{reason}` metric.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::InvalidToken(_) => "invalid_token",
            AuthError::NotConfigured(_) => "not_configured",
        }
    }

    /// Internal failure detail, never sent to callers.
    pub fn detail(&self) -> &str {
        match self {
            AuthError::MissingToken => "no Authorization header present",
            AuthError::InvalidToken(detail) => detail,
            AuthError::NotConfigured(detail) => detail,
        }
    }
}

/// Strip an optional `Bearer ` prefix and surrounding whitespace.
pub(crate) fn strip_bearer(token: &str) -> &str {
    token.strip_prefix("Bearer ").unwrap_or(token).trim()
}

/// Validates bearer credentials and produces [`Claims`] records.
pub struct AuthVerifier {
    auth_type: AuthType,
    jwt: Option<JwtVerifier>,
    oidc: Option<OidcVerifier>,
    skip_paths: Vec<String>,
}

impl AuthVerifier {
    /// Build a verifier from configuration.
    ///
    /// For `oidc` and `both` this performs issuer discovery and an initial
    /// JWKS fetch through the shared HTTP client.
    pub async fn from_config(
        config: &AuthConfig,
        http_client: Arc<dyn HttpClient>,
    ) -> eyre::Result<Self> {
        let jwt = if matches!(config.auth_type, AuthType::Jwt | AuthType::Both) {
            Some(JwtVerifier::new(&config.jwt_secret)?)
        } else {
            None
        };

        let oidc = if matches!(config.auth_type, AuthType::Oidc | AuthType::Both) {
            Some(
                OidcVerifier::discover(&config.oidc_issuer, &config.oidc_client_id, http_client)
                    .await?,
            )
        } else {
            None
        };

        tracing::info!(auth_type = config.auth_type.as_str(), "Authentication initialized");

        Ok(Self {
            auth_type: config.auth_type,
            jwt,
            oidc,
            skip_paths: config.skip_auth_paths.clone(),
        })
    }

    /// A verifier that accepts everything with synthetic claims (test-only).
    pub fn mock() -> Self {
        Self {
            auth_type: AuthType::Mock,
            jwt: None,
            oidc: None,
            skip_paths: AuthConfig::default().skip_auth_paths,
        }
    }

    /// The configured verification strategy.
    pub fn auth_type(&self) -> AuthType {
        self.auth_type
    }

    /// Whether a path bypasses authentication entirely.
    pub fn should_skip(&self, path: &str) -> bool {
        self.skip_paths
            .iter()
            .any(|skip_path| path.starts_with(skip_path.as_str()))
    }

    /// Verify the Authorization header value and produce claims.
    pub async fn verify(&self, authorization: Option<&str>) -> Result<Claims, AuthError> {
        if self.auth_type == AuthType::Mock {
            return Ok(Claims::mock());
        }

        let header = authorization.ok_or(AuthError::MissingToken)?;

        match self.auth_type {
            AuthType::Jwt => self.verify_jwt(header),
            AuthType::Oidc => self.verify_oidc(header).await,
            AuthType::Both => match self.verify_jwt(header) {
                Ok(claims) => Ok(claims),
                Err(_) => self.verify_oidc(header).await,
            },
            AuthType::Mock => Ok(Claims::mock()),
        }
    }

    fn verify_jwt(&self, token: &str) -> Result<Claims, AuthError> {
        let verifier = self
            .jwt
            .as_ref()
            .ok_or(AuthError::NotConfigured("JWT verifier not configured"))?;
        verifier.verify(token)
    }

    async fn verify_oidc(&self, token: &str) -> Result<Claims, AuthError> {
        let verifier = self
            .oidc
            .as_ref()
            .ok_or(AuthError::NotConfigured("OIDC verifier not configured"))?;
        verifier.verify(token).await
    }
}
