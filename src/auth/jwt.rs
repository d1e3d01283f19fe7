use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde_json::{Map, Value};

use crate::auth::{AuthError, Claims, strip_bearer};

/// Preshared-secret bearer verifier.
///
/// Accepts only the HMAC family; a token signed with any other algorithm is
/// rejected before signature verification. Expiry is always enforced.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Create a new verifier from the shared secret.
    pub fn new(secret: &str) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::NotConfigured("JWT secret cannot be empty"));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// Verify a bearer token and extract its claims.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let token = strip_bearer(token);

        let data = decode::<Map<String, Value>>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(format!("failed to parse token: {e}")))?;

        Ok(Claims::from_raw(data.claims))
    }
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    use super::*;

    const SECRET: &str = "test-secret";

    fn sign(claims: &Value, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn future_exp() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[test]
    fn test_verify_valid_token() {
        let verifier = JwtVerifier::new(SECRET).unwrap();
        let token = sign(
            &json!({
                "sub": "user-1",
                "user_id": "42",
                "email": "a@b.c",
                "roles": ["user"],
                "exp": future_exp(),
            }),
            SECRET,
        );

        let claims = verifier.verify(&token).unwrap();
        assert_eq!(claims.subject, "user-1");
        assert_eq!(claims.principal(), "42");
        assert!(claims.has_role("user"));
    }

    #[test]
    fn test_verify_accepts_bearer_prefix() {
        let verifier = JwtVerifier::new(SECRET).unwrap();
        let token = sign(&json!({"sub": "u", "exp": future_exp()}), SECRET);
        assert!(verifier.verify(&format!("Bearer {token}")).is_ok());
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let verifier = JwtVerifier::new(SECRET).unwrap();
        let token = sign(&json!({"sub": "u", "exp": future_exp()}), "other-secret");
        let err = verifier.verify(&token).unwrap_err();
        assert_eq!(err.reason(), "invalid_token");
    }

    #[test]
    fn test_verify_rejects_expired_token() {
        let verifier = JwtVerifier::new(SECRET).unwrap();
        let token = sign(
            &json!({"sub": "u", "exp": chrono::Utc::now().timestamp() - 60}),
            SECRET,
        );
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn test_verify_rejects_garbage() {
        let verifier = JwtVerifier::new(SECRET).unwrap();
        assert!(verifier.verify("not-a-token").is_err());
        assert!(verifier.verify("").is_err());
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(JwtVerifier::new("").is_err());
    }
}
