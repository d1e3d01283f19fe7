use std::{collections::HashMap, sync::Arc};

use axum::body::Body as AxumBody;
use eyre::{Result, bail, eyre};
use http_body_util::BodyExt;
use hyper::Request;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::{
    auth::{AuthError, Claims, strip_bearer},
    ports::http_client::HttpClient,
};

/// Relevant subset of the issuer's discovery document.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub jwks_uri: String,
}

/// A JSON Web Key as published by the issuer.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
}

/// JSON Web Key Set document.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// OIDC ID-token verifier.
///
/// The issuer's discovery document is resolved once at construction; RSA
/// verification keys are cached by key id and refreshed when a token names an
/// unknown kid. Issuer, audience (the client id), expiry and not-before are
/// all enforced.
pub struct OidcVerifier {
    issuer: String,
    client_id: String,
    jwks_uri: String,
    http_client: Arc<dyn HttpClient>,
    keys: RwLock<HashMap<String, Jwk>>,
}

impl OidcVerifier {
    /// Resolve the issuer's discovery document and load its key set.
    pub async fn discover(
        issuer: &str,
        client_id: &str,
        http_client: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        if issuer.is_empty() {
            bail!("OIDC issuer cannot be empty");
        }

        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );
        let metadata: ProviderMetadata = fetch_json(&http_client, &discovery_url).await?;

        let verifier = Self {
            issuer: metadata.issuer,
            client_id: client_id.to_string(),
            jwks_uri: metadata.jwks_uri,
            http_client,
            keys: RwLock::new(HashMap::new()),
        };
        verifier.refresh_jwks().await?;

        Ok(verifier)
    }

    /// Re-fetch the key set from the issuer, replacing the cache.
    pub async fn refresh_jwks(&self) -> Result<()> {
        let jwks: Jwks = fetch_json(&self.http_client, &self.jwks_uri).await?;

        let mut keys = self.keys.write().await;
        keys.clear();
        for key in jwks.keys {
            if key.kty == "RSA" {
                if let Some(kid) = key.kid.clone() {
                    keys.insert(kid, key);
                }
            }
        }

        tracing::debug!(key_count = keys.len(), "JWKS cache refreshed");
        Ok(())
    }

    /// Number of cached verification keys.
    pub async fn key_count(&self) -> usize {
        self.keys.read().await.len()
    }

    /// Verify an ID token and extract its claims.
    pub async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let token = strip_bearer(token);

        let header = decode_header(token)
            .map_err(|e| AuthError::InvalidToken(format!("failed to parse token header: {e}")))?;

        if !matches!(
            header.alg,
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512
        ) {
            return Err(AuthError::InvalidToken(format!(
                "unexpected signing algorithm: {:?}",
                header.alg
            )));
        }

        let kid = header
            .kid
            .ok_or_else(|| AuthError::InvalidToken("token has no key id".to_string()))?;

        let mut jwk = self.lookup_key(&kid).await;
        if jwk.is_none() {
            // Unknown kid: the issuer may have rotated keys since the last fetch
            if let Err(e) = self.refresh_jwks().await {
                tracing::warn!(error = %e, "JWKS refresh failed during verification");
            }
            jwk = self.lookup_key(&kid).await;
        }
        let jwk = jwk.ok_or_else(|| AuthError::InvalidToken(format!("unknown key id: {kid}")))?;

        let modulus = jwk
            .n
            .as_deref()
            .ok_or_else(|| AuthError::InvalidToken("key has no modulus".to_string()))?;
        let exponent = jwk
            .e
            .as_deref()
            .ok_or_else(|| AuthError::InvalidToken("key has no exponent".to_string()))?;
        let decoding_key = DecodingKey::from_rsa_components(modulus, exponent)
            .map_err(|e| AuthError::InvalidToken(format!("failed to build key: {e}")))?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.validate_nbf = true;

        let data = decode::<Map<String, Value>>(token, &decoding_key, &validation)
            .map_err(|e| AuthError::InvalidToken(format!("failed to verify token: {e}")))?;

        Ok(Claims::from_raw(data.claims))
    }

    async fn lookup_key(&self, kid: &str) -> Option<Jwk> {
        self.keys.read().await.get(kid).cloned()
    }
}

/// GET a JSON document through the shared HTTP client port.
async fn fetch_json<T: serde::de::DeserializeOwned>(
    client: &Arc<dyn HttpClient>,
    url: &str,
) -> Result<T> {
    let request = Request::builder()
        .method("GET")
        .uri(url)
        .body(AxumBody::empty())?;

    let response = client
        .send_request(request)
        .await
        .map_err(|e| eyre!("request to {url} failed: {e}"))?;

    if !response.status().is_success() {
        bail!("request to {url} returned status {}", response.status());
    }

    let bytes = response
        .into_body()
        .collect()
        .await
        .map_err(|e| eyre!("failed to read body from {url}: {e}"))?
        .to_bytes();

    serde_json::from_slice(&bytes).map_err(|e| eyre!("failed to decode JSON from {url}: {e}"))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use hyper::Response;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    use super::*;
    use crate::ports::http_client::{HttpClientError, HttpClientResult};

    /// Serves a canned discovery document and key set.
    struct FakeIssuer;

    #[async_trait]
    impl HttpClient for FakeIssuer {
        async fn send_request(
            &self,
            req: Request<AxumBody>,
        ) -> HttpClientResult<Response<AxumBody>> {
            let body = match req.uri().path() {
                "/.well-known/openid-configuration" => json!({
                    "issuer": "https://issuer.test",
                    "jwks_uri": "https://issuer.test/keys",
                    "authorization_endpoint": "https://issuer.test/auth"
                }),
                "/keys" => json!({
                    "keys": [
                        {"kty": "RSA", "kid": "key-1", "use": "sig", "n": "AQAB", "e": "AQAB"},
                        {"kty": "EC", "kid": "ec-key", "crv": "P-256"}
                    ]
                }),
                other => {
                    return Err(HttpClientError::InvalidRequest(format!(
                        "unexpected path: {other}"
                    )));
                }
            };

            Ok(Response::builder()
                .status(200)
                .body(AxumBody::from(body.to_string()))
                .expect("static response"))
        }

        async fn health_check(&self, _url: &str, _timeout_secs: u64) -> HttpClientResult<bool> {
            Ok(true)
        }
    }

    async fn verifier() -> OidcVerifier {
        OidcVerifier::discover("https://issuer.test", "my-client", Arc::new(FakeIssuer))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_discovery_loads_rsa_keys_only() {
        let verifier = verifier().await;
        // The EC key is skipped; only the RSA key is cached
        assert_eq!(verifier.key_count().await, 1);
    }

    #[tokio::test]
    async fn test_rejects_hmac_tokens() {
        let verifier = verifier().await;
        let token = encode(
            &Header::default(),
            &json!({"sub": "u", "exp": chrono::Utc::now().timestamp() + 60}),
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();

        let err = verifier.verify(&token).await.unwrap_err();
        assert_eq!(err.reason(), "invalid_token");
        assert!(err.detail().contains("unexpected signing algorithm"));
    }

    #[tokio::test]
    async fn test_rejects_token_without_kid() {
        let verifier = verifier().await;
        // RS256 header without kid, assembled by hand since encode() would
        // need a real RSA key; the signature never gets checked
        let header = serde_json::to_vec(&Header::new(Algorithm::RS256)).unwrap();
        let token = format!(
            "{}.{}.c2ln",
            base64_url_encode(&header),
            base64_url_encode(br#"{"sub":"u"}"#)
        );

        let err = verifier.verify(&token).await.unwrap_err();
        assert!(err.detail().contains("no key id"));
    }

    #[tokio::test]
    async fn test_rejects_garbage() {
        let verifier = verifier().await;
        assert!(verifier.verify("definitely-not-a-jwt").await.is_err());
    }

    fn base64_url_encode(input: &[u8]) -> String {
        const ALPHABET: &[u8] =
            b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
        let mut out = String::new();
        for chunk in input.chunks(3) {
            let b = [
                chunk[0],
                chunk.get(1).copied().unwrap_or(0),
                chunk.get(2).copied().unwrap_or(0),
            ];
            let n = (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2]);
            out.push(ALPHABET[(n >> 18) as usize & 63] as char);
            out.push(ALPHABET[(n >> 12) as usize & 63] as char);
            if chunk.len() > 1 {
                out.push(ALPHABET[(n >> 6) as usize & 63] as char);
            }
            if chunk.len() > 2 {
                out.push(ALPHABET[n as usize & 63] as char);
            }
        }
        out
    }
}
