use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fs;

use crate::config::JwtConfig;

/// Claims issued by the identity layer. Only `sub` is used here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
}

/// Validates bearer tokens. Signing is only available with a shared secret.
#[derive(Clone)]
pub struct JwtService {
    decoding_key: DecodingKey,
    encoding_key: Option<EncodingKey>,
    algorithm: Algorithm,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        if let Some(path) = &config.public_key_path {
            let public_key_pem = fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("Failed to read public key from {}: {}", path, e))?;
            let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
                .map_err(|e| anyhow::anyhow!("Failed to parse public key: {}", e))?;

            tracing::info!("JWT validation initialized with RS256 public key");
            return Ok(Self {
                decoding_key,
                encoding_key: None,
                algorithm: Algorithm::RS256,
            });
        }

        match &config.secret {
            Some(secret) => Ok(Self::from_secret(secret)),
            None => Err(anyhow::anyhow!(
                "JWT validation needs either a public key or a shared secret"
            )),
        }
    }

    pub fn from_secret(secret: &str) -> Self {
        tracing::info!("JWT validation initialized with HS256 shared secret");
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            encoding_key: Some(EncodingKey::from_secret(secret.as_bytes())),
            algorithm: Algorithm::HS256,
        }
    }

    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims, anyhow::Error> {
        let validation = Validation::new(self.algorithm);
        let token_data = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| anyhow::anyhow!("Invalid access token: {}", e))?;
        Ok(token_data.claims)
    }

    pub fn generate_access_token(
        &self,
        user_id: &str,
        ttl: Duration,
    ) -> Result<String, anyhow::Error> {
        let key = self
            .encoding_key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Token signing requires a shared secret"))?;

        let now = Utc::now();
        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::new(self.algorithm), &claims, key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_hs256_tokens() {
        let jwt = JwtService::from_secret("test-secret");
        let token = jwt
            .generate_access_token("user-42", Duration::minutes(5))
            .unwrap();

        let claims = jwt.validate_access_token(&token).unwrap();
        assert_eq!(claims.sub, "user-42");
    }

    #[test]
    fn rejects_foreign_and_expired_tokens() {
        let ours = JwtService::from_secret("test-secret");
        let theirs = JwtService::from_secret("other-secret");

        let forged = theirs
            .generate_access_token("user-42", Duration::minutes(5))
            .unwrap();
        assert!(ours.validate_access_token(&forged).is_err());

        let expired = ours
            .generate_access_token("user-42", Duration::minutes(-10))
            .unwrap();
        assert!(ours.validate_access_token(&expired).is_err());
    }
}
