use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use crate::{
    config::{parse_duration_seconds, JwtConfig},
    models::{UserId, UserRole},
    Error, Result,
};

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    /// Global role (admin, user)
    pub role: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    #[must_use]
    pub fn user_id(&self) -> UserId {
        UserId::from_string(self.sub.clone())
    }

    pub fn role(&self) -> Result<UserRole> {
        UserRole::from_str(&self.role)
            .map_err(|_| Error::Internal(format!("Invalid role in token: {}", self.role)))
    }
}

/// JWT service for signing and verifying bearer tokens (HS256).
#[derive(Clone)]
pub struct JwtService {
    encoding_key: Arc<EncodingKey>,
    decoding_key: Arc<DecodingKey>,
    lifetime_seconds: i64,
}

impl std::fmt::Debug for JwtService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtService")
            .field("lifetime_seconds", &self.lifetime_seconds)
            .finish()
    }
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Result<Self> {
        if config.secret.is_empty() {
            return Err(Error::Internal("JWT secret must not be empty".to_string()));
        }

        let lifetime_seconds = parse_duration_seconds(&config.expires_in).ok_or_else(|| {
            Error::Internal(format!("Invalid JWT lifetime: {}", config.expires_in))
        })?;

        Ok(Self {
            encoding_key: Arc::new(EncodingKey::from_secret(config.secret.as_bytes())),
            decoding_key: Arc::new(DecodingKey::from_secret(config.secret.as_bytes())),
            lifetime_seconds,
        })
    }

    pub fn sign(&self, user_id: &UserId, role: UserRole) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.as_str().to_string(),
            role: role.as_str().to_string(),
            iat: now,
            exp: now + self.lifetime_seconds,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| Error::Internal(format!("Failed to sign token: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<Claims> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| Error::Authentication(format!("Invalid token: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> JwtService {
        JwtService::new(&JwtConfig {
            secret: "test-secret".to_string(),
            expires_in: "7d".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_sign_and_verify_round_trip() {
        let service = service();
        let user_id = UserId::new();

        let token = service.sign(&user_id, UserRole::User).unwrap();
        let claims = service.verify(&token).unwrap();

        assert_eq!(claims.user_id(), user_id);
        assert_eq!(claims.role().unwrap(), UserRole::User);
        assert!(claims.exp - claims.iat == 7 * 86400);
    }

    #[test]
    fn test_verify_rejects_garbage() {
        let service = service();
        assert!(service.verify("not-a-token").is_err());
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let signer = service();
        let verifier = JwtService::new(&JwtConfig {
            secret: "other-secret".to_string(),
            expires_in: "7d".to_string(),
        })
        .unwrap();

        let token = signer.sign(&UserId::new(), UserRole::Admin).unwrap();
        assert!(verifier.verify(&token).is_err());
    }
}
