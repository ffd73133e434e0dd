use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Header carrying the caller's credential.
pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
    pub iat: u64,
    pub exp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token does not identify a user")]
    MissingSubject,
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("failed to sign token: {0}")]
    Signing(jsonwebtoken::errors::Error),
}

/// Validates a caller credential and yields the user it belongs to.
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, AuthError>;
}

pub type SharedAuthenticator = Arc<dyn Authenticator>;

/// HS256 tokens with `{id, iat, exp}` claims, keyed by an injected secret.
#[derive(Clone)]
pub struct JwtAuthenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

    pub fn from_secret(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn issue_token(&self, user_id: &str, ttl: Duration) -> Result<String, AuthError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(AuthError::MissingSubject);
        }
        let now = now_unix_secs();
        let claims = Claims {
            id: user_id.to_string(),
            iat: now,
            exp: now + ttl.as_secs(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(AuthError::Signing)
    }

    pub fn decode_claims(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token.trim(), &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let claims = self.decode_claims(token)?;
        let user_id = claims.id.trim();
        if user_id.is_empty() {
            return Err(AuthError::MissingSubject);
        }
        Ok(AuthenticatedUser {
            user_id: user_id.to_string(),
        })
    }
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_authenticates_as_its_user() {
        let auth = JwtAuthenticator::from_secret(b"test-secret");
        let token = auth
            .issue_token("user-1", JwtAuthenticator::DEFAULT_TTL)
            .expect("token should sign");

        let user = auth.authenticate(token.as_str()).expect("token should verify");
        assert_eq!(user.user_id, "user-1");
    }

    #[test]
    fn token_signed_with_another_secret_is_rejected() {
        let issuer = JwtAuthenticator::from_secret(b"rotated-out");
        let verifier = JwtAuthenticator::from_secret(b"current");
        let token = issuer
            .issue_token("user-1", JwtAuthenticator::DEFAULT_TTL)
            .unwrap();

        assert!(matches!(
            verifier.authenticate(token.as_str()),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let auth = JwtAuthenticator::from_secret(b"test-secret");
        let now = now_unix_secs();
        let claims = Claims {
            id: String::from("user-1"),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        assert!(matches!(
            auth.authenticate(token.as_str()),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn garbage_and_blank_subjects_are_rejected() {
        let auth = JwtAuthenticator::from_secret(b"test-secret");
        assert!(auth.authenticate("not-a-jwt").is_err());
        assert!(matches!(
            auth.issue_token("  ", JwtAuthenticator::DEFAULT_TTL),
            Err(AuthError::MissingSubject)
        ));
    }
}
