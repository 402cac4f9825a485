use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use parley_core::collab::AuthValidator;
use parley_core::{AuthError, UserId};

use crate::errors::TokenError;

/// Registered claims carried by a Parley token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User ID.
    pub sub: String,
    /// Optional email, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Issued-at (Unix seconds).
    pub iat: i64,
    /// Expiry (Unix seconds).
    pub exp: i64,
}

/// Validates and issues HS256 tokens with a shared secret.
pub struct JwtValidator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    /// Build a validator for `secret`.
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Mint a token for `user` valid for `ttl`.
    pub fn issue(
        &self,
        user: &UserId,
        email: Option<&str>,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        if user.is_empty() {
            return Err(TokenError::EmptySubject);
        }
        let now = Utc::now().timestamp();
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            sub: user.to_string(),
            email: email.map(str::to_string),
            iat: now,
            exp: now.saturating_add(ttl_secs),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(
            |e| TokenError::Sign {
                reason: e.to_string(),
            },
        )
    }

    /// Decode and verify `token`, returning its claims.
    pub fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| {
                debug!(error = %e, "token rejected");
                AuthError::InvalidToken(e.to_string())
            })?;
        if data.claims.sub.is_empty() {
            return Err(AuthError::MissingSubject);
        }
        Ok(data.claims)
    }
}

#[async_trait]
impl AuthValidator for JwtValidator {
    async fn validate(&self, token: &str) -> Result<UserId, AuthError> {
        self.decode(token).map(|c| UserId::from_string(c.sub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[tokio::test]
    async fn issued_token_validates_to_subject() {
        let v = JwtValidator::new(SECRET);
        let token = v
            .issue(&UserId::from("u1"), Some("u1@example.com"), Duration::from_secs(60))
            .unwrap();
        assert_eq!(v.validate(&token).await.unwrap(), UserId::from("u1"));
        assert_eq!(v.decode(&token).unwrap().email.as_deref(), Some("u1@example.com"));
    }

    #[tokio::test]
    async fn wrong_secret_is_invalid() {
        let token = JwtValidator::new("other")
            .issue(&UserId::from("u1"), None, Duration::from_secs(60))
            .unwrap();
        let err = JwtValidator::new(SECRET).validate(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn expired_token_is_invalid() {
        let v = JwtValidator::new(SECRET);
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "u1".into(),
            email: None,
            iat: now - 120,
            exp: now - 60,
        };
        let token = jsonwebtoken::encode(&Header::default(), &claims, &v.encoding).unwrap();
        assert!(matches!(
            v.validate(&token).await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn empty_subject_is_rejected() {
        let v = JwtValidator::new(SECRET);
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: String::new(),
            email: None,
            iat: now,
            exp: now + 60,
        };
        let token = jsonwebtoken::encode(&Header::default(), &claims, &v.encoding).unwrap();
        assert_eq!(v.validate(&token).await, Err(AuthError::MissingSubject));
    }

    #[tokio::test]
    async fn garbage_and_empty_tokens() {
        let v = JwtValidator::new(SECRET);
        assert!(matches!(
            v.validate("not.a.jwt").await,
            Err(AuthError::InvalidToken(_))
        ));
        assert_eq!(v.validate("").await, Err(AuthError::MissingCredential));
    }

    #[test]
    fn issue_requires_subject() {
        let v = JwtValidator::new(SECRET);
        assert!(matches!(
            v.issue(&UserId::from(""), None, Duration::from_secs(1)),
            Err(TokenError::EmptySubject)
        ));
    }
}
