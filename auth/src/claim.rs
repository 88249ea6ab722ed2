use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::AuthError;

/// Issuer every platform token must carry.
pub const ISSUER: &str = "whaleray";

/// Sessions are cut to this lifetime by the issuing side.
const TOKEN_LIFETIME_HOURS: i64 = 24;

/// The verified identity extracted from a bearer token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    /// User id the token was issued for
    pub sub: String,
    #[serde(default)]
    pub username: String,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
}

impl Claim {
    pub fn new(sub: impl Into<String>, username: impl Into<String>) -> Self {
        let now = Utc::now();

        Self {
            sub: sub.into(),
            username: username.into(),
            exp: (now + Duration::hours(TOKEN_LIFETIME_HOURS)).timestamp(),
            iat: now.timestamp(),
            iss: ISSUER.to_string(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.sub
    }

    /// Verify a token against the shared secret. `sub`, `exp`, `iat` and
    /// `iss` are all required and expiry is checked without leeway.
    pub fn from_token(token: &str, secret: &[u8]) -> Result<Self, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["sub", "exp", "iat", "iss"]);
        validation.set_issuer(&[ISSUER]);
        validation.leeway = 0;

        let claim = decode::<Claim>(token, &DecodingKey::from_secret(secret), &validation)
            .map_err(|error| {
                trace!(
                    error = &error as &dyn std::error::Error,
                    "failed to verify bearer token"
                );
                AuthError::Unauthorized
            })?
            .claims;

        Ok(claim)
    }

    pub fn into_token(self, secret: &[u8]) -> Result<String, AuthError> {
        encode(
            &Header::new(Algorithm::HS256),
            &self,
            &EncodingKey::from_secret(secret),
        )
        .map_err(|_| AuthError::Unauthorized)
    }
}
