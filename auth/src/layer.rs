use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::headers::authorization::Bearer;
use axum::headers::Authorization;
use axum::http::request::Parts;
use axum::TypedHeader;
use tracing::{error, Span};

use crate::claim::Claim;
use crate::error::AuthError;
use crate::secrets::CachedSecret;

/// Verifies bearer tokens against the process-cached platform secret.
///
/// Attach one with `Extension(verifier)` and downstream handlers can take
/// [`Claim`] as an extractor.
#[derive(Clone)]
pub struct JwtVerifier {
    secret: Arc<CachedSecret>,
}

impl JwtVerifier {
    pub fn new(secret: CachedSecret) -> Self {
        Self {
            secret: Arc::new(secret),
        }
    }

    pub async fn verify(&self, token: &str) -> Result<Claim, AuthError> {
        let secret = self.secret.get().await.map_err(|err| {
            error!(
                error = &err as &dyn std::error::Error,
                "could not load the token verification secret"
            );
            AuthError::Unauthorized
        })?;

        Claim::from_token(token, secret.as_bytes())
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Claim
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AuthError::Unauthorized)?;

        let verifier = parts
            .extensions
            .get::<JwtVerifier>()
            .cloned()
            .ok_or(AuthError::Unauthorized)?;

        let claim = verifier.verify(bearer.token()).await?;

        // Record the account for tracing purposes
        Span::current().record("account.user_id", claim.sub.as_str());

        Ok(claim)
    }
}
