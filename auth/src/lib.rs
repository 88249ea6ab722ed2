mod claim;
mod error;
mod layer;
mod secrets;

pub use claim::{Claim, ISSUER};
pub use error::AuthError;
pub use layer::JwtVerifier;
pub use secrets::{CachedSecret, SecretError, SecretFetcher, SecretsManagerFetcher};
