use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("failed to fetch secret: {0}")]
    Fetch(String),
    #[error("secret has no string payload")]
    Empty,
}

/// Seam over the secret store so callers can be exercised without AWS.
#[async_trait]
pub trait SecretFetcher: Send + Sync {
    async fn fetch(&self, secret_id: &str) -> Result<String, SecretError>;
}

pub struct SecretsManagerFetcher {
    client: aws_sdk_secretsmanager::Client,
}

impl SecretsManagerFetcher {
    pub fn new(client: aws_sdk_secretsmanager::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretFetcher for SecretsManagerFetcher {
    async fn fetch(&self, secret_id: &str) -> Result<String, SecretError> {
        let output = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|error| SecretError::Fetch(error.to_string()))?;

        output
            .secret_string()
            .map(str::to_string)
            .ok_or(SecretError::Empty)
    }
}

/// A secret fetched once per process. Failed fetches are not cached, so the
/// next caller retries.
pub struct CachedSecret {
    fetcher: Arc<dyn SecretFetcher>,
    secret_id: String,
    cache: OnceCell<String>,
}

impl CachedSecret {
    pub fn new(fetcher: Arc<dyn SecretFetcher>, secret_id: impl Into<String>) -> Self {
        Self {
            fetcher,
            secret_id: secret_id.into(),
            cache: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<&str, SecretError> {
        self.cache
            .get_or_try_init(|| self.fetcher.fetch(&self.secret_id))
            .await
            .map(String::as_str)
    }
}
