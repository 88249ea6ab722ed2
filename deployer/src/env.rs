use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_ssm::types::ParameterType;
use tracing::{debug, instrument};

use crate::error::{Error, Result as AppResult};

/// Hard ceiling of the encrypted parameter store backing the vault.
pub const MAX_ENV_BLOB_BYTES: usize = 4096;

/// Overwriting with a single space is the closest thing to deletion that
/// keeps the parameter present for the builder.
const RESET_PLACEHOLDER: &str = " ";

#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    #[error("parameter store request failed: {0}")]
    Request(String),
}

/// Seam over the encrypted parameter store.
#[async_trait]
pub trait ParamStore: Send + Sync {
    async fn put(&self, name: &str, value: &str) -> Result<(), ParamError>;
    async fn exists(&self, name: &str) -> Result<bool, ParamError>;
}

pub struct SsmParamStore {
    client: aws_sdk_ssm::Client,
    kms_key_arn: String,
}

impl SsmParamStore {
    pub fn new(client: aws_sdk_ssm::Client, kms_key_arn: impl Into<String>) -> Self {
        Self {
            client,
            kms_key_arn: kms_key_arn.into(),
        }
    }
}

#[async_trait]
impl ParamStore for SsmParamStore {
    async fn put(&self, name: &str, value: &str) -> Result<(), ParamError> {
        self.client
            .put_parameter()
            .name(name)
            .value(value)
            .r#type(ParameterType::SecureString)
            .key_id(&self.kms_key_arn)
            .overwrite(true)
            .send()
            .await
            .map(|_| ())
            .map_err(|error| ParamError::Request(error.to_string()))
    }

    async fn exists(&self, name: &str) -> Result<bool, ParamError> {
        match self
            .client
            .get_parameter()
            .name(name)
            .with_decryption(false)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(error) => {
                let service_error = error.into_service_error();
                if service_error.is_parameter_not_found() {
                    Ok(false)
                } else {
                    Err(ParamError::Request(service_error.to_string()))
                }
            }
        }
    }
}

/// One opaque environment blob per service, stored encrypted and only ever
/// surfaced to the builder as a parameter path.
pub struct EnvVault {
    store: Arc<dyn ParamStore>,
    project_name: String,
}

impl EnvVault {
    pub fn new(store: Arc<dyn ParamStore>, project_name: impl Into<String>) -> Self {
        Self {
            store,
            project_name: project_name.into(),
        }
    }

    pub fn blob_path(&self, user_id: &str, service_id: &str) -> String {
        format!("/{}/{user_id}/{service_id}/DOTENV_BLOB", self.project_name)
    }

    /// Three-way resolution of caller-supplied content, previously stored
    /// content and explicit reset. Returns the blob path the builder reads.
    #[instrument(skip(self, content))]
    pub async fn resolve(
        &self,
        user_id: &str,
        service_id: &str,
        content: Option<&str>,
        is_reset: bool,
    ) -> AppResult<String> {
        let path = self.blob_path(user_id, service_id);
        let content = content.filter(|content| !content.is_empty());

        match (is_reset, content) {
            (true, Some(_)) => Err(Error::ConflictingEnvFlags),
            (true, None) => {
                debug!("resetting stored env content");
                self.store.put(&path, RESET_PLACEHOLDER).await?;
                Ok(path)
            }
            (false, Some(content)) => {
                let size = content.len();
                if size > MAX_ENV_BLOB_BYTES {
                    return Err(Error::EnvTooLarge(size));
                }

                debug!(size, "storing env content");
                self.store.put(&path, content).await?;
                Ok(path)
            }
            (false, None) => {
                if self.store.exists(&path).await? {
                    Ok(path)
                } else {
                    Err(Error::MissingInitialEnv)
                }
            }
        }
    }
}
