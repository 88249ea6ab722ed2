use async_trait::async_trait;
use aws_sdk_ssm::types::ParameterType;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("secret store request failed: {0}")]
    Request(String),
}

/// Seam over the encrypted parameter store holding database passwords.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn put(&self, name: &str, value: &str) -> Result<(), CredentialError>;
    async fn delete(&self, name: &str) -> Result<(), CredentialError>;
}

pub struct SsmCredentialStore {
    client: aws_sdk_ssm::Client,
    kms_key_arn: String,
}

impl SsmCredentialStore {
    pub fn new(client: aws_sdk_ssm::Client, kms_key_arn: impl Into<String>) -> Self {
        Self {
            client,
            kms_key_arn: kms_key_arn.into(),
        }
    }
}

#[async_trait]
impl CredentialStore for SsmCredentialStore {
    async fn put(&self, name: &str, value: &str) -> Result<(), CredentialError> {
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
            .map_err(|error| CredentialError::Request(error.to_string()))
    }

    async fn delete(&self, name: &str) -> Result<(), CredentialError> {
        self.client
            .delete_parameter()
            .name(name)
            .send()
            .await
            .map(|_| ())
            .map_err(|error| CredentialError::Request(error.to_string()))
    }
}
