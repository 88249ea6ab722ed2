use crate::cluster::ClusterError;
use crate::creds::CredentialError;
use crate::dal::DalError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database already exists for this user")]
    AlreadyExists,
    #[error("No database found")]
    NotFound,
    #[error("Not implemented yet")]
    NotImplemented,
    #[error("Failed to generate credentials: {0}")]
    Credentials(#[from] CredentialError),
    #[error("Failed to provision database service: {0}")]
    Cluster(#[from] ClusterError),
    #[error("Database store error: {0}")]
    Dal(#[from] DalError),
}
