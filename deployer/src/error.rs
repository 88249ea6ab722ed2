use whaleray_auth::SecretError;

use crate::build::BuildError;
use crate::cluster::ClusterError;
use crate::dal::DalError;
use crate::env::ParamError;
use crate::github::GithubError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("repositoryFullName must be shaped owner/name")]
    MalformedRepositoryName,
    #[error("No GitHub App installation found for this repository owner")]
    InstallationNotFound,
    #[error(
        "Cannot specify both 'isReset' and 'envFileContent'. Please choose one action: \
         reset environment variables OR update them, not both."
    )]
    ConflictingEnvFlags,
    #[error("Environment file size ({0} bytes) exceeds the 4096-byte limit for stored environment content")]
    EnvTooLarge(usize),
    #[error("Initial deployment requires env content, but none was provided")]
    MissingInitialEnv,
    #[error("Could not detect a supported framework for repository {0}")]
    NoFramework(String),
    #[error("Framework '{0}' was detected, but no builder is defined for it")]
    UnsupportedFramework(String),
    #[error("Gradle project found, but it does not look like a Spring Boot application")]
    NotSpringBoot,
    #[error("Secret store error: {0}")]
    Secret(#[from] SecretError),
    #[error("Environment store error: {0}")]
    Param(#[from] ParamError),
    #[error("Hosting provider error: {0}")]
    Github(#[from] GithubError),
    #[error("Build trigger error: {0}")]
    Build(#[from] BuildError),
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),
    #[error("Store error: {0}")]
    Dal(#[from] DalError),
}

pub type Result<T> = std::result::Result<T, Error>;
