use async_trait::async_trait;
use aws_sdk_codebuild::types::{
    CloudWatchLogsConfig, EnvironmentVariable, EnvironmentVariableType, LogsConfig,
    LogsConfigStatusType,
};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("build trigger failed: {0}")]
    Request(String),
    #[error("builder returned no build id")]
    MissingBuildId,
}

/// Everything the builder needs to produce an image for one deployment.
#[derive(Clone, Debug)]
pub struct BuildRequest {
    /// Builder project selected for the detected framework
    pub project: String,
    pub deployment_id: Uuid,
    pub repository_full_name: String,
    pub branch: String,
    /// Registry tag the finished image is pushed to
    pub image_uri: String,
    /// Encrypted parameter path holding the env blob
    pub env_blob_path: String,
    pub source_dir: String,
    pub build_context: String,
    /// Unset when the builder should generate one
    pub dockerfile_path: Option<String>,
    pub has_gradle_wrapper: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartedBuild {
    pub project: String,
    pub build_id: String,
    pub log_group: String,
    pub log_stream: String,
}

/// Maps a framework tag onto the builder project that can compile it. Only
/// the Spring family has a builder today.
pub fn builder_project(project_name: &str, framework: &str) -> Option<String> {
    match framework.split(':').next().unwrap_or_default() {
        "spring-boot" => Some(format!("{project_name}-spring-boot")),
        _ => None,
    }
}

/// Seam over the external build system.
#[async_trait]
pub trait BuildStarter: Send + Sync {
    async fn start_build(&self, request: &BuildRequest) -> Result<StartedBuild, BuildError>;
}

pub struct CodeBuildStarter {
    client: aws_sdk_codebuild::Client,
}

impl CodeBuildStarter {
    pub fn new(client: aws_sdk_codebuild::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BuildStarter for CodeBuildStarter {
    async fn start_build(&self, request: &BuildRequest) -> Result<StartedBuild, BuildError> {
        let deployment_id = request.deployment_id.to_string();

        // The stream is named after the deployment so the log tail can be
        // found again from the row alone.
        let logs = LogsConfig::builder()
            .cloud_watch_logs(
                CloudWatchLogsConfig::builder()
                    .status(LogsConfigStatusType::Enabled)
                    .stream_name(&deployment_id)
                    .build()
                    .map_err(|error| BuildError::Request(error.to_string()))?,
            )
            .build();

        let output = self
            .client
            .start_build()
            .project_name(&request.project)
            .source_version(&request.branch)
            .source_location_override(format!(
                "https://github.com/{}.git",
                request.repository_full_name
            ))
            .logs_config_override(logs)
            .environment_variables_override(env_var("DEPLOYMENT_ID", &deployment_id)?)
            .environment_variables_override(env_var("ECR_IMAGE_URI", &request.image_uri)?)
            .environment_variables_override(env_var(
                "DOTENV_BLOB_SSM_PATH",
                &request.env_blob_path,
            )?)
            .environment_variables_override(env_var("SOURCE_DIR", &request.source_dir)?)
            .environment_variables_override(env_var("BUILD_CONTEXT", &request.build_context)?)
            .environment_variables_override(env_var(
                "DOCKERFILE_PATH",
                request.dockerfile_path.as_deref().unwrap_or_default(),
            )?)
            .environment_variables_override(env_var(
                "HAS_GRADLE_WRAPPER",
                if request.has_gradle_wrapper {
                    "true"
                } else {
                    "false"
                },
            )?)
            .send()
            .await
            .map_err(|error| BuildError::Request(error.to_string()))?;

        let build_id = output
            .build_value()
            .and_then(|build| build.id())
            .ok_or(BuildError::MissingBuildId)?
            .to_string();

        Ok(StartedBuild {
            project: request.project.clone(),
            build_id,
            log_group: format!("/aws/codebuild/{}", request.project),
            log_stream: deployment_id,
        })
    }
}

fn env_var(name: &str, value: &str) -> Result<EnvironmentVariable, BuildError> {
    EnvironmentVariable::builder()
        .name(name)
        .value(value)
        .r#type(EnvironmentVariableType::Plaintext)
        .build()
        .map_err(|error| BuildError::Request(error.to_string()))
}
