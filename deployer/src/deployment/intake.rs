use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;
use whaleray_common::models::deployment::{Deployment, DeploymentRequest, DEFAULT_PORT};
use whaleray_common::Status;

use crate::dal::Dal;
use crate::error::{Error, Result};

const DEFAULT_BRANCH: &str = "main";

/// Validate a deployment request, resolve the caller's installation for the
/// repository owner and persist the initial row. The persisted row is what
/// the inspector consumes; the caller gets an immediate response.
#[instrument(skip(dal, request), fields(repository = %request.repository_full_name))]
pub async fn create_deployment(
    dal: &Arc<dyn Dal>,
    user_id: &str,
    request: DeploymentRequest,
) -> Result<Deployment> {
    let (owner, name) =
        split_repository(&request.repository_full_name).ok_or(Error::MalformedRepositoryName)?;

    let installation = dal
        .installations_for_user(user_id)
        .await?
        .into_iter()
        .find(|installation| installation.account_login == owner)
        .ok_or(Error::InstallationNotFound)?;

    let service_name = format!("{owner}-{name}");
    let service_id = format!("{user_id}-{service_name}");
    let now = Utc::now().timestamp();

    let deployment = Deployment {
        deployment_id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        service_id,
        service_name,
        repository_full_name: request.repository_full_name,
        branch: request
            .branch
            .filter(|branch| !branch.is_empty())
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
        installation_id: installation.installation_id,
        env_file_content: request.env_file_content,
        is_reset: request.is_reset,
        status: Status::Inspecting,
        framework: None,
        codebuild_project: None,
        codebuild_log_group: None,
        codebuild_log_stream: None,
        build_id: None,
        task_definition_arn: None,
        ecs_service: None,
        ecs_log_group: None,
        service_endpoint: None,
        port: DEFAULT_PORT,
        created_at: now,
        updated_at: now,
        error_message: None,
    };

    dal.insert_deployment(&deployment).await?;
    info!(deployment_id = %deployment.deployment_id, service_id = %deployment.service_id, "deployment accepted");

    Ok(deployment)
}

fn split_repository(full_name: &str) -> Option<(&str, &str)> {
    let (owner, name) = full_name.split_once('/')?;
    if owner.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }

    Some((owner, name))
}
