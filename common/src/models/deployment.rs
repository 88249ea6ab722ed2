use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::deployment::Status;

/// Container port a deployment is assumed to listen on when the framework
/// does not dictate one.
pub const DEFAULT_PORT: u16 = 3000;

/// The Spring family binds here.
pub const SPRING_PORT: u16 = 8080;

/// One attempt to publish a specific `(repository, branch)` at a moment in
/// time, tracked as a durable row from intake to its terminal state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub deployment_id: Uuid,
    pub user_id: String,
    pub service_id: String,
    pub service_name: String,
    pub repository_full_name: String,
    pub branch: String,
    pub installation_id: i64,
    /// Raw env content handed over at intake. Kept on the row only until
    /// the inspector has staged it; never serialized back out.
    #[serde(skip_serializing, default)]
    pub env_file_content: Option<String>,
    #[serde(skip_serializing, default)]
    pub is_reset: bool,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codebuild_project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codebuild_log_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codebuild_log_stream: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_definition_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecs_service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecs_log_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_endpoint: Option<String>,
    pub port: u16,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Body of `POST /deployments`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRequest {
    pub repository_full_name: String,
    pub branch: Option<String>,
    pub env_file_content: Option<String>,
    #[serde(default)]
    pub is_reset: bool,
}

/// Immediate response to an accepted deployment request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentAccepted {
    pub deployment_id: Uuid,
    pub status: Status,
}

/// Completion notice emitted by the builder for one deployment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildEvent {
    pub deployment_id: Uuid,
    pub build_status: BuildStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Display, Serialize, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[strum(ascii_case_insensitive)]
pub enum BuildStatus {
    Succeeded,
    Failed,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    use super::*;

    fn deployment() -> Deployment {
        Deployment {
            deployment_id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            service_id: "u1-alice-web".to_string(),
            service_name: "alice-web".to_string(),
            repository_full_name: "alice/web".to_string(),
            branch: "main".to_string(),
            installation_id: 42,
            env_file_content: Some("FOO=1".to_string()),
            is_reset: false,
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
            created_at: 1_700_000_000,
            updated_at: 1_700_000_000,
            error_message: None,
        }
    }

    #[test]
    fn env_content_never_leaves_through_serialization() {
        let serialized = serde_json::to_string(&deployment()).unwrap();

        assert!(!serialized.contains("FOO=1"));
        assert!(!serialized.contains("envFileContent"));
    }

    #[test]
    fn build_event_wire_format() {
        let event: BuildEvent = serde_json::from_str(
            r#"{"deploymentId":"936da01f-9abd-4d9d-80c7-02af85c822a8","buildStatus":"SUCCEEDED"}"#,
        )
        .unwrap();

        assert_eq!(event.build_status, BuildStatus::Succeeded);
        assert_eq!(event.build_id, None);
    }
}
