use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use tracing::error;
use uuid::Uuid;
use whaleray_common::models::deployment::Deployment;
use whaleray_common::models::installation::Installation;
use whaleray_common::models::service::Service;
use whaleray_common::Status;

#[derive(Debug, thiserror::Error)]
pub enum DalError {
    Request(String),
    Malformed(String),
}

// The `Display` impl keeps store details out of user-facing messages; the
// full error is logged where it happens.
impl fmt::Display for DalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            DalError::Request(error) => {
                error!(error = %error, "durable store request failed");

                "failed to interact with the durable store"
            }
            DalError::Malformed(error) => {
                error!(error = %error, "stored row is malformed");

                "a stored row is malformed"
            }
        };

        write!(f, "{msg}")
    }
}

/// Extra columns attached to a status transition so they land in the same
/// write that records the transition.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatusFields {
    pub framework: Option<String>,
    pub codebuild_project: Option<String>,
    pub codebuild_log_group: Option<String>,
    pub codebuild_log_stream: Option<String>,
    pub build_id: Option<String>,
    pub port: Option<u16>,
    pub task_definition_arn: Option<String>,
    pub ecs_service: Option<String>,
    pub ecs_log_group: Option<String>,
    pub service_endpoint: Option<String>,
    pub error_message: Option<String>,
    /// Drop the transient intake env material from the row.
    pub clear_env: bool,
}

impl StatusFields {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Promotion of a deployment to be its service's active one.
#[derive(Clone, Debug, PartialEq)]
pub struct ServicePromotion {
    pub service_id: String,
    pub user_id: String,
    pub service_name: String,
    pub service_endpoint: String,
    pub deployment_id: Uuid,
    pub created_at: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Promotion {
    /// The service row now points at the new deployment.
    Promoted { previous: Option<Uuid> },
    /// A newer deployment was promoted first.
    Lost,
}

/// Seam over the durable deployment, service and installation tables.
#[async_trait]
pub trait Dal: Send + Sync {
    async fn insert_deployment(&self, deployment: &Deployment) -> Result<(), DalError>;
    async fn deployment(&self, deployment_id: &Uuid) -> Result<Option<Deployment>, DalError>;
    /// Single point of state transition for the deployments table: one
    /// conditional write setting the status, `updatedAt` and every supplied
    /// extra field.
    async fn update_status(
        &self,
        deployment_id: &Uuid,
        status: Status,
        fields: StatusFields,
    ) -> Result<(), DalError>;
    /// A user's deployments, most recent first.
    async fn deployments_for_user(
        &self,
        user_id: &str,
        limit: i32,
    ) -> Result<Vec<Deployment>, DalError>;
    /// A service's deployments, most recent first.
    async fn deployments_for_service(
        &self,
        service_id: &str,
        limit: i32,
    ) -> Result<Vec<Deployment>, DalError>;
    /// All rows currently in the given in-progress state.
    async fn deployments_in_state(&self, status: Status) -> Result<Vec<Deployment>, DalError>;
    async fn installations_for_user(&self, user_id: &str) -> Result<Vec<Installation>, DalError>;
    async fn delete_installation(&self, installation_id: i64) -> Result<(), DalError>;
    async fn service(&self, service_id: &str) -> Result<Option<Service>, DalError>;
    async fn services_for_user(&self, user_id: &str) -> Result<Vec<Service>, DalError>;
    /// Conditionally promote a deployment on its service row. The write only
    /// succeeds while the recorded active deployment is older than the
    /// incoming one, which closes the race between builds finishing in
    /// inverse order.
    async fn promote_service(&self, promotion: &ServicePromotion) -> Result<Promotion, DalError>;
}

pub struct DynamoDal {
    client: aws_sdk_dynamodb::Client,
    deployments_table: String,
    services_table: String,
    installations_table: String,
}

impl DynamoDal {
    pub fn new(
        client: aws_sdk_dynamodb::Client,
        deployments_table: impl Into<String>,
        services_table: impl Into<String>,
        installations_table: impl Into<String>,
    ) -> Self {
        Self {
            client,
            deployments_table: deployments_table.into(),
            services_table: services_table.into(),
            installations_table: installations_table.into(),
        }
    }
}

#[async_trait]
impl Dal for DynamoDal {
    async fn insert_deployment(&self, deployment: &Deployment) -> Result<(), DalError> {
        self.client
            .put_item()
            .table_name(&self.deployments_table)
            .set_item(Some(deployment_to_item(deployment)))
            .send()
            .await
            .map(|_| ())
            .map_err(|error| DalError::Request(error.to_string()))
    }

    async fn deployment(&self, deployment_id: &Uuid) -> Result<Option<Deployment>, DalError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.deployments_table)
            .key(
                "deploymentId",
                AttributeValue::S(deployment_id.to_string()),
            )
            .send()
            .await
            .map_err(|error| DalError::Request(error.to_string()))?;

        output.item().map(deployment_from_item).transpose()
    }

    async fn update_status(
        &self,
        deployment_id: &Uuid,
        status: Status,
        fields: StatusFields,
    ) -> Result<(), DalError> {
        let mut expression = String::from("SET #status = :status, updatedAt = :updatedAt");
        let mut request = self
            .client
            .update_item()
            .table_name(&self.deployments_table)
            .key(
                "deploymentId",
                AttributeValue::S(deployment_id.to_string()),
            )
            .condition_expression("attribute_exists(deploymentId)")
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":status", AttributeValue::S(status.to_string()))
            .expression_attribute_values(
                ":updatedAt",
                AttributeValue::N(chrono::Utc::now().timestamp().to_string()),
            );

        let strings = [
            ("framework", &fields.framework),
            ("codebuildProject", &fields.codebuild_project),
            ("codebuildLogGroup", &fields.codebuild_log_group),
            ("codebuildLogStream", &fields.codebuild_log_stream),
            ("buildId", &fields.build_id),
            ("taskDefinitionArn", &fields.task_definition_arn),
            ("ecsService", &fields.ecs_service),
            ("ecsLogGroup", &fields.ecs_log_group),
            ("serviceEndpoint", &fields.service_endpoint),
            ("errorMessage", &fields.error_message),
        ];
        for (name, value) in strings {
            if let Some(value) = value {
                expression.push_str(&format!(", {name} = :{name}"));
                request =
                    request.expression_attribute_values(format!(":{name}"), AttributeValue::S(value.clone()));
            }
        }

        if let Some(port) = fields.port {
            expression.push_str(", port = :port");
            request =
                request.expression_attribute_values(":port", AttributeValue::N(port.to_string()));
        }

        if fields.clear_env {
            expression.push_str(" REMOVE envFileContent, isReset");
        }

        request
            .update_expression(expression)
            .send()
            .await
            .map(|_| ())
            .map_err(|error| DalError::Request(error.to_string()))
    }

    async fn deployments_for_user(
        &self,
        user_id: &str,
        limit: i32,
    ) -> Result<Vec<Deployment>, DalError> {
        let output = self
            .client
            .query()
            .table_name(&self.deployments_table)
            .index_name("userId-index")
            .key_condition_expression("userId = :userId")
            .expression_attribute_values(":userId", AttributeValue::S(user_id.to_string()))
            .scan_index_forward(false)
            .limit(limit)
            .send()
            .await
            .map_err(|error| DalError::Request(error.to_string()))?;

        output.items().iter().map(deployment_from_item).collect()
    }

    async fn deployments_for_service(
        &self,
        service_id: &str,
        limit: i32,
    ) -> Result<Vec<Deployment>, DalError> {
        let output = self
            .client
            .query()
            .table_name(&self.deployments_table)
            .index_name("serviceId-createdAt-index")
            .key_condition_expression("serviceId = :serviceId")
            .expression_attribute_values(":serviceId", AttributeValue::S(service_id.to_string()))
            .scan_index_forward(false)
            .limit(limit)
            .send()
            .await
            .map_err(|error| DalError::Request(error.to_string()))?;

        output.items().iter().map(deployment_from_item).collect()
    }

    async fn deployments_in_state(&self, status: Status) -> Result<Vec<Deployment>, DalError> {
        let output = self
            .client
            .scan()
            .table_name(&self.deployments_table)
            .filter_expression("#status = :status")
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":status", AttributeValue::S(status.to_string()))
            .send()
            .await
            .map_err(|error| DalError::Request(error.to_string()))?;

        output.items().iter().map(deployment_from_item).collect()
    }

    async fn installations_for_user(&self, user_id: &str) -> Result<Vec<Installation>, DalError> {
        let output = self
            .client
            .query()
            .table_name(&self.installations_table)
            .index_name("userId-index")
            .key_condition_expression("userId = :userId")
            .expression_attribute_values(":userId", AttributeValue::S(user_id.to_string()))
            .send()
            .await
            .map_err(|error| DalError::Request(error.to_string()))?;

        output
            .items()
            .iter()
            .map(|item| {
                Ok(Installation {
                    installation_id: required_n(item, "installationId")?,
                    user_id: required_s(item, "userId")?.to_string(),
                    account_login: required_s(item, "accountLogin")?.to_string(),
                })
            })
            .collect()
    }

    async fn delete_installation(&self, installation_id: i64) -> Result<(), DalError> {
        self.client
            .delete_item()
            .table_name(&self.installations_table)
            .key(
                "installationId",
                AttributeValue::N(installation_id.to_string()),
            )
            .send()
            .await
            .map(|_| ())
            .map_err(|error| DalError::Request(error.to_string()))
    }

    async fn service(&self, service_id: &str) -> Result<Option<Service>, DalError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.services_table)
            .key("serviceId", AttributeValue::S(service_id.to_string()))
            .send()
            .await
            .map_err(|error| DalError::Request(error.to_string()))?;

        output.item().map(service_from_item).transpose()
    }

    async fn services_for_user(&self, user_id: &str) -> Result<Vec<Service>, DalError> {
        let output = self
            .client
            .query()
            .table_name(&self.services_table)
            .index_name("userId-index")
            .key_condition_expression("userId = :userId")
            .expression_attribute_values(":userId", AttributeValue::S(user_id.to_string()))
            .send()
            .await
            .map_err(|error| DalError::Request(error.to_string()))?;

        output.items().iter().map(service_from_item).collect()
    }

    async fn promote_service(&self, promotion: &ServicePromotion) -> Result<Promotion, DalError> {
        let result = self
            .client
            .update_item()
            .table_name(&self.services_table)
            .key(
                "serviceId",
                AttributeValue::S(promotion.service_id.clone()),
            )
            .update_expression(
                "SET userId = :userId, serviceName = :serviceName, \
                 serviceEndpoint = :serviceEndpoint, activeDeploymentId = :deploymentId, \
                 activeCreatedAt = :createdAt, updatedAt = :updatedAt",
            )
            .condition_expression(
                "attribute_not_exists(activeCreatedAt) OR activeCreatedAt < :createdAt",
            )
            .expression_attribute_values(":userId", AttributeValue::S(promotion.user_id.clone()))
            .expression_attribute_values(
                ":serviceName",
                AttributeValue::S(promotion.service_name.clone()),
            )
            .expression_attribute_values(
                ":serviceEndpoint",
                AttributeValue::S(promotion.service_endpoint.clone()),
            )
            .expression_attribute_values(
                ":deploymentId",
                AttributeValue::S(promotion.deployment_id.to_string()),
            )
            .expression_attribute_values(
                ":createdAt",
                AttributeValue::N(promotion.created_at.to_string()),
            )
            .expression_attribute_values(
                ":updatedAt",
                AttributeValue::N(chrono::Utc::now().timestamp().to_string()),
            )
            .return_values(ReturnValue::UpdatedOld)
            .send()
            .await;

        match result {
            Ok(output) => {
                let previous = output
                    .attributes()
                    .and_then(|attributes| attributes.get("activeDeploymentId"))
                    .and_then(|value| value.as_s().ok())
                    .and_then(|value| Uuid::from_str(value).ok());

                Ok(Promotion::Promoted { previous })
            }
            Err(error) => {
                let service_error = error.into_service_error();
                if service_error.is_conditional_check_failed_exception() {
                    Ok(Promotion::Lost)
                } else {
                    Err(DalError::Request(service_error.to_string()))
                }
            }
        }
    }
}

fn deployment_to_item(deployment: &Deployment) -> HashMap<String, AttributeValue> {
    let mut item = HashMap::from([
        (
            "deploymentId".to_string(),
            AttributeValue::S(deployment.deployment_id.to_string()),
        ),
        (
            "userId".to_string(),
            AttributeValue::S(deployment.user_id.clone()),
        ),
        (
            "serviceId".to_string(),
            AttributeValue::S(deployment.service_id.clone()),
        ),
        (
            "serviceName".to_string(),
            AttributeValue::S(deployment.service_name.clone()),
        ),
        (
            "repositoryFullName".to_string(),
            AttributeValue::S(deployment.repository_full_name.clone()),
        ),
        (
            "branch".to_string(),
            AttributeValue::S(deployment.branch.clone()),
        ),
        (
            "installationId".to_string(),
            AttributeValue::N(deployment.installation_id.to_string()),
        ),
        (
            "status".to_string(),
            AttributeValue::S(deployment.status.to_string()),
        ),
        (
            "port".to_string(),
            AttributeValue::N(deployment.port.to_string()),
        ),
        (
            "createdAt".to_string(),
            AttributeValue::N(deployment.created_at.to_string()),
        ),
        (
            "updatedAt".to_string(),
            AttributeValue::N(deployment.updated_at.to_string()),
        ),
        (
            "isReset".to_string(),
            AttributeValue::Bool(deployment.is_reset),
        ),
    ]);

    for (name, value) in [
        ("envFileContent", &deployment.env_file_content),
        ("framework", &deployment.framework),
        ("codebuildProject", &deployment.codebuild_project),
        ("codebuildLogGroup", &deployment.codebuild_log_group),
        ("codebuildLogStream", &deployment.codebuild_log_stream),
        ("buildId", &deployment.build_id),
        ("taskDefinitionArn", &deployment.task_definition_arn),
        ("ecsService", &deployment.ecs_service),
        ("ecsLogGroup", &deployment.ecs_log_group),
        ("serviceEndpoint", &deployment.service_endpoint),
        ("errorMessage", &deployment.error_message),
    ] {
        if let Some(value) = value {
            item.insert(name.to_string(), AttributeValue::S(value.clone()));
        }
    }

    item
}

fn deployment_from_item(item: &HashMap<String, AttributeValue>) -> Result<Deployment, DalError> {
    Ok(Deployment {
        deployment_id: Uuid::from_str(required_s(item, "deploymentId")?)
            .map_err(|error| DalError::Malformed(error.to_string()))?,
        user_id: required_s(item, "userId")?.to_string(),
        service_id: required_s(item, "serviceId")?.to_string(),
        service_name: required_s(item, "serviceName")?.to_string(),
        repository_full_name: required_s(item, "repositoryFullName")?.to_string(),
        branch: required_s(item, "branch")?.to_string(),
        installation_id: required_n(item, "installationId")?,
        env_file_content: optional_s(item, "envFileContent"),
        is_reset: item
            .get("isReset")
            .and_then(|value| value.as_bool().ok())
            .copied()
            .unwrap_or_default(),
        status: Status::from_str(required_s(item, "status")?)
            .map_err(|error| DalError::Malformed(error.to_string()))?,
        framework: optional_s(item, "framework"),
        codebuild_project: optional_s(item, "codebuildProject"),
        codebuild_log_group: optional_s(item, "codebuildLogGroup"),
        codebuild_log_stream: optional_s(item, "codebuildLogStream"),
        build_id: optional_s(item, "buildId"),
        task_definition_arn: optional_s(item, "taskDefinitionArn"),
        ecs_service: optional_s(item, "ecsService"),
        ecs_log_group: optional_s(item, "ecsLogGroup"),
        service_endpoint: optional_s(item, "serviceEndpoint"),
        port: required_n(item, "port")?,
        created_at: required_n(item, "createdAt")?,
        updated_at: required_n(item, "updatedAt")?,
        error_message: optional_s(item, "errorMessage"),
    })
}

fn service_from_item(item: &HashMap<String, AttributeValue>) -> Result<Service, DalError> {
    Ok(Service {
        service_id: required_s(item, "serviceId")?.to_string(),
        user_id: required_s(item, "userId")?.to_string(),
        service_name: required_s(item, "serviceName")?.to_string(),
        active_deployment_id: optional_s(item, "activeDeploymentId")
            .and_then(|value| Uuid::from_str(&value).ok()),
        active_created_at: item
            .get("activeCreatedAt")
            .and_then(|value| value.as_n().ok())
            .and_then(|value| value.parse().ok()),
        service_endpoint: optional_s(item, "serviceEndpoint"),
        updated_at: required_n(item, "updatedAt")?,
    })
}

fn required_s<'a>(
    item: &'a HashMap<String, AttributeValue>,
    name: &str,
) -> Result<&'a str, DalError> {
    item.get(name)
        .and_then(|value| value.as_s().ok())
        .map(String::as_str)
        .ok_or_else(|| DalError::Malformed(format!("missing string attribute `{name}`")))
}

fn optional_s(item: &HashMap<String, AttributeValue>, name: &str) -> Option<String> {
    item.get(name)
        .and_then(|value| value.as_s().ok())
        .cloned()
}

fn required_n<T: FromStr>(
    item: &HashMap<String, AttributeValue>,
    name: &str,
) -> Result<T, DalError> {
    item.get(name)
        .and_then(|value| value.as_n().ok())
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| DalError::Malformed(format!("missing numeric attribute `{name}`")))
}
