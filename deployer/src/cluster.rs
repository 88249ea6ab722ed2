use async_trait::async_trait;
use aws_sdk_ecs::types::{
    AssignPublicIp, AwsVpcConfiguration, Compatibility, ContainerDefinition, LaunchType,
    LogConfiguration, LogDriver, NetworkConfiguration, NetworkMode, PortMapping, ServiceRegistry,
    TransportProtocol,
};

/// Default sizing tier for web deployments.
const TASK_CPU: &str = "256";
const TASK_MEMORY: &str = "512";

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("cluster api error: {0}")]
    Api(String),
    #[error("registration returned no task template")]
    MissingTemplate,
}

/// Task template for one web deployment.
#[derive(Clone, Debug, PartialEq)]
pub struct WebTaskSpec {
    pub family: String,
    pub service_name: String,
    pub image_uri: String,
    pub port: u16,
    pub log_group: String,
    /// Stream prefix; the deployment id, so logs can be found from the row
    pub log_stream_prefix: String,
}

/// Seam over the container cluster for web rollouts.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn register_web_task(&self, spec: &WebTaskSpec) -> Result<String, ClusterError>;
    async fn service_is_active(&self, service_id: &str) -> Result<bool, ClusterError>;
    /// Point an existing service at a new task template and force a rollout.
    async fn roll_service(
        &self,
        service_id: &str,
        task_definition_arn: &str,
    ) -> Result<(), ClusterError>;
    async fn create_web_service(
        &self,
        service_id: &str,
        service_name: &str,
        task_definition_arn: &str,
    ) -> Result<(), ClusterError>;
}

#[derive(Clone, Debug)]
pub struct WebClusterSettings {
    pub cluster_name: String,
    pub task_execution_role: String,
    pub task_role: String,
    pub subnets: Vec<String>,
    pub security_group: String,
    pub service_discovery_registry_arn: String,
    pub region: String,
}

pub struct EcsCluster {
    client: aws_sdk_ecs::Client,
    settings: WebClusterSettings,
}

impl EcsCluster {
    pub fn new(client: aws_sdk_ecs::Client, settings: WebClusterSettings) -> Self {
        Self { client, settings }
    }

    fn api_err(error: impl std::fmt::Display) -> ClusterError {
        ClusterError::Api(error.to_string())
    }
}

#[async_trait]
impl ClusterApi for EcsCluster {
    async fn register_web_task(&self, spec: &WebTaskSpec) -> Result<String, ClusterError> {
        let log_configuration = LogConfiguration::builder()
            .log_driver(LogDriver::Awslogs)
            .options("awslogs-group", &spec.log_group)
            .options("awslogs-region", &self.settings.region)
            .options("awslogs-stream-prefix", &spec.log_stream_prefix)
            .options("awslogs-create-group", "true")
            .build()
            .map_err(Self::api_err)?;

        let container = ContainerDefinition::builder()
            .name(&spec.service_name)
            .image(&spec.image_uri)
            .essential(true)
            .port_mappings(
                PortMapping::builder()
                    .container_port(i32::from(spec.port))
                    .protocol(TransportProtocol::Tcp)
                    .build(),
            )
            .log_configuration(log_configuration)
            .build();

        let output = self
            .client
            .register_task_definition()
            .family(&spec.family)
            .network_mode(NetworkMode::Awsvpc)
            .requires_compatibilities(Compatibility::Fargate)
            .cpu(TASK_CPU)
            .memory(TASK_MEMORY)
            .execution_role_arn(&self.settings.task_execution_role)
            .task_role_arn(&self.settings.task_role)
            .container_definitions(container)
            .send()
            .await
            .map_err(Self::api_err)?;

        output
            .task_definition()
            .and_then(|task| task.task_definition_arn())
            .map(str::to_string)
            .ok_or(ClusterError::MissingTemplate)
    }

    async fn service_is_active(&self, service_id: &str) -> Result<bool, ClusterError> {
        let output = self
            .client
            .describe_services()
            .cluster(&self.settings.cluster_name)
            .services(service_id)
            .send()
            .await
            .map_err(Self::api_err)?;

        Ok(output
            .services()
            .first()
            .map(|service| service.status() == Some("ACTIVE"))
            .unwrap_or_default())
    }

    async fn roll_service(
        &self,
        service_id: &str,
        task_definition_arn: &str,
    ) -> Result<(), ClusterError> {
        self.client
            .update_service()
            .cluster(&self.settings.cluster_name)
            .service(service_id)
            .task_definition(task_definition_arn)
            .force_new_deployment(true)
            .send()
            .await
            .map(|_| ())
            .map_err(Self::api_err)
    }

    async fn create_web_service(
        &self,
        service_id: &str,
        service_name: &str,
        task_definition_arn: &str,
    ) -> Result<(), ClusterError> {
        self.client
            .create_service()
            .cluster(&self.settings.cluster_name)
            .service_name(service_id)
            .task_definition(task_definition_arn)
            .desired_count(1)
            .launch_type(LaunchType::Fargate)
            .network_configuration(
                NetworkConfiguration::builder()
                    .awsvpc_configuration(
                        AwsVpcConfiguration::builder()
                            .set_subnets(Some(self.settings.subnets.clone()))
                            .security_groups(&self.settings.security_group)
                            .assign_public_ip(AssignPublicIp::Disabled)
                            .build()
                            .map_err(Self::api_err)?,
                    )
                    .build(),
            )
            .service_registries(
                ServiceRegistry::builder()
                    .registry_arn(&self.settings.service_discovery_registry_arn)
                    .container_name(service_name)
                    .build(),
            )
            .send()
            .await
            .map(|_| ())
            .map_err(Self::api_err)
    }
}
