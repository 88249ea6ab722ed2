use std::fmt;

use async_trait::async_trait;
use aws_sdk_ecs::types::{
    AssignPublicIp, AwsVpcConfiguration, Compatibility, ContainerDefinition, HealthCheck,
    KeyValuePair, LaunchType, MountPoint, NetworkConfiguration, NetworkMode, PortMapping,
    PropagateTags, ServiceManagedEbsVolumeConfiguration, ServiceRegistry,
    ServiceVolumeConfiguration, Tag, TransportProtocol, Volume,
};
use aws_sdk_servicediscovery::types::{
    DnsConfig, DnsRecord, HealthCheckCustomConfig, RecordType, RoutingPolicy,
};

const POSTGRES_IMAGE: &str = "postgres:16-alpine";
const PGADMIN_IMAGE: &str = "dpage/pgadmin4:8";
const POSTGRES_PORT: i32 = 5432;
const PGADMIN_PORT: i32 = 80;
const DATA_VOLUME: &str = "database-data";
const DATA_MOUNT_PATH: &str = "/var/lib/postgresql/data";
const VOLUME_SIZE_GIB: i32 = 1;
const VOLUME_TYPE: &str = "gp3";

/// Name of the logical database every instance is created with.
pub const DATABASE_NAME: &str = "whaleray";

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("cluster api error: {0}")]
    Api(String),
    #[error("no subnets configured for database placement")]
    NoSubnets,
    #[error("base task template has no definition")]
    MissingBaseTemplate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServiceCounts {
    pub running: i32,
    pub desired: i32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Registry {
    pub arn: String,
    pub id: String,
}

pub struct DatabaseTaskSpec {
    pub family: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for DatabaseTaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DatabaseTaskSpec")
            .field("family", &self.family)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub struct DatabaseServiceSpec {
    pub name: String,
    pub task_definition_arn: String,
    pub registry_arn: String,
    pub subnet_id: String,
    pub database_id: String,
    pub user_id: String,
}

/// Seam over the container cluster and its service registry, so the
/// controller can be exercised without AWS.
#[async_trait]
pub trait DatabaseCluster: Send + Sync {
    /// Pick a subnet for a new database task and report its zone.
    async fn pick_subnet(&self) -> Result<(String, String), ClusterError>;
    async fn register_database_task(&self, spec: &DatabaseTaskSpec) -> Result<String, ClusterError>;
    async fn create_registry(&self, name: &str) -> Result<Registry, ClusterError>;
    async fn delete_registry(&self, registry_id: &str) -> Result<(), ClusterError>;
    async fn create_database_service(&self, spec: &DatabaseServiceSpec)
        -> Result<(), ClusterError>;
    async fn describe_service(&self, service: &str) -> Result<Option<ServiceCounts>, ClusterError>;
    async fn delete_service(&self, service: &str) -> Result<(), ClusterError>;
    async fn deregister_task(&self, task_definition_arn: &str) -> Result<(), ClusterError>;
}

#[derive(Clone, Debug)]
pub struct ClusterSettings {
    pub cluster_name: String,
    pub base_task_definition: String,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub namespace_id: String,
    pub infra_role_arn: String,
}

pub struct EcsDatabaseCluster {
    ecs: aws_sdk_ecs::Client,
    service_discovery: aws_sdk_servicediscovery::Client,
    ec2: aws_sdk_ec2::Client,
    settings: ClusterSettings,
}

impl EcsDatabaseCluster {
    pub fn new(
        ecs: aws_sdk_ecs::Client,
        service_discovery: aws_sdk_servicediscovery::Client,
        ec2: aws_sdk_ec2::Client,
        settings: ClusterSettings,
    ) -> Self {
        Self {
            ecs,
            service_discovery,
            ec2,
            settings,
        }
    }

    fn api_err(error: impl fmt::Display) -> ClusterError {
        ClusterError::Api(error.to_string())
    }
}

#[async_trait]
impl DatabaseCluster for EcsDatabaseCluster {
    async fn pick_subnet(&self) -> Result<(String, String), ClusterError> {
        let subnet_id = self
            .settings
            .subnets
            .first()
            .ok_or(ClusterError::NoSubnets)?
            .clone();

        let output = self
            .ec2
            .describe_subnets()
            .subnet_ids(&subnet_id)
            .send()
            .await
            .map_err(Self::api_err)?;

        let zone = output
            .subnets()
            .first()
            .and_then(|subnet| subnet.availability_zone())
            .ok_or_else(|| ClusterError::Api(format!("subnet {subnet_id} has no zone")))?
            .to_string();

        Ok((subnet_id, zone))
    }

    async fn register_database_task(&self, spec: &DatabaseTaskSpec) -> Result<String, ClusterError> {
        // The base template supplies roles, sizing and images; containers are
        // rebuilt so the per-instance credentials land in their environment.
        let base = self
            .ecs
            .describe_task_definition()
            .task_definition(&self.settings.base_task_definition)
            .send()
            .await
            .map_err(Self::api_err)?;
        let base = base
            .task_definition()
            .ok_or(ClusterError::MissingBaseTemplate)?;

        let image_of = |name: &str, fallback: &str| {
            base.container_definitions()
                .iter()
                .find(|container| container.name() == Some(name))
                .and_then(|container| container.image())
                .unwrap_or(fallback)
                .to_string()
        };

        let postgres = ContainerDefinition::builder()
            .name("postgres")
            .image(image_of("postgres", POSTGRES_IMAGE))
            .essential(true)
            .environment(key_value("POSTGRES_USER", &spec.username))
            .environment(key_value("POSTGRES_PASSWORD", &spec.password))
            .environment(key_value("POSTGRES_DB", DATABASE_NAME))
            .port_mappings(
                PortMapping::builder()
                    .container_port(POSTGRES_PORT)
                    .protocol(TransportProtocol::Tcp)
                    .build(),
            )
            .mount_points(
                MountPoint::builder()
                    .source_volume(DATA_VOLUME)
                    .container_path(DATA_MOUNT_PATH)
                    .build(),
            )
            .health_check(
                HealthCheck::builder()
                    .command("CMD-SHELL")
                    .command(format!(
                        "pg_isready -U {} -d {DATABASE_NAME}",
                        spec.username
                    ))
                    .interval(30)
                    .timeout(5)
                    .retries(3)
                    .build()
                    .map_err(Self::api_err)?,
            )
            .build();

        let pgadmin = ContainerDefinition::builder()
            .name("pgadmin")
            .image(image_of("pgadmin", PGADMIN_IMAGE))
            .essential(false)
            .environment(key_value(
                "PGADMIN_DEFAULT_EMAIL",
                format!("{}@whaleray.local", spec.username),
            ))
            .environment(key_value("PGADMIN_DEFAULT_PASSWORD", &spec.password))
            .port_mappings(
                PortMapping::builder()
                    .container_port(PGADMIN_PORT)
                    .protocol(TransportProtocol::Tcp)
                    .build(),
            )
            .build();

        let output = self
            .ecs
            .register_task_definition()
            .family(&spec.family)
            .network_mode(NetworkMode::Awsvpc)
            .requires_compatibilities(Compatibility::Fargate)
            .set_execution_role_arn(base.execution_role_arn().map(str::to_string))
            .set_task_role_arn(base.task_role_arn().map(str::to_string))
            .set_cpu(base.cpu().map(str::to_string))
            .set_memory(base.memory().map(str::to_string))
            .volumes(
                Volume::builder()
                    .name(DATA_VOLUME)
                    .configured_at_launch(true)
                    .build(),
            )
            .container_definitions(postgres)
            .container_definitions(pgadmin)
            .send()
            .await
            .map_err(Self::api_err)?;

        output
            .task_definition()
            .and_then(|task| task.task_definition_arn())
            .map(str::to_string)
            .ok_or_else(|| ClusterError::Api("registration returned no template".to_string()))
    }

    async fn create_registry(&self, name: &str) -> Result<Registry, ClusterError> {
        let output = self
            .service_discovery
            .create_service()
            .name(name)
            .namespace_id(&self.settings.namespace_id)
            .dns_config(
                DnsConfig::builder()
                    .dns_records(
                        DnsRecord::builder()
                            .r#type(RecordType::A)
                            .ttl(10)
                            .build()
                            .map_err(Self::api_err)?,
                    )
                    .routing_policy(RoutingPolicy::Multivalue)
                    .build()
                    .map_err(Self::api_err)?,
            )
            .health_check_custom_config(
                HealthCheckCustomConfig::builder().failure_threshold(1).build(),
            )
            .send()
            .await
            .map_err(Self::api_err)?;

        let service = output
            .service()
            .ok_or_else(|| ClusterError::Api("registry creation returned nothing".to_string()))?;

        match (service.arn(), service.id()) {
            (Some(arn), Some(id)) => Ok(Registry {
                arn: arn.to_string(),
                id: id.to_string(),
            }),
            _ => Err(ClusterError::Api(
                "registry creation returned no identifiers".to_string(),
            )),
        }
    }

    async fn delete_registry(&self, registry_id: &str) -> Result<(), ClusterError> {
        self.service_discovery
            .delete_service()
            .id(registry_id)
            .send()
            .await
            .map(|_| ())
            .map_err(Self::api_err)
    }

    async fn create_database_service(
        &self,
        spec: &DatabaseServiceSpec,
    ) -> Result<(), ClusterError> {
        self.ecs
            .create_service()
            .cluster(&self.settings.cluster_name)
            .service_name(&spec.name)
            .task_definition(&spec.task_definition_arn)
            .desired_count(1)
            .launch_type(LaunchType::Fargate)
            .network_configuration(
                NetworkConfiguration::builder()
                    .awsvpc_configuration(
                        AwsVpcConfiguration::builder()
                            .subnets(&spec.subnet_id)
                            .set_security_groups(Some(self.settings.security_groups.clone()))
                            .assign_public_ip(AssignPublicIp::Disabled)
                            .build()
                            .map_err(Self::api_err)?,
                    )
                    .build(),
            )
            .service_registries(
                ServiceRegistry::builder()
                    .registry_arn(&spec.registry_arn)
                    .build(),
            )
            .volume_configurations(
                ServiceVolumeConfiguration::builder()
                    .name(DATA_VOLUME)
                    .managed_ebs_volume(
                        ServiceManagedEbsVolumeConfiguration::builder()
                            .role_arn(&self.settings.infra_role_arn)
                            .size_in_gib(VOLUME_SIZE_GIB)
                            .volume_type(VOLUME_TYPE)
                            .encrypted(true)
                            .build()
                            .map_err(Self::api_err)?,
                    )
                    .build()
                    .map_err(Self::api_err)?,
            )
            .tags(Tag::builder().key("databaseId").value(&spec.database_id).build())
            .tags(Tag::builder().key("userId").value(&spec.user_id).build())
            .propagate_tags(PropagateTags::Service)
            .enable_ecs_managed_tags(true)
            .send()
            .await
            .map(|_| ())
            .map_err(Self::api_err)
    }

    async fn describe_service(&self, service: &str) -> Result<Option<ServiceCounts>, ClusterError> {
        let output = self
            .ecs
            .describe_services()
            .cluster(&self.settings.cluster_name)
            .services(service)
            .send()
            .await
            .map_err(Self::api_err)?;

        Ok(output.services().first().map(|service| ServiceCounts {
            running: service.running_count(),
            desired: service.desired_count(),
        }))
    }

    async fn delete_service(&self, service: &str) -> Result<(), ClusterError> {
        self.ecs
            .delete_service()
            .cluster(&self.settings.cluster_name)
            .service(service)
            .force(true)
            .send()
            .await
            .map(|_| ())
            .map_err(Self::api_err)
    }

    async fn deregister_task(&self, task_definition_arn: &str) -> Result<(), ClusterError> {
        self.ecs
            .deregister_task_definition()
            .task_definition(task_definition_arn)
            .send()
            .await
            .map(|_| ())
            .map_err(Self::api_err)
    }
}

fn key_value(name: &str, value: impl Into<String>) -> KeyValuePair {
    KeyValuePair::builder().name(name).value(value.into()).build()
}
