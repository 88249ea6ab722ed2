use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;
use whaleray_auth::{SecretError, SecretFetcher};
use whaleray_common::models::database::{DatabaseRecord, DbState};
use whaleray_common::models::deployment::{Deployment, SPRING_PORT};
use whaleray_common::models::installation::Installation;
use whaleray_common::models::service::Service;
use whaleray_common::Status;
use whaleray_provisioner::cluster::{
    ClusterError as DbClusterError, DatabaseCluster, DatabaseServiceSpec, DatabaseTaskSpec,
    Registry, ServiceCounts,
};
use whaleray_provisioner::creds::{CredentialError, CredentialStore};
use whaleray_provisioner::dal::{DalError as DbDalError, DatabaseDal, Placement};
use whaleray_provisioner::DatabaseService;

use crate::build::{BuildError, BuildRequest, BuildStarter, StartedBuild};
use crate::cluster::{ClusterApi, ClusterError, WebTaskSpec};
use crate::dal::{Dal, DalError, Promotion, ServicePromotion, StatusFields};
use crate::deployment::{PipelineConfig, StageContext};
use crate::env::{EnvVault, ParamError, ParamStore};
use crate::github::tests::StaticSigner;
use crate::github::GithubClient;

#[derive(Default)]
pub(crate) struct InMemoryDal {
    pub deployments: Mutex<Vec<Deployment>>,
    pub services: Mutex<HashMap<String, Service>>,
    pub installations: Mutex<Vec<Installation>>,
}

#[async_trait]
impl Dal for InMemoryDal {
    async fn insert_deployment(&self, deployment: &Deployment) -> Result<(), DalError> {
        self.deployments.lock().unwrap().push(deployment.clone());
        Ok(())
    }

    async fn deployment(&self, deployment_id: &Uuid) -> Result<Option<Deployment>, DalError> {
        Ok(self
            .deployments
            .lock()
            .unwrap()
            .iter()
            .find(|deployment| deployment.deployment_id == *deployment_id)
            .cloned())
    }

    async fn update_status(
        &self,
        deployment_id: &Uuid,
        status: Status,
        fields: StatusFields,
    ) -> Result<(), DalError> {
        let mut deployments = self.deployments.lock().unwrap();
        let deployment = deployments
            .iter_mut()
            .find(|deployment| deployment.deployment_id == *deployment_id)
            .ok_or_else(|| DalError::Request("no such deployment".to_string()))?;

        deployment.status = status;
        deployment.updated_at = Utc::now().timestamp();

        let StatusFields {
            framework,
            codebuild_project,
            codebuild_log_group,
            codebuild_log_stream,
            build_id,
            port,
            task_definition_arn,
            ecs_service,
            ecs_log_group,
            service_endpoint,
            error_message,
            clear_env,
        } = fields;

        deployment.framework = framework.or(deployment.framework.take());
        deployment.codebuild_project = codebuild_project.or(deployment.codebuild_project.take());
        deployment.codebuild_log_group =
            codebuild_log_group.or(deployment.codebuild_log_group.take());
        deployment.codebuild_log_stream =
            codebuild_log_stream.or(deployment.codebuild_log_stream.take());
        deployment.build_id = build_id.or(deployment.build_id.take());
        deployment.task_definition_arn =
            task_definition_arn.or(deployment.task_definition_arn.take());
        deployment.ecs_service = ecs_service.or(deployment.ecs_service.take());
        deployment.ecs_log_group = ecs_log_group.or(deployment.ecs_log_group.take());
        deployment.service_endpoint = service_endpoint.or(deployment.service_endpoint.take());
        deployment.error_message = error_message.or(deployment.error_message.take());
        if let Some(port) = port {
            deployment.port = port;
        }
        if clear_env {
            deployment.env_file_content = None;
            deployment.is_reset = false;
        }

        Ok(())
    }

    async fn deployments_for_user(
        &self,
        user_id: &str,
        limit: i32,
    ) -> Result<Vec<Deployment>, DalError> {
        let mut deployments: Vec<_> = self
            .deployments
            .lock()
            .unwrap()
            .iter()
            .filter(|deployment| deployment.user_id == user_id)
            .cloned()
            .collect();
        deployments.sort_by_key(|deployment| std::cmp::Reverse(deployment.created_at));
        deployments.truncate(limit as usize);

        Ok(deployments)
    }

    async fn deployments_for_service(
        &self,
        service_id: &str,
        limit: i32,
    ) -> Result<Vec<Deployment>, DalError> {
        let mut deployments: Vec<_> = self
            .deployments
            .lock()
            .unwrap()
            .iter()
            .filter(|deployment| deployment.service_id == service_id)
            .cloned()
            .collect();
        deployments.sort_by_key(|deployment| std::cmp::Reverse(deployment.created_at));
        deployments.truncate(limit as usize);

        Ok(deployments)
    }

    async fn deployments_in_state(&self, status: Status) -> Result<Vec<Deployment>, DalError> {
        Ok(self
            .deployments
            .lock()
            .unwrap()
            .iter()
            .filter(|deployment| deployment.status == status)
            .cloned()
            .collect())
    }

    async fn installations_for_user(&self, user_id: &str) -> Result<Vec<Installation>, DalError> {
        Ok(self
            .installations
            .lock()
            .unwrap()
            .iter()
            .filter(|installation| installation.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_installation(&self, installation_id: i64) -> Result<(), DalError> {
        self.installations
            .lock()
            .unwrap()
            .retain(|installation| installation.installation_id != installation_id);
        Ok(())
    }

    async fn service(&self, service_id: &str) -> Result<Option<Service>, DalError> {
        Ok(self.services.lock().unwrap().get(service_id).cloned())
    }

    async fn services_for_user(&self, user_id: &str) -> Result<Vec<Service>, DalError> {
        Ok(self
            .services
            .lock()
            .unwrap()
            .values()
            .filter(|service| service.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn promote_service(&self, promotion: &ServicePromotion) -> Result<Promotion, DalError> {
        let mut services = self.services.lock().unwrap();

        let previous = match services.get(&promotion.service_id) {
            Some(existing) => {
                if existing
                    .active_created_at
                    .map_or(false, |at| at >= promotion.created_at)
                {
                    return Ok(Promotion::Lost);
                }
                existing.active_deployment_id
            }
            None => None,
        };

        services.insert(
            promotion.service_id.clone(),
            Service {
                service_id: promotion.service_id.clone(),
                user_id: promotion.user_id.clone(),
                service_name: promotion.service_name.clone(),
                active_deployment_id: Some(promotion.deployment_id),
                active_created_at: Some(promotion.created_at),
                service_endpoint: Some(promotion.service_endpoint.clone()),
                updated_at: Utc::now().timestamp(),
            },
        );

        Ok(Promotion::Promoted { previous })
    }
}

pub(crate) fn stage_dal() -> (Arc<InMemoryDal>, Arc<dyn Dal>) {
    let memory = Arc::new(InMemoryDal::default());

    (memory.clone(), memory)
}

#[derive(Default)]
pub(crate) struct StubCluster {
    active: Mutex<bool>,
    fail_register: Mutex<bool>,
    pub created: Mutex<Vec<String>>,
    pub rolled: Mutex<Vec<String>>,
}

impl StubCluster {
    pub fn set_active(&self, active: bool) {
        *self.active.lock().unwrap() = active;
    }

    pub fn fail_register(&self) {
        *self.fail_register.lock().unwrap() = true;
    }
}

#[async_trait]
impl ClusterApi for StubCluster {
    async fn register_web_task(&self, spec: &WebTaskSpec) -> Result<String, ClusterError> {
        if *self.fail_register.lock().unwrap() {
            return Err(ClusterError::Api("out of capacity".to_string()));
        }

        Ok(format!("arn:aws:ecs:task-definition/{}", spec.family))
    }

    async fn service_is_active(&self, _service_id: &str) -> Result<bool, ClusterError> {
        Ok(*self.active.lock().unwrap())
    }

    async fn roll_service(
        &self,
        service_id: &str,
        _task_definition_arn: &str,
    ) -> Result<(), ClusterError> {
        self.rolled.lock().unwrap().push(service_id.to_string());
        Ok(())
    }

    async fn create_web_service(
        &self,
        service_id: &str,
        _service_name: &str,
        _task_definition_arn: &str,
    ) -> Result<(), ClusterError> {
        self.created.lock().unwrap().push(service_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct StubBuilder {
    pub requests: Mutex<Vec<BuildRequest>>,
}

#[async_trait]
impl BuildStarter for StubBuilder {
    async fn start_build(&self, request: &BuildRequest) -> Result<StartedBuild, BuildError> {
        self.requests.lock().unwrap().push(request.clone());

        Ok(StartedBuild {
            project: request.project.clone(),
            build_id: format!("{}:build/1", request.project),
            log_group: format!("/aws/codebuild/{}", request.project),
            log_stream: request.deployment_id.to_string(),
        })
    }
}

#[derive(Default)]
pub(crate) struct MemoryParams {
    pub values: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl ParamStore for MemoryParams {
    async fn put(&self, name: &str, value: &str) -> Result<(), ParamError> {
        self.values
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool, ParamError> {
        Ok(self.values.lock().unwrap().contains_key(name))
    }
}

pub(crate) struct StaticSecrets(pub String);

#[async_trait]
impl SecretFetcher for StaticSecrets {
    async fn fetch(&self, _secret_id: &str) -> Result<String, SecretError> {
        Ok(self.0.clone())
    }
}

pub(crate) struct TestStage {
    pub context: StageContext,
    pub dal: Arc<InMemoryDal>,
    pub cluster: Arc<StubCluster>,
    pub builder: Arc<StubBuilder>,
    pub params: Arc<MemoryParams>,
}

/// A stage context over in-memory seams. The GitHub client points at the
/// given base, or at a dead endpoint when no server is involved.
pub(crate) fn stage_context_with(github_base: Option<String>) -> TestStage {
    let dal = Arc::new(InMemoryDal::default());
    let cluster = Arc::new(StubCluster::default());
    let builder = Arc::new(StubBuilder::default());
    let params = Arc::new(MemoryParams::default());

    let github = GithubClient::new(Arc::new(StaticSigner))
        .with_api_base(github_base.unwrap_or_else(|| "http://127.0.0.1:9".to_string()));

    let context = StageContext {
        dal: dal.clone(),
        github: Arc::new(github),
        vault: Arc::new(EnvVault::new(params.clone(), "whaleray")),
        builder: builder.clone(),
        cluster: cluster.clone(),
        config: Arc::new(PipelineConfig {
            project_name: "whaleray".to_string(),
            ecr_repository_url: "123456789012.dkr.ecr.ap-northeast-2.amazonaws.com/whaleray"
                .to_string(),
            api_domain: "api.example.dev".to_string(),
        }),
    };

    TestStage {
        context,
        dal,
        cluster,
        builder,
        params,
    }
}

pub(crate) fn stage_context() -> TestStage {
    stage_context_with(None)
}

pub(crate) fn installation(installation_id: i64, user_id: &str, account_login: &str) -> Installation {
    Installation {
        installation_id,
        user_id: user_id.to_string(),
        account_login: account_login.to_string(),
    }
}

/// A deployment the way it looks after a successful build: BUILDING, spring
/// port, transient env material already cleared.
pub(crate) fn built_deployment(
    user_id: &str,
    owner: &str,
    name: &str,
    created_at: i64,
) -> Deployment {
    let service_name = format!("{owner}-{name}");

    Deployment {
        deployment_id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        service_id: format!("{user_id}-{service_name}"),
        service_name,
        repository_full_name: format!("{owner}/{name}"),
        branch: "main".to_string(),
        installation_id: 42,
        env_file_content: None,
        is_reset: false,
        status: Status::Building,
        framework: Some("spring-boot".to_string()),
        codebuild_project: Some("whaleray-spring-boot".to_string()),
        codebuild_log_group: Some("/aws/codebuild/whaleray-spring-boot".to_string()),
        codebuild_log_stream: None,
        build_id: None,
        task_definition_arn: None,
        ecs_service: None,
        ecs_log_group: None,
        service_endpoint: None,
        port: SPRING_PORT,
        created_at,
        updated_at: created_at,
        error_message: None,
    }
}

// Database controller stubs for exercising the /db surface.

#[derive(Default)]
pub(crate) struct InMemoryDatabases {
    pub rows: Mutex<Vec<DatabaseRecord>>,
}

#[async_trait]
impl DatabaseDal for InMemoryDatabases {
    async fn database_for_user(&self, user_id: &str) -> Result<Option<DatabaseRecord>, DbDalError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|row| row.user_id == user_id)
            .cloned())
    }

    async fn insert_database(&self, record: &DatabaseRecord) -> Result<(), DbDalError> {
        self.rows.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn update_placement(
        &self,
        database_id: &Uuid,
        placement: &Placement,
    ) -> Result<(), DbDalError> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|row| row.database_id == *database_id) {
            row.service_arn = Some(placement.service_arn.clone());
            row.service_registry_id = Some(placement.service_registry_id.clone());
            row.task_definition_arn = Some(placement.task_definition_arn.clone());
            row.subnet_id = Some(placement.subnet_id.clone());
            row.availability_zone = Some(placement.availability_zone.clone());
        }
        Ok(())
    }

    async fn update_state(&self, database_id: &Uuid, state: DbState) -> Result<(), DbDalError> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|row| row.database_id == *database_id) {
            row.db_state = state;
        }
        Ok(())
    }

    async fn delete_database(&self, database_id: &Uuid) -> Result<(), DbDalError> {
        self.rows
            .lock()
            .unwrap()
            .retain(|row| row.database_id != *database_id);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct StubDatabaseCluster;

#[async_trait]
impl DatabaseCluster for StubDatabaseCluster {
    async fn pick_subnet(&self) -> Result<(String, String), DbClusterError> {
        Ok(("subnet-1".to_string(), "ap-northeast-1a".to_string()))
    }

    async fn register_database_task(
        &self,
        spec: &DatabaseTaskSpec,
    ) -> Result<String, DbClusterError> {
        Ok(format!("arn:aws:ecs:task-definition/{}", spec.family))
    }

    async fn create_registry(&self, name: &str) -> Result<Registry, DbClusterError> {
        Ok(Registry {
            arn: format!("arn:aws:servicediscovery:{name}"),
            id: format!("srv-{name}"),
        })
    }

    async fn delete_registry(&self, _registry_id: &str) -> Result<(), DbClusterError> {
        Ok(())
    }

    async fn create_database_service(
        &self,
        _spec: &DatabaseServiceSpec,
    ) -> Result<(), DbClusterError> {
        Ok(())
    }

    async fn describe_service(
        &self,
        _service: &str,
    ) -> Result<Option<ServiceCounts>, DbClusterError> {
        Ok(None)
    }

    async fn delete_service(&self, _service: &str) -> Result<(), DbClusterError> {
        Ok(())
    }

    async fn deregister_task(&self, _task_definition_arn: &str) -> Result<(), DbClusterError> {
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MemoryCredentials {
    pub values: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl CredentialStore for MemoryCredentials {
    async fn put(&self, name: &str, value: &str) -> Result<(), CredentialError> {
        self.values
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), CredentialError> {
        self.values.lock().unwrap().remove(name);
        Ok(())
    }
}

pub(crate) fn database_service() -> Arc<DatabaseService> {
    Arc::new(DatabaseService::new(
        Arc::new(InMemoryDatabases::default()),
        Arc::new(StubDatabaseCluster),
        Arc::new(MemoryCredentials::default()),
        "whaleray",
        "example.dev",
    ))
}
