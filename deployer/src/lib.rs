pub mod args;
pub mod build;
pub mod cluster;
pub mod dal;
pub mod deployment;
pub mod env;
pub mod error;
pub mod github;
pub mod handlers;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;
use std::time::Duration;

use aws_config::BehaviorVersion;
use tracing::{error, info};
use whaleray_auth::{CachedSecret, JwtVerifier, SecretsManagerFetcher};
use whaleray_provisioner::cluster::{ClusterSettings, EcsDatabaseCluster};
use whaleray_provisioner::creds::SsmCredentialStore;
use whaleray_provisioner::dal::DynamoDatabases;
use whaleray_provisioner::DatabaseService;

pub use args::Args;

use crate::build::{BuildStarter, CodeBuildStarter};
use crate::cluster::{ClusterApi, EcsCluster, WebClusterSettings};
use crate::dal::{Dal, DynamoDal};
use crate::deployment::{DeploymentManager, PipelineConfig, StageContext};
use crate::env::{EnvVault, SsmParamStore};
use crate::github::{AppKeySigner, GithubClient};
use crate::handlers::ApiState;

/// Wire every seam to its AWS implementation and serve the control plane.
pub async fn start(args: Args) {
    let aws_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let region = aws_config
        .region()
        .map(ToString::to_string)
        .expect("an AWS region must be configured");

    let dynamodb = aws_sdk_dynamodb::Client::new(&aws_config);
    let ecs = aws_sdk_ecs::Client::new(&aws_config);
    let ssm = aws_sdk_ssm::Client::new(&aws_config);
    let codebuild = aws_sdk_codebuild::Client::new(&aws_config);
    let service_discovery = aws_sdk_servicediscovery::Client::new(&aws_config);
    let ec2 = aws_sdk_ec2::Client::new(&aws_config);
    let secrets = Arc::new(SecretsManagerFetcher::new(
        aws_sdk_secretsmanager::Client::new(&aws_config),
    ));

    let dal: Arc<dyn Dal> = Arc::new(DynamoDal::new(
        dynamodb.clone(),
        &args.deployments_table,
        &args.services_table,
        &args.installations_table,
    ));

    let signer = Arc::new(AppKeySigner::new(
        CachedSecret::new(secrets.clone(), &args.github_app_private_key_arn),
        &args.github_app_id,
    ));
    let github = Arc::new(GithubClient::new(signer));

    let vault = Arc::new(EnvVault::new(
        Arc::new(SsmParamStore::new(ssm.clone(), &args.ssm_kms_key_arn)),
        &args.project_name,
    ));
    let builder: Arc<dyn BuildStarter> = Arc::new(CodeBuildStarter::new(codebuild));
    let cluster: Arc<dyn ClusterApi> = Arc::new(EcsCluster::new(
        ecs.clone(),
        WebClusterSettings {
            cluster_name: args.cluster_name.clone(),
            task_execution_role: args.task_execution_role.clone(),
            task_role: args.task_role.clone(),
            subnets: args.private_subnets.clone(),
            security_group: args.fargate_task_sg.clone(),
            service_discovery_registry_arn: args.service_discovery_registry_arn.clone(),
            region,
        },
    ));

    let context = StageContext {
        dal: dal.clone(),
        github: github.clone(),
        vault,
        builder,
        cluster,
        config: Arc::new(PipelineConfig {
            project_name: args.project_name.clone(),
            ecr_repository_url: args.ecr_repository_url.clone(),
            api_domain: args.api_domain.clone(),
        }),
    };

    let manager = DeploymentManager::new(context);
    if let Err(err) = manager.requeue_inspecting(&dal).await {
        error!(
            error = &err as &dyn std::error::Error,
            "could not requeue in-progress deployments"
        );
    }

    let databases = Arc::new(DatabaseService::new(
        Arc::new(DynamoDatabases::new(dynamodb, &args.database.database_table)),
        Arc::new(EcsDatabaseCluster::new(
            ecs,
            service_discovery,
            ec2,
            ClusterSettings {
                cluster_name: args.cluster_name.clone(),
                base_task_definition: args.database.task_definition_arn.clone(),
                subnets: args.database.subnets.clone(),
                security_groups: args.database.security_groups.clone(),
                namespace_id: args.database.namespace_id.clone(),
                infra_role_arn: args.database.infra_role_arn.clone(),
            },
        )),
        Arc::new(SsmCredentialStore::new(ssm, &args.ssm_kms_key_arn)),
        &args.project_name,
        &args.database.domain_name,
    ));

    let verifier = JwtVerifier::new(CachedSecret::new(secrets, &args.jwt_secret_arn));

    let state = ApiState {
        dal,
        github,
        manager,
        databases,
        app_slug: args.github_app_slug.clone(),
        deployment_timeout: Duration::from_secs(args.deployment_timeout_seconds),
    };

    let router = handlers::router(state, verifier);

    info!(address = %args.address, "binding to and listening at address");

    axum::Server::bind(&args.address)
        .serve(router.into_make_service())
        .await
        .unwrap_or_else(|_| panic!("failed to bind to address: {}", args.address));
}
