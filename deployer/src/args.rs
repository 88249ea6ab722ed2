use std::net::SocketAddr;

use clap::Parser;

#[derive(Parser, Debug)]
pub struct Args {
    /// Address to bind the control plane to
    #[arg(long, env = "ADDRESS", default_value = "127.0.0.1:8000")]
    pub address: SocketAddr,

    /// Durable table holding deployment rows
    #[arg(long, env = "DEPLOYMENTS_TABLE")]
    pub deployments_table: String,

    /// Durable table holding service rows
    #[arg(long, env = "SERVICES_TABLE")]
    pub services_table: String,

    /// Durable table holding hosting-provider installation grants
    #[arg(long, env = "INSTALLATIONS_TABLE")]
    pub installations_table: String,

    /// GitHub App id used as the issuer of app assertions
    #[arg(long, env = "GITHUB_APP_ID")]
    pub github_app_id: String,

    /// GitHub App slug the install link is built from
    #[arg(long, env = "GITHUB_APP_SLUG")]
    pub github_app_slug: String,

    /// Secret holding the app's RS256 signing key (PEM)
    #[arg(long, env = "GITHUB_APP_PRIVATE_KEY_ARN")]
    pub github_app_private_key_arn: String,

    /// Secret holding the bearer-token verification key
    #[arg(long, env = "JWT_SECRET_ARN")]
    pub jwt_secret_arn: String,

    /// KMS key encrypting stored environment blobs
    #[arg(long, env = "SSM_KMS_KEY_ARN")]
    pub ssm_kms_key_arn: String,

    #[arg(long, env = "PROJECT_NAME", default_value = "whaleray")]
    pub project_name: String,

    /// Image registry builds are pushed to; images are tagged with the
    /// deployment id
    #[arg(long, env = "ECR_REPOSITORY_URL")]
    pub ecr_repository_url: String,

    #[arg(long, env = "CLUSTER_NAME")]
    pub cluster_name: String,

    #[arg(long, env = "TASK_EXECUTION_ROLE")]
    pub task_execution_role: String,

    #[arg(long, env = "TASK_ROLE")]
    pub task_role: String,

    /// Subnets web deployments are placed in
    #[arg(long, env = "PRIVATE_SUBNETS", value_delimiter = ',')]
    pub private_subnets: Vec<String>,

    /// Security group attached to web deployment tasks
    #[arg(long, env = "FARGATE_TASK_SG")]
    pub fargate_task_sg: String,

    /// Shared namespace registry web deployments bind into
    #[arg(long, env = "SERVICE_DISCOVERY_REGISTRY_ARN")]
    pub service_discovery_registry_arn: String,

    /// Domain stable service endpoints are published under
    #[arg(long, env = "API_DOMAIN")]
    pub api_domain: String,

    /// Seconds an in-progress deployment may go untouched before the
    /// orphan sweeper retires it
    #[arg(long, env = "DEPLOYMENT_TIMEOUT_SECONDS", default_value_t = 1800)]
    pub deployment_timeout_seconds: u64,

    #[command(flatten)]
    pub database: whaleray_provisioner::Args,
}
