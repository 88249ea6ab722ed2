/// Knobs of the database controller. Flattened into the control-plane
/// binary's arguments.
#[derive(clap::Args, Debug, Clone)]
pub struct Args {
    /// Durable table holding database rows
    #[arg(long, env = "DATABASE_TABLE")]
    pub database_table: String,

    /// Base task template describing the database + admin UI containers
    #[arg(long, env = "TASK_DEFINITION_ARN")]
    pub task_definition_arn: String,

    /// Subnets eligible to place database tasks in
    #[arg(long, env = "SUBNETS", value_delimiter = ',')]
    pub subnets: Vec<String>,

    /// Security groups attached to database tasks
    #[arg(long, env = "SECURITY_GROUPS", value_delimiter = ',')]
    pub security_groups: Vec<String>,

    /// Cloud Map namespace the database services register into
    #[arg(long, env = "NAMESPACE_ID")]
    pub namespace_id: String,

    /// Public domain the external database endpoint is published under
    #[arg(long, env = "DOMAIN_NAME")]
    pub domain_name: String,

    /// Role the cluster assumes to manage database storage volumes
    #[arg(long, env = "ECS_INFRA_ROLE_ARN")]
    pub infra_role_arn: String,
}
