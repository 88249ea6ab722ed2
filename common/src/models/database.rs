use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Observed lifecycle state of a dedicated database instance, reconciled
/// against the cluster on every read.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Display, Serialize, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[strum(ascii_case_insensitive)]
pub enum DbState {
    Creating,
    Available,
    Stopped,
    Unknown,
}

/// Durable row for a user's dedicated database. At most one non-terminal
/// row exists per user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseRecord {
    pub database_id: Uuid,
    pub user_id: String,
    pub db_state: DbState,
    pub username: String,
    /// Pointer into the secret store, never the password itself.
    pub password_param: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_registry_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_definition_arn: Option<String>,
    pub created_at: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatabaseEndpoints {
    pub internal: String,
    pub external: String,
}

/// Read-side projection of a database; never carries the password.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseInfo {
    pub database_id: Uuid,
    pub db_state: DbState,
    pub username: String,
    pub endpoints: DatabaseEndpoints,
    pub created_at: i64,
}

/// Creation response; the only place the plaintext password ever appears.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseCreated {
    pub database_id: Uuid,
    pub username: String,
    pub password: String,
    pub endpoints: DatabaseEndpoints,
}
