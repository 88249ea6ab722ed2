use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status string reported for a service that never had a deployment
/// promoted.
pub const STATUS_NOT_DEPLOYED: &str = "NOT_DEPLOYED";

/// Status string reported when the active deployment row is gone.
pub const STATUS_NO_DEPLOYMENT: &str = "NO_DEPLOYMENT";

/// The stable identity of a deployed application for a user-repository
/// pair. Created on first successful rollout, updated on each supersession,
/// never deleted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub service_id: String,
    pub user_id: String,
    pub service_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_deployment_id: Option<Uuid>,
    /// `created_at` of the active deployment; guards the conditional
    /// promotion write.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_endpoint: Option<String>,
    pub updated_at: i64,
}

/// A service joined with the state of its active deployment, as returned by
/// the listing APIs.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSummary {
    #[serde(flatten)]
    pub service: Service,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_updated_at: Option<i64>,
}
