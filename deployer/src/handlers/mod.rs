use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{instrument, warn};
use whaleray_auth::{Claim, JwtVerifier};
use whaleray_common::models::database::{DatabaseCreated, DatabaseInfo};
use whaleray_common::models::deployment::{BuildEvent, DeploymentAccepted, DeploymentRequest};
use whaleray_common::models::error::ApiError;
use whaleray_common::models::installation::MeResponse;
use whaleray_common::models::service::{
    Service, ServiceSummary, STATUS_NOT_DEPLOYED, STATUS_NO_DEPLOYMENT,
};
use whaleray_provisioner::DatabaseService;

use crate::dal::Dal;
use crate::deployment::{intake, sweep, DeploymentManager};
use crate::github::{GithubClient, GithubError};

mod error;

pub use self::error::{Error, Result};

const DEFAULT_LIST_LIMIT: i32 = 20;
const SERVICE_HISTORY_LIMIT: i32 = 10;

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ListQuery {
    /// Number of rows to return, most recent first.
    pub limit: Option<i32>,
}

#[derive(Clone)]
pub struct ApiState {
    pub dal: Arc<dyn Dal>,
    pub github: Arc<GithubClient>,
    pub manager: DeploymentManager,
    pub databases: Arc<DatabaseService>,
    pub app_slug: String,
    pub deployment_timeout: Duration,
}

pub fn router(state: ApiState, verifier: JwtVerifier) -> Router {
    Router::new()
        .route(
            "/deployments",
            post(create_deployment).get(get_deployments),
        )
        .route("/services", get(get_services))
        .route("/services/:service_id", get(get_service))
        .route("/repositories", get(get_repositories))
        .route("/me", get(get_me))
        .route("/db", get(get_database).delete(delete_database))
        .route("/db/createdb", post(create_database))
        .route("/db/reset-password", post(reset_database_password))
        .route("/internal/build-events", post(build_event))
        .layer(Extension(state))
        .layer(Extension(verifier))
        .layer(TraceLayer::new_for_http())
}

#[instrument(skip_all, fields(account.user_id = %claim.sub))]
async fn create_deployment(
    claim: Claim,
    Extension(state): Extension<ApiState>,
    Json(request): Json<DeploymentRequest>,
) -> Result<Json<DeploymentAccepted>> {
    let deployment = intake::create_deployment(&state.dal, claim.user_id(), request).await?;

    let accepted = DeploymentAccepted {
        deployment_id: deployment.deployment_id,
        status: deployment.status,
    };

    // The row is durable; handing it to the inspector completes intake
    state.manager.inspect_push(deployment).await;

    Ok(Json(accepted))
}

#[instrument(skip_all, fields(account.user_id = %claim.sub))]
async fn get_deployments(
    claim: Claim,
    Query(query): Query<ListQuery>,
    Extension(state): Extension<ApiState>,
) -> Result<Json<serde_json::Value>> {
    let mut deployments = state
        .dal
        .deployments_for_user(claim.user_id(), query.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .await?;

    sweep::sweep_orphans(&state.dal, &mut deployments, state.deployment_timeout).await;

    Ok(Json(json!({ "deployments": deployments })))
}

#[instrument(skip_all, fields(account.user_id = %claim.sub))]
async fn get_services(
    claim: Claim,
    Extension(state): Extension<ApiState>,
) -> Result<Json<serde_json::Value>> {
    let services = state.dal.services_for_user(claim.user_id()).await?;

    let mut summaries = Vec::with_capacity(services.len());
    for service in services {
        summaries.push(summarize(&state, service).await?);
    }

    Ok(Json(json!({ "services": summaries })))
}

#[instrument(skip_all, fields(account.user_id = %claim.sub, service_id = %service_id))]
async fn get_service(
    claim: Claim,
    Path(service_id): Path<String>,
    Extension(state): Extension<ApiState>,
) -> Result<Json<serde_json::Value>> {
    let service = state
        .dal
        .service(&service_id)
        .await?
        .filter(|service| service.user_id == claim.user_id())
        .ok_or(Error::ServiceNotFound)?;

    let deployments = state
        .dal
        .deployments_for_service(&service_id, SERVICE_HISTORY_LIMIT)
        .await?;
    let summary = summarize(&state, service).await?;

    Ok(Json(json!({ "service": summary, "deployments": deployments })))
}

/// Join a service with the status of its active deployment.
async fn summarize(state: &ApiState, service: Service) -> Result<ServiceSummary> {
    let (status, status_updated_at) = match service.active_deployment_id {
        Some(active) => match state.dal.deployment(&active).await? {
            Some(deployment) => (deployment.status.to_string(), Some(deployment.updated_at)),
            None => (STATUS_NO_DEPLOYMENT.to_string(), None),
        },
        None => (STATUS_NOT_DEPLOYED.to_string(), None),
    };

    Ok(ServiceSummary {
        service,
        status,
        status_updated_at,
    })
}

#[instrument(skip_all, fields(account.user_id = %claim.sub))]
async fn get_repositories(
    claim: Claim,
    Extension(state): Extension<ApiState>,
) -> Result<Response> {
    let installations = state.dal.installations_for_user(claim.user_id()).await?;
    let Some(installation) = installations.into_iter().next() else {
        return Ok(need_installation(&state.app_slug));
    };

    let listing = async {
        let token = state
            .github
            .installation_token(installation.installation_id)
            .await?;
        state.github.installation_repositories(&token.token).await
    }
    .await;

    match listing {
        Ok(repositories) => {
            let total = repositories.len();

            Ok(Json(json!({ "repositories": repositories, "totalCount": total })).into_response())
        }
        Err(GithubError::InstallationGone) => {
            warn!(
                installation_id = installation.installation_id,
                "evicting installation whose grant is gone"
            );
            if let Err(error) = state
                .dal
                .delete_installation(installation.installation_id)
                .await
            {
                warn!(
                    error = &error as &dyn std::error::Error,
                    "could not evict dead installation"
                );
            }

            Ok(need_installation(&state.app_slug))
        }
        Err(error) => Err(crate::error::Error::from(error).into()),
    }
}

#[instrument(skip_all, fields(account.user_id = %claim.sub))]
async fn get_me(
    claim: Claim,
    Extension(state): Extension<ApiState>,
) -> Result<Json<MeResponse>> {
    let installations = state.dal.installations_for_user(claim.user_id()).await?;

    let response = if installations.is_empty() {
        MeResponse {
            need_installation: true,
            install_url: Some(install_url(&state.app_slug)),
            installations: None,
        }
    } else {
        MeResponse {
            need_installation: false,
            install_url: None,
            installations: Some(installations),
        }
    };

    Ok(Json(response))
}

#[instrument(skip_all, fields(account.user_id = %claim.sub))]
async fn get_database(claim: Claim, Extension(state): Extension<ApiState>) -> Result<Response> {
    match state.databases.get(claim.user_id()).await? {
        Some(info) => Ok(Json::<DatabaseInfo>(info).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(ApiError::new("No database found")),
        )
            .into_response()),
    }
}

#[instrument(skip_all, fields(account.user_id = %claim.sub))]
async fn create_database(
    claim: Claim,
    Extension(state): Extension<ApiState>,
) -> Result<(StatusCode, Json<DatabaseCreated>)> {
    let created = state.databases.create(claim.user_id()).await?;

    Ok((StatusCode::CREATED, Json(created)))
}

#[instrument(skip_all, fields(account.user_id = %claim.sub))]
async fn delete_database(
    claim: Claim,
    Extension(state): Extension<ApiState>,
) -> Result<Json<serde_json::Value>> {
    state.databases.delete(claim.user_id()).await?;

    Ok(Json(json!({ "message": "Database deleted" })))
}

async fn reset_database_password(
    _claim: Claim,
    Extension(state): Extension<ApiState>,
) -> Result<StatusCode> {
    state.databases.reset_password()?;

    Ok(StatusCode::OK)
}

/// Ingestion point for builder completion events. Exposed on the internal
/// network only, so it carries no bearer token.
async fn build_event(
    Extension(state): Extension<ApiState>,
    Json(event): Json<BuildEvent>,
) -> StatusCode {
    state.manager.build_event_push(event).await;

    StatusCode::ACCEPTED
}

fn install_url(app_slug: &str) -> String {
    format!("https://github.com/apps/{app_slug}/installations/new")
}

fn need_installation(app_slug: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "No GitHub App installation found",
            "needInstallation": true,
            "installUrl": install_url(app_slug),
        })),
    )
        .into_response()
}
