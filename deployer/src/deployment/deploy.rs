use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use whaleray_common::models::deployment::{BuildEvent, BuildStatus, Deployment};
use whaleray_common::Status;

use super::{record_status, StageContext};
use crate::cluster::WebTaskSpec;
use crate::dal::{Promotion, ServicePromotion, StatusFields};
use crate::error::{Error, Result};

/// Consumes build-completion events and rolls successful builds onto the
/// cluster. Nothing here re-raises into the event source: task-template
/// registration is not idempotent under redelivery.
pub async fn task(mut recv: mpsc::Receiver<BuildEvent>, context: StageContext) {
    info!("deploy task started");

    while let Some(event) = recv.recv().await {
        let context = context.clone();

        tokio::spawn(async move {
            handle_event(event, &context).await;
        });
    }
}

pub(crate) async fn handle_event(event: BuildEvent, context: &StageContext) {
    let deployment = match context.dal.deployment(&event.deployment_id).await {
        Ok(Some(deployment)) => deployment,
        Ok(None) => {
            warn!(deployment_id = %event.deployment_id, "build event for an unknown deployment");
            return;
        }
        Err(error) => {
            error!(
                deployment_id = %event.deployment_id,
                error = &error as &dyn std::error::Error,
                "could not load the deployment for a build event"
            );
            return;
        }
    };

    match event.build_status {
        BuildStatus::Failed => build_failed(context, &deployment, event.build_id).await,
        BuildStatus::Succeeded => {
            if let Err(error) = roll_out(&deployment, event.build_id, context).await {
                rollout_failed(context, &deployment.deployment_id, error).await;
            }
        }
    }
}

#[instrument(skip(context, deployment, build_id), fields(deployment_id = %deployment.deployment_id, status = %Status::BuildingFail))]
async fn build_failed(context: &StageContext, deployment: &Deployment, build_id: Option<String>) {
    error!("builder reported a failed build");

    record_status(
        &context.dal,
        &deployment.deployment_id,
        Status::BuildingFail,
        StatusFields {
            build_id,
            ..Default::default()
        },
    )
    .await;
}

#[instrument(skip(context, deployment_id, error), fields(deployment_id = %deployment_id, status = %Status::DeployingFail))]
async fn rollout_failed(context: &StageContext, deployment_id: &Uuid, error: Error) {
    error!(
        error = &error as &dyn std::error::Error,
        "cluster rollout aborted"
    );

    record_status(
        &context.dal,
        deployment_id,
        Status::DeployingFail,
        StatusFields::error(error.to_string()),
    )
    .await;
}

#[instrument(skip_all, fields(deployment_id = %deployment.deployment_id, status = %Status::Deploying))]
async fn roll_out(
    deployment: &Deployment,
    build_id: Option<String>,
    context: &StageContext,
) -> Result<()> {
    record_status(
        &context.dal,
        &deployment.deployment_id,
        Status::Deploying,
        StatusFields {
            build_id,
            ..Default::default()
        },
    )
    .await;

    let dep8 = &deployment.deployment_id.to_string()[..8];
    let family = format!(
        "{}-{}-{dep8}",
        context.config.project_name, deployment.service_name
    );
    let log_group = format!("/ecs/{}", context.config.project_name);

    let task_definition_arn = context
        .cluster
        .register_web_task(&WebTaskSpec {
            family,
            service_name: deployment.service_name.clone(),
            image_uri: format!(
                "{}:{}",
                context.config.ecr_repository_url, deployment.deployment_id
            ),
            port: deployment.port,
            log_group: log_group.clone(),
            log_stream_prefix: deployment.deployment_id.to_string(),
        })
        .await?;

    if context
        .cluster
        .service_is_active(&deployment.service_id)
        .await?
    {
        info!(service_id = %deployment.service_id, "rolling existing service");
        context
            .cluster
            .roll_service(&deployment.service_id, &task_definition_arn)
            .await?;
    } else {
        info!(service_id = %deployment.service_id, "creating service");
        context
            .cluster
            .create_web_service(
                &deployment.service_id,
                &deployment.service_name,
                &task_definition_arn,
            )
            .await?;
    }

    let service_endpoint = format!(
        "https://{}/{}",
        context.config.api_domain, deployment.service_id
    );

    record_status(
        &context.dal,
        &deployment.deployment_id,
        Status::Running,
        StatusFields {
            ecs_service: Some(deployment.service_id.clone()),
            ecs_log_group: Some(log_group),
            task_definition_arn: Some(task_definition_arn),
            service_endpoint: Some(service_endpoint.clone()),
            ..Default::default()
        },
    )
    .await;

    supersede(deployment, service_endpoint, context).await;

    Ok(())
}

/// Promote this deployment on its service row and retire the previously
/// active one. Failures here never fail the rollout; the next successful
/// deployment restores the invariant.
#[instrument(skip_all, fields(deployment_id = %deployment.deployment_id, service_id = %deployment.service_id))]
async fn supersede(deployment: &Deployment, service_endpoint: String, context: &StageContext) {
    let promotion = ServicePromotion {
        service_id: deployment.service_id.clone(),
        user_id: deployment.user_id.clone(),
        service_name: deployment.service_name.clone(),
        service_endpoint,
        deployment_id: deployment.deployment_id,
        created_at: deployment.created_at,
    };

    match context.dal.promote_service(&promotion).await {
        Ok(Promotion::Promoted { previous }) => {
            if let Some(previous) = previous.filter(|id| id != &deployment.deployment_id) {
                info!(%previous, "superseding previous deployment");
                record_status(
                    &context.dal,
                    &previous,
                    Status::Superseded,
                    StatusFields::default(),
                )
                .await;
            }
        }
        Ok(Promotion::Lost) => {
            // A newer build finished first; this rollout stands down
            info!("a newer deployment was promoted first");
            record_status(
                &context.dal,
                &deployment.deployment_id,
                Status::Superseded,
                StatusFields::default(),
            )
            .await;
        }
        Err(error) => {
            error!(
                error = &error as &dyn std::error::Error,
                "could not supersede the previous deployment"
            );
        }
    }
}
