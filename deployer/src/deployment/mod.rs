pub mod deploy;
pub mod inspect;
pub mod intake;
pub mod sweep;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;
use whaleray_common::models::deployment::{BuildEvent, Deployment};
use whaleray_common::Status;

use crate::build::BuildStarter;
use crate::cluster::ClusterApi;
use crate::dal::{Dal, DalError, StatusFields};
use crate::env::EnvVault;
use crate::github::GithubClient;

const INSPECT_BUFFER_SIZE: usize = 100;
const BUILD_EVENT_BUFFER_SIZE: usize = 100;

/// Read-only pipeline configuration shared by the stages.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub project_name: String,
    pub ecr_repository_url: String,
    pub api_domain: String,
}

/// Everything a stage worker needs; cheap to clone into spawned tasks.
#[derive(Clone)]
pub struct StageContext {
    pub dal: Arc<dyn Dal>,
    pub github: Arc<GithubClient>,
    pub vault: Arc<EnvVault>,
    pub builder: Arc<dyn BuildStarter>,
    pub cluster: Arc<dyn ClusterApi>,
    pub config: Arc<PipelineConfig>,
}

/// Wires the pipeline stages together. Two multi-producer single-consumer
/// channels move deployments between them:
///
/// ```text
/// intake        persists the row with status INSPECTING, then pushes it
///    |
///    v
/// inspect task  probes the repository, stages env material and starts the
///    |          build; the row moves to BUILDING
///    v
/// (external builder finishes and emits a completion event)
///    |
///    v
/// deploy task   registers the task template, rolls the cluster service and
///               promotes the deployment to RUNNING
/// ```
#[derive(Clone)]
pub struct DeploymentManager {
    inspect_send: mpsc::Sender<Deployment>,
    build_send: mpsc::Sender<BuildEvent>,
}

impl DeploymentManager {
    pub fn new(context: StageContext) -> Self {
        let (inspect_send, inspect_recv) = mpsc::channel(INSPECT_BUFFER_SIZE);
        let (build_send, build_recv) = mpsc::channel(BUILD_EVENT_BUFFER_SIZE);

        tokio::spawn(inspect::task(inspect_recv, context.clone()));
        tokio::spawn(deploy::task(build_recv, context));

        Self {
            inspect_send,
            build_send,
        }
    }

    /// Requeue rows that were mid-inspection when the process last stopped.
    /// Later stages are covered by the orphan sweeper instead.
    pub async fn requeue_inspecting(&self, dal: &Arc<dyn Dal>) -> Result<(), DalError> {
        let stuck = dal.deployments_in_state(Status::Inspecting).await?;

        info!(count = %stuck.len(), "requeueing deployments for inspection");
        for deployment in stuck {
            self.inspect_push(deployment).await;
        }

        Ok(())
    }

    pub async fn inspect_push(&self, deployment: Deployment) {
        self.inspect_send
            .send(deployment)
            .await
            .expect("inspect task has stopped");
    }

    pub async fn build_event_push(&self, event: BuildEvent) {
        self.build_send
            .send(event)
            .await
            .expect("deploy task has stopped");
    }
}

/// Record a transition through the single mutation point, never letting a
/// recording failure mask the error that produced it.
pub(crate) async fn record_status(
    dal: &Arc<dyn Dal>,
    deployment_id: &Uuid,
    status: Status,
    fields: StatusFields,
) {
    if let Err(error) = dal.update_status(deployment_id, status, fields).await {
        error!(
            %deployment_id,
            %status,
            error = &error as &dyn std::error::Error,
            "failed to record deployment status"
        );
    }
}
