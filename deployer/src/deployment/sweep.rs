use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::info;
use whaleray_common::models::deployment::Deployment;

use super::record_status;
use crate::dal::{Dal, StatusFields};

/// Invariant repair for leaked in-progress rows: anything untouched for
/// longer than `threshold` is promoted to its timeout state, both in the
/// table and in the listing about to be returned. Runs on the read path, so
/// recording failures only log.
pub async fn sweep_orphans(
    dal: &Arc<dyn Dal>,
    deployments: &mut [Deployment],
    threshold: Duration,
) {
    let cutoff = Utc::now().timestamp() - threshold.as_secs() as i64;

    for deployment in deployments {
        if deployment.updated_at >= cutoff {
            continue;
        }

        let Some(timed_out) = deployment.status.timed_out() else {
            continue;
        };

        info!(
            deployment_id = %deployment.deployment_id,
            from = %deployment.status,
            to = %timed_out,
            "retiring orphaned deployment"
        );

        record_status(
            dal,
            &deployment.deployment_id,
            timed_out,
            StatusFields::default(),
        )
        .await;

        deployment.status = timed_out;
        deployment.updated_at = Utc::now().timestamp();
    }
}
