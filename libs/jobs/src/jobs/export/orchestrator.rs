//! Orchestrator job: partitions an export request and joins child results

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::queue::{JobInfo, JobQueue, JobStatus};
use crate::workers::{JobError, JobExecutor};

use super::models::{
    failure_details_payload, plan_partitions, ExportFailureDetails, ExportJobDefinition,
    ExportJobResult,
};

pub struct ExportOrchestratorJob {
    queue: Arc<dyn JobQueue>,
    poll_interval: Duration,
}

impl ExportOrchestratorJob {
    pub fn new(queue: Arc<dyn JobQueue>, poll_interval: Duration) -> Self {
        Self {
            queue,
            poll_interval,
        }
    }

    async fn children_of(&self, job: &JobInfo) -> Result<Vec<JobInfo>, JobError> {
        let group = self
            .queue
            .get_by_group(job.queue_type, job.group_id)
            .await
            .map_err(|e| JobError::Other(e.into()))?;
        Ok(group.into_iter().filter(|j| j.id != job.id).collect())
    }
}

#[async_trait]
impl JobExecutor for ExportOrchestratorJob {
    fn name(&self) -> &'static str {
        "ExportOrchestrator"
    }

    async fn execute(
        &self,
        job: &JobInfo,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<String, JobError> {
        let definition: ExportJobDefinition = serde_json::from_str(&job.definition).map_err(|e| {
            JobError::execution(
                format!("invalid export definition: {e}"),
                failure_details_payload("invalid export definition", 500),
                false,
            )
        })?;

        // Idempotent restart: children already enqueued for this group mean
        // partitioning is done and we go straight to polling.
        let mut children = self.children_of(job).await?;
        if children.is_empty() {
            let partitions = plan_partitions(&definition, Utc::now());
            let payloads: Vec<String> = partitions
                .iter()
                .map(serde_json::to_string)
                .collect::<Result<_, _>>()
                .map_err(|e| JobError::Other(e.into()))?;
            tracing::info!(
                job_id = job.id,
                group_id = job.group_id,
                children = payloads.len(),
                "partitioning export request"
            );
            let enqueued = self
                .queue
                .enqueue(job.queue_type, &payloads, Some(job.group_id), false, false)
                .await
                .map_err(|e| JobError::Other(e.into()))?;
            if enqueued.len() != payloads.len() {
                // Idempotent enqueue must hand the full plan back; a short
                // count is a store inconsistency worth re-running on.
                return Err(JobError::Retriable(format!(
                    "expected {} child jobs, store returned {}",
                    payloads.len(),
                    enqueued.len()
                )));
            }
            children = enqueued;
        } else {
            tracing::info!(
                job_id = job.id,
                group_id = job.group_id,
                children = children.len(),
                "resuming export with existing child jobs"
            );
        }

        // Wait for the children, surfacing the first failure as soon as it
        // appears instead of collecting the full set. A failed child's
        // cascade also flags this job for cancellation, so the failure
        // check must come before the cancellation check.
        loop {
            children.sort_by_key(|child| child.id);
            if let Some(failed) = children
                .iter()
                .find(|child| child.status == JobStatus::Failed)
            {
                let details = failed
                    .result
                    .as_deref()
                    .and_then(|raw| serde_json::from_str::<ExportJobResult>(raw).ok())
                    .and_then(|result| result.failure_details)
                    .unwrap_or_else(|| ExportFailureDetails {
                        failure_reason: "Job failed.".to_string(),
                        failure_status_code: 500,
                    });
                tracing::warn!(
                    job_id = job.id,
                    failed_child = failed.id,
                    reason = %details.failure_reason,
                    "child partition failed, surfacing its failure"
                );
                return Err(JobError::Execution {
                    message: details.failure_reason.clone(),
                    customer_caused: details.failure_status_code < 500,
                    payload: failure_details_payload(
                        &details.failure_reason,
                        details.failure_status_code,
                    ),
                });
            }
            if *cancel.borrow()
                || children
                    .iter()
                    .any(|child| child.status == JobStatus::Cancelled)
            {
                return Err(JobError::Cancelled);
            }
            if children.iter().all(|child| child.status.is_terminal()) {
                break;
            }
            tokio::select! {
                _ = sleep(self.poll_interval) => {}
                _ = cancel.changed() => {}
            }
            children = self.children_of(job).await?;
        }

        let mut manifest = ExportJobResult::default();
        for child in &children {
            let Some(raw) = child.result.as_deref() else {
                continue;
            };
            let fragment: ExportJobResult = serde_json::from_str(raw).map_err(|e| {
                JobError::Other(anyhow::anyhow!("child {} result unreadable: {e}", child.id))
            })?;
            manifest.merge(fragment);
        }
        tracing::info!(
            job_id = job.id,
            group_id = job.group_id,
            resource_types = manifest.output.len(),
            "export complete, returning merged manifest"
        );
        serde_json::to_string(&manifest).map_err(|e| JobError::Other(e.into()))
    }
}
