//! Processing job: executes exactly one export partition

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::queue::{JobInfo, JobQueue, JobStatus};
use crate::workers::{JobError, JobExecutor};

use super::engine::{ExportEngine, ExportEngineError};
use super::models::{failure_details_payload, ExportJobDefinition, ExportJobResult};

pub struct ExportProcessingJob {
    queue: Arc<dyn JobQueue>,
    engine: Arc<dyn ExportEngine>,
}

impl ExportProcessingJob {
    pub fn new(queue: Arc<dyn JobQueue>, engine: Arc<dyn ExportEngine>) -> Self {
        Self { queue, engine }
    }
}

#[async_trait]
impl JobExecutor for ExportProcessingJob {
    fn name(&self) -> &'static str {
        "ExportProcessing"
    }

    async fn execute(
        &self,
        job: &JobInfo,
        cancel: watch::Receiver<bool>,
    ) -> Result<String, JobError> {
        let definition: ExportJobDefinition = serde_json::from_str(&job.definition).map_err(|e| {
            JobError::execution(
                format!("invalid export partition definition: {e}"),
                failure_details_payload("invalid export partition definition", 500),
                false,
            )
        })?;

        // An unstarted partition has nothing to clean up.
        if *cancel.borrow() {
            return Err(JobError::Cancelled);
        }

        // Read our own record back: a lease observed in any state but
        // Running is a transient inconsistency, not a hard failure.
        match self.queue.get_by_id(job.queue_type, job.id).await {
            Ok(Some(record)) if record.status == JobStatus::Running => {}
            Ok(Some(record)) => {
                return Err(JobError::Retriable(format!(
                    "job observed in state {} while executing",
                    record.status.as_str()
                )))
            }
            Ok(None) => return Err(JobError::Retriable("job record missing from store".to_string())),
            Err(error) => return Err(JobError::Other(error.into())),
        }

        let output = match self.engine.export_partition(&definition, cancel).await {
            Ok(output) => output,
            Err(ExportEngineError::Cancelled) => return Err(JobError::Cancelled),
            Err(ExportEngineError::Failed {
                reason,
                status_code,
            }) => {
                return Err(JobError::Execution {
                    payload: failure_details_payload(&reason, status_code),
                    customer_caused: status_code < 500,
                    message: reason,
                })
            }
            Err(ExportEngineError::Other(error)) => return Err(JobError::Other(error)),
        };

        let fragment = ExportJobResult {
            output,
            failure_details: None,
        };
        serde_json::to_string(&fragment).map_err(|e| JobError::Other(e.into()))
    }
}
