//! Bulk export as a fan-out/fan-in graph of cooperating jobs
//!
//! One orchestrator job partitions the request into independently leasable
//! processing jobs sharing its group id, then polls the group and joins
//! the child manifests into a single result.

mod engine;
mod models;
mod orchestrator;
mod processing;

pub use engine::{ExportEngine, ExportEngineError};
pub use models::{
    failure_details_payload, plan_partitions, ExportFailureDetails, ExportFileInfo,
    ExportJobDefinition, ExportJobResult,
};
pub use orchestrator::ExportOrchestratorJob;
pub use processing::ExportProcessingJob;

use std::sync::Arc;
use std::time::Duration;

use crate::queue::{JobInfo, JobQueue, QueueType};
use crate::workers::{JobExecutor, JobRegistry};
use crate::{Error, Result};

/// Definition type tags for the export job family.
pub const ORCHESTRATOR_TYPE_ID: i32 = 1;
pub const PROCESSING_TYPE_ID: i32 = 2;

/// Submit a bulk export request: enqueues the orchestrator job that fans
/// the work out. This is the seam the REST layer calls.
pub async fn enqueue_export(queue: &dyn JobQueue, request: ExportJobDefinition) -> Result<JobInfo> {
    let mut definition = request;
    definition.type_id = ORCHESTRATOR_TYPE_ID;
    let payload = serde_json::to_string(&definition)?;
    let jobs = queue
        .enqueue(QueueType::Export, &[payload], None, false, false)
        .await?;
    jobs.into_iter()
        .next()
        .ok_or_else(|| Error::Internal("enqueue returned no job".to_string()))
}

/// Register the orchestrator executor. It only needs the queue.
pub fn register_orchestrator(
    registry: &mut JobRegistry,
    queue: Arc<dyn JobQueue>,
    poll_interval: Duration,
) {
    let orchestrator: Arc<dyn JobExecutor> =
        Arc::new(ExportOrchestratorJob::new(queue, poll_interval));
    registry.register(ORCHESTRATOR_TYPE_ID, move || orchestrator.clone());
}

/// Register the processing executor with its clinical-store engine.
pub fn register_processing(
    registry: &mut JobRegistry,
    queue: Arc<dyn JobQueue>,
    engine: Arc<dyn ExportEngine>,
) {
    let processing: Arc<dyn JobExecutor> = Arc::new(ExportProcessingJob::new(queue, engine));
    registry.register(PROCESSING_TYPE_ID, move || processing.clone());
}

/// Register both halves of the export pair.
pub fn register_export_jobs(
    registry: &mut JobRegistry,
    queue: Arc<dyn JobQueue>,
    poll_interval: Duration,
    engine: Arc<dyn ExportEngine>,
) {
    register_orchestrator(registry, queue.clone(), poll_interval);
    register_processing(registry, queue, engine);
}
