//! Shared fixtures for the integration suites
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use ferrum_jobs::jobs::export::{
    ExportEngine, ExportEngineError, ExportFileInfo, ExportJobDefinition,
};
use ferrum_jobs::queue::{InMemoryJobQueue, JobInfo, JobQueue, QueueType};
use ferrum_jobs::workers::{JobHosting, JobHostingConfig, JobRegistry};

/// Hosting configuration tuned for fast test turnaround.
pub fn fast_hosting_config() -> JobHostingConfig {
    JobHostingConfig {
        poll_interval: Duration::from_millis(20),
        max_running_jobs: 4,
        heartbeat_interval: Duration::from_millis(25),
        heartbeat_timeout: Duration::from_secs(2),
    }
}

/// Spawn a job hosting instance; returns the join handle and the shutdown
/// switch.
pub fn start_hosting(
    queue: Arc<InMemoryJobQueue>,
    registry: JobRegistry,
    config: JobHostingConfig,
) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let hosting = Arc::new(JobHosting::new(queue, Arc::new(registry), config));
    let handle = tokio::spawn(hosting.run(QueueType::Export, shutdown_rx));
    (handle, shutdown_tx)
}

/// Poll a single job until `predicate` holds or the deadline passes.
pub async fn wait_for_job<F>(
    queue: &InMemoryJobQueue,
    id: i64,
    deadline: Duration,
    predicate: F,
) -> JobInfo
where
    F: Fn(&JobInfo) -> bool,
{
    let started = std::time::Instant::now();
    loop {
        let job = queue
            .get_by_id(QueueType::Export, id)
            .await
            .expect("get_by_id")
            .expect("job exists");
        if predicate(&job) {
            return job;
        }
        if started.elapsed() > deadline {
            panic!("job {id} did not reach the expected state: {job:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll a group until every member is terminal or the deadline passes.
pub async fn wait_for_group_terminal(
    queue: &InMemoryJobQueue,
    group_id: i64,
    deadline: Duration,
) -> Vec<JobInfo> {
    let started = std::time::Instant::now();
    loop {
        let jobs = queue
            .get_by_group(QueueType::Export, group_id)
            .await
            .expect("get_by_group");
        if !jobs.is_empty() && jobs.iter().all(|j| j.status.is_terminal()) {
            return jobs;
        }
        if started.elapsed() > deadline {
            panic!("group {group_id} did not reach a terminal state: {jobs:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Engine that fabricates one file per partition. Partitions whose resource
/// type matches `fail_type` report a structured failure instead.
pub struct FakeExportEngine {
    pub fail_type: Option<String>,
    pub failure_reason: String,
    pub failure_status_code: u16,
}

impl Default for FakeExportEngine {
    fn default() -> Self {
        Self {
            fail_type: None,
            failure_reason: "Job failed.".to_string(),
            failure_status_code: 500,
        }
    }
}

#[async_trait]
impl ExportEngine for FakeExportEngine {
    async fn export_partition(
        &self,
        partition: &ExportJobDefinition,
        _cancel: watch::Receiver<bool>,
    ) -> Result<BTreeMap<String, Vec<ExportFileInfo>>, ExportEngineError> {
        let resource_type = partition
            .resource_types
            .clone()
            .unwrap_or_else(|| "Resource".to_string());
        if self.fail_type.as_deref() == Some(resource_type.as_str()) {
            return Err(ExportEngineError::Failed {
                reason: self.failure_reason.clone(),
                status_code: self.failure_status_code,
            });
        }
        // Window start makes the sequence unique and ordered per partition.
        let sequence = partition.since.map(|t| t.timestamp()).unwrap_or(0) as i32;
        let mut output = BTreeMap::new();
        output.insert(
            resource_type.clone(),
            vec![ExportFileInfo {
                url: format!("file:///export/{resource_type}-{sequence}.ndjson"),
                sequence,
            }],
        );
        Ok(output)
    }
}
