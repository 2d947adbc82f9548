//! Worker pool runtime tests against the in-memory store

mod support;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::watch;

use ferrum_jobs::queue::{InMemoryJobQueue, JobInfo, JobQueue, JobStatus, QueueType};
use ferrum_jobs::workers::{JobError, JobExecutor, JobRegistry};

use support::{fast_hosting_config, start_hosting, wait_for_job};

const TYPE_ID: i32 = 9;
const DEADLINE: Duration = Duration::from_secs(10);

fn definition(tag: &str) -> String {
    format!(r#"{{"typeId": {TYPE_ID}, "tag": "{tag}"}}"#)
}

async fn enqueue(queue: &InMemoryJobQueue, tag: &str) -> JobInfo {
    queue
        .enqueue(QueueType::Export, &[definition(tag)], None, false, false)
        .await
        .expect("enqueue")
        .remove(0)
}

fn registry_with(executor: Arc<dyn JobExecutor>) -> JobRegistry {
    let mut registry = JobRegistry::new();
    registry.register(TYPE_ID, move || executor.clone());
    registry
}

struct Scripted(fn() -> Result<String, JobError>);

#[async_trait]
impl JobExecutor for Scripted {
    fn name(&self) -> &'static str {
        "Scripted"
    }

    async fn execute(
        &self,
        _job: &JobInfo,
        _cancel: watch::Receiver<bool>,
    ) -> Result<String, JobError> {
        (self.0)()
    }
}

#[tokio::test]
async fn successful_jobs_complete_with_their_result() {
    let queue = Arc::new(InMemoryJobQueue::new());
    let registry = registry_with(Arc::new(Scripted(|| Ok("done".to_string()))));
    let (handle, shutdown) = start_hosting(queue.clone(), registry, fast_hosting_config());

    let job = enqueue(&queue, "ok").await;
    let finished = wait_for_job(&queue, job.id, DEADLINE, |j| j.status.is_terminal()).await;
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.result.as_deref(), Some("done"));
    assert!(finished.end_date.is_some());

    let _ = shutdown.send(true);
    handle.await.expect("hosting stops");
}

#[tokio::test]
async fn typed_failures_preserve_their_payload() {
    let queue = Arc::new(InMemoryJobQueue::new());
    let registry = registry_with(Arc::new(Scripted(|| {
        Err(JobError::execution(
            "partition rejected",
            json!({"failureDetails": {"failureReason": "partition rejected", "failureStatusCode": 400}}),
            true,
        ))
    })));
    let (handle, shutdown) = start_hosting(queue.clone(), registry, fast_hosting_config());

    let job = enqueue(&queue, "typed").await;
    let finished = wait_for_job(&queue, job.id, DEADLINE, |j| j.status.is_terminal()).await;
    assert_eq!(finished.status, JobStatus::Failed);
    let payload: serde_json::Value =
        serde_json::from_str(finished.result.as_deref().unwrap()).unwrap();
    assert_eq!(payload["failureDetails"]["failureReason"], "partition rejected");
    assert_eq!(payload["failureDetails"]["failureStatusCode"], 400);

    let _ = shutdown.send(true);
    handle.await.expect("hosting stops");
}

#[tokio::test]
async fn unclassified_failures_record_a_generic_payload() {
    let queue = Arc::new(InMemoryJobQueue::new());
    let registry = registry_with(Arc::new(Scripted(|| {
        Err(JobError::Other(anyhow::anyhow!("backing store went away")))
    })));
    let (handle, shutdown) = start_hosting(queue.clone(), registry, fast_hosting_config());

    let job = enqueue(&queue, "unclassified").await;
    let finished = wait_for_job(&queue, job.id, DEADLINE, |j| j.status.is_terminal()).await;
    assert_eq!(finished.status, JobStatus::Failed);
    let payload: serde_json::Value =
        serde_json::from_str(finished.result.as_deref().unwrap()).unwrap();
    assert_eq!(payload["message"], "backing store went away");
    assert!(payload["stackTrace"].is_string());

    let _ = shutdown.send(true);
    handle.await.expect("hosting stops");
}

#[tokio::test]
async fn unknown_type_tags_are_left_for_operator_intervention() {
    let queue = Arc::new(InMemoryJobQueue::new());
    // Nothing registered: the job can be leased but never dispatched.
    let (handle, shutdown) = start_hosting(queue.clone(), JobRegistry::new(), fast_hosting_config());

    let job = enqueue(&queue, "orphan").await;
    let leased = wait_for_job(&queue, job.id, DEADLINE, |j| j.status == JobStatus::Running).await;
    assert!(leased.dequeue_count >= 1);

    // Give the pool a few more cycles: the job must not reach a terminal
    // state on its own.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let still = queue
        .get_by_id(QueueType::Export, job.id)
        .await
        .expect("get_by_id")
        .expect("exists");
    assert_eq!(still.status, JobStatus::Running);

    let _ = shutdown.send(true);
    handle.await.expect("hosting stops");
}

struct WaitForCancel;

#[async_trait]
impl JobExecutor for WaitForCancel {
    fn name(&self) -> &'static str {
        "WaitForCancel"
    }

    async fn execute(
        &self,
        _job: &JobInfo,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<String, JobError> {
        loop {
            if *cancel.borrow() {
                return Err(JobError::Cancelled);
            }
            if cancel.changed().await.is_err() {
                return Err(JobError::Cancelled);
            }
        }
    }
}

#[tokio::test]
async fn mid_flight_cancellation_arrives_through_the_heartbeat() {
    let queue = Arc::new(InMemoryJobQueue::new());
    let registry = registry_with(Arc::new(WaitForCancel));
    let (handle, shutdown) = start_hosting(queue.clone(), registry, fast_hosting_config());

    let job = enqueue(&queue, "cancel-me").await;
    wait_for_job(&queue, job.id, DEADLINE, |j| j.status == JobStatus::Running).await;

    queue
        .cancel_by_id(QueueType::Export, job.id)
        .await
        .expect("cancel");

    let finished = wait_for_job(&queue, job.id, DEADLINE, |j| j.status.is_terminal()).await;
    assert_eq!(finished.status, JobStatus::Cancelled);

    let _ = shutdown.send(true);
    handle.await.expect("hosting stops");
}

struct PreCancelProbe {
    observed: Arc<std::sync::Mutex<Option<bool>>>,
}

#[async_trait]
impl JobExecutor for PreCancelProbe {
    fn name(&self) -> &'static str {
        "PreCancelProbe"
    }

    async fn execute(
        &self,
        _job: &JobInfo,
        cancel: watch::Receiver<bool>,
    ) -> Result<String, JobError> {
        *self.observed.lock().unwrap() = Some(*cancel.borrow());
        Err(JobError::Cancelled)
    }
}

#[tokio::test]
async fn a_cancelled_expired_lease_is_redelivered_pre_cancelled() {
    let queue = Arc::new(InMemoryJobQueue::new());
    let job = enqueue(&queue, "pre-cancelled").await;

    // Lease with a short timeout, request cancellation, and let the lease
    // lapse without a heartbeat.
    let leased = queue
        .dequeue(QueueType::Export, "manual", 1, Some(job.id))
        .await
        .expect("dequeue")
        .expect("leased");
    queue
        .cancel_by_id(QueueType::Export, leased.id)
        .await
        .expect("cancel");
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let observed = Arc::new(std::sync::Mutex::new(None));
    let registry = registry_with(Arc::new(PreCancelProbe {
        observed: observed.clone(),
    }));
    let mut config = fast_hosting_config();
    config.heartbeat_timeout = Duration::from_secs(1);
    let (handle, shutdown) = start_hosting(queue.clone(), registry, config);

    let finished = wait_for_job(&queue, job.id, DEADLINE, |j| j.status.is_terminal()).await;
    assert_eq!(finished.status, JobStatus::Cancelled);
    assert_eq!(*observed.lock().unwrap(), Some(true));

    let _ = shutdown.send(true);
    handle.await.expect("hosting stops");
}

struct RetriableOnce {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl JobExecutor for RetriableOnce {
    fn name(&self) -> &'static str {
        "RetriableOnce"
    }

    async fn execute(
        &self,
        _job: &JobInfo,
        _cancel: watch::Receiver<bool>,
    ) -> Result<String, JobError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(JobError::Retriable("record not visible yet".to_string()))
        } else {
            Ok("recovered".to_string())
        }
    }
}

#[tokio::test]
async fn retriable_outcomes_release_the_lease_for_a_later_attempt() {
    let queue = Arc::new(InMemoryJobQueue::new());
    let calls = Arc::new(AtomicU32::new(0));
    let registry = registry_with(Arc::new(RetriableOnce {
        calls: calls.clone(),
    }));
    let mut config = fast_hosting_config();
    // Short lease so the released job is re-discovered quickly.
    config.heartbeat_timeout = Duration::from_millis(300);
    config.heartbeat_interval = Duration::from_millis(50);
    let (handle, shutdown) = start_hosting(queue.clone(), registry, config);

    let job = enqueue(&queue, "retry-me").await;
    let finished = wait_for_job(&queue, job.id, DEADLINE, |j| j.status.is_terminal()).await;
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.result.as_deref(), Some("recovered"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(finished.dequeue_count, 2);

    let _ = shutdown.send(true);
    handle.await.expect("hosting stops");
}
