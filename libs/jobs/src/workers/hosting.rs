//! Worker pool runtime that leases jobs and runs them to a terminal state

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::time::sleep;
use uuid::Uuid;

use crate::metrics;
use crate::queue::{
    failure_payload, CompleteOutcome, HeartbeatOutcome, JobInfo, JobQueue, JobStatus, QueueType,
};

use super::base::{JobError, JobExecutor};
use super::registry::JobRegistry;

#[derive(Debug, Clone)]
pub struct JobHostingConfig {
    pub poll_interval: Duration,
    pub max_running_jobs: usize,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
}

impl JobHostingConfig {
    pub fn from_config(config: &crate::config::JobsConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_running_jobs: config.max_running_job_count,
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
        }
    }
}

impl Default for JobHostingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_running_jobs: 5,
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(600),
        }
    }
}

fn random_unit() -> f64 {
    // Deterministic-enough jitter source without adding a new RNG dependency.
    let bytes = *Uuid::new_v4().as_bytes();
    let value = u64::from_le_bytes(bytes[..8].try_into().expect("8 bytes"));
    (value as f64) / (u64::MAX as f64)
}

fn startup_jitter(base: Duration) -> Duration {
    base.mul_f64(random_unit())
}

/// Runs `max_running_jobs` independent polling slots against one queue
/// type. A slot leases a job, resolves its executor from the registry,
/// keeps the lease alive with a heartbeat task, and classifies the
/// outcome into a terminal state. Slots never crash: unexpected errors are
/// logged and the slot keeps polling.
pub struct JobHosting {
    queue: Arc<dyn JobQueue>,
    registry: Arc<JobRegistry>,
    config: JobHostingConfig,
    worker_id: String,
}

impl JobHosting {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        registry: Arc<JobRegistry>,
        config: JobHostingConfig,
    ) -> Self {
        Self {
            queue,
            registry,
            config,
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run the polling slots until shutdown is requested.
    pub async fn run(self: Arc<Self>, queue_type: QueueType, shutdown: watch::Receiver<bool>) {
        tracing::info!(
            worker_id = %self.worker_id,
            slots = self.config.max_running_jobs,
            queue_type = queue_type.as_str(),
            job_types = ?self.registry.registered_type_ids(),
            "starting job hosting"
        );
        let handles: Vec<_> = (0..self.config.max_running_jobs)
            .map(|slot| {
                let hosting = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { hosting.run_slot(queue_type, slot, shutdown).await })
            })
            .collect();
        join_all(handles).await;
        tracing::info!(worker_id = %self.worker_id, "job hosting stopped");
    }

    async fn run_slot(&self, queue_type: QueueType, slot: usize, mut shutdown: watch::Receiver<bool>) {
        // Stagger first polls so co-started slots and processes do not hit
        // the store in lockstep.
        sleep(startup_jitter(self.config.poll_interval)).await;
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self
                .queue
                .dequeue(
                    queue_type,
                    &self.worker_id,
                    self.config.heartbeat_timeout.as_secs() as i64,
                    None,
                )
                .await
            {
                Ok(Some(job)) => {
                    metrics::JOBS_DEQUEUED_TOTAL
                        .with_label_values(&[queue_type.as_str()])
                        .inc();
                    self.execute_job(job).await;
                }
                Ok(None) => self.idle(&mut shutdown).await,
                Err(error) => {
                    tracing::error!(%error, slot, "dequeue failed");
                    self.idle(&mut shutdown).await;
                }
            }
        }
        tracing::debug!(slot, "worker slot exiting");
    }

    async fn idle(&self, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = sleep(self.config.poll_interval) => {}
            _ = shutdown.changed() => {}
        }
    }

    async fn execute_job(&self, job: JobInfo) {
        let Some(type_id) = job.definition_type_id() else {
            tracing::warn!(
                job_id = job.id,
                "job definition carries no type tag, leaving it for operator intervention"
            );
            return;
        };
        let Some(executor) = self.registry.resolve(type_id) else {
            tracing::warn!(
                job_id = job.id,
                type_id,
                "no executor registered for job type, leaving it for operator intervention"
            );
            return;
        };

        let queue_type = job.queue_type;
        let started = std::time::Instant::now();
        tracing::info!(
            job_id = job.id,
            group_id = job.group_id,
            executor = executor.name(),
            "executing job"
        );

        // Pre-set when the lease was already cancelled so cleanup-only
        // logic can run.
        let (cancel_tx, cancel_rx) = watch::channel(job.cancel_requested);
        let shared = Arc::new(Mutex::new(job.clone()));
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.queue.clone(),
            shared.clone(),
            cancel_tx,
            self.config.heartbeat_interval,
            done_rx,
        ));

        let outcome = executor.execute(&job, cancel_rx).await;

        let _ = done_tx.send(());
        let _ = heartbeat.await;

        let mut current = shared.lock().await.clone();
        let status = match outcome {
            Ok(result) => {
                current.result = Some(result);
                JobStatus::Completed
            }
            Err(JobError::Retriable(reason)) => {
                // Leave the lease to expire; a future poll re-discovers the job.
                tracing::warn!(job_id = current.id, %reason, "job asked to be retried, releasing lease");
                metrics::JOBS_COMPLETED_TOTAL
                    .with_label_values(&[queue_type.as_str(), "released"])
                    .inc();
                return;
            }
            Err(JobError::Cancelled) => JobStatus::Cancelled,
            Err(JobError::Execution {
                message,
                payload,
                customer_caused,
            }) => {
                tracing::warn!(
                    job_id = current.id,
                    %message,
                    customer_caused,
                    "job reported a typed failure"
                );
                current.result = Some(payload.to_string());
                JobStatus::Failed
            }
            Err(JobError::Other(error)) => {
                tracing::error!(job_id = current.id, %error, "job failed with unclassified error");
                current.result =
                    Some(failure_payload(&error.to_string(), &format!("{error:?}")).to_string());
                JobStatus::Failed
            }
        };
        current.status = status;

        metrics::JOB_EXECUTION_DURATION_SECONDS
            .with_label_values(&[queue_type.as_str()])
            .observe(started.elapsed().as_secs_f64());
        metrics::JOBS_COMPLETED_TOTAL
            .with_label_values(&[queue_type.as_str(), status.as_str()])
            .inc();

        match self.queue.complete(&current, true).await {
            Ok(CompleteOutcome::Completed) => tracing::info!(
                job_id = current.id,
                status = status.as_str(),
                elapsed = ?started.elapsed(),
                "job finished"
            ),
            Ok(CompleteOutcome::Conflict) => tracing::warn!(
                job_id = current.id,
                "lease lost before terminal write, abandoning"
            ),
            // Logged, not retried: the job will be re-leased once its
            // heartbeat lapses.
            Err(error) => tracing::error!(
                job_id = current.id,
                %error,
                "failed to record terminal state"
            ),
        }
    }
}

/// Best-effort lease renewal. Failures are swallowed; a lost lease or an
/// observed cancellation request triggers the job's cancellation signal.
async fn heartbeat_loop(
    queue: Arc<dyn JobQueue>,
    shared: Arc<Mutex<JobInfo>>,
    cancel_tx: watch::Sender<bool>,
    interval: Duration,
    mut done: oneshot::Receiver<()>,
) {
    // Same stagger as the poll slots, so heartbeats from co-leased jobs
    // spread out.
    tokio::select! {
        _ = &mut done => return,
        _ = sleep(startup_jitter(interval)) => {}
    }
    loop {
        tokio::select! {
            _ = &mut done => return,
            _ = sleep(interval) => {}
        }
        let mut job = shared.lock().await;
        match queue.heartbeat(&job).await {
            Ok(HeartbeatOutcome::Renewed {
                version,
                cancel_requested,
            }) => {
                job.version = version;
                job.heartbeat_date = Some(Utc::now());
                metrics::JOB_HEARTBEATS_TOTAL
                    .with_label_values(&["renewed"])
                    .inc();
                if cancel_requested {
                    job.cancel_requested = true;
                    let _ = cancel_tx.send(true);
                }
            }
            Ok(HeartbeatOutcome::Lost) => {
                tracing::warn!(job_id = job.id, "job lease lost, signalling cancellation");
                metrics::JOB_HEARTBEATS_TOTAL
                    .with_label_values(&["lost"])
                    .inc();
                let _ = cancel_tx.send(true);
            }
            Err(error) => {
                // Heartbeating is best effort; a failed renewal is not a
                // job failure.
                tracing::debug!(job_id = job.id, %error, "heartbeat failed");
                metrics::JOB_HEARTBEATS_TOTAL
                    .with_label_values(&["error"])
                    .inc();
            }
        }
    }
}
