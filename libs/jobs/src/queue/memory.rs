//! In-memory implementation of the job store contract
//!
//! Backs the test suites and embedded deployments. A single async mutex
//! around the whole ledger gives the contract's linearizability for free;
//! version tokens come from one monotonic sequence shared by all jobs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;

use crate::{Error, Result};

use super::models::{failure_payload, JobInfo, JobStatus, QueueType};
use super::traits::{CompleteOutcome, HeartbeatOutcome, JobQueue, MAX_DEQUEUE_COUNT};

#[derive(Default)]
struct QueueState {
    id_seq: i64,
    group_seq: i64,
    version_seq: i64,
    jobs: HashMap<i64, JobInfo>,
}

impl QueueState {
    fn next_id(&mut self) -> i64 {
        self.id_seq += 1;
        self.id_seq
    }

    fn next_group(&mut self) -> i64 {
        self.group_seq += 1;
        self.group_seq
    }

    fn next_version(&mut self) -> i64 {
        self.version_seq += 1;
        self.version_seq
    }

    fn cancel_group(
        &mut self,
        queue_type: QueueType,
        group_id: i64,
        exclude: Option<i64>,
        now: DateTime<Utc>,
    ) {
        let targets: Vec<i64> = self
            .jobs
            .values()
            .filter(|j| j.queue_type == queue_type && j.group_id == group_id)
            .filter(|j| exclude != Some(j.id))
            .filter(|j| matches!(j.status, JobStatus::Created | JobStatus::Running))
            .map(|j| j.id)
            .collect();
        for id in targets {
            let version = self.next_version();
            if let Some(job) = self.jobs.get_mut(&id) {
                match job.status {
                    JobStatus::Created => {
                        job.status = JobStatus::Cancelled;
                        job.end_date = Some(now);
                        job.version = version;
                    }
                    JobStatus::Running => {
                        // Out-of-band flag: the lease holder learns of it
                        // through its next heartbeat, so the version token
                        // must stay untouched.
                        job.cancel_requested = true;
                    }
                    _ => {}
                }
            }
        }
    }
}

pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Move terminal jobs whose end date is older than `retention` into the
    /// archived state. Returns the number of jobs archived.
    pub async fn archive_completed(&self, retention: ChronoDuration) -> Result<usize> {
        let mut state = self.state.lock().await;
        let cutoff = Utc::now() - retention;
        let targets: Vec<i64> = state
            .jobs
            .values()
            .filter(|j| j.status.is_terminal() && j.status != JobStatus::Archived)
            .filter(|j| j.end_date.is_some_and(|end| end < cutoff))
            .map(|j| j.id)
            .collect();
        let archived = targets.len();
        for id in targets {
            let version = state.next_version();
            if let Some(job) = state.jobs.get_mut(&id) {
                job.status = JobStatus::Archived;
                job.version = version;
            }
        }
        Ok(archived)
    }
}

fn leasable(job: &JobInfo, cutoff: DateTime<Utc>) -> bool {
    match job.status {
        JobStatus::Created => true,
        JobStatus::Running => job.heartbeat_date.is_none_or(|h| h < cutoff),
        _ => false,
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(
        &self,
        queue_type: QueueType,
        definitions: &[String],
        group_id: Option<i64>,
        force_single_active_group: bool,
        already_completed: bool,
    ) -> Result<Vec<JobInfo>> {
        let mut state = self.state.lock().await;

        if force_single_active_group {
            let other_active = state.jobs.values().any(|j| {
                j.queue_type == queue_type
                    && !j.status.is_terminal()
                    && Some(j.group_id) != group_id
            });
            if other_active {
                return Err(Error::JobConflict(format!(
                    "another active job group exists for queue type {}",
                    queue_type.as_str()
                )));
            }
        }

        let group_id = match group_id {
            Some(group) => group,
            None => state.next_group(),
        };
        let now = Utc::now();
        let mut enqueued = Vec::with_capacity(definitions.len());
        for definition in definitions {
            if let Some(existing) = state.jobs.values().find(|j| {
                j.queue_type == queue_type
                    && j.group_id == group_id
                    && j.definition == *definition
                    && j.status != JobStatus::Archived
            }) {
                enqueued.push(existing.clone());
                continue;
            }
            let id = state.next_id();
            let version = state.next_version();
            let job = JobInfo {
                id,
                queue_type,
                status: if already_completed {
                    JobStatus::Completed
                } else {
                    JobStatus::Created
                },
                group_id,
                definition: definition.clone(),
                result: None,
                version,
                priority: 0,
                create_date: now,
                start_date: None,
                end_date: already_completed.then_some(now),
                heartbeat_date: None,
                cancel_requested: false,
                dequeue_count: 0,
                worker_id: None,
            };
            state.jobs.insert(id, job.clone());
            enqueued.push(job);
        }
        Ok(enqueued)
    }

    async fn dequeue(
        &self,
        queue_type: QueueType,
        worker_id: &str,
        heartbeat_timeout_seconds: i64,
        job_id: Option<i64>,
    ) -> Result<Option<JobInfo>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let cutoff = now - ChronoDuration::seconds(heartbeat_timeout_seconds);
        loop {
            let candidate = state
                .jobs
                .values()
                .filter(|j| j.queue_type == queue_type)
                .filter(|j| job_id.is_none_or(|id| j.id == id))
                .filter(|j| leasable(j, cutoff))
                .min_by(|a, b| {
                    b.priority
                        .cmp(&a.priority)
                        .then_with(|| a.create_date.cmp(&b.create_date))
                        .then_with(|| a.id.cmp(&b.id))
                })
                .map(|j| j.id);
            let Some(id) = candidate else {
                return Ok(None);
            };
            let version = state.next_version();
            let Some(job) = state.jobs.get_mut(&id) else {
                return Ok(None);
            };
            job.dequeue_count += 1;
            job.version = version;
            if job.dequeue_count > MAX_DEQUEUE_COUNT {
                // Stuck: something keeps leasing this job without finishing it.
                tracing::warn!(
                    job_id = job.id,
                    dequeue_count = job.dequeue_count,
                    "job exceeded its dequeue budget, failing it"
                );
                job.status = JobStatus::Failed;
                job.result = Some(
                    failure_payload("job exceeded the maximum number of dequeue attempts", "")
                        .to_string(),
                );
                job.end_date = Some(now);
                continue;
            }
            job.status = JobStatus::Running;
            job.start_date = job.start_date.or(Some(now));
            job.heartbeat_date = Some(now);
            job.worker_id = Some(worker_id.to_string());
            return Ok(Some(job.clone()));
        }
    }

    async fn heartbeat(&self, job: &JobInfo) -> Result<HeartbeatOutcome> {
        let mut state = self.state.lock().await;
        match state.jobs.get(&job.id) {
            Some(stored) if stored.version == job.version => {}
            _ => return Ok(HeartbeatOutcome::Lost),
        }
        let version = state.next_version();
        let Some(stored) = state.jobs.get_mut(&job.id) else {
            return Ok(HeartbeatOutcome::Lost);
        };
        stored.version = version;
        stored.heartbeat_date = Some(Utc::now());
        if job.result.is_some() {
            stored.result = job.result.clone();
        }
        Ok(HeartbeatOutcome::Renewed {
            version,
            cancel_requested: stored.cancel_requested,
        })
    }

    async fn complete(
        &self,
        job: &JobInfo,
        cascade_cancel_on_failure: bool,
    ) -> Result<CompleteOutcome> {
        let mut state = self.state.lock().await;
        match state.jobs.get(&job.id) {
            Some(stored) if stored.version == job.version => {}
            _ => return Ok(CompleteOutcome::Conflict),
        }
        let now = Utc::now();
        let version = state.next_version();
        let Some(stored) = state.jobs.get_mut(&job.id) else {
            return Ok(CompleteOutcome::Conflict);
        };
        stored.status = job.status;
        stored.result = job.result.clone();
        stored.end_date = Some(now);
        stored.version = version;
        if cascade_cancel_on_failure && job.status == JobStatus::Failed {
            state.cancel_group(job.queue_type, job.group_id, Some(job.id), now);
        }
        Ok(CompleteOutcome::Completed)
    }

    async fn get_by_id(&self, queue_type: QueueType, id: i64) -> Result<Option<JobInfo>> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .get(&id)
            .filter(|j| j.queue_type == queue_type)
            .cloned())
    }

    async fn get_by_group(&self, queue_type: QueueType, group_id: i64) -> Result<Vec<JobInfo>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<JobInfo> = state
            .jobs
            .values()
            .filter(|j| j.queue_type == queue_type && j.group_id == group_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    async fn cancel_by_group(&self, queue_type: QueueType, group_id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.cancel_group(queue_type, group_id, None, Utc::now());
        Ok(())
    }

    async fn cancel_by_id(&self, queue_type: QueueType, id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        let version = state.next_version();
        let Some(job) = state.jobs.get_mut(&id) else {
            tracing::debug!(job_id = id, "cancel requested for unknown job");
            return Ok(());
        };
        if job.queue_type != queue_type {
            return Ok(());
        }
        match job.status {
            JobStatus::Created => {
                job.status = JobStatus::Cancelled;
                job.end_date = Some(Utc::now());
                job.version = version;
            }
            JobStatus::Running => {
                // Out-of-band flag; see cancel_group.
                job.cancel_requested = true;
            }
            _ => {}
        }
        Ok(())
    }
}
