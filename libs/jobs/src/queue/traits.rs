//! Job store contract for the distributed queue

use async_trait::async_trait;

use crate::Result;

use super::models::{JobInfo, QueueType};

/// Jobs leased more often than this are considered stuck and failed by the
/// store instead of looping forever.
pub const MAX_DEQUEUE_COUNT: i32 = 10;

/// Result of a lease renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Lease extended; carries the new version token and the cooperative
    /// cancellation flag.
    Renewed {
        version: i64,
        cancel_requested: bool,
    },
    /// The supplied version is stale: the lease belongs to someone else now.
    Lost,
}

/// Result of a terminal-state write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteOutcome {
    Completed,
    /// Version mismatch; the current attempt abandons the job.
    Conflict,
}

/// Atomic, versioned job ledger.
///
/// Implementations must guarantee that `dequeue` is linearizable with
/// respect to the version token: two concurrent calls never lease the same
/// job, and every mutation advances the version past the value the caller
/// observed.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue one job per definition under `group_id` (a fresh group when
    /// absent). Idempotent: a definition already present in the group
    /// returns the existing job instead of a duplicate.
    ///
    /// `force_single_active_group` rejects the call when another
    /// non-terminal group exists for the queue type. `already_completed`
    /// records the jobs directly in the completed state.
    async fn enqueue(
        &self,
        queue_type: QueueType,
        definitions: &[String],
        group_id: Option<i64>,
        force_single_active_group: bool,
        already_completed: bool,
    ) -> Result<Vec<JobInfo>>;

    /// Atomically lease one job: the given `job_id` when supplied, else the
    /// oldest eligible by priority and creation order. Eligible means
    /// queued, or running with a heartbeat older than
    /// `heartbeat_timeout_seconds`. Returns `None` when nothing is leasable.
    async fn dequeue(
        &self,
        queue_type: QueueType,
        worker_id: &str,
        heartbeat_timeout_seconds: i64,
        job_id: Option<i64>,
    ) -> Result<Option<JobInfo>>;

    /// Renew the lease held on `job`, matched by version. A `Some` result
    /// on `job` is written through as a progress payload.
    async fn heartbeat(&self, job: &JobInfo) -> Result<HeartbeatOutcome>;

    /// Write `job`'s terminal status and result. With
    /// `cascade_cancel_on_failure`, a `Failed` status requests cancellation
    /// of every other active job in the group.
    async fn complete(&self, job: &JobInfo, cascade_cancel_on_failure: bool)
        -> Result<CompleteOutcome>;

    async fn get_by_id(&self, queue_type: QueueType, id: i64) -> Result<Option<JobInfo>>;

    /// All jobs sharing a group, ordered by id.
    async fn get_by_group(&self, queue_type: QueueType, group_id: i64) -> Result<Vec<JobInfo>>;

    /// Cancel every active job in a group: queued jobs are cancelled
    /// outright, running jobs get the cooperative flag.
    async fn cancel_by_group(&self, queue_type: QueueType, group_id: i64) -> Result<()>;

    async fn cancel_by_id(&self, queue_type: QueueType, id: i64) -> Result<()>;
}
