//! Job queue domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Job families sharing a queue partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum QueueType {
    Unknown = 0,
    Export = 1,
}

impl QueueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueType::Unknown => "unknown",
            QueueType::Export => "export",
        }
    }
}

impl TryFrom<i16> for QueueType {
    type Error = String;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QueueType::Unknown),
            1 => Ok(QueueType::Export),
            _ => Err(format!("Invalid queue type: {}", value)),
        }
    }
}

/// Job lifecycle states.
///
/// A job that loses its lease stays `Running`; leasability is decided by
/// the heartbeat timestamp, not by a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum JobStatus {
    Created = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
    Cancelled = 4,
    Archived = 5,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Archived
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Archived => "archived",
        }
    }
}

impl TryFrom<i16> for JobStatus {
    type Error = String;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(JobStatus::Created),
            1 => Ok(JobStatus::Running),
            2 => Ok(JobStatus::Completed),
            3 => Ok(JobStatus::Failed),
            4 => Ok(JobStatus::Cancelled),
            5 => Ok(JobStatus::Archived),
            _ => Err(format!("Invalid job status: {}", value)),
        }
    }
}

/// A unit of schedulable work.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobInfo {
    pub id: i64,
    #[sqlx(try_from = "i16")]
    pub queue_type: QueueType,
    #[sqlx(try_from = "i16")]
    pub status: JobStatus,
    /// Ties related jobs together (an orchestrator and its children).
    /// Immutable once assigned.
    pub group_id: i64,
    /// Opaque payload describing the work; carries the executor type tag.
    pub definition: String,
    /// Opaque payload written on completion (or as progress via heartbeat).
    pub result: Option<String>,
    /// Optimistic-concurrency token; strictly increases on every mutation
    /// and must match the stored value for a mutation to succeed.
    pub version: i64,
    pub priority: i64,
    pub create_date: DateTime<Utc>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub heartbeat_date: Option<DateTime<Utc>>,
    /// Monotonic: once requested, cancellation is never reset. Enforcement
    /// is cooperative, done by the executing worker.
    pub cancel_requested: bool,
    pub dequeue_count: i32,
    pub worker_id: Option<String>,
}

impl JobInfo {
    /// Numeric executor tag embedded in the definition payload.
    pub fn definition_type_id(&self) -> Option<i32> {
        let value: serde_json::Value = serde_json::from_str(&self.definition).ok()?;
        value.get("typeId").and_then(|v| v.as_i64()).map(|v| v as i32)
    }
}

/// Generic failure payload recorded for unclassified job failures.
pub fn failure_payload(message: &str, stack_trace: &str) -> serde_json::Value {
    json!({ "message": message, "stackTrace": stack_trace })
}
