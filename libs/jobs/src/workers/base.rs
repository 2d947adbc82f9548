//! Job executor contract and failure taxonomy

use async_trait::async_trait;
use tokio::sync::watch;

use crate::queue::JobInfo;

/// How a job body can end, short of returning a result.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// A deliberate, typed failure raised by a job implementation. The
    /// payload is recorded verbatim as the job's result.
    #[error("{message}")]
    Execution {
        message: String,
        payload: serde_json::Value,
        customer_caused: bool,
    },

    /// Cooperative cancellation was observed by the job body.
    #[error("job cancelled")]
    Cancelled,

    /// The job observed a transient inconsistency and should be released
    /// for a later lease instead of recording a terminal state.
    #[error("retriable: {0}")]
    Retriable(String),

    /// Anything else. Recorded as a failure with a generic payload.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl JobError {
    pub fn execution(
        message: impl Into<String>,
        payload: serde_json::Value,
        customer_caused: bool,
    ) -> Self {
        JobError::Execution {
            message: message.into(),
            payload,
            customer_caused,
        }
    }
}

/// A runnable job implementation, resolved from the type registry by the
/// numeric tag in the job's definition.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Run the job to completion, returning the serialized result payload.
    ///
    /// `cancel` starts out set when the lease was already cancelled, so
    /// cleanup-only logic can run; it flips mid-flight when a heartbeat
    /// observes a cancellation request. Implementations must poll it and do
    /// their own cleanup before returning.
    async fn execute(
        &self,
        job: &JobInfo,
        cancel: watch::Receiver<bool>,
    ) -> std::result::Result<String, JobError>;
}
