//! Narrow contract to the clinical store for partition execution

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use super::models::{ExportFileInfo, ExportJobDefinition};

#[derive(Debug, Error)]
pub enum ExportEngineError {
    /// The partition failed in a way API consumers should see: a reason and
    /// an HTTP-style status code.
    #[error("{reason}")]
    Failed { reason: String, status_code: u16 },

    /// Cancellation was observed mid-partition.
    #[error("export partition cancelled")]
    Cancelled,

    /// Unexpected internal failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Runs the bounded query and export-write loop for one partition against
/// the clinical store, returning the files produced per resource type.
///
/// Implemented by the clinical-store integration; this crate only consumes
/// the manifest. Implementations must respect `cancel` promptly and clean
/// up before returning.
#[async_trait]
pub trait ExportEngine: Send + Sync {
    async fn export_partition(
        &self,
        partition: &ExportJobDefinition,
        cancel: watch::Receiver<bool>,
    ) -> Result<BTreeMap<String, Vec<ExportFileInfo>>, ExportEngineError>;
}
