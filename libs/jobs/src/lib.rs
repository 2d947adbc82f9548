//! Distributed job execution core for FHIR bulk operations
//!
//! The runtime behind long-running clinical-data operations:
//! - A storage-agnostic job queue contract with optimistic-concurrency
//!   version tokens and lease-based dispatch
//! - A resilient backing-store access layer with transient-fault retry and
//!   read-replica traffic routing
//! - A polling worker pool with heartbeats and cooperative cancellation
//! - The export orchestration pair that fans a bulk request out into
//!   independently leasable partitions and joins their manifests

pub mod config;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod queue;
pub mod store;
pub mod workers;

pub use config::Config;
pub use error::{Error, Result};
