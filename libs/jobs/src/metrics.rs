//! Metrics collection for the job execution core
//!
//! Prometheus metrics covering queue throughput, job outcomes, heartbeats,
//! and backing-store resilience.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, HistogramVec,
    IntCounter, IntCounterVec,
};

lazy_static! {
    /// Jobs leased from the queue
    pub static ref JOBS_DEQUEUED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fhir_jobs_dequeued_total",
        "Total number of jobs leased from the queue",
        &["queue_type"]
    )
    .expect("Failed to register JOBS_DEQUEUED_TOTAL");

    /// Jobs that reached a terminal state, by outcome
    pub static ref JOBS_COMPLETED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fhir_jobs_completed_total",
        "Total number of jobs that reached a terminal state",
        &["queue_type", "status"]
    )
    .expect("Failed to register JOBS_COMPLETED_TOTAL");

    /// Job execution duration
    pub static ref JOB_EXECUTION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "fhir_jobs_execution_duration_seconds",
        "Job execution duration in seconds",
        &["queue_type"],
        vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 1800.0, 7200.0]
    )
    .expect("Failed to register JOB_EXECUTION_DURATION_SECONDS");

    /// Lease renewals, by outcome
    pub static ref JOB_HEARTBEATS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fhir_jobs_heartbeats_total",
        "Total number of lease renewal attempts",
        &["outcome"]
    )
    .expect("Failed to register JOB_HEARTBEATS_TOTAL");

    /// Transient backing-store failures that were retried
    pub static ref STORE_RETRIES_TOTAL: IntCounter = register_int_counter!(
        "fhir_jobs_store_retries_total",
        "Transient backing-store failures that were retried"
    )
    .expect("Failed to register STORE_RETRIES_TOTAL");

    /// Store calls that succeeded after at least one retry
    pub static ref STORE_RETRY_RECOVERIES_TOTAL: IntCounter = register_int_counter!(
        "fhir_jobs_store_retry_recoveries_total",
        "Store calls that succeeded after at least one retry"
    )
    .expect("Failed to register STORE_RETRY_RECOVERIES_TOTAL");

    /// Read-only store calls by connection target
    pub static ref STORE_READS_ROUTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fhir_jobs_store_reads_routed_total",
        "Read-only store calls by connection target",
        &["target"]
    )
    .expect("Failed to register STORE_READS_ROUTED_TOTAL");
}
