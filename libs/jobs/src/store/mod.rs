//! Resilient backing-store access
//!
//! Every call the queue and the job implementations make against the
//! backing store goes through this layer: transient-fault classification,
//! a bounded retry loop, and deterministic read-replica traffic routing.

mod catalog;
mod error;
mod provider;
mod replica;
mod retry;

pub use catalog::{TransientErrorCatalog, TransientPredicate};
pub use error::StoreError;
pub use provider::PgStoreProvider;
pub use replica::{ConnectionTarget, ReplicaRouter};
pub use retry::{RetryOptions, RetryService};
