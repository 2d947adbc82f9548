//! Job queue abstraction for background processing
//!
//! A trait-based store contract with in-memory and PostgreSQL
//! implementations. The contract is storage-agnostic; anything providing
//! its atomicity guarantees is a valid substrate.

mod memory;
mod models;
mod postgres;
mod traits;

pub use memory::InMemoryJobQueue;
pub use models::*;
pub use postgres::PostgresJobQueue;
pub use traits::{CompleteOutcome, HeartbeatOutcome, JobQueue, MAX_DEQUEUE_COUNT};
