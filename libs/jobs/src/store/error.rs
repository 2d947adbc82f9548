//! Backing-store error type and classification hooks

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Error surfaced by the sqlx driver.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A coded fault reported by a non-SQL store implementation (also used
    /// by tests to inject classified failures).
    #[error("store fault {code}: {message}")]
    Fault { code: String, message: String },
}

impl StoreError {
    pub fn fault(code: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Fault {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Vendor error code, when the underlying driver reports one
    /// (SQLSTATE for Postgres).
    pub fn code(&self) -> Option<String> {
        match self {
            StoreError::Database(sqlx::Error::Database(db)) => db.code().map(|c| c.into_owned()),
            StoreError::Fault { code, .. } => Some(code.clone()),
            StoreError::Database(_) => None,
        }
    }

    /// Connection-level failures: handshake, pool, and socket errors that
    /// never carry a vendor code.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            StoreError::Database(
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::Protocol(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            )
        )
    }
}
