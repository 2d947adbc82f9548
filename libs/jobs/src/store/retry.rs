//! Bounded retry execution for backing-store operations

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::config::RetryConfig;
use crate::metrics;

use super::{ConnectionTarget, ReplicaRouter, StoreError, TransientErrorCatalog};

#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_millis(250),
        }
    }
}

impl RetryOptions {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
        }
    }
}

/// Executes backing-store operations with transient-fault retry and
/// read-replica routing.
///
/// The operation closure is invoked once per attempt and must acquire a
/// fresh connection from the pool each time, so a connection-level failure
/// on one attempt cannot poison the next. On final failure the original
/// error propagates unchanged.
pub struct RetryService {
    catalog: TransientErrorCatalog,
    options: RetryOptions,
    router: ReplicaRouter,
}

impl RetryService {
    pub fn new(catalog: TransientErrorCatalog, options: RetryOptions, router: ReplicaRouter) -> Self {
        Self {
            catalog,
            options,
            router,
        }
    }

    pub fn catalog(&self) -> &TransientErrorCatalog {
        &self.catalog
    }

    /// Execute a mutating operation. Writes never route to a replica.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: Fn(ConnectionTarget) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.run(op, false).await
    }

    /// Execute a read-only operation; each attempt is routed by the
    /// configured replica traffic ratio.
    pub async fn execute_read<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: Fn(ConnectionTarget) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.run(op, true).await
    }

    async fn run<T, F, Fut>(&self, op: F, read_only: bool) -> Result<T, StoreError>
    where
        F: Fn(ConnectionTarget) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut retries = 0u32;
        loop {
            let target = if read_only {
                self.router.route()
            } else {
                ConnectionTarget::Primary
            };
            match op(target).await {
                Ok(value) => {
                    if retries > 0 {
                        // Best-effort diagnostic; the recording channel cannot fail.
                        metrics::STORE_RETRY_RECOVERIES_TOTAL.inc();
                        tracing::info!(retries, "store call succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if retries >= self.options.max_retries || !self.catalog.is_transient(&error) {
                        return Err(error);
                    }
                    retries += 1;
                    metrics::STORE_RETRIES_TOTAL.inc();
                    tracing::warn!(
                        %error,
                        retries,
                        max_retries = self.options.max_retries,
                        "transient store error, retrying"
                    );
                    sleep(self.options.retry_delay).await;
                }
            }
        }
    }
}
