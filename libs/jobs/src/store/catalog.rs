//! Transient-fault classification for backing-store calls

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::RetryConfig;

use super::StoreError;

/// SQLSTATE codes treated as transient out of the box: lock timeouts,
/// deadlock victims, resource throttling, and transient connectivity.
const DEFAULT_TRANSIENT_CODES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
    "53300", // too_many_connections
    "53400", // configuration_limit_exceeded
    "57P03", // cannot_connect_now
    "08000", // connection_exception
    "08001", // sqlclient_unable_to_establish_sqlconnection
    "08003", // connection_does_not_exist
    "08004", // sqlserver_rejected_establishment_of_sqlconnection
    "08006", // connection_failure
];

pub type TransientPredicate = Arc<dyn Fn(&StoreError) -> bool + Send + Sync>;

/// Decides whether a backing-store error is worth retrying.
///
/// An error is transient iff its code is in the catalog, OR it matches the
/// built-in connection-failure predicate (unless disabled), OR the injected
/// custom predicate accepts it.
#[derive(Clone)]
pub struct TransientErrorCatalog {
    codes: HashSet<String>,
    use_connection_predicate: bool,
    custom_predicate: Option<TransientPredicate>,
}

impl Default for TransientErrorCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl TransientErrorCatalog {
    pub fn new() -> Self {
        Self {
            codes: DEFAULT_TRANSIENT_CODES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            use_connection_predicate: true,
            custom_predicate: None,
        }
    }

    /// Build the catalog from deployment configuration: codes added and
    /// removed, and the connection-predicate toggle.
    pub fn from_retry_config(config: &RetryConfig) -> Self {
        let mut catalog = Self::new();
        for code in &config.transient_error_codes_add {
            catalog.codes.insert(code.clone());
        }
        for code in &config.transient_error_codes_remove {
            catalog.codes.remove(code);
        }
        catalog.use_connection_predicate = !config.disable_connection_predicate;
        catalog
    }

    pub fn add_code(&mut self, code: impl Into<String>) {
        self.codes.insert(code.into());
    }

    pub fn remove_code(&mut self, code: &str) {
        self.codes.remove(code);
    }

    pub fn without_connection_predicate(mut self) -> Self {
        self.use_connection_predicate = false;
        self
    }

    pub fn with_custom_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&StoreError) -> bool + Send + Sync + 'static,
    {
        self.custom_predicate = Some(Arc::new(predicate));
        self
    }

    pub fn is_transient(&self, error: &StoreError) -> bool {
        if let Some(code) = error.code() {
            if self.codes.contains(code.as_str()) {
                return true;
            }
        }
        if self.use_connection_predicate && error.is_connection_error() {
            return true;
        }
        if let Some(predicate) = &self.custom_predicate {
            if predicate(error) {
                return true;
            }
        }
        false
    }
}
