//! Connection pools for the primary store and its optional read replica

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;
use crate::{Error, Result};

use super::ConnectionTarget;

/// Primary and optional replica pools. Without a replica every target
/// resolves to the primary.
#[derive(Debug, Clone)]
pub struct PgStoreProvider {
    primary: PgPool,
    replica: Option<PgPool>,
}

impl PgStoreProvider {
    pub fn new(primary: PgPool, replica: Option<PgPool>) -> Self {
        Self { primary, replica }
    }

    /// Build pools from configuration. Connections are established lazily
    /// so each retry attempt acquires its own.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let primary = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_lazy(&config.url)
            .map_err(|e| Error::Store(e.into()))?;
        let replica = match &config.replica_url {
            Some(url) => Some(
                PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .connect_lazy(url)
                    .map_err(|e| Error::Store(e.into()))?,
            ),
            None => None,
        };
        Ok(Self { primary, replica })
    }

    pub fn pool(&self, target: ConnectionTarget) -> &PgPool {
        match (target, &self.replica) {
            (ConnectionTarget::Replica, Some(replica)) => replica,
            _ => &self.primary,
        }
    }
}
