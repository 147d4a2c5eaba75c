//! # Reset Handler
//!
//! When the upstream producer rebuilds its own database it announces it with a
//! `new_db_init` event. Everything the analytics store derived from the old
//! chain state is stale at that point, so the whole analytics database is
//! dropped. The feed awaits [`ResetHandler::purge`] before forwarding the
//! event, which means any consumer reacting to `new_db_init` already sees the
//! purged store.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RelayError;

/// The control event that triggers a purge.
pub const RESET_EVENT: &str = "new_db_init";

/// Administrative side of the store backing the analytics database.
#[async_trait]
pub trait DatabaseAdmin: Send + Sync {
    async fn database_exists(&self, name: &str) -> Result<bool, RelayError>;
    async fn drop_database(&self, name: &str) -> Result<(), RelayError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeOutcome {
    Dropped,
    NothingToDo,
}

/// Drops the configured analytics database on demand.
#[derive(Clone)]
pub struct ResetHandler {
    admin: Arc<dyn DatabaseAdmin>,
    database: String,
}

impl ResetHandler {
    pub fn new(admin: Arc<dyn DatabaseAdmin>, database: impl Into<String>) -> Self {
        Self {
            admin,
            database: database.into(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Drops the analytics database if it exists. Safe to call repeatedly.
    pub async fn purge(&self) -> Result<PurgeOutcome, RelayError> {
        if !self.admin.database_exists(&self.database).await? {
            log::warn!("No analytics database with name '{}' exists", self.database);
            return Ok(PurgeOutcome::NothingToDo);
        }

        self.admin.drop_database(&self.database).await?;
        log::warn!("Analytics database '{}' dropped", self.database);
        Ok(PurgeOutcome::Dropped)
    }
}
