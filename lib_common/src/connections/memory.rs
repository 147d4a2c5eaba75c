//! # In-Memory Analytics Store
//!
//! Models a single analytics database that is created lazily on the first
//! write (as Mongo does) and disappears when dropped. Implements both
//! [`AnalyticsStore`] and [`DatabaseAdmin`], so one instance can stand in for
//! the Cube collector and its backing database at the same time.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::RelayError;
use crate::sinks::analytics::AnalyticsStore;
use crate::sinks::reset::DatabaseAdmin;

#[derive(Default)]
struct Inner {
    exists: bool,
    writes: Vec<(String, Map<String, Value>)>,
}

pub struct MemoryAnalytics {
    database: String,
    inner: Mutex<Inner>,
    failing: AtomicBool,
    drops: AtomicU64,
}

impl MemoryAnalytics {
    /// A store whose single database is called `database` and does not
    /// exist yet.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            inner: Mutex::new(Inner::default()),
            failing: AtomicBool::new(false),
            drops: AtomicU64::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every subsequent operation fail, to simulate an outage.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Everything written since the database was last (re)created.
    pub fn writes(&self) -> Vec<(String, Map<String, Value>)> {
        self.state().writes.clone()
    }

    /// How many times the database has been dropped.
    pub fn drop_count(&self) -> u64 {
        self.drops.load(Ordering::SeqCst)
    }

    fn is_failing(&self) -> bool {
        self.failing.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalyticsStore for MemoryAnalytics {
    async fn put(&self, event_type: &str, data: Map<String, Value>) -> Result<(), RelayError> {
        if self.is_failing() {
            return Err(RelayError::Analytics(format!(
                "in-memory store unavailable, dropped '{}' event",
                event_type
            )));
        }
        let mut state = self.state();
        state.exists = true;
        state.writes.push((event_type.to_string(), data));
        Ok(())
    }
}

#[async_trait]
impl DatabaseAdmin for MemoryAnalytics {
    async fn database_exists(&self, name: &str) -> Result<bool, RelayError> {
        if self.is_failing() {
            return Err(RelayError::Admin("in-memory store unavailable".into()));
        }
        Ok(name == self.database && self.state().exists)
    }

    async fn drop_database(&self, name: &str) -> Result<(), RelayError> {
        if self.is_failing() {
            return Err(RelayError::Admin("in-memory store unavailable".into()));
        }
        if name == self.database {
            let mut state = self.state();
            state.exists = false;
            state.writes.clear();
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
