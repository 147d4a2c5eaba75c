//! # Analytics Sink
//!
//! Every event tied to a block is thrown into the time-series store as-is so
//! it can be sliced by time later. Two kinds of events are never stored:
//! balance updates (not tied to a block) and the reset signal itself.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::core::event::EventRecord;
use crate::error::RelayError;

/// Event types the sink ignores.
pub const UNTRACKED_EVENTS: [&str; 2] = ["balance", "new_db_init"];

/// Write side of the external time-series/event store.
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// Stores one event of type `event_type`.
    async fn put(&self, event_type: &str, data: Map<String, Value>) -> Result<(), RelayError>;
}

/// What [`AnalyticsSink::digest`] did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestOutcome {
    Written,
    Skipped,
}

/// Filters records and forwards the eligible ones to an [`AnalyticsStore`].
#[derive(Clone)]
pub struct AnalyticsSink {
    store: Arc<dyn AnalyticsStore>,
}

impl AnalyticsSink {
    pub fn new(store: Arc<dyn AnalyticsStore>) -> Self {
        Self { store }
    }

    /// Whether records of this type are ever stored.
    pub fn is_tracked(event_type: &str) -> bool {
        !UNTRACKED_EVENTS.contains(&event_type)
    }

    /// # Digest
    ///
    /// Skips untracked types. Any other record must carry a block time: a
    /// missing one is a contract breach by the producer and is reported as
    /// [`RelayError::MissingBlockTime`] without touching the store.
    ///
    /// The stored mapping is the record's wire form plus a `time` field
    /// holding the ISO block timestamp.
    pub async fn digest(&self, record: &EventRecord) -> Result<DigestOutcome, RelayError> {
        if !Self::is_tracked(&record.event_type) {
            return Ok(DigestOutcome::Skipped);
        }

        if record.block_time.is_none() {
            return Err(RelayError::MissingBlockTime {
                event_type: record.event_type.clone(),
            });
        }

        let mut data = record.to_mapping();
        data.insert("time".into(), Value::String(record.block_time_iso.clone()));

        self.store.put(&record.event_type, data).await?;
        Ok(DigestOutcome::Written)
    }
}
