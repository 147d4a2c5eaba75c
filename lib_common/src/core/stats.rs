//! # Relay Statistics
//!
//! Lock-free counters shared by the feed loop and the binary's monitor task.
//! Every counter is an `AtomicU64` updated with relaxed ordering; readers get
//! a point-in-time [`StatsSnapshot`] that is cheap to log or serialize.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters describing the relay's activity since startup.
#[derive(Debug, Default)]
pub struct RelayStats {
    received: AtomicU64,
    malformed: AtomicU64,
    published: AtomicU64,
    deliveries: AtomicU64,
    analytics_written: AtomicU64,
    analytics_skipped: AtomicU64,
    analytics_failed: AtomicU64,
    purges: AtomicU64,
    reconnects: AtomicU64,
}

/// A copy of [`RelayStats`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub received: u64,
    pub malformed: u64,
    pub published: u64,
    pub deliveries: u64,
    pub analytics_written: u64,
    pub analytics_skipped: u64,
    pub analytics_failed: u64,
    pub purges: u64,
    pub reconnects: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// One record published, reaching `deliveries` subscribers.
    pub fn record_published(&self, deliveries: usize) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.deliveries.fetch_add(deliveries as u64, Ordering::Relaxed);
    }

    pub fn record_analytics_written(&self) {
        self.analytics_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_analytics_skipped(&self) {
        self.analytics_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_analytics_failed(&self) {
        self.analytics_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_purge(&self) {
        self.purges.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            analytics_written: self.analytics_written.load(Ordering::Relaxed),
            analytics_skipped: self.analytics_skipped.load(Ordering::Relaxed),
            analytics_failed: self.analytics_failed.load(Ordering::Relaxed),
            purges: self.purges.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}
