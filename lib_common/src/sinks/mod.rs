//! # Event Sinks
//!
//! Consumers that sit directly on the ingestion path, before fan-out:
//!
//! - **`analytics`**: forwards block-confirmed events to the time-series store.
//! - **`reset`**: drops the analytics database when upstream re-initializes.
//!
//! Both talk to their backing stores through small traits so that the
//! pipeline can run against real services or the in-memory store.

/// Filtering and forwarding to the analytics store.
pub mod analytics;
/// Reaction to the upstream `new_db_init` control event.
pub mod reset;

pub use analytics::{AnalyticsSink, AnalyticsStore, DigestOutcome};
pub use reset::{DatabaseAdmin, PurgeOutcome, ResetHandler, RESET_EVENT};
