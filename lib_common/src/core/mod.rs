//! # Core Engine Module
//!
//! The transport-agnostic heart of the relay. Everything in here is pure data
//! handling or in-process plumbing; no sockets, no databases.
//!
//! ## Core Components:
//!
//! - **`event`**: converts a raw upstream mapping into the canonical, immutable
//!   `EventRecord` shared by every consumer.
//!
//! - **`router`**: the in-process publish/subscribe hub. One producer, any
//!   number of subscribers, each with its own unbounded queue so that a slow
//!   consumer can never stall ingestion or reorder delivery to others.
//!
//! - **`stats`**: lock-free counters describing what the relay has done since
//!   startup.

/// Canonical event records and the normalizer.
pub mod event;
/// The publish/subscribe hub feeding all downstream consumers.
pub mod router;
/// Atomic relay counters.
pub mod stats;

// --- Public API Re-exports ---
pub use event::{normalize, parse_frame, EventRecord, RawMessage};
pub use router::{EventRouter, SubscriberId, Subscription};
pub use stats::{RelayStats, StatsSnapshot};
