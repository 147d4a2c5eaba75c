//! # Data Ingestors Module
//!
//! Everything between the upstream event bus and the rest of the relay.
//!
//! ## Contained Modules:
//! - **`feed`**: the transport-agnostic ingestion loop (`UpstreamFeed`) and the
//!   `FeedConnector`/`FeedSession` seam it drives.
//! - **`backoff`**: bounded exponential reconnect delays.
//! - **`zmq_feed`**: the ZeroMQ SUB connector used in production
//!   (feature `ingestors`).

pub mod backoff;
pub mod feed;
#[cfg(feature = "ingestors")]
pub mod zmq_feed;

pub use backoff::ReconnectBackoff;
pub use feed::{FeedConnector, FeedSession, FeedSettings, FeedState, UpstreamFeed};
#[cfg(feature = "ingestors")]
pub use zmq_feed::ZmqConnector;
