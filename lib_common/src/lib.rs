//! # lib_common
//!
//! Shared building blocks for the walletd event relay. The always-on part of
//! the crate (`core`, `sinks`, the `ingestors` feed loop) has no transport
//! dependencies; the concrete adapters sit behind cargo features so that test
//! crates and tools only pull in what they use.
//!
//! ## Feature Map:
//! - **`configs`**: layered configuration for the relay binary.
//! - **`connections`**: Cube collector and MongoDB admin adapters.
//! - **`gateway`**: the WebSocket fan-out server.
//! - **`ingestors`**: the ZeroMQ upstream connector.
//! - **`loggers`**: console + file logging.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod core;
pub mod error;
pub mod ingestors;
pub mod sinks;

#[cfg(feature = "configs")]
pub mod configs;
pub mod connections;
#[cfg(feature = "gateway")]
pub mod gateway;
#[cfg(feature = "loggers")]
pub mod loggers;

// Re-export the types every consumer touches.
pub use crate::core::event::{normalize, parse_frame, EventRecord, RawMessage};
pub use crate::core::router::{EventRouter, Subscription};
pub use crate::core::stats::{RelayStats, StatsSnapshot};
pub use crate::error::RelayError;
