//! # Connections Module
//!
//! This module handles connections to the external stores the relay feeds:
//! the Cube event collector (HTTP) and the MongoDB server backing it. An
//! in-memory store implementing the same traits is always available.

/// Cube collector client (`POST /1.0/event/put`) with retry middleware.
#[cfg(feature = "connections")]
pub mod cube_http;

/// MongoDB administrative access for the reset handler.
#[cfg(feature = "connections")]
pub mod db_mongo;

/// In-process analytics store, used by tests and dry runs.
pub mod memory;

#[cfg(feature = "connections")]
pub use cube_http::CubeCollector;
#[cfg(feature = "connections")]
pub use db_mongo::{MongoAdmin, MongoCredentials};
pub use memory::MemoryAnalytics;
