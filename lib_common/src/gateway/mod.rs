//! # Gateway Module
//!
//! The downstream side of the relay: a WebSocket server that pushes every
//! routed event to each connected web client.

pub mod fanout;

pub use fanout::{accepts_path, fanout_router, serve, FanoutPacket};
