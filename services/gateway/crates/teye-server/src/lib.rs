//! Terminal Eye gateway: runs catalog-declared commands for WebSocket
//! clients and streams their output back as status events.
//!
//! The binary in `main.rs` wires these modules together; they are exposed
//! as a library for integration testing.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod invocation;
pub mod page;
pub mod runner;
pub mod session;
pub mod state;
pub mod transport;
