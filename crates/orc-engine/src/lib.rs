//! Orc engine library entry.
//!
//! Wires the TCP transport, protocol adapter, subscription registry,
//! dispatcher and sequencer into one client. Consumed by the demo binary
//! (`main.rs`) and by integration tests.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod client;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod obs;
pub mod registry;
pub mod sequencer;
pub mod transport;

pub use client::OrcClient;
pub use codec::{BusinessCodec, TreeCodec};
