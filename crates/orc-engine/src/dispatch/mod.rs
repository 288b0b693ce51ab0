//! Inbound routing and outbound correlation.
//!
//! Re-exports the dispatcher so downstream consumers can depend on this
//! module directly.

pub mod dispatcher;

pub use dispatcher::{partition_key, Dispatcher, InboundOutcome};
