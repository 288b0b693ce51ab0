//! Orc core: transport-agnostic OP protocol primitives and the shared error type.
//!
//! This crate defines the document tree, the OP grammar codec, the envelope
//! vocabulary and the error surface shared by the engine and any tooling. It
//! carries no transport or runtime dependencies so the codec can be reused for
//! loopback testing and offline inspection.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! Malformed wire text surfaces as `OrcError::Grammar`, never as a panic, so a
//! hostile or truncated frame cannot take down the receive path.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{ErrorCode, OrcError, Result};
