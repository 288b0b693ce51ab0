//! OP protocol modules.
//!
//! - `document`: the generic ordered tree every message decodes into.
//! - `grammar`: stateless encode/decode between wire text and documents.
//! - `schema`: repeated-field metadata driving sequence suffixes.
//! - `envelope`: message-type vocabulary and correlation ids.
//!
//! All parsers are panic-free: malformed input is reported as
//! `OrcError::Grammar` with the byte offset where parsing stopped.

pub mod document;
pub mod envelope;
pub mod grammar;
pub mod schema;

pub use document::{Document, Node, NodeKind};
pub use envelope::{CorrelationId, Envelope, MessageType};
pub use grammar::{decode, decode_with, encode, encode_with};
pub use schema::{RepeatedFieldSchema, SequencePolicy};
