//! Envelope vocabulary: message-type tags, correlation ids, header wrappers.
//!
//! Every reply carries `message_type` (usually inside the `reply_to` header)
//! and `private` (the correlation id). Outbound requests use a
//! `message_info` header instead. Everything else is the payload fragment
//! handed to the business codec.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{OrcError, Result};

use super::document::{Document, NodeKind};

pub const FIELD_MESSAGE_TYPE: &str = "message_type";
pub const FIELD_PRIVATE: &str = "private";
/// Client -> server header wrapper.
pub const HEADER_MESSAGE_INFO: &str = "message_info";
/// Server -> client header wrapper.
pub const HEADER_REPLY_TO: &str = "reply_to";

const HEADERS: [&str; 2] = [HEADER_REPLY_TO, HEADER_MESSAGE_INFO];

/// Closed set of routable message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    InstrumentFeed,
    PriceFeed,
    TheoreticalCalculationGroup,
    TradeFeed,
    OrderInsert,
}

impl MessageType {
    pub const ALL: [MessageType; 5] = [
        MessageType::InstrumentFeed,
        MessageType::PriceFeed,
        MessageType::TheoreticalCalculationGroup,
        MessageType::TradeFeed,
        MessageType::OrderInsert,
    ];

    /// Wire tag.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::InstrumentFeed => "INSTRUMENT_FEED",
            MessageType::PriceFeed => "PRICE_FEED",
            MessageType::TheoreticalCalculationGroup => "THEORETICAL_CALCULATION_GROUP",
            MessageType::TradeFeed => "TRADE_FEED",
            MessageType::OrderInsert => "ORDER_INSERT",
        }
    }

    /// Case-insensitive tag lookup.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(tag))
    }

    /// Feeds are partitioned per underlying instrument.
    pub fn is_feed(self) -> bool {
        matches!(self, MessageType::InstrumentFeed | MessageType::PriceFeed)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Correlation id carried in the `private` field (128-bit GUID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl FromStr for CorrelationId {
    type Err = OrcError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| OrcError::Envelope(format!("invalid correlation id `{s}`: {e}")))
    }
}

/// Decoded envelope plus the remaining payload fragment.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub message_type: MessageType,
    pub correlation_id: CorrelationId,
    pub payload: Document,
}

impl Envelope {
    /// Split a decoded document into envelope fields and payload.
    pub fn split(mut doc: Document) -> Result<Self> {
        let tag = envelope_field(&doc, FIELD_MESSAGE_TYPE)
            .ok_or_else(|| OrcError::Envelope("missing message_type".into()))?;
        let message_type = MessageType::from_tag(tag)
            .ok_or_else(|| OrcError::Envelope(format!("unknown message_type `{tag}`")))?;

        let private = envelope_field(&doc, FIELD_PRIVATE)
            .ok_or_else(|| OrcError::Envelope("missing private".into()))?;
        let correlation_id: CorrelationId = private.parse()?;

        doc.children.retain(|n| {
            let header = n.is_container() && HEADERS.contains(&n.name.as_str());
            let private = n.name == FIELD_PRIVATE && !n.is_container();
            !(header || private)
        });

        Ok(Self {
            message_type,
            correlation_id,
            payload: doc,
        })
    }
}

/// Top-level leaf first, then inside a header wrapper.
fn envelope_field<'d>(doc: &'d Document, field: &str) -> Option<&'d str> {
    if let Some(v) = doc.child(field).and_then(|n| n.value()) {
        return Some(v);
    }
    HEADERS.iter().find_map(|h| {
        let header = doc.child(h)?;
        header.children().iter().find_map(|n| match &n.kind {
            NodeKind::Leaf(v) if n.name == field => Some(v.as_str()),
            _ => None,
        })
    })
}
