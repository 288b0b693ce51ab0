//! Business-object codec seam.
//!
//! The engine only knows trees. A `BusinessCodec` turns the payload fragment
//! of a routed message into the subscriber's object type and tells the
//! grammar which containers repeat.

use orc_core::error::Result;
use orc_core::protocol::{Document, MessageType, RepeatedFieldSchema};

pub trait BusinessCodec: Send + Sync + 'static {
    type Object: Send + 'static;

    fn decode(&self, kind: MessageType, fragment: &Document) -> Result<Self::Object>;

    /// Repeated containers per parent type. Empty means structural numbering.
    fn schema(&self) -> &RepeatedFieldSchema;
}

/// Untyped codec: the payload is the raw fragment.
#[derive(Debug, Clone, Default)]
pub struct TreeCodec {
    schema: RepeatedFieldSchema,
}

impl TreeCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(schema: RepeatedFieldSchema) -> Self {
        Self { schema }
    }
}

impl BusinessCodec for TreeCodec {
    type Object = Document;

    fn decode(&self, _kind: MessageType, fragment: &Document) -> Result<Document> {
        Ok(fragment.clone())
    }

    fn schema(&self) -> &RepeatedFieldSchema {
        &self.schema
    }
}
