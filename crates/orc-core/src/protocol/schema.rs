//! Repeated-field schema and the sequence-suffix policy.
//!
//! A repeated element travels as `leg1`, `leg2`, ... on the wire. Which names
//! are repeated is either declared up front (typed mode) or inferred from
//! sibling adjacency (untyped mode).

use std::collections::{HashMap, HashSet};

/// Static map: container type name -> names of its repeated children.
#[derive(Debug, Clone, Default)]
pub struct RepeatedFieldSchema {
    by_type: HashMap<String, HashSet<String>>,
}

impl RepeatedFieldSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration of repeated child names under a type.
    pub fn with_type<I, S>(mut self, type_name: &str, repeated: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(type_name, repeated);
        self
    }

    pub fn insert<I, S>(&mut self, type_name: &str, repeated: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.by_type
            .entry(type_name.to_string())
            .or_default()
            .extend(repeated.into_iter().map(Into::into));
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// `None` when the type is unknown to the schema.
    pub fn repeated_of(&self, type_name: &str) -> Option<&HashSet<String>> {
        self.by_type.get(type_name)
    }
}

/// How the codec decides whether a container carries a sequence suffix.
#[derive(Debug, Clone, Copy, Default)]
pub enum SequencePolicy<'a> {
    /// Adjacent siblings sharing a base name form a sequence.
    #[default]
    Structural,
    /// Declared repeated fields; undeclared parent types fall back to
    /// the structural rule.
    Schema(&'a RepeatedFieldSchema),
}

impl<'a> SequencePolicy<'a> {
    /// Schema policy when the schema has entries, structural otherwise.
    pub fn from_schema(schema: &'a RepeatedFieldSchema) -> Self {
        if schema.is_empty() {
            SequencePolicy::Structural
        } else {
            SequencePolicy::Schema(schema)
        }
    }

    pub(crate) fn declared(&self, parent: &str) -> Option<&'a HashSet<String>> {
        match self {
            SequencePolicy::Structural => None,
            SequencePolicy::Schema(s) => s.repeated_of(parent),
        }
    }
}

/// Split `leg12` into (`leg`, Some(12)). Names without a digit suffix, or made
/// only of digits, return `None`.
pub fn split_sequence_suffix(name: &str) -> (&str, Option<u64>) {
    let base = name.trim_end_matches(|c: char| c.is_ascii_digit());
    if base.is_empty() || base.len() == name.len() {
        return (name, None);
    }
    match name[base.len()..].parse::<u64>() {
        Ok(n) => (base, Some(n)),
        Err(_) => (name, None),
    }
}
