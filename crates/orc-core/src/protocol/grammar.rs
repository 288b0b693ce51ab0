//! OP grammar codec (recursive descent, panic-free).
//!
//! ```text
//! document := '{' body
//! body     := '}' | entry ('|' entry)* '}'
//! entry    := name '=' ( value | '{' body )
//! name     := letter (letter | digit | '_')*
//! value    := chars up to the next unescaped '|' or '}', padding trimmed
//! ```
//!
//! Parsing rules:
//! - The expected token class (name, assign, value, separator) follows from the
//!   grammar position only; there is no backtracking.
//! - A backslash makes the next character literal. Encode escapes `\`, `|`,
//!   `{`, `}` and any leading/trailing padding so every value round-trips.
//! - Sequence suffixes are applied/stripped in a separate top-down pass so the
//!   schema is always consulted with logical (unsuffixed) parent names.

use std::collections::{HashMap, HashSet};

use crate::error::{OrcError, Result};

use super::document::{Document, Node, NodeKind};
use super::schema::{split_sequence_suffix, SequencePolicy};

/// Maximum container nesting accepted by decode and produced by encode.
pub const MAX_DEPTH: usize = 64;

fn is_pad(c: char) -> bool {
    matches!(c, ' ' | '\r' | '\n' | '\t' | '\0')
}

/// Decode wire text with the structural sequence rule.
pub fn decode(wire: &str) -> Result<Document> {
    decode_with(wire, SequencePolicy::Structural)
}

/// Decode wire text, resolving sequence suffixes with `policy`.
pub fn decode_with(wire: &str, policy: SequencePolicy<'_>) -> Result<Document> {
    let mut sc = Scanner { src: wire, pos: 0 };
    sc.skip_pad();
    sc.expect(b'{', "document must start with '{'")?;
    let mut children = sc.body(1)?;
    sc.skip_pad();
    if sc.pos < wire.len() {
        return Err(OrcError::grammar(sc.pos, "trailing data after document"));
    }
    strip_sequence_suffixes("", &mut children, policy);
    Ok(Document::new(children))
}

/// Encode a document with the structural sequence rule.
pub fn encode(doc: &Document) -> Result<String> {
    encode_with(doc, SequencePolicy::Structural)
}

/// Encode a document, numbering repeated containers according to `policy`.
pub fn encode_with(doc: &Document, policy: SequencePolicy<'_>) -> Result<String> {
    let mut out = String::with_capacity(128);
    out.push('{');
    encode_children(&doc.name, &doc.children, policy, &mut out, 1)?;
    out.push('}');
    Ok(out)
}

/// Counts of unescaped braces in raw wire text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BraceCount {
    pub open: usize,
    pub close: usize,
}

impl BraceCount {
    pub fn is_balanced(&self) -> bool {
        self.open == self.close
    }
}

pub fn count_braces(wire: &str) -> BraceCount {
    let mut count = BraceCount { open: 0, close: 0 };
    let mut escaped = false;
    for b in wire.bytes() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' => escaped = true,
            b'{' => count.open += 1,
            b'}' => count.close += 1,
            _ => {}
        }
    }
    count
}

struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn skip_pad(&mut self) {
        while let Some(c) = self.peek() {
            if !is_pad(c as char) {
                break;
            }
            self.pos += 1;
        }
    }

    fn expect(&mut self, want: u8, reason: &'static str) -> Result<()> {
        match self.peek() {
            Some(c) if c == want => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(OrcError::grammar(self.pos, reason)),
        }
    }

    /// Parses up to and including the closing '}' (the opening '{' is consumed).
    fn body(&mut self, depth: usize) -> Result<Vec<Node>> {
        if depth > MAX_DEPTH {
            return Err(OrcError::grammar(self.pos, "nesting too deep"));
        }

        let mut children = Vec::new();
        self.skip_pad();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(children);
        }

        loop {
            children.push(self.entry(depth)?);
            self.skip_pad();
            match self.peek() {
                Some(b'|') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(children);
                }
                Some(_) => return Err(OrcError::grammar(self.pos, "expected '|' or '}'")),
                None => return Err(OrcError::grammar(self.pos, "unterminated container")),
            }
        }
    }

    fn entry(&mut self, depth: usize) -> Result<Node> {
        self.skip_pad();
        let name = self.name()?;
        self.skip_pad();
        self.expect(b'=', "expected '=' after name")?;
        self.skip_pad();

        if self.peek() == Some(b'{') {
            self.pos += 1;
            let children = self.body(depth + 1)?;
            return Ok(Node::container(name, children));
        }

        let value = self.value()?;
        Ok(Node::leaf(name, value))
    }

    fn name(&mut self) -> Result<String> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() => self.pos += 1,
            Some(_) => return Err(OrcError::grammar(start, "expected name")),
            None => return Err(OrcError::grammar(start, "unexpected end of input, expected name")),
        }
        while let Some(c) = self.peek() {
            if !(c.is_ascii_alphanumeric() || c == b'_') {
                break;
            }
            self.pos += 1;
        }
        Ok(self.src[start..self.pos].to_string())
    }

    /// Stops in front of the terminating separator.
    fn value(&mut self) -> Result<String> {
        let rest = &self.src[self.pos..];
        let mut out = String::new();
        // out.len() up to the last significant (non-pad or escaped) char
        let mut significant = 0usize;
        let mut chars = rest.char_indices();

        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, lit)) => {
                        out.push(lit);
                        significant = out.len();
                    }
                    None => return Err(OrcError::grammar(self.pos + i, "dangling escape")),
                },
                '|' | '}' => {
                    self.pos += i;
                    out.truncate(significant);
                    return Ok(out);
                }
                '{' => return Err(OrcError::grammar(self.pos + i, "unescaped '{' inside value")),
                c if is_pad(c) => {
                    if !out.is_empty() {
                        out.push(c);
                    }
                }
                c => {
                    out.push(c);
                    significant = out.len();
                }
            }
        }

        Err(OrcError::grammar(self.src.len(), "unterminated value"))
    }
}

/// Logical base for every wire name at one level that the decoder treats as
/// a sequence element; `None` where the wire name is kept as is.
fn sequence_bases<'n>(
    names: &[(&'n str, bool)],
    declared: Option<&HashSet<String>>,
) -> Vec<Option<&'n str>> {
    let bases: Vec<Option<&str>> = names
        .iter()
        .map(|&(name, is_container)| match split_sequence_suffix(name) {
            (base, Some(_)) if is_container => Some(base),
            _ => None,
        })
        .collect();

    (0..bases.len())
        .map(|i| {
            let base = bases[i]?;
            let strip = match declared {
                Some(set) => set.contains(base),
                None => {
                    let same = |j: usize| bases.get(j).copied().flatten() == Some(base);
                    (i > 0 && same(i - 1)) || same(i + 1)
                }
            };
            strip.then_some(base)
        })
        .collect()
}

/// Top-down: strip suffixes at this level, then recurse with logical names.
fn strip_sequence_suffixes(parent: &str, children: &mut [Node], policy: SequencePolicy<'_>) {
    let stripped: Vec<Option<String>> = {
        let names: Vec<(&str, bool)> = children
            .iter()
            .map(|n| (n.name.as_str(), n.is_container()))
            .collect();
        sequence_bases(&names, policy.declared(parent))
            .into_iter()
            .map(|b| b.map(str::to_string))
            .collect()
    };

    for (child, base) in children.iter_mut().zip(stripped) {
        if let Some(base) = base {
            tracing::trace!(wire = %child.name, base = %base, "stripped sequence suffix");
            child.name = base;
        }
    }

    for child in children.iter_mut() {
        let Node { name, kind } = child;
        if let NodeKind::Container(grand) = kind {
            strip_sequence_suffixes(name, grand, policy);
        }
    }
}

fn encode_children(
    parent: &str,
    children: &[Node],
    policy: SequencePolicy<'_>,
    out: &mut String,
    depth: usize,
) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(OrcError::grammar(out.len(), "nesting too deep"));
    }

    let declared = policy.declared(parent);
    let wire_names = sequence_names(children, declared, out.len())?;

    // names the decoder would rewrite must be exactly the ones we numbered
    let wire: Vec<(&str, bool)> = wire_names
        .iter()
        .zip(children)
        .map(|(w, n)| (w.as_str(), n.is_container()))
        .collect();
    let decoded = sequence_bases(&wire, declared);
    for ((node, w), base) in children.iter().zip(&wire_names).zip(decoded) {
        let logical = base.unwrap_or(w.as_str());
        if logical != node.name {
            return Err(OrcError::grammar(
                out.len(),
                format!("`{}` would decode as `{}`", node.name, logical),
            ));
        }
    }

    for (i, (node, name)) in children.iter().zip(&wire_names).enumerate() {
        if i > 0 {
            out.push('|');
        }
        out.push_str(name);
        out.push('=');
        match &node.kind {
            NodeKind::Leaf(v) => escape_into(v, out),
            NodeKind::Container(c) => {
                out.push('{');
                encode_children(&node.name, c, policy, out, depth + 1)?;
                out.push('}');
            }
        }
    }
    Ok(())
}

/// Wire names for one level: repeated containers get `1..n` per name.
fn sequence_names(
    children: &[Node],
    declared: Option<&HashSet<String>>,
    pos: usize,
) -> Result<Vec<String>> {
    let mut counters: HashMap<&str, u64> = HashMap::new();
    let mut names = Vec::with_capacity(children.len());

    for (i, node) in children.iter().enumerate() {
        validate_name(&node.name, pos)?;
        let repeated = match declared {
            Some(set) => node.is_container() && set.contains(&node.name),
            None => node.is_container() && has_same_named_neighbour(children, i),
        };
        if !repeated {
            names.push(node.name.clone());
            continue;
        }
        if node.name.ends_with(|c: char| c.is_ascii_digit()) {
            return Err(OrcError::grammar(
                pos,
                format!("repeated container `{}` must not end with a digit", node.name),
            ));
        }
        let n = counters.entry(node.name.as_str()).or_insert(0);
        *n += 1;
        names.push(format!("{}{}", node.name, n));
    }
    Ok(names)
}

fn has_same_named_neighbour(children: &[Node], i: usize) -> bool {
    let name = &children[i].name;
    let same = |j: usize| {
        children
            .get(j)
            .map_or(false, |n| n.is_container() && &n.name == name)
    };
    (i > 0 && same(i - 1)) || same(i + 1)
}

fn validate_name(name: &str, pos: usize) -> Result<()> {
    let mut bytes = name.bytes();
    let ok = match bytes.next() {
        Some(first) => {
            first.is_ascii_alphabetic() && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
        }
        None => false,
    };
    if ok {
        Ok(())
    } else {
        Err(OrcError::grammar(pos, format!("invalid name `{name}`")))
    }
}

fn escape_into(value: &str, out: &mut String) {
    let lead = value.len() - value.trim_start_matches(is_pad).len();
    let keep_end = value.trim_end_matches(is_pad).len();
    for (i, c) in value.char_indices() {
        let edge_pad = is_pad(c) && (i < lead || i >= keep_end);
        if edge_pad || matches!(c, '\\' | '|' | '{' | '}') {
            out.push('\\');
        }
        out.push(c);
    }
}
