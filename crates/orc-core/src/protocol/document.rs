//! Generic ordered tree decoded from / encoded to OP wire text.
//!
//! Every encode/decode call produces fresh owned values; nothing here is shared
//! between calls.

use serde::{Deserialize, Serialize};

/// Node payload: a terminal string value or an ordered list of children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Leaf(String),
    Container(Vec<Node>),
}

/// A named tree node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
}

impl Node {
    pub fn leaf(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Leaf(value.into()),
        }
    }

    pub fn container(name: impl Into<String>, children: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Container(children),
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self.kind, NodeKind::Container(_))
    }

    /// Leaf value, `None` for containers.
    pub fn value(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Leaf(v) => Some(v),
            NodeKind::Container(_) => None,
        }
    }

    /// Children, empty for leaves.
    pub fn children(&self) -> &[Node] {
        match &self.kind {
            NodeKind::Container(c) => c,
            NodeKind::Leaf(_) => &[],
        }
    }

    /// First direct child with the given name.
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children().iter().find(|n| n.name == name)
    }

    fn find_leaf(&self, name: &str) -> Option<&str> {
        for n in self.children() {
            match &n.kind {
                NodeKind::Leaf(v) if n.name == name => return Some(v),
                NodeKind::Leaf(_) => {}
                NodeKind::Container(_) => {
                    if let Some(v) = n.find_leaf(name) {
                        return Some(v);
                    }
                }
            }
        }
        None
    }
}

/// A decoded OP message. The root is always a container; its name never
/// appears on the wire and is empty after decode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub name: String,
    pub children: Vec<Node>,
}

impl Document {
    pub fn new(children: Vec<Node>) -> Self {
        Self {
            name: String::new(),
            children,
        }
    }

    /// Named root (the name is used as the schema type of the root level).
    pub fn named(name: impl Into<String>, children: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }

    pub fn push(&mut self, node: Node) -> &mut Self {
        self.children.push(node);
        self
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|n| n.name == name)
    }

    /// Resolve a `/`-separated path, e.g. `instrument_id/underlying`.
    pub fn lookup(&self, path: &str) -> Option<&Node> {
        let mut parts = path.split('/').filter(|p| !p.is_empty());
        let first = parts.next()?;
        let mut cur = self.child(first)?;
        for p in parts {
            cur = cur.child(p)?;
        }
        Some(cur)
    }

    /// Leaf value at a `/`-separated path.
    pub fn lookup_value(&self, path: &str) -> Option<&str> {
        self.lookup(path).and_then(Node::value)
    }

    /// Depth-first search for the first leaf with the given name.
    pub fn find_leaf(&self, name: &str) -> Option<&str> {
        for n in &self.children {
            match &n.kind {
                NodeKind::Leaf(v) if n.name == name => return Some(v),
                NodeKind::Leaf(_) => {}
                NodeKind::Container(_) => {
                    if let Some(v) = n.find_leaf(name) {
                        return Some(v);
                    }
                }
            }
        }
        None
    }

    /// Set a top-level leaf, replacing the first existing node of that name.
    pub fn set_leaf(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.children.iter_mut().find(|n| n.name == name) {
            Some(n) => n.kind = NodeKind::Leaf(value),
            None => self.children.push(Node::leaf(name, value)),
        }
    }
}
