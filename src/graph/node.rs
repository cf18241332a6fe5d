use std::fmt;

use petgraph::stable_graph::NodeIndex;

/// The kind of code entity a node represents.
///
/// Variant order is the order kinds appear in; it is not used for node ordering
/// (nodes are ordered by canonical path).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub enum NodeKind {
    /// A source file. Root of every containment tree.
    File,
    /// The module object of a file (`<file>/module`).
    Module,
    /// A free function, or a function nested inside another callable.
    Function,
    /// A class declaration.
    Class,
    /// `__init__` / `__new__` of a class.
    Constructor,
    /// Any other function defined directly in a class body.
    Method,
    /// An instance or class attribute owned by a class.
    Field,
}

impl NodeKind {
    /// Name used on the DSM wire format.
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::File => "File",
            NodeKind::Module => "Module",
            NodeKind::Function => "Function",
            NodeKind::Class => "Class",
            NodeKind::Constructor => "Constructor",
            NodeKind::Method => "Method",
            NodeKind::Field => "Field",
        }
    }

    /// Methods and constructors: the only legal sources of Create/Call/Use edges.
    pub fn is_member_callable(self) -> bool {
        matches!(self, NodeKind::Method | NodeKind::Constructor)
    }

    /// Files and modules do not contribute a path segment to their children.
    pub fn is_transparent_container(self) -> bool {
        matches!(self, NodeKind::File | NodeKind::Module)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 1-based inclusive line span of an entity's definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSpan {
    pub start: u32,
    pub end: u32,
}

impl LineSpan {
    /// True when `line` is the first or last line of the definition.
    pub fn is_boundary(&self, line: u32) -> bool {
        line == self.start || line == self.end
    }
}

/// A canonicalized code entity.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    /// Leaf name (last segment of the qualified name).
    pub name: String,
    /// Canonical hierarchical path. Primary key for every stage after canonicalization.
    pub path: String,
    /// Normalized path of the owning source file.
    pub file: String,
    /// Containing node. `None` only for `File` nodes.
    pub parent: Option<NodeIndex>,
    pub span: Option<LineSpan>,
    /// Identifier assigned by the extractor, kept for diagnostics.
    pub raw_id: String,
}
