//! The node arena backing parsed documents.

use std::fmt;

/// Identifies a node within a [`NodeArena`].
///
/// Ids are stable for the lifetime of the owning arena; resolution may
/// rewrite a node's child list, but never moves or removes a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// Creates a node id from a raw arena index.
    pub(crate) fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("arena exceeded u32 capacity"))
    }

    /// Gets the raw arena index of the id.
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// Offsets the id by the given base index.
    ///
    /// Used when absorbing one arena into another.
    fn offset(self, base: u32) -> Self {
        Self(self.0 + base)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{id}", id = self.0)
    }
}

/// Represents the kind of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// The root of a parsed document.
    ///
    /// A document node has at most one child: the document's content.
    Document,
    /// An ordered mapping.
    ///
    /// Children alternate key and value: `[k0, v0, k1, v1, ..]`; every key
    /// is a scalar.
    Mapping,
    /// An ordered sequence.
    Sequence,
    /// A scalar value.
    Scalar,
    /// An alias to an anchored node.
    ///
    /// An alias node has exactly one child: the anchored node it refers to.
    Alias,
}

/// Represents a single node in an arena.
#[derive(Debug, Clone)]
pub struct Node {
    /// The kind of the node.
    kind: NodeKind,
    /// The explicit tag of the node, if any.
    tag: Option<String>,
    /// The value of the node (scalars only).
    value: Option<String>,
    /// The ordered children of the node.
    children: Vec<NodeId>,
    /// The one-based source line the node starts on.
    line: u32,
    /// The one-based source column the node starts on.
    column: u32,
}

impl Node {
    /// Constructs a new node of the given kind.
    fn new(kind: NodeKind, line: u32, column: u32) -> Self {
        Self {
            kind,
            tag: None,
            value: None,
            children: Vec::new(),
            line,
            column,
        }
    }

    /// Constructs a new document node.
    pub fn document(line: u32, column: u32) -> Self {
        Self::new(NodeKind::Document, line, column)
    }

    /// Constructs a new mapping node.
    pub fn mapping(line: u32, column: u32) -> Self {
        Self::new(NodeKind::Mapping, line, column)
    }

    /// Constructs a new sequence node.
    pub fn sequence(line: u32, column: u32) -> Self {
        Self::new(NodeKind::Sequence, line, column)
    }

    /// Constructs a new scalar node with the given value.
    pub fn scalar(value: impl Into<String>, line: u32, column: u32) -> Self {
        let mut node = Self::new(NodeKind::Scalar, line, column);
        node.value = Some(value.into());
        node
    }

    /// Constructs a new alias node referring to the given anchored node.
    pub fn alias(target: NodeId, line: u32, column: u32) -> Self {
        let mut node = Self::new(NodeKind::Alias, line, column);
        node.children.push(target);
        node
    }

    /// Sets the explicit tag of the node.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Gets the kind of the node.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Gets the explicit tag of the node.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Gets the scalar value of the node.
    ///
    /// Returns `None` for non-scalar nodes.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Gets the ordered children of the node.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Gets the one-based line the node starts on.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Gets the one-based column the node starts on.
    pub fn column(&self) -> u32 {
        self.column
    }
}

/// A `$ref` site discovered in a mapping node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefSite {
    /// The scalar key node holding `$ref`.
    pub key: NodeId,
    /// The scalar value node holding the reference string.
    pub value: NodeId,
    /// The raw reference string.
    pub text: String,
}

/// An arena of nodes.
///
/// All documents opened by a rolodex share one arena so that resolution can
/// splice child lists across document boundaries while node identity stays
/// stable.
#[derive(Debug, Default)]
pub struct NodeArena {
    /// The nodes of the arena, addressed by [`NodeId`] index.
    nodes: Vec<Node>,
}

impl NodeArena {
    /// Constructs a new, empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Determines if the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Allocates a node and returns its id.
    pub fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Gets a node by id.
    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Appends a child to the given node.
    pub fn push_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent.index()].children.push(child);
    }

    /// Replaces the children of `target` with the child list of `source`.
    ///
    /// The child nodes themselves are shared: after the splice both parents
    /// address the same child ids. This is the only mutation of an existing
    /// node the arena permits.
    pub fn splice_children(&mut self, target: NodeId, source: NodeId) {
        let children = self.nodes[source.index()].children.clone();
        self.nodes[target.index()].children = children;
    }

    /// Moves every node of `other` into this arena.
    ///
    /// Child ids are remapped in the same pass. Returns the given id
    /// remapped into this arena, so a caller absorbing a freshly parsed
    /// document passes its root and receives the root's new id.
    ///
    /// Parsing into a scratch arena and absorbing it keeps the shared
    /// arena's write lock held only for the move, not the parse.
    pub fn absorb(&mut self, other: NodeArena, id: NodeId) -> NodeId {
        let base = u32::try_from(self.nodes.len()).expect("arena exceeded u32 capacity");
        self.nodes.reserve(other.nodes.len());
        for mut node in other.nodes {
            for child in &mut node.children {
                *child = child.offset(base);
            }
            self.nodes.push(node);
        }

        id.offset(base)
    }

    /// Gets the content node of a document.
    ///
    /// For a [`NodeKind::Document`] node this is its single child; any other
    /// node is returned unchanged. Alias nodes are followed to their anchor.
    pub fn content(&self, id: NodeId) -> NodeId {
        let node = self.get(id);
        match node.kind() {
            NodeKind::Document | NodeKind::Alias => match node.children().first() {
                Some(child) => self.content(*child),
                None => id,
            },
            _ => id,
        }
    }

    /// Gets the scalar value of a node, following aliases.
    pub fn scalar_value(&self, id: NodeId) -> Option<&str> {
        let id = self.content(id);
        self.get(id).value()
    }

    /// Searches the direct children of a mapping for the given key.
    ///
    /// Returns the key and value node ids on a match. Non-mapping nodes
    /// yield `None`.
    pub fn find_key_top(&self, id: NodeId, key: &str) -> Option<(NodeId, NodeId)> {
        let id = self.content(id);
        let node = self.get(id);
        if node.kind() != NodeKind::Mapping {
            return None;
        }

        for pair in node.children().chunks_exact(2) {
            if self.scalar_value(pair[0]) == Some(key) {
                return Some((pair[0], pair[1]));
            }
        }

        None
    }

    /// Gets the value node paired with the given key in a mapping.
    pub fn sibling_value(&self, id: NodeId, key: &str) -> Option<NodeId> {
        self.find_key_top(id, key).map(|(_, value)| value)
    }

    /// Determines whether the given node is a `$ref` mapping.
    ///
    /// Returns the site when the node is a mapping containing a `$ref` key
    /// whose paired value is a non-empty scalar string.
    pub fn is_ref(&self, id: NodeId) -> Option<RefSite> {
        let (key, value) = self.find_key_top(id, "$ref")?;
        let text = self.scalar_value(value)?;
        if text.is_empty() {
            return None;
        }

        Some(RefSite {
            key,
            value,
            text: text.to_string(),
        })
    }
}
