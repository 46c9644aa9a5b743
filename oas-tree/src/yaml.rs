//! Loading of YAML and JSON source into a node arena.
//!
//! JSON is a subset of YAML 1.2, so a single event-driven loader serves both
//! content types.

use std::collections::HashMap;
use std::fmt;

use yaml_rust2::parser::Event;
use yaml_rust2::parser::MarkedEventReceiver;
use yaml_rust2::parser::Parser;
use yaml_rust2::scanner::Marker;
use yaml_rust2::scanner::ScanError;

use crate::Node;
use crate::NodeArena;
use crate::NodeId;

/// An error loading source into the arena.
#[derive(Debug)]
pub struct LoadError {
    /// The loader's description of the failure.
    message: String,
    /// The one-based line the failure occurred on.
    line: u32,
    /// The one-based column the failure occurred on.
    column: u32,
}

impl LoadError {
    /// Creates a new load error.
    fn new(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }

    /// Gets the one-based line the failure occurred on.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Gets the one-based column the failure occurred on.
    pub fn column(&self) -> u32 {
        self.column
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{message} [{line}:{column}]",
            message = self.message,
            line = self.line,
            column = self.column
        )
    }
}

impl std::error::Error for LoadError {}

impl From<ScanError> for LoadError {
    fn from(e: ScanError) -> Self {
        let marker = *e.marker();
        Self::new(
            e.info().to_string(),
            marker.line() as u32,
            marker.col() as u32 + 1,
        )
    }
}

/// Builds arena nodes from parser events.
struct TreeBuilder<'a> {
    /// The arena nodes are allocated into.
    arena: &'a mut NodeArena,
    /// The stack of open container nodes.
    stack: Vec<NodeId>,
    /// Anchored nodes by anchor id.
    anchors: HashMap<usize, NodeId>,
    /// The document node of the first document in the stream.
    root: Option<NodeId>,
    /// Set once the first document has ended; later documents are ignored.
    done: bool,
    /// The first structural error observed, if any.
    error: Option<LoadError>,
}

impl TreeBuilder<'_> {
    /// Attaches a node to the container at the top of the stack.
    fn attach(&mut self, id: NodeId) {
        if let Some(parent) = self.stack.last() {
            self.arena.push_child(*parent, id);
        }
    }

    /// Records an anchored node.
    fn anchor(&mut self, anchor_id: usize, node: NodeId) {
        if anchor_id > 0 {
            self.anchors.insert(anchor_id, node);
        }
    }

    /// Applies an explicit tag to a node under construction.
    fn tagged(node: Node, tag: Option<yaml_rust2::parser::Tag>) -> Node {
        match tag {
            Some(tag) => node.with_tag(format!(
                "{handle}{suffix}",
                handle = tag.handle,
                suffix = tag.suffix
            )),
            None => node,
        }
    }
}

impl MarkedEventReceiver for TreeBuilder<'_> {
    fn on_event(&mut self, ev: Event, mark: Marker) {
        if self.done || self.error.is_some() {
            return;
        }

        let line = mark.line() as u32;
        let column = mark.col() as u32 + 1;

        match ev {
            Event::Nothing | Event::StreamStart | Event::StreamEnd => {}
            Event::DocumentStart => {
                let id = self.arena.alloc(Node::document(line, column));
                self.root = Some(id);
                self.stack.push(id);
            }
            Event::DocumentEnd => {
                self.stack.pop();
                self.done = true;
            }
            Event::Scalar(value, _, anchor_id, tag) => {
                let id = self
                    .arena
                    .alloc(Self::tagged(Node::scalar(value, line, column), tag));
                self.anchor(anchor_id, id);
                self.attach(id);
            }
            Event::SequenceStart(anchor_id, tag) => {
                let id = self
                    .arena
                    .alloc(Self::tagged(Node::sequence(line, column), tag));
                self.anchor(anchor_id, id);
                self.attach(id);
                self.stack.push(id);
            }
            Event::MappingStart(anchor_id, tag) => {
                let id = self
                    .arena
                    .alloc(Self::tagged(Node::mapping(line, column), tag));
                self.anchor(anchor_id, id);
                self.attach(id);
                self.stack.push(id);
            }
            Event::SequenceEnd | Event::MappingEnd => {
                self.stack.pop();
            }
            Event::Alias(anchor_id) => match self.anchors.get(&anchor_id) {
                Some(target) => {
                    let id = self.arena.alloc(Node::alias(*target, line, column));
                    self.attach(id);
                }
                None => {
                    self.error = Some(LoadError::new(
                        format!("alias references unknown anchor {anchor_id}"),
                        line,
                        column,
                    ));
                }
            },
        }
    }
}

/// Loads YAML or JSON source into the arena.
///
/// Multi-document streams contribute only their first document. Returns the
/// id of the document node.
pub fn load_source(arena: &mut NodeArena, source: &str) -> Result<NodeId, LoadError> {
    let mut builder = TreeBuilder {
        arena,
        stack: Vec::new(),
        anchors: HashMap::new(),
        root: None,
        done: false,
        error: None,
    };

    let mut parser = Parser::new_from_str(source);
    parser.load(&mut builder, false)?;

    if let Some(e) = builder.error {
        return Err(e);
    }

    builder
        .root
        .ok_or_else(|| LoadError::new("no document found in source", 1, 1))
}
