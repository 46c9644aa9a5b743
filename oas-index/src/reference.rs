//! Reference descriptors and circular reference results.

use std::path::Path;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use indexmap::IndexMap;
use oas_tree::NodeId;
use oas_tree::compose;
use oas_tree::pointer_to_path;
use oas_tree::split_fragment;
use parking_lot::Mutex;
use url::Url;

use crate::ErrorKind;
use crate::IndexError;

/// The canonical absolute identity computed for a raw `$ref` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRef {
    /// The canonical `full_definition` identity key.
    pub full_definition: String,
    /// Whether the reference leaves its discovering document.
    pub is_remote: bool,
    /// The absolute location of the referenced document, for references
    /// that leave their discovering document.
    pub remote_location: Option<String>,
}

/// Determines if a location string is a URL rather than a file path.
pub(crate) fn is_url_location(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Computes the canonical `full_definition` for a raw `$ref` string.
///
/// `document_key` is the absolute key of the discovering document (a file
/// path or URL); `document_is_root` is true when that document is the root
/// of the rolodex. The result depends only on these inputs, never on
/// scheduling.
pub fn canonicalize_definition(
    raw: &str,
    document_key: &str,
    document_is_root: bool,
) -> Result<CanonicalRef, IndexError> {
    let (base, fragment) = split_fragment(raw);

    // A bare fragment stays within the discovering document.
    if base.is_empty() {
        let pointer = fragment.unwrap_or_default();
        let full_definition = if document_is_root {
            format!("#{pointer}")
        } else {
            format!("{document_key}#{pointer}")
        };
        return Ok(CanonicalRef {
            full_definition,
            is_remote: false,
            remote_location: None,
        });
    }

    if is_url_location(base) {
        return Ok(CanonicalRef {
            full_definition: raw.to_string(),
            is_remote: true,
            remote_location: Some(base.to_string()),
        });
    }

    // A file reference discovered inside a remote document resolves against
    // the fetched URL, not a filesystem directory.
    if is_url_location(document_key) {
        let (document_base, _) = split_fragment(document_key);
        let url = Url::parse(document_base)
            .and_then(|u| u.join(base))
            .map_err(|e| {
                IndexError::new(
                    ErrorKind::ReferenceMalformed,
                    format!("cannot resolve reference `{raw}` against `{document_key}`: {e}"),
                )
            })?;
        let location = url.to_string();
        let full_definition = match fragment {
            Some(p) => format!("{location}#{p}"),
            None => location.clone(),
        };
        return Ok(CanonicalRef {
            full_definition,
            is_remote: true,
            remote_location: Some(location),
        });
    }

    let dir = Path::new(document_key).parent().unwrap_or(Path::new("/"));
    let composed = compose(dir, base).map_err(|e| {
        IndexError::new(ErrorKind::ReferenceMalformed, e.to_string())
    })?;
    let location = composed.to_string_lossy().into_owned();
    let full_definition = match fragment {
        Some(p) => format!("{location}#{p}"),
        None => location.clone(),
    };

    Ok(CanonicalRef {
        full_definition,
        is_remote: true,
        remote_location: Some(location),
    })
}

/// Gets the human-readable name of a definition: the last pointer segment,
/// or the file stem when the definition carries no fragment.
pub(crate) fn definition_name(full_definition: &str) -> String {
    let (base, fragment) = split_fragment(full_definition);
    match fragment {
        Some(pointer) if !pointer.is_empty() => pointer
            .rsplit('/')
            .next()
            .unwrap_or(pointer)
            .to_string(),
        _ => Path::new(base)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| base.to_string()),
    }
}

/// A reference discovered in some document.
///
/// A reference is owned by exactly one [`crate::SpecIndex`] (the one whose
/// document defined it) and shared as `Arc<Reference>`. The identity core
/// is immutable; the traversal flags latch under the single resolver pass
/// that is permitted to mutate them.
#[derive(Debug)]
pub struct Reference {
    /// The raw `$ref` string as it appeared.
    definition: String,
    /// The canonical absolute identity of the reference.
    full_definition: String,
    /// The last pointer segment, for human-readable journey paths.
    name: String,
    /// A JSON-path-like expression locating the reference within its
    /// document.
    path: String,
    /// Whether the reference leaves its discovering document.
    is_remote: bool,
    /// The absolute location of the referenced document, when remote.
    remote_location: Option<String>,
    /// The `$ref` mapping node at the discovery site.
    ref_node: NodeId,
    /// The containing mapping key, when applicable.
    key_node: Option<NodeId>,
    /// The value node the reference points at, set at lookup.
    node: OnceLock<NodeId>,
    /// The `summary` sibling retained under sibling-ref transformation.
    summary: OnceLock<String>,
    /// The `description` sibling retained under sibling-ref
    /// transformation.
    description: OnceLock<String>,
    /// The lexical parent's `type` keyword value, if any.
    parent_schema_type: Mutex<Option<String>>,
    /// For each referenced sub-definition this reference requires, the
    /// property names that pull it in.
    required_refs: Mutex<IndexMap<String, Vec<String>>>,
    /// Set once the resolver has visited the reference.
    seen: AtomicBool,
    /// Set once the resolver has resolved the reference.
    resolved: AtomicBool,
    /// Set once the reference is known to participate in a cycle; never
    /// cleared.
    circular: AtomicBool,
}

impl Reference {
    /// Constructs a new reference.
    pub fn new(
        definition: impl Into<String>,
        canonical: CanonicalRef,
        ref_node: NodeId,
        key_node: Option<NodeId>,
        path: impl Into<String>,
    ) -> Self {
        let name = definition_name(&canonical.full_definition);
        Self {
            definition: definition.into(),
            full_definition: canonical.full_definition,
            name,
            path: path.into(),
            is_remote: canonical.is_remote,
            remote_location: canonical.remote_location,
            ref_node,
            key_node,
            node: OnceLock::new(),
            summary: OnceLock::new(),
            description: OnceLock::new(),
            parent_schema_type: Mutex::new(None),
            required_refs: Mutex::new(IndexMap::new()),
            seen: AtomicBool::new(false),
            resolved: AtomicBool::new(false),
            circular: AtomicBool::new(false),
        }
    }

    /// Constructs a synthetic reference for a named component definition.
    ///
    /// Component references carry their definition node directly; they are
    /// what the component catalogs and the resolver's schema sweep operate
    /// on.
    pub fn component(
        full_definition: impl Into<String>,
        node: NodeId,
        key_node: Option<NodeId>,
        path: impl Into<String>,
    ) -> Self {
        let full_definition = full_definition.into();
        let reference = Self::new(
            full_definition.clone(),
            CanonicalRef {
                full_definition,
                is_remote: false,
                remote_location: None,
            },
            node,
            key_node,
            path,
        );
        reference.set_node(node);
        reference
    }

    /// Gets the raw `$ref` string as it appeared.
    pub fn definition(&self) -> &str {
        &self.definition
    }

    /// Gets the canonical absolute identity of the reference.
    pub fn full_definition(&self) -> &str {
        &self.full_definition
    }

    /// Gets the last pointer segment of the definition.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the JSON-path-like location of the reference.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Determines if the reference leaves its discovering document.
    pub fn is_remote(&self) -> bool {
        self.is_remote
    }

    /// Gets the absolute location of the referenced document, when remote.
    pub fn remote_location(&self) -> Option<&str> {
        self.remote_location.as_deref()
    }

    /// Gets the `$ref` mapping node at the discovery site.
    pub fn ref_node(&self) -> NodeId {
        self.ref_node
    }

    /// Gets the containing mapping key node, when applicable.
    pub fn key_node(&self) -> Option<NodeId> {
        self.key_node
    }

    /// Gets the value node the reference points at.
    ///
    /// `None` until lookup succeeds.
    pub fn node(&self) -> Option<NodeId> {
        self.node.get().copied()
    }

    /// Sets the value node the reference points at.
    ///
    /// The first lookup wins; later calls are no-ops.
    pub fn set_node(&self, node: NodeId) {
        let _ = self.node.set(node);
    }

    /// Gets the `summary` sibling retained alongside the `$ref`.
    pub fn summary(&self) -> Option<&str> {
        self.summary.get().map(|s| s.as_str())
    }

    /// Gets the `description` sibling retained alongside the `$ref`.
    pub fn description(&self) -> Option<&str> {
        self.description.get().map(|s| s.as_str())
    }

    /// Retains the `summary` and `description` siblings of the `$ref`.
    pub(crate) fn retain_siblings(&self, summary: Option<String>, description: Option<String>) {
        if let Some(s) = summary {
            let _ = self.summary.set(s);
        }
        if let Some(d) = description {
            let _ = self.description.set(d);
        }
    }

    /// Gets the lexical parent's `type` keyword value, if any.
    pub fn parent_schema_type(&self) -> Option<String> {
        self.parent_schema_type.lock().clone()
    }

    /// Sets the lexical parent's `type` keyword value.
    pub fn set_parent_schema_type(&self, ty: impl Into<String>) {
        *self.parent_schema_type.lock() = Some(ty.into());
    }

    /// Gets the required sub-definitions of the reference and the property
    /// names that pull each one in.
    pub fn required_refs(&self) -> IndexMap<String, Vec<String>> {
        self.required_refs.lock().clone()
    }

    /// Records that `property` requires the sub-definition
    /// `full_definition`.
    pub(crate) fn add_required_ref(&self, full_definition: impl Into<String>, property: impl Into<String>) {
        self.required_refs
            .lock()
            .entry(full_definition.into())
            .or_default()
            .push(property.into());
    }

    /// Determines if the resolver has visited the reference.
    pub fn is_seen(&self) -> bool {
        self.seen.load(Ordering::Relaxed)
    }

    /// Marks the reference as visited.
    pub fn mark_seen(&self) {
        self.seen.store(true, Ordering::Relaxed);
    }

    /// Determines if the resolver has resolved the reference.
    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Relaxed)
    }

    /// Marks the reference as resolved.
    pub fn mark_resolved(&self) {
        self.resolved.store(true, Ordering::Relaxed);
    }

    /// Determines if the reference participates in a cycle.
    pub fn is_circular(&self) -> bool {
        self.circular.load(Ordering::Relaxed)
    }

    /// Marks the reference as circular.
    ///
    /// The flag latches; there is no way to clear it.
    pub fn mark_circular(&self) {
        self.circular.store(true, Ordering::Relaxed);
    }

    /// Gets the JSON-path-like rendering of the definition's pointer.
    pub fn definition_path(&self) -> String {
        let (_, fragment) = split_fragment(&self.full_definition);
        pointer_to_path(fragment.unwrap_or_default())
    }
}

/// The polymorphic keyword a cycle's closing edge sits under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolymorphicType {
    /// The cycle does not close under a polymorphic keyword.
    #[default]
    None,
    /// The closing edge sits under `anyOf`.
    AnyOf,
    /// The closing edge sits under `oneOf`.
    OneOf,
    /// The closing edge sits under `allOf`.
    AllOf,
}

impl PolymorphicType {
    /// Parses a mapping key into a polymorphic type.
    pub fn from_key(key: &str) -> Self {
        match key {
            "anyOf" => Self::AnyOf,
            "oneOf" => Self::OneOf,
            "allOf" => Self::AllOf,
            _ => Self::None,
        }
    }

    /// Gets the keyword form of the type, or the empty string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::AnyOf => "anyOf",
            Self::OneOf => "oneOf",
            Self::AllOf => "allOf",
        }
    }
}

/// A detected circular reference cycle.
#[derive(Debug, Clone)]
pub struct CircularReferenceResult {
    /// The ordered references traversed from the start to the loop point.
    journey: Vec<Arc<Reference>>,
    /// The reference the journey started from.
    start: Arc<Reference>,
    /// The index within the journey where the loop closes.
    loop_index: usize,
    /// The reference that closed the cycle.
    loop_point: Arc<Reference>,
    /// Whether every edge of the cycle is required.
    is_infinite_loop: bool,
    /// Whether the closing edge sits under a polymorphic keyword.
    is_polymorphic_result: bool,
    /// Whether the closing edge sits under an array's `items`.
    is_array_result: bool,
    /// The polymorphic keyword of the closing edge.
    polymorphic_type: PolymorphicType,
}

impl CircularReferenceResult {
    /// Constructs a new cycle result.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        journey: Vec<Arc<Reference>>,
        start: Arc<Reference>,
        loop_index: usize,
        loop_point: Arc<Reference>,
        is_infinite_loop: bool,
        is_polymorphic_result: bool,
        is_array_result: bool,
        polymorphic_type: PolymorphicType,
    ) -> Self {
        Self {
            journey,
            start,
            loop_index,
            loop_point,
            is_infinite_loop,
            is_polymorphic_result,
            is_array_result,
            polymorphic_type,
        }
    }

    /// Gets the ordered references traversed from the start to the loop
    /// point.
    pub fn journey(&self) -> &[Arc<Reference>] {
        &self.journey
    }

    /// Gets the reference the journey started from.
    pub fn start(&self) -> &Arc<Reference> {
        &self.start
    }

    /// Gets the index within the journey where the loop closes.
    pub fn loop_index(&self) -> usize {
        self.loop_index
    }

    /// Gets the reference that closed the cycle.
    pub fn loop_point(&self) -> &Arc<Reference> {
        &self.loop_point
    }

    /// Determines if every edge of the cycle is required.
    pub fn is_infinite_loop(&self) -> bool {
        self.is_infinite_loop
    }

    /// Determines if the closing edge sits under a polymorphic keyword.
    pub fn is_polymorphic_result(&self) -> bool {
        self.is_polymorphic_result
    }

    /// Determines if the closing edge sits under an array's `items`.
    pub fn is_array_result(&self) -> bool {
        self.is_array_result
    }

    /// Gets the polymorphic keyword of the closing edge.
    pub fn polymorphic_type(&self) -> PolymorphicType {
        self.polymorphic_type
    }

    /// Renders the journey as `A -> B -> A` by reference name.
    pub fn journey_path(&self) -> String {
        self.journey
            .iter()
            .map(|r| r.name())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn it_keeps_root_local_fragments_short() {
        let c = canonicalize_definition("#/components/schemas/Obj", "/specs/root.yaml", true)
            .expect("should canonicalize");
        assert_eq!(c.full_definition, "#/components/schemas/Obj");
        assert!(!c.is_remote);
    }

    #[test]
    fn it_qualifies_local_fragments_in_sibling_documents() {
        let c = canonicalize_definition("#/X", "/specs/common.yaml", false)
            .expect("should canonicalize");
        assert_eq!(c.full_definition, "/specs/common.yaml#/X");
        assert!(!c.is_remote);
    }

    #[test]
    fn it_canonicalizes_file_references_against_the_document_directory() {
        let c = canonicalize_definition("other.yaml#/p/q", "/specs/api/root.yaml", true)
            .expect("should canonicalize");
        assert_eq!(c.full_definition, "/specs/api/other.yaml#/p/q");
        assert_eq!(c.remote_location.as_deref(), Some("/specs/api/other.yaml"));
        assert!(c.is_remote);

        let c = canonicalize_definition("../shared/common.yaml", "/specs/api/root.yaml", true)
            .expect("should canonicalize");
        assert_eq!(c.full_definition, "/specs/shared/common.yaml");
    }

    #[test]
    fn it_passes_absolute_urls_through() {
        let c = canonicalize_definition(
            "https://example.com/api.yaml#/p",
            "/specs/root.yaml",
            true,
        )
        .expect("should canonicalize");
        assert_eq!(c.full_definition, "https://example.com/api.yaml#/p");
        assert_eq!(c.remote_location.as_deref(), Some("https://example.com/api.yaml"));
        assert!(c.is_remote);
    }

    #[test]
    fn it_resolves_file_references_inside_remote_documents_against_the_url() {
        let c = canonicalize_definition(
            "common.yaml#/X",
            "https://example.com/specs/api.yaml",
            false,
        )
        .expect("should canonicalize");
        assert_eq!(c.full_definition, "https://example.com/specs/common.yaml#/X");
        assert!(c.is_remote);
    }

    #[cfg(not(windows))]
    #[test]
    fn it_rejects_backslashes() {
        let e = canonicalize_definition("a\\b.yaml", "/specs/root.yaml", true)
            .expect_err("should fail");
        assert_eq!(e.kind(), crate::ErrorKind::ReferenceMalformed);
    }

    #[test]
    fn it_names_definitions_by_their_last_segment() {
        assert_eq!(definition_name("#/components/schemas/Obj"), "Obj");
        assert_eq!(definition_name("/specs/common.yaml#/X"), "X");
        assert_eq!(definition_name("/specs/common.yaml"), "common");
    }

    #[test]
    fn it_latches_the_circular_flag() {
        let mut arena = oas_tree::NodeArena::new();
        let node = arena.alloc(oas_tree::Node::mapping(1, 1));
        let reference = Reference::component("#/components/schemas/A", node, None, "$");
        assert!(!reference.is_circular());
        reference.mark_circular();
        assert!(reference.is_circular());
    }
}
