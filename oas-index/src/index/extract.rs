//! Reference extraction: the traversal that discovers every `$ref` in a
//! document.

use std::sync::Arc;

use oas_tree::NodeArena;
use oas_tree::NodeId;
use oas_tree::NodeKind;
use oas_tree::encode_segment;
use rayon::prelude::*;
use tracing::trace;

use crate::CanonicalRef;
use crate::ErrorKind;
use crate::IndexError;
use crate::IndexStats;
use crate::Reference;
use crate::Rolodex;
use crate::SpecIndex;
use crate::canonicalize_definition;

/// A `$ref` sighting collected during the discovery walk, before lookup.
#[derive(Debug)]
pub(crate) struct RefCandidate {
    /// The raw `$ref` string.
    raw: String,
    /// The mapping node containing the `$ref` key.
    ref_node: NodeId,
    /// The `$ref` key scalar.
    key_node: NodeId,
    /// The JSON-path-like location of the sighting.
    path: String,
    /// The one-based line of the sighting.
    line: u32,
    /// The one-based column of the sighting.
    column: u32,
    /// The lexical parent's `type` keyword value, if any.
    parent_type: Option<String>,
    /// The `summary` sibling of the `$ref`, if any.
    summary: Option<String>,
    /// The `description` sibling of the `$ref`, if any.
    description: Option<String>,
}

/// An `x-*` extension sighting collected during the discovery walk.
#[derive(Debug)]
pub(crate) struct ExtensionSighting {
    /// The JSON-path-like location of the extension key.
    path: String,
    /// The JSON pointer of the extension value.
    pointer: String,
    /// The extension key scalar.
    key_node: NodeId,
    /// The extension value node.
    value_node: NodeId,
}

/// Appends a segment to a JSON-path-like expression.
pub(crate) fn append_path_segment(path: &str, segment: &str) -> String {
    if segment.bytes().all(|b| b.is_ascii_digit()) {
        format!("{path}[{segment}]")
    } else if segment
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'$')
    {
        format!("{path}.{segment}")
    } else {
        format!("{path}['{segment}']")
    }
}

impl SpecIndex {
    /// Extracts every reference in the document.
    ///
    /// Discovery walks the tree serially in document order; component
    /// lookups for the discovered candidates may run in parallel, writing
    /// into discovery-ordered slots that a serial pass flattens, so the
    /// observable result never depends on worker completion order.
    pub(crate) fn extract_references(&self, rolodex: &Rolodex) {
        let (candidates, extensions, stats) = self.discover();
        trace!(
            "discovered {count} reference candidates in `{path}`",
            count = candidates.len(),
            path = self.absolute_path()
        );
        self.set_stats(stats);

        let outcomes = self.lookup(rolodex, &candidates);
        self.flatten(candidates, outcomes);
        self.record_extensions(extensions);
    }

    /// Walks the tree once, collecting `$ref` candidates, extension
    /// sightings and counting statistics in document order.
    fn discover(&self) -> (Vec<RefCandidate>, Vec<ExtensionSighting>, IndexStats) {
        let arena = self.arena().read();
        let mut candidates = Vec::new();
        let mut extensions = Vec::new();
        let mut stats = IndexStats::default();
        let root = arena.content(self.root());
        self.walk(
            &arena,
            root,
            "",
            "$",
            None,
            false,
            &mut candidates,
            &mut extensions,
            &mut stats,
        );
        (candidates, extensions, stats)
    }

    /// Visits one node of the discovery walk.
    #[allow(clippy::too_many_arguments)]
    fn walk(
        &self,
        arena: &NodeArena,
        node: NodeId,
        pointer: &str,
        path: &str,
        parent_type: Option<&str>,
        under_extension: bool,
        candidates: &mut Vec<RefCandidate>,
        extensions: &mut Vec<ExtensionSighting>,
        stats: &mut IndexStats,
    ) {
        match arena.get(node).kind() {
            NodeKind::Mapping => {}
            NodeKind::Sequence => {
                let children: Vec<NodeId> = arena.get(node).children().to_vec();
                for (i, child) in children.into_iter().enumerate() {
                    if matches!(
                        arena.get(child).kind(),
                        NodeKind::Mapping | NodeKind::Sequence
                    ) {
                        self.walk(
                            arena,
                            child,
                            &format!("{pointer}/{i}"),
                            &format!("{path}[{i}]"),
                            parent_type,
                            under_extension,
                            candidates,
                            extensions,
                            stats,
                        );
                    }
                }
                return;
            }
            _ => return,
        }

        if let Some(site) = arena.is_ref(node) {
            stats.ref_sightings += 1;
            // References living under extension keys are skipped unless the
            // configuration opts in.
            if !under_extension || self.config().index_extension_refs {
                let key = arena.get(site.key);
                let (summary, description) = if self.config().transform_sibling_refs {
                    (
                        arena
                            .sibling_value(node, "summary")
                            .and_then(|v| arena.scalar_value(v).map(String::from)),
                        arena
                            .sibling_value(node, "description")
                            .and_then(|v| arena.scalar_value(v).map(String::from)),
                    )
                } else {
                    (None, None)
                };

                candidates.push(RefCandidate {
                    raw: site.text,
                    ref_node: node,
                    key_node: site.key,
                    path: path.to_string(),
                    line: key.line(),
                    column: key.column(),
                    parent_type: parent_type.map(String::from),
                    summary,
                    description,
                });
            }
            return;
        }

        let own_type = arena
            .sibling_value(node, "type")
            .and_then(|v| arena.scalar_value(v).map(String::from));

        let pairs: Vec<(NodeId, NodeId)> = arena
            .get(node)
            .children()
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1]))
            .collect();

        for (key, value) in pairs {
            let Some(key_text) = arena.scalar_value(key).map(String::from) else {
                continue;
            };

            let child_pointer = format!(
                "{pointer}/{segment}",
                segment = encode_segment(&key_text)
            );
            let child_path = append_path_segment(path, &key_text);
            let is_extension = key_text.starts_with("x-");

            match key_text.as_str() {
                "description" => stats.descriptions += 1,
                "summary" => stats.summaries += 1,
                _ => {}
            }

            if is_extension {
                stats.extensions += 1;
                extensions.push(ExtensionSighting {
                    path: child_path.clone(),
                    pointer: child_pointer.clone(),
                    key_node: key,
                    value_node: value,
                });
            }

            if matches!(
                arena.get(value).kind(),
                NodeKind::Mapping | NodeKind::Sequence
            ) {
                self.walk(
                    arena,
                    value,
                    &child_pointer,
                    &child_path,
                    own_type.as_deref(),
                    under_extension || is_extension,
                    candidates,
                    extensions,
                    stats,
                );
            }
        }
    }

    /// Resolves every candidate to its component node.
    ///
    /// Candidates run through the same lookup whether sequential or
    /// parallel; the output order always matches the input order.
    fn lookup(
        &self,
        rolodex: &Rolodex,
        candidates: &[RefCandidate],
    ) -> Vec<Result<(CanonicalRef, NodeId), IndexError>> {
        let op = |candidate: &RefCandidate| {
            let canonical = canonicalize_definition(
                &candidate.raw,
                self.absolute_path(),
                self.is_root(),
            )
            .map_err(|e| {
                e.with_path(candidate.path.clone())
                    .with_position(candidate.line, candidate.column)
            })?;

            let node = self
                .find_component(rolodex, &canonical.full_definition)
                .map_err(|e| {
                    // Policy refusals surface as themselves; everything else
                    // reads as a missing reference.
                    let error = match e.kind() {
                        ErrorKind::LookupForbidden => e,
                        _ => IndexError::new(
                            ErrorKind::ReferenceMissing,
                            format!(
                                "cannot resolve reference '{raw}', it's missing",
                                raw = candidate.raw
                            ),
                        ),
                    };
                    error
                        .with_path(candidate.path.clone())
                        .with_position(candidate.line, candidate.column)
                })?;

            Ok((canonical, node))
        };

        if self.config().extract_refs_sequentially {
            candidates.iter().map(op).collect()
        } else {
            candidates.par_iter().map(op).collect()
        }
    }

    /// Flattens lookup outcomes into the reference stores, serially and in
    /// discovery order.
    fn flatten(
        &self,
        candidates: Vec<RefCandidate>,
        outcomes: Vec<Result<(CanonicalRef, NodeId), IndexError>>,
    ) {
        let mut refs = self.refs.write();
        for (candidate, outcome) in candidates.into_iter().zip(outcomes) {
            match outcome {
                Err(e) => self.add_error(Arc::new(e)),
                Ok((canonical, node)) => {
                    let full_definition = canonical.full_definition.clone();
                    let reference = Arc::new(Reference::new(
                        candidate.raw,
                        canonical,
                        candidate.ref_node,
                        Some(candidate.key_node),
                        candidate.path,
                    ));
                    reference.set_node(node);
                    if let Some(ty) = candidate.parent_type {
                        reference.set_parent_schema_type(ty);
                    }
                    reference.retain_siblings(candidate.summary, candidate.description);

                    refs.all_refs.push(reference.clone());
                    // The first sighting of a definition owns it; later
                    // sightings appear in `all_refs` only.
                    refs.mapped.entry(full_definition).or_insert(reference);
                }
            }
        }
    }

    /// Records extension sightings into the extensions catalog.
    fn record_extensions(&self, extensions: Vec<ExtensionSighting>) {
        if extensions.is_empty() {
            return;
        }

        let mut components = self.components.write();
        for sighting in extensions {
            let definition = self.qualify(&format!("#{ptr}", ptr = sighting.pointer));
            components.extensions.insert(
                sighting.path.clone(),
                Arc::new(Reference::component(
                    definition,
                    sighting.value_node,
                    Some(sighting.key_node),
                    sighting.path,
                )),
            );
        }
    }
}
