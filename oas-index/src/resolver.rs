//! The resolver: reference graph traversal, cycle detection and
//! classification, and in-place tree splicing.

use std::collections::HashSet;
use std::sync::Arc;

use oas_tree::NodeArena;
use oas_tree::NodeId;
use oas_tree::NodeKind;
use oas_tree::split_fragment;
use tracing::debug;
use tracing::warn;

use crate::CircularReferenceResult;
use crate::ErrorKind;
use crate::IndexError;
use crate::PolymorphicType;
use crate::Reference;
use crate::Rolodex;
use crate::SpecIndex;
use crate::canonicalize_definition;

/// The maximum node-nesting depth relative extraction descends to.
///
/// A defensive bound against pathological inputs; nesting depth, not
/// journey length.
const MAX_EXTRACTION_DEPTH: u32 = 100;

/// The journey length beyond which relative extraction stops.
const MAX_JOURNEY_LENGTH: usize = 200;

/// The polymorphic mapping keys.
const POLYMORPHIC_KEYS: &[&str] = &["allOf", "oneOf", "anyOf"];

/// Traversal counters exported by a resolver.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResolverStats {
    /// References visited across all journeys.
    pub references_visited: u64,
    /// Indexes visited.
    pub indexes_visited: u64,
    /// Journeys taken (non-memoized visits).
    pub journeys_taken: u64,
    /// Relatives seen across all extractions.
    pub relatives_seen: u64,
}

/// Walks the reference graph of an index, detecting and classifying cycles
/// and optionally splicing resolved subtrees in place of `$ref` nodes.
///
/// One resolver pass runs at a time per index; the resolver is the only
/// component that mutates trees or reference flags.
#[derive(Debug, Default)]
pub struct Resolver {
    /// Cycles routed to the circular list.
    circular_references: Vec<Arc<CircularReferenceResult>>,
    /// Array cycles routed to the ignored list by configuration.
    ignored_array_references: Vec<Arc<CircularReferenceResult>>,
    /// Polymorphic cycles routed to the ignored list by configuration.
    ignored_poly_references: Vec<Arc<CircularReferenceResult>>,
    /// Errors recorded while resolving.
    resolving_errors: Vec<Arc<IndexError>>,
    /// Definitions already reported as missing, to avoid duplicates.
    reported_missing: HashSet<String>,
    /// Traversal counters.
    stats: ResolverStats,
}

impl Resolver {
    /// Constructs a new resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the traversal counters.
    pub fn stats(&self) -> ResolverStats {
        self.stats
    }

    /// Runs the full traversal with splicing enabled.
    ///
    /// Returns the resolving errors, including one error per infinite
    /// cycle discovered by this pass.
    pub fn resolve(&mut self, index: &SpecIndex, rolodex: &Rolodex) -> Vec<Arc<IndexError>> {
        self.run(index, rolodex, true);

        let mut errors = self.resolving_errors.clone();
        for cycle in &self.circular_references {
            if cycle.is_infinite_loop() {
                errors.push(Arc::new(infinite_cycle_error(cycle)));
            }
        }
        errors
    }

    /// Runs the full traversal without mutating the tree, producing the
    /// cycle catalogs only.
    pub fn check_for_circular_references(
        &mut self,
        index: &SpecIndex,
        rolodex: &Rolodex,
    ) -> Vec<Arc<IndexError>> {
        self.run(index, rolodex, false);
        self.resolving_errors.clone()
    }

    /// Gets every cycle routed to the circular list.
    pub fn get_circular_references(&self) -> &[Arc<CircularReferenceResult>] {
        &self.circular_references
    }

    /// Gets the circular cycles with at least one optional edge.
    pub fn get_safe_circular_references(&self) -> Vec<Arc<CircularReferenceResult>> {
        self.circular_references
            .iter()
            .filter(|c| !c.is_infinite_loop())
            .cloned()
            .collect()
    }

    /// Gets the circular cycles whose every edge is required.
    pub fn get_infinite_circular_references(&self) -> Vec<Arc<CircularReferenceResult>> {
        self.circular_references
            .iter()
            .filter(|c| c.is_infinite_loop())
            .cloned()
            .collect()
    }

    /// Gets the circular cycles closing under a polymorphic keyword.
    pub fn get_polymorphic_circular_errors(&self) -> Vec<Arc<CircularReferenceResult>> {
        self.circular_references
            .iter()
            .filter(|c| c.is_polymorphic_result())
            .cloned()
            .collect()
    }

    /// Gets the circular cycles not closing under a polymorphic keyword.
    pub fn get_non_polymorphic_circular_errors(&self) -> Vec<Arc<CircularReferenceResult>> {
        self.circular_references
            .iter()
            .filter(|c| !c.is_polymorphic_result())
            .cloned()
            .collect()
    }

    /// Gets the array cycles routed to the ignored list.
    pub fn get_ignored_circular_array_references(&self) -> &[Arc<CircularReferenceResult>] {
        &self.ignored_array_references
    }

    /// Gets the polymorphic cycles routed to the ignored list.
    pub fn get_ignored_circular_poly_references(&self) -> &[Arc<CircularReferenceResult>] {
        &self.ignored_poly_references
    }

    /// Gets the errors recorded while resolving.
    pub fn resolving_errors(&self) -> &[Arc<IndexError>] {
        &self.resolving_errors
    }

    /// Visits every mapped reference of the index, then every component
    /// schema discoverable only through the schema scan.
    fn run(&mut self, index: &SpecIndex, rolodex: &Rolodex, resolve: bool) {
        self.stats.indexes_visited += 1;

        let sequenced = index.get_mapped_references_sequenced();
        let mapped: HashSet<String> = sequenced
            .iter()
            .map(|r| r.full_definition().to_string())
            .collect();

        for reference in &sequenced {
            let mut seen = HashSet::new();
            self.visit(reference, &mut seen, &[], resolve, index, rolodex);
        }

        for schema in index.get_all_component_schemas() {
            if !mapped.contains(schema.full_definition()) {
                let mut seen = HashSet::new();
                self.visit(&schema, &mut seen, &[], resolve, index, rolodex);
            }
        }
    }

    /// Visits one reference: extracts its relatives, detects cycles among
    /// them, recurses into the rest and optionally splices.
    ///
    /// Returns the node the reference points at.
    fn visit(
        &mut self,
        reference: &Arc<Reference>,
        seen: &mut HashSet<String>,
        journey: &[Arc<Reference>],
        resolve: bool,
        index: &SpecIndex,
        rolodex: &Rolodex,
    ) -> Option<NodeId> {
        self.stats.references_visited += 1;

        // Memoized: a resolving pass keys off `resolved`, a checking pass
        // off `seen`, so a check followed by a resolve still splices.
        if (resolve && reference.is_resolved()) || (!resolve && reference.is_seen()) {
            return reference.node();
        }

        let Some(node) = reference.node() else {
            reference.mark_seen();
            return None;
        };

        let mut journey = journey.to_vec();
        journey.push(reference.clone());
        self.stats.journeys_taken += 1;

        let relatives = self.extract_relatives(
            reference, node, None, seen, &journey, resolve, 0, index, rolodex,
        );
        self.stats.relatives_seen += relatives.len() as u64;

        seen.clear();
        seen.insert(reference.full_definition().to_string());

        for relative in relatives {
            // A relative already on the journey closes a cycle.
            let loop_index = journey
                .iter()
                .position(|j| j.full_definition() == relative.full_definition());
            if let Some(loop_index) = loop_index {
                self.record_cycle(
                    &journey,
                    loop_index,
                    &relative,
                    PolymorphicType::None,
                    index,
                    rolodex,
                );
                continue;
            }

            if !seen.insert(relative.full_definition().to_string()) {
                continue;
            }

            let Some(found) =
                index.search_index_for_reference_by_reference(rolodex, &relative)
            else {
                self.record_missing(&relative);
                continue;
            };

            if !found.is_circular() {
                let target = self.visit(&found, seen, &journey, resolve, index, rolodex);
                if resolve && !found.is_circular() {
                    if let Some(target) = target {
                        let mut arena = index.arena().write();
                        arena.splice_children(relative.ref_node(), target);
                    }
                }
                relative.mark_seen();
            }
        }

        reference.mark_seen();
        if resolve {
            reference.mark_resolved();
        }
        reference.node()
    }

    /// Finds all references reachable strictly inside `node`, without
    /// crossing into already-resolved subtrees.
    ///
    /// `parent_type` carries the enclosing mapping's `type` keyword value
    /// into the recursion, so a `$ref` under an array's `items` classifies
    /// as an array edge.
    #[allow(clippy::too_many_arguments)]
    fn extract_relatives(
        &mut self,
        reference: &Arc<Reference>,
        node: NodeId,
        parent_type: Option<&str>,
        seen: &mut HashSet<String>,
        journey: &[Arc<Reference>],
        resolve: bool,
        depth: u32,
        index: &SpecIndex,
        rolodex: &Rolodex,
    ) -> Vec<Arc<Reference>> {
        if depth > MAX_EXTRACTION_DEPTH {
            warn!(
                "extraction depth bound hit at `{def}`",
                def = reference.full_definition()
            );
            return Vec::new();
        }
        if journey.len() > MAX_JOURNEY_LENGTH {
            return Vec::new();
        }

        // Snapshot the children under the read lock; recursion and the
        // polymorphic path re-lock as needed.
        let entries = {
            let arena = index.arena().read();
            mapping_entries(&arena, node)
        };
        let Some(entries) = entries else {
            // Sequences recurse straight into their members.
            let children = {
                let arena = index.arena().read();
                let node = arena.content(node);
                if arena.get(node).kind() == NodeKind::Sequence {
                    arena.get(node).children().to_vec()
                } else {
                    return Vec::new();
                }
            };

            let mut relatives = Vec::new();
            for child in children {
                relatives.extend(self.extract_relatives(
                    reference,
                    child,
                    parent_type,
                    seen,
                    journey,
                    resolve,
                    depth + 1,
                    index,
                    rolodex,
                ));
            }
            return relatives;
        };

        let own_type = entries.iter().find_map(|e| {
            (e.key == "type").then(|| e.scalar_value.clone()).flatten()
        });

        let mut relatives = Vec::new();
        for entry in entries {
            if entry.key == "$ref" {
                if let Some(raw) = entry.scalar_value {
                    match self.make_relative(
                        reference,
                        &raw,
                        node,
                        parent_type.map(String::from),
                        index,
                    ) {
                        Ok(relative) => relatives.push(relative),
                        Err(e) => self.record_error(e),
                    }
                }
                continue;
            }

            if POLYMORPHIC_KEYS.contains(&entry.key.as_str()) {
                self.extract_polymorphic(
                    reference,
                    &entry.key,
                    entry.value,
                    seen,
                    journey,
                    resolve,
                    index,
                    rolodex,
                );
                // Polymorphic keys short-circuit sibling traversal.
                break;
            }

            if entry.is_container {
                relatives.extend(self.extract_relatives(
                    reference,
                    entry.value,
                    own_type.as_deref(),
                    seen,
                    journey,
                    resolve,
                    depth + 1,
                    index,
                    rolodex,
                ));
            }
        }

        relatives
    }

    /// Handles an `allOf`/`oneOf`/`anyOf` entry: polymorphic cycle
    /// detection for immediate `$ref` members, recursive visiting
    /// otherwise.
    #[allow(clippy::too_many_arguments)]
    fn extract_polymorphic(
        &mut self,
        reference: &Arc<Reference>,
        key: &str,
        value: NodeId,
        seen: &mut HashSet<String>,
        journey: &[Arc<Reference>],
        resolve: bool,
        index: &SpecIndex,
        rolodex: &Rolodex,
    ) {
        let sites: Vec<String> = {
            let arena = index.arena().read();
            polymorphic_ref_sites(&arena, value)
        };

        for raw in sites {
            let relative = match self.make_relative(reference, &raw, value, None, index) {
                Ok(relative) => relative,
                Err(e) => {
                    self.record_error(e);
                    continue;
                }
            };

            let Some(found) =
                index.search_index_for_reference_by_reference(rolodex, &relative)
            else {
                self.record_missing(&relative);
                continue;
            };

            let loop_index = journey
                .iter()
                .position(|j| j.full_definition() == found.full_definition());
            if let Some(loop_index) = loop_index {
                self.record_cycle(
                    journey,
                    loop_index,
                    &relative,
                    PolymorphicType::from_key(key),
                    index,
                    rolodex,
                );
            } else {
                // Propagate discovery through the member without splicing
                // at this site.
                self.visit(&found, seen, journey, resolve, index, rolodex);
            }
        }
    }

    /// Constructs a synthetic site reference for a raw `$ref` string found
    /// inside the subtree of `owner`.
    fn make_relative(
        &self,
        owner: &Arc<Reference>,
        raw: &str,
        site: NodeId,
        parent_type: Option<String>,
        index: &SpecIndex,
    ) -> Result<Arc<Reference>, IndexError> {
        // The subtree may live in a sibling document; canonicalize against
        // the owner's provenance rather than this index's key.
        let (owner_base, _) = split_fragment(owner.full_definition());
        let (document_key, is_root) = if owner_base.is_empty() {
            (index.absolute_path(), index.is_root())
        } else {
            (owner_base, false)
        };

        let canonical = canonicalize_definition(raw, document_key, is_root)?;
        let relative = Arc::new(Reference::new(
            raw,
            canonical,
            site,
            None,
            owner.path(),
        ));
        if let Some(ty) = parent_type {
            relative.set_parent_schema_type(ty);
        }
        Ok(relative)
    }

    /// Records a detected cycle closing at `loop_index`, classifying it and
    /// routing it per configuration.
    fn record_cycle(
        &mut self,
        journey: &[Arc<Reference>],
        loop_index: usize,
        relative: &Arc<Reference>,
        polymorphic_type: PolymorphicType,
        index: &SpecIndex,
        rolodex: &Rolodex,
    ) {
        let Some(loop_point) =
            index.search_index_for_reference_by_reference(rolodex, relative)
        else {
            self.record_missing(relative);
            return;
        };

        if loop_point.is_circular() {
            return;
        }

        let is_polymorphic = polymorphic_type != PolymorphicType::None;
        let is_array = relative.parent_schema_type().as_deref() == Some("array");
        let is_infinite = {
            let mut visited = HashSet::new();
            self.is_infinite_cycle(
                index,
                rolodex,
                loop_point.full_definition(),
                &mut visited,
                loop_point.full_definition(),
            )
        };

        let mut full_journey = journey.to_vec();
        full_journey.push(loop_point.clone());
        let start = full_journey[0].clone();
        let result = Arc::new(CircularReferenceResult::new(
            full_journey,
            start,
            loop_index,
            loop_point.clone(),
            is_infinite,
            is_polymorphic,
            is_array,
            polymorphic_type,
        ));

        debug!(
            "circular reference detected: {path}",
            path = result.journey_path()
        );

        let config = index.config();
        if is_polymorphic && config.ignore_polymorphic_circular_references {
            self.ignored_poly_references.push(result);
        } else if is_array && config.ignore_array_circular_references {
            self.ignored_array_references.push(result);
        } else {
            self.circular_references.push(result);
        }

        loop_point.mark_circular();
        loop_point.mark_seen();
    }

    /// Walks the required sub-references of a definition, following only
    /// required edges.
    ///
    /// The cycle is infinite when the walk returns to `initial`: no valid
    /// terminating instance exists. An optional edge anywhere breaks the
    /// walk and the cycle is safe.
    fn is_infinite_cycle(
        &self,
        index: &SpecIndex,
        rolodex: &Rolodex,
        definition: &str,
        visited: &mut HashSet<String>,
        initial: &str,
    ) -> bool {
        let Some(schema) = index.search_schema(rolodex, definition) else {
            return false;
        };

        for (target, _properties) in schema.required_refs() {
            if target == initial {
                return true;
            }
            if visited.insert(target.clone())
                && self.is_infinite_cycle(index, rolodex, &target, visited, initial)
            {
                return true;
            }
        }

        false
    }

    /// Records a missing-reference resolving error, once per definition.
    fn record_missing(&mut self, relative: &Arc<Reference>) {
        if !self
            .reported_missing
            .insert(relative.full_definition().to_string())
        {
            return;
        }

        self.record_error(
            IndexError::new(
                ErrorKind::ReferenceMissing,
                format!(
                    "cannot resolve reference '{raw}', it's missing",
                    raw = relative.definition()
                ),
            )
            .with_path(relative.path().to_string()),
        );
    }

    /// Records a resolving error.
    fn record_error(&mut self, error: IndexError) {
        self.resolving_errors.push(Arc::new(error));
    }
}

/// Builds the circular-infinite error for a cycle.
pub(crate) fn infinite_cycle_error(cycle: &Arc<CircularReferenceResult>) -> IndexError {
    IndexError::new(
        ErrorKind::CircularInfinite,
        format!(
            "infinite circular reference detected: {name}: {path}",
            name = cycle.loop_point().name(),
            path = cycle.journey_path()
        ),
    )
    .with_path(cycle.loop_point().path().to_string())
    .with_circular(cycle.clone())
}

/// A mapping entry snapshot taken under the arena read lock.
struct MappingEntry {
    /// The key text.
    key: String,
    /// The value node.
    value: NodeId,
    /// The scalar value text, for scalar values.
    scalar_value: Option<String>,
    /// Whether the value is a mapping or sequence.
    is_container: bool,
}

/// Snapshots the entries of a mapping node.
///
/// Returns `None` for non-mapping nodes.
fn mapping_entries(arena: &NodeArena, node: NodeId) -> Option<Vec<MappingEntry>> {
    let node = arena.content(node);
    if arena.get(node).kind() != NodeKind::Mapping {
        return None;
    }

    let mut entries = Vec::new();
    for pair in arena.get(node).children().chunks_exact(2) {
        let Some(key) = arena.scalar_value(pair[0]).map(String::from) else {
            continue;
        };
        let value = arena.content(pair[1]);
        entries.push(MappingEntry {
            key,
            value,
            scalar_value: arena.scalar_value(value).map(String::from),
            is_container: matches!(
                arena.get(value).kind(),
                NodeKind::Mapping | NodeKind::Sequence
            ),
        });
    }

    Some(entries)
}

/// Collects the immediate `$ref` strings of a polymorphic value: a single
/// mapping (directly a `$ref`, or holding an `items` `$ref`) or a sequence
/// of mappings each possibly holding a `$ref`.
fn polymorphic_ref_sites(arena: &NodeArena, value: NodeId) -> Vec<String> {
    let value = arena.content(value);
    let mut sites = Vec::new();

    match arena.get(value).kind() {
        NodeKind::Mapping => {
            if let Some(site) = arena.is_ref(value) {
                sites.push(site.text);
            } else if let Some(items) = arena.sibling_value(value, "items") {
                if let Some(site) = arena.is_ref(items) {
                    sites.push(site.text);
                }
            }
        }
        NodeKind::Sequence => {
            for member in arena.get(value).children() {
                if let Some(site) = arena.is_ref(*member) {
                    sites.push(site.text);
                }
            }
        }
        _ => {}
    }

    sites
}
