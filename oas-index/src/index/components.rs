//! Component catalog population: well-known OpenAPI shapes and inline
//! schema discovery.

use std::collections::HashSet;
use std::sync::Arc;

use oas_tree::NodeArena;
use oas_tree::NodeId;
use oas_tree::NodeKind;
use oas_tree::encode_segment;
use oas_tree::pointer_to_path;
use oas_tree::resolve_pointer;
use tracing::trace;

use crate::Reference;
use crate::Rolodex;
use crate::SpecIndex;
use crate::canonicalize_definition;
use crate::index::ComponentCatalogs;
use crate::index::extract::append_path_segment;

/// Keywords whose mapping value holds named sub-schemas.
const SCHEMA_CONTAINER_MAPS: &[&str] = &["properties", "patternProperties"];

/// Keywords whose value is a single schema.
const SCHEMA_CONTAINER_SINGLES: &[&str] = &[
    "items",
    "not",
    "contains",
    "additionalProperties",
    "unevaluatedProperties",
];

/// Keywords whose sequence value holds schemas.
const SCHEMA_CONTAINER_LISTS: &[&str] = &["allOf", "oneOf", "anyOf", "prefixItems"];

impl SpecIndex {
    /// Populates the component catalogs from well-known document shapes and
    /// an inline schema scan, and records the required sub-references of
    /// every named schema.
    pub(crate) fn build_components(&self, _rolodex: &Rolodex) {
        {
            let arena = self.arena().read();
            let mut components = self.components.write();
            self.catalog_well_known(&arena, &mut components);
            self.catalog_inline_schemas(&arena, &mut components);
        }

        self.record_required_references();
    }

    /// Catalogs the named components at the well-known OpenAPI 2 and 3
    /// paths.
    fn catalog_well_known(&self, arena: &NodeArena, components: &mut ComponentCatalogs) {
        /// The well-known component locations of OpenAPI 2 and 3 documents.
        const LOCATIONS: &[(&str, WellKnown)] = &[
            ("/components/schemas", WellKnown::Schemas),
            ("/components/parameters", WellKnown::Parameters),
            ("/components/responses", WellKnown::Responses),
            ("/components/requestBodies", WellKnown::RequestBodies),
            ("/components/headers", WellKnown::Headers),
            ("/components/examples", WellKnown::Examples),
            ("/components/securitySchemes", WellKnown::SecuritySchemes),
            ("/components/callbacks", WellKnown::Callbacks),
            ("/components/links", WellKnown::Links),
            ("/components/pathItems", WellKnown::PathItems),
            ("/definitions", WellKnown::Schemas),
            ("/parameters", WellKnown::Parameters),
            ("/responses", WellKnown::Responses),
            ("/securityDefinitions", WellKnown::SecuritySchemes),
        ];

        /// Selects the catalog a well-known location feeds.
        #[derive(Clone, Copy)]
        enum WellKnown {
            /// The schemas catalog.
            Schemas,
            /// The parameters catalog.
            Parameters,
            /// The responses catalog.
            Responses,
            /// The request bodies catalog.
            RequestBodies,
            /// The headers catalog.
            Headers,
            /// The examples catalog.
            Examples,
            /// The security schemes catalog.
            SecuritySchemes,
            /// The callbacks catalog.
            Callbacks,
            /// The links catalog.
            Links,
            /// The path items catalog.
            PathItems,
        }

        self.catalog_paths(arena, components);

        for (pointer, which) in LOCATIONS {
            let Some(container) = resolve_pointer(arena, self.root(), pointer) else {
                continue;
            };
            if arena.get(container).kind() != NodeKind::Mapping {
                continue;
            }

            let catalog = match which {
                WellKnown::Schemas => &mut components.schemas,
                WellKnown::Parameters => &mut components.parameters,
                WellKnown::Responses => &mut components.responses,
                WellKnown::RequestBodies => &mut components.request_bodies,
                WellKnown::Headers => &mut components.headers,
                WellKnown::Examples => &mut components.examples,
                WellKnown::SecuritySchemes => &mut components.security_schemes,
                WellKnown::Callbacks => &mut components.callbacks,
                WellKnown::Links => &mut components.links,
                WellKnown::PathItems => &mut components.path_items,
            };

            let pairs: Vec<(NodeId, NodeId)> = arena
                .get(container)
                .children()
                .chunks_exact(2)
                .map(|pair| (pair[0], pair[1]))
                .collect();

            for (key, value) in pairs {
                let Some(name) = arena.scalar_value(key) else {
                    continue;
                };

                let local = format!(
                    "#{pointer}/{segment}",
                    segment = encode_segment(name)
                );
                let definition = self.qualify(&local);
                let path = pointer_to_path(&local);
                catalog.insert(
                    definition.clone(),
                    Arc::new(Reference::component(
                        definition,
                        arena.content(value),
                        Some(key),
                        path,
                    )),
                );
            }
        }
    }

    /// Catalogs the route entries under the document's `paths` mapping.
    fn catalog_paths(&self, arena: &NodeArena, components: &mut ComponentCatalogs) {
        let Some((_, paths)) = arena.find_key_top(self.root(), "paths") else {
            return;
        };
        let paths = arena.content(paths);
        if arena.get(paths).kind() != NodeKind::Mapping {
            return;
        }

        let routes: Vec<(NodeId, NodeId)> = arena
            .get(paths)
            .children()
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1]))
            .collect();

        for (key, value) in routes {
            let Some(route) = arena.scalar_value(key) else {
                continue;
            };
            if route.starts_with("x-") {
                continue;
            }

            let local = format!("#/paths/{segment}", segment = encode_segment(route));
            let definition = self.qualify(&local);
            let path = pointer_to_path(&local);
            components.paths.insert(
                definition.clone(),
                Arc::new(Reference::component(
                    definition,
                    arena.content(value),
                    Some(key),
                    path,
                )),
            );
        }
    }

    /// Scans the document for inline schema definitions and adds them to
    /// the schemas catalog.
    fn catalog_inline_schemas(&self, arena: &NodeArena, components: &mut ComponentCatalogs) {
        let mut seen_hashes = HashSet::new();
        let root = arena.content(self.root());
        self.scan_for_schemas(arena, root, "", "$", components, &mut seen_hashes);
    }

    /// Visits one node of the inline schema scan.
    fn scan_for_schemas(
        &self,
        arena: &NodeArena,
        node: NodeId,
        pointer: &str,
        path: &str,
        components: &mut ComponentCatalogs,
        seen_hashes: &mut HashSet<u64>,
    ) {
        match arena.get(node).kind() {
            NodeKind::Mapping => {}
            NodeKind::Sequence => {
                let children: Vec<NodeId> = arena.get(node).children().to_vec();
                for (i, child) in children.into_iter().enumerate() {
                    self.scan_for_schemas(
                        arena,
                        child,
                        &format!("{pointer}/{i}"),
                        &format!("{path}[{i}]"),
                        components,
                        seen_hashes,
                    );
                }
                return;
            }
            _ => return,
        }

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
            let value = arena.content(value);

            if SCHEMA_CONTAINER_MAPS.contains(&key_text.as_str())
                && arena.get(value).kind() == NodeKind::Mapping
            {
                let named: Vec<(NodeId, NodeId)> = arena
                    .get(value)
                    .children()
                    .chunks_exact(2)
                    .map(|pair| (pair[0], pair[1]))
                    .collect();
                for (name_key, schema) in named {
                    let Some(name) = arena.scalar_value(name_key).map(String::from) else {
                        continue;
                    };
                    let schema_pointer = format!(
                        "{child_pointer}/{segment}",
                        segment = encode_segment(&name)
                    );
                    let schema_path = append_path_segment(&child_path, &name);
                    self.add_inline_schema(
                        arena,
                        arena.content(schema),
                        &schema_pointer,
                        &schema_path,
                        components,
                        seen_hashes,
                    );
                }
            } else if SCHEMA_CONTAINER_SINGLES.contains(&key_text.as_str())
                && arena.get(value).kind() == NodeKind::Mapping
            {
                self.add_inline_schema(
                    arena,
                    value,
                    &child_pointer,
                    &child_path,
                    components,
                    seen_hashes,
                );
            } else if SCHEMA_CONTAINER_LISTS.contains(&key_text.as_str())
                && arena.get(value).kind() == NodeKind::Sequence
            {
                let members: Vec<NodeId> = arena.get(value).children().to_vec();
                for (i, member) in members.into_iter().enumerate() {
                    let member = arena.content(member);
                    if arena.get(member).kind() == NodeKind::Mapping {
                        self.add_inline_schema(
                            arena,
                            member,
                            &format!("{child_pointer}/{i}"),
                            &format!("{child_path}[{i}]"),
                            components,
                            seen_hashes,
                        );
                    }
                }
            }

            if matches!(
                arena.get(value).kind(),
                NodeKind::Mapping | NodeKind::Sequence
            ) {
                self.scan_for_schemas(
                    arena,
                    value,
                    &child_pointer,
                    &child_path,
                    components,
                    seen_hashes,
                );
            }
        }
    }

    /// Adds an inline schema to the schemas catalog.
    ///
    /// `$ref` mappings are not schemas; already-cataloged definitions are
    /// kept. With the quick hash enabled, a structurally identical schema
    /// that has been seen before is skipped.
    fn add_inline_schema(
        &self,
        arena: &NodeArena,
        schema: NodeId,
        pointer: &str,
        path: &str,
        components: &mut ComponentCatalogs,
        seen_hashes: &mut HashSet<u64>,
    ) {
        if arena.is_ref(schema).is_some() {
            return;
        }

        let definition = self.qualify(&format!("#{pointer}"));
        if components.schemas.contains_key(&definition) {
            return;
        }

        if self.config().use_schema_quick_hash && !seen_hashes.insert(quick_hash(arena, schema)) {
            trace!("skipping structurally duplicate inline schema at `{path}`");
            return;
        }

        components.schemas.insert(
            definition.clone(),
            Arc::new(Reference::component(definition, schema, None, path)),
        );
    }

    /// Records, for every named schema, the sub-definitions its required
    /// properties pull in.
    ///
    /// These edges drive the infinite-cycle classification: a cycle whose
    /// every edge is required has no finite instance.
    fn record_required_references(&self) {
        let arena = self.arena().read();
        let components = self.components.read();

        for schema in components.schemas.values() {
            let Some(node) = schema.node() else {
                continue;
            };
            let Some(required) = arena.sibling_value(node, "required") else {
                continue;
            };
            let Some(properties) = arena.sibling_value(node, "properties") else {
                continue;
            };

            let required_names: Vec<String> = arena
                .get(arena.content(required))
                .children()
                .iter()
                .filter_map(|id| arena.scalar_value(*id).map(String::from))
                .collect();

            for name in required_names {
                let Some(property) = arena.sibling_value(properties, &name) else {
                    continue;
                };
                let Some(site) = arena.is_ref(property) else {
                    continue;
                };
                let Ok(canonical) =
                    canonicalize_definition(&site.text, self.absolute_path(), self.is_root())
                else {
                    continue;
                };
                schema.add_required_ref(canonical.full_definition, name);
            }
        }
    }
}

/// Computes a fast structural hash of a schema subtree.
///
/// The hash folds node kinds, scalar values and child structure; it is
/// stable across runs for identical input bytes.
pub(crate) fn quick_hash(arena: &NodeArena, node: NodeId) -> u64 {
    /// The FNV-1a offset basis.
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    /// The FNV-1a prime.
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    /// Folds one byte into the hash.
    fn fold(hash: u64, byte: u8) -> u64 {
        (hash ^ u64::from(byte)).wrapping_mul(PRIME)
    }

    /// Folds a node and its subtree into the hash.
    fn fold_node(arena: &NodeArena, node: NodeId, mut hash: u64) -> u64 {
        let node = arena.content(node);
        let n = arena.get(node);
        hash = fold(hash, n.kind() as u8);
        if let Some(value) = n.value() {
            for byte in value.bytes() {
                hash = fold(hash, byte);
            }
        }
        hash = fold(hash, 0xff);
        for child in n.children() {
            hash = fold_node(arena, *child, hash);
        }
        fold(hash, 0xfe)
    }

    fold_node(arena, node, OFFSET)
}
