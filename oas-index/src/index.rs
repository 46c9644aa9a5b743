//! The per-document specification index.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use indexmap::IndexMap;
use oas_tree::NodeArena;
use oas_tree::NodeId;
use oas_tree::resolve_pointer;
use oas_tree::split_fragment;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::CircularReferenceResult;
use crate::ErrorKind;
use crate::IndexConfig;
use crate::IndexError;
use crate::Reference;
use crate::Rolodex;

mod components;
mod extract;

/// The reference stores of an index.
#[derive(Debug, Default)]
pub(crate) struct RefStore {
    /// Every `$ref` sighting, in discovery order.
    pub(crate) all_refs: Vec<Arc<Reference>>,
    /// The canonical owner of each `full_definition`, keyed in first-sighting
    /// order.
    pub(crate) mapped: IndexMap<String, Arc<Reference>>,
}

/// The component catalogs of an index.
#[derive(Debug, Default)]
pub(crate) struct ComponentCatalogs {
    /// Named schemas, including discovered inline schemas.
    pub(crate) schemas: IndexMap<String, Arc<Reference>>,
    /// Named parameters.
    pub(crate) parameters: IndexMap<String, Arc<Reference>>,
    /// Named responses.
    pub(crate) responses: IndexMap<String, Arc<Reference>>,
    /// Named request bodies.
    pub(crate) request_bodies: IndexMap<String, Arc<Reference>>,
    /// Named headers.
    pub(crate) headers: IndexMap<String, Arc<Reference>>,
    /// Named examples.
    pub(crate) examples: IndexMap<String, Arc<Reference>>,
    /// Named security schemes.
    pub(crate) security_schemes: IndexMap<String, Arc<Reference>>,
    /// Named callbacks.
    pub(crate) callbacks: IndexMap<String, Arc<Reference>>,
    /// Named links.
    pub(crate) links: IndexMap<String, Arc<Reference>>,
    /// Named path items.
    pub(crate) path_items: IndexMap<String, Arc<Reference>>,
    /// Route entries under the document's `paths` mapping.
    pub(crate) paths: IndexMap<String, Arc<Reference>>,
    /// `x-*` extension values by JSON path.
    pub(crate) extensions: IndexMap<String, Arc<Reference>>,
}

/// Counting statistics gathered during the discovery walk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    /// `$ref` sightings, including ones that later fail to resolve.
    pub ref_sightings: usize,
    /// `description` keys in the document.
    pub descriptions: usize,
    /// `summary` keys in the document.
    pub summaries: usize,
    /// `x-*` extension keys in the document.
    pub extensions: usize,
}

/// A per-document index of every reference and reusable component.
///
/// One index exists per opened document; all indexes of a rolodex share one
/// node arena. The owning [`Rolodex`] is passed as an explicit context
/// parameter to the operations that cross document boundaries.
#[derive(Debug)]
pub struct SpecIndex {
    /// The unique identifier of the index, for log events.
    uuid: Uuid,
    /// The shared node arena.
    arena: Arc<RwLock<NodeArena>>,
    /// The configuration the index was built with.
    config: Arc<IndexConfig>,
    /// The root node of the document.
    root: NodeId,
    /// The absolute key of the document.
    absolute_path: String,
    /// Whether this index belongs to the rolodex's root document.
    is_root: bool,
    /// The number of lines in the document source.
    line_count: usize,
    /// Latched once `build_index` has run.
    built: AtomicBool,
    /// The reference stores.
    refs: RwLock<RefStore>,
    /// The component catalogs.
    components: RwLock<ComponentCatalogs>,
    /// The errors recorded while indexing.
    errors: Mutex<Vec<Arc<IndexError>>>,
    /// The cycles the resolver assigned to this index.
    circular_references: Mutex<Vec<Arc<CircularReferenceResult>>>,
    /// Counting statistics gathered during the discovery walk.
    stats: Mutex<IndexStats>,
}

impl SpecIndex {
    /// Constructs a new, unbuilt index for a document.
    pub fn new(
        arena: Arc<RwLock<NodeArena>>,
        config: Arc<IndexConfig>,
        root: NodeId,
        absolute_path: impl Into<String>,
        is_root: bool,
        line_count: usize,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            arena,
            config,
            root,
            absolute_path: absolute_path.into(),
            is_root,
            line_count,
            built: AtomicBool::new(false),
            refs: RwLock::new(RefStore::default()),
            components: RwLock::new(ComponentCatalogs::default()),
            errors: Mutex::new(Vec::new()),
            circular_references: Mutex::new(Vec::new()),
            stats: Mutex::new(IndexStats::default()),
        }
    }

    /// Gets the unique identifier of the index.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Gets the shared node arena.
    pub fn arena(&self) -> &Arc<RwLock<NodeArena>> {
        &self.arena
    }

    /// Gets the configuration the index was built with.
    pub fn config(&self) -> &Arc<IndexConfig> {
        &self.config
    }

    /// Gets the root node of the document.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Gets the absolute key of the document.
    pub fn absolute_path(&self) -> &str {
        &self.absolute_path
    }

    /// Determines if this index belongs to the rolodex's root document.
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Gets the number of lines in the document source.
    pub fn line_count(&self) -> usize {
        self.line_count
    }

    /// Builds the index: extracts and resolves every reference, then
    /// populates the component catalogs.
    ///
    /// Idempotent; the second and later calls return immediately.
    pub fn build_index(&self, rolodex: &Rolodex) {
        if self.built.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(
            "building index {uuid} for `{path}`",
            uuid = self.uuid,
            path = self.absolute_path
        );

        if !self.config.skip_document_check && !self.looks_like_openapi() {
            self.add_error(Arc::new(IndexError::new(
                ErrorKind::IndexingFailure,
                format!(
                    "document `{path}` does not look like an OpenAPI document",
                    path = self.absolute_path
                ),
            )));
            return;
        }

        self.extract_references(rolodex);
        self.build_components(rolodex);
    }

    /// Determines if the document root carries an OpenAPI marker key.
    fn looks_like_openapi(&self) -> bool {
        let arena = self.arena.read();
        ["openapi", "swagger", "$schema"]
            .iter()
            .any(|key| arena.find_key_top(self.root, key).is_some())
    }

    /// Records an indexing error.
    pub(crate) fn add_error(&self, error: Arc<IndexError>) {
        self.errors.lock().push(error);
    }

    /// Gets the errors recorded while indexing.
    pub fn errors(&self) -> Vec<Arc<IndexError>> {
        self.errors.lock().clone()
    }

    /// Gets every `$ref` sighting, in discovery order.
    pub fn get_all_references(&self) -> Vec<Arc<Reference>> {
        self.refs.read().all_refs.clone()
    }

    /// Gets the canonical owner reference for a `full_definition`.
    pub fn get_mapped_reference(&self, full_definition: &str) -> Option<Arc<Reference>> {
        self.refs.read().mapped.get(full_definition).cloned()
    }

    /// Gets the canonical owner references in a deterministic order
    /// matching discovery.
    pub fn get_mapped_references_sequenced(&self) -> Vec<Arc<Reference>> {
        self.refs.read().mapped.values().cloned().collect()
    }

    /// Gets every named schema reference, including discovered inline
    /// schemas.
    pub fn get_all_component_schemas(&self) -> Vec<Arc<Reference>> {
        self.components.read().schemas.values().cloned().collect()
    }

    /// Gets every named parameter reference.
    pub fn get_all_parameters(&self) -> Vec<Arc<Reference>> {
        self.components.read().parameters.values().cloned().collect()
    }

    /// Gets every named response reference.
    pub fn get_all_responses(&self) -> Vec<Arc<Reference>> {
        self.components.read().responses.values().cloned().collect()
    }

    /// Gets every named request body reference.
    pub fn get_all_request_bodies(&self) -> Vec<Arc<Reference>> {
        self.components
            .read()
            .request_bodies
            .values()
            .cloned()
            .collect()
    }

    /// Gets every named header reference.
    pub fn get_all_headers(&self) -> Vec<Arc<Reference>> {
        self.components.read().headers.values().cloned().collect()
    }

    /// Gets every named example reference.
    pub fn get_all_examples(&self) -> Vec<Arc<Reference>> {
        self.components.read().examples.values().cloned().collect()
    }

    /// Gets every named security scheme reference.
    pub fn get_all_security_schemes(&self) -> Vec<Arc<Reference>> {
        self.components
            .read()
            .security_schemes
            .values()
            .cloned()
            .collect()
    }

    /// Gets every named callback reference.
    pub fn get_all_callbacks(&self) -> Vec<Arc<Reference>> {
        self.components.read().callbacks.values().cloned().collect()
    }

    /// Gets every named link reference.
    pub fn get_all_links(&self) -> Vec<Arc<Reference>> {
        self.components.read().links.values().cloned().collect()
    }

    /// Gets every named path item reference.
    pub fn get_all_path_items(&self) -> Vec<Arc<Reference>> {
        self.components.read().path_items.values().cloned().collect()
    }

    /// Gets every route entry under the document's `paths` mapping.
    pub fn get_all_paths(&self) -> Vec<Arc<Reference>> {
        self.components.read().paths.values().cloned().collect()
    }

    /// Gets the counting statistics gathered during the discovery walk.
    pub fn stats(&self) -> IndexStats {
        *self.stats.lock()
    }

    /// Stores the counting statistics gathered during the discovery walk.
    pub(crate) fn set_stats(&self, stats: IndexStats) {
        *self.stats.lock() = stats;
    }

    /// Gets every `x-*` extension value, keyed by JSON path.
    pub fn get_all_extensions(&self) -> Vec<Arc<Reference>> {
        self.components.read().extensions.values().cloned().collect()
    }

    /// Assigns the resolver's cycle findings to this index.
    pub fn set_circular_references(&self, cycles: Vec<Arc<CircularReferenceResult>>) {
        *self.circular_references.lock() = cycles;
    }

    /// Gets the cycles the resolver assigned to this index.
    pub fn circular_references(&self) -> Vec<Arc<CircularReferenceResult>> {
        self.circular_references.lock().clone()
    }

    /// Resolves a `full_definition` to the node it names, opening external
    /// documents through the rolodex as needed.
    pub fn find_component(
        &self,
        rolodex: &Rolodex,
        full_definition: &str,
    ) -> Result<NodeId, IndexError> {
        let (base, fragment) = split_fragment(full_definition);
        let pointer = fragment.unwrap_or("");

        let root = if base.is_empty() || base == self.absolute_path {
            self.root
        } else {
            let document = rolodex.open(base).map_err(|e| {
                IndexError::new(e.kind(), e.message().to_string())
            })?;
            document.root()
        };

        let arena = self.arena.read();
        resolve_pointer(&arena, root, pointer).ok_or_else(|| {
            IndexError::new(
                ErrorKind::ReferenceMissing,
                format!("cannot find component `{full_definition}`"),
            )
        })
    }

    /// Finds the canonical owner reference for a synthetic reference's
    /// `full_definition`, searching this index first and the rest of the
    /// rolodex after.
    pub fn search_index_for_reference_by_reference(
        &self,
        rolodex: &Rolodex,
        reference: &Reference,
    ) -> Option<Arc<Reference>> {
        self.search_index_for_reference(rolodex, reference.full_definition())
    }

    /// Finds the canonical owner reference for a `full_definition`.
    pub fn search_index_for_reference(
        &self,
        rolodex: &Rolodex,
        full_definition: &str,
    ) -> Option<Arc<Reference>> {
        if let Some(found) = self.lookup_local(full_definition) {
            return Some(found);
        }

        rolodex.search_indexes_for_reference(full_definition, Some(self))
    }

    /// Finds the named-schema reference for a definition, searching this
    /// index's schema catalog first and the rest of the rolodex after.
    ///
    /// Unlike [`SpecIndex::search_index_for_reference`], mapped `$ref`
    /// sightings are not consulted: required-edge walks need the schema
    /// definition itself.
    pub(crate) fn search_schema(
        &self,
        rolodex: &Rolodex,
        full_definition: &str,
    ) -> Option<Arc<Reference>> {
        if let Some(found) = self.lookup_local_schema(full_definition) {
            return Some(found);
        }

        rolodex.search_indexes_for_schema(full_definition, Some(self))
    }

    /// Looks a definition up in this index's schema catalog only.
    pub(crate) fn lookup_local_schema(&self, full_definition: &str) -> Option<Arc<Reference>> {
        let components = self.components.read();
        for form in self.definition_forms(full_definition) {
            if let Some(found) = components.schemas.get(form.as_ref()) {
                return Some(found.clone());
            }
        }
        None
    }

    /// Gets the lookup forms of a definition for this index: the
    /// definition itself, plus its bare-fragment form when it is qualified
    /// with this document's absolute key (root-local references are stored
    /// unqualified).
    fn definition_forms<'a>(&self, full_definition: &'a str) -> Vec<std::borrow::Cow<'a, str>> {
        let mut forms = vec![std::borrow::Cow::Borrowed(full_definition)];
        if !self.absolute_path.is_empty() {
            if let Some(rest) = full_definition.strip_prefix(self.absolute_path.as_str()) {
                if rest.starts_with('#') {
                    forms.push(std::borrow::Cow::Borrowed(rest));
                }
            }
        }
        forms
    }

    /// Looks a definition up in this index's own stores.
    ///
    /// A definition qualified with this document's absolute key is also
    /// tried in its bare-fragment form, since root-local references are
    /// stored unqualified.
    pub(crate) fn lookup_local(&self, full_definition: &str) -> Option<Arc<Reference>> {
        let refs = self.refs.read();
        let components = self.components.read();

        for form in self.definition_forms(full_definition) {
            let form = form.as_ref();
            if let Some(found) = refs.mapped.get(form) {
                return Some(found.clone());
            }
            for catalog in [
                &components.schemas,
                &components.parameters,
                &components.responses,
                &components.request_bodies,
                &components.headers,
                &components.examples,
                &components.security_schemes,
                &components.callbacks,
                &components.links,
                &components.path_items,
            ] {
                if let Some(found) = catalog.get(form) {
                    return Some(found.clone());
                }
            }
        }

        None
    }

    /// Qualifies a bare-fragment definition with this document's absolute
    /// key, unless this is the root index.
    pub(crate) fn qualify(&self, local_definition: &str) -> String {
        if self.is_root || self.absolute_path.is_empty() {
            local_definition.to_string()
        } else {
            format!(
                "{path}{local_definition}",
                path = self.absolute_path
            )
        }
    }
}
