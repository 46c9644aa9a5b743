//! The rolodex: the multi-document owner that coordinates indexing and
//! cycle detection across every opened document.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::time::Duration;
use std::time::Instant;

use indexmap::IndexMap;
use oas_tree::NodeArena;
use oas_tree::load_source;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tracing::debug;
use tracing::info;
use uuid::Uuid;

use crate::CircularReferenceResult;
use crate::ContentType;
use crate::Document;
use crate::ErrorKind;
use crate::IndexConfig;
use crate::IndexError;
use crate::LocalSource;
use crate::Reference;
use crate::RemoteSource;
use crate::Resolver;
use crate::SpecIndex;
use crate::detect_from_extension;
use crate::reference::is_url_location;
use crate::resolver::infinite_cycle_error;

/// A result produced by a per-file indexing worker.
enum WorkerMessage {
    /// The worker produced an index for its file.
    Indexed(Arc<SpecIndex>),
    /// The worker failed to open or parse its file.
    Error(Arc<IndexError>),
}

/// The multi-document reference resolver.
///
/// A rolodex owns every document source, the shared node arena, and one
/// [`SpecIndex`] per opened document. Indexing opens and parses the
/// enumerated files of each source in parallel, then builds every index
/// and runs the cycle check serially over a deterministic, path-sorted
/// order.
pub struct Rolodex {
    /// The unique identifier of the rolodex, for log events.
    uuid: Uuid,
    /// The configuration of the rolodex.
    config: Arc<IndexConfig>,
    /// The node arena shared by every opened document.
    arena: Arc<RwLock<NodeArena>>,
    /// Local sources by absolute base path, in registration order.
    local_sources: RwLock<IndexMap<String, Arc<LocalSource>>>,
    /// Remote sources, in registration order.
    remote_sources: RwLock<Vec<Arc<RemoteSource>>>,
    /// The root document, once set.
    root_document: RwLock<Option<Arc<Document>>>,
    /// Every index, root first once indexing completes.
    indexes: RwLock<Vec<Arc<SpecIndex>>>,
    /// The root document's index.
    root_index: RwLock<Option<Arc<SpecIndex>>>,
    /// Errors caught across every index.
    caught_errors: Mutex<Vec<Arc<IndexError>>>,
    /// Aggregated safe cycles.
    safe_circular: Mutex<Vec<Arc<CircularReferenceResult>>>,
    /// Aggregated infinite cycles.
    infinite_circular: Mutex<Vec<Arc<CircularReferenceResult>>>,
    /// Aggregated ignored cycles, deduplicated by loop-point definition.
    ignored_circular: Mutex<Vec<Arc<CircularReferenceResult>>>,
    /// The wall-clock duration of the last indexing run.
    indexing_duration: Mutex<Duration>,
    /// The total line count of every indexed document.
    line_count: AtomicUsize,
    /// Latched once `index_the_rolodex` has run.
    indexed: AtomicBool,
}

impl std::fmt::Debug for Rolodex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rolodex")
            .field("uuid", &self.uuid)
            .field("indexes", &self.indexes.read().len())
            .field("local_sources", &self.local_sources.read().len())
            .field("remote_sources", &self.remote_sources.read().len())
            .finish_non_exhaustive()
    }
}

impl Rolodex {
    /// Constructs a new rolodex with the given configuration.
    pub fn new(config: IndexConfig) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            config: Arc::new(config),
            arena: Arc::new(RwLock::new(NodeArena::new())),
            local_sources: RwLock::new(IndexMap::new()),
            remote_sources: RwLock::new(Vec::new()),
            root_document: RwLock::new(None),
            indexes: RwLock::new(Vec::new()),
            root_index: RwLock::new(None),
            caught_errors: Mutex::new(Vec::new()),
            safe_circular: Mutex::new(Vec::new()),
            infinite_circular: Mutex::new(Vec::new()),
            ignored_circular: Mutex::new(Vec::new()),
            indexing_duration: Mutex::new(Duration::ZERO),
            line_count: AtomicUsize::new(0),
            indexed: AtomicBool::new(false),
        }
    }

    /// Gets the unique identifier of the rolodex.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Gets the configuration of the rolodex.
    pub fn config(&self) -> &Arc<IndexConfig> {
        &self.config
    }

    /// Gets the node arena shared by every opened document.
    pub fn arena(&self) -> &Arc<RwLock<NodeArena>> {
        &self.arena
    }

    /// Registers a local source rooted at the given directory.
    pub fn add_local_source(&self, base: impl Into<std::path::PathBuf>) {
        let source = Arc::new(LocalSource::new(base, self.config.clone(), self.arena.clone()));
        let key = source.base().to_string_lossy().into_owned();
        self.local_sources.write().insert(key, source);
    }

    /// Registers a remote source.
    ///
    /// Fails when no remote handler is configured and no tokio runtime is
    /// available for the default handler.
    pub fn add_remote_source(&self) -> anyhow::Result<()> {
        let source = Arc::new(RemoteSource::new(self.config.clone(), self.arena.clone())?);
        self.remote_sources.write().push(source);
        Ok(())
    }

    /// Parses the given source text as the rolodex's root document.
    ///
    /// The document is keyed by the configuration's `spec_absolute_path`.
    pub fn set_root_source(&self, source: &str) -> Result<(), IndexError> {
        let key = self.config.spec_absolute_path.clone();
        let content_type =
            detect_from_extension(&key).unwrap_or(ContentType::Yaml);
        let line_count = source.lines().count();

        let mut scratch = NodeArena::new();
        let root = load_source(&mut scratch, source).map_err(|e| {
            IndexError::new(
                ErrorKind::IndexingFailure,
                format!("unable to parse root document: {e}"),
            )
            .with_position(e.line(), e.column())
        })?;
        let root = self.arena.write().absorb(scratch, root);

        *self.root_document.write() = Some(Arc::new(Document::new(
            key,
            content_type,
            root,
            line_count,
            None,
        )));
        Ok(())
    }

    /// Gets the root document, once set.
    pub fn root_document(&self) -> Option<Arc<Document>> {
        self.root_document.read().clone()
    }

    /// Indexes every document the rolodex can reach.
    ///
    /// Enumerated files are opened, parsed and given indexes by parallel
    /// workers; the collected indexes are then sorted by absolute path and
    /// built serially, the root document's index is built last, and the
    /// cycle check runs over every index. No observable output depends on
    /// worker completion order.
    pub fn index_the_rolodex(&self) -> Result<(), IndexError> {
        if self.indexed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let root_document = self.root_document.read().clone().ok_or_else(|| {
            IndexError::new(
                ErrorKind::IndexingFailure,
                "cannot index the rolodex without a root document",
            )
        })?;

        // A configured base path stands in for an explicitly registered
        // local source.
        if let Some(base) = self.config.base_path.clone() {
            if self.local_sources.read().is_empty() {
                self.add_local_source(base);
            }
        }

        let started = Instant::now();
        let build = !self.config.avoid_build_index;
        let mut collected = self.index_sources_in_parallel();

        // Establish the stable ordering before anything observable happens.
        collected.sort_by(|a, b| a.absolute_path().cmp(b.absolute_path()));
        self.indexes.write().extend(collected.iter().cloned());

        if build {
            for index in &collected {
                index.build_index(self);
                self.mirror_index_errors(index);
            }
            self.index_pending_documents();
        }

        // The root index builds last, with every sibling already in place.
        let root_index = Arc::new(SpecIndex::new(
            self.arena.clone(),
            self.config.clone(),
            root_document.root(),
            self.config.spec_absolute_path.clone(),
            true,
            root_document.line_count(),
        ));
        root_document.set_index(root_index.clone());
        self.indexes.write().insert(0, root_index.clone());
        *self.root_index.write() = Some(root_index.clone());
        if build {
            root_index.build_index(self);
            self.mirror_index_errors(&root_index);
            // The root build can open further documents of its own.
            self.index_pending_documents();
        }

        if build && !self.config.avoid_circular_reference_check {
            let indexes = self.indexes_root_last();
            for index in indexes {
                let mut resolver = Resolver::new();
                let errors = resolver.check_for_circular_references(&index, self);
                self.caught_errors.lock().extend(errors);
                self.aggregate_resolver(&resolver, &index);
            }
        }

        let total_lines: usize = self
            .documents()
            .iter()
            .map(|d| d.line_count())
            .sum::<usize>()
            + root_document.line_count();
        self.line_count.store(total_lines, Ordering::Relaxed);
        *self.indexing_duration.lock() = started.elapsed();

        info!(
            "rolodex {uuid} indexed {count} documents ({lines} lines) in {elapsed:?}",
            uuid = self.uuid,
            count = self.indexes.read().len(),
            lines = total_lines,
            elapsed = started.elapsed()
        );
        Ok(())
    }

    /// Opens, parses and assigns indexes to every enumerated file, one
    /// worker per file, collecting results over a channel.
    fn index_sources_in_parallel(&self) -> Vec<Arc<SpecIndex>> {
        let mut collected = Vec::new();
        let sources: Vec<Arc<LocalSource>> =
            self.local_sources.read().values().cloned().collect();

        for source in sources {
            let (tx, rx) = mpsc::channel::<WorkerMessage>();

            // The scope end is the per-source wait-group barrier: every
            // worker completes before the source is marked done.
            rayon::scope(|scope| {
                for file in source.files() {
                    if file.to_string_lossy() == self.config.spec_absolute_path.as_str() {
                        // The root document is indexed separately, last.
                        continue;
                    }

                    let tx = tx.clone();
                    let source = source.clone();
                    let this = self;
                    scope.spawn(move |_| {
                        let message = if this.config.cancellation.is_cancelled() {
                            WorkerMessage::Error(Arc::new(IndexError::new(
                                ErrorKind::DocumentOpenFailed,
                                "indexing cancelled",
                            )))
                        } else {
                            match source.open(file) {
                                Ok(document) => {
                                    WorkerMessage::Indexed(this.index_for_document(&document))
                                }
                                Err(e) => WorkerMessage::Error(e),
                            }
                        };
                        let _ = tx.send(message);
                    });
                }
            });
            drop(tx);

            for message in rx {
                match message {
                    WorkerMessage::Indexed(index) => collected.push(index),
                    WorkerMessage::Error(e) => self.caught_errors.lock().push(e),
                }
            }
        }

        collected
    }

    /// Creates the per-file index for a document.
    ///
    /// The per-file configuration carries the document's absolute key and
    /// defers catalog building to the serial phase.
    fn index_for_document(&self, document: &Arc<Document>) -> Arc<SpecIndex> {
        let mut config = (*self.config).clone();
        config.spec_absolute_path = document.absolute_key().to_string();
        config.avoid_build_index = true;

        let index = Arc::new(SpecIndex::new(
            self.arena.clone(),
            Arc::new(config),
            document.root(),
            document.absolute_key(),
            false,
            document.line_count(),
        ));
        document.set_index(index.clone());
        debug!(
            "created index {uuid} for `{key}`",
            uuid = index.uuid(),
            key = document.absolute_key()
        );
        index
    }

    /// Gets every opened document across every source.
    pub fn documents(&self) -> Vec<Arc<Document>> {
        let mut documents = Vec::new();
        for source in self.local_sources.read().values() {
            documents.extend(source.documents());
        }
        for source in self.remote_sources.read().iter() {
            documents.extend(source.documents());
        }
        documents
    }

    /// Builds indexes for documents opened lazily during other builds,
    /// until none remain.
    ///
    /// Lazily-opened documents sit outside the enumerated set (remote
    /// documents, files outside every source base); each still gets a
    /// built index before the cycle check observes anything.
    fn index_pending_documents(&self) {
        loop {
            let pending = self.unindexed_documents();
            if pending.is_empty() {
                break;
            }
            for document in pending {
                let index = self.index_for_document(&document);
                self.indexes.write().push(index.clone());
                index.build_index(self);
                self.mirror_index_errors(&index);
            }
        }
    }

    /// Gets the opened documents that have no index yet, sorted by key.
    fn unindexed_documents(&self) -> Vec<Arc<Document>> {
        let mut pending: Vec<Arc<Document>> = self
            .documents()
            .into_iter()
            .filter(|d| d.index().is_none())
            .collect();
        pending.sort_by(|a, b| a.absolute_key().cmp(b.absolute_key()));
        pending
    }

    /// Gets a snapshot of every index with the root index moved last.
    fn indexes_root_last(&self) -> Vec<Arc<SpecIndex>> {
        let indexes = self.indexes.read().clone();
        let (root, mut rest): (Vec<_>, Vec<_>) =
            indexes.into_iter().partition(|i| i.is_root());
        rest.extend(root);
        rest
    }

    /// Mirrors an index's errors into the rolodex's caught errors.
    fn mirror_index_errors(&self, index: &Arc<SpecIndex>) {
        let errors = index.errors();
        if !errors.is_empty() {
            self.caught_errors.lock().extend(errors);
        }
    }

    /// Folds a resolver's findings into the index and the rolodex-wide
    /// cycle views.
    fn aggregate_resolver(&self, resolver: &Resolver, index: &Arc<SpecIndex>) {
        let found = resolver.get_circular_references().to_vec();
        if !found.is_empty() {
            let mut combined = index.circular_references();
            combined.extend(found.iter().cloned());
            index.set_circular_references(combined);

            let mut safe = self.safe_circular.lock();
            let mut infinite = self.infinite_circular.lock();
            for cycle in found {
                if cycle.is_infinite_loop() {
                    infinite.push(cycle);
                } else {
                    safe.push(cycle);
                }
            }
        }

        let mut ignored = self.ignored_circular.lock();
        for cycle in resolver
            .get_ignored_circular_array_references()
            .iter()
            .chain(resolver.get_ignored_circular_poly_references())
        {
            let duplicate = ignored.iter().any(|existing| {
                existing.loop_point().full_definition()
                    == cycle.loop_point().full_definition()
            });
            if !duplicate {
                ignored.push(cycle.clone());
            }
        }
    }

    /// Resolves every index: the full traversal with splicing enabled.
    ///
    /// Returns the resolving errors, including one error per infinite
    /// cycle, whether it was discovered by this pass or by the indexing
    /// cycle check.
    pub fn resolve(&self) -> Vec<Arc<IndexError>> {
        let mut errors: Vec<Arc<IndexError>> = Vec::new();

        for index in self.indexes_root_last() {
            let mut resolver = Resolver::new();
            for error in resolver.resolve(&index, self) {
                // Infinite-cycle errors are regenerated from the aggregate
                // below so check-phase findings are included exactly once.
                if error.kind() != ErrorKind::CircularInfinite {
                    errors.push(error);
                }
            }
            self.aggregate_resolver(&resolver, &index);
        }

        let mut reported = HashSet::new();
        for cycle in self.infinite_circular.lock().iter() {
            if reported.insert(cycle.loop_point().full_definition().to_string()) {
                errors.push(Arc::new(infinite_cycle_error(cycle)));
            }
        }

        errors
    }

    /// Resolves a document by location from one of the registered sources.
    ///
    /// URL-looking locations consult remote sources, gated by
    /// `allow_remote_lookup`; other locations try the local sources in
    /// registration order, gated by `allow_file_lookup`.
    pub fn open(&self, location: &str) -> Result<Arc<Document>, Arc<IndexError>> {
        if self.config.cancellation.is_cancelled() {
            return Err(Arc::new(IndexError::new(
                ErrorKind::DocumentOpenFailed,
                format!("open of `{location}` cancelled"),
            )));
        }

        // The root document never round-trips through a source.
        if let Some(root) = self.root_document.read().clone() {
            if root.absolute_key() == location {
                return Ok(root);
            }
        }

        if is_url_location(location) {
            if !self.config.allow_remote_lookup {
                return Err(Arc::new(IndexError::new(
                    ErrorKind::LookupForbidden,
                    format!("remote lookup of `{location}` is disabled"),
                )));
            }

            let source = self.ensure_remote_source()?;
            return source.open(location);
        }

        if !self.config.allow_file_lookup {
            return Err(Arc::new(IndexError::new(
                ErrorKind::LookupForbidden,
                format!("file lookup of `{location}` is disabled"),
            )));
        }

        let sources: Vec<Arc<LocalSource>> =
            self.local_sources.read().values().cloned().collect();
        if sources.is_empty() {
            return Err(Arc::new(IndexError::new(
                ErrorKind::DocumentOpenFailed,
                format!("no local source can provide `{location}`"),
            )));
        }

        let mut last_error = None;
        for source in sources {
            match source.open(Path::new(location)) {
                Ok(document) => return Ok(document),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.expect("at least one source was tried"))
    }

    /// Gets the first registered remote source, creating one when remote
    /// lookup is allowed but none has been registered.
    fn ensure_remote_source(&self) -> Result<Arc<RemoteSource>, Arc<IndexError>> {
        if let Some(source) = self.remote_sources.read().first() {
            return Ok(source.clone());
        }

        let source = RemoteSource::new(self.config.clone(), self.arena.clone())
            .map_err(|e| {
                Arc::new(
                    IndexError::new(
                        ErrorKind::DocumentOpenFailed,
                        "no remote source is available",
                    )
                    .with_source(e),
                )
            })?;
        let source = Arc::new(source);
        self.remote_sources.write().push(source.clone());
        Ok(source)
    }

    /// Searches every index for the canonical owner of a definition.
    pub(crate) fn search_indexes_for_reference(
        &self,
        full_definition: &str,
        exclude: Option<&SpecIndex>,
    ) -> Option<Arc<Reference>> {
        for index in self.indexes.read().iter() {
            if let Some(excluded) = exclude {
                if excluded.uuid() == index.uuid() {
                    continue;
                }
            }
            if let Some(found) = index.lookup_local(full_definition) {
                return Some(found);
            }
        }
        None
    }

    /// Searches every index's schema catalog for a definition.
    pub(crate) fn search_indexes_for_schema(
        &self,
        full_definition: &str,
        exclude: Option<&SpecIndex>,
    ) -> Option<Arc<Reference>> {
        for index in self.indexes.read().iter() {
            if let Some(excluded) = exclude {
                if excluded.uuid() == index.uuid() {
                    continue;
                }
            }
            if let Some(found) = index.lookup_local_schema(full_definition) {
                return Some(found);
            }
        }
        None
    }

    /// Gets every index, root first.
    pub fn indexes(&self) -> Vec<Arc<SpecIndex>> {
        self.indexes.read().clone()
    }

    /// Gets every `$ref` sighting across every index, root's first.
    pub fn get_all_references(&self) -> Vec<Arc<Reference>> {
        self.indexes
            .read()
            .iter()
            .flat_map(|index| index.get_all_references())
            .collect()
    }

    /// Gets the canonical owner references of every index, root's first,
    /// each index's in its deterministic discovery order.
    pub fn get_all_mapped_references_sequenced(&self) -> Vec<Arc<Reference>> {
        self.indexes
            .read()
            .iter()
            .flat_map(|index| index.get_mapped_references_sequenced())
            .collect()
    }

    /// Gets the root document's index.
    pub fn root_index(&self) -> Option<Arc<SpecIndex>> {
        self.root_index.read().clone()
    }

    /// Gets the errors caught across every index.
    pub fn caught_errors(&self) -> Vec<Arc<IndexError>> {
        self.caught_errors.lock().clone()
    }

    /// Gets the aggregated cycles whose loop-closing reference is optional.
    pub fn get_safe_circular_references(&self) -> Vec<Arc<CircularReferenceResult>> {
        self.safe_circular.lock().clone()
    }

    /// Gets the aggregated cycles whose every edge is required.
    pub fn get_infinite_circular_references(&self) -> Vec<Arc<CircularReferenceResult>> {
        self.infinite_circular.lock().clone()
    }

    /// Gets the aggregated cycles suppressed by configuration,
    /// deduplicated by loop-point definition.
    pub fn get_ignored_circular_references(&self) -> Vec<Arc<CircularReferenceResult>> {
        self.ignored_circular.lock().clone()
    }

    /// Gets the wall-clock duration of the last indexing run.
    pub fn indexing_duration(&self) -> Duration {
        *self.indexing_duration.lock()
    }

    /// Gets the total line count of every indexed document.
    pub fn total_line_count(&self) -> usize {
        self.line_count.load(Ordering::Relaxed)
    }
}
