//! Configuration for indexing and resolution.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::FileHandler;
use crate::RemoteHandler;

/// The file extensions admitted by default when enumerating local sources.
pub const DEFAULT_ADMITTED_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Configuration for a [`crate::Rolodex`] and the [`crate::SpecIndex`]es it
/// builds.
///
/// The rolodex clones this record once per document, overriding
/// `spec_absolute_path` (and setting `avoid_build_index`) for the per-file
/// indexing workers.
#[derive(Clone)]
pub struct IndexConfig {
    /// Permits opening local documents for external `$ref`s.
    ///
    /// When false, file lookups return a lookup-forbidden error.
    pub allow_file_lookup: bool,
    /// Permits opening remote (URL) documents for external `$ref`s.
    ///
    /// When false, remote lookups return a lookup-forbidden error.
    pub allow_remote_lookup: bool,
    /// Skips the OpenAPI document sanity pre-check, accepting any YAML/JSON.
    pub skip_document_check: bool,
    /// Routes polymorphic cycles to the ignored list instead of the
    /// circular list.
    pub ignore_polymorphic_circular_references: bool,
    /// Routes array cycles to the ignored list instead of the circular
    /// list.
    pub ignore_array_circular_references: bool,
    /// Skips the cycle-check step entirely.
    pub avoid_circular_reference_check: bool,
    /// Performs reference discovery only, deferring catalog building.
    ///
    /// The rolodex sets this on the per-file config it hands to parallel
    /// indexing workers; the deferred build happens in the serial phase.
    pub avoid_build_index: bool,
    /// The root directory for resolving relative file references.
    ///
    /// When set and no local source has been registered explicitly, the
    /// rolodex registers a local source rooted here before indexing.
    pub base_path: Option<PathBuf>,
    /// The base URL for resolving relative remote references.
    ///
    /// When set on a remote source, the scheme and host of every inbound
    /// URL are rewritten to this base, preserving the path.
    pub base_url: Option<Url>,
    /// The absolute key of the root document.
    pub spec_absolute_path: String,
    /// Enables content-type sniffing for files with unknown extensions.
    pub allow_unknown_extension_content_detection: bool,
    /// Forces serial reference extraction.
    ///
    /// Debugging aid; the observable output is unchanged.
    pub extract_refs_sequentially: bool,
    /// Uses a fast structural hash to deduplicate identical inline schemas.
    pub use_schema_quick_hash: bool,
    /// Retains `summary` and `description` keys found alongside a `$ref`,
    /// per OpenAPI 3.1 sibling semantics.
    pub transform_sibling_refs: bool,
    /// Indexes references found under `x-*` extension keys.
    pub index_extension_refs: bool,
    /// The file extensions admitted when enumerating local sources.
    ///
    /// Extensions are compared without their leading dot. Files with other
    /// extensions are silently skipped.
    pub admitted_extensions: Vec<String>,
    /// A pluggable URL fetcher for remote documents.
    ///
    /// When `None`, a default reqwest-backed handler is constructed on
    /// first use.
    pub remote_handler: Option<Arc<dyn RemoteHandler>>,
    /// A pluggable file opener honoring a relative-path-only contract.
    ///
    /// When `None`, local sources read through the operating system
    /// filesystem rooted at their base directory.
    pub fs_handler: Option<Arc<dyn FileHandler>>,
    /// Cancels outstanding opens, fetches and indexing work when
    /// triggered.
    pub cancellation: CancellationToken,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            allow_file_lookup: true,
            allow_remote_lookup: true,
            skip_document_check: false,
            ignore_polymorphic_circular_references: false,
            ignore_array_circular_references: false,
            avoid_circular_reference_check: false,
            avoid_build_index: false,
            base_path: None,
            base_url: None,
            spec_absolute_path: String::new(),
            allow_unknown_extension_content_detection: false,
            extract_refs_sequentially: false,
            use_schema_quick_hash: false,
            transform_sibling_refs: false,
            index_extension_refs: false,
            admitted_extensions: DEFAULT_ADMITTED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            remote_handler: None,
            fs_handler: None,
            cancellation: CancellationToken::new(),
        }
    }
}

impl fmt::Debug for IndexConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexConfig")
            .field("allow_file_lookup", &self.allow_file_lookup)
            .field("allow_remote_lookup", &self.allow_remote_lookup)
            .field("skip_document_check", &self.skip_document_check)
            .field(
                "ignore_polymorphic_circular_references",
                &self.ignore_polymorphic_circular_references,
            )
            .field(
                "ignore_array_circular_references",
                &self.ignore_array_circular_references,
            )
            .field(
                "avoid_circular_reference_check",
                &self.avoid_circular_reference_check,
            )
            .field("avoid_build_index", &self.avoid_build_index)
            .field("base_path", &self.base_path)
            .field("base_url", &self.base_url)
            .field("spec_absolute_path", &self.spec_absolute_path)
            .field(
                "allow_unknown_extension_content_detection",
                &self.allow_unknown_extension_content_detection,
            )
            .field("extract_refs_sequentially", &self.extract_refs_sequentially)
            .field("use_schema_quick_hash", &self.use_schema_quick_hash)
            .field("transform_sibling_refs", &self.transform_sibling_refs)
            .field("index_extension_refs", &self.index_extension_refs)
            .field("admitted_extensions", &self.admitted_extensions)
            .field("remote_handler", &self.remote_handler.is_some())
            .field("fs_handler", &self.fs_handler.is_some())
            .finish_non_exhaustive()
    }
}

impl IndexConfig {
    /// Sets the absolute key of the root document.
    pub fn with_spec_absolute_path(mut self, path: impl Into<String>) -> Self {
        self.spec_absolute_path = path.into();
        self
    }

    /// Sets the root directory for resolving relative file references.
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Sets the base URL for resolving relative remote references.
    pub fn with_base_url(mut self, url: Url) -> Self {
        self.base_url = Some(url);
        self
    }

    /// Routes array cycles to the ignored list.
    pub fn with_ignore_array_circular_references(mut self, ignore: bool) -> Self {
        self.ignore_array_circular_references = ignore;
        self
    }

    /// Routes polymorphic cycles to the ignored list.
    pub fn with_ignore_polymorphic_circular_references(mut self, ignore: bool) -> Self {
        self.ignore_polymorphic_circular_references = ignore;
        self
    }

    /// Sets the pluggable URL fetcher for remote documents.
    pub fn with_remote_handler(mut self, handler: Arc<dyn RemoteHandler>) -> Self {
        self.remote_handler = Some(handler);
        self
    }

    /// Sets the pluggable file opener for local documents.
    pub fn with_fs_handler(mut self, handler: Arc<dyn FileHandler>) -> Self {
        self.fs_handler = Some(handler);
        self
    }

    /// Determines if a file name carries an admitted extension.
    pub(crate) fn admits_extension(&self, name: &std::path::Path) -> bool {
        match name.extension().and_then(|e| e.to_str()) {
            Some(ext) => self
                .admitted_extensions
                .iter()
                .any(|admitted| admitted.eq_ignore_ascii_case(ext)),
            None => self.allow_unknown_extension_content_detection,
        }
    }
}
