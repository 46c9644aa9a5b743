//! The local filesystem document source.

use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::bail;
use indexmap::IndexMap;
use oas_tree::NodeArena;
use oas_tree::load_source;
use parking_lot::RwLock;
use path_clean::PathClean;
use tracing::debug;
use walkdir::WalkDir;

use crate::ContentType;
use crate::Document;
use crate::ErrorKind;
use crate::IndexConfig;
use crate::IndexError;
use crate::detect;
use crate::source::OpenResult;
use crate::source::SingleFlight;

/// Opens files for a local source.
///
/// Implementations only accept relative paths; the source converts
/// absolute paths that lie within its base directory before calling in.
pub trait FileHandler: fmt::Debug + Send + Sync {
    /// Reads the file at the given relative path.
    fn read(&self, path: &Path) -> anyhow::Result<String>;
}

/// The default file handler, reading through the operating system
/// filesystem rooted at a base directory.
#[derive(Debug)]
struct OsFileHandler {
    /// The directory reads are rooted at.
    base: PathBuf,
}

impl FileHandler for OsFileHandler {
    fn read(&self, path: &Path) -> anyhow::Result<String> {
        if path.is_absolute() {
            bail!(
                "file handler paths must be relative, got `{path}`",
                path = path.display()
            );
        }

        std::fs::read_to_string(self.base.join(path))
            .with_context(|| format!("failed to read `{path}`", path = path.display()))
    }
}

/// A document source rooted at a local directory.
///
/// Files are keyed by absolute, lexically cleaned path; concurrent opens of
/// the same key are single-flighted.
#[derive(Debug)]
pub struct LocalSource {
    /// The absolute base directory of the source.
    base: PathBuf,
    /// The configuration of the owning rolodex.
    config: Arc<IndexConfig>,
    /// The shared node arena documents are parsed into.
    arena: Arc<RwLock<NodeArena>>,
    /// The file handler reads go through.
    handler: Arc<dyn FileHandler>,
    /// The admitted files enumerated under the base directory.
    files: Vec<PathBuf>,
    /// Opened documents by absolute key.
    documents: RwLock<IndexMap<String, Arc<Document>>>,
    /// In-progress opens by absolute key.
    flights: SingleFlight,
}

impl LocalSource {
    /// Constructs a new local source rooted at the given directory.
    ///
    /// Files under the directory carrying an admitted extension are
    /// enumerated eagerly (in sorted order); nothing is opened or parsed
    /// until [`LocalSource::open`] is called.
    pub fn new(
        base: impl Into<PathBuf>,
        config: Arc<IndexConfig>,
        arena: Arc<RwLock<NodeArena>>,
    ) -> Self {
        let base = base.into().clean();
        let handler = config.fs_handler.clone().unwrap_or_else(|| {
            Arc::new(OsFileHandler { base: base.clone() }) as Arc<dyn FileHandler>
        });

        let mut files: Vec<PathBuf> = WalkDir::new(&base)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| config.admits_extension(path))
            .collect();
        files.sort();

        debug!(
            "local source `{base}` enumerated {count} files",
            base = base.display(),
            count = files.len()
        );

        Self {
            base,
            config,
            arena,
            handler,
            files,
            documents: RwLock::new(IndexMap::new()),
            flights: SingleFlight::default(),
        }
    }

    /// Gets the absolute base directory of the source.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Gets the admitted files enumerated under the base directory.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Gets every document the source has opened.
    pub fn documents(&self) -> Vec<Arc<Document>> {
        self.documents.read().values().cloned().collect()
    }

    /// Gets an already-opened document by absolute key.
    pub fn document(&self, key: &str) -> Option<Arc<Document>> {
        self.documents.read().get(key).cloned()
    }

    /// Opens a document by name.
    ///
    /// Relative names resolve against the base directory. The open is
    /// cached by absolute key and single-flighted across concurrent
    /// callers.
    pub fn open(&self, name: &Path) -> OpenResult {
        if self.config.cancellation.is_cancelled() {
            return Err(Arc::new(IndexError::new(
                ErrorKind::DocumentOpenFailed,
                format!("open of `{name}` cancelled", name = name.display()),
            )));
        }

        let absolute = if name.is_absolute() {
            name.to_path_buf().clean()
        } else {
            self.base.join(name).clean()
        };
        let key = absolute.to_string_lossy().into_owned();

        if let Some(document) = self.document(&key) {
            return Ok(document);
        }

        self.flights.run(&key, || {
            // A racing open may have completed between the cache check and
            // the flight start.
            if let Some(document) = self.document(&key) {
                return Ok(document);
            }

            let document = self.read_document(name, &absolute, &key)?;
            self.documents
                .write()
                .insert(key.clone(), document.clone());
            Ok(document)
        })
    }

    /// Reads, detects and parses a document.
    fn read_document(
        &self,
        name: &Path,
        absolute: &Path,
        key: &str,
    ) -> Result<Arc<Document>, Arc<IndexError>> {
        // The handler contract forbids absolute paths; relativize against
        // the base first and fall back to the name as given.
        let text = match absolute.strip_prefix(&self.base) {
            Ok(relative) => self.handler.read(relative),
            Err(_) => self.handler.read(name),
        }
        .map_err(|e| {
            Arc::new(
                IndexError::new(
                    ErrorKind::DocumentOpenFailed,
                    format!("unable to open local document `{key}`"),
                )
                .with_source(e),
            )
        })?;

        let content_type = detect(
            key,
            &text,
            self.config.allow_unknown_extension_content_detection,
        );
        if content_type == ContentType::Unsupported {
            return Err(Arc::new(IndexError::new(
                ErrorKind::DocumentUnsupported,
                format!("local document `{key}` is not YAML or JSON"),
            )));
        }

        let line_count = text.lines().count();

        // Parse outside the shared arena's write lock; absorbing the
        // scratch arena is a short move.
        let mut scratch = NodeArena::new();
        let root = load_source(&mut scratch, &text).map_err(|e| {
            Arc::new(
                IndexError::new(
                    ErrorKind::IndexingFailure,
                    format!("unable to parse local document `{key}`: {e}"),
                )
                .with_position(e.line(), e.column()),
            )
        })?;
        let root = self.arena.write().absorb(scratch, root);

        debug!("opened local document `{key}` ({line_count} lines)");
        Ok(Arc::new(Document::new(
            key,
            content_type,
            root,
            line_count,
            None,
        )))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    /// Creates a source over a temp directory with the given files.
    fn fixture(files: &[(&str, &str)]) -> (tempfile::TempDir, LocalSource) {
        let dir = tempfile::tempdir().expect("should create temp dir");
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).expect("should write");
        }
        let source = LocalSource::new(
            dir.path(),
            Arc::new(IndexConfig::default()),
            Arc::new(RwLock::new(NodeArena::new())),
        );
        (dir, source)
    }

    #[test]
    fn it_enumerates_admitted_extensions_only() {
        let (_dir, source) = fixture(&[
            ("a.yaml", "a: 1\n"),
            ("b.json", "{}\n"),
            ("c.txt", "not admitted\n"),
        ]);
        let names: Vec<_> = source
            .files()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.yaml", "b.json"]);
    }

    #[test]
    fn it_caches_documents_by_absolute_key() {
        let (_dir, source) = fixture(&[("a.yaml", "a: 1\n")]);
        let first = source.open(Path::new("a.yaml")).expect("should open");
        let second = source.open(Path::new("a.yaml")).expect("should open");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.documents().len(), 1);
    }

    #[test]
    fn it_fails_on_missing_files() {
        let (_dir, source) = fixture(&[]);
        let e = source.open(Path::new("missing.yaml")).expect_err("should fail");
        assert_eq!(e.kind(), ErrorKind::DocumentOpenFailed);
    }

    #[test]
    fn it_rejects_unsupported_content() {
        let (_dir, source) = fixture(&[("notes.txt", "hello\n")]);
        let e = source.open(Path::new("notes.txt")).expect_err("should fail");
        assert_eq!(e.kind(), ErrorKind::DocumentUnsupported);
    }
}
