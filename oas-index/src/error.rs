//! Structured errors surfaced by indexing and resolution.

use std::fmt;
use std::sync::Arc;

use crate::CircularReferenceResult;

/// Represents the kind of an [`IndexError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A `$ref` target was not found in any opened document.
    ReferenceMissing,
    /// A `$ref` string is malformed: a backslash, an invalid percent
    /// escape, or an empty pointer.
    ReferenceMalformed,
    /// An I/O or network failure opening a document.
    DocumentOpenFailed,
    /// Content-type detection classified a document as unsupported.
    DocumentUnsupported,
    /// Policy denied a file or remote lookup.
    LookupForbidden,
    /// A cycle whose edges are all required.
    CircularInfinite,
    /// A component-extraction failure attributable to malformed input.
    IndexingFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ReferenceMissing => "reference missing",
            ErrorKind::ReferenceMalformed => "reference malformed",
            ErrorKind::DocumentOpenFailed => "document open failed",
            ErrorKind::DocumentUnsupported => "document unsupported",
            ErrorKind::LookupForbidden => "lookup forbidden",
            ErrorKind::CircularInfinite => "infinite circular reference",
            ErrorKind::IndexingFailure => "indexing failure",
        };
        f.write_str(s)
    }
}

/// A structured error produced while indexing or resolving documents.
///
/// Renders as `"<msg>: <path> [<line>:<col>]"`, dropping the location
/// portions that are not known.
#[derive(Debug)]
pub struct IndexError {
    /// The kind of the error.
    kind: ErrorKind,
    /// The error message.
    message: String,
    /// The JSON-path-like location of the error within its document.
    path: String,
    /// The one-based source line, or zero when unknown.
    line: u32,
    /// The one-based source column, or zero when unknown.
    column: u32,
    /// The underlying error, if any.
    source: Option<anyhow::Error>,
    /// The cycle that produced the error, for circular-reference kinds.
    circular: Option<Arc<CircularReferenceResult>>,
}

impl IndexError {
    /// Creates a new error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            path: String::new(),
            line: 0,
            column: 0,
            source: None,
            circular: None,
        }
    }

    /// Sets the JSON-path-like location of the error.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the source position of the error.
    pub fn with_position(mut self, line: u32, column: u32) -> Self {
        self.line = line;
        self.column = column;
        self
    }

    /// Sets the underlying error.
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets the cycle that produced the error.
    pub fn with_circular(mut self, circular: Arc<CircularReferenceResult>) -> Self {
        self.circular = Some(circular);
        self
    }

    /// Gets the kind of the error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Gets the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Gets the JSON-path-like location of the error.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Gets the one-based source line, or zero when unknown.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Gets the one-based source column, or zero when unknown.
    pub fn column(&self) -> u32 {
        self.column
    }

    /// Gets the cycle that produced the error, for circular kinds.
    pub fn circular(&self) -> Option<&Arc<CircularReferenceResult>> {
        self.circular.as_ref()
    }
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{message}", message = self.message)?;
        if !self.path.is_empty() {
            write!(f, ": {path}", path = self.path)?;
        }
        if self.line > 0 {
            write!(f, " [{line}:{column}]", line = self.line, column = self.column)?;
        }
        Ok(())
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}
