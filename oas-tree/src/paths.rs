//! Composition of document-relative file paths into absolute keys.

use std::fmt;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use path_clean::PathClean;

/// An error composing a file path from a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposeError {
    /// The reference contains a backslash on a platform where it is not the
    /// native separator.
    BackslashInPath(String),
    /// The reference contains an invalid percent escape.
    InvalidPercentEncoding(String),
}

impl fmt::Display for ComposeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComposeError::BackslashInPath(s) => {
                write!(f, "backslashes are not valid in references: `{s}`")
            }
            ComposeError::InvalidPercentEncoding(s) => {
                write!(f, "invalid percent encoding in reference: `{s}`")
            }
        }
    }
}

impl std::error::Error for ComposeError {}

/// Composes an absolute, lexically cleaned path for a file reference.
///
/// `dir` is the directory of the document the reference was discovered in.
/// Relative references are joined against it; absolute references are
/// cleaned as-is. Percent-encoded characters in the reference are decoded
/// first.
///
/// When the first segment of a relative reference repeats the final segment
/// of `dir`, the join is taken against the parent of `dir` instead so the
/// base segment is not doubled (documents under `specs/` routinely refer to
/// siblings as `specs/other.yaml`).
pub fn compose(dir: &Path, reference: &str) -> Result<PathBuf, ComposeError> {
    if !cfg!(windows) && reference.contains('\\') {
        return Err(ComposeError::BackslashInPath(reference.to_string()));
    }

    let decoded = decode_path(reference)?;
    let referenced = Path::new(&decoded);
    if referenced.is_absolute() {
        return Ok(referenced.clean());
    }

    let base = match (first_normal_segment(referenced), dir.file_name()) {
        (Some(first), Some(last)) if first == last => dir.parent().unwrap_or(dir),
        _ => dir,
    };

    Ok(base.join(referenced).clean())
}

/// Percent-decodes a path, validating escapes.
fn decode_path(path: &str) -> Result<String, ComposeError> {
    if !path.contains('%') {
        return Ok(path.to_string());
    }

    crate::pointer::percent_decode(path)
        .map_err(|_| ComposeError::InvalidPercentEncoding(path.to_string()))
}

/// Gets the first `Normal` component of a path, if any.
fn first_normal_segment(path: &Path) -> Option<&std::ffi::OsStr> {
    path.components().find_map(|c| match c {
        Component::Normal(s) => Some(s),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn it_joins_relative_references() {
        assert_eq!(
            compose(Path::new("/specs/api"), "common.yaml").expect("should compose"),
            PathBuf::from("/specs/api/common.yaml")
        );
        assert_eq!(
            compose(Path::new("/specs/api"), "../shared/common.yaml").expect("should compose"),
            PathBuf::from("/specs/shared/common.yaml")
        );
    }

    #[test]
    fn it_keeps_absolute_references() {
        assert_eq!(
            compose(Path::new("/specs"), "/other/root.yaml").expect("should compose"),
            PathBuf::from("/other/root.yaml")
        );
    }

    #[test]
    fn it_avoids_doubling_the_base_segment() {
        assert_eq!(
            compose(Path::new("/root/specs"), "specs/common.yaml").expect("should compose"),
            PathBuf::from("/root/specs/common.yaml")
        );
    }

    #[test]
    fn it_decodes_percent_encoded_components() {
        assert_eq!(
            compose(Path::new("/specs"), "my%20file.yaml").expect("should compose"),
            PathBuf::from("/specs/my file.yaml")
        );
        assert!(matches!(
            compose(Path::new("/specs"), "bad%2xfile.yaml"),
            Err(ComposeError::InvalidPercentEncoding(_))
        ));
    }

    #[cfg(not(windows))]
    #[test]
    fn it_rejects_backslashes() {
        assert!(matches!(
            compose(Path::new("/specs"), "a\\b.yaml"),
            Err(ComposeError::BackslashInPath(_))
        ));
    }
}
