//! JSON pointer encoding, decoding and resolution.

use std::fmt;

use crate::NodeArena;
use crate::NodeId;
use crate::NodeKind;

/// An error decoding a JSON pointer segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerError {
    /// A `~` escape other than `~0` or `~1` was found.
    InvalidEscape(String),
    /// A `%` sequence was not followed by two hex digits.
    InvalidPercentEncoding(String),
}

impl fmt::Display for PointerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointerError::InvalidEscape(s) => {
                write!(f, "invalid JSON pointer escape in `{s}`")
            }
            PointerError::InvalidPercentEncoding(s) => {
                write!(f, "invalid percent encoding in `{s}`")
            }
        }
    }
}

impl std::error::Error for PointerError {}

/// Encodes a single JSON pointer segment per RFC 6901.
pub fn encode_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Decodes a single JSON pointer segment per RFC 6901.
///
/// Percent-encoded characters are decoded before the `~1`/`~0` escapes are
/// applied, matching how pointers travel inside URL fragments.
pub fn decode_segment(segment: &str) -> Result<String, PointerError> {
    let decoded = percent_decode(segment)?;

    let mut out = String::with_capacity(decoded.len());
    let mut chars = decoded.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }

        match chars.next() {
            Some('0') => out.push('~'),
            Some('1') => out.push('/'),
            _ => return Err(PointerError::InvalidEscape(segment.to_string())),
        }
    }

    Ok(out)
}

/// Percent-decodes the input, validating that every `%` begins a two-digit
/// hex escape.
pub(crate) fn percent_decode(s: &str) -> Result<String, PointerError> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 3 > bytes.len()
                || !bytes[i + 1].is_ascii_hexdigit()
                || !bytes[i + 2].is_ascii_hexdigit()
            {
                return Err(PointerError::InvalidPercentEncoding(s.to_string()));
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    urlencoding::decode(s)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| PointerError::InvalidPercentEncoding(s.to_string()))
}

/// Splits a reference string into its document part and pointer fragment.
///
/// The split happens exactly once, on the first `#`.
pub fn split_fragment(reference: &str) -> (&str, Option<&str>) {
    match reference.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (reference, None),
    }
}

/// Converts a JSON pointer fragment into a JSON-path-like expression.
///
/// Used for human-readable locations in error messages, e.g.
/// `#/components/schemas/Obj` becomes `$.components.schemas.Obj` and
/// sequence indices render as `[n]`.
pub fn pointer_to_path(pointer: &str) -> String {
    let pointer = pointer.strip_prefix('#').unwrap_or(pointer);
    let mut path = String::from("$");
    for segment in pointer.split('/').filter(|s| !s.is_empty()) {
        let segment = decode_segment(segment).unwrap_or_else(|_| segment.to_string());
        if segment.bytes().all(|b| b.is_ascii_digit()) {
            path.push_str(&format!("[{segment}]"));
        } else if segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            path.push('.');
            path.push_str(&segment);
        } else {
            path.push_str(&format!("['{segment}']"));
        }
    }

    path
}

/// Resolves a JSON pointer against a node in the arena.
///
/// An empty pointer yields the root's content node. Mapping lookups search
/// direct children; sequence lookups parse the segment as an index.
pub fn resolve_pointer(arena: &NodeArena, root: NodeId, pointer: &str) -> Option<NodeId> {
    let pointer = pointer.strip_prefix('#').unwrap_or(pointer);
    let mut current = arena.content(root);

    for segment in pointer.split('/').skip_while(|s| s.is_empty()) {
        let segment = decode_segment(segment).ok()?;
        current = arena.content(current);
        current = match arena.get(current).kind() {
            NodeKind::Mapping => arena.sibling_value(current, &segment)?,
            NodeKind::Sequence => {
                let index: usize = segment.parse().ok()?;
                *arena.get(current).children().get(index)?
            }
            _ => return None,
        };
    }

    Some(arena.content(current))
}
