//! Content-type detection for opened documents.

use std::fmt;
use std::path::Path;

/// The maximum number of bytes the sniffer inspects.
const SNIFF_LIMIT: usize = 1024;

/// The number of `key: value` lines required to classify unknown content
/// as YAML.
const YAML_LINE_THRESHOLD: usize = 2;

/// The detected content type of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    /// The document is YAML.
    Yaml,
    /// The document is JSON.
    Json,
    /// The document is neither YAML nor JSON.
    Unsupported,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContentType::Yaml => "yaml",
            ContentType::Json => "json",
            ContentType::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

/// Detects the content type of a named document.
///
/// The file extension decides when it is recognized; otherwise the sniffer
/// runs if `allow_sniffing` is set, and the document is unsupported if not.
pub fn detect(name: &str, content: &str, allow_sniffing: bool) -> ContentType {
    match detect_from_extension(name) {
        Some(ty) => ty,
        None if allow_sniffing => sniff(content),
        None => ContentType::Unsupported,
    }
}

/// Detects a content type from a file extension alone.
///
/// Returns `None` when the extension is missing or unrecognized.
pub fn detect_from_extension(name: &str) -> Option<ContentType> {
    let ext = Path::new(name).extension()?.to_str()?;
    if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") {
        Some(ContentType::Yaml)
    } else if ext.eq_ignore_ascii_case("json") {
        Some(ContentType::Json)
    } else {
        None
    }
}

/// Sniffs content with an unknown extension.
///
/// Inspects up to 1 KB: content opening with `{` or `[` is JSON; otherwise
/// the first ten lines are scanned for `key: value` shapes, and two or more
/// matches classify the content as YAML.
pub fn sniff(content: &str) -> ContentType {
    let mut end = content.len().min(SNIFF_LIMIT);
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    let window = &content[..end];

    match window.trim_start().as_bytes().first() {
        Some(b'{') | Some(b'[') => return ContentType::Json,
        _ => {}
    }

    let matches = window
        .lines()
        .take(10)
        .filter(|line| is_yaml_key_line(line))
        .count();

    if matches >= YAML_LINE_THRESHOLD {
        ContentType::Yaml
    } else {
        ContentType::Unsupported
    }
}

/// Determines if a line looks like a YAML `key: value` entry.
///
/// URL-like keys and keys containing `/` or whitespace are excluded so
/// prose containing colons does not read as YAML.
fn is_yaml_key_line(line: &str) -> bool {
    let line = line.trim_start().strip_prefix("- ").unwrap_or(line.trim_start());
    let Some((key, rest)) = line.split_once(':') else {
        return false;
    };

    if key.is_empty()
        || key.contains('/')
        || key.contains(char::is_whitespace)
        || rest.starts_with("//")
    {
        return false;
    }

    rest.is_empty() || rest.starts_with(' ')
}
