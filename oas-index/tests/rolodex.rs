//! Multi-document rolodex scenarios over filesystem fixtures.

use std::path::Path;
use std::sync::Arc;

use oas_index::ErrorKind;
use oas_index::IndexConfig;
use oas_index::Rolodex;
use oas_tree::resolve_pointer;
use pretty_assertions::assert_eq;

/// Writes the given files into a temp directory.
fn fixture(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("should create temp dir");
    for (name, content) in files {
        std::fs::write(dir.path().join(name), content).expect("should write fixture");
    }
    dir
}

/// Builds and indexes a rolodex rooted at `root_name` inside the fixture
/// directory.
fn indexed(dir: &Path, root_name: &str, mut config: IndexConfig) -> Rolodex {
    let root_path = dir.join(root_name);
    config.spec_absolute_path = root_path.to_string_lossy().into_owned();

    let rolodex = Rolodex::new(config);
    rolodex.add_local_source(dir);
    rolodex
        .set_root_source(&std::fs::read_to_string(&root_path).expect("root should read"))
        .expect("root should parse");
    rolodex.index_the_rolodex().expect("indexing should succeed");
    rolodex
}

/// The three-document chain: `a.yaml` → `b.yaml#/X` → `c.yaml#/Y`.
const CHAIN: &[(&str, &str)] = &[
    (
        "a.yaml",
        "openapi: 3.1.0\ninfo:\n  title: a\n  version: 1.0.0\ncomponents:\n  schemas:\n    A:\n      $ref: 'b.yaml#/X'\n",
    ),
    ("b.yaml", "X:\n  $ref: 'c.yaml#/Y'\n"),
    ("c.yaml", "Y:\n  type: string\n  description: why\n"),
];

#[test]
fn it_indexes_a_multi_file_chain() {
    let dir = fixture(CHAIN);
    let rolodex = indexed(dir.path(), "a.yaml", IndexConfig {
        skip_document_check: true,
        ..IndexConfig::default()
    });

    // One index per document, root first.
    let indexes = rolodex.indexes();
    assert_eq!(indexes.len(), 3);
    assert!(indexes[0].is_root());

    // The second lookup of an opened document is served from the cache.
    let c_path = dir.path().join("c.yaml");
    let first = rolodex
        .open(&c_path.to_string_lossy())
        .expect("c should open");
    let second = rolodex
        .open(&c_path.to_string_lossy())
        .expect("c should open again");
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn it_splices_across_documents_by_identity() {
    let dir = fixture(CHAIN);
    let rolodex = indexed(dir.path(), "a.yaml", IndexConfig {
        skip_document_check: true,
        ..IndexConfig::default()
    });

    let errors = rolodex.resolve();
    assert_eq!(errors.len(), 0);

    let root = rolodex.root_document().expect("root should exist");
    let c = rolodex
        .open(&dir.path().join("c.yaml").to_string_lossy())
        .expect("c should open");

    let arena = rolodex.arena().read();
    let a_site = resolve_pointer(&arena, root.root(), "/components/schemas/A")
        .expect("A should resolve");
    let y = resolve_pointer(&arena, c.root(), "/Y").expect("Y should resolve");

    // Two splices deep: the root's reference node shares its child list
    // with `c.yaml`'s `Y` node.
    assert!(!arena.get(y).children().is_empty());
    assert_eq!(arena.get(a_site).children(), arena.get(y).children());
}

#[test]
fn it_resolves_relative_references_between_siblings() {
    let dir = fixture(&[
        (
            "root.yaml",
            "openapi: 3.1.0\ninfo:\n  title: root\n  version: 1.0.0\ncomponents:\n  schemas:\n    Use:\n      $ref: 'common.yaml#/Shared'\n",
        ),
        (
            "common.yaml",
            "$schema: https://json-schema.org/draft/2020-12/schema\nShared:\n  type: object\n  properties:\n    tag:\n      $ref: '#/Tag'\nTag:\n  type: string\n",
        ),
    ]);
    let rolodex = indexed(dir.path(), "root.yaml", IndexConfig::default());

    // The sibling's local reference is qualified with its own absolute
    // key, not the root's.
    let common_key = dir.path().join("common.yaml");
    let common = rolodex
        .open(&common_key.to_string_lossy())
        .expect("common should open");
    let index = common.index().expect("common should be indexed");

    let sequenced = index.get_mapped_references_sequenced();
    assert_eq!(sequenced.len(), 1);
    assert_eq!(
        sequenced[0].full_definition(),
        format!("{key}#/Tag", key = common_key.to_string_lossy())
    );

    assert_eq!(rolodex.caught_errors().len(), 0);
    assert_eq!(rolodex.resolve().len(), 0);
}

#[test]
fn it_refuses_file_lookups_when_disabled() {
    let dir = fixture(CHAIN);
    let rolodex = indexed(dir.path(), "a.yaml", IndexConfig {
        allow_file_lookup: false,
        skip_document_check: true,
        ..IndexConfig::default()
    });

    let forbidden: Vec<_> = rolodex
        .caught_errors()
        .into_iter()
        .filter(|e| e.kind() == ErrorKind::LookupForbidden)
        .collect();
    assert!(!forbidden.is_empty(), "file lookups should be refused");
}

#[test]
fn it_refuses_remote_lookups_when_disabled() {
    let dir = fixture(&[(
        "root.yaml",
        "openapi: 3.1.0\ninfo:\n  title: root\n  version: 1.0.0\ncomponents:\n  schemas:\n    Remote:\n      $ref: 'https://example.com/specs/common.yaml#/X'\n",
    )]);
    let rolodex = indexed(dir.path(), "root.yaml", IndexConfig {
        allow_remote_lookup: false,
        ..IndexConfig::default()
    });

    let forbidden: Vec<_> = rolodex
        .caught_errors()
        .into_iter()
        .filter(|e| e.kind() == ErrorKind::LookupForbidden)
        .collect();
    assert!(!forbidden.is_empty(), "remote lookups should be refused");
}

#[test]
fn it_sniffs_extensionless_documents_when_enabled() {
    let dir = fixture(&[
        (
            "root.yaml",
            "openapi: 3.1.0\ninfo:\n  title: root\n  version: 1.0.0\ncomponents:\n  schemas:\n    Use:\n      $ref: 'commonfile#/Shared'\n",
        ),
        ("commonfile", "Shared:\n  type: object\nOther:\n  type: string\n"),
    ]);
    let rolodex = indexed(dir.path(), "root.yaml", IndexConfig {
        allow_unknown_extension_content_detection: true,
        skip_document_check: true,
        ..IndexConfig::default()
    });

    assert_eq!(
        rolodex
            .caught_errors()
            .iter()
            .filter(|e| e.kind() != ErrorKind::IndexingFailure)
            .count(),
        0,
        "the extensionless document should be admitted by the sniffer"
    );
    assert_eq!(rolodex.resolve().len(), 0);
}

#[test]
fn it_counts_lines_and_records_duration() {
    let dir = fixture(CHAIN);
    let rolodex = indexed(dir.path(), "a.yaml", IndexConfig {
        skip_document_check: true,
        ..IndexConfig::default()
    });

    // Six lines in a.yaml, two each in b.yaml and c.yaml... the exact sum
    // matters less than the counter covering every document.
    assert!(rolodex.total_line_count() >= 10);
    assert!(rolodex.indexing_duration() > std::time::Duration::ZERO);
}

#[test]
fn it_is_idempotent_across_repeated_indexing_and_resolution() {
    let dir = fixture(CHAIN);
    let rolodex = indexed(dir.path(), "a.yaml", IndexConfig {
        skip_document_check: true,
        ..IndexConfig::default()
    });

    rolodex
        .index_the_rolodex()
        .expect("re-indexing should be a no-op");
    assert_eq!(rolodex.indexes().len(), 3);

    let first = rolodex.resolve();
    assert_eq!(first.len(), 0);

    let snapshot: Vec<Vec<oas_tree::NodeId>> = {
        let root = rolodex.root_document().expect("root should exist");
        let arena = rolodex.arena().read();
        let a_site = resolve_pointer(&arena, root.root(), "/components/schemas/A")
            .expect("A should resolve");
        vec![arena.get(a_site).children().to_vec()]
    };

    // Resolving twice changes nothing.
    let second = rolodex.resolve();
    assert_eq!(second.len(), 0);
    {
        let root = rolodex.root_document().expect("root should exist");
        let arena = rolodex.arena().read();
        let a_site = resolve_pointer(&arena, root.root(), "/components/schemas/A")
            .expect("A should resolve");
        assert_eq!(vec![arena.get(a_site).children().to_vec()], snapshot);
    }
}
