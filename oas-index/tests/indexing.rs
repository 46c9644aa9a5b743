//! Index construction scenarios: discovery, determinism, catalogs and
//! error surfacing.

use oas_index::ErrorKind;
use oas_index::IndexConfig;
use oas_index::Rolodex;
use pretty_assertions::assert_eq;

/// Indexes the given root document with the given configuration.
fn indexed(source: &str, config: IndexConfig) -> Rolodex {
    let rolodex = Rolodex::new(config.with_spec_absolute_path("/specs/root.yaml"));
    rolodex.set_root_source(source).expect("root should parse");
    rolodex.index_the_rolodex().expect("indexing should succeed");
    rolodex
}

/// A document holding one unresolvable reference.
const MISSING_REF: &str = r#"
openapi: 3.0.0
info:
  title: missing
  version: 1.0.0
components:
  schemas:
    Bad:
      type: object
      properties:
        thing:
          $ref: 'go home, I am drunk'
"#;

#[test]
fn it_surfaces_missing_references_without_aborting() {
    let rolodex = indexed(MISSING_REF, IndexConfig::default());
    let index = rolodex.root_index().expect("root index should exist");

    let errors = index.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind(), ErrorKind::ReferenceMissing);
    assert!(
        errors[0]
            .to_string()
            .starts_with("cannot resolve reference 'go home, I am drunk', it's missing:"),
        "unexpected rendering: {rendered}",
        rendered = errors[0]
    );

    // The failed reference never lands in the mapped set.
    assert_eq!(index.get_mapped_references_sequenced().len(), 0);

    // The resolver reports the same miss, once.
    let resolving = rolodex.resolve();
    assert_eq!(resolving.len(), 1);
    assert!(
        resolving[0]
            .to_string()
            .starts_with("cannot resolve reference 'go home, I am drunk', it's missing:")
    );
}

/// A document sighting the same definition from two sites.
const REPEATED_REF: &str = r#"
openapi: 3.1.0
info:
  title: repeated
  version: 1.0.0
paths:
  /a:
    get:
      responses:
        '200':
          content:
            application/json:
              schema:
                $ref: '#/components/schemas/Thing'
  /b:
    get:
      responses:
        '200':
          content:
            application/json:
              schema:
                $ref: '#/components/schemas/Thing'
components:
  schemas:
    Thing:
      type: object
"#;

#[test]
fn it_keeps_one_owner_per_definition() {
    let rolodex = indexed(REPEATED_REF, IndexConfig::default());
    let index = rolodex.root_index().expect("root index should exist");

    // Both sightings appear in discovery order; the definition is owned
    // once.
    assert_eq!(index.get_all_references().len(), 2);
    let sequenced = index.get_mapped_references_sequenced();
    assert_eq!(sequenced.len(), 1);
    assert_eq!(sequenced[0].full_definition(), "#/components/schemas/Thing");
    assert_eq!(sequenced[0].name(), "Thing");

    // The owner is the first sighting.
    assert_eq!(sequenced[0].path(), index.get_all_references()[0].path());
}

#[test]
fn it_produces_identical_output_across_runs() {
    let collect = || {
        let rolodex = indexed(REPEATED_REF, IndexConfig::default());
        let index = rolodex.root_index().expect("root index should exist");
        let definitions: Vec<String> = index
            .get_mapped_references_sequenced()
            .iter()
            .map(|r| r.full_definition().to_string())
            .collect();
        (definitions, rolodex.caught_errors().len())
    };

    let first = collect();
    let second = collect();
    assert_eq!(first, second);
}

#[test]
fn it_produces_identical_output_under_sequential_extraction() {
    let parallel = indexed(REPEATED_REF, IndexConfig::default());
    let sequential = indexed(REPEATED_REF, IndexConfig {
        extract_refs_sequentially: true,
        ..IndexConfig::default()
    });

    let defs = |rolodex: &Rolodex| -> Vec<String> {
        rolodex
            .root_index()
            .expect("root index should exist")
            .get_mapped_references_sequenced()
            .iter()
            .map(|r| r.full_definition().to_string())
            .collect()
    };
    assert_eq!(defs(&parallel), defs(&sequential));
}

/// A document exercising the OpenAPI 3 component catalogs.
const CATALOGS: &str = r#"
openapi: 3.1.0
info:
  title: catalogs
  version: 1.0.0
components:
  schemas:
    One:
      type: object
      properties:
        inline:
          type: string
    Two:
      type: array
      items:
        type: integer
  parameters:
    Limit:
      name: limit
      in: query
  responses:
    NotFound:
      description: not found
  requestBodies:
    Payload:
      description: payload
  headers:
    RateLimit:
      schema:
        type: integer
  examples:
    Sample:
      value: 1
  securitySchemes:
    Key:
      type: apiKey
      name: key
      in: header
  callbacks:
    OnEvent:
      x-noop: true
  links:
    Next:
      operationId: next
"#;

#[test]
fn it_catalogs_openapi_3_components() {
    let rolodex = indexed(CATALOGS, IndexConfig::default());
    let index = rolodex.root_index().expect("root index should exist");

    let schemas = index.get_all_component_schemas();
    let named: Vec<&str> = schemas
        .iter()
        .map(|s| s.full_definition())
        .filter(|d| d.starts_with("#/components/schemas/"))
        .collect();
    assert!(named.contains(&"#/components/schemas/One"));
    assert!(named.contains(&"#/components/schemas/Two"));

    // Inline schemas are discovered beneath the named ones.
    assert!(
        schemas
            .iter()
            .any(|s| s.full_definition() == "#/components/schemas/One/properties/inline"),
        "inline property schema should be cataloged"
    );
    assert!(
        schemas
            .iter()
            .any(|s| s.full_definition() == "#/components/schemas/Two/items"),
        "items schema should be cataloged"
    );

    assert_eq!(index.get_all_parameters().len(), 1);
    assert_eq!(index.get_all_responses().len(), 1);
    assert_eq!(index.get_all_request_bodies().len(), 1);
    assert_eq!(index.get_all_headers().len(), 1);
    assert_eq!(index.get_all_examples().len(), 1);
    assert_eq!(index.get_all_security_schemes().len(), 1);
    assert_eq!(index.get_all_callbacks().len(), 1);
    assert_eq!(index.get_all_links().len(), 1);
    assert_eq!(index.get_all_extensions().len(), 1);
}

/// A swagger 2 document with the old component shapes.
const SWAGGER_2: &str = r#"
swagger: "2.0"
info:
  title: old
  version: 1.0.0
definitions:
  Legacy:
    type: object
parameters:
  Limit:
    name: limit
    in: query
securityDefinitions:
  Key:
    type: apiKey
    name: key
    in: header
"#;

#[test]
fn it_catalogs_swagger_2_components() {
    let rolodex = indexed(SWAGGER_2, IndexConfig::default());
    let index = rolodex.root_index().expect("root index should exist");

    assert!(
        index
            .get_all_component_schemas()
            .iter()
            .any(|s| s.full_definition() == "#/definitions/Legacy")
    );
    assert_eq!(index.get_all_parameters().len(), 1);
    assert_eq!(index.get_all_security_schemes().len(), 1);
}

/// A document with a reference hidden under an extension key.
const EXTENSION_REF: &str = r#"
openapi: 3.1.0
info:
  title: extensions
  version: 1.0.0
x-internal:
  schema:
    $ref: '#/components/schemas/Hidden'
components:
  schemas:
    Hidden:
      type: object
"#;

#[test]
fn it_skips_extension_references_by_default() {
    let rolodex = indexed(EXTENSION_REF, IndexConfig::default());
    let index = rolodex.root_index().expect("root index should exist");
    assert_eq!(index.get_mapped_references_sequenced().len(), 0);
}

#[test]
fn it_indexes_extension_references_when_opted_in() {
    let rolodex = indexed(EXTENSION_REF, IndexConfig {
        index_extension_refs: true,
        ..IndexConfig::default()
    });
    let index = rolodex.root_index().expect("root index should exist");

    let sequenced = index.get_mapped_references_sequenced();
    assert_eq!(sequenced.len(), 1);
    assert_eq!(sequenced[0].full_definition(), "#/components/schemas/Hidden");
}

#[test]
fn it_rejects_documents_without_openapi_markers() {
    let rolodex = indexed("just: yaml\n", IndexConfig::default());
    let index = rolodex.root_index().expect("root index should exist");

    let errors = index.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind(), ErrorKind::IndexingFailure);
}

#[test]
fn it_accepts_any_document_when_the_check_is_skipped() {
    let rolodex = indexed("just: yaml\n", IndexConfig {
        skip_document_check: true,
        ..IndexConfig::default()
    });
    let index = rolodex.root_index().expect("root index should exist");
    assert_eq!(index.errors().len(), 0);
}

#[test]
fn it_rejects_backslashes_in_references() {
    let source = r#"
openapi: 3.1.0
info:
  title: backslash
  version: 1.0.0
components:
  schemas:
    Bad:
      $ref: 'specs\other.yaml#/X'
"#;
    let rolodex = indexed(source, IndexConfig::default());
    let index = rolodex.root_index().expect("root index should exist");

    let errors = index.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind(), ErrorKind::ReferenceMalformed);
    assert_eq!(index.get_mapped_references_sequenced().len(), 0);
}

/// A document with `summary` and `description` siblings on a `$ref`.
const SIBLING_REF: &str = r#"
openapi: 3.1.0
info:
  title: siblings
  version: 1.0.0
components:
  schemas:
    Wrapped:
      type: object
      properties:
        thing:
          $ref: '#/components/schemas/Thing'
          summary: a short summary
          description: a longer description
    Thing:
      type: object
"#;

#[test]
fn it_retains_ref_siblings_when_transforming() {
    let rolodex = indexed(SIBLING_REF, IndexConfig {
        transform_sibling_refs: true,
        ..IndexConfig::default()
    });
    let index = rolodex.root_index().expect("root index should exist");

    let sequenced = index.get_mapped_references_sequenced();
    assert_eq!(sequenced.len(), 1);
    assert_eq!(sequenced[0].summary(), Some("a short summary"));
    assert_eq!(sequenced[0].description(), Some("a longer description"));
}

#[test]
fn it_drops_ref_siblings_by_default() {
    let rolodex = indexed(SIBLING_REF, IndexConfig::default());
    let index = rolodex.root_index().expect("root index should exist");

    let sequenced = index.get_mapped_references_sequenced();
    assert_eq!(sequenced[0].summary(), None);
    assert_eq!(sequenced[0].description(), None);
}

/// A document with two structurally identical inline schemas.
const DUPLICATE_INLINE: &str = r#"
openapi: 3.1.0
info:
  title: duplicates
  version: 1.0.0
components:
  schemas:
    A:
      type: object
      properties:
        first:
          type: string
        second:
          type: string
"#;

#[test]
fn it_catalogs_paths_and_counts_discovery_statistics() {
    let source = r#"
openapi: 3.1.0
info:
  title: stats
  version: 1.0.0
  description: top level
paths:
  /pets:
    get:
      summary: list pets
      description: lists the pets
  /pets/{id}:
    get:
      summary: one pet
  x-grouping: ignored
components:
  schemas:
    Pet:
      type: object
"#;
    let rolodex = indexed(source, IndexConfig::default());
    let index = rolodex.root_index().expect("root index should exist");

    let paths = index.get_all_paths();
    assert_eq!(paths.len(), 2);
    assert!(
        paths
            .iter()
            .any(|p| p.full_definition() == "#/paths/~1pets")
    );

    let stats = index.stats();
    assert_eq!(stats.descriptions, 2);
    assert_eq!(stats.summaries, 2);
    assert_eq!(stats.extensions, 1);
    assert_eq!(stats.ref_sightings, 0);
}

#[test]
fn it_survives_pathologically_deep_nesting() {
    // A schema nested well past the resolver's extraction depth bound; the
    // reference at the bottom still indexes, and nothing recurses forever.
    let mut body = String::from("      type: object\n");
    let mut indent = String::from("      ");
    for _ in 0..110 {
        body.push_str(&format!("{indent}properties:\n"));
        indent.push_str("  ");
        body.push_str(&format!("{indent}a:\n"));
        indent.push_str("  ");
    }
    body.push_str(&format!(
        "{indent}$ref: '#/components/schemas/Deep'\n"
    ));

    let source = format!(
        "openapi: 3.1.0\ninfo:\n  title: deep\n  version: 1.0.0\ncomponents:\n  schemas:\n    Deep:\n{body}"
    );

    let rolodex = indexed(&source, IndexConfig::default());
    let index = rolodex.root_index().expect("root index should exist");
    assert_eq!(index.get_mapped_references_sequenced().len(), 1);

    // Past the depth bound the resolver never reaches the closing edge,
    // so no cycle is recorded.
    assert_eq!(rolodex.get_safe_circular_references().len(), 0);
    assert_eq!(rolodex.get_infinite_circular_references().len(), 0);
}

#[test]
fn it_rolls_references_up_across_the_rolodex() {
    let rolodex = indexed(REPEATED_REF, IndexConfig::default());

    assert_eq!(rolodex.get_all_references().len(), 2);
    assert_eq!(rolodex.get_all_mapped_references_sequenced().len(), 1);
}

#[test]
fn it_deduplicates_identical_inline_schemas_with_the_quick_hash() {
    let plain = indexed(DUPLICATE_INLINE, IndexConfig::default());
    let hashed = indexed(DUPLICATE_INLINE, IndexConfig {
        use_schema_quick_hash: true,
        ..IndexConfig::default()
    });

    let count = |rolodex: &Rolodex| {
        rolodex
            .root_index()
            .expect("root index should exist")
            .get_all_component_schemas()
            .len()
    };

    // `first` and `second` are structurally identical; the quick hash
    // collapses them into one catalog entry.
    assert_eq!(count(&plain), count(&hashed) + 1);
}
