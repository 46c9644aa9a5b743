//! Circular reference detection and classification scenarios.

use oas_index::ErrorKind;
use oas_index::IndexConfig;
use oas_index::Rolodex;
use oas_tree::resolve_pointer;
use pretty_assertions::assert_eq;

/// Indexes the given root document with the given configuration.
fn indexed(source: &str, config: IndexConfig) -> Rolodex {
    let rolodex = Rolodex::new(config.with_spec_absolute_path("/specs/root.yaml"));
    rolodex.set_root_source(source).expect("root should parse");
    rolodex.index_the_rolodex().expect("indexing should succeed");
    rolodex
}

/// Two schemas referencing each other through optional properties.
const SAFE_LOOP: &str = r#"
openapi: 3.1.0
info:
  title: safe loop
  version: 1.0.0
components:
  schemas:
    Obj:
      type: object
      properties:
        other:
          $ref: '#/components/schemas/Obj2'
    Obj2:
      type: object
      properties:
        other:
          $ref: '#/components/schemas/Obj'
"#;

#[test]
fn it_classifies_a_two_schema_loop_as_safe() {
    let rolodex = indexed(SAFE_LOOP, IndexConfig::default());

    assert_eq!(rolodex.get_infinite_circular_references().len(), 0);
    assert_eq!(rolodex.get_safe_circular_references().len(), 1);
    assert_eq!(rolodex.get_ignored_circular_references().len(), 0);

    let errors = rolodex.resolve();
    assert_eq!(errors.len(), 0, "safe loops resolve without errors");
}

/// Two schemas referencing each other through required properties.
const REQUIRED_LOOP: &str = r#"
openapi: 3.0.3
info:
  title: required loop
  version: 1.0.0
components:
  schemas:
    Three:
      type: object
      required:
        - bester
      properties:
        bester:
          $ref: '#/components/schemas/Seven'
    Seven:
      type: object
      required:
        - wow
      properties:
        wow:
          $ref: '#/components/schemas/Three'
"#;

#[test]
fn it_classifies_a_required_loop_as_infinite() {
    let rolodex = indexed(REQUIRED_LOOP, IndexConfig::default());

    assert_eq!(rolodex.get_infinite_circular_references().len(), 1);
    assert_eq!(rolodex.get_safe_circular_references().len(), 0);

    let errors = rolodex.resolve();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind(), ErrorKind::CircularInfinite);

    let rendered = errors[0].to_string();
    assert!(
        rendered.contains("infinite circular reference detected: Three")
            || rendered.contains("infinite circular reference detected: Seven"),
        "unexpected message: {rendered}"
    );
}

/// A schema referencing itself through `anyOf`.
const POLYMORPHIC_LOOP: &str = r#"
openapi: 3.1.0
info:
  title: polymorphic loop
  version: 1.0.0
components:
  schemas:
    ProductCategory:
      type: object
      properties:
        name:
          type: string
        children:
          type: object
          anyOf:
            - $ref: '#/components/schemas/ProductCategory'
          description: category children
"#;

#[test]
fn it_ignores_polymorphic_cycles_when_configured() {
    let rolodex = indexed(
        POLYMORPHIC_LOOP,
        IndexConfig::default().with_ignore_polymorphic_circular_references(true),
    );

    assert_eq!(rolodex.get_safe_circular_references().len(), 0);
    assert_eq!(rolodex.get_infinite_circular_references().len(), 0);
    assert_eq!(rolodex.get_ignored_circular_references().len(), 1);

    let ignored = &rolodex.get_ignored_circular_references()[0];
    assert!(ignored.is_polymorphic_result());
    assert_eq!(ignored.polymorphic_type().as_str(), "anyOf");

    let errors = rolodex.resolve();
    assert_eq!(errors.len(), 0);

    // The anyOf member keeps its `$ref` mapping: ignored cycles are never
    // spliced.
    let root = rolodex.root_document().expect("root should exist");
    let arena = rolodex.arena().read();
    let member = resolve_pointer(
        &arena,
        root.root(),
        "/components/schemas/ProductCategory/properties/children/anyOf/0",
    )
    .expect("member should resolve");
    assert!(arena.is_ref(member).is_some(), "member should keep its $ref");
}

#[test]
fn it_keeps_polymorphic_cycles_circular_by_default() {
    let rolodex = indexed(POLYMORPHIC_LOOP, IndexConfig::default());

    assert_eq!(rolodex.get_ignored_circular_references().len(), 0);
    let safe = rolodex.get_safe_circular_references();
    assert_eq!(safe.len(), 1);
    assert!(safe[0].is_polymorphic_result());
}

/// A schema composing another through `allOf`, with no cycle anywhere.
const POLYMORPHIC_NO_LOOP: &str = r#"
openapi: 3.1.0
info:
  title: polymorphic composition
  version: 1.0.0
components:
  schemas:
    Wrapper:
      type: object
      allOf:
        - $ref: '#/components/schemas/Base'
    Base:
      type: object
      properties:
        id:
          type: string
"#;

#[test]
fn it_never_splices_polymorphic_members_even_without_a_cycle() {
    let rolodex = indexed(POLYMORPHIC_NO_LOOP, IndexConfig::default());

    assert_eq!(rolodex.get_safe_circular_references().len(), 0);
    assert_eq!(rolodex.get_infinite_circular_references().len(), 0);
    assert_eq!(rolodex.get_ignored_circular_references().len(), 0);

    let errors = rolodex.resolve();
    assert_eq!(errors.len(), 0);

    // The allOf member keeps its `$ref` mapping: polymorphic members are
    // never spliced, cycle or not.
    let root = rolodex.root_document().expect("root should exist");
    let arena = rolodex.arena().read();
    let member = resolve_pointer(
        &arena,
        root.root(),
        "/components/schemas/Wrapper/allOf/0",
    )
    .expect("member should resolve");
    assert!(arena.is_ref(member).is_some(), "member should keep its $ref");
}

/// A schema whose array items reference the schema itself.
const ARRAY_LOOP: &str = r#"
openapi: 3.1.0
info:
  title: array loop
  version: 1.0.0
components:
  schemas:
    ProductCategory:
      type: object
      properties:
        name:
          type: string
        children:
          type: array
          items:
            $ref: '#/components/schemas/ProductCategory'
"#;

#[test]
fn it_ignores_array_cycles_when_configured() {
    let rolodex = indexed(
        ARRAY_LOOP,
        IndexConfig::default().with_ignore_array_circular_references(true),
    );

    assert_eq!(rolodex.get_safe_circular_references().len(), 0);
    assert_eq!(rolodex.get_infinite_circular_references().len(), 0);
    assert_eq!(rolodex.get_ignored_circular_references().len(), 1);
    assert!(rolodex.get_ignored_circular_references()[0].is_array_result());

    let errors = rolodex.resolve();
    assert_eq!(errors.len(), 0);
}

#[test]
fn it_routes_cycles_monotonically_when_ignoring_arrays() {
    // Invariant: turning the ignore flag on only moves the cycle from the
    // circular views to the ignored view, never the reverse.
    let without = indexed(ARRAY_LOOP, IndexConfig::default());
    assert_eq!(without.get_safe_circular_references().len(), 1);
    assert!(without.get_safe_circular_references()[0].is_array_result());
    assert_eq!(without.get_ignored_circular_references().len(), 0);

    let with = indexed(
        ARRAY_LOOP,
        IndexConfig::default().with_ignore_array_circular_references(true),
    );
    assert_eq!(with.get_safe_circular_references().len(), 0);
    assert_eq!(with.get_ignored_circular_references().len(), 1);
}

#[test]
fn it_partitions_every_cycle_into_exactly_one_list() {
    for (source, config) in [
        (SAFE_LOOP, IndexConfig::default()),
        (REQUIRED_LOOP, IndexConfig::default()),
        (
            POLYMORPHIC_LOOP,
            IndexConfig::default().with_ignore_polymorphic_circular_references(true),
        ),
        (
            ARRAY_LOOP,
            IndexConfig::default().with_ignore_array_circular_references(true),
        ),
    ] {
        let rolodex = indexed(source, config);
        let total = rolodex.get_safe_circular_references().len()
            + rolodex.get_infinite_circular_references().len()
            + rolodex.get_ignored_circular_references().len();
        assert_eq!(total, 1, "each scenario contains exactly one cycle");
    }
}

#[test]
fn it_records_the_journey_and_loop_point() {
    let rolodex = indexed(REQUIRED_LOOP, IndexConfig::default());
    let cycles = rolodex.get_infinite_circular_references();
    let cycle = &cycles[0];

    assert!(cycle.journey().len() >= 2);
    assert!(cycle.loop_index() < cycle.journey().len());
    assert_eq!(
        cycle.journey().last().expect("journey is never empty").full_definition(),
        cycle.loop_point().full_definition()
    );
    assert!(cycle.journey_path().contains(" -> "));
}

#[test]
fn it_exposes_traversal_counters_from_a_direct_resolver_pass() {
    let config = IndexConfig {
        avoid_circular_reference_check: true,
        ..IndexConfig::default()
    };
    let rolodex = indexed(SAFE_LOOP, config);
    let index = rolodex.root_index().expect("root index should exist");

    let mut resolver = oas_index::Resolver::new();
    let errors = resolver.check_for_circular_references(&index, &rolodex);
    assert_eq!(errors.len(), 0);

    assert_eq!(resolver.get_circular_references().len(), 1);
    assert_eq!(resolver.get_safe_circular_references().len(), 1);
    assert_eq!(resolver.get_infinite_circular_references().len(), 0);
    assert_eq!(resolver.get_non_polymorphic_circular_errors().len(), 1);
    assert_eq!(resolver.get_polymorphic_circular_errors().len(), 0);

    let stats = resolver.stats();
    assert_eq!(stats.indexes_visited, 1);
    assert!(stats.references_visited >= 2);
    assert!(stats.journeys_taken >= 2);
    assert!(stats.relatives_seen >= 2);
}

#[test]
fn it_skips_the_cycle_check_when_configured() {
    let config = IndexConfig {
        avoid_circular_reference_check: true,
        ..IndexConfig::default()
    };
    let rolodex = indexed(REQUIRED_LOOP, config);

    assert_eq!(rolodex.get_infinite_circular_references().len(), 0);
    assert_eq!(rolodex.get_safe_circular_references().len(), 0);

    // The resolve pass still finds the cycle on its own.
    let errors = rolodex.resolve();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind(), ErrorKind::CircularInfinite);
}
