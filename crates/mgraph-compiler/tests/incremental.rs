//! Incremental compilation: idempotence, rollback exactness and
//! dependency-scoped recompilation, driven through `Repository`.

use mgraph_compiler::{ErrorKind, Repository, SourceState};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const CARS: &str = "Class model::Car {\n  name: String[1];\n  wheels: Integer[1] = 4;\n}\n\
Class model::Owner {\n  name: String[1];\n}\n\
Association model::Ownership {\n  owner: Owner[1];\n  cars: Car[*];\n}\n\
function model::describe(c: Car[1]): String[1] {\n  $c.name + ' owned by ' + $c.owner.name;\n}\n";

const GREET: &str = "function lib::greet(name: String[1]): String[1] { 'Hello ' + $name; }";
const WELCOME: &str = "function app::welcome(): String[1] { lib::greet('you'); }";
const UNRELATED: &str = "Class other::Thing { label: String[1]; }";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn compiled(sources: &[(&str, &str)]) -> Repository {
    let mut repo = Repository::new();
    for (path, text) in sources {
        repo.add_source(path, text).unwrap();
    }
    repo.compile().unwrap();
    repo
}

// ---------------------------------------------------------------------------
// Idempotence
// ---------------------------------------------------------------------------

#[test]
fn add_delete_cycles_restore_the_baseline() {
    init_tracing();
    let mut repo = Repository::new();
    let baseline = repo.serialize();

    for _ in 0..10 {
        repo.add_source("cars.pure", CARS).unwrap();
        repo.compile().unwrap();
        assert_ne!(repo.serialize(), baseline);

        repo.delete_source("cars.pure").unwrap();
        let report = repo.compile().unwrap();
        assert_eq!(report.removed_sources, vec!["cars.pure".to_string()]);
        assert_eq!(repo.serialize(), baseline);
        assert!(repo.source("cars.pure").is_none());
    }
    assert_eq!(repo.graph().usages().len(), 0);
}

#[test]
fn recompiling_the_same_text_is_byte_identical() {
    let mut repo = compiled(&[("cars.pure", CARS)]);
    let first = repo.serialize();

    // Unchanged text is skipped outright.
    assert!(!repo.update_source("cars.pure", CARS).unwrap());
    assert!(repo.compile().unwrap().is_empty());

    // A forced rebuild produces the same bytes.
    repo.update_source("cars.pure", "Class model::Tmp {}").unwrap();
    repo.compile().unwrap();
    repo.update_source("cars.pure", CARS).unwrap();
    repo.compile().unwrap();
    assert_eq!(repo.serialize(), first);
}

#[test]
fn serialization_does_not_depend_on_source_order() {
    let split_classes = "Class model::Car {\n  name: String[1];\n  wheels: Integer[1] = 4;\n}\n\
Class model::Owner {\n  name: String[1];\n}\n";
    let one = compiled(&[("a.pure", split_classes), ("b.pure", GREET)]);
    let two = compiled(&[("b.pure", GREET), ("a.pure", split_classes)]);
    assert_eq!(one.serialize(), two.serialize());
    assert_eq!(one.fingerprint(), two.fingerprint());
}

// ---------------------------------------------------------------------------
// Rollback exactness
// ---------------------------------------------------------------------------

#[test]
fn failed_compile_leaves_the_baseline_untouched() {
    let mut repo = compiled(&[("cars.pure", CARS)]);
    let baseline = repo.serialize();

    repo.add_source("garage.pure", "Class model::Garage { car: Car[1]; boat: Boat[1]; }")
        .unwrap();
    let err = repo.compile().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Resolution);
    assert_eq!(err.message, "Boat has not been defined!");
    assert_eq!(err.source_path(), Some("garage.pure"));
    assert_eq!(repo.serialize(), baseline);
    assert_eq!(repo.state("garage.pure"), Some(SourceState::Failed));
    assert_eq!(repo.state("cars.pure"), Some(SourceState::Compiled));
    assert!(repo.lookup("model::Garage").is_none());

    // The corrected edit yields the graph a clean compile would have built.
    repo.update_source("garage.pure", "Class model::Garage { car: Car[1]; }")
        .unwrap();
    repo.compile().unwrap();
    let clean = compiled(&[
        ("cars.pure", CARS),
        ("garage.pure", "Class model::Garage { car: Car[1]; }"),
    ]);
    assert_eq!(repo.serialize(), clean.serialize());
}

#[test]
fn repeated_failures_never_leak() {
    let mut repo = compiled(&[("cars.pure", CARS)]);
    let baseline = repo.serialize();
    let nodes = repo.graph().node_count();

    for round in 0..10 {
        let text = match round % 4 {
            0 => "Class model::Bad { x: Missing[1]; }",
            1 => "Class model::Bad { x: String[0..1] = 'oops'; }",
            2 => "Class model::Bad { x: Integer[1] = 'text'; }",
            _ => "Class model::Bad { x: String[1] = ; }",
        };
        if round == 0 {
            repo.add_source("bad.pure", text).unwrap();
        } else {
            repo.update_source("bad.pure", text).unwrap();
        }
        assert!(repo.compile().is_err());
        assert_eq!(repo.serialize(), baseline);
        assert_eq!(repo.graph().node_count(), nodes);
    }

    repo.delete_source("bad.pure").unwrap();
    assert!(repo.compile().unwrap().is_empty());
    assert_eq!(repo.serialize(), baseline);
}

#[test]
fn deleting_a_referenced_source_fails_until_restored() {
    let car = "Class model::Car { name: String[1]; }";
    let garage = "Class model::Garage { car: Car[1]; }";
    let mut repo = compiled(&[("car.pure", car), ("garage.pure", garage)]);
    let baseline = repo.serialize();

    repo.delete_source("car.pure").unwrap();
    let err = repo.compile().unwrap_err();
    assert_eq!(err.message, "Car has not been defined!");
    assert_eq!(err.source_path(), Some("garage.pure"));
    assert_eq!(repo.serialize(), baseline);
    assert_eq!(repo.state("car.pure"), Some(SourceState::Deleted));
    assert_eq!(repo.state("garage.pure"), Some(SourceState::Failed));

    repo.add_source("car.pure", car).unwrap();
    let report = repo.compile().unwrap();
    assert_eq!(
        report.compiled_sources,
        vec!["car.pure".to_string(), "garage.pure".to_string()]
    );
    assert_eq!(repo.serialize(), baseline);
}

// ---------------------------------------------------------------------------
// Dependency-scoped recompilation
// ---------------------------------------------------------------------------

#[test]
fn parse_error_fails_only_the_dependency_closure() {
    let mut repo = compiled(&[("a.pure", GREET), ("b.pure", WELCOME), ("c.pure", UNRELATED)]);
    let baseline = repo.serialize();
    let greet = "lib::greet(String[1]):String[1]";
    let welcome = "app::welcome():String[1]";

    repo.update_source(
        "a.pure",
        "function lib::greet(name: String[1]): String[1] { 'Hello ' + ; }",
    )
    .unwrap();
    let err = repo.compile().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Parse);
    assert_eq!(err.source_path(), Some("a.pure"));
    assert_eq!(err.start_line(), Some(1));

    assert_eq!(repo.serialize(), baseline);
    assert_eq!(repo.state("a.pure"), Some(SourceState::Failed));
    assert_eq!(repo.state("b.pure"), Some(SourceState::Failed));
    assert_eq!(repo.state("c.pure"), Some(SourceState::Compiled));
    assert!(!repo.is_compiled(greet));
    assert!(!repo.is_compiled(welcome));
    assert!(repo.is_compiled("other::Thing"));

    repo.update_source("a.pure", GREET).unwrap();
    let report = repo.compile().unwrap();
    assert_eq!(
        report.compiled_sources,
        vec!["a.pure".to_string(), "b.pure".to_string()]
    );
    assert!(repo.is_compiled(greet));
    assert!(repo.is_compiled(welcome));
    assert_eq!(repo.serialize(), baseline);
}

#[test]
fn editing_a_leaf_source_recompiles_only_itself() {
    let mut repo = compiled(&[("a.pure", GREET), ("b.pure", WELCOME), ("c.pure", UNRELATED)]);
    repo.update_source(
        "b.pure",
        "function app::welcome(): String[1] { lib::greet('everyone'); }",
    )
    .unwrap();
    let report = repo.compile().unwrap();
    assert_eq!(report.compiled_sources, vec!["b.pure".to_string()]);
}

#[test]
fn association_ends_are_recompiled_with_their_classes() {
    let classes = "Class model::Car { name: String[1]; }\nClass model::Owner { name: String[1]; }";
    let association = "Association model::Ownership { owner: Owner[1]; cars: Car[*]; }";
    let reader = "function model::ownerOf(c: Car[1]): String[1] { $c.owner.name; }";
    let mut repo = compiled(&[
        ("classes.pure", classes),
        ("association.pure", association),
        ("reader.pure", reader),
    ]);

    // The reader depends on the association end it reads through.
    repo.delete_source("association.pure").unwrap();
    let err = repo.compile().unwrap_err();
    assert_eq!(
        err.message,
        "Can't find the property 'owner' in the class model::Car"
    );
    assert_eq!(repo.state("reader.pure"), Some(SourceState::Failed));

    repo.delete_source("reader.pure").unwrap();
    repo.compile().unwrap();
    let without = compiled(&[("classes.pure", classes)]);
    assert_eq!(repo.serialize(), without.serialize());
}

#[test]
fn batched_edits_compile_atomically() {
    let mut repo = Repository::new();
    repo.add_source("a.pure", "Class m::A { b: B[0..1]; }").unwrap();
    repo.add_source("b.pure", "Class m::B { a: A[0..1]; }").unwrap();
    let report = repo.compile().unwrap();
    assert_eq!(report.compiled_sources.len(), 2);

    repo.update_source("a.pure", "Class m::A { b: B[0..1]; c: C[1]; }")
        .unwrap();
    repo.add_source("c.pure", "Class m::C {}").unwrap();
    let report = repo.compile().unwrap();
    assert_eq!(
        report.compiled_sources,
        vec!["a.pure".to_string(), "b.pure".to_string(), "c.pure".to_string()]
    );
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[test]
fn inherited_property_reports_its_declaring_class() {
    let repo = compiled(&[(
        "model.pure",
        "Class m::A {\n  prop1: String[1];\n}\nClass m::B extends A {}",
    )]);
    let location = repo.property_path("m::B", "prop1").unwrap();
    assert_eq!(location.path, "m::A.prop1");
    assert_eq!(location.owner, "m::A");
    let source = location.source.unwrap();
    assert_eq!(source.source_id, "model.pure");
    assert_eq!(source.start_line, 2);
    assert!(repo.property_path("m::B", "missing").is_none());
}

#[test]
fn association_property_reports_the_association() {
    let repo = compiled(&[("cars.pure", CARS)]);
    let location = repo.property_path("model::Car", "owner").unwrap();
    assert_eq!(location.path, "model::Ownership.owner");
    assert_eq!(location.owner, "model::Ownership");
}

#[test]
fn usages_only_count_source_references() {
    let mut repo = compiled(&[(
        "car.pure",
        "Class m::Car {}\nfunction m::same(c: Car[1]): Car[1] { $c; }",
    )]);
    let car = repo.lookup("m::Car").unwrap();
    // parameter type and return type; the inferred type of `$c` is synthetic
    assert_eq!(repo.usages_of("m::Car").len(), 2);
    assert_eq!(repo.graph().usages().synthetic_usages_of(car).len(), 1);

    repo.add_source("garage.pure", "Class m::Garage { cars: Car[*]; }")
        .unwrap();
    repo.compile().unwrap();
    assert_eq!(repo.usages_of("m::Car").len(), 3);

    repo.delete_source("garage.pure").unwrap();
    repo.compile().unwrap();
    assert_eq!(repo.usages_of("m::Car").len(), 2);
}

// ---------------------------------------------------------------------------
// Generated models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct PropertyShape {
    ty: &'static str,
    multiplicity: &'static str,
}

#[derive(Debug, Clone)]
struct ClassShape {
    properties: Vec<PropertyShape>,
    extends_previous: bool,
}

fn property_shape() -> impl Strategy<Value = PropertyShape> {
    (
        prop_oneof![Just("String"), Just("Integer"), Just("Float"), Just("Boolean")],
        prop_oneof![Just("[1]"), Just("[0..1]"), Just("[*]"), Just("[1..*]")],
    )
        .prop_map(|(ty, multiplicity)| PropertyShape { ty, multiplicity })
}

fn class_shape() -> impl Strategy<Value = ClassShape> {
    (prop::collection::vec(property_shape(), 0..4), any::<bool>()).prop_map(
        |(properties, extends_previous)| ClassShape {
            properties,
            extends_previous,
        },
    )
}

fn render(classes: &[ClassShape], with_association: bool) -> String {
    let mut text = String::from("import base::*;\n");
    for (i, class) in classes.iter().enumerate() {
        text.push_str(&format!("Class gen::C{}", i));
        if class.extends_previous && i > 0 {
            text.push_str(&format!(" extends C{}", i - 1));
        }
        text.push_str(" {\n");
        if i == 0 {
            text.push_str("  anchor: Anchor[0..1];\n");
        }
        for (k, property) in class.properties.iter().enumerate() {
            text.push_str(&format!(
                "  p{}_{}: {}{};\n",
                i, k, property.ty, property.multiplicity
            ));
        }
        text.push_str("}\n");
    }
    if with_association && classes.len() > 1 {
        text.push_str("Association gen::Link { left: C0[0..1]; right: C1[*]; }\n");
    }
    text
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn generated_models_round_trip(
        classes in prop::collection::vec(class_shape(), 1..5),
        with_association in any::<bool>(),
    ) {
        let mut repo = compiled(&[("base.pure", "Class base::Anchor { id: String[1]; }")]);
        let baseline = repo.serialize();
        let text = render(&classes, with_association);

        for _ in 0..10 {
            repo.add_source("gen.pure", &text).unwrap();
            let report = repo.compile().unwrap();
            prop_assert_eq!(report.compiled_sources, vec!["gen.pure".to_string()]);

            repo.delete_source("gen.pure").unwrap();
            repo.compile().unwrap();
            prop_assert_eq!(repo.serialize(), baseline.clone());
            prop_assert_eq!(repo.state("base.pure"), Some(SourceState::Compiled));
        }
    }
}
