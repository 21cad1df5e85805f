//! Instance construction against compiled models: defaults, multiplicity,
//! reverse association wiring, copies, constraints and dynamic overrides.

use std::rc::Rc;

use mgraph_compiler::Repository;
use mgraph_runtime::{
    ConstraintOutcome, DynamicNewOverrides, GetterOverride, Instance, InstanceId, Runtime,
    RuntimeError, RuntimeOptions, Value, Values,
};
use smallvec::smallvec;

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

fn compile(text: &str) -> Repository {
    let mut repo = Repository::new();
    repo.add_source("model.pure", text).unwrap();
    repo.compile().unwrap();
    repo
}

fn one(value: impl Into<Value>) -> Values {
    smallvec![value.into()]
}

fn kv(key: &str, values: Values) -> (String, Values) {
    (key.to_string(), values)
}

const PEOPLE: &str = "Class m::Person [\n\
  adult(~function: $this.age >= 18 ~message: 'too young: ' + $this.name),\n\
  notAdmin(~function: $this.name != 'admin' ~enforcementLevel: Warn)\n\
] { name: String[1]; age: Integer[1]; }\n\
Class m::Employee extends Person [ hasBadge: $this.badge > 0 ] { badge: Integer[1]; }\n";

// ---------------------------------------------------------------------------
// Defaults and multiplicity
// ---------------------------------------------------------------------------

#[test]
fn defaults_are_evaluated_per_construction() {
    let repo = compile(
        "Class m::Engine {}\n\
Class m::Car { label: String[1] = 'car'; engine: Engine[1] = ^Engine(); }",
    );
    let mut rt = Runtime::new(repo.graph());

    let a = rt.new_instance("m::Car", vec![]).unwrap();
    let b = rt.new_instance("m::Car", vec![]).unwrap();
    assert_eq!(rt.get(a, "label").unwrap(), one("car"));
    assert_eq!(rt.get(b, "label").unwrap(), one("car"));

    let engine_a = rt.get(a, "engine").unwrap();
    let engine_b = rt.get(b, "engine").unwrap();
    assert_ne!(engine_a, engine_b);
    assert_eq!(rt.heap().len(), 4);
}

#[test]
fn given_values_replace_defaults() {
    let repo = compile("Class m::Car { label: String[1] = 'car'; }");
    let mut rt = Runtime::new(repo.graph());
    let car = rt.new_instance("m::Car", vec![kv("label", one("truck"))]).unwrap();
    assert_eq!(rt.instance(car).unwrap().get("label"), &[Value::from("truck")]);
}

#[test]
fn missing_mandatory_value_fails_and_leaves_no_trace() {
    let repo = compile(
        "Class m::Engine {}\n\
Class m::Car { engine: Engine[1] = ^Engine(); name: String[1]; }",
    );
    let mut rt = Runtime::new(repo.graph());
    let err = rt.new_instance("m::Car", vec![]).unwrap_err();
    insta::assert_snapshot!(
        err.to_string(),
        @"Error instantiating the type 'Car'. The property 'name' has a multiplicity range of [1] when the given list has a cardinality equal to 0"
    );
    // The engine built by the default is undone with the car.
    assert!(rt.heap().is_empty());
}

#[test]
fn too_many_values_fail() {
    let repo = compile("Class m::Car { tags: String[1..2]; }");
    let mut rt = Runtime::new(repo.graph());
    let tags: Values = smallvec!["a".into(), "b".into(), "c".into()];
    let err = rt.new_instance("m::Car", vec![kv("tags", tags)]).unwrap_err();
    assert_eq!(
        err,
        RuntimeError::Multiplicity {
            property: "tags".into(),
            class: "Car".into(),
            expected: "[1..2]".into(),
            given: 3,
        }
    );
}

#[test]
fn values_are_type_checked() {
    let repo = compile("Class m::Car { name: String[1]; }");
    let mut rt = Runtime::new(repo.graph());
    let err = rt
        .new_instance("m::Car", vec![kv("name", one(3i64))])
        .unwrap_err();
    assert!(matches!(err, RuntimeError::TypeMismatch { ref found, .. } if found == "Integer"));

    let err = rt.new_instance("m::Car", vec![kv("nmae", one("x"))]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "The property 'nmae' can't be found in the type 'Car' or in its hierarchy."
    );
    assert!(matches!(
        rt.new_instance("m::Nope", vec![]),
        Err(RuntimeError::UnknownClass { .. })
    ));
}

// ---------------------------------------------------------------------------
// Reverse association wiring
// ---------------------------------------------------------------------------

#[test]
fn to_one_reverse_end_points_back() {
    let repo = compile(
        "Class m::Car {}\n\
Class m::Owner {}\n\
Association m::Ownership { owner: Owner[1]; car: Car[0..1]; }\n\
function m::make(): Car[1] { ^Car(owner=^Owner()); }\n\
function m::backCount(c: Car[1]): Integer[1] { $c.owner.car->size(); }",
    );
    let mut rt = Runtime::new(repo.graph());

    let made = rt.evaluate_function("m::make", vec![]).unwrap();
    let car = made[0].as_instance().unwrap();
    let owner = rt.get(car, "owner").unwrap()[0].as_instance().unwrap();
    assert_eq!(rt.get(owner, "car").unwrap(), one(car));

    let count = rt.evaluate_function("m::backCount", vec![one(car)]).unwrap();
    assert_eq!(count, one(1i64));

    // A second car takes over the to-one reverse end.
    let second = rt
        .new_instance("m::Car", vec![kv("owner", one(owner))])
        .unwrap();
    assert_eq!(rt.get(owner, "car").unwrap(), one(second));
    // The displaced car no longer points at the owner.
    assert!(rt.get(car, "owner").unwrap().is_empty());
    assert_eq!(rt.get(second, "owner").unwrap(), one(owner));
}

#[test]
fn to_many_reverse_end_respects_its_upper_bound() {
    let repo = compile(
        "Class m::Table {}\n\
Class m::Guest {}\n\
Association m::Seating { table: Table[0..1]; guests: Guest[0..2]; }",
    );
    let mut rt = Runtime::new(repo.graph());
    let table = rt.new_instance("m::Table", vec![]).unwrap();
    let first = rt.new_instance("m::Guest", vec![kv("table", one(table))]).unwrap();
    let second = rt.new_instance("m::Guest", vec![kv("table", one(table))]).unwrap();
    let seated: Values = smallvec![first.into(), second.into()];
    assert_eq!(rt.get(table, "guests").unwrap(), seated);

    let before = rt.heap().len();
    let err = rt
        .new_instance("m::Guest", vec![kv("table", one(table))])
        .unwrap_err();
    assert_eq!(
        err,
        RuntimeError::Multiplicity {
            property: "guests".into(),
            class: "Table".into(),
            expected: "[0..2]".into(),
            given: 3,
        }
    );
    assert_eq!(rt.heap().len(), before);
    assert_eq!(rt.get(table, "guests").unwrap(), seated);
}

#[test]
fn to_many_reverse_end_accumulates_across_copies() {
    let repo = compile(
        "Class m::Car { name: String[1]; }\n\
Class m::Owner {}\n\
Association m::Fleet { owner: Owner[0..1]; cars: Car[*]; }",
    );
    let mut rt = Runtime::new(repo.graph());
    let owner = rt.new_instance("m::Owner", vec![]).unwrap();
    let first = rt
        .new_instance("m::Car", vec![kv("name", one("a")), kv("owner", one(owner))])
        .unwrap();
    let copy = rt.copy_instance(first, vec![kv("name", one("b"))]).unwrap();

    let cars: Values = smallvec![first.into(), copy.into()];
    assert_eq!(rt.get(owner, "cars").unwrap(), cars);
    assert_eq!(rt.get(copy, "owner").unwrap(), one(owner));
    assert_eq!(rt.get(copy, "name").unwrap(), one("b"));
    assert_eq!(rt.get(first, "name").unwrap(), one("a"));

    // Copying the owner re-derives every reverse end for the copy.
    let owner_copy = rt.copy_instance(owner, vec![]).unwrap();
    assert_eq!(rt.get(first, "owner").unwrap(), one(owner_copy));
    assert_eq!(rt.get(copy, "owner").unwrap(), one(owner_copy));
    assert_eq!(rt.get(owner_copy, "cars").unwrap(), cars);
    assert!(rt.get(owner, "cars").unwrap().is_empty());
}

#[test]
fn reverse_links_are_not_duplicated() {
    let repo = compile(
        "Class m::Club {}\n\
Class m::Person {}\n\
Association m::Membership { clubs: Club[*]; members: Person[*]; }",
    );
    let mut rt = Runtime::new(repo.graph());
    let person = rt.new_instance("m::Person", vec![]).unwrap();

    let twice: Values = smallvec![person.into(), person.into()];
    let club = rt.new_instance("m::Club", vec![kv("members", twice)]).unwrap();
    assert_eq!(rt.get(person, "clubs").unwrap(), one(club));

    // An explicit empty collection links nothing.
    let empty = rt
        .new_instance("m::Club", vec![kv("members", Values::new())])
        .unwrap();
    assert!(rt.instance(empty).unwrap().is_set("members"));
    assert_eq!(rt.get(person, "clubs").unwrap(), one(club));

    let second = rt.copy_instance(club, vec![]).unwrap();
    let clubs: Values = smallvec![club.into(), second.into()];
    assert_eq!(rt.get(person, "clubs").unwrap(), clubs);
}

// ---------------------------------------------------------------------------
// Constraints
// ---------------------------------------------------------------------------

fn person(name: &str, age: i64) -> Vec<(String, Values)> {
    vec![kv("name", one(name)), kv("age", one(age))]
}

#[test]
fn violated_constraint_fails_with_its_message() {
    let repo = compile(PEOPLE);
    let mut rt = Runtime::new(repo.graph());
    let err = rt.new_instance("m::Person", person("Ann", 12)).unwrap_err();
    insta::assert_snapshot!(
        err.to_string(),
        @"Constraint :[adult] violated in the Class Person, Message: too young: Ann"
    );
    assert!(err.is_constraint_violation());
    assert!(rt.heap().is_empty());
}

#[test]
fn warn_level_constraints_do_not_fail() {
    let repo = compile(PEOPLE);
    let mut rt = Runtime::new(repo.graph());
    assert!(rt.new_instance("m::Person", person("admin", 30)).is_ok());
}

#[test]
fn own_constraints_run_before_inherited_ones() {
    let repo = compile(PEOPLE);
    let mut rt = Runtime::new(repo.graph());

    let mut young_without_badge = person("Bob", 12);
    young_without_badge.push(kv("badge", one(0i64)));
    let err = rt.new_instance("m::Employee", young_without_badge).unwrap_err();
    assert_eq!(
        err,
        RuntimeError::ConstraintViolation {
            constraint: "hasBadge".into(),
            class: "Employee".into(),
            message: None,
        }
    );

    let mut young_with_badge = person("Bob", 12);
    young_with_badge.push(kv("badge", one(7i64)));
    let err = rt.new_instance("m::Employee", young_with_badge).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::ConstraintViolation { ref constraint, ref class, .. }
            if constraint == "adult" && class == "Person"
    ));
}

#[test]
fn constraint_checks_can_be_disabled() {
    let repo = compile(PEOPLE);
    let options = RuntimeOptions {
        check_constraints: false,
        ..RuntimeOptions::default()
    };
    let mut rt = Runtime::with_options(repo.graph(), options);
    assert!(rt.new_instance("m::Person", person("Ann", 12)).is_ok());
}

#[test]
fn new_expressions_check_constraints_too() {
    let text = format!("{}function m::child(): Person[1] {{ ^Person(name='Kim', age=9); }}", PEOPLE);
    let repo = compile(&text);
    let mut rt = Runtime::new(repo.graph());
    let err = rt.evaluate_function("m::child", vec![]).unwrap_err();
    assert!(err.is_constraint_violation());
}

// ---------------------------------------------------------------------------
// Dynamic construction
// ---------------------------------------------------------------------------

#[test]
fn constraints_override_replaces_the_result() {
    let repo = compile(PEOPLE);
    let mut rt = Runtime::new(repo.graph());
    let overrides = DynamicNewOverrides {
        getter_override: None,
        constraints_override: Some(Box::new(|_: InstanceId, outcomes: &[ConstraintOutcome]| -> Values {
            outcomes
                .iter()
                .filter(|o| !o.passed)
                .map(|o| Value::String(format!("{}:{}", o.constraint, o.message.clone().unwrap_or_default())))
                .collect()
        })),
    };
    let result = rt
        .dynamic_new("m::Person", person("admin", 12), overrides)
        .unwrap();
    let expected: Values = smallvec!["adult:too young: admin".into(), "notAdmin:".into()];
    assert_eq!(result, expected);
    // The instance itself was still constructed.
    assert_eq!(rt.heap().len(), 1);
}

#[test]
fn dynamic_new_without_overrides_behaves_like_new() {
    let repo = compile(PEOPLE);
    let mut rt = Runtime::new(repo.graph());
    let result = rt
        .dynamic_new("m::Person", person("Ann", 40), DynamicNewOverrides::default())
        .unwrap();
    let id = result[0].as_instance().unwrap();
    assert_eq!(rt.instance(id).unwrap().class_path, "m::Person");

    let err = rt
        .dynamic_new("m::Person", person("Ann", 4), DynamicNewOverrides::default())
        .unwrap_err();
    assert!(err.is_constraint_violation());
}

#[test]
fn getter_override_intercepts_reads() {
    let repo = compile(PEOPLE);
    let mut rt = Runtime::new(repo.graph());
    let getter: GetterOverride = Rc::new(|_: &Instance, property: &str| match property {
        "age" => Some(smallvec![Value::Integer(40)]),
        _ => None,
    });
    let overrides = DynamicNewOverrides {
        getter_override: Some(getter),
        constraints_override: None,
    };

    // The stored age would violate `adult`; constraints read through the getter.
    let result = rt
        .dynamic_new("m::Person", person("Ann", 12), overrides)
        .unwrap();
    let id = result[0].as_instance().unwrap();
    assert_eq!(rt.get(id, "age").unwrap(), one(40i64));
    assert_eq!(rt.get(id, "name").unwrap(), one("Ann"));
    assert_eq!(rt.instance(id).unwrap().get("age"), &[Value::Integer(12)]);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Construction succeeds exactly when the value count lies inside
        /// the declared range; a failure leaves the heap untouched.
        #[test]
        fn construction_enforces_declared_ranges(lower in 0usize..3, extra in 1usize..3, given in 0usize..7) {
            let upper = lower + extra;
            let repo = compile(&format!("Class m::Bag {{ tags: String[{}..{}]; }}", lower, upper));
            let mut rt = Runtime::new(repo.graph());

            let tags: Values = (0..given).map(|i| Value::String(format!("t{}", i))).collect();
            let result = rt.new_instance("m::Bag", vec![kv("tags", tags)]);
            if (lower..=upper).contains(&given) {
                prop_assert!(result.is_ok());
                prop_assert_eq!(rt.heap().len(), 1);
            } else {
                let is_multiplicity_error = matches!(result, Err(RuntimeError::Multiplicity { .. }));
                prop_assert!(is_multiplicity_error);
                prop_assert!(rt.heap().is_empty());
            }
        }
    }
}
