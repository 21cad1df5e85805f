//! Function evaluation against compiled models.

use mgraph_compiler::Repository;
use mgraph_runtime::{Runtime, RuntimeError, RuntimeOptions, Value, Values};
use smallvec::smallvec;

fn compile(text: &str) -> Repository {
    let mut repo = Repository::new();
    repo.add_source("model.pure", text).unwrap();
    repo.compile().unwrap();
    repo
}

fn one(value: impl Into<Value>) -> Values {
    smallvec![value.into()]
}

const MATH: &str = "function m::add(a: Integer[1], b: Integer[1]): Integer[1] { $a + $b; }\n\
function m::half(x: Integer[1]): Float[1] { $x * 0.5; }\n\
function m::shout(s: String[1]): String[1] { $s + '!'; }\n\
function m::names(): String[*] { ['a', 'b', 'c']; }\n\
function m::count(): Integer[1] { names()->size(); }\n\
function m::big(x: Integer[0..1]): Boolean[1] { $x->isNotEmpty() && $x > 3; }";

#[test]
fn functions_resolve_by_name_or_signature() {
    let repo = compile(MATH);
    let mut rt = Runtime::new(repo.graph());

    let args = vec![one(2i64), one(3i64)];
    assert_eq!(rt.evaluate_function("m::add", args.clone()).unwrap(), one(5i64));
    assert_eq!(
        rt.evaluate_function("m::add(Integer[1],Integer[1]):Integer[1]", args)
            .unwrap(),
        one(5i64)
    );
    assert_eq!(
        rt.evaluate_function("m::nothing", vec![]),
        Err(RuntimeError::UnknownFunction {
            signature: "m::nothing".into()
        })
    );
}

#[test]
fn calls_run_the_overload_matching_their_arguments() {
    let repo = compile(
        "function m::describe(s: String[1]): String[1] { 'text'; }\n\
function m::describe(i: Integer[1]): String[1] { 'number'; }\n\
function m::both(): String[1] { describe(1) + describe('x'); }",
    );
    let mut rt = Runtime::new(repo.graph());
    assert_eq!(rt.evaluate_function("m::both", vec![]).unwrap(), one("numbertext"));
}

#[test]
fn argument_count_is_checked() {
    let repo = compile(MATH);
    let mut rt = Runtime::new(repo.graph());
    let err = rt.evaluate_function("m::add", vec![one(1i64)]).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::ArgumentCount { expected: 2, given: 1, .. }
    ));
}

#[test]
fn arithmetic_and_strings() {
    let repo = compile(MATH);
    let mut rt = Runtime::new(repo.graph());
    assert_eq!(rt.evaluate_function("m::half", vec![one(3i64)]).unwrap(), one(1.5));
    assert_eq!(rt.evaluate_function("m::shout", vec![one("hey")]).unwrap(), one("hey!"));

    let overflow = rt
        .evaluate_function("m::add", vec![one(i64::MAX), one(1i64)])
        .unwrap_err();
    assert_eq!(overflow, RuntimeError::IntegerOverflow { operator: "+".into() });
}

#[test]
fn collections_flatten_and_count() {
    let repo = compile(MATH);
    let mut rt = Runtime::new(repo.graph());
    let names: Values = smallvec!["a".into(), "b".into(), "c".into()];
    assert_eq!(rt.evaluate_function("m::names", vec![]).unwrap(), names);
    assert_eq!(rt.evaluate_function("m::count", vec![]).unwrap(), one(3i64));
}

#[test]
fn and_short_circuits() {
    let repo = compile(MATH);
    let mut rt = Runtime::new(repo.graph());
    // `$x > 3` on an empty collection would fail; it is never evaluated.
    assert_eq!(rt.evaluate_function("m::big", vec![Values::new()]).unwrap(), one(false));
    assert_eq!(rt.evaluate_function("m::big", vec![one(5i64)]).unwrap(), one(true));
    assert_eq!(rt.evaluate_function("m::big", vec![one(2i64)]).unwrap(), one(false));
}

#[test]
fn enum_values_and_instances() {
    let repo = compile(
        "Enum m::Color { RED, GREEN }\n\
Class m::Car { name: String[1]; color: Color[1] = Color.RED; }\n\
function m::label(): String[1] { ^Car(name='x').name; }\n\
function m::paint(c: Car[1]): Car[1] { ^$c(color=Color.GREEN); }",
    );
    let mut rt = Runtime::new(repo.graph());
    assert_eq!(rt.evaluate_function("m::label", vec![]).unwrap(), one("x"));

    let car = rt
        .new_instance("m::Car", vec![("name".to_string(), one("y"))])
        .unwrap();
    let red = Value::Enum {
        enumeration: "m::Color".into(),
        value: "RED".into(),
    };
    assert_eq!(rt.get(car, "color").unwrap(), one(red));

    let painted = rt.evaluate_function("m::paint", vec![one(car)]).unwrap();
    let painted = painted[0].as_instance().unwrap();
    assert_ne!(painted, car);
    assert_eq!(rt.get(painted, "color").unwrap()[0].to_string(), "m::Color.GREEN");
    assert_eq!(rt.get(painted, "name").unwrap(), one("y"));

    let err = rt.get(car, "colour").unwrap_err();
    assert_eq!(
        err.to_string(),
        "The property 'colour' can't be found in the type 'Car' or in its hierarchy."
    );
}

#[test]
fn runaway_recursion_is_bounded() {
    let repo = compile("function m::forever(n: Integer[1]): Integer[1] { forever($n + 1); }");
    let options = RuntimeOptions {
        max_eval_depth: 8,
        ..RuntimeOptions::default()
    };
    let mut rt = Runtime::with_options(repo.graph(), options);
    let err = rt.evaluate_function("m::forever", vec![one(0i64)]).unwrap_err();
    assert_eq!(
        err,
        RuntimeError::RecursionLimitExceeded {
            function: "m::forever(Integer[1]):Integer[1]".into(),
            limit: 8,
        }
    );

    // The depth counter unwinds; later calls start from zero again.
    let err = rt.evaluate_function("m::forever", vec![one(0i64)]).unwrap_err();
    assert!(matches!(err, RuntimeError::RecursionLimitExceeded { .. }));
}
