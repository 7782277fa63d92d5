mod harness;
use harness::{compile_errors, Program};
use wasmi::core::F64;

#[test]
fn concatenation_and_conversion() {
    let src = r#"
export function label(n: Int64) -> String { "n=" ++ int_to_string(n) }

export function ratio(x: Float64) -> String { "x=" ++ float_to_string(x) }
"#;
    let mut p = Program::new(src);
    let ptr = p.call::<i64, i32>("label", -17);
    assert_eq!(p.string_at(ptr), "n=-17");
    let ptr = p.call::<F64, i32>("ratio", F64::from(0.25));
    assert_eq!(p.string_at(ptr), "x=0.25");
}

#[test]
fn equality_compares_contents() {
    let src = r#"
export function is_answer(n: Int64) -> Bool { int_to_string(n) == "42" }

export function differs(n: Int64) -> Bool { "4" ++ int_to_string(n) != "42" }
"#;
    let mut p = Program::new(src);
    assert_eq!(p.call::<i64, i32>("is_answer", 42), 1);
    assert_eq!(p.call::<i64, i32>("is_answer", 41), 0);
    assert_eq!(p.call::<i64, i32>("differs", 2), 0);
    assert_eq!(p.call::<i64, i32>("differs", 3), 1);
}

#[test]
fn length_counts_bytes() {
    let src = r#"
export function sizes() -> Int64 {
    string_length("") + string_length("hello") * 10 + string_length("é") * 100
}
"#;
    let mut p = Program::new(src);
    assert_eq!(p.call::<(), i64>("sizes", ()), 250);
}

#[test]
fn repeated_literals_share_one_block() {
    let src = r#"
export function a() -> String { "same" }
export function b() -> String { "same" }
export function c() -> String { "other" }
"#;
    let mut p = Program::new(src);
    let a = p.call::<(), i32>("a", ());
    let b = p.call::<(), i32>("b", ());
    let c = p.call::<(), i32>("c", ());
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(p.string_at(c), "other");
}

#[test]
fn plus_on_strings_suggests_concat() {
    let diags = compile_errors("function f(a: String) -> String { a + \"!\" }");
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].help.as_deref(), Some("use `++` to concatenate strings"));
}
