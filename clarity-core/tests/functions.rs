mod harness;
use harness::Program;
use wasmi::core::F64;

#[test]
fn exported_add_round_trips() {
    let mut p = Program::new("export function add(a: Int64, b: Int64) -> Int64 { a + b }");
    assert_eq!(p.call::<(i64, i64), i64>("add", (5, 3)), 8);
}

#[test]
fn only_exported_functions_are_visible() {
    let src = r#"
function helper(x: Int64) -> Int64 { x * 2 }

export function twice(x: Int64) -> Int64 { helper(x) }
"#;
    let mut p = Program::new(src);
    assert_eq!(p.call::<i64, i64>("twice", 21), 42);
    assert!(p.has_export("memory"));
    assert!(!p.has_export("helper"));
    assert!(!p.has_export("main.helper"));
    // no host built-in returns a heap value, so no allocator export
    assert!(!p.has_export("__alloc"));
}

#[test]
fn recursion_and_conditionals() {
    let src = r#"
export function fact(n: Int64) -> Int64 {
    if n <= 1 { 1 } else { n * fact(n - 1) }
}

export function classify(n: Int64) -> Int64 {
    if n < 0 { -1 } else if n == 0 { 0 } else { 1 }
}
"#;
    let mut p = Program::new(src);
    assert_eq!(p.call::<i64, i64>("fact", 10), 3_628_800);
    assert_eq!(p.call::<i64, i64>("classify", -7), -1);
    assert_eq!(p.call::<i64, i64>("classify", 0), 0);
    assert_eq!(p.call::<i64, i64>("classify", 9), 1);
}

#[test]
fn let_bindings_and_nested_blocks() {
    let src = r#"
export function calc(x: Int64) -> Int64 {
    let a = x + 1;
    let b: Int64 = {
        let c = a * 2;
        c - 3
    };
    a + b
}
"#;
    let mut p = Program::new(src);
    // a = 5, b = 7
    assert_eq!(p.call::<i64, i64>("calc", 4), 12);
}

#[test]
fn booleans_short_circuit() {
    let src = r#"
export function safe_ratio(x: Int64) -> Bool { x != 0 and 10 / x > 1 }

export function either(a: Bool, b: Bool) -> Bool { a or !b }
"#;
    let mut p = Program::new(src);
    assert_eq!(p.call::<i64, i32>("safe_ratio", 0), 0);
    assert_eq!(p.call::<i64, i32>("safe_ratio", 3), 1);
    assert_eq!(p.call::<i64, i32>("safe_ratio", 20), 0);
    assert_eq!(p.call::<(i32, i32), i32>("either", (0, 1)), 0);
    assert_eq!(p.call::<(i32, i32), i32>("either", (0, 0)), 1);
}

#[test]
fn float_arithmetic_and_conversions() {
    let src = r#"
export function mean(a: Float64, b: Float64) -> Float64 { (a + b) / 2.0 }

export function truncate(x: Float64) -> Int64 { float_to_int(x) }

export function widen(n: Int64) -> Float64 { int_to_float(n) * 0.5 }
"#;
    let mut p = Program::new(src);
    assert_eq!(f64::from(p.call::<(F64, F64), F64>("mean", (F64::from(1.0), F64::from(2.0)))), 1.5);
    assert_eq!(p.call::<F64, i64>("truncate", F64::from(-2.75)), -2);
    assert_eq!(f64::from(p.call::<i64, F64>("widen", 7)), 3.5);
}

#[test]
fn integer_division_by_zero_traps() {
    let mut p = Program::new("export function div(a: Int64, b: Int64) -> Int64 { a / b }");
    assert_eq!(p.call::<(i64, i64), i64>("div", (-9, 2)), -4);
    assert!(p.try_call::<(i64, i64), i64>("div", (1, 0)).is_err());
}

#[test]
fn unit_functions_have_no_results() {
    let src = r#"
function nothing() -> Unit { () }

export function run() { nothing(); nothing() }
"#;
    let mut p = Program::new(src);
    p.call::<(), ()>("run", ());
}
