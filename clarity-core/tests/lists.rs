mod harness;
use harness::Program;
use wasmi::core::F64;

#[test]
fn list_builtins() {
    let src = r#"
function sum(xs: List<Int64>) -> Int64 {
    if is_empty(xs) { 0 } else { head(xs) + sum(tail(xs)) }
}

export function total() -> Int64 { sum(append([1, 2, 3], 4)) }

export function sizes() -> Int64 {
    let empty: List<Int64> = [];
    length(empty) + length([7, 8]) * 10 + length(append(empty, 1)) * 100
}

export function first_of_tail() -> Int64 { head(tail([5, 6, 7])) }
"#;
    let mut p = Program::new(src);
    assert_eq!(p.call::<(), i64>("total", ()), 10);
    assert_eq!(p.call::<(), i64>("sizes", ()), 120);
    assert_eq!(p.call::<(), i64>("first_of_tail", ()), 6);
}

#[test]
fn append_copies() {
    let src = r#"
export function run() -> Int64 {
    let base = [1, 2];
    let longer = append(base, 3);
    let other = append(base, 30);
    length(base) * 1000 + head(tail(tail(longer))) * 100 + head(tail(tail(other)))
}
"#;
    let mut p = Program::new(src);
    assert_eq!(p.call::<(), i64>("run", ()), 2330);
}

#[test]
fn lists_of_floats_strings_and_records() {
    let src = r#"
type Item = { name: String, price: Float64 }

function total(items: List<Item>) -> Float64 {
    if is_empty(items) { 0.0 } else { head(items).price + total(tail(items)) }
}

function join(parts: List<String>) -> String {
    if is_empty(parts) { "" } else { head(parts) ++ join(tail(parts)) }
}

export function bill() -> Float64 {
    total([{ name: "tea", price: 1.25 }, { name: "cake", price: 2.5 }])
}

export function words() -> String { join(append(["a", "b"], "c")) }

export function mean() -> Float64 {
    let xs = [1.0, 2.0, 4.5];
    (head(xs) + head(tail(xs)) + head(tail(tail(xs)))) / int_to_float(length(xs))
}
"#;
    let mut p = Program::new(src);
    assert_eq!(f64::from(p.call::<(), F64>("bill", ())), 3.75);
    let ptr = p.call::<(), i32>("words", ());
    assert_eq!(p.string_at(ptr), "abc");
    assert_eq!(f64::from(p.call::<(), F64>("mean", ())), 2.5);
}

#[test]
fn head_of_empty_list_traps() {
    let src = r#"
export function boom() -> Int64 { head(tail([1])) }

export function boom_tail() -> Int64 { length(tail(tail([1]))) }
"#;
    let mut p = Program::new(src);
    assert!(p.try_call::<(), i64>("boom", ()).is_err());
    assert!(p.try_call::<(), i64>("boom_tail", ()).is_err());
}

#[test]
fn large_lists_grow_memory() {
    let src = r#"
function build(n: Int64, acc: List<Int64>) -> List<Int64> {
    if n == 0 { acc } else { build(n - 1, append(acc, n)) }
}

export function run() -> Int64 { length(build(2000, [])) }
"#;
    let mut p = Program::new(src);
    // quadratic copying: about 16 MiB in total, well past the initial page
    assert_eq!(p.call::<(), i64>("run", ()), 2000);
}
