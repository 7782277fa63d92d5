mod harness;
use harness::{compile_errors, Program};

#[test]
fn fields_read_back_in_any_declaration_order() {
    let src = r#"
type Mixed = { flag: Bool, big: Int64, name: String, ratio: Float64 }
type Swapped = { ratio2: Float64, name2: String, big2: Int64, flag2: Bool }
type Packed = { a: Int64, b: Bool, c: Bool, d: Int64 }

function score_mixed(m: Mixed) -> Int64 {
    if m.flag { m.big + string_length(m.name) + float_to_int(m.ratio) } else { 0 }
}

function score_swapped(s: Swapped) -> Int64 {
    if s.flag2 { s.big2 + string_length(s.name2) + float_to_int(s.ratio2) } else { 0 }
}

export function mixed() -> Int64 {
    score_mixed({ ratio: 2.5, name: "xy", big: 40, flag: true })
}

export function swapped() -> Int64 {
    score_swapped({ flag2: true, big2: 40, name2: "xy", ratio2: 2.5 })
}

export function packed() -> Int64 {
    let p = { d: 4, c: true, b: false, a: 1 };
    let bits = if p.b { 10 } else { 0 } + if p.c { 100 } else { 0 };
    p.a + p.d * 1000 + bits
}
"#;
    let mut p = Program::new(src);
    assert_eq!(p.call::<(), i64>("mixed", ()), 44);
    assert_eq!(p.call::<(), i64>("swapped", ()), 44);
    assert_eq!(p.call::<(), i64>("packed", ()), 4101);
}

#[test]
fn records_nest_and_travel_through_functions() {
    let src = r#"
type Point = { x: Int64, y: Int64 }
type Segment = { start: Point, stop: Point, label: String }

function length_sq(s: Segment) -> Int64 {
    let dx = s.stop.x - s.start.x;
    let dy = s.stop.y - s.start.y;
    dx * dx + dy * dy
}

function shift(p: Point, by: Int64) -> Point { { x: p.x + by, y: p.y + by } }

export function run(n: Int64) -> Int64 {
    let a = { x: 1, y: 2 };
    let seg = { label: "s", stop: shift(a, n), start: a };
    length_sq(seg)
}

export function label() -> String {
    let seg = { start: { x: 0, y: 0 }, stop: { x: 1, y: 1 }, label: "diag" };
    seg.label
}
"#;
    let mut p = Program::new(src);
    assert_eq!(p.call::<i64, i64>("run", 3), 18);
    let ptr = p.call::<(), i32>("label", ());
    assert_eq!(p.string_at(ptr), "diag");
}

#[test]
fn unknown_field_set_is_rejected() {
    let src = r#"
type Point = { x: Int64, y: Int64 }

function f() -> Int64 { let p = { x: 1, z: 2 }; 0 }
"#;
    let diags = compile_errors(src);
    assert!(
        diags[0].message.contains("no record type has exactly the fields"),
        "{}",
        diags[0].message
    );
}
