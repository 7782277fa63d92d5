use clarity_core::{compile_source, CompileOptions};

fn text(src: &str) -> String {
    let out = compile_source(
        src,
        "main.clarity",
        CompileOptions {
            emit_text_form: true,
            ..Default::default()
        },
    );
    assert!(!out.has_errors(), "{:#?}", out.diagnostics);
    assert!(out.binary.is_none());
    out.text_form.expect("text form")
}

#[test]
fn exports_and_memory_are_rendered() {
    let wat = text("export function add(a: Int64, b: Int64) -> Int64 { a + b }");
    assert!(wat.starts_with("(module"), "{wat}");
    assert!(wat.contains("(export \"memory\" (memory 0))"), "{wat}");
    assert!(wat.contains("(export \"add\""), "{wat}");
    assert!(wat.contains("i64.add"), "{wat}");
    assert!(wat.contains("main.add"), "{wat}");
}

#[test]
fn host_imports_come_from_env() {
    let wat = text("effect[Log] export function hello() { print_string(\"hi\"); print_int(1) }");
    assert!(wat.contains("(import \"env\" \"print_string\""), "{wat}");
    assert!(wat.contains("(import \"env\" \"print_int\""), "{wat}");
    assert!(!wat.contains("\"print_float\""), "{wat}");
    assert!(!wat.contains("(export \"__alloc\""), "{wat}");
}

#[test]
fn string_returning_host_functions_export_the_allocator() {
    let wat = text("export function show(n: Int64) -> String { int_to_string(n) }");
    assert!(wat.contains("(import \"env\" \"int_to_string\""), "{wat}");
    assert!(wat.contains("(export \"__alloc\""), "{wat}");
}

#[test]
fn function_values_use_a_table() {
    let wat = text(
        "function inc(x: Int64) -> Int64 { x + 1 }\n\
         export function run(x: Int64) -> Int64 { let f = inc; f(x) }",
    );
    assert!(wat.contains("(table"), "{wat}");
    assert!(wat.contains("(elem"), "{wat}");
    assert!(wat.contains("call_indirect"), "{wat}");
}
