mod harness;
use std::fs;

use clarity_core::module_graph::Resolver;
use clarity_core::{compile_file, CompileOptions};
use harness::{compile_path, Host, Program};
use tempfile::tempdir;

#[test]
fn imported_functions_link_into_one_module() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("a.clarity"),
        r#"
import { double, twice } from "./b"

function inc(x: Int64) -> Int64 { x + 1 }

export function main() -> Int64 { double(20) + twice(inc, 0) }
"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("b.clarity"),
        r#"
export function double(x: Int64) -> Int64 { x * 2 }

export function twice<T>(f: (T) -> T, x: T) -> T { f(f(x)) }

export function unused() -> Int64 { 0 }
"#,
    )
    .unwrap();

    let wasm = compile_path(&dir.path().join("a.clarity"));
    let mut p = Program::from_bytes(&wasm, Host::default());
    assert_eq!(p.call::<(), i64>("main", ()), 42);
    // only the entry module's exports are exported
    assert!(!p.has_export("double"));
    assert!(!p.has_export("unused"));
}

#[test]
fn dependency_is_ordered_before_importer() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("a.clarity"),
        "import { f } from \"./b\"\nexport function main() -> Int64 { f() }\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("b.clarity"),
        "import { g } from \"./c\"\nexport function f() -> Int64 { g() + 1 }\n",
    )
    .unwrap();
    fs::write(dir.path().join("c.clarity"), "export function g() -> Int64 { 1 }\n").unwrap();

    let out = compile_file(
        &dir.path().join("a.clarity"),
        CompileOptions {
            emit_ast: true,
            ..Default::default()
        },
    );
    assert!(!out.has_errors(), "{:#?}", out.diagnostics);
    let hir = out.hir.unwrap();
    let names: Vec<&str> = hir.functions().map(|f| f.qualified_name.as_str()).collect();
    assert_eq!(names, vec!["c.g", "b.f", "a.main"]);
    assert_eq!(out.ast.unwrap().len(), 3);
}

#[test]
fn resolution_is_deterministic() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("main.clarity"),
        "import { x } from \"./x\"\nimport { y } from \"./y\"\nimport { z } from \"./z\"\nexport function main() -> Int64 { x() + y() + z() }\n",
    )
    .unwrap();
    for (name, v) in [("x", 1), ("y", 2), ("z", 3)] {
        fs::write(
            dir.path().join(format!("{name}.clarity")),
            format!("export function {name}() -> Int64 {{ {v} }}\n"),
        )
        .unwrap();
    }
    let entry = dir.path().join("main.clarity");

    let order = || -> Vec<String> {
        let graph = Resolver::new().resolve(&entry).unwrap();
        graph.ordered().map(|m| m.name.clone()).collect()
    };
    let first = order();
    assert_eq!(first, vec!["x", "y", "z", "main"]);
    for _ in 0..4 {
        assert_eq!(order(), first);
    }

    let a = compile_path(&entry);
    let b = compile_path(&entry);
    assert_eq!(a, b);
}

#[test]
fn import_cycle_is_fatal() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("a.clarity"),
        "import { g } from \"./b\"\nexport function f() -> Int64 { g() }\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("b.clarity"),
        "import { f } from \"./a\"\nexport function g() -> Int64 { f() }\n",
    )
    .unwrap();
    let out = compile_file(&dir.path().join("a.clarity"), CompileOptions::default());
    assert!(out.has_errors());
    assert!(out.binary.is_none());
    assert_eq!(out.diagnostics.len(), 1);
    assert!(out.diagnostics[0].message.contains("import cycle"));
    assert!(out.diagnostics[0].message.contains("a -> b -> a"));
    // the source map still lets the caller render the location
    assert_eq!(out.source_map.len(), 2);
}

#[test]
fn errors_in_a_dependency_block_the_importer() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("main.clarity"),
        "import { f } from \"./lib\"\nexport function main() -> Int64 { f() }\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("lib.clarity"),
        "export function f() -> Int64 { \"not a number\" }\n",
    )
    .unwrap();
    let out = compile_file(&dir.path().join("main.clarity"), CompileOptions::default());
    let errors: Vec<_> = out.diagnostics.iter().filter(|d| d.is_error()).collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("must return Int64"));
    assert!(out
        .diagnostics
        .iter()
        .any(|d| d.message.contains("`main` was not checked")));
}

#[test]
fn imported_effects_still_apply() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("main.clarity"),
        "import { shout } from \"./io\"\nexport function main() { shout(\"hi\") }\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("io.clarity"),
        "effect[Log] export function shout(s: String) { print_string(s ++ \"!\") }\n",
    )
    .unwrap();
    let entry = dir.path().join("main.clarity");
    let out = compile_file(&entry, CompileOptions::default());
    assert_eq!(out.diagnostics.len(), 1);
    assert!(out.diagnostics[0].message.contains("`shout` requires effect(s) Log"));

    fs::write(
        &entry,
        "import { shout } from \"./io\"\neffect[Log] export function main() { shout(\"hi\") }\n",
    )
    .unwrap();
    let mut p = Program::from_bytes(&compile_path(&entry), Host::default());
    p.call::<(), ()>("main", ());
    assert_eq!(p.output(), ["hi!"]);
}

#[test]
fn private_helpers_stay_apart_across_similar_file_names() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    fs::write(
        dir.path().join("util.clarity"),
        "import { a } from \"./util_2\"\nimport { b } from \"./sub/util\"\nexport function main() -> Int64 { a() * 10 + b() }\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("util_2.clarity"),
        "function h() -> Int64 { 1 }\nexport function a() -> Int64 { h() }\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("sub").join("util.clarity"),
        "function h() -> Int64 { 2 }\nexport function b() -> Int64 { h() }\n",
    )
    .unwrap();
    let mut p = Program::from_bytes(&compile_path(&dir.path().join("util.clarity")), Host::default());
    assert_eq!(p.call::<(), i64>("main", ()), 12);
}

#[test]
fn parse_error_in_dependency_stops_before_checking() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("a.clarity"),
        "import { f } from \"./b\"\nexport function main() -> Int64 { f() + true }\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("b.clarity"),
        "export function f() -> Int64 { 1 + }\n",
    )
    .unwrap();
    let out = compile_file(&dir.path().join("a.clarity"), CompileOptions::default());
    assert!(out.has_errors());
    assert!(out.binary.is_none());
    assert!(out.hir.is_none());
    assert!(out.diagnostics[0].message.starts_with("expected expression"));
    // the type error in `a` is never reported
    assert!(out
        .diagnostics
        .iter()
        .all(|d| d.span().file_id == clarity_core::span::FileId(1)));
}
