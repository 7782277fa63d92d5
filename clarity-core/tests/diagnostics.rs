use clarity_core::lexer::TokenKind;
use clarity_core::{compile_source, CompileOptions, Severity};

fn errors(src: &str) -> Vec<clarity_core::Diagnostic> {
    let out = compile_source(src, "main.clarity", CompileOptions::default());
    assert!(out.binary.is_none());
    out.diagnostics
}

#[test]
fn parser_recovers_at_the_next_declaration() {
    let src = "function f( -> Int64 { 1 }\n\
               function g() -> Int64 { true + }\n\
               export function h() -> Int64 { 1 }\n";
    let diags = errors(src);
    assert_eq!(diags.len(), 2, "{diags:#?}");
    assert_eq!(diags[0].message, "expected identifier, found `->`");
    assert!(diags[1].message.starts_with("expected expression"), "{}", diags[1].message);
    assert!(diags.iter().all(|d| d.severity == Severity::Error));
}

#[test]
fn lexer_errors_are_reported_with_spans() {
    let src = "function f() -> String { \"open }\n";
    let diags = errors(src);
    let d = &diags[0];
    assert_eq!(d.message, "unterminated string literal");
    assert_eq!(d.span().start as usize, src.find('"').unwrap());
}

#[test]
fn unclosed_block_points_back_to_its_opening() {
    let src = "function f() -> Int64 {\n    let x = 1;\n";
    let diags = errors(src);
    let d = diags.iter().find(|d| d.message == "unclosed block").expect("unclosed block");
    assert_eq!(d.secondary.len(), 1);
    assert_eq!(d.secondary[0].span.start as usize, src.find('{').unwrap());
}

#[test]
fn type_errors_carry_line_and_column() {
    let src = "function f() -> Int64 {\n    let s = \"x\";\n    s * 2\n}\n";
    let out = compile_source(src, "main.clarity", CompileOptions::default());
    let d = &out.diagnostics[0];
    assert!(d.message.contains("operator `*`"), "{}", d.message);
    let (line, col) = out.source_map.line_col(d.span().file_id, d.span().start).unwrap();
    assert_eq!((line, col), (2, 4));
    assert_eq!(out.source_map.path(d.span().file_id).unwrap().to_str(), Some("main.clarity"));
}

#[test]
fn all_errors_of_a_module_are_collected() {
    let src = r#"
function a() -> Int64 { missing() }
function b() -> Bool { 1 }
function c(x: Unknown) -> Int64 { 0 }
"#;
    let diags = errors(src);
    let messages: Vec<&str> = diags.iter().map(|d| d.message.as_str()).collect();
    assert!(messages.contains(&"unknown function `missing`"), "{messages:#?}");
    assert!(messages.iter().any(|m| m.contains("function `b` must return Bool")), "{messages:#?}");
    assert!(messages.contains(&"unknown type `Unknown`"), "{messages:#?}");
}

#[test]
fn check_only_and_tokens_stop_early() {
    let src = "export function f() -> Int64 { 1 + 2 }";
    let checked = compile_source(
        src,
        "main.clarity",
        CompileOptions {
            check_only: true,
            ..Default::default()
        },
    );
    assert!(checked.diagnostics.is_empty());
    assert!(checked.binary.is_none() && checked.text_form.is_none());

    let lexed = compile_source(
        src,
        "main.clarity",
        CompileOptions {
            emit_tokens: true,
            ..Default::default()
        },
    );
    let kinds: Vec<TokenKind> = lexed.tokens.unwrap().into_iter().map(|t| t.kind).collect();
    assert_eq!(kinds.first(), Some(&TokenKind::KwExport));
    assert_eq!(kinds.last(), Some(&TokenKind::Eof));
    assert!(kinds.contains(&TokenKind::IntLiteral(2)));
    assert!(lexed.hir.is_none());
}

#[test]
fn runtime_export_names_cannot_be_exported() {
    let src = "effect[FileSystem] export function __alloc() -> String { read_file(\"a.txt\") }\n";
    let diags = errors(src);
    assert_eq!(diags.len(), 1);
    assert!(diags[0].message.contains("`__alloc` cannot be exported"), "{}", diags[0].message);
    assert_eq!(diags[0].span().start as usize, src.find("__alloc").unwrap());

    let diags = errors("export function memory() -> Int64 { 1 }");
    assert_eq!(diags.len(), 1);
    assert!(diags[0].message.contains("reserved"));
}
