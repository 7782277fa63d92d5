//! Pipeline entry points.
//!
//! Neither entry point returns `Err` or lets a panic escape: every
//! problem ends up in [`CompileOutput::diagnostics`].

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use crate::ast;
use crate::codegen_wasm::{self, CodegenError};
use crate::diagnostic::{has_errors, Diagnostic};
use crate::error::CoreError;
use crate::hir::HirProgram;
use crate::lexer::{self, Token};
use crate::module_graph::{ModuleGraph, Resolver};
use crate::monomorphize;
use crate::parser;
use crate::source_map::SourceMap;
use crate::span::{FileId, Span};
use crate::typecheck::Checker;

#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    /// Stop after checking.
    pub check_only: bool,
    /// Return the parsed modules and the typed tree, then stop.
    pub emit_ast: bool,
    /// Return only the token stream of the entry file.
    pub emit_tokens: bool,
    /// Return the text form instead of the binary.
    pub emit_text_form: bool,
}

#[derive(Debug, Default)]
pub struct CompileOutput {
    pub diagnostics: Vec<Diagnostic>,
    pub binary: Option<Vec<u8>>,
    pub text_form: Option<String>,
    /// Parsed modules in resolved order.
    pub ast: Option<Vec<ast::Module>>,
    pub hir: Option<HirProgram>,
    pub tokens: Option<Vec<Token>>,
    pub source_map: SourceMap,
}

impl CompileOutput {
    pub fn has_errors(&self) -> bool {
        has_errors(&self.diagnostics)
    }
}

/// Compile one source text. Imports need file resolution and are rejected.
pub fn compile_source(text: &str, filename: &str, options: CompileOptions) -> CompileOutput {
    let mut out = CompileOutput::default();
    let file_id = out.source_map.add(PathBuf::from(filename), text.to_string());

    if options.emit_tokens {
        emit_tokens(&mut out, file_id, text);
        return out;
    }

    let parsed = parser::parse_source(file_id, text);
    out.diagnostics.extend(parsed.diagnostics);
    if out.has_errors() {
        return out;
    }
    for import in parsed.module.imports() {
        out.diagnostics.push(
            Diagnostic::error(
                "imports are not supported when compiling a single source text",
                import.span,
            )
            .with_help("compile the entry file from disk so imports can be resolved"),
        );
    }
    if out.has_errors() {
        return out;
    }

    let name = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("main")
        .to_string();
    let source_map = std::mem::take(&mut out.source_map);
    let graph = ModuleGraph::single(name, PathBuf::from(filename), file_id, parsed.module, source_map);
    run(graph, options, out)
}

/// Resolve `path` and everything it imports, check all modules and
/// generate one module exporting the entry module's exported functions.
pub fn compile_file(path: &Path, options: CompileOptions) -> CompileOutput {
    let mut out = CompileOutput::default();

    if options.emit_tokens {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let file_id = out.source_map.add(path.to_path_buf(), text.clone());
                emit_tokens(&mut out, file_id, &text);
            }
            Err(err) => out.diagnostics.push(Diagnostic::error(
                format!("cannot read `{}`: {err}", path.display()),
                Span::dummy(),
            )),
        }
        return out;
    }

    let mut resolver = Resolver::new();
    match resolver.resolve(path) {
        Ok(graph) => run(graph, options, out),
        Err(diags) => {
            out.diagnostics = diags;
            out.source_map = resolver.take_source_map();
            out
        }
    }
}

fn emit_tokens(out: &mut CompileOutput, file_id: FileId, text: &str) {
    let lexed = lexer::lex(file_id, text);
    out.diagnostics.extend(lexed.diagnostics);
    out.tokens = Some(lexed.tokens);
}

fn run(mut graph: ModuleGraph, options: CompileOptions, mut out: CompileOutput) -> CompileOutput {
    out.source_map = std::mem::take(&mut graph.source_map);
    if options.emit_ast {
        out.ast = Some(graph.ordered().map(|m| m.ast.clone()).collect());
    }

    log::debug!("checking {} module(s)", graph.nodes.len());
    let mut checker = Checker::new();
    out.diagnostics.extend(checker.check_program(&graph));
    if out.has_errors() {
        return out;
    }
    let program = checker.finish();
    if options.emit_ast {
        out.hir = Some(program);
        return out;
    }
    if options.check_only {
        return out;
    }

    log::debug!("generating code for entry module `{}`", graph.entry_module().name);
    let entry = graph.entry;
    let generated = panic::catch_unwind(AssertUnwindSafe(|| -> Result<Vec<u8>, CodegenError> {
        let mono = monomorphize::monomorphize(&program)?;
        codegen_wasm::generate_wasm(&mono, &program.types, entry)
    }));
    let bytes = match generated {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(err)) => {
            out.diagnostics.push(codegen_diagnostic(&err, &graph));
            return out;
        }
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            out.diagnostics
                .push(CoreError::internal(format!("code generation panicked: {msg}")).into_diagnostic());
            return out;
        }
    };

    if options.emit_text_form {
        match wasmprinter::print_bytes(&bytes) {
            Ok(text) => out.text_form = Some(text),
            Err(err) => out.diagnostics.push(Diagnostic::error(
                format!("cannot render the text form: {err}"),
                Span::dummy(),
            )),
        }
    } else {
        out.binary = Some(bytes);
    }
    out
}

/// Codegen failures point at the failing function when it is known and
/// at the entry module's first function otherwise.
fn codegen_diagnostic(err: &CodegenError, graph: &ModuleGraph) -> Diagnostic {
    let entry = graph.entry_module();
    let span = err.span().unwrap_or_else(|| {
        entry
            .ast
            .functions()
            .next()
            .map_or(Span::point(entry.file_id, 0), |f| f.span)
    });
    let diag = Diagnostic::error(format!("code generation failed: {err}"), span);
    match err {
        CodegenError::InstantiationDepth { .. } => {
            diag.with_help("generic functions may not call themselves at ever larger types")
        }
        _ => diag,
    }
}
