//! Core of the Clarity compiler.
//!
//! Pipeline:
//!   entry file
//!     -> module_graph (resolve imports, detect cycles, order dependencies)
//!     -> lexer / parser (per file)
//!     -> typecheck (names, types, effects, exhaustiveness) -> hir
//!     -> monomorphize (one instance per generic use)
//!     -> codegen_wasm (validated binary, optional text form)

pub mod span;
pub mod diagnostic;
pub mod error;
pub mod source_map;

pub mod ast;
pub mod lexer;
pub mod parser;

pub mod effects;
pub mod types;
pub mod builtins;
pub mod module_graph;
pub mod symbols;
pub mod hir;
pub mod exhaustive;
pub mod typecheck;

pub mod monomorphize;
pub mod layout;
pub mod codegen_wasm;
pub mod compiler;

pub use codegen_wasm::CodegenError;
pub use compiler::{compile_file, compile_source, CompileOptions, CompileOutput};
pub use diagnostic::{Diagnostic, Severity};
pub use error::CoreError;
pub use source_map::SourceMap;
pub use span::Span;
