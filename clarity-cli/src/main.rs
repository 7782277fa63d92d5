mod host;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use clarity_core::{compile_file, CompileOptions, CompileOutput, Diagnostic, SourceMap};
use wasmi::{Engine, Linker, Module, Store, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Emit {
    /// WebAssembly binary
    Wasm,
    /// WebAssembly text form
    Wat,
    /// Parsed and typed trees
    Ast,
    /// Token stream of the entry file
    Tokens,
}

/// Compile a Clarity program to WebAssembly.
#[derive(Parser, Debug)]
#[command(
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CLARITYC_COMMIT"), ")"),
    about,
    long_about = None
)]
struct Cli {
    /// Entry file; its imports are resolved relative to it
    input: PathBuf,

    #[arg(short, long, help = "Output path (defaults to the input with the emitted extension)")]
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "wasm", value_name = "FORMAT")]
    emit: Emit,

    #[arg(long, help = "Only check the program, do not generate code")]
    check: bool,

    #[arg(long, help = "Run the compiled module with wasmi")]
    run: bool,

    #[arg(long, default_value = "main", help = "Exported function called by --run")]
    entry: String,

    #[arg(short, long, action = clap::ArgAction::Count, help = "Increase log output (-v, -vv)")]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose);
    execute(cli)
}

fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn options_for(cli: &Cli) -> CompileOptions {
    CompileOptions {
        check_only: cli.check,
        emit_ast: cli.emit == Emit::Ast,
        emit_tokens: cli.emit == Emit::Tokens,
        emit_text_form: cli.emit == Emit::Wat,
    }
}

fn execute(cli: Cli) -> Result<()> {
    if !cli.input.exists() {
        bail!("input file {} does not exist", cli.input.display());
    }
    let output = compile_file(&cli.input, options_for(&cli));
    for diag in &output.diagnostics {
        eprintln!("{}", render_diagnostic(diag, &output.source_map));
    }
    if output.has_errors() {
        bail!(
            "could not compile {} ({} error(s))",
            cli.input.display(),
            output.diagnostics.iter().filter(|d| d.is_error()).count()
        );
    }
    if cli.check {
        return Ok(());
    }

    match cli.emit {
        Emit::Tokens => {
            for token in output.tokens.iter().flatten() {
                println!("{:>5}..{:<5} {}", token.span.start, token.span.end, token.kind);
            }
        }
        Emit::Ast => {
            println!("{:#?}", output.ast);
            println!("{:#?}", output.hir);
        }
        Emit::Wat => {
            let text = output.text_form.as_deref().unwrap_or_default();
            write_output(&output_path(&cli, "wat"), text.as_bytes())?;
        }
        Emit::Wasm => {
            let bytes = binary(&output)?;
            write_output(&output_path(&cli, "wasm"), bytes)?;
            if cli.run {
                run_wasm(bytes, &cli.entry)?;
            }
        }
    }
    Ok(())
}

fn binary(output: &CompileOutput) -> Result<&[u8]> {
    output
        .binary
        .as_deref()
        .context("compiler produced no binary")
}

fn output_path(cli: &Cli, extension: &str) -> PathBuf {
    cli.output
        .clone()
        .unwrap_or_else(|| cli.input.with_extension(extension))
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }
    fs::write(path, bytes).with_context(|| format!("failed to write output file {}", path.display()))?;
    log::debug!("wrote {} byte(s) to {}", bytes.len(), path.display());
    Ok(())
}

fn run_wasm(bytes: &[u8], entry: &str) -> Result<()> {
    let engine = Engine::default();
    let module = Module::new(&engine, bytes).context("failed to compile wasm artifact")?;
    let mut linker = Linker::new(&engine);
    host::define(&mut linker)?;
    let mut store = Store::new(&engine, ());
    let instance = linker
        .instantiate(&mut store, &module)
        .and_then(|pre| pre.start(&mut store))
        .context("failed to instantiate module")?;
    let func = instance
        .get_func(&store, entry)
        .with_context(|| format!("module does not export a function `{entry}`"))?;
    let ty = func.ty(&store);
    if !ty.params().is_empty() {
        bail!("`{entry}` takes parameters and cannot be run directly");
    }
    let mut results: Vec<Value> = ty.results().iter().map(|t| Value::default(*t)).collect();
    func.call(&mut store, &[], &mut results)
        .with_context(|| format!("`{entry}` trapped"))?;
    match results.first() {
        Some(Value::I32(v)) => println!("{entry} returned {v}"),
        Some(Value::I64(v)) => println!("{entry} returned {v}"),
        Some(Value::F64(v)) => println!("{entry} returned {}", f64::from(*v)),
        Some(other) => println!("{entry} returned {other:?}"),
        None => {}
    }
    Ok(())
}

/// `error: message` followed by `--> file:line:col`, the source line with
/// a caret underline and the help line.
fn render_diagnostic(diag: &Diagnostic, sources: &SourceMap) -> String {
    let mut out = diag.to_string();
    let span = diag.span();
    let location = sources
        .line_col(span.file_id, span.start)
        .zip(sources.path(span.file_id));
    if let Some(((line, col), path)) = location {
        let gutter = (line + 1).to_string().len();
        out.push_str(&format!(
            "\n{:gutter$}--> {}:{}:{}",
            "",
            path.display(),
            line + 1,
            col + 1
        ));
        if let Some(text) = sources.line_str(span.file_id, line) {
            let width = (span.len() as usize).clamp(1, text.len().saturating_sub(col).max(1));
            out.push_str(&format!("\n{:gutter$} |", ""));
            out.push_str(&format!("\n{} | {}", line + 1, text));
            out.push_str(&format!("\n{:gutter$} | {}{}", "", " ".repeat(col), "^".repeat(width)));
        }
    }
    if let Some(help) = &diag.help {
        out.push_str(&format!("\n  = help: {help}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use clarity_core::span::{FileId, Span};

    #[test]
    fn cli_parses_defaults() {
        let cli = Cli::parse_from(["clarityc", "main.clarity"]);
        assert_eq!(cli.emit, Emit::Wasm);
        assert_eq!(cli.entry, "main");
        assert!(!cli.run);
        assert!(!cli.check);
        assert_eq!(output_path(&cli, "wasm"), PathBuf::from("main.wasm"));
    }

    #[test]
    fn cli_maps_flags_onto_options() {
        let cli = Cli::parse_from(["clarityc", "app.clarity", "--emit", "wat", "--check", "-vv"]);
        let options = options_for(&cli);
        assert!(options.emit_text_form);
        assert!(options.check_only);
        assert!(!options.emit_ast);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn renders_location_and_help() {
        let mut sources = SourceMap::new();
        let file = sources.add(PathBuf::from("app.clarity"), "let a = 1\nlet b = x + 1\n".to_string());
        assert_eq!(file, FileId(0));
        let diag = Diagnostic::error("unknown name `x`", Span::new(file, 18, 19))
            .with_help("declare `x` before using it");
        let text = render_diagnostic(&diag, &sources);
        assert_eq!(
            text,
            "error: unknown name `x`\n --> app.clarity:2:9\n  |\n2 | let b = x + 1\n  |         ^\n  = help: declare `x` before using it"
        );
    }
}
