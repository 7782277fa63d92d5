//! Module resolution: loads the entry file and everything it imports,
//! then orders the modules so that every module follows its dependencies.
//!
//! - each file is read and parsed once, memoized by absolute path
//! - a module is registered before its imports are followed, so an
//!   import cycle shows up as an edge to an already-registered module
//! - ordering is Kahn's algorithm seeded in discovery order, which makes
//!   the result deterministic for a given set of files

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::ast::{self, Ident};
use crate::diagnostic::{has_errors, Diagnostic};
use crate::parser;
use crate::source_map::SourceMap;
use crate::span::{FileId, Span};

/// Extension appended to import paths that have none.
pub const SOURCE_EXTENSION: &str = "clarity";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Function,
    Type,
}

#[derive(Debug, Clone)]
pub struct ResolvedImport {
    pub names: Vec<Ident>,
    pub target: ModuleId,
    pub span: Span,
}

/// One loaded source file. Immutable once resolution is done.
#[derive(Debug, Clone)]
pub struct ModuleNode {
    pub id: ModuleId,
    /// Unique within one compilation (`util`, `util_2`, ...).
    pub name: String,
    pub path: PathBuf,
    pub file_id: FileId,
    pub ast: ast::Module,
    pub imports: Vec<ResolvedImport>,
    pub exports: BTreeMap<String, ExportKind>,
    /// Distinct imported modules, in first-import order.
    pub deps: Vec<ModuleId>,
}

#[derive(Debug)]
pub struct ModuleGraph {
    /// Indexed by `ModuleId`.
    pub nodes: Vec<ModuleNode>,
    /// Dependencies first, entry last.
    pub order: Vec<ModuleId>,
    pub entry: ModuleId,
    pub source_map: SourceMap,
}

impl ModuleGraph {
    pub fn get(&self, id: ModuleId) -> &ModuleNode {
        &self.nodes[id.0 as usize]
    }

    /// Modules in resolved order.
    pub fn ordered(&self) -> impl Iterator<Item = &ModuleNode> {
        self.order.iter().map(|id| self.get(*id))
    }

    pub fn entry_module(&self) -> &ModuleNode {
        self.get(self.entry)
    }

    /// Graph of one module that imports nothing.
    pub fn single(
        name: String,
        path: PathBuf,
        file_id: FileId,
        ast: ast::Module,
        source_map: SourceMap,
    ) -> ModuleGraph {
        let node = finish_node(
            ModuleId(0),
            Pending {
                path,
                name,
                file_id,
                ast,
                imports: Vec::new(),
            },
        );
        ModuleGraph {
            nodes: vec![node],
            order: vec![ModuleId(0)],
            entry: ModuleId(0),
            source_map,
        }
    }
}

type SourceProvider = Box<dyn Fn(&Path) -> io::Result<String>>;

/// Builds a [`ModuleGraph`] from an entry file.
pub struct Resolver {
    provider: Option<SourceProvider>,
    source_map: SourceMap,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

struct Pending {
    path: PathBuf,
    name: String,
    file_id: FileId,
    ast: ast::Module,
    imports: Vec<ResolvedImport>,
}

#[derive(Default)]
struct LoadState {
    cache: HashMap<PathBuf, ModuleId>,
    nodes: Vec<Option<Pending>>,
    stack: Vec<ModuleId>,
    names: HashSet<String>,
    /// Import edges that point back into the active load stack.
    cycles: Vec<(Vec<ModuleId>, Span)>,
    diagnostics: Vec<Diagnostic>,
}

impl Resolver {
    /// Resolver reading from the file system.
    pub fn new() -> Self {
        Self {
            provider: None,
            source_map: SourceMap::new(),
        }
    }

    /// Resolver reading sources through `provider` instead of the file
    /// system. Paths are normalized lexically and never canonicalized.
    pub fn with_provider(provider: impl Fn(&Path) -> io::Result<String> + 'static) -> Self {
        Self {
            provider: Some(Box::new(provider)),
            source_map: SourceMap::new(),
        }
    }

    /// Sources loaded so far. Still populated after a failed resolution.
    pub fn source_map(&self) -> &SourceMap {
        &self.source_map
    }

    pub fn take_source_map(&mut self) -> SourceMap {
        std::mem::take(&mut self.source_map)
    }

    pub fn resolve(&mut self, entry: &Path) -> Result<ModuleGraph, Vec<Diagnostic>> {
        let mut state = LoadState::default();
        let entry_path = match self.locate(entry) {
            Some(p) => p,
            None => {
                return Err(vec![Diagnostic::error(
                    format!("cannot find entry file `{}`", entry.display()),
                    Span::dummy(),
                )]);
            }
        };
        let entry_id = match self.load(entry_path, &mut state) {
            Some(id) => id,
            None => return Err(state.diagnostics),
        };
        if has_errors(&state.diagnostics) {
            return Err(state.diagnostics);
        }

        let nodes: Vec<ModuleNode> = state
            .nodes
            .into_iter()
            .enumerate()
            .filter_map(|(i, p)| p.map(|p| finish_node(ModuleId(i as u32), p)))
            .collect();

        let mut diagnostics = check_imported_names(&nodes);
        let order = match topo_order(&nodes) {
            Ok(order) => order,
            Err(residual) => {
                diagnostics.extend(cycle_diagnostics(&nodes, &state.cycles, &residual));
                return Err(diagnostics);
            }
        };
        if has_errors(&diagnostics) {
            return Err(diagnostics);
        }

        log::debug!(
            "resolved {} module(s): {}",
            nodes.len(),
            order
                .iter()
                .map(|id| nodes[id.0 as usize].name.as_str())
                .collect::<Vec<_>>()
                .join(" -> ")
        );
        Ok(ModuleGraph {
            nodes,
            order,
            entry: entry_id,
            source_map: self.take_source_map(),
        })
    }

    /// Load one file and, recursively, everything it imports.
    /// Returns `None` when the file cannot be parsed.
    fn load(&mut self, path: PathBuf, state: &mut LoadState) -> Option<ModuleId> {
        if let Some(id) = state.cache.get(&path) {
            return Some(*id);
        }
        let src = match self.read(&path) {
            Ok(src) => src,
            Err(err) => {
                state.diagnostics.push(Diagnostic::error(
                    format!("cannot read `{}`: {err}", path.display()),
                    Span::dummy(),
                ));
                return None;
            }
        };
        let file_id = self.source_map.add(path.clone(), src);
        let parsed = parser::parse_source(file_id, self.source_map.get(file_id).unwrap_or_default());
        if has_errors(&parsed.diagnostics) {
            state.diagnostics.extend(parsed.diagnostics);
            return None;
        }
        state.diagnostics.extend(parsed.diagnostics);

        let id = ModuleId(state.nodes.len() as u32);
        let name = unique_name(&path, &mut state.names);
        log::trace!("loading module `{name}` ({}) as {file_id}", path.display());
        state.cache.insert(path.clone(), id);
        let imports: Vec<ast::ImportDecl> = parsed.module.imports().cloned().collect();
        state.nodes.push(Some(Pending {
            path: path.clone(),
            name,
            file_id,
            ast: parsed.module,
            imports: Vec::new(),
        }));
        state.stack.push(id);

        let mut resolved = Vec::new();
        for import in imports {
            let Some(target_path) = self.import_target(&path, &import.path) else {
                state.diagnostics.push(
                    Diagnostic::error(
                        format!("cannot find module `{}`", import.path),
                        import.span,
                    )
                    .with_help("import paths are relative to the importing file"),
                );
                continue;
            };
            if let Some(&target) = state.cache.get(&target_path) {
                if let Some(pos) = state.stack.iter().position(|m| *m == target) {
                    let mut cycle = state.stack[pos..].to_vec();
                    cycle.push(target);
                    state.cycles.push((cycle, import.span));
                }
            }
            let target = self.load(target_path, state)?;
            resolved.push(ResolvedImport {
                names: import.names,
                target,
                span: import.span,
            });
        }

        state.stack.pop();
        if let Some(Some(node)) = state.nodes.get_mut(id.0 as usize) {
            node.imports = resolved;
        }
        Some(id)
    }

    fn read(&self, path: &Path) -> io::Result<String> {
        match &self.provider {
            Some(provider) => provider(path),
            None => std::fs::read_to_string(path),
        }
    }

    /// Absolute, normalized path of an existing source file.
    fn locate(&self, path: &Path) -> Option<PathBuf> {
        match &self.provider {
            Some(provider) => {
                let p = normalize(path);
                provider(&p).is_ok().then_some(p)
            }
            None => path.canonicalize().ok(),
        }
    }

    fn import_target(&self, importer: &Path, spec: &str) -> Option<PathBuf> {
        let base = importer.parent().unwrap_or_else(|| Path::new("."));
        let mut target = base.join(spec);
        if target.extension().is_none() {
            target.set_extension(SOURCE_EXTENSION);
        }
        self.locate(&target)
    }
}

fn finish_node(id: ModuleId, p: Pending) -> ModuleNode {
    let mut exports = BTreeMap::new();
    for decl in &p.ast.decls {
        match decl {
            ast::Decl::Function(f) if f.exported => {
                exports.insert(f.name.name.clone(), ExportKind::Function);
            }
            ast::Decl::Type(t) if t.exported => {
                exports.insert(t.name.name.clone(), ExportKind::Type);
            }
            _ => {}
        }
    }
    let mut deps = Vec::new();
    for import in &p.imports {
        if !deps.contains(&import.target) {
            deps.push(import.target);
        }
    }
    ModuleNode {
        id,
        name: p.name,
        path: p.path,
        file_id: p.file_id,
        ast: p.ast,
        imports: p.imports,
        exports,
        deps,
    }
}

/// Module names are the file stem, suffixed `_2`, `_3`, ... until the name
/// is not yet taken by any other module.
fn unique_name(path: &Path, taken: &mut HashSet<String>) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("module")
        .to_string();
    let mut name = stem.clone();
    let mut suffix = 2;
    while taken.contains(&name) {
        name = format!("{stem}_{suffix}");
        suffix += 1;
    }
    taken.insert(name.clone());
    name
}

/// Every imported name must be exported by its target module.
fn check_imported_names(nodes: &[ModuleNode]) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for node in nodes {
        for import in &node.imports {
            let target = &nodes[import.target.0 as usize];
            for name in &import.names {
                if target.exports.contains_key(&name.name) {
                    continue;
                }
                let declared = target.ast.decls.iter().any(|d| match d {
                    ast::Decl::Function(f) => f.name.name == name.name,
                    ast::Decl::Type(t) => t.name.name == name.name,
                    ast::Decl::Import(_) => false,
                });
                let mut diag = Diagnostic::error(
                    format!("module `{}` has no export named `{}`", target.name, name.name),
                    name.span,
                )
                .with_secondary_label(import.span, Some("in this import".to_string()));
                if declared {
                    diag = diag.with_help(format!(
                        "`{}` is declared in `{}` but not exported; add `export` to its declaration",
                        name.name, target.name
                    ));
                }
                diagnostics.push(diag);
            }
        }
    }
    diagnostics
}

/// Kahn's algorithm. On failure returns the modules left over, which all
/// lie on or behind an import cycle.
fn topo_order(nodes: &[ModuleNode]) -> Result<Vec<ModuleId>, Vec<ModuleId>> {
    let mut in_degree: Vec<usize> = nodes.iter().map(|n| n.deps.len()).collect();
    let mut dependents: Vec<Vec<ModuleId>> = vec![Vec::new(); nodes.len()];
    for node in nodes {
        for dep in &node.deps {
            dependents[dep.0 as usize].push(node.id);
        }
    }
    let mut queue: VecDeque<ModuleId> = nodes
        .iter()
        .filter(|n| n.deps.is_empty())
        .map(|n| n.id)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(id) = queue.pop_front() {
        order.push(id);
        for dependent in &dependents[id.0 as usize] {
            let d = &mut in_degree[dependent.0 as usize];
            *d -= 1;
            if *d == 0 {
                queue.push_back(*dependent);
            }
        }
    }
    if order.len() == nodes.len() {
        Ok(order)
    } else {
        Err(nodes
            .iter()
            .map(|n| n.id)
            .filter(|id| !order.contains(id))
            .collect())
    }
}

fn cycle_diagnostics(
    nodes: &[ModuleNode],
    cycles: &[(Vec<ModuleId>, Span)],
    residual: &[ModuleId],
) -> Vec<Diagnostic> {
    let name = |id: &ModuleId| nodes[id.0 as usize].name.clone();
    if cycles.is_empty() {
        let names: Vec<String> = residual.iter().map(name).collect();
        return vec![Diagnostic::error(
            format!("import cycle among modules: {}", names.join(", ")),
            Span::dummy(),
        )];
    }
    cycles
        .iter()
        .map(|(cycle, span)| {
            let path: Vec<String> = cycle.iter().map(name).collect();
            Diagnostic::error(format!("import cycle detected: {}", path.join(" -> ")), *span)
                .with_help("modules cannot import each other; move the shared declarations into a separate module")
        })
        .collect()
}

/// Resolve `.` and `..` components without touching the file system.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn names(graph: &ModuleGraph) -> Vec<String> {
        graph.ordered().map(|m| m.name.clone()).collect()
    }

    #[test]
    fn dependency_comes_before_importer() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("a.clarity"),
            "import { helper } from \"./b\"\nfunction main() -> Int64 { helper() }\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("b.clarity"),
            "export function helper() -> Int64 { 1 }\n",
        )
        .unwrap();

        let graph = Resolver::new()
            .resolve(&dir.path().join("a.clarity"))
            .unwrap();
        assert_eq!(names(&graph), vec!["b", "a"]);
        assert_eq!(graph.entry_module().name, "a");
        assert_eq!(graph.source_map.len(), 2);
    }

    #[test]
    fn shared_dependency_is_loaded_once() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("main.clarity"),
            "import { f } from \"./left\"\nimport { g } from \"./right\"\nfunction main() -> Int64 { f() + g() }\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("left.clarity"),
            "import { base } from \"./base\"\nexport function f() -> Int64 { base() }\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("right.clarity"),
            "import { base } from \"./base.clarity\"\nexport function g() -> Int64 { base() }\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("base.clarity"),
            "export function base() -> Int64 { 2 }\n",
        )
        .unwrap();

        let graph = Resolver::new()
            .resolve(&dir.path().join("main.clarity"))
            .unwrap();
        assert_eq!(graph.nodes.len(), 4);
        assert_eq!(names(&graph), vec!["base", "left", "right", "main"]);
    }

    #[test]
    fn missing_file_is_reported_at_import() {
        let dir = tempdir().unwrap();
        let src = "import { x } from \"./nope\"\nfunction main() -> Unit { () }\n";
        fs::write(dir.path().join("main.clarity"), src).unwrap();
        let diags = Resolver::new()
            .resolve(&dir.path().join("main.clarity"))
            .unwrap_err();
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("cannot find module `./nope`"));
        assert_eq!(diags[0].span().start, 0);
        assert_eq!(diags[0].span().end as usize, src.find('\n').unwrap());
    }

    #[test]
    fn unexported_name_is_rejected() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("main.clarity"),
            "import { hidden } from \"./lib\"\nfunction main() -> Int64 { hidden() }\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("lib.clarity"),
            "function hidden() -> Int64 { 1 }\n",
        )
        .unwrap();
        let diags = Resolver::new()
            .resolve(&dir.path().join("main.clarity"))
            .unwrap_err();
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("no export named `hidden`"));
        assert!(diags[0].help.as_deref().unwrap().contains("not exported"));
    }

    #[test]
    fn cycle_is_fatal_and_named() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("a.clarity"),
            "import { g } from \"./b\"\nexport function f() -> Int64 { 1 }\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("b.clarity"),
            "import { f } from \"./a\"\nexport function g() -> Int64 { 2 }\n",
        )
        .unwrap();
        let diags = Resolver::new()
            .resolve(&dir.path().join("a.clarity"))
            .unwrap_err();
        assert_eq!(diags.len(), 1);
        assert!(
            diags[0].message.contains("a -> b -> a"),
            "{}",
            diags[0].message
        );
        // reported at the import in `b`, which closes the cycle
        assert_eq!(diags[0].span().file_id, FileId(1));
    }

    #[test]
    fn provider_replaces_file_system() {
        let mut resolver = Resolver::with_provider(|path: &Path| {
            match path.to_str() {
                Some("/virtual/main.clarity") => Ok(
                    "import { one } from \"./lib/one\"\nfunction main() -> Int64 { one() }".to_string(),
                ),
                Some("/virtual/lib/one.clarity") => {
                    Ok("export function one() -> Int64 { 1 }".to_string())
                }
                _ => Err(io::Error::new(io::ErrorKind::NotFound, "no such file")),
            }
        });
        let graph = resolver
            .resolve(Path::new("/virtual/./main.clarity"))
            .unwrap();
        assert_eq!(names(&graph), vec!["one", "main"]);
    }

    #[test]
    fn duplicate_stems_get_unique_names() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(
            dir.path().join("util.clarity"),
            "import { f } from \"./sub/util\"\nexport function g() -> Int64 { f() }\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("sub").join("util.clarity"),
            "export function f() -> Int64 { 1 }\n",
        )
        .unwrap();
        let graph = Resolver::new()
            .resolve(&dir.path().join("util.clarity"))
            .unwrap();
        assert_eq!(names(&graph), vec!["util_2", "util"]);
    }

    #[test]
    fn suffixed_names_skip_existing_modules() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(
            dir.path().join("util.clarity"),
            "import { a } from \"./util_2\"\nimport { b } from \"./sub/util\"\nfunction main() -> Int64 { a() + b() }\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("util_2.clarity"),
            "export function a() -> Int64 { 1 }\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("sub").join("util.clarity"),
            "export function b() -> Int64 { 2 }\n",
        )
        .unwrap();
        let graph = Resolver::new()
            .resolve(&dir.path().join("util.clarity"))
            .unwrap();
        assert_eq!(names(&graph), vec!["util_2", "util_3", "util"]);
    }

    #[test]
    fn parse_error_in_dependency_aborts_resolution() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("a.clarity"),
            "import { f } from \"./b\"\nfunction main() -> Int64 { f() }\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("b.clarity"),
            "export function f() -> Int64 { 1 + }\n",
        )
        .unwrap();
        let diags = Resolver::new()
            .resolve(&dir.path().join("a.clarity"))
            .unwrap_err();
        assert!(diags[0].message.starts_with("expected expression"), "{}", diags[0].message);
        assert!(diags.iter().all(|d| d.span().file_id == FileId(1)));
    }
}
