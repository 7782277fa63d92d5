//! Type, effect and exhaustiveness checking.
//!
//! One [`Checker`] lives for a whole compilation and owns the symbol
//! table and the type context. Modules are checked one at a time in
//! resolved order; a module with errors leaves no trace in the symbol
//! table, and modules that import it are skipped.

use std::collections::{HashMap, HashSet};

use crate::ast::{self, BinaryOp, ExprKind, Literal, PatternKind, TypeExpr, TypeExprKind, UnaryOp};
use crate::builtins::{self, Builtin};
use crate::codegen_wasm::RESERVED_EXPORTS;
use crate::diagnostic::{has_errors, Diagnostic};
use crate::effects::{Effect, EffectSet};
use crate::exhaustive;
use crate::hir::*;
use crate::module_graph::{ModuleGraph, ModuleId, ModuleNode};
use crate::span::Span;
use crate::symbols::{Export, Symbol, SymbolTable, ValueRef};
use crate::types::{DeclId, FieldDef, Type, TypeCtx, TypeDef, TypeDefKind, UnifyError, VariantDef};

const PRIMITIVE_TYPES: [&str; 6] = ["Int64", "Float64", "String", "Bool", "Unit", "List"];

pub struct Checker {
    types: TypeCtx,
    symbols: SymbolTable,
    builtins: HashMap<&'static str, Builtin>,
    checked: Vec<HirModule>,
    failed: HashSet<ModuleId>,
}

impl Default for Checker {
    fn default() -> Self {
        Self::new()
    }
}

impl Checker {
    pub fn new() -> Self {
        Self {
            types: TypeCtx::new(),
            symbols: SymbolTable::new(),
            builtins: builtins::builtins()
                .into_iter()
                .map(|b| (b.name, b))
                .collect(),
            checked: Vec::new(),
            failed: HashSet::new(),
        }
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn types(&self) -> &TypeCtx {
        &self.types
    }

    /// True once `module` has been checked without errors.
    pub fn is_checked(&self, module: ModuleId) -> bool {
        self.checked.iter().any(|m| m.id == module)
    }

    /// Check every module of `graph` in resolved order.
    pub fn check_program(&mut self, graph: &ModuleGraph) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for node in graph.ordered() {
            let blocked = node
                .imports
                .iter()
                .find(|i| self.failed.contains(&i.target));
            if let Some(import) = blocked {
                let dep = &graph.get(import.target).name;
                log::debug!("skipping module `{}`: dependency `{dep}` failed", node.name);
                diagnostics.push(Diagnostic::info(
                    format!(
                        "module `{}` was not checked because its dependency `{dep}` has errors",
                        node.name
                    ),
                    import.span,
                ));
                self.failed.insert(node.id);
                continue;
            }
            diagnostics.extend(self.check_module(node));
        }
        diagnostics
    }

    /// Check one module whose dependencies have all been checked.
    pub fn check_module(&mut self, module: &ModuleNode) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        self.symbols.scope_mut(module.id);
        self.bind_imports(module, &mut diags);
        self.register_types(module, &mut diags);
        self.register_functions(module, &mut diags);

        let mut functions = Vec::new();
        for f in module.ast.functions() {
            if let Some(hir) = self.check_function(module, f, &mut diags) {
                functions.push(hir);
            }
        }

        if has_errors(&diags) {
            log::debug!("module `{}` failed with {} diagnostic(s)", module.name, diags.len());
            self.symbols.remove_module(module.id);
            self.failed.insert(module.id);
        } else {
            log::debug!("module `{}` checked: {} function(s)", module.name, functions.len());
            self.checked.push(HirModule {
                id: module.id,
                name: module.name.clone(),
                functions,
            });
        }
        diags
    }

    pub fn finish(self) -> HirProgram {
        HirProgram {
            modules: self.checked,
            types: self.types,
        }
    }

    fn bind_imports(&mut self, module: &ModuleNode, diags: &mut Vec<Diagnostic>) {
        for import in &module.imports {
            let exports = match self.symbols.scope(import.target) {
                Some(scope) => scope.exports.clone(),
                None => {
                    diags.push(Diagnostic::error(
                        "imported module has not been checked",
                        import.span,
                    ));
                    continue;
                }
            };
            for name in &import.names {
                match exports.get(&name.name) {
                    Some(Export::Function(q)) => {
                        self.define_value(module.id, &name.name, ValueRef::Function(q.clone()), name.span, diags);
                    }
                    Some(Export::Type(decl)) => {
                        let decl = *decl;
                        self.define_type(module.id, &name.name, decl, name.span, diags);
                        let variants: Vec<String> = self
                            .types
                            .def(decl)
                            .variants()
                            .iter()
                            .map(|v| v.name.clone())
                            .collect();
                        for (variant, vname) in variants.iter().enumerate() {
                            self.define_value(
                                module.id,
                                vname,
                                ValueRef::Constructor { decl, variant },
                                name.span,
                                diags,
                            );
                        }
                    }
                    None => diags.push(Diagnostic::error(
                        format!("imported module has no export named `{}`", name.name),
                        name.span,
                    )),
                }
            }
        }
    }

    fn define_value(
        &mut self,
        module: ModuleId,
        name: &str,
        value: ValueRef,
        span: Span,
        diags: &mut Vec<Diagnostic>,
    ) -> bool {
        let scope = self.symbols.scope_mut(module);
        if scope.values.contains_key(name) {
            diags.push(Diagnostic::error(format!("`{name}` is defined more than once"), span));
            return false;
        }
        scope.values.insert(name.to_string(), value);
        true
    }

    fn define_type(
        &mut self,
        module: ModuleId,
        name: &str,
        decl: DeclId,
        span: Span,
        diags: &mut Vec<Diagnostic>,
    ) -> bool {
        if PRIMITIVE_TYPES.contains(&name) {
            diags.push(Diagnostic::error(
                format!("cannot redefine built-in type `{name}`"),
                span,
            ));
            return false;
        }
        let scope = self.symbols.scope_mut(module);
        if scope.types.contains_key(name) {
            diags.push(Diagnostic::error(format!("type `{name}` is defined more than once"), span));
            return false;
        }
        scope.types.insert(name.to_string(), decl);
        true
    }

    /// Two passes: allocate every declaration first so that field types
    /// may refer to any type of the module, including the one being declared.
    fn register_types(&mut self, module: &ModuleNode, diags: &mut Vec<Diagnostic>) {
        let mut registered = Vec::new();
        for t in module.ast.types() {
            let params = type_param_names(&t.type_params, diags);
            let placeholder = match t.kind {
                ast::TypeDeclKind::Record(_) => TypeDefKind::Record(Vec::new()),
                ast::TypeDeclKind::Union(_) => TypeDefKind::Union(Vec::new()),
            };
            let decl = self.types.add_def(TypeDef {
                name: t.name.name.clone(),
                qualified_name: format!("{}.{}", module.name, t.name.name),
                params,
                kind: placeholder,
                exported: t.exported,
                span: t.name.span,
            });
            if self.define_type(module.id, &t.name.name, decl, t.name.span, diags) {
                if t.exported {
                    self.symbols
                        .scope_mut(module.id)
                        .exports
                        .insert(t.name.name.clone(), Export::Type(decl));
                }
                registered.push((decl, t));
            }
        }

        for (decl, t) in registered {
            let params = self.types.def(decl).params.clone();
            let kind = match &t.kind {
                ast::TypeDeclKind::Record(fields) => {
                    TypeDefKind::Record(self.resolve_fields(module.id, fields, &params, diags))
                }
                ast::TypeDeclKind::Union(variants) => {
                    let mut defs: Vec<VariantDef> = Vec::new();
                    for v in variants {
                        if defs.iter().any(|d| d.name == v.name.name) {
                            diags.push(Diagnostic::error(
                                format!("variant `{}` is declared more than once", v.name.name),
                                v.name.span,
                            ));
                            continue;
                        }
                        defs.push(VariantDef {
                            name: v.name.name.clone(),
                            fields: self.resolve_fields(module.id, &v.fields, &params, diags),
                        });
                    }
                    TypeDefKind::Union(defs)
                }
            };
            self.types.def_mut(decl).kind = kind;
            if let ast::TypeDeclKind::Union(variants) = &t.kind {
                for v in variants {
                    if let Some(variant) = self.types.def(decl).variant_index(&v.name.name) {
                        self.define_value(
                            module.id,
                            &v.name.name,
                            ValueRef::Constructor { decl, variant },
                            v.name.span,
                            diags,
                        );
                    }
                }
            }
        }
    }

    fn resolve_fields(
        &mut self,
        module: ModuleId,
        fields: &[ast::FieldDecl],
        params: &[String],
        diags: &mut Vec<Diagnostic>,
    ) -> Vec<FieldDef> {
        let mut out: Vec<FieldDef> = Vec::new();
        for f in fields {
            if out.iter().any(|o| o.name == f.name.name) {
                diags.push(Diagnostic::error(
                    format!("field `{}` is declared more than once", f.name.name),
                    f.name.span,
                ));
                continue;
            }
            let ty = self.resolve_type(module, &f.ty, params, diags);
            out.push(FieldDef {
                name: f.name.name.clone(),
                ty,
            });
        }
        out
    }

    fn register_functions(&mut self, module: &ModuleNode, diags: &mut Vec<Diagnostic>) {
        for f in module.ast.functions() {
            let type_params = type_param_names(&f.type_params, diags);
            let params = f
                .params
                .iter()
                .map(|p| self.resolve_type(module.id, &p.ty, &type_params, diags))
                .collect();
            let result = self.resolve_type(module.id, &f.result, &type_params, diags);
            let mut effects = EffectSet::empty();
            for e in &f.effects {
                match Effect::from_name(&e.name) {
                    Some(effect) => effects.insert(effect),
                    None => diags.push(
                        Diagnostic::error(format!("unknown effect `{}`", e.name), e.span).with_help(
                            format!(
                                "known effects are {}",
                                Effect::ALL.map(Effect::name).join(", ")
                            ),
                        ),
                    ),
                }
            }
            let qualified_name = format!("{}.{}", module.name, f.name.name);
            if !self.define_value(
                module.id,
                &f.name.name,
                ValueRef::Function(qualified_name.clone()),
                f.name.span,
                diags,
            ) {
                continue;
            }
            if f.exported && RESERVED_EXPORTS.contains(&f.name.name.as_str()) {
                diags.push(
                    Diagnostic::error(
                        format!("`{}` cannot be exported: the name is reserved by the runtime", f.name.name),
                        f.name.span,
                    )
                    .with_help("rename the function or drop `export`"),
                );
            }
            if f.exported {
                self.symbols
                    .scope_mut(module.id)
                    .exports
                    .insert(f.name.name.clone(), Export::Function(qualified_name.clone()));
            }
            self.symbols.insert_function(Symbol {
                name: f.name.name.clone(),
                qualified_name,
                module: module.id,
                type_params,
                params,
                result,
                effects,
                definition_site: f.name.span,
                exported: f.exported,
            });
        }
    }

    /// Resolve a written type. Unknown names are reported and replaced by
    /// a fresh variable so checking can continue.
    fn resolve_type(
        &mut self,
        module: ModuleId,
        te: &TypeExpr,
        type_params: &[String],
        diags: &mut Vec<Diagnostic>,
    ) -> Type {
        match &te.kind {
            TypeExprKind::Function { params, result } => {
                let params = params
                    .iter()
                    .map(|p| self.resolve_type(module, p, type_params, diags))
                    .collect();
                let result = self.resolve_type(module, result, type_params, diags);
                Type::function(params, result)
            }
            TypeExprKind::Named { name, args } => {
                let expect_args = |n: usize, diags: &mut Vec<Diagnostic>| {
                    if args.len() != n {
                        diags.push(Diagnostic::error(
                            format!(
                                "type `{name}` expects {n} type argument(s), found {}",
                                args.len()
                            ),
                            te.span,
                        ));
                        return false;
                    }
                    true
                };
                let simple = match name.as_str() {
                    "Int64" => Some(Type::Int64),
                    "Float64" => Some(Type::Float64),
                    "String" => Some(Type::String),
                    "Bool" => Some(Type::Bool),
                    "Unit" => Some(Type::Unit),
                    _ => None,
                };
                if let Some(ty) = simple {
                    expect_args(0, diags);
                    return ty;
                }
                if name == "List" {
                    if !expect_args(1, diags) {
                        return self.types.fresh_var();
                    }
                    let elem = self.resolve_type(module, &args[0], type_params, diags);
                    return Type::list(elem);
                }
                if type_params.contains(name) {
                    expect_args(0, diags);
                    return Type::Param(name.clone());
                }
                let Some(decl) = self.symbols.lookup_type(module, name) else {
                    diags.push(Diagnostic::error(format!("unknown type `{name}`"), te.span));
                    return self.types.fresh_var();
                };
                if !expect_args(self.types.def(decl).params.len(), diags) {
                    return self.types.fresh_var();
                }
                let args = args
                    .iter()
                    .map(|a| self.resolve_type(module, a, type_params, diags))
                    .collect();
                if self.types.def(decl).is_union() {
                    Type::Union { decl, args }
                } else {
                    Type::Record { decl, args }
                }
            }
        }
    }

    fn check_function(
        &mut self,
        module: &ModuleNode,
        f: &ast::FunctionDecl,
        diags: &mut Vec<Diagnostic>,
    ) -> Option<HirFunction> {
        let qualified = format!("{}.{}", module.name, f.name.name);
        // duplicates were reported at registration; only the first is checked
        let sym = match self.symbols.function(&qualified) {
            Some(s) if s.definition_site == f.name.span => s.clone(),
            _ => return None,
        };

        let mut fc = FnChecker {
            cx: self,
            module: module.id,
            fn_name: sym.name.clone(),
            type_params: sym.type_params.clone(),
            effects: sym.effects,
            locals: Vec::new(),
            scopes: vec![HashMap::new()],
            diags,
        };
        let mut params = Vec::new();
        for (p, ty) in f.params.iter().zip(&sym.params) {
            if fc.scopes[0].contains_key(&p.name.name) {
                fc.diags.push(Diagnostic::error(
                    format!("parameter `{}` is declared more than once", p.name.name),
                    p.name.span,
                ));
            }
            params.push(fc.declare(&p.name.name, ty.clone()));
        }
        let body = fc.check_block(&f.body, Some(&sym.result));
        let body_span = f
            .body
            .tail
            .as_ref()
            .map(|t| t.span)
            .unwrap_or(f.body.span);
        if fc.cx.types.unify(&sym.result, &body.ty).is_err() {
            fc.diags.push(Diagnostic::error(
                format!(
                    "function `{}` must return {} but its body has type {}",
                    sym.name,
                    fc.show(&sym.result),
                    fc.show(&body.ty)
                ),
                body_span,
            ));
        }
        let locals = std::mem::take(&mut fc.locals);

        let mut hir = HirFunction {
            name: sym.name.clone(),
            qualified_name: sym.qualified_name.clone(),
            module: module.id,
            type_params: sym.type_params.clone(),
            params,
            locals,
            result: sym.result.clone(),
            effects: sym.effects,
            body,
            exported: sym.exported,
            span: f.span,
        };
        let types = &self.types;
        map_function_types(&mut hir, |t| types.resolve(t));
        Some(hir)
    }
}

fn type_param_names(params: &[ast::Ident], diags: &mut Vec<Diagnostic>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for p in params {
        if out.contains(&p.name) {
            diags.push(Diagnostic::error(
                format!("type parameter `{}` is declared more than once", p.name),
                p.span,
            ));
        } else {
            out.push(p.name.clone());
        }
    }
    out
}

/// Per-function checking state.
struct FnChecker<'a> {
    cx: &'a mut Checker,
    module: ModuleId,
    fn_name: String,
    type_params: Vec<String>,
    effects: EffectSet,
    locals: Vec<HirLocal>,
    scopes: Vec<HashMap<String, LocalId>>,
    diags: &'a mut Vec<Diagnostic>,
}

impl<'a> FnChecker<'a> {
    fn declare(&mut self, name: &str, ty: Type) -> LocalId {
        let id = LocalId(self.locals.len() as u32);
        self.locals.push(HirLocal {
            name: name.to_string(),
            ty,
        });
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), id);
        }
        id
    }

    fn lookup_local(&self, name: &str) -> Option<LocalId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|s| s.get(name).copied())
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn fresh(&mut self) -> Type {
        self.cx.types.fresh_var()
    }

    fn show(&self, ty: &Type) -> String {
        self.cx.types.display(ty)
    }

    /// Unify and report a mismatch at `span`.
    fn expect_type(&mut self, expected: &Type, found: &Type, span: Span) -> bool {
        match self.cx.types.unify(expected, found) {
            Ok(()) => true,
            Err(UnifyError::Occurs(..)) => {
                self.diags.push(Diagnostic::error(
                    format!(
                        "cannot construct an infinite type: {} = {}",
                        self.show(expected),
                        self.show(found)
                    ),
                    span,
                ));
                false
            }
            Err(UnifyError::Mismatch(..)) => {
                self.diags.push(Diagnostic::error(
                    format!(
                        "type mismatch: expected {}, found {}",
                        self.show(expected),
                        self.show(found)
                    ),
                    span,
                ));
                false
            }
        }
    }

    fn require_effects(&mut self, callee: &str, needed: EffectSet, span: Span) {
        let missing = needed.difference(self.effects);
        if missing.is_empty() {
            return;
        }
        let tags: Vec<&str> = missing.iter().map(Effect::name).collect();
        self.diags.push(
            Diagnostic::error(
                format!(
                    "`{callee}` requires effect(s) {} which function `{}` does not declare",
                    tags.join(", "),
                    self.fn_name
                ),
                span,
            )
            .with_help(format!(
                "annotate `{}` with `{}`",
                self.fn_name,
                self.effects.union(needed)
            )),
        );
    }

    fn error_expr(&mut self, span: Span) -> HirExpr {
        HirExpr {
            ty: self.fresh(),
            kind: HirExprKind::Literal(Literal::Unit),
            span,
        }
    }

    fn check_block(&mut self, block: &ast::Block, expected: Option<&Type>) -> HirExpr {
        self.push_scope();
        let mut stmts = Vec::new();
        for stmt in &block.stmts {
            match stmt {
                ast::Stmt::Let { name, ty, value, .. } => {
                    let annotated = ty.as_ref().map(|te| {
                        let params = self.type_params.clone();
                        self.cx.resolve_type(self.module, te, &params, self.diags)
                    });
                    let value = self.check_expr(value, annotated.as_ref());
                    let ty = match annotated {
                        Some(ann) => {
                            self.expect_type(&ann, &value.ty, value.span);
                            ann
                        }
                        None => value.ty.clone(),
                    };
                    let local = self.declare(&name.name, ty);
                    stmts.push(HirStmt::Let { local, value });
                }
                ast::Stmt::Expr(e) => {
                    let e = self.check_expr(e, None);
                    stmts.push(HirStmt::Expr(e));
                }
            }
        }
        let tail = block
            .tail
            .as_ref()
            .map(|t| Box::new(self.check_expr(t, expected)));
        self.pop_scope();
        HirExpr {
            ty: tail.as_ref().map_or(Type::Unit, |t| t.ty.clone()),
            kind: HirExprKind::Block { stmts, tail },
            span: block.span,
        }
    }

    fn check_expr(&mut self, expr: &ast::Expr, expected: Option<&Type>) -> HirExpr {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Literal(lit) => HirExpr {
                ty: literal_type(lit),
                kind: HirExprKind::Literal(lit.clone()),
                span,
            },
            ExprKind::Ident(name) => self.check_ident(name, span),
            ExprKind::Binary { op, lhs, rhs } => self.check_binary(*op, lhs, rhs, span),
            ExprKind::Unary { op, operand } => {
                let operand = self.check_expr(operand, None);
                let ok = match op {
                    UnaryOp::Neg => self.numeric(&operand.ty),
                    UnaryOp::Not => self.cx.types.unify(&Type::Bool, &operand.ty).is_ok(),
                };
                if !ok {
                    let sym = if *op == UnaryOp::Neg { "-" } else { "!" };
                    self.diags.push(Diagnostic::error(
                        format!(
                            "operator `{sym}` cannot be applied to {}",
                            self.show(&operand.ty)
                        ),
                        span,
                    ));
                }
                HirExpr {
                    ty: operand.ty.clone(),
                    kind: HirExprKind::Unary {
                        op: *op,
                        operand: Box::new(operand),
                    },
                    span,
                }
            }
            ExprKind::Call { callee, args } => self.check_call(callee, args, span),
            ExprKind::Field { base, field } => {
                let base = self.check_expr(base, None);
                let base_ty = self.cx.types.shallow(&base.ty);
                let found = match &base_ty {
                    Type::Record { decl, args } => self
                        .cx
                        .types
                        .record_fields(*decl, args)
                        .into_iter()
                        .enumerate()
                        .find(|(_, f)| f.name == field.name),
                    _ => None,
                };
                match found {
                    Some((index, f)) => HirExpr {
                        ty: f.ty,
                        kind: HirExprKind::Field {
                            base: Box::new(base),
                            index,
                        },
                        span,
                    },
                    None => {
                        let msg = match base_ty {
                            Type::Var(_) => format!(
                                "the type of this value must be known before accessing field `{}`",
                                field.name
                            ),
                            other => format!(
                                "type {} has no field `{}`",
                                self.show(&other),
                                field.name
                            ),
                        };
                        self.diags.push(Diagnostic::error(msg, field.span));
                        self.error_expr(span)
                    }
                }
            }
            ExprKind::Block(block) => self.check_block(block, expected),
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.check_expr(cond, Some(&Type::Bool));
                if self.cx.types.unify(&Type::Bool, &cond.ty).is_err() {
                    self.diags.push(Diagnostic::error(
                        format!("`if` condition must be Bool, found {}", self.show(&cond.ty)),
                        cond.span,
                    ));
                }
                let then_branch = self.check_block(then_branch, expected);
                let else_branch = match else_branch {
                    Some(e) => {
                        let e = self.check_expr(e, expected.or(Some(&then_branch.ty)));
                        if self.cx.types.unify(&then_branch.ty, &e.ty).is_err() {
                            self.diags.push(Diagnostic::error(
                                format!(
                                    "`if` branches have different types: {} and {}",
                                    self.show(&then_branch.ty),
                                    self.show(&e.ty)
                                ),
                                e.span,
                            ));
                        }
                        Some(Box::new(e))
                    }
                    None => {
                        if self.cx.types.unify(&Type::Unit, &then_branch.ty).is_err() {
                            self.diags.push(
                                Diagnostic::error(
                                    format!(
                                        "`if` without `else` must have type Unit, found {}",
                                        self.show(&then_branch.ty)
                                    ),
                                    then_branch.span,
                                )
                                .with_help("add an `else` branch"),
                            );
                        }
                        None
                    }
                };
                HirExpr {
                    ty: then_branch.ty.clone(),
                    kind: HirExprKind::If {
                        cond: Box::new(cond),
                        then_branch: Box::new(then_branch),
                        else_branch,
                    },
                    span,
                }
            }
            ExprKind::Match { scrutinee, arms } => self.check_match(scrutinee, arms, expected, span),
            ExprKind::List(items) => {
                let elem = match expected.map(|t| self.cx.types.shallow(t)) {
                    Some(Type::List(e)) => *e,
                    _ => self.fresh(),
                };
                let mut out = Vec::new();
                for item in items {
                    let item = self.check_expr(item, Some(&elem));
                    self.expect_type(&elem, &item.ty, item.span);
                    out.push(item);
                }
                HirExpr {
                    ty: Type::list(elem),
                    kind: HirExprKind::List(out),
                    span,
                }
            }
            ExprKind::Record(fields) => self.check_record(fields, expected, span),
        }
    }

    fn check_ident(&mut self, name: &str, span: Span) -> HirExpr {
        if let Some(id) = self.lookup_local(name) {
            return HirExpr {
                ty: self.locals[id.0 as usize].ty.clone(),
                kind: HirExprKind::Local(id),
                span,
            };
        }
        match self.cx.symbols.lookup_value(self.module, name).cloned() {
            Some(ValueRef::Function(q)) => {
                let Some(sym) = self.cx.symbols.function(&q).cloned() else {
                    return self.error_expr(span);
                };
                self.require_effects(&sym.name, sym.effects, span);
                let sig = sym.ty();
                let (type_args, inst) = self.cx.types.instantiate(&sym.type_params, &[&sig]);
                HirExpr {
                    ty: inst.into_iter().next().unwrap_or(sig),
                    kind: HirExprKind::FuncRef {
                        symbol: q,
                        type_args,
                    },
                    span,
                }
            }
            Some(ValueRef::Constructor { decl, variant }) => {
                let arity = self.cx.types.def(decl).variants()[variant].fields.len();
                if arity != 0 {
                    self.diags.push(Diagnostic::error(
                        format!("constructor `{name}` takes {arity} argument(s)"),
                        span,
                    ));
                    return self.error_expr(span);
                }
                let type_args = self.fresh_args(decl);
                construct(decl, variant, type_args, Vec::new(), span)
            }
            None if self.cx.builtins.contains_key(name) => {
                self.diags.push(Diagnostic::error(
                    format!("built-in `{name}` can only be called, not used as a value"),
                    span,
                ));
                self.error_expr(span)
            }
            None => {
                self.diags
                    .push(Diagnostic::error(format!("unknown name `{name}`"), span));
                self.error_expr(span)
            }
        }
    }

    /// One fresh variable per type parameter of `decl`.
    fn fresh_args(&mut self, decl: DeclId) -> Vec<Type> {
        let params = self.cx.types.def(decl).params.len();
        (0..params).map(|_| self.fresh()).collect()
    }

    fn check_args(&mut self, what: &str, args: &[ast::Expr], params: &[Type], span: Span) -> Vec<HirExpr> {
        if args.len() != params.len() {
            self.diags.push(Diagnostic::error(
                format!(
                    "{what} takes {} argument(s) but {} were supplied",
                    params.len(),
                    args.len()
                ),
                span,
            ));
        }
        let mut out = Vec::new();
        for (i, arg) in args.iter().enumerate() {
            let expected = params.get(i);
            let hir = self.check_expr(arg, expected);
            if let Some(p) = expected {
                self.expect_type(p, &hir.ty, hir.span);
            }
            out.push(hir);
        }
        out
    }

    fn check_call(&mut self, callee: &ast::Expr, args: &[ast::Expr], span: Span) -> HirExpr {
        if let ExprKind::Ident(name) = &callee.kind {
            if self.lookup_local(name).is_none() {
                match self.cx.symbols.lookup_value(self.module, name).cloned() {
                    Some(ValueRef::Function(q)) => {
                        if let Some(sym) = self.cx.symbols.function(&q).cloned() {
                            return self.call_symbol(&sym, args, span);
                        }
                    }
                    Some(ValueRef::Constructor { decl, variant }) => {
                        let type_args = self.fresh_args(decl);
                        let fields = self.cx.types.variant_fields(decl, &type_args, variant);
                        let hir_args =
                            self.check_args(&format!("constructor `{name}`"), args, &fields, span);
                        return construct(decl, variant, type_args, hir_args, span);
                    }
                    None => {
                        if let Some(b) = self.cx.builtins.get(name.as_str()).cloned() {
                            return self.call_builtin(&b, args, span);
                        }
                        self.diags.push(Diagnostic::error(
                            format!("unknown function `{name}`"),
                            callee.span,
                        ));
                        for a in args {
                            self.check_expr(a, None);
                        }
                        return self.error_expr(span);
                    }
                }
            }
        }

        // call through a function value
        let callee = self.check_expr(callee, None);
        let (params, result) = match self.cx.types.shallow(&callee.ty) {
            Type::Function { params, result } => (params, *result),
            Type::Var(_) => {
                let params: Vec<Type> = args.iter().map(|_| self.fresh()).collect();
                let result = self.fresh();
                let fty = Type::function(params.clone(), result.clone());
                self.expect_type(&fty, &callee.ty, callee.span);
                (params, result)
            }
            other => {
                self.diags.push(Diagnostic::error(
                    format!("{} is not a function", self.show(&other)),
                    callee.span,
                ));
                for a in args {
                    self.check_expr(a, None);
                }
                return self.error_expr(span);
            }
        };
        let hir_args = self.check_args("this function value", args, &params, span);
        HirExpr {
            ty: result,
            kind: HirExprKind::Call {
                target: CallTarget::Indirect(Box::new(callee)),
                args: hir_args,
            },
            span,
        }
    }

    fn call_symbol(&mut self, sym: &Symbol, args: &[ast::Expr], span: Span) -> HirExpr {
        self.require_effects(&sym.name, sym.effects, span);
        let mut tys: Vec<&Type> = sym.params.iter().collect();
        tys.push(&sym.result);
        let (type_args, mut inst) = self.cx.types.instantiate(&sym.type_params, &tys);
        let result = inst.pop().unwrap_or(Type::Unit);
        let hir_args = self.check_args(&format!("function `{}`", sym.name), args, &inst, span);
        HirExpr {
            ty: result,
            kind: HirExprKind::Call {
                target: CallTarget::Function {
                    symbol: sym.qualified_name.clone(),
                    type_args,
                },
                args: hir_args,
            },
            span,
        }
    }

    fn call_builtin(&mut self, b: &Builtin, args: &[ast::Expr], span: Span) -> HirExpr {
        self.require_effects(b.name, b.effects, span);
        let mut tys: Vec<&Type> = b.params.iter().collect();
        tys.push(&b.result);
        let (type_args, mut inst) = self.cx.types.instantiate(&b.type_params, &tys);
        let result = inst.pop().unwrap_or(Type::Unit);
        let hir_args = self.check_args(&format!("built-in `{}`", b.name), args, &inst, span);
        HirExpr {
            ty: result,
            kind: HirExprKind::Call {
                target: CallTarget::Builtin {
                    kind: b.kind,
                    type_args,
                },
                args: hir_args,
            },
            span,
        }
    }

    /// Numeric operand check; an undetermined type defaults to Int64.
    fn numeric(&mut self, ty: &Type) -> bool {
        match self.cx.types.shallow(ty) {
            Type::Var(_) => self.cx.types.unify(ty, &Type::Int64).is_ok(),
            t => t.is_numeric(),
        }
    }

    fn equatable(&mut self, ty: &Type) -> bool {
        match self.cx.types.shallow(ty) {
            Type::Var(_) => self.cx.types.unify(ty, &Type::Int64).is_ok(),
            Type::Int64 | Type::Float64 | Type::Bool | Type::String => true,
            _ => false,
        }
    }

    fn check_binary(&mut self, op: BinaryOp, lhs: &ast::Expr, rhs: &ast::Expr, span: Span) -> HirExpr {
        let lhs = self.check_expr(lhs, None);
        let rhs = self.check_expr(rhs, Some(&lhs.ty));
        let same = self.cx.types.unify(&lhs.ty, &rhs.ty).is_ok();
        let (ok, result) = match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                (same && self.numeric(&lhs.ty), lhs.ty.clone())
            }
            BinaryOp::Rem => (same && self.cx.types.unify(&Type::Int64, &lhs.ty).is_ok(), Type::Int64),
            BinaryOp::Concat => (same && self.cx.types.unify(&Type::String, &lhs.ty).is_ok(), Type::String),
            BinaryOp::Eq | BinaryOp::Ne => (same && self.equatable(&lhs.ty), Type::Bool),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                (same && self.numeric(&lhs.ty), Type::Bool)
            }
            BinaryOp::And | BinaryOp::Or => (same && self.cx.types.unify(&Type::Bool, &lhs.ty).is_ok(), Type::Bool),
        };
        if !ok {
            let mut diag = Diagnostic::error(
                format!(
                    "operator `{}` cannot be applied to {} and {}",
                    op.symbol(),
                    self.show(&lhs.ty),
                    self.show(&rhs.ty)
                ),
                span,
            );
            if op == BinaryOp::Add && self.cx.types.resolve(&lhs.ty) == Type::String {
                diag = diag.with_help("use `++` to concatenate strings");
            }
            self.diags.push(diag);
        }
        HirExpr {
            ty: result,
            kind: HirExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            span,
        }
    }

    fn check_match(
        &mut self,
        scrutinee: &ast::Expr,
        arms: &[ast::MatchArm],
        expected: Option<&Type>,
        span: Span,
    ) -> HirExpr {
        let scrutinee = self.check_expr(scrutinee, None);
        let result = match expected {
            Some(t) => t.clone(),
            None => self.fresh(),
        };
        let mut hir_arms = Vec::new();
        for arm in arms {
            self.push_scope();
            let pattern = self.check_pattern(&arm.pattern, &scrutinee.ty);
            let body = self.check_expr(&arm.body, Some(&result));
            if self.cx.types.unify(&result, &body.ty).is_err() {
                self.diags.push(Diagnostic::error(
                    format!(
                        "match arms have different types: expected {}, found {}",
                        self.show(&result),
                        self.show(&body.ty)
                    ),
                    body.span,
                ));
            }
            self.pop_scope();
            hir_arms.push(HirArm {
                pattern,
                body,
                span: arm.span,
            });
        }
        let patterns: Vec<&HirPattern> = hir_arms.iter().map(|a| &a.pattern).collect();
        let missing = exhaustive::missing_cases(&self.cx.types, &scrutinee.ty, &patterns);
        if !missing.is_empty() {
            self.diags.push(
                Diagnostic::error(
                    format!("non-exhaustive match: {} not covered", missing.join(", ")),
                    span,
                )
                .with_help("add arms for the missing cases or a `_ =>` arm"),
            );
        }
        HirExpr {
            ty: result,
            kind: HirExprKind::Match {
                scrutinee: Box::new(scrutinee),
                arms: hir_arms,
            },
            span,
        }
    }

    fn check_pattern(&mut self, pat: &ast::Pattern, expected: &Type) -> HirPattern {
        let span = pat.span;
        let kind = match &pat.kind {
            PatternKind::Wildcard => HirPatternKind::Wildcard,
            PatternKind::Binding(name) => {
                match self.nullary_constructor(name, expected) {
                    Some((decl, variant)) => {
                        self.variant_pattern(name, decl, variant, &[], expected, span)
                    }
                    None => HirPatternKind::Bind(self.declare(name, expected.clone())),
                }
            }
            PatternKind::Literal(lit) => {
                let lit_ty = literal_type(lit);
                if self.cx.types.unify(expected, &lit_ty).is_err() {
                    self.diags.push(Diagnostic::error(
                        format!(
                            "literal pattern of type {} cannot match a value of type {}",
                            self.show(&lit_ty),
                            self.show(expected)
                        ),
                        span,
                    ));
                }
                HirPatternKind::Literal(lit.clone())
            }
            PatternKind::Constructor { name, fields } => {
                match self.cx.symbols.lookup_value(self.module, &name.name).cloned() {
                    Some(ValueRef::Constructor { decl, variant }) => {
                        self.variant_pattern(&name.name, decl, variant, fields, expected, span)
                    }
                    _ => {
                        self.diags.push(Diagnostic::error(
                            format!("unknown variant `{}`", name.name),
                            name.span,
                        ));
                        HirPatternKind::Wildcard
                    }
                }
            }
        };
        HirPattern {
            kind,
            ty: expected.clone(),
            span,
        }
    }

    /// A bare name is a constructor pattern when it names a field-less
    /// variant of the scrutinee's union (or of any union, while the
    /// scrutinee type is still unknown).
    fn nullary_constructor(&self, name: &str, expected: &Type) -> Option<(DeclId, usize)> {
        let Some(ValueRef::Constructor { decl, variant }) =
            self.cx.symbols.lookup_value(self.module, name)
        else {
            return None;
        };
        let fits = match self.cx.types.shallow(expected) {
            Type::Union { decl: d, .. } => d == *decl,
            Type::Var(_) => true,
            _ => false,
        };
        let nullary = self.cx.types.def(*decl).variants()[*variant].fields.is_empty();
        (fits && nullary).then_some((*decl, *variant))
    }

    fn variant_pattern(
        &mut self,
        name: &str,
        decl: DeclId,
        variant: usize,
        fields: &[ast::Pattern],
        expected: &Type,
        span: Span,
    ) -> HirPatternKind {
        let type_args = self.fresh_args(decl);
        let union = Type::Union {
            decl,
            args: type_args.clone(),
        };
        if self.cx.types.unify(expected, &union).is_err() {
            self.diags.push(Diagnostic::error(
                format!(
                    "variant `{name}` belongs to {} but the matched value has type {}",
                    self.show(&union),
                    self.show(expected)
                ),
                span,
            ));
        }
        let field_tys = self.cx.types.variant_fields(decl, &type_args, variant);
        if field_tys.len() != fields.len() {
            self.diags.push(Diagnostic::error(
                format!(
                    "variant `{name}` has {} field(s) but the pattern has {}",
                    field_tys.len(),
                    fields.len()
                ),
                span,
            ));
        }
        let fields = fields
            .iter()
            .zip(field_tys.iter())
            .map(|(p, ty)| self.check_pattern(p, ty))
            .collect();
        HirPatternKind::Variant {
            decl,
            variant,
            fields,
        }
    }

    fn check_record(&mut self, fields: &[(ast::Ident, ast::Expr)], expected: Option<&Type>, span: Span) -> HirExpr {
        let mut names: Vec<&str> = Vec::new();
        for (name, _) in fields {
            if names.contains(&name.name.as_str()) {
                self.diags.push(Diagnostic::error(
                    format!("field `{}` is given more than once", name.name),
                    name.span,
                ));
            } else {
                names.push(&name.name);
            }
        }
        let matches_fields = |def: &TypeDef| {
            def.fields().len() == names.len()
                && def.fields().iter().all(|f| names.contains(&f.name.as_str()))
        };
        let from_expected = match expected.map(|t| self.cx.types.shallow(t)) {
            Some(Type::Record { decl, .. }) if matches_fields(self.cx.types.def(decl)) => Some(decl),
            _ => None,
        };
        let decl = match from_expected {
            Some(decl) => decl,
            None => {
                let mut candidates: Vec<DeclId> = self
                    .cx
                    .symbols
                    .scope(self.module)
                    .map(|s| s.types.values().copied().collect())
                    .unwrap_or_default();
                candidates.sort();
                candidates.retain(|d| {
                    let def = self.cx.types.def(*d);
                    !def.is_union() && matches_fields(def)
                });
                match candidates.as_slice() {
                    [one] => *one,
                    [] => {
                        self.diags.push(Diagnostic::error(
                            format!("no record type has exactly the fields {{{}}}", names.join(", ")),
                            span,
                        ));
                        for (_, e) in fields {
                            self.check_expr(e, None);
                        }
                        return self.error_expr(span);
                    }
                    many => {
                        let list: Vec<String> = many
                            .iter()
                            .map(|d| self.cx.types.def(*d).name.clone())
                            .collect();
                        self.diags.push(
                            Diagnostic::error(
                                format!("record literal matches several types: {}", list.join(", ")),
                                span,
                            )
                            .with_help("annotate the binding with the intended type"),
                        );
                        many[0]
                    }
                }
            }
        };
        let type_args = self.fresh_args(decl);
        let field_defs = self.cx.types.record_fields(decl, &type_args);
        let mut hir_fields = Vec::new();
        for (name, value) in fields {
            let Some(index) = field_defs.iter().position(|f| f.name == name.name) else {
                continue;
            };
            let value = self.check_expr(value, Some(&field_defs[index].ty));
            self.expect_type(&field_defs[index].ty, &value.ty, value.span);
            hir_fields.push((index, value));
        }
        HirExpr {
            ty: Type::Record {
                decl,
                args: type_args,
            },
            kind: HirExprKind::Record { fields: hir_fields },
            span,
        }
    }
}

fn construct(decl: DeclId, variant: usize, type_args: Vec<Type>, args: Vec<HirExpr>, span: Span) -> HirExpr {
    HirExpr {
        ty: Type::Union {
            decl,
            args: type_args,
        },
        kind: HirExprKind::Call {
            target: CallTarget::Constructor { decl, variant },
            args,
        },
        span,
    }
}

fn literal_type(lit: &Literal) -> Type {
    match lit {
        Literal::Int(_) => Type::Int64,
        Literal::Float(_) => Type::Float64,
        Literal::Bool(_) => Type::Bool,
        Literal::Str(_) => Type::String,
        Literal::Unit => Type::Unit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module_graph::{ExportKind, ModuleGraph};
    use crate::parser::parse_source;
    use crate::source_map::SourceMap;
    use crate::span::FileId;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn node(id: u32, name: &str, src: &str) -> ModuleNode {
        let parsed = parse_source(FileId(id), src);
        assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);
        let mut exports = BTreeMap::new();
        for f in parsed.module.functions().filter(|f| f.exported) {
            exports.insert(f.name.name.clone(), ExportKind::Function);
        }
        ModuleNode {
            id: ModuleId(id),
            name: name.to_string(),
            path: PathBuf::from(format!("{name}.clarity")),
            file_id: FileId(id),
            ast: parsed.module,
            imports: Vec::new(),
            exports,
            deps: Vec::new(),
        }
    }

    fn check(src: &str) -> Vec<Diagnostic> {
        let mut checker = Checker::new();
        checker.check_module(&node(0, "main", src))
    }

    fn errors(src: &str) -> Vec<String> {
        check(src)
            .into_iter()
            .filter(|d| d.is_error())
            .map(|d| d.message)
            .collect()
    }

    #[test]
    fn accepts_simple_arithmetic() {
        assert!(errors("function add(a: Int64, b: Int64) -> Int64 { a + b }").is_empty());
    }

    #[test]
    fn rejects_mixed_numeric_operands() {
        let errs = errors("function f(a: Int64, b: Float64) -> Int64 { a + b }");
        assert!(errs.iter().any(|e| e.contains("operator `+`")), "{errs:?}");
    }

    #[test]
    fn string_plus_suggests_concat() {
        let diags = check("function f(a: String) -> String { a + a }");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].help.as_deref(), Some("use `++` to concatenate strings"));
    }

    #[test]
    fn return_type_mismatch_is_reported() {
        let errs = errors("function f() -> Int64 { \"no\" }");
        assert_eq!(errs, vec!["function `f` must return Int64 but its body has type String"]);
    }

    #[test]
    fn generic_identity_instantiates_per_call() {
        let src = "function id<T>(x: T) -> T { x }\n\
                   function a() -> Int64 { id(1) }\n\
                   function b() -> Bool { id(true) }";
        assert!(errors(src).is_empty());
    }

    #[test]
    fn generic_parameter_is_opaque() {
        let errs = errors("function bad<T>(x: T) -> T { x + 1 }");
        assert!(!errs.is_empty());
    }

    #[test]
    fn pure_function_cannot_call_effectful_builtin() {
        let src = "function f() -> String { read_file(\"a.txt\") }";
        let diags = check(src);
        assert_eq!(diags.len(), 1);
        let d = &diags[0];
        assert!(d.message.contains("FileSystem"));
        assert_eq!(&src[d.span().start as usize..d.span().end as usize], "read_file(\"a.txt\")");
        assert_eq!(d.help.as_deref(), Some("annotate `f` with `effect[FileSystem]`"));
    }

    #[test]
    fn effects_propagate_through_user_functions() {
        let src = "effect[Log] function say() -> Unit { print_string(\"hi\") }\n\
                   function quiet() -> Unit { say() }\n\
                   effect[Log] function loud() -> Unit { say() }";
        let errs = errors(src);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].contains("`say` requires effect(s) Log"));
    }

    #[test]
    fn unknown_effect_name() {
        let errs = errors("effect[Disk] function f() -> Unit { () }");
        assert_eq!(errs, vec!["unknown effect `Disk`"]);
    }

    #[test]
    fn exhaustiveness_over_union() {
        let decl = "type Abc = | A | B | C\n";
        let missing = format!("{decl}function f(x: Abc) -> Int64 {{ match x {{ A => 1, B => 2 }} }}");
        let full = format!("{decl}function f(x: Abc) -> Int64 {{ match x {{ A => 1, B => 2, C => 3 }} }}");
        let wild = format!("{decl}function f(x: Abc) -> Int64 {{ match x {{ A => 1, B => 2, _ => 3 }} }}");
        assert_eq!(errors(&missing), vec!["non-exhaustive match: C not covered"]);
        assert!(errors(&full).is_empty());
        assert!(errors(&wild).is_empty());
    }

    #[test]
    fn constructor_pattern_arity_checked() {
        let src = "type Shape = | Circle(r: Float64) | Empty\n\
                   function f(s: Shape) -> Float64 { match s { Circle(a, b) => a, Empty => 0.0 } }";
        let errs = errors(src);
        assert!(errs.iter().any(|e| e.contains("has 1 field(s) but the pattern has 2")), "{errs:?}");
    }

    #[test]
    fn record_literal_selects_type_by_fields() {
        let src = "type Point = { x: Int64, y: Int64 }\n\
                   function f() -> Int64 { let p = { y: 2, x: 1 }; p.x + p.y }";
        assert!(errors(src).is_empty());
        let bad = "type Point = { x: Int64, y: Int64 }\n\
                   function f() -> Int64 { let p = { x: 1 }; p.x }";
        assert!(errors(bad)[0].contains("no record type has exactly the fields {x}"));
    }

    #[test]
    fn if_without_else_must_be_unit() {
        let errs = errors("function f(b: Bool) -> Unit { if b { 1 } }");
        assert!(errs[0].contains("`if` without `else` must have type Unit"));
    }

    #[test]
    fn function_values_and_indirect_calls() {
        let src = "function inc(x: Int64) -> Int64 { x + 1 }\n\
                   function apply(f: (Int64) -> Int64, x: Int64) -> Int64 { f(x) }\n\
                   function main() -> Int64 { apply(inc, 41) }";
        assert!(errors(src).is_empty());
    }

    #[test]
    fn effectful_function_value_needs_effects() {
        let src = "effect[Log] function say(x: Int64) -> Unit { print_int(x) }\n\
                   function pick() -> (Int64) -> Unit { say }";
        let errs = errors(src);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].contains("`say` requires effect(s) Log"));
    }

    #[test]
    fn runtime_export_names_are_reserved() {
        let diags = check("export function memory() -> Int64 { 1 }\nexport function __alloc(n: Int64) -> Int64 { n }");
        assert_eq!(diags.len(), 2);
        assert!(diags[0].message.contains("`memory` cannot be exported"));
        assert!(diags[1].message.contains("`__alloc` cannot be exported"));
        assert_eq!(diags[0].span().start, 16);
        assert!(errors("function memory() -> Int64 { 1 }").is_empty());
    }

    #[test]
    fn duplicate_function_is_reported() {
        let errs = errors("function f() -> Unit { () }\nfunction f() -> Unit { () }");
        assert_eq!(errs, vec!["`f` is defined more than once"]);
    }

    #[test]
    fn failed_module_blocks_dependents() {
        let mut lib = node(0, "lib", "export function f() -> Int64 { true }");
        lib.exports.insert("f".into(), ExportKind::Function);
        let mut main = node(1, "main", "function g() -> Int64 { f() }");
        main.imports.push(crate::module_graph::ResolvedImport {
            names: vec![ast::Ident {
                name: "f".into(),
                span: Span::dummy(),
            }],
            target: ModuleId(0),
            span: Span::dummy(),
        });
        main.deps.push(ModuleId(0));
        let graph = ModuleGraph {
            nodes: vec![lib, main],
            order: vec![ModuleId(0), ModuleId(1)],
            entry: ModuleId(1),
            source_map: SourceMap::new(),
        };
        let mut checker = Checker::new();
        let diags = checker.check_program(&graph);
        assert_eq!(diags.len(), 2);
        assert!(diags[0].is_error());
        assert_eq!(diags[1].severity, crate::diagnostic::Severity::Info);
        assert!(diags[1].message.contains("dependency `lib`"));
        assert!(!checker.is_checked(ModuleId(0)));
        assert!(!checker.is_checked(ModuleId(1)));
    }
}
