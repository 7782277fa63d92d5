//! Expansion of generic functions into concrete instances.
//!
//! Starts from every non-generic function, clones the body of each
//! requested `(function, type arguments)` pair with the arguments
//! substituted, and rewrites call sites and function references to the
//! instance names (`module.fn<Arg,...>`). Unbound inference variables
//! become Int64.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::codegen_wasm::CodegenError;
use crate::hir::*;
use crate::types::{Type, TypeCtx};

/// Polymorphic recursion deeper than this is rejected.
pub const MAX_INSTANTIATION_DEPTH: u32 = 64;

/// Concrete functions ready for lowering, in request order.
#[derive(Debug)]
pub struct MonoProgram {
    pub functions: Vec<HirFunction>,
}

impl MonoProgram {
    pub fn function(&self, name: &str) -> Option<&HirFunction> {
        self.functions.iter().find(|f| f.qualified_name == name)
    }
}

pub fn monomorphize(program: &HirProgram) -> Result<MonoProgram, CodegenError> {
    let mut mono = Monomorphizer {
        types: &program.types,
        funcs: BTreeMap::new(),
        requested: HashSet::new(),
        worklist: VecDeque::new(),
        out: Vec::new(),
    };

    let mut initial = Vec::new();
    for f in program.functions() {
        mono.funcs.insert(f.qualified_name.clone(), f);
        if !f.is_generic() {
            initial.push(f.qualified_name.clone());
        }
    }
    for name in initial {
        log::trace!("monomorphize: root {name}");
        mono.request(&name, Vec::new(), 0);
    }

    while let Some(item) = mono.worklist.pop_front() {
        mono.instantiate(item)?;
    }

    log::debug!("monomorphize: {} instance(s)", mono.out.len());
    Ok(MonoProgram {
        functions: mono.out,
    })
}

struct Pending {
    original: String,
    instance: String,
    args: Vec<Type>,
    depth: u32,
}

struct Monomorphizer<'a> {
    types: &'a TypeCtx,
    funcs: BTreeMap<String, &'a HirFunction>,
    requested: HashSet<String>,
    worklist: VecDeque<Pending>,
    out: Vec<HirFunction>,
}

impl<'a> Monomorphizer<'a> {
    fn instance_name(&self, name: &str, args: &[Type]) -> String {
        if args.is_empty() {
            return name.to_string();
        }
        let args: Vec<String> = args.iter().map(|a| self.types.mangle(a)).collect();
        format!("{name}<{}>", args.join(","))
    }

    /// Queue an instance unless it was already requested; returns its name.
    fn request(&mut self, name: &str, args: Vec<Type>, depth: u32) -> String {
        let args: Vec<Type> = args.iter().map(|a| self.types.default_vars(a)).collect();
        let instance = self.instance_name(name, &args);
        if self.requested.insert(instance.clone()) {
            self.worklist.push_back(Pending {
                original: name.to_string(),
                instance: instance.clone(),
                args,
                depth,
            });
        }
        instance
    }

    fn instantiate(&mut self, item: Pending) -> Result<(), CodegenError> {
        let Some(original) = self.funcs.get(&item.original).copied() else {
            return Err(CodegenError::UnknownFunction(item.original));
        };
        if item.depth > MAX_INSTANTIATION_DEPTH {
            return Err(CodegenError::InstantiationDepth {
                function: item.original,
                span: original.span,
            });
        }
        log::trace!("monomorphize: instantiate {}", item.instance);

        let mut f = original.clone();
        let subst: HashMap<String, Type> = f
            .type_params
            .iter()
            .cloned()
            .zip(item.args.iter().cloned())
            .collect();
        let types = self.types;
        map_function_types(&mut f, |t| types.default_vars(&t.substitute(&subst)));
        if f.is_generic() {
            f.exported = false;
            f.type_params.clear();
        }
        f.qualified_name = item.instance;
        self.rewrite_expr(&mut f.body, item.depth);
        self.out.push(f);
        Ok(())
    }

    fn rewrite_expr(&mut self, expr: &mut HirExpr, depth: u32) {
        match &mut expr.kind {
            HirExprKind::Literal(_) | HirExprKind::Local(_) => {}
            HirExprKind::FuncRef { symbol, type_args } => {
                let next = if type_args.is_empty() { 0 } else { depth + 1 };
                *symbol = self.request(symbol, std::mem::take(type_args), next);
            }
            HirExprKind::Call { target, args } => {
                match target {
                    CallTarget::Function { symbol, type_args } => {
                        let next = if type_args.is_empty() { 0 } else { depth + 1 };
                        *symbol = self.request(symbol, std::mem::take(type_args), next);
                    }
                    CallTarget::Indirect(callee) => self.rewrite_expr(callee, depth),
                    CallTarget::Builtin { .. } | CallTarget::Constructor { .. } => {}
                }
                for a in args {
                    self.rewrite_expr(a, depth);
                }
            }
            HirExprKind::Binary { lhs, rhs, .. } => {
                self.rewrite_expr(lhs, depth);
                self.rewrite_expr(rhs, depth);
            }
            HirExprKind::Unary { operand, .. } => self.rewrite_expr(operand, depth),
            HirExprKind::Field { base, .. } => self.rewrite_expr(base, depth),
            HirExprKind::Block { stmts, tail } => {
                for s in stmts {
                    match s {
                        HirStmt::Let { value, .. } => self.rewrite_expr(value, depth),
                        HirStmt::Expr(e) => self.rewrite_expr(e, depth),
                    }
                }
                if let Some(t) = tail {
                    self.rewrite_expr(t, depth);
                }
            }
            HirExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.rewrite_expr(cond, depth);
                self.rewrite_expr(then_branch, depth);
                if let Some(e) = else_branch {
                    self.rewrite_expr(e, depth);
                }
            }
            HirExprKind::Match { scrutinee, arms } => {
                self.rewrite_expr(scrutinee, depth);
                for arm in arms {
                    self.rewrite_expr(&mut arm.body, depth);
                }
            }
            HirExprKind::List(items) => {
                for i in items {
                    self.rewrite_expr(i, depth);
                }
            }
            HirExprKind::Record { fields } => {
                for (_, e) in fields {
                    self.rewrite_expr(e, depth);
                }
            }
        }
    }
}
