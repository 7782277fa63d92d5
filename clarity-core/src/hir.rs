//! Typed tree produced by the checker.
//!
//! Every expression carries its resolved [`Type`]. Locals are numbered
//! per function; shadowed names get distinct [`LocalId`]s.

use crate::ast::{BinaryOp, Literal, UnaryOp};
use crate::builtins::BuiltinKind;
use crate::effects::EffectSet;
use crate::module_graph::ModuleId;
use crate::span::Span;
use crate::types::{DeclId, Type, TypeCtx};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalId(pub u32);

#[derive(Debug)]
pub struct HirProgram {
    /// Checked modules in resolved order.
    pub modules: Vec<HirModule>,
    pub types: TypeCtx,
}

impl HirProgram {
    pub fn functions(&self) -> impl Iterator<Item = &HirFunction> {
        self.modules.iter().flat_map(|m| m.functions.iter())
    }

    pub fn function(&self, qualified_name: &str) -> Option<&HirFunction> {
        self.functions().find(|f| f.qualified_name == qualified_name)
    }
}

#[derive(Debug, Clone)]
pub struct HirModule {
    pub id: ModuleId,
    pub name: String,
    pub functions: Vec<HirFunction>,
}

#[derive(Debug, Clone)]
pub struct HirLocal {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub struct HirFunction {
    pub name: String,
    pub qualified_name: String,
    pub module: ModuleId,
    pub type_params: Vec<String>,
    /// The first `params.len()` locals.
    pub params: Vec<LocalId>,
    pub locals: Vec<HirLocal>,
    pub result: Type,
    pub effects: EffectSet,
    pub body: HirExpr,
    pub exported: bool,
    pub span: Span,
}

impl HirFunction {
    pub fn local(&self, id: LocalId) -> &HirLocal {
        &self.locals[id.0 as usize]
    }

    pub fn param_types(&self) -> Vec<Type> {
        self.params
            .iter()
            .map(|p| self.local(*p).ty.clone())
            .collect()
    }

    pub fn is_generic(&self) -> bool {
        !self.type_params.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct HirExpr {
    pub ty: Type,
    pub kind: HirExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum CallTarget {
    Function { symbol: String, type_args: Vec<Type> },
    Builtin { kind: BuiltinKind, type_args: Vec<Type> },
    Constructor { decl: DeclId, variant: usize },
    /// Call through a function value.
    Indirect(Box<HirExpr>),
}

#[derive(Debug, Clone)]
pub enum HirExprKind {
    Literal(Literal),
    Local(LocalId),
    /// A named function used as a value.
    FuncRef { symbol: String, type_args: Vec<Type> },
    Call { target: CallTarget, args: Vec<HirExpr> },
    Binary {
        op: BinaryOp,
        lhs: Box<HirExpr>,
        rhs: Box<HirExpr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<HirExpr>,
    },
    /// Record field by declaration index.
    Field { base: Box<HirExpr>, index: usize },
    Block {
        stmts: Vec<HirStmt>,
        tail: Option<Box<HirExpr>>,
    },
    If {
        cond: Box<HirExpr>,
        then_branch: Box<HirExpr>,
        else_branch: Option<Box<HirExpr>>,
    },
    Match {
        scrutinee: Box<HirExpr>,
        arms: Vec<HirArm>,
    },
    List(Vec<HirExpr>),
    /// Field initializers in source order, tagged with their declaration index.
    Record { fields: Vec<(usize, HirExpr)> },
}

#[derive(Debug, Clone)]
pub enum HirStmt {
    Let { local: LocalId, value: HirExpr },
    Expr(HirExpr),
}

#[derive(Debug, Clone)]
pub struct HirArm {
    pub pattern: HirPattern,
    pub body: HirExpr,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct HirPattern {
    pub kind: HirPatternKind,
    pub ty: Type,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum HirPatternKind {
    Wildcard,
    Bind(LocalId),
    Literal(Literal),
    Variant {
        decl: DeclId,
        variant: usize,
        fields: Vec<HirPattern>,
    },
}

impl HirPattern {
    /// Matches every value of its type.
    pub fn is_irrefutable(&self) -> bool {
        matches!(self.kind, HirPatternKind::Wildcard | HirPatternKind::Bind(_))
    }
}

/// Rewrite every type stored in an expression tree.
pub fn map_expr_types(expr: &mut HirExpr, f: &mut impl FnMut(&Type) -> Type) {
    expr.ty = f(&expr.ty);
    match &mut expr.kind {
        HirExprKind::Literal(_) | HirExprKind::Local(_) => {}
        HirExprKind::FuncRef { type_args, .. } => {
            for t in type_args.iter_mut() {
                *t = f(t);
            }
        }
        HirExprKind::Call { target, args } => {
            match target {
                CallTarget::Function { type_args, .. } | CallTarget::Builtin { type_args, .. } => {
                    for t in type_args.iter_mut() {
                        *t = f(t);
                    }
                }
                CallTarget::Constructor { .. } => {}
                CallTarget::Indirect(callee) => map_expr_types(callee, f),
            }
            for a in args {
                map_expr_types(a, f);
            }
        }
        HirExprKind::Binary { lhs, rhs, .. } => {
            map_expr_types(lhs, f);
            map_expr_types(rhs, f);
        }
        HirExprKind::Unary { operand, .. } => map_expr_types(operand, f),
        HirExprKind::Field { base, .. } => map_expr_types(base, f),
        HirExprKind::Block { stmts, tail } => {
            for s in stmts {
                match s {
                    HirStmt::Let { value, .. } => map_expr_types(value, f),
                    HirStmt::Expr(e) => map_expr_types(e, f),
                }
            }
            if let Some(t) = tail {
                map_expr_types(t, f);
            }
        }
        HirExprKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            map_expr_types(cond, f);
            map_expr_types(then_branch, f);
            if let Some(e) = else_branch {
                map_expr_types(e, f);
            }
        }
        HirExprKind::Match { scrutinee, arms } => {
            map_expr_types(scrutinee, f);
            for arm in arms {
                map_pattern_types(&mut arm.pattern, f);
                map_expr_types(&mut arm.body, f);
            }
        }
        HirExprKind::List(items) => {
            for i in items {
                map_expr_types(i, f);
            }
        }
        HirExprKind::Record { fields } => {
            for (_, e) in fields {
                map_expr_types(e, f);
            }
        }
    }
}

fn map_pattern_types(pat: &mut HirPattern, f: &mut impl FnMut(&Type) -> Type) {
    pat.ty = f(&pat.ty);
    if let HirPatternKind::Variant { fields, .. } = &mut pat.kind {
        for p in fields {
            map_pattern_types(p, f);
        }
    }
}

/// Rewrite every type of a function: locals, result and body.
pub fn map_function_types(func: &mut HirFunction, mut f: impl FnMut(&Type) -> Type) {
    for l in &mut func.locals {
        l.ty = f(&l.ty);
    }
    func.result = f(&func.result);
    map_expr_types(&mut func.body, &mut f);
}
