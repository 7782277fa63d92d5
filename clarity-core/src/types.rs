//! Clarity types and the inference context.
//!
//! Declared records and unions live in a table owned by [`TypeCtx`] and
//! are referred to by [`DeclId`], so recursive declarations never produce
//! infinite types. Inference variables are bound in place; [`TypeCtx::resolve`]
//! substitutes every bound variable.

use core::fmt;
use std::collections::HashMap;

use crate::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeVarId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeclId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Int64,
    Float64,
    String,
    Bool,
    Unit,
    List(Box<Type>),
    Record { decl: DeclId, args: Vec<Type> },
    Union { decl: DeclId, args: Vec<Type> },
    Function { params: Vec<Type>, result: Box<Type> },
    /// Rigid generic parameter, opaque inside its declaration.
    Param(String),
    /// Inference variable.
    Var(TypeVarId),
}

impl Type {
    pub fn list(elem: Type) -> Type {
        Type::List(Box::new(elem))
    }

    pub fn function(params: Vec<Type>, result: Type) -> Type {
        Type::Function {
            params,
            result: Box::new(result),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int64 | Type::Float64)
    }

    /// Values stored as a pointer into linear memory.
    pub fn is_heap(&self) -> bool {
        matches!(
            self,
            Type::String | Type::List(_) | Type::Record { .. } | Type::Union { .. }
        )
    }

    /// True if no variable or parameter occurs anywhere in the type.
    pub fn is_concrete(&self) -> bool {
        match self {
            Type::Param(_) | Type::Var(_) => false,
            Type::List(e) => e.is_concrete(),
            Type::Record { args, .. } | Type::Union { args, .. } => {
                args.iter().all(Type::is_concrete)
            }
            Type::Function { params, result } => {
                params.iter().all(Type::is_concrete) && result.is_concrete()
            }
            _ => true,
        }
    }

    /// Replace generic parameters by name.
    pub fn substitute(&self, subst: &HashMap<String, Type>) -> Type {
        match self {
            Type::Param(name) => subst.get(name).cloned().unwrap_or_else(|| self.clone()),
            Type::List(e) => Type::list(e.substitute(subst)),
            Type::Record { decl, args } => Type::Record {
                decl: *decl,
                args: args.iter().map(|a| a.substitute(subst)).collect(),
            },
            Type::Union { decl, args } => Type::Union {
                decl: *decl,
                args: args.iter().map(|a| a.substitute(subst)).collect(),
            },
            Type::Function { params, result } => Type::function(
                params.iter().map(|p| p.substitute(subst)).collect(),
                result.substitute(subst),
            ),
            _ => self.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeDefKind {
    Record(Vec<FieldDef>),
    Union(Vec<VariantDef>),
}

/// A declared record or union. Field and variant order is declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    pub name: String,
    pub qualified_name: String,
    pub params: Vec<String>,
    pub kind: TypeDefKind,
    pub exported: bool,
    pub span: Span,
}

impl TypeDef {
    pub fn is_union(&self) -> bool {
        matches!(self.kind, TypeDefKind::Union(_))
    }

    pub fn variants(&self) -> &[VariantDef] {
        match &self.kind {
            TypeDefKind::Union(vs) => vs,
            TypeDefKind::Record(_) => &[],
        }
    }

    pub fn fields(&self) -> &[FieldDef] {
        match &self.kind {
            TypeDefKind::Record(fs) => fs,
            TypeDefKind::Union(_) => &[],
        }
    }

    pub fn variant_index(&self, name: &str) -> Option<usize> {
        self.variants().iter().position(|v| v.name == name)
    }

    pub fn subst_for(&self, args: &[Type]) -> HashMap<String, Type> {
        self.params
            .iter()
            .cloned()
            .zip(args.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnifyError {
    Mismatch(Type, Type),
    /// Binding the variable would create an infinite type.
    Occurs(TypeVarId, Type),
}

#[derive(Debug, Default)]
pub struct TypeCtx {
    vars: Vec<Option<Type>>,
    defs: Vec<TypeDef>,
}

impl TypeCtx {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh_var(&mut self) -> Type {
        let id = TypeVarId(self.vars.len() as u32);
        self.vars.push(None);
        Type::Var(id)
    }

    pub fn add_def(&mut self, def: TypeDef) -> DeclId {
        let id = DeclId(self.defs.len() as u32);
        self.defs.push(def);
        id
    }

    pub fn def(&self, id: DeclId) -> &TypeDef {
        &self.defs[id.0 as usize]
    }

    pub fn def_mut(&mut self, id: DeclId) -> &mut TypeDef {
        &mut self.defs[id.0 as usize]
    }

    pub fn defs(&self) -> impl Iterator<Item = (DeclId, &TypeDef)> {
        self.defs
            .iter()
            .enumerate()
            .map(|(i, d)| (DeclId(i as u32), d))
    }

    /// Follow variable bindings at the top level only.
    pub fn shallow(&self, ty: &Type) -> Type {
        let mut cur = ty.clone();
        while let Type::Var(id) = cur {
            match &self.vars[id.0 as usize] {
                Some(bound) => cur = bound.clone(),
                None => break,
            }
        }
        cur
    }

    /// Substitute every bound variable, recursively.
    pub fn resolve(&self, ty: &Type) -> Type {
        match self.shallow(ty) {
            Type::List(e) => Type::list(self.resolve(&e)),
            Type::Record { decl, args } => Type::Record {
                decl,
                args: args.iter().map(|a| self.resolve(a)).collect(),
            },
            Type::Union { decl, args } => Type::Union {
                decl,
                args: args.iter().map(|a| self.resolve(a)).collect(),
            },
            Type::Function { params, result } => Type::function(
                params.iter().map(|p| self.resolve(p)).collect(),
                self.resolve(&result),
            ),
            other => other,
        }
    }

    pub fn unify(&mut self, a: &Type, b: &Type) -> Result<(), UnifyError> {
        let a = self.shallow(a);
        let b = self.shallow(b);
        match (&a, &b) {
            (Type::Var(x), Type::Var(y)) if x == y => Ok(()),
            (Type::Var(x), other) | (other, Type::Var(x)) => {
                if self.occurs(*x, other) {
                    return Err(UnifyError::Occurs(*x, self.resolve(other)));
                }
                self.vars[x.0 as usize] = Some(other.clone());
                Ok(())
            }
            (Type::Int64, Type::Int64)
            | (Type::Float64, Type::Float64)
            | (Type::String, Type::String)
            | (Type::Bool, Type::Bool)
            | (Type::Unit, Type::Unit) => Ok(()),
            (Type::Param(p), Type::Param(q)) if p == q => Ok(()),
            (Type::List(x), Type::List(y)) => self.unify(x, y).map_err(|e| match e {
                UnifyError::Mismatch(..) => self.mismatch(&a, &b),
                occurs => occurs,
            }),
            (Type::Record { decl: d1, args: a1 }, Type::Record { decl: d2, args: a2 })
            | (Type::Union { decl: d1, args: a1 }, Type::Union { decl: d2, args: a2 })
                if d1 == d2 && a1.len() == a2.len() =>
            {
                for (x, y) in a1.iter().zip(a2.iter()) {
                    self.unify(x, y).map_err(|_| self.mismatch(&a, &b))?;
                }
                Ok(())
            }
            (
                Type::Function {
                    params: p1,
                    result: r1,
                },
                Type::Function {
                    params: p2,
                    result: r2,
                },
            ) if p1.len() == p2.len() => {
                for (x, y) in p1.iter().zip(p2.iter()) {
                    self.unify(x, y).map_err(|_| self.mismatch(&a, &b))?;
                }
                self.unify(r1, r2).map_err(|_| self.mismatch(&a, &b))
            }
            _ => Err(self.mismatch(&a, &b)),
        }
    }

    fn mismatch(&self, a: &Type, b: &Type) -> UnifyError {
        UnifyError::Mismatch(self.resolve(a), self.resolve(b))
    }

    fn occurs(&self, var: TypeVarId, ty: &Type) -> bool {
        match self.shallow(ty) {
            Type::Var(v) => v == var,
            Type::List(e) => self.occurs(var, &e),
            Type::Record { args, .. } | Type::Union { args, .. } => {
                args.iter().any(|a| self.occurs(var, a))
            }
            Type::Function { params, result } => {
                params.iter().any(|p| self.occurs(var, p)) || self.occurs(var, &result)
            }
            _ => false,
        }
    }

    /// Replace the named parameters with fresh inference variables.
    pub fn instantiate(&mut self, params: &[String], tys: &[&Type]) -> (Vec<Type>, Vec<Type>) {
        let fresh: Vec<Type> = params.iter().map(|_| self.fresh_var()).collect();
        let subst: HashMap<String, Type> =
            params.iter().cloned().zip(fresh.iter().cloned()).collect();
        (fresh, tys.iter().map(|t| t.substitute(&subst)).collect())
    }

    /// Field list of a record instantiated at `args`.
    pub fn record_fields(&self, decl: DeclId, args: &[Type]) -> Vec<FieldDef> {
        let def = self.def(decl);
        let subst = def.subst_for(args);
        def.fields()
            .iter()
            .map(|f| FieldDef {
                name: f.name.clone(),
                ty: f.ty.substitute(&subst),
            })
            .collect()
    }

    /// Field types of variant `index` of a union instantiated at `args`.
    pub fn variant_fields(&self, decl: DeclId, args: &[Type], index: usize) -> Vec<Type> {
        let def = self.def(decl);
        let subst = def.subst_for(args);
        def.variants()
            .get(index)
            .map(|v| v.fields.iter().map(|f| f.ty.substitute(&subst)).collect())
            .unwrap_or_default()
    }

    /// Replace unbound variables with Int64. Used once inference is over.
    pub fn default_vars(&self, ty: &Type) -> Type {
        match self.resolve(ty) {
            Type::Var(_) => Type::Int64,
            Type::List(e) => Type::list(self.default_vars(&e)),
            Type::Record { decl, args } => Type::Record {
                decl,
                args: args.iter().map(|a| self.default_vars(a)).collect(),
            },
            Type::Union { decl, args } => Type::Union {
                decl,
                args: args.iter().map(|a| self.default_vars(a)).collect(),
            },
            Type::Function { params, result } => Type::function(
                params.iter().map(|p| self.default_vars(p)).collect(),
                self.default_vars(&result),
            ),
            other => other,
        }
    }

    /// User-facing rendering, e.g. `List<Shape>` or `(Int64) -> Bool`.
    pub fn display(&self, ty: &Type) -> String {
        TypeDisplay {
            ctx: self,
            ty: &self.resolve(ty),
            qualified: false,
        }
        .to_string()
    }

    /// Rendering with module-qualified declaration names. Unique per type;
    /// used to name generic instances.
    pub fn mangle(&self, ty: &Type) -> String {
        TypeDisplay {
            ctx: self,
            ty: &self.resolve(ty),
            qualified: true,
        }
        .to_string()
    }
}

struct TypeDisplay<'a> {
    ctx: &'a TypeCtx,
    ty: &'a Type,
    qualified: bool,
}

impl TypeDisplay<'_> {
    fn nested<'b>(&'b self, ty: &'b Type) -> TypeDisplay<'b> {
        TypeDisplay {
            ctx: self.ctx,
            ty,
            qualified: self.qualified,
        }
    }

    fn write_list(&self, f: &mut fmt::Formatter<'_>, tys: &[Type]) -> fmt::Result {
        for (i, t) in tys.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", self.nested(t))?;
        }
        Ok(())
    }
}

impl fmt::Display for TypeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ty {
            Type::Int64 => f.write_str("Int64"),
            Type::Float64 => f.write_str("Float64"),
            Type::String => f.write_str("String"),
            Type::Bool => f.write_str("Bool"),
            Type::Unit => f.write_str("Unit"),
            Type::List(e) => write!(f, "List<{}>", self.nested(e)),
            Type::Record { decl, args } | Type::Union { decl, args } => {
                let def = self.ctx.def(*decl);
                let name = if self.qualified {
                    &def.qualified_name
                } else {
                    &def.name
                };
                f.write_str(name)?;
                if !args.is_empty() {
                    f.write_str("<")?;
                    self.write_list(f, args)?;
                    f.write_str(">")?;
                }
                Ok(())
            }
            Type::Function { params, result } => {
                f.write_str("(")?;
                self.write_list(f, params)?;
                write!(f, ") -> {}", self.nested(result))
            }
            Type::Param(name) => f.write_str(name),
            Type::Var(id) => write!(f, "?{}", id.0),
        }
    }
}
