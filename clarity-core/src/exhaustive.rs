//! Exhaustiveness of `match` arms.
//!
//! Arms are rows of a pattern matrix. A column whose type has a finite set
//! of constructors (union variants, `true`/`false`) is split per
//! constructor and each specialized matrix is checked on its remaining
//! columns; any other column is covered only by catch-all patterns. What
//! survives is a list of uncovered values rendered as source patterns.

use std::iter;

use crate::ast::Literal;
use crate::hir::{HirPattern, HirPatternKind};
use crate::types::{Type, TypeCtx};

/// Uncovered cases rendered as source patterns. Empty when exhaustive.
pub fn missing_cases(types: &TypeCtx, scrutinee: &Type, patterns: &[&HirPattern]) -> Vec<String> {
    let rows: Vec<Row<'_>> = patterns.iter().map(|p| vec![Some(*p)]).collect();
    missing(types, std::slice::from_ref(scrutinee), &rows)
        .into_iter()
        .filter_map(|w| w.into_iter().next())
        .collect()
}

/// One arm, one entry per column. `None` is a wildcard.
type Row<'p> = Vec<Option<&'p HirPattern>>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum CtorId {
    Variant(usize),
    Bool(bool),
}

struct Ctor {
    id: CtorId,
    name: String,
    fields: Vec<Type>,
}

fn constructors(types: &TypeCtx, ty: &Type) -> Vec<Ctor> {
    match types.resolve(ty) {
        Type::Union { decl, args } => types
            .def(decl)
            .variants()
            .iter()
            .enumerate()
            .map(|(index, variant)| Ctor {
                id: CtorId::Variant(index),
                name: variant.name.clone(),
                fields: types.variant_fields(decl, &args, index),
            })
            .collect(),
        Type::Bool => [true, false]
            .into_iter()
            .map(|b| Ctor {
                id: CtorId::Bool(b),
                name: b.to_string(),
                fields: Vec::new(),
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn is_wild(entry: Option<&HirPattern>) -> bool {
    entry.map_or(true, HirPattern::is_irrefutable)
}

/// Value vectors of `tys` that no row matches.
fn missing(types: &TypeCtx, tys: &[Type], rows: &[Row<'_>]) -> Vec<Vec<String>> {
    if rows.is_empty() {
        return vec![vec!["_".to_string(); tys.len()]];
    }
    let Some((head, rest)) = tys.split_first() else {
        return Vec::new();
    };
    let ctors = constructors(types, head);
    if ctors.is_empty() || rows.iter().all(|r| is_wild(r[0])) {
        let default: Vec<Row<'_>> = rows
            .iter()
            .filter(|r| is_wild(r[0]))
            .map(|r| r[1..].to_vec())
            .collect();
        return missing(types, rest, &default)
            .into_iter()
            .map(|w| prepend("_".to_string(), w))
            .collect();
    }

    let mut out = Vec::new();
    for ctor in ctors {
        let arity = ctor.fields.len();
        let specialized: Vec<Row<'_>> = rows
            .iter()
            .filter_map(|r| {
                let tail = r[1..].iter().copied();
                match r[0].map(|p| &p.kind) {
                    None | Some(HirPatternKind::Wildcard | HirPatternKind::Bind(_)) => {
                        Some(iter::repeat(None).take(arity).chain(tail).collect())
                    }
                    Some(HirPatternKind::Variant {
                        variant, fields, ..
                    }) if ctor.id == CtorId::Variant(*variant) => {
                        Some(fields.iter().map(Some).chain(tail).collect())
                    }
                    Some(HirPatternKind::Literal(Literal::Bool(b))) if ctor.id == CtorId::Bool(*b) => {
                        Some(tail.collect())
                    }
                    _ => None,
                }
            })
            .collect();
        let sub_tys: Vec<Type> = ctor.fields.iter().chain(rest).cloned().collect();
        for mut witness in missing(types, &sub_tys, &specialized) {
            let tail = witness.split_off(arity);
            let rendered = if arity == 0 {
                ctor.name.clone()
            } else {
                format!("{}({})", ctor.name, witness.join(", "))
            };
            out.push(prepend(rendered, tail));
        }
    }
    out
}

fn prepend(first: String, rest: Vec<String>) -> Vec<String> {
    iter::once(first).chain(rest).collect()
}
