//! Built-in function catalogue.
//!
//! Host built-ins become imports from the `env` module. Strings cross the
//! boundary as a pointer to a `[len: u32][bytes]` block in the exported
//! memory; host functions returning a string allocate through the
//! exported `__alloc`. Inline built-ins are lowered directly by the code
//! generator.

use crate::effects::{Effect, EffectSet};
use crate::types::Type;

/// Host module that every host built-in is imported from.
pub const HOST_MODULE: &str = "env";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    None,
    Observe,
    Mutate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lowering {
    Host,
    Inline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinKind {
    PrintString,
    PrintInt,
    PrintFloat,
    LogInfo,
    ReadFile,
    WriteFile,
    FileExists,
    RandomInt,
    NowMillis,
    GetSecret,
    AssertEqInt,
    IntToString,
    FloatToString,
    StringLength,
    Length,
    IsEmpty,
    Head,
    Tail,
    Append,
    IntToFloat,
    FloatToInt,
}

#[derive(Debug, Clone)]
pub struct Builtin {
    pub name: &'static str,
    pub kind: BuiltinKind,
    pub type_params: Vec<String>,
    pub params: Vec<Type>,
    pub result: Type,
    pub effects: EffectSet,
    pub side_effect: SideEffect,
    pub lowering: Lowering,
}

impl Builtin {
    pub fn ty(&self) -> Type {
        Type::function(self.params.clone(), self.result.clone())
    }
}

fn host(
    name: &'static str,
    kind: BuiltinKind,
    params: Vec<Type>,
    result: Type,
    effect: Option<Effect>,
    side_effect: SideEffect,
) -> Builtin {
    Builtin {
        name,
        kind,
        type_params: Vec::new(),
        params,
        result,
        effects: effect.map(EffectSet::single).unwrap_or_default(),
        side_effect,
        lowering: Lowering::Host,
    }
}

fn inline(name: &'static str, kind: BuiltinKind, generic: bool, params: Vec<Type>, result: Type) -> Builtin {
    Builtin {
        name,
        kind,
        type_params: if generic { vec!["T".to_string()] } else { Vec::new() },
        params,
        result,
        effects: EffectSet::empty(),
        side_effect: SideEffect::None,
        lowering: Lowering::Inline,
    }
}

pub fn builtins() -> Vec<Builtin> {
    use BuiltinKind as K;
    use SideEffect::{Mutate, Observe};
    let t = || Type::Param("T".to_string());
    let list_t = || Type::list(t());
    vec![
        host("print_string", K::PrintString, vec![Type::String], Type::Unit, Some(Effect::Log), Mutate),
        host("print_int", K::PrintInt, vec![Type::Int64], Type::Unit, Some(Effect::Log), Mutate),
        host("print_float", K::PrintFloat, vec![Type::Float64], Type::Unit, Some(Effect::Log), Mutate),
        host("log_info", K::LogInfo, vec![Type::String], Type::Unit, Some(Effect::Log), Mutate),
        host("read_file", K::ReadFile, vec![Type::String], Type::String, Some(Effect::FileSystem), Observe),
        host(
            "write_file",
            K::WriteFile,
            vec![Type::String, Type::String],
            Type::Unit,
            Some(Effect::FileSystem),
            Mutate,
        ),
        host("file_exists", K::FileExists, vec![Type::String], Type::Bool, Some(Effect::FileSystem), Observe),
        host(
            "random_int",
            K::RandomInt,
            vec![Type::Int64, Type::Int64],
            Type::Int64,
            Some(Effect::Random),
            Observe,
        ),
        host("now_millis", K::NowMillis, vec![], Type::Int64, Some(Effect::Time), Observe),
        host("get_secret", K::GetSecret, vec![Type::String], Type::String, Some(Effect::Secret), Observe),
        host(
            "assert_eq_int",
            K::AssertEqInt,
            vec![Type::Int64, Type::Int64],
            Type::Unit,
            Some(Effect::Test),
            Mutate,
        ),
        host("int_to_string", K::IntToString, vec![Type::Int64], Type::String, None, SideEffect::None),
        host("float_to_string", K::FloatToString, vec![Type::Float64], Type::String, None, SideEffect::None),
        inline("string_length", K::StringLength, false, vec![Type::String], Type::Int64),
        inline("length", K::Length, true, vec![list_t()], Type::Int64),
        inline("is_empty", K::IsEmpty, true, vec![list_t()], Type::Bool),
        inline("head", K::Head, true, vec![list_t()], t()),
        inline("tail", K::Tail, true, vec![list_t()], list_t()),
        inline("append", K::Append, true, vec![list_t(), t()], list_t()),
        inline("int_to_float", K::IntToFloat, false, vec![Type::Int64], Type::Float64),
        inline("float_to_int", K::FloatToInt, false, vec![Type::Float64], Type::Int64),
    ]
}

pub fn lookup(name: &str) -> Option<Builtin> {
    builtins().into_iter().find(|b| b.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effectful_builtins_are_host_imports() {
        for b in builtins() {
            if !b.effects.is_empty() {
                assert_eq!(b.lowering, Lowering::Host, "{}", b.name);
                assert_ne!(b.side_effect, SideEffect::None, "{}", b.name);
            }
        }
    }

    #[test]
    fn names_are_unique() {
        let all = builtins();
        for (i, b) in all.iter().enumerate() {
            assert!(all[i + 1..].iter().all(|o| o.name != b.name), "{}", b.name);
        }
    }

    #[test]
    fn read_file_needs_filesystem() {
        let b = lookup("read_file").unwrap();
        assert!(b.effects.contains(Effect::FileSystem));
        assert_eq!(b.result, Type::String);
    }
}
