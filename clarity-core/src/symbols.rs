//! Cross-module symbol table owned by the checker.

use std::collections::HashMap;

use crate::effects::EffectSet;
use crate::module_graph::ModuleId;
use crate::span::Span;
use crate::types::{DeclId, Type};

/// A declared function after signature registration.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub qualified_name: String,
    pub module: ModuleId,
    pub type_params: Vec<String>,
    pub params: Vec<Type>,
    pub result: Type,
    pub effects: EffectSet,
    pub definition_site: Span,
    pub exported: bool,
}

impl Symbol {
    pub fn ty(&self) -> Type {
        Type::function(self.params.clone(), self.result.clone())
    }
}

/// What a plain name refers to at module level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueRef {
    Function(String),
    Constructor { decl: DeclId, variant: usize },
}

/// An `export`ed declaration as seen by importers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Export {
    Function(String),
    Type(DeclId),
}

/// Names visible at module level: local declarations plus imports.
#[derive(Debug, Clone, Default)]
pub struct ModuleScope {
    pub values: HashMap<String, ValueRef>,
    pub types: HashMap<String, DeclId>,
    pub exports: HashMap<String, Export>,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    functions: HashMap<String, Symbol>,
    scopes: HashMap<ModuleId, ModuleScope>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_function(&mut self, symbol: Symbol) {
        self.functions.insert(symbol.qualified_name.clone(), symbol);
    }

    pub fn function(&self, qualified_name: &str) -> Option<&Symbol> {
        self.functions.get(qualified_name)
    }

    pub fn scope(&self, module: ModuleId) -> Option<&ModuleScope> {
        self.scopes.get(&module)
    }

    pub fn scope_mut(&mut self, module: ModuleId) -> &mut ModuleScope {
        self.scopes.entry(module).or_default()
    }

    pub fn lookup_value(&self, module: ModuleId, name: &str) -> Option<&ValueRef> {
        self.scopes.get(&module)?.values.get(name)
    }

    pub fn lookup_type(&self, module: ModuleId, name: &str) -> Option<DeclId> {
        self.scopes.get(&module)?.types.get(name).copied()
    }

    /// Drop every symbol a module registered. Used when the module
    /// fails to check so that dependents never see half-checked code.
    pub fn remove_module(&mut self, module: ModuleId) {
        self.functions.retain(|_, s| s.module != module);
        self.scopes.remove(&module);
    }
}
