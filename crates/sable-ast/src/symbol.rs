//! Scope-structured symbol table.

use crate::types::{MemoryQualifier, SyncModifier, Type};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What a symbol names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolKind {
    /// Module-level variable.
    Global,
    /// Function parameter.
    Param,
    /// Block-local variable.
    Local,
    /// Function.
    Function,
}

/// A resolved symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    /// Declared name.
    pub name: String,
    /// Declared type.
    pub ty: Type,
    /// Kind of declaration.
    pub kind: SymbolKind,
    /// Declared with `native`.
    pub is_native: bool,
    /// Static module-level variable (shared across namespace aliases).
    pub is_static: bool,
    /// C name alias from `#pragma alias`.
    pub c_alias: Option<String>,
    /// `sync` modifier (atomic or none).
    pub sync_modifier: SyncModifier,
    /// `as val` / `as ref` qualifier.
    pub mem_qualifier: MemoryQualifier,
    /// Scope depth at declaration.
    pub scope_depth: usize,
    /// Arena nesting depth at declaration.
    pub arena_depth: usize,
    /// The declaration had pending elements (array codegen bookkeeping).
    pub had_pending_elements: bool,
    /// For handle-typed parameters: the arena variable name to pin into.
    pub pin_arena_var: Option<String>,
}

impl Symbol {
    /// Symbol with default flags at the given kind and depth.
    pub fn new(name: impl Into<String>, ty: Type, kind: SymbolKind) -> Self {
        Self {
            name: name.into(),
            ty,
            kind,
            is_native: false,
            is_static: false,
            c_alias: None,
            sync_modifier: SyncModifier::None,
            mem_qualifier: MemoryQualifier::Default,
            scope_depth: 0,
            arena_depth: 0,
            had_pending_elements: false,
            pin_arena_var: None,
        }
    }

    /// True when this names a function.
    pub fn is_function(&self) -> bool {
        self.kind == SymbolKind::Function
    }
}

/// Scope-structured symbol table.
///
/// Lookup walks scopes innermost-first, so shadowing resolves to the nearest
/// declaration.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    scopes: Vec<HashMap<String, Symbol>>,
}

impl SymbolTable {
    /// Table with the global scope open.
    pub fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }

    /// Current scope depth; the global scope is depth 0.
    pub fn depth(&self) -> usize {
        self.scopes.len() - 1
    }

    /// Open a nested scope.
    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Close the innermost scope, dropping its symbols.
    pub fn pop_scope(&mut self) {
        debug_assert!(self.scopes.len() > 1, "cannot pop the global scope");
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Declare a symbol in the innermost scope, recording its depth.
    /// Redeclaration in the same scope replaces the previous entry.
    pub fn declare(&mut self, mut symbol: Symbol) {
        symbol.scope_depth = self.depth();
        let scope = self.scopes.last_mut().expect("at least the global scope");
        scope.insert(symbol.name.clone(), symbol);
    }

    /// Look up a name, innermost scope first.
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Mutable lookup, innermost scope first.
    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.get_mut(name))
    }

    /// Look up a name in the global scope only.
    pub fn lookup_global(&self, name: &str) -> Option<&Symbol> {
        self.scopes.first().and_then(|scope| scope.get(name))
    }
}
