//! AST-level optimizer.
//!
//! A fixed sequence of structural passes over an annotated module:
//!
//! 1. **Dead-code elimination** - drop statements after a terminator,
//!    simplify no-op expressions, remove unused variable declarations.
//! 2. **Tail-call marking** - flag `return f(...)` self-calls so the code
//!    generator can lower them to a parameter overwrite and a jump.
//! 3. **String-literal merging** - fold compile-time string concatenations
//!    inside interpolations and across `+`.
//!
//! Every pass is idempotent on its own output; no dataflow fixpoint is
//! iterated.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod noop;
mod strings;
mod tail_call;
mod usage;

pub use tail_call::function_has_tail_recursion;

use sable_ast::{FunctionStmt, Module, Stmt};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Counters accumulated across optimizer passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizerStats {
    /// Unreachable statements removed.
    pub statements_removed: usize,
    /// Unused variable declarations removed.
    pub variables_removed: usize,
    /// No-op expressions simplified away.
    pub noops_removed: usize,
    /// Self-calls marked as tail calls.
    pub tail_calls_marked: usize,
    /// String literals merged at compile time.
    pub string_literals_merged: usize,
}

/// The optimizer. Passes mutate the module in place and update [`OptimizerStats`].
#[derive(Debug, Default)]
pub struct Optimizer {
    stats: OptimizerStats,
}

impl Optimizer {
    /// Fresh optimizer with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulated counters.
    pub fn stats(&self) -> &OptimizerStats {
        &self.stats
    }

    /// Run the full pass sequence over a module.
    pub fn optimize_module(&mut self, module: &mut Module) {
        self.dead_code_elimination(module);
        self.tail_call_optimization(module);
        self.merge_string_literals(module);
        debug!(stats = ?self.stats, "optimizer finished");
    }

    /// Run dead-code elimination over every function in the module.
    pub fn dead_code_elimination(&mut self, module: &mut Module) {
        for stmt in &mut module.statements {
            if let Stmt::Function(f) = stmt {
                self.eliminate_dead_code_function(f);
            }
        }
    }

    /// Dead-code elimination for one function: unreachable statements,
    /// no-op simplification, then unused-variable removal (last, since
    /// simplification can change variable usage).
    pub fn eliminate_dead_code_function(&mut self, f: &mut FunctionStmt) {
        if f.body.is_empty() {
            return;
        }
        self.remove_unreachable_statements(&mut f.body);
        for stmt in &mut f.body {
            self.simplify_noop_stmt(stmt);
        }
        self.remove_unused_variables(&mut f.body);
    }

    /// Remove statements made unreachable by a preceding terminator,
    /// recursing into nested blocks and loop/if bodies. Returns the number
    /// of statements removed.
    pub fn remove_unreachable_statements(&mut self, stmts: &mut Vec<Stmt>) -> usize {
        let removed = remove_unreachable_in_list(stmts);
        self.stats.statements_removed += removed;
        removed
    }

    /// Remove declarations of variables never read, recursing into nested
    /// blocks and loop/if bodies. Each nested statement list is filtered
    /// against uses collected from its own contents, so scoping stays
    /// lexical.
    ///
    /// Assignment to a variable does not count as a read. Declarations
    /// whose initializer may have side effects (calls, increment/decrement,
    /// assignments, thread spawn/sync) are preserved regardless.
    pub fn remove_unused_variables(&mut self, stmts: &mut Vec<Stmt>) -> usize {
        let removed = remove_unused_in_list(stmts);
        self.stats.variables_removed += removed;
        removed
    }
}

fn remove_unreachable_in_list(stmts: &mut Vec<Stmt>) -> usize {
    let mut removed = 0;
    let mut kept: Vec<Stmt> = Vec::with_capacity(stmts.len());

    for mut stmt in stmts.drain(..) {
        if kept.last().is_some_and(stmt_is_terminator) {
            removed += 1;
            continue;
        }
        removed += remove_unreachable_nested(&mut stmt);
        kept.push(stmt);
    }

    *stmts = kept;
    removed
}

fn remove_unreachable_nested(stmt: &mut Stmt) -> usize {
    match stmt {
        Stmt::Block { statements, .. } => remove_unreachable_in_list(statements),
        Stmt::If {
            then_branch,
            else_branch,
            ..
        } => {
            let mut removed = remove_unreachable_nested(then_branch);
            if let Some(else_branch) = else_branch {
                removed += remove_unreachable_nested(else_branch);
            }
            removed
        }
        Stmt::While { body, .. }
        | Stmt::For { body, .. }
        | Stmt::ForEach { body, .. }
        | Stmt::Lock { body, .. } => remove_unreachable_nested(body),
        _ => 0,
    }
}

fn remove_unused_in_list(stmts: &mut Vec<Stmt>) -> usize {
    // Uses are collected over this list's whole subtree, so a declaration
    // read only inside a nested body still counts as used at this level.
    let mut used = std::collections::HashSet::new();
    for stmt in stmts.iter() {
        usage::collect_used_variables_stmt(stmt, &mut used);
    }

    let before = stmts.len();
    stmts.retain(|stmt| match stmt {
        Stmt::VarDecl(decl) => {
            used.contains(&decl.name)
                || decl
                    .initializer
                    .as_ref()
                    .is_some_and(usage::expr_has_side_effects)
        }
        _ => true,
    });
    let mut removed = before - stmts.len();

    for stmt in stmts.iter_mut() {
        removed += remove_unused_nested(stmt);
    }
    removed
}

fn remove_unused_nested(stmt: &mut Stmt) -> usize {
    match stmt {
        Stmt::Block { statements, .. } => remove_unused_in_list(statements),
        Stmt::If {
            then_branch,
            else_branch,
            ..
        } => {
            let mut removed = remove_unused_nested(then_branch);
            if let Some(else_branch) = else_branch {
                removed += remove_unused_nested(else_branch);
            }
            removed
        }
        Stmt::While { body, .. }
        | Stmt::For { body, .. }
        | Stmt::ForEach { body, .. }
        | Stmt::Lock { body, .. } => remove_unused_nested(body),
        _ => 0,
    }
}

/// True when `stmt` always transfers control away: `return`, `break`,
/// `continue`, a block whose tail statement terminates, or an `if` whose
/// both arms exist and terminate. Everything else - including a `while`
/// with an unreachable exit - is conservatively non-terminating.
pub fn stmt_is_terminator(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::Return { .. } | Stmt::Break | Stmt::Continue => true,
        Stmt::Block { statements, .. } => statements.last().is_some_and(stmt_is_terminator),
        Stmt::If {
            then_branch,
            else_branch,
            ..
        } => match else_branch {
            Some(else_branch) => {
                stmt_is_terminator(then_branch) && stmt_is_terminator(else_branch)
            }
            None => false,
        },
        _ => false,
    }
}
