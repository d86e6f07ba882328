//! Tail-call marking.
//!
//! A self-call is a tail call when it is the *direct* operand of a return
//! statement - `return f(n - 1)` qualifies, `return n * f(n - 1)` does not.
//! Marked calls lower to a parameter overwrite and a backward jump in the
//! generated C.

use crate::Optimizer;
use sable_ast::{ExprKind, FunctionStmt, Module, Stmt};

impl Optimizer {
    /// Mark tail-recursive calls across every function in the module.
    pub fn tail_call_optimization(&mut self, module: &mut Module) {
        for stmt in &mut module.statements {
            if let Stmt::Function(f) = stmt {
                self.mark_tail_calls(f);
            }
        }
    }

    /// Mark tail-recursive calls in one function. Returns the count marked.
    pub fn mark_tail_calls(&mut self, f: &mut FunctionStmt) -> usize {
        if f.body.is_empty() {
            return 0;
        }
        let name = f.name.clone();
        let mut marked = 0;
        for stmt in &mut f.body {
            marked += mark_in_stmt(stmt, &name);
        }
        self.stats.tail_calls_marked += marked;
        marked
    }
}

/// True when any return in the function carries a direct self-call.
pub fn function_has_tail_recursion(f: &FunctionStmt) -> bool {
    f.body.iter().any(|stmt| stmt_has_tail_return(stmt, &f.name))
}

fn stmt_has_tail_return(stmt: &Stmt, name: &str) -> bool {
    match stmt {
        Stmt::Return { value: Some(value) } => is_direct_self_call(value, name),
        Stmt::Block { statements, .. } => {
            statements.iter().any(|s| stmt_has_tail_return(s, name))
        }
        Stmt::If {
            then_branch,
            else_branch,
            ..
        } => {
            stmt_has_tail_return(then_branch, name)
                || else_branch
                    .as_deref()
                    .is_some_and(|s| stmt_has_tail_return(s, name))
        }
        _ => false,
    }
}

fn mark_in_stmt(stmt: &mut Stmt, name: &str) -> usize {
    match stmt {
        Stmt::Return { value: Some(value) } => {
            if is_direct_self_call(value, name) {
                if let ExprKind::Call { is_tail_call, .. } = &mut value.kind {
                    *is_tail_call = true;
                }
                1
            } else {
                0
            }
        }
        Stmt::Block { statements, .. } => statements
            .iter_mut()
            .map(|s| mark_in_stmt(s, name))
            .sum(),
        Stmt::If {
            then_branch,
            else_branch,
            ..
        } => {
            let mut marked = mark_in_stmt(then_branch, name);
            if let Some(else_branch) = else_branch {
                marked += mark_in_stmt(else_branch, name);
            }
            marked
        }
        _ => 0,
    }
}

fn is_direct_self_call(expr: &sable_ast::Expr, name: &str) -> bool {
    match &expr.kind {
        ExprKind::Call { callee, .. } => {
            matches!(&callee.kind, ExprKind::Variable { name: callee_name } if callee_name == name)
        }
        _ => false,
    }
}
