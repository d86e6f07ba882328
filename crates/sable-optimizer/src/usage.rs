//! Variable-usage tracking for unused-declaration removal.

use sable_ast::{Expr, ExprKind, LambdaBody, Stmt};
use std::collections::HashSet;

/// Collect every variable name read by `expr` into `used`.
///
/// The target of an assignment is a definition, not a use; its value is a
/// use. Lambda bodies are walked because captured outer variables count as
/// uses.
pub(crate) fn collect_used_variables(expr: &Expr, used: &mut HashSet<String>) {
    match &expr.kind {
        ExprKind::Variable { name } => {
            used.insert(name.clone());
        }
        ExprKind::Literal(_) => {}
        ExprKind::Binary { left, right, .. } => {
            collect_used_variables(left, used);
            collect_used_variables(right, used);
        }
        ExprKind::Unary { operand, .. }
        | ExprKind::Increment { operand }
        | ExprKind::Decrement { operand }
        | ExprKind::Spread { array: operand }
        | ExprKind::AsVal { operand, .. }
        | ExprKind::AsRef { operand }
        | ExprKind::Is { operand, .. }
        | ExprKind::AsType { operand, .. } => collect_used_variables(operand, used),
        ExprKind::Assign { value, .. } => collect_used_variables(value, used),
        ExprKind::IndexAssign {
            array,
            index,
            value,
        } => {
            collect_used_variables(array, used);
            collect_used_variables(index, used);
            collect_used_variables(value, used);
        }
        ExprKind::CompoundAssign { target, value, .. } => {
            collect_used_variables(target, used);
            collect_used_variables(value, used);
        }
        ExprKind::Call { callee, args, .. } => {
            collect_used_variables(callee, used);
            for arg in args {
                collect_used_variables(arg, used);
            }
        }
        ExprKind::Array { elements } | ExprKind::SyncList { elements } => {
            for element in elements {
                collect_used_variables(element, used);
            }
        }
        ExprKind::ArrayAccess { array, index } => {
            collect_used_variables(array, used);
            collect_used_variables(index, used);
        }
        ExprKind::ArraySlice {
            array,
            start,
            end,
            step,
            ..
        } => {
            collect_used_variables(array, used);
            for bound in [start, end, step].into_iter().flatten() {
                collect_used_variables(bound, used);
            }
        }
        ExprKind::Range { start, end } => {
            collect_used_variables(start, used);
            collect_used_variables(end, used);
        }
        ExprKind::Interpolated { parts, .. } => {
            for part in parts {
                collect_used_variables(part, used);
            }
        }
        ExprKind::Lambda(lambda) => match &lambda.body {
            LambdaBody::Expr(body) => collect_used_variables(body, used),
            LambdaBody::Stmts(stmts) => {
                for stmt in stmts {
                    collect_used_variables_stmt(stmt, used);
                }
            }
        },
        ExprKind::StaticCall { args, .. } => {
            for arg in args {
                collect_used_variables(arg, used);
            }
        }
        ExprKind::SizedArrayAlloc {
            size,
            default_value,
            ..
        } => {
            collect_used_variables(size, used);
            if let Some(default_value) = default_value {
                collect_used_variables(default_value, used);
            }
        }
        ExprKind::ThreadSpawn { call, .. } => collect_used_variables(call, used),
        ExprKind::ThreadSync { handle, .. } => collect_used_variables(handle, used),
        ExprKind::Typeof { operand, .. } => {
            if let Some(operand) = operand {
                collect_used_variables(operand, used);
            }
        }
        ExprKind::StructLiteral { fields, .. } => {
            for field in fields {
                collect_used_variables(&field.value, used);
            }
        }
        ExprKind::MemberAccess { object, .. } => collect_used_variables(object, used),
        ExprKind::MemberAssign { object, value, .. } => {
            collect_used_variables(object, used);
            collect_used_variables(value, used);
        }
        ExprKind::Sizeof { expr_operand, .. } => {
            if let Some(expr_operand) = expr_operand {
                collect_used_variables(expr_operand, used);
            }
        }
        ExprKind::MethodCall { object, args, .. } => {
            if let Some(object) = object {
                collect_used_variables(object, used);
            }
            for arg in args {
                collect_used_variables(arg, used);
            }
        }
    }
}

/// Statement-level usage collection. Nested function definitions track
/// their own variables and are not descended into.
pub(crate) fn collect_used_variables_stmt(stmt: &Stmt, used: &mut HashSet<String>) {
    match stmt {
        Stmt::Expression { expr } => collect_used_variables(expr, used),
        Stmt::VarDecl(decl) => {
            if let Some(init) = &decl.initializer {
                collect_used_variables(init, used);
            }
        }
        Stmt::Return { value } => {
            if let Some(value) = value {
                collect_used_variables(value, used);
            }
        }
        Stmt::Block { statements, .. } => {
            for stmt in statements {
                collect_used_variables_stmt(stmt, used);
            }
        }
        Stmt::If {
            condition,
            then_branch,
            else_branch,
        } => {
            collect_used_variables(condition, used);
            collect_used_variables_stmt(then_branch, used);
            if let Some(else_branch) = else_branch {
                collect_used_variables_stmt(else_branch, used);
            }
        }
        Stmt::While {
            condition, body, ..
        } => {
            collect_used_variables(condition, used);
            collect_used_variables_stmt(body, used);
        }
        Stmt::For {
            initializer,
            condition,
            increment,
            body,
            ..
        } => {
            if let Some(initializer) = initializer {
                collect_used_variables_stmt(initializer, used);
            }
            if let Some(condition) = condition {
                collect_used_variables(condition, used);
            }
            if let Some(increment) = increment {
                collect_used_variables(increment, used);
            }
            collect_used_variables_stmt(body, used);
        }
        Stmt::ForEach { iterable, body, .. } => {
            collect_used_variables(iterable, used);
            collect_used_variables_stmt(body, used);
        }
        Stmt::Lock { lock_expr, body } => {
            collect_used_variables(lock_expr, used);
            collect_used_variables_stmt(body, used);
        }
        Stmt::Function(_)
        | Stmt::Break
        | Stmt::Continue
        | Stmt::Import { .. }
        | Stmt::Pragma { .. }
        | Stmt::TypeDecl { .. }
        | Stmt::StructDecl(_) => {}
    }
}

/// Conservative side-effect check for unused-variable removal: calls,
/// increment/decrement, assignments, and thread operations may observe or
/// change state, so declarations initialized by them are preserved.
pub(crate) fn expr_has_side_effects(expr: &Expr) -> bool {
    matches!(
        expr.kind,
        ExprKind::Call { .. }
            | ExprKind::MethodCall { .. }
            | ExprKind::StaticCall { .. }
            | ExprKind::Increment { .. }
            | ExprKind::Decrement { .. }
            | ExprKind::Assign { .. }
            | ExprKind::IndexAssign { .. }
            | ExprKind::CompoundAssign { .. }
            | ExprKind::MemberAssign { .. }
            | ExprKind::ThreadSpawn { .. }
            | ExprKind::ThreadSync { .. }
    )
}
