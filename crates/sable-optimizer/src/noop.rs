//! No-op expression simplification.
//!
//! Applied after recursing into subexpressions: `x + 0`, `0 + x`, `x - 0`,
//! `x * 1`, `1 * x`, `x / 1`, `!!x`, `-(-x)`. `x * 0` is left alone so side
//! effects in `x` survive.

use crate::Optimizer;
use sable_ast::{BinaryOp, Expr, ExprKind, LambdaBody, Stmt, UnaryOp};

impl Optimizer {
    /// Simplify no-op expressions in one statement, recursing into nested
    /// statements.
    pub fn simplify_noop_stmt(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::Expression { expr } => self.simplify_noop_expr(expr),
            Stmt::VarDecl(decl) => {
                if let Some(init) = &mut decl.initializer {
                    self.simplify_noop_expr(init);
                }
            }
            Stmt::Return { value } => {
                if let Some(value) = value {
                    self.simplify_noop_expr(value);
                }
            }
            Stmt::Block { statements, .. } => {
                for stmt in statements {
                    self.simplify_noop_stmt(stmt);
                }
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.simplify_noop_expr(condition);
                self.simplify_noop_stmt(then_branch);
                if let Some(else_branch) = else_branch {
                    self.simplify_noop_stmt(else_branch);
                }
            }
            Stmt::While {
                condition, body, ..
            } => {
                self.simplify_noop_expr(condition);
                self.simplify_noop_stmt(body);
            }
            Stmt::For {
                initializer,
                condition,
                increment,
                body,
                ..
            } => {
                if let Some(initializer) = initializer {
                    self.simplify_noop_stmt(initializer);
                }
                if let Some(condition) = condition {
                    self.simplify_noop_expr(condition);
                }
                if let Some(increment) = increment {
                    self.simplify_noop_expr(increment);
                }
                self.simplify_noop_stmt(body);
            }
            Stmt::ForEach { iterable, body, .. } => {
                self.simplify_noop_expr(iterable);
                self.simplify_noop_stmt(body);
            }
            Stmt::Lock { lock_expr, body } => {
                self.simplify_noop_expr(lock_expr);
                self.simplify_noop_stmt(body);
            }
            _ => {}
        }
    }

    /// Simplify `expr` bottom-up, replacing it when it is a no-op.
    pub fn simplify_noop_expr(&mut self, expr: &mut Expr) {
        self.recurse_children(expr);
        if let Some(simplified) = noop_replacement(expr) {
            *expr = simplified;
            self.stats.noops_removed += 1;
        }
    }

    fn recurse_children(&mut self, expr: &mut Expr) {
        match &mut expr.kind {
            ExprKind::Binary { left, right, .. } => {
                self.simplify_noop_expr(left);
                self.simplify_noop_expr(right);
            }
            ExprKind::Unary { operand, .. }
            | ExprKind::Increment { operand }
            | ExprKind::Decrement { operand }
            | ExprKind::Spread { array: operand }
            | ExprKind::AsVal { operand, .. }
            | ExprKind::AsRef { operand }
            | ExprKind::Is { operand, .. }
            | ExprKind::AsType { operand, .. } => self.simplify_noop_expr(operand),
            ExprKind::Assign { value, .. } => self.simplify_noop_expr(value),
            ExprKind::IndexAssign {
                array,
                index,
                value,
            } => {
                self.simplify_noop_expr(array);
                self.simplify_noop_expr(index);
                self.simplify_noop_expr(value);
            }
            ExprKind::CompoundAssign { target, value, .. } => {
                self.simplify_noop_expr(target);
                self.simplify_noop_expr(value);
            }
            ExprKind::Call { callee, args, .. } => {
                self.simplify_noop_expr(callee);
                for arg in args {
                    self.simplify_noop_expr(arg);
                }
            }
            ExprKind::Array { elements } | ExprKind::SyncList { elements } => {
                for element in elements {
                    self.simplify_noop_expr(element);
                }
            }
            ExprKind::ArrayAccess { array, index } => {
                self.simplify_noop_expr(array);
                self.simplify_noop_expr(index);
            }
            ExprKind::ArraySlice {
                array,
                start,
                end,
                step,
                ..
            } => {
                self.simplify_noop_expr(array);
                for bound in [start, end, step].into_iter().flatten() {
                    self.simplify_noop_expr(bound);
                }
            }
            ExprKind::Range { start, end } => {
                self.simplify_noop_expr(start);
                self.simplify_noop_expr(end);
            }
            ExprKind::Interpolated { parts, .. } => {
                for part in parts {
                    self.simplify_noop_expr(part);
                }
            }
            ExprKind::Lambda(lambda) => match &mut lambda.body {
                LambdaBody::Expr(body) => self.simplify_noop_expr(body),
                LambdaBody::Stmts(stmts) => {
                    for stmt in stmts {
                        self.simplify_noop_stmt(stmt);
                    }
                }
            },
            ExprKind::StaticCall { args, .. } => {
                for arg in args {
                    self.simplify_noop_expr(arg);
                }
            }
            ExprKind::SizedArrayAlloc {
                size,
                default_value,
                ..
            } => {
                self.simplify_noop_expr(size);
                if let Some(default_value) = default_value {
                    self.simplify_noop_expr(default_value);
                }
            }
            ExprKind::ThreadSpawn { call, .. } => self.simplify_noop_expr(call),
            ExprKind::ThreadSync { handle, .. } => self.simplify_noop_expr(handle),
            ExprKind::Typeof { operand, .. } => {
                if let Some(operand) = operand {
                    self.simplify_noop_expr(operand);
                }
            }
            ExprKind::StructLiteral { fields, .. } => {
                for field in fields {
                    self.simplify_noop_expr(&mut field.value);
                }
            }
            ExprKind::MemberAccess { object, .. } => self.simplify_noop_expr(object),
            ExprKind::MemberAssign { object, value, .. } => {
                self.simplify_noop_expr(object);
                self.simplify_noop_expr(value);
            }
            ExprKind::Sizeof { expr_operand, .. } => {
                if let Some(expr_operand) = expr_operand {
                    self.simplify_noop_expr(expr_operand);
                }
            }
            ExprKind::MethodCall { object, args, .. } => {
                if let Some(object) = object {
                    self.simplify_noop_expr(object);
                }
                for arg in args {
                    self.simplify_noop_expr(arg);
                }
            }
            ExprKind::Literal(_) | ExprKind::Variable { .. } => {}
        }
    }
}

/// The replacement for a no-op expression, or `None` if it computes.
fn noop_replacement(expr: &Expr) -> Option<Expr> {
    match &expr.kind {
        ExprKind::Binary { op, left, right } => match op {
            BinaryOp::Add => {
                if right.is_literal_zero() {
                    Some((**left).clone())
                } else if left.is_literal_zero() {
                    Some((**right).clone())
                } else {
                    None
                }
            }
            BinaryOp::Sub if right.is_literal_zero() => Some((**left).clone()),
            BinaryOp::Mul => {
                // x * 0 is NOT simplified: side effects in x must survive.
                if right.is_literal_one() {
                    Some((**left).clone())
                } else if left.is_literal_one() {
                    Some((**right).clone())
                } else {
                    None
                }
            }
            BinaryOp::Div if right.is_literal_one() => Some((**left).clone()),
            _ => None,
        },
        ExprKind::Unary { op, operand } => match (op, &operand.kind) {
            (
                UnaryOp::Not,
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: inner,
                },
            )
            | (
                UnaryOp::Neg,
                ExprKind::Unary {
                    op: UnaryOp::Neg,
                    operand: inner,
                },
            ) => Some((**inner).clone()),
            _ => None,
        },
        _ => None,
    }
}
