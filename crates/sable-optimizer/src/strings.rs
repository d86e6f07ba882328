//! String-literal merging.
//!
//! Folds compile-time string concatenations: adjacent literal parts inside
//! an interpolation, a literal appended to an interpolation with `+`, and
//! `+` of two string literals. Non-literal parts stay in place, and
//! literals separated by a non-literal are not merged.

use crate::Optimizer;
use sable_ast::{BinaryOp, Expr, ExprKind, LambdaBody, LiteralValue, Module, Stmt, Type};

impl Optimizer {
    /// Merge string literals across the whole module.
    pub fn merge_string_literals(&mut self, module: &mut Module) -> usize {
        let before = self.stats.string_literals_merged;
        for stmt in &mut module.statements {
            self.merge_strings_stmt(stmt);
        }
        self.stats.string_literals_merged - before
    }

    fn merge_strings_stmt(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::Expression { expr } => self.optimize_string_expr(expr),
            Stmt::VarDecl(decl) => {
                if let Some(init) = &mut decl.initializer {
                    self.optimize_string_expr(init);
                }
            }
            Stmt::Function(f) => {
                for stmt in &mut f.body {
                    self.merge_strings_stmt(stmt);
                }
            }
            Stmt::Return { value } => {
                if let Some(value) = value {
                    self.optimize_string_expr(value);
                }
            }
            Stmt::Block { statements, .. } => {
                for stmt in statements {
                    self.merge_strings_stmt(stmt);
                }
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.optimize_string_expr(condition);
                self.merge_strings_stmt(then_branch);
                if let Some(else_branch) = else_branch {
                    self.merge_strings_stmt(else_branch);
                }
            }
            Stmt::While {
                condition, body, ..
            } => {
                self.optimize_string_expr(condition);
                self.merge_strings_stmt(body);
            }
            Stmt::For {
                initializer,
                condition,
                increment,
                body,
                ..
            } => {
                if let Some(initializer) = initializer {
                    self.merge_strings_stmt(initializer);
                }
                if let Some(condition) = condition {
                    self.optimize_string_expr(condition);
                }
                if let Some(increment) = increment {
                    self.optimize_string_expr(increment);
                }
                self.merge_strings_stmt(body);
            }
            Stmt::ForEach { iterable, body, .. } => {
                self.optimize_string_expr(iterable);
                self.merge_strings_stmt(body);
            }
            Stmt::Lock { lock_expr, body } => {
                self.optimize_string_expr(lock_expr);
                self.merge_strings_stmt(body);
            }
            _ => {}
        }
    }

    /// Merge string literals in `expr`, bottom-up.
    pub fn optimize_string_expr(&mut self, expr: &mut Expr) {
        self.recurse_string_children(expr);

        let replacement = match &mut expr.kind {
            // "a" + "b"  =>  "ab"
            ExprKind::Binary {
                op: BinaryOp::Add,
                left,
                right,
            } => match (string_literal(left), string_literal(right)) {
                (Some(a), Some(b)) => {
                    self.stats.string_literals_merged += 1;
                    Some(Expr::typed(
                        ExprKind::Literal(LiteralValue::Str(format!("{a}{b}"))),
                        Type::Str,
                    ))
                }
                _ => {
                    // $"..." + "lit" => interpolation with an extra part.
                    self.fold_literal_into_interpolation(left, right)
                }
            },
            ExprKind::Interpolated {
                parts,
                format_specs,
            } => {
                self.merge_adjacent_parts(parts, format_specs);
                None
            }
            _ => None,
        };
        if let Some(replacement) = replacement {
            *expr = replacement;
        }
    }

    /// `interp + "lit"` (or the mirror image) becomes one interpolation,
    /// with adjacent literal parts merged afterwards.
    fn fold_literal_into_interpolation(
        &mut self,
        left: &mut Expr,
        right: &mut Expr,
    ) -> Option<Expr> {
        let (interp, literal, append) = match (&left.kind, &right.kind) {
            (ExprKind::Interpolated { .. }, ExprKind::Literal(LiteralValue::Str(_))) => {
                (left, right.clone(), true)
            }
            (ExprKind::Literal(LiteralValue::Str(_)), ExprKind::Interpolated { .. }) => {
                (right, left.clone(), false)
            }
            _ => return None,
        };
        let ExprKind::Interpolated {
            parts,
            format_specs,
        } = &interp.kind
        else {
            return None;
        };
        let mut parts = parts.clone();
        let mut format_specs = format_specs.clone();
        if append {
            parts.push(literal);
            format_specs.push(None);
        } else {
            parts.insert(0, literal);
            format_specs.insert(0, None);
        }
        self.merge_adjacent_parts(&mut parts, &mut format_specs);
        Some(Expr::typed(
            ExprKind::Interpolated {
                parts,
                format_specs,
            },
            Type::Str,
        ))
    }

    /// Merge runs of adjacent unformatted string-literal parts.
    fn merge_adjacent_parts(&mut self, parts: &mut Vec<Expr>, format_specs: &mut Vec<Option<String>>) {
        let mut merged_parts: Vec<Expr> = Vec::with_capacity(parts.len());
        let mut merged_specs: Vec<Option<String>> = Vec::with_capacity(format_specs.len());

        for (part, spec) in parts.drain(..).zip(format_specs.drain(..)) {
            let mergeable = spec.is_none()
                && part.is_string_literal()
                && merged_specs.last().is_some_and(Option::is_none)
                && merged_parts.last().is_some_and(Expr::is_string_literal);
            if mergeable {
                let Some(addition) = string_literal(&part) else {
                    unreachable!("checked is_string_literal above");
                };
                let prev = merged_parts.last_mut().expect("non-empty");
                if let ExprKind::Literal(LiteralValue::Str(s)) = &mut prev.kind {
                    s.push_str(&addition);
                }
                self.stats.string_literals_merged += 1;
            } else {
                merged_parts.push(part);
                merged_specs.push(spec);
            }
        }

        *parts = merged_parts;
        *format_specs = merged_specs;
    }

    fn recurse_string_children(&mut self, expr: &mut Expr) {
        match &mut expr.kind {
            ExprKind::Binary { left, right, .. } => {
                self.optimize_string_expr(left);
                self.optimize_string_expr(right);
            }
            ExprKind::Unary { operand, .. }
            | ExprKind::Increment { operand }
            | ExprKind::Decrement { operand }
            | ExprKind::Spread { array: operand }
            | ExprKind::AsVal { operand, .. }
            | ExprKind::AsRef { operand }
            | ExprKind::Is { operand, .. }
            | ExprKind::AsType { operand, .. } => self.optimize_string_expr(operand),
            ExprKind::Assign { value, .. } => self.optimize_string_expr(value),
            ExprKind::IndexAssign {
                array,
                index,
                value,
            } => {
                self.optimize_string_expr(array);
                self.optimize_string_expr(index);
                self.optimize_string_expr(value);
            }
            ExprKind::CompoundAssign { target, value, .. } => {
                self.optimize_string_expr(target);
                self.optimize_string_expr(value);
            }
            ExprKind::Call { callee, args, .. } => {
                self.optimize_string_expr(callee);
                for arg in args {
                    self.optimize_string_expr(arg);
                }
            }
            ExprKind::Array { elements } | ExprKind::SyncList { elements } => {
                for element in elements {
                    self.optimize_string_expr(element);
                }
            }
            ExprKind::ArrayAccess { array, index } => {
                self.optimize_string_expr(array);
                self.optimize_string_expr(index);
            }
            ExprKind::Interpolated { parts, .. } => {
                for part in parts {
                    self.optimize_string_expr(part);
                }
            }
            ExprKind::Lambda(lambda) => match &mut lambda.body {
                LambdaBody::Expr(body) => self.optimize_string_expr(body),
                LambdaBody::Stmts(stmts) => {
                    for stmt in stmts {
                        self.merge_strings_stmt(stmt);
                    }
                }
            },
            ExprKind::StaticCall { args, .. } => {
                for arg in args {
                    self.optimize_string_expr(arg);
                }
            }
            ExprKind::ThreadSpawn { call, .. } => self.optimize_string_expr(call),
            ExprKind::ThreadSync { handle, .. } => self.optimize_string_expr(handle),
            ExprKind::StructLiteral { fields, .. } => {
                for field in fields {
                    self.optimize_string_expr(&mut field.value);
                }
            }
            ExprKind::MemberAccess { object, .. } => self.optimize_string_expr(object),
            ExprKind::MemberAssign { object, value, .. } => {
                self.optimize_string_expr(object);
                self.optimize_string_expr(value);
            }
            ExprKind::MethodCall { object, args, .. } => {
                if let Some(object) = object {
                    self.optimize_string_expr(object);
                }
                for arg in args {
                    self.optimize_string_expr(arg);
                }
            }
            _ => {}
        }
    }
}

fn string_literal(expr: &Expr) -> Option<String> {
    match &expr.kind {
        ExprKind::Literal(LiteralValue::Str(s)) => Some(s.clone()),
        _ => None,
    }
}
