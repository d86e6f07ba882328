//! Per-expression lowering.
//!
//! Every generator below returns a C expression string. Handle-typed
//! expressions obey the two-mode discipline: with `expr_as_handle` set they
//! produce `RtHandle` values, otherwise a raw pointer extracted with the
//! `SB_PEEK` macros (valid until the next compaction of the owning arena).

use crate::types::{
    escape_c_string, escape_char_literal, fold_constant, index_provably_non_negative,
    is_checked_arith, mangle, native_c_operator,
};
use crate::{ArithmeticMode, CodeGen, CodegenError, Result};
use sable_ast::{
    BinaryOp, Expr, ExprKind, LiteralValue, MemoryQualifier, Symbol, SymbolKind, SyncModifier,
    Type, UnaryOp,
};

impl CodeGen<'_> {
    /// The resolved type of `expr`, or a fatal error when the checker
    /// failed to fill it.
    pub(crate) fn expr_ty<'e>(&self, expr: &'e Expr) -> Result<&'e Type> {
        expr.ty.as_ref().ok_or(CodegenError::MissingResolved {
            what: "type",
            node: "expression",
        })
    }

    /// Generate `expr` in handle mode.
    pub(crate) fn gen_handle(&mut self, expr: &Expr) -> Result<String> {
        let saved = self.expr_as_handle;
        self.expr_as_handle = true;
        let result = self.gen_expression(expr);
        self.expr_as_handle = saved;
        result
    }

    /// Generate `expr` in raw mode.
    pub(crate) fn gen_raw(&mut self, expr: &Expr) -> Result<String> {
        let saved = self.expr_as_handle;
        self.expr_as_handle = false;
        let result = self.gen_expression(expr);
        self.expr_as_handle = saved;
        result
    }

    /// Generate one expression in the current mode.
    pub(crate) fn gen_expression(&mut self, expr: &Expr) -> Result<String> {
        match &expr.kind {
            ExprKind::Literal(value) => self.gen_literal(expr, value),
            ExprKind::Variable { name } => self.gen_variable(expr, name),
            ExprKind::Binary { .. } => self.gen_binary(expr),
            ExprKind::Unary { .. } => self.gen_unary(expr),
            ExprKind::Assign { name, value } => self.gen_assign(expr, name, value),
            ExprKind::IndexAssign {
                array,
                index,
                value,
            } => self.gen_index_assign(array, index, value),
            ExprKind::CompoundAssign { target, op, value } => {
                self.gen_compound_assign(target, *op, value)
            }
            ExprKind::Call { .. } => self.gen_call(expr),
            ExprKind::Array { elements } => self.gen_array_literal(expr, elements),
            ExprKind::ArrayAccess { array, index } => self.gen_array_access(array, index),
            ExprKind::ArraySlice {
                array,
                start,
                end,
                step,
                ..
            } => self.gen_array_slice(array, start, end, step),
            ExprKind::Range { start, end } => self.gen_range(start, end),
            ExprKind::Spread { .. } => Err(CodegenError::Unsupported(
                "spread outside an array literal".into(),
            )),
            ExprKind::Increment { operand } => self.gen_incdec(operand, "++", "rt_add"),
            ExprKind::Decrement { operand } => self.gen_incdec(operand, "--", "rt_sub"),
            ExprKind::Interpolated {
                parts,
                format_specs,
            } => self.gen_interpolated(parts, format_specs),
            ExprKind::Lambda(lambda) => self.gen_lambda_expr(lambda),
            ExprKind::StaticCall {
                type_name,
                method_name,
                args,
                resolved,
            } => self.gen_static_call(type_name, method_name, args, resolved.as_ref()),
            ExprKind::SizedArrayAlloc {
                element_type,
                size,
                default_value,
            } => self.gen_sized_array_alloc(element_type, size, default_value.as_deref()),
            ExprKind::ThreadSpawn { call, modifier } => self.gen_thread_spawn(call, *modifier),
            ExprKind::ThreadSync { handle, .. } => self.gen_thread_sync(expr, handle),
            ExprKind::SyncList { elements } => self.gen_sync_list(elements),
            ExprKind::AsVal {
                operand,
                cstr_to_str,
                noop,
                struct_deep_copy,
            } => self.gen_as_val(operand, *cstr_to_str, *noop, *struct_deep_copy),
            ExprKind::AsRef { operand } => self.gen_as_ref(operand),
            ExprKind::Typeof {
                operand,
                type_literal,
            } => self.gen_typeof(operand.as_deref(), type_literal.as_ref()),
            ExprKind::Is {
                operand,
                check_type,
            } => self.gen_is(operand, check_type),
            ExprKind::AsType {
                operand,
                target_type,
            } => self.gen_as_type(operand, target_type),
            ExprKind::StructLiteral {
                struct_name,
                fields,
                struct_type,
                fields_initialized,
            } => self.gen_struct_literal(struct_name, fields, struct_type.as_ref(), fields_initialized),
            ExprKind::MemberAccess { object, field, .. } => self.gen_member_access(object, field),
            ExprKind::MemberAssign {
                object,
                field,
                value,
            } => self.gen_member_assign(object, field, value),
            ExprKind::Sizeof {
                type_operand,
                expr_operand,
            } => self.gen_sizeof(type_operand.as_ref(), expr_operand.as_deref()),
            ExprKind::MethodCall {
                object,
                struct_name,
                method,
                args,
                is_static,
                ..
            } => self.gen_method_call(object.as_deref(), struct_name.as_deref(), method, args, *is_static),
        }
    }

    // ------------------------------------------------------------------
    // Literals
    // ------------------------------------------------------------------

    fn gen_literal(&mut self, expr: &Expr, value: &LiteralValue) -> Result<String> {
        let ty = self.expr_ty(expr)?.clone();
        Ok(match (value, &ty) {
            (LiteralValue::Int(v), Type::Int | Type::Long) => format!("{v}LL"),
            (LiteralValue::Int(v), Type::Uint) => format!("{v}ULL"),
            (LiteralValue::Int(v), Type::Uint32) => format!("{v}U"),
            (LiteralValue::Int(v), Type::Int32) => format!("{v}"),
            (LiteralValue::Int(v), Type::Byte) => format!("(uint8_t){v}"),
            (LiteralValue::Int(v), _) => format!("{v}LL"),
            (LiteralValue::Double(v), Type::Float) => {
                let s = format!("{v}");
                if s.contains('.') || s.contains('e') {
                    format!("{s}f")
                } else {
                    format!("{s}.0f")
                }
            }
            (LiteralValue::Double(v), _) => {
                let s = format!("{v}");
                if s.contains('.') || s.contains('e') {
                    s
                } else {
                    format!("{s}.0")
                }
            }
            (LiteralValue::Char(c), _) => escape_char_literal(*c),
            (LiteralValue::Bool(b), _) => if *b { "true" } else { "false" }.to_string(),
            (LiteralValue::Str(s), _) => {
                let raw = escape_c_string(s);
                if self.expr_as_handle && self.current_arena_var.is_some() {
                    let arena = self.alloc_arena_for(expr);
                    format!("rt_managed_strdup({arena}, RT_HANDLE_NULL, {raw})")
                } else {
                    raw
                }
            }
            (LiteralValue::Nil, _) => {
                if self.expr_as_handle && ty.is_handle_type() {
                    "RT_HANDLE_NULL".to_string()
                } else {
                    "NULL".to_string()
                }
            }
        })
    }

    // ------------------------------------------------------------------
    // Variables
    // ------------------------------------------------------------------

    /// Convert a handle-typed value expression to a raw pointer using the
    /// pin arena that owns the handle.
    fn raw_from_handle(&mut self, handle_expr: &str, ty: &Type, arena: &str, any: bool) -> Result<String> {
        let peek = if any { "SB_PEEK_ANY" } else { "SB_PEEK" };
        Ok(match ty {
            Type::Str => format!("((char *){peek}({arena}, {handle_expr}))"),
            Type::Array(elem) => {
                let elem_c = self.c_array_elem_type(elem)?;
                format!("(({elem_c} *){peek}({arena}, {handle_expr}))")
            }
            _ => handle_expr.to_string(),
        })
    }

    fn gen_variable(&mut self, expr: &Expr, name: &str) -> Result<String> {
        // The 'arena' builtin resolves to the current arena variable.
        if name == "arena" {
            return Ok(self.arena_var().to_string());
        }

        // Lambda parameters shadow outer names; the symbol table is not
        // consulted for them.
        if let Some(innermost) = self.enclosing_lambdas.last().cloned() {
            if let Some(param) = innermost.params.iter().find(|p| p.name == name) {
                let mangled = mangle(name);
                if !self.expr_as_handle
                    && self.current_arena_var.is_some()
                    && param.ty.is_handle_type()
                {
                    // Lambda params pin with the tree-searching variant:
                    // their owning arena is the caller's, wherever that is.
                    return self.raw_from_handle(&mangled, &param.ty, "__caller_arena__", true);
                }
                return Ok(mangled);
            }
            if let Some(capture) = innermost.captures.iter().find(|c| c.name == name) {
                let routed = format!("__cl__->{}", mangle(name));
                if !self.expr_as_handle
                    && self.current_arena_var.is_some()
                    && capture.ty.is_handle_type()
                {
                    return self.raw_from_handle(&routed, &capture.ty, "__caller_arena__", true);
                }
                return Ok(routed);
            }
        }

        let Some(symbol) = self.symbols.lookup(name).cloned() else {
            // Unresolved names (e.g. generated temporaries) pass through
            // mangled; the assignment paths require real symbols.
            return Ok(mangle(name));
        };

        // `as ref` variables hold a pointer; reads dereference it.
        if symbol.mem_qualifier == MemoryQualifier::AsRef {
            let deref = format!("(*{})", mangle(name));
            if !self.expr_as_handle
                && self.current_arena_var.is_some()
                && symbol.ty.is_handle_type()
            {
                let arena = self.function_arena().to_string();
                return self.raw_from_handle(&deref, &symbol.ty.clone(), &arena, false);
            }
            return Ok(deref);
        }

        // Native symbols use the C name directly.
        if symbol.is_native {
            return Ok(symbol
                .c_alias
                .clone()
                .unwrap_or_else(|| name.to_string()));
        }

        // A named function used as a value becomes a closure thunk.
        if symbol.is_function() && !self.in_callee_position {
            if let Type::Function(f) = &symbol.ty {
                if !f.is_native {
                    let mangled = self.prefixed_name(&symbol, name);
                    return self.gen_function_thunk(&mangled, f);
                }
            }
        }

        let mangled = self.prefixed_name(&symbol, name);

        // Atomic reads for sync variables.
        if symbol.sync_modifier == SyncModifier::Atomic {
            return Ok(format!("__atomic_load_n(&{mangled}, __ATOMIC_SEQ_CST)"));
        }

        // A global handle passed by handle must be cloned into the local
        // arena: handle indices are arena-local, so the callee could not
        // pin the main-arena index out of its caller chain.
        if self.expr_as_handle
            && self.current_arena_var.is_some()
            && symbol.kind == SymbolKind::Global
            && symbol.ty.is_handle_type()
        {
            let arena = self.arena_var().to_string();
            return Ok(format!(
                "rt_managed_clone({arena}, __main_arena__, {mangled})"
            ));
        }

        // Raw mode on a handle-typed variable: pin against the arena that
        // owns the handle, not necessarily the current (loop) arena.
        if !self.expr_as_handle && self.current_arena_var.is_some() && symbol.ty.is_handle_type() {
            let ty = symbol.ty.clone();
            return match symbol.kind {
                SymbolKind::Global => {
                    // Clone into the local arena first; the index would be
                    // meaningless pinned against this arena's table.
                    let arena = self.arena_var().to_string();
                    let cloned =
                        format!("rt_managed_clone({arena}, __main_arena__, {mangled})");
                    self.raw_from_handle(&cloned, &ty, &arena, false)
                }
                SymbolKind::Param => {
                    let arena = symbol
                        .pin_arena_var
                        .clone()
                        .unwrap_or_else(|| "__caller_arena__".to_string());
                    self.raw_from_handle(&mangled, &ty, &arena, true)
                }
                _ => {
                    let arena = self.function_arena().to_string();
                    self.raw_from_handle(&mangled, &ty, &arena, false)
                }
            };
        }

        Ok(mangled)
    }

    /// Apply the namespace prefix rules: statics share the canonical module
    /// name, other globals and functions get the per-alias prefix.
    pub(crate) fn prefixed_name(&self, symbol: &Symbol, name: &str) -> String {
        let prefix = if symbol.kind == SymbolKind::Global
            && symbol.is_static
            && self.current_canonical_module.is_some()
        {
            self.current_canonical_module.as_deref()
        } else if symbol.kind == SymbolKind::Global || symbol.is_function() {
            self.namespace_prefix.as_deref()
        } else {
            None
        };
        match prefix {
            Some(prefix) => mangle(&format!("{prefix}__{name}")),
            None => mangle(name),
        }
    }

    // ------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------

    fn gen_binary(&mut self, expr: &Expr) -> Result<String> {
        let ExprKind::Binary { op, left, right } = &expr.kind else {
            unreachable!("caller matched Binary");
        };
        let ty = self.expr_ty(expr)?.clone();

        // Constant folding when both operands are compile-time constants.
        if let Some(folded) = fold_constant(expr) {
            let lit = Expr::typed(ExprKind::Literal(folded.clone()), ty.clone());
            return self.gen_literal(&lit, &folded);
        }

        // String concatenation builds in the arena.
        if ty == Type::Str && *op == BinaryOp::Add {
            let arena = self.alloc_arena_for(expr);
            let l = self.gen_raw(left)?;
            let r = self.gen_raw(right)?;
            let concat = format!("rt_str_concat({arena}, {l}, {r})");
            if self.expr_as_handle {
                return Ok(concat);
            }
            return self.raw_from_handle(&concat, &Type::Str, &arena, false);
        }

        // String comparison goes through strcmp on raw pointers.
        let left_ty = self.expr_ty(left)?.clone();
        if left_ty == Type::Str && matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
            let l = self.gen_raw(left)?;
            let r = self.gen_raw(right)?;
            let cmp = if *op == BinaryOp::Eq { "==" } else { "!=" };
            return Ok(format!("(strcmp({l}, {r}) {cmp} 0)"));
        }

        let l = self.gen_expression(left)?;
        let r = self.gen_expression(right)?;

        // Division and modulo always go through the runtime (zero check).
        if matches!(op, BinaryOp::Div | BinaryOp::Mod) && ty.is_integer() {
            let sfx = self.rt_suffix(&ty)?;
            let name = if *op == BinaryOp::Div { "rt_div" } else { "rt_mod" };
            return Ok(format!("{name}_{sfx}({l}, {r})"));
        }

        // Checked arithmetic traps on overflow via runtime helpers.
        if self.arithmetic_mode == ArithmeticMode::Checked
            && is_checked_arith(*op)
            && ty.is_integer()
        {
            let sfx = self.rt_suffix(&ty)?;
            let name = match op {
                BinaryOp::Add => "rt_add",
                BinaryOp::Sub => "rt_sub",
                BinaryOp::Mul => "rt_mul",
                _ => unreachable!(),
            };
            return Ok(format!("{name}_{sfx}({l}, {r})"));
        }

        let c_op = native_c_operator(*op).ok_or_else(|| {
            CodegenError::Unsupported(format!("operator {op:?} on {ty:?}"))
        })?;
        Ok(format!("({l} {c_op} {r})"))
    }

    fn gen_unary(&mut self, expr: &Expr) -> Result<String> {
        let ExprKind::Unary { op, operand } = &expr.kind else {
            unreachable!("caller matched Unary");
        };
        let ty = self.expr_ty(expr)?.clone();

        if let Some(folded) = fold_constant(expr) {
            let lit = Expr::typed(ExprKind::Literal(folded.clone()), ty.clone());
            return self.gen_literal(&lit, &folded);
        }

        let inner = self.gen_expression(operand)?;
        Ok(match op {
            UnaryOp::Neg => {
                if self.arithmetic_mode == ArithmeticMode::Checked && ty.is_integer() {
                    let sfx = self.rt_suffix(&ty)?;
                    format!("rt_neg_{sfx}({inner})")
                } else {
                    format!("(-{inner})")
                }
            }
            UnaryOp::Not => format!("(!{inner})"),
            UnaryOp::BitNot => format!("(~{inner})"),
        })
    }

    fn gen_incdec(&mut self, operand: &Expr, c_op: &str, checked: &str) -> Result<String> {
        let ty = self.expr_ty(operand)?.clone();
        match &operand.kind {
            ExprKind::Variable { name } => {
                if let Some(symbol) = self.symbols.lookup(name) {
                    if symbol.sync_modifier == SyncModifier::Atomic {
                        let mangled = mangle(name);
                        let fetch = if c_op == "++" {
                            "__atomic_fetch_add"
                        } else {
                            "__atomic_fetch_sub"
                        };
                        return Ok(format!("{fetch}(&{mangled}, 1, __ATOMIC_SEQ_CST)"));
                    }
                }
                let lowered = self.gen_expression(operand)?;
                if self.arithmetic_mode == ArithmeticMode::Checked && ty.is_integer() {
                    let sfx = self.rt_suffix(&ty)?;
                    Ok(format!("({lowered} = {checked}_{sfx}({lowered}, 1LL))"))
                } else {
                    Ok(format!("({lowered}{c_op})"))
                }
            }
            ExprKind::MemberAccess { .. } => {
                let lowered = self.gen_expression(operand)?;
                Ok(format!("({lowered}{c_op})"))
            }
            _ => Err(CodegenError::Unsupported(
                "increment/decrement target".into(),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Assignment family
    // ------------------------------------------------------------------

    fn gen_assign(&mut self, _expr: &Expr, name: &str, value: &Expr) -> Result<String> {
        let symbol = self
            .symbols
            .lookup(name)
            .cloned()
            .ok_or_else(|| CodegenError::UnknownSymbol(name.to_string()))?;
        let target = self.prefixed_name(&symbol, name);
        let ty = symbol.ty.clone();

        // Atomic stores for sync variables.
        if symbol.sync_modifier == SyncModifier::Atomic {
            let ctype = self.c_type(&ty)?;
            let v = self.gen_expression(value)?;
            let t = self.next_temp();
            return Ok(format!(
                "(__extension__({{ {ctype} __v{t}__ = {v}; \
                 __atomic_store_n(&{target}, __v{t}__, __ATOMIC_SEQ_CST); __v{t}__; }}))"
            ));
        }

        // any LHS with a concrete RHS boxes.
        if ty == Type::Any {
            let value_ty = self.expr_ty(value)?.clone();
            if value_ty != Type::Any {
                let v = if value_ty.is_handle_type() {
                    self.gen_handle(value)?
                } else {
                    self.gen_expression(value)?
                };
                let boxed = self.box_value(&v, &value_ty)?;
                return Ok(format!("({target} = {boxed})"));
            }
        }

        if self.current_arena_var.is_some() && ty.is_handle_type() {
            return self.gen_handle_assign(&symbol, &target, &ty, value);
        }

        // Global struct assignment with handle fields frees the old field
        // handles and promotes the new ones to the root arena.
        if symbol.kind == SymbolKind::Global {
            if let Type::Struct(s) = &ty {
                let handle_fields: Vec<_> = s
                    .fields
                    .iter()
                    .filter(|f| f.ty.is_handle_type())
                    .map(|f| f.name.clone())
                    .collect();
                if !handle_fields.is_empty() && self.current_arena_var.is_some() {
                    let ctype = self.c_type(&ty)?;
                    let cur = self.arena_var().to_string();
                    let v = self.gen_expression(value)?;
                    let t = self.next_temp();
                    let mut body = format!("{ctype} __v{t}__ = {v}; ");
                    for field in &handle_fields {
                        let f = mangle(field);
                        body.push_str(&format!(
                            "rt_managed_mark_dead(__main_arena__, {target}.{f}); \
                             __v{t}__.{f} = rt_managed_promote(__main_arena__, {cur}, __v{t}__.{f}); "
                        ));
                    }
                    body.push_str(&format!("{target} = __v{t}__; {target};"));
                    return Ok(format!("(__extension__({{ {body} }}))"));
                }
            }
        }

        // Plain scalar store.
        let v = self.gen_expression(value)?;
        Ok(format!("({target} = {v})"))
    }

    /// Handle-typed stores: old-handle cleanup, array conversions, clone
    /// into the owning arena, and promotion for globals.
    fn gen_handle_assign(
        &mut self,
        symbol: &Symbol,
        target: &str,
        ty: &Type,
        value: &Expr,
    ) -> Result<String> {
        let value_ty = self.expr_ty(value)?.clone();
        let cur = self.arena_var().to_string();

        // T[] -> any[] (and 2D/3D) conversions.
        let converted = self.any_array_conversion(ty, &value_ty, value)?;
        let (v, fresh) = match converted {
            Some(v) => (v, true),
            None => {
                let v = self.gen_handle(value)?;
                // Fresh handles need no clone: literals, allocation forms,
                // and thread-sync results are already owned locally.
                let fresh = matches!(
                    value.kind,
                    ExprKind::Array { .. }
                        | ExprKind::SizedArrayAlloc { .. }
                        | ExprKind::ThreadSync { .. }
                        | ExprKind::Literal(_)
                        | ExprKind::Interpolated { .. }
                );
                (v, fresh)
            }
        };

        let t = self.next_temp();
        if symbol.kind == SymbolKind::Global {
            // Globals promote to the program root arena.
            return Ok(format!(
                "(__extension__({{ RtHandle __h{t}__ = {v}; \
                 rt_managed_mark_dead(__main_arena__, {target}); \
                 {target} = rt_managed_promote(__main_arena__, {cur}, __h{t}__); {target}; }}))"
            ));
        }

        let owner = self.function_arena().to_string();
        let needs_clone = matches!(ty, Type::Array(_)) && !fresh && owner != cur;
        if needs_clone {
            // Assigning to an outer-scope local from an inner (loop) arena
            // clones so the value survives the iteration teardown.
            return Ok(format!(
                "(__extension__({{ RtHandle __h{t}__ = rt_managed_clone({owner}, {cur}, {v}); \
                 rt_managed_mark_dead({owner}, {target}); {target} = __h{t}__; {target}; }}))"
            ));
        }
        Ok(format!(
            "(__extension__({{ RtHandle __h{t}__ = {v}; \
             if ({target} != __h{t}__) rt_managed_mark_dead({owner}, {target}); \
             {target} = __h{t}__; {target}; }}))"
        ))
    }

    /// The `rt_array*_to_any_*` conversion when the LHS demands `any`
    /// elements the RHS does not have. Returns the converted handle
    /// expression, or `None` when no conversion applies.
    fn any_array_conversion(
        &mut self,
        lhs: &Type,
        rhs: &Type,
        value: &Expr,
    ) -> Result<Option<String>> {
        let (Type::Array(lhs_elem), Type::Array(rhs_elem)) = (lhs, rhs) else {
            return Ok(None);
        };
        let arena = self.arena_var().to_string();
        // Depth at which the element types diverge into `any`.
        for (depth, helper) in [
            (0usize, "rt_array_to_any"),
            (1, "rt_array2_to_any"),
            (2, "rt_array3_to_any"),
        ] {
            let mut l: &Type = lhs_elem;
            let mut r: &Type = rhs_elem;
            let mut ok = true;
            for _ in 0..depth {
                match (l, r) {
                    (Type::Array(le), Type::Array(re)) => {
                        l = le;
                        r = re;
                    }
                    _ => {
                        ok = false;
                        break;
                    }
                }
            }
            if ok && *l == Type::Any && *r != Type::Any && !matches!(r, Type::Array(_)) {
                let sfx = self.rt_suffix(r)?;
                let v = self.gen_handle(value)?;
                return Ok(Some(format!("{helper}_{sfx}({arena}, {v})")));
            }
        }
        Ok(None)
    }

    /// Box a lowered value into `RtAny`.
    pub(crate) fn box_value(&mut self, value: &str, ty: &Type) -> Result<String> {
        let f = self.boxing_fn(ty)?;
        Ok(match ty {
            Type::Nil => format!("{f}()"),
            Type::Str | Type::Array(_) => {
                let arena = self.arena_var();
                format!("{f}({arena}, {value})")
            }
            _ => format!("{f}({value})"),
        })
    }

    fn gen_index_assign(&mut self, array: &Expr, index: &Expr, value: &Expr) -> Result<String> {
        let arr_ty = self.expr_ty(array)?.clone();
        let Type::Array(elem) = &arr_ty else {
            return Err(CodegenError::Unsupported("indexed store into non-array".into()));
        };
        let elem_c = self.c_array_elem_type(elem)?;
        let arena = self.arena_var().to_string();
        let h = self.gen_handle(array)?;
        let idx = self.gen_expression(index)?;
        let v = if elem.is_handle_type() {
            self.gen_handle(value)?
        } else {
            self.gen_expression(value)?
        };
        let t = self.next_temp();
        let adjust = if index_provably_non_negative(self, index) {
            String::new()
        } else {
            format!("if (__i{t}__ < 0) __i{t}__ += rt_array_length({arena}, __h{t}__); ")
        };
        Ok(format!(
            "(__extension__({{ RtHandle __h{t}__ = {h}; int64_t __i{t}__ = {idx}; {adjust}\
             {elem_c} *__p{t}__ = ({elem_c} *)SB_PEEK({arena}, __h{t}__); \
             __p{t}__[__i{t}__] = {v}; __p{t}__[__i{t}__]; }}))"
        ))
    }

    fn gen_compound_assign(&mut self, target: &Expr, op: BinaryOp, value: &Expr) -> Result<String> {
        let ty = self.expr_ty(target)?.clone();
        let v = self.gen_expression(value)?;

        let combine = |gen: &mut Self, lhs: &str| -> Result<String> {
            if matches!(op, BinaryOp::Div | BinaryOp::Mod) && ty.is_integer() {
                let sfx = gen.rt_suffix(&ty)?;
                let f = if op == BinaryOp::Div { "rt_div" } else { "rt_mod" };
                return Ok(format!("{f}_{sfx}({lhs}, {v})"));
            }
            if gen.arithmetic_mode == ArithmeticMode::Checked
                && is_checked_arith(op)
                && ty.is_integer()
            {
                let sfx = gen.rt_suffix(&ty)?;
                let f = match op {
                    BinaryOp::Add => "rt_add",
                    BinaryOp::Sub => "rt_sub",
                    BinaryOp::Mul => "rt_mul",
                    _ => unreachable!(),
                };
                return Ok(format!("{f}_{sfx}({lhs}, {v})"));
            }
            let c_op = native_c_operator(op)
                .ok_or_else(|| CodegenError::Unsupported(format!("compound op {op:?}")))?;
            Ok(format!("({lhs} {c_op} {v})"))
        };

        match &target.kind {
            ExprKind::Variable { .. } | ExprKind::MemberAccess { .. } => {
                let lhs = self.gen_expression(target)?;
                let rhs = combine(self, &lhs)?;
                Ok(format!("({lhs} = {rhs})"))
            }
            ExprKind::ArrayAccess { array, index } => {
                let arr_ty = self.expr_ty(array)?.clone();
                let Type::Array(elem) = &arr_ty else {
                    return Err(CodegenError::Unsupported("compound store into non-array".into()));
                };
                let elem_c = self.c_array_elem_type(elem)?;
                let arena = self.arena_var().to_string();
                let h = self.gen_handle(array)?;
                let idx = self.gen_expression(index)?;
                let t = self.next_temp();
                let slot = format!("__p{t}__[__i{t}__]");
                let rhs = combine(self, &slot)?;
                let adjust = if index_provably_non_negative(self, index) {
                    String::new()
                } else {
                    format!("if (__i{t}__ < 0) __i{t}__ += rt_array_length({arena}, __h{t}__); ")
                };
                Ok(format!(
                    "(__extension__({{ RtHandle __h{t}__ = {h}; int64_t __i{t}__ = {idx}; {adjust}\
                     {elem_c} *__p{t}__ = ({elem_c} *)SB_PEEK({arena}, __h{t}__); \
                     {slot} = {rhs}; {slot}; }}))"
                ))
            }
            _ => Err(CodegenError::Unsupported("compound assignment target".into())),
        }
    }

    // ------------------------------------------------------------------
    // Arrays
    // ------------------------------------------------------------------

    fn gen_array_literal(&mut self, expr: &Expr, elements: &[Expr]) -> Result<String> {
        let ty = self.expr_ty(expr)?.clone();
        let Type::Array(elem) = &ty else {
            return Err(CodegenError::MissingResolved {
                what: "array type",
                node: "array literal",
            });
        };
        let elem_c = self.c_array_elem_type(elem)?;
        let sfx = self.rt_suffix(elem)?;
        let arena = self.alloc_arena_for(expr);

        let has_spread = elements
            .iter()
            .any(|e| matches!(e.kind, ExprKind::Spread { .. }));
        let handle = if has_spread {
            self.gen_array_with_spread(&arena, &elem_c, sfx, elem, elements)?
        } else if elements.is_empty() {
            format!("rt_array_alloc_{sfx}({arena}, 0, NULL)")
        } else {
            let saved = self.in_array_compound_literal;
            self.in_array_compound_literal = true;
            let mut parts = Vec::with_capacity(elements.len());
            for element in elements {
                parts.push(if elem.is_handle_type() {
                    self.gen_handle(element)?
                } else {
                    self.gen_raw_or_plain(element, elem)?
                });
            }
            self.in_array_compound_literal = saved;
            format!(
                "rt_array_alloc_{sfx}({arena}, {}, ({elem_c}[]){{{}}})",
                elements.len(),
                parts.join(", ")
            )
        };

        if self.expr_as_handle || self.current_arena_var.is_none() {
            Ok(handle)
        } else {
            self.raw_from_handle(&handle, &ty, &arena, false)
        }
    }

    /// Spread-bearing array literals build at runtime: count, allocate
    /// zeroed, then copy each element or spread run into place.
    fn gen_array_with_spread(
        &mut self,
        arena: &str,
        elem_c: &str,
        sfx: &str,
        elem: &Type,
        elements: &[Expr],
    ) -> Result<String> {
        let t = self.next_temp();
        let mut body = String::new();
        let static_count = elements
            .iter()
            .filter(|e| !matches!(e.kind, ExprKind::Spread { .. }))
            .count();
        body.push_str(&format!("int64_t __n{t}__ = {static_count}LL; "));

        let mut spread_temps = Vec::new();
        for (i, element) in elements.iter().enumerate() {
            if let ExprKind::Spread { array } = &element.kind {
                let src = self.gen_handle(array)?;
                body.push_str(&format!(
                    "RtHandle __s{t}_{i}__ = {src}; \
                     __n{t}__ += rt_array_length({arena}, __s{t}_{i}__); "
                ));
                spread_temps.push(i);
            }
        }
        body.push_str(&format!(
            "RtHandle __a{t}__ = rt_array_alloc_{sfx}({arena}, __n{t}__, NULL); \
             {elem_c} *__d{t}__ = ({elem_c} *)SB_PEEK({arena}, __a{t}__); \
             int64_t __w{t}__ = 0; "
        ));
        for (i, element) in elements.iter().enumerate() {
            if matches!(element.kind, ExprKind::Spread { .. }) {
                body.push_str(&format!(
                    "{{ int64_t __l__ = rt_array_length({arena}, __s{t}_{i}__); \
                     memcpy(__d{t}__ + __w{t}__, SB_PEEK({arena}, __s{t}_{i}__), \
                     (size_t)__l__ * sizeof({elem_c})); __w{t}__ += __l__; }} "
                ));
            } else {
                let v = if elem.is_handle_type() {
                    self.gen_handle(element)?
                } else {
                    self.gen_raw_or_plain(element, elem)?
                };
                body.push_str(&format!("__d{t}__[__w{t}__++] = {v}; "));
            }
        }
        body.push_str(&format!("__a{t}__;"));
        Ok(format!("(__extension__({{ {body} }}))"))
    }

    /// Elements of non-handle type lower in the current plain mode.
    fn gen_raw_or_plain(&mut self, expr: &Expr, _elem: &Type) -> Result<String> {
        self.gen_expression(expr)
    }

    fn gen_array_access(&mut self, array: &Expr, index: &Expr) -> Result<String> {
        let arr_ty = self.expr_ty(array)?.clone();
        let Type::Array(elem) = &arr_ty else {
            return Err(CodegenError::Unsupported("index into non-array".into()));
        };
        let elem_c = self.c_array_elem_type(elem)?;
        let arena = self.arena_var().to_string();
        let h = self.gen_handle(array)?;
        let idx = self.gen_expression(index)?;
        let t = self.next_temp();
        let adjust = if index_provably_non_negative(self, index) {
            String::new()
        } else {
            format!("if (__i{t}__ < 0) __i{t}__ += rt_array_length({arena}, __h{t}__); ")
        };
        Ok(format!(
            "(__extension__({{ RtHandle __h{t}__ = {h}; int64_t __i{t}__ = {idx}; {adjust}\
             {elem_c} __e{t}__ = (({elem_c} *)SB_PEEK({arena}, __h{t}__))[__i{t}__]; __e{t}__; }}))"
        ))
    }

    fn gen_array_slice(
        &mut self,
        array: &Expr,
        start: &Option<Box<Expr>>,
        end: &Option<Box<Expr>>,
        step: &Option<Box<Expr>>,
    ) -> Result<String> {
        let arr_ty = self.expr_ty(array)?.clone();
        let Type::Array(elem) = &arr_ty else {
            return Err(CodegenError::Unsupported("slice of non-array".into()));
        };
        let elem_c = self.c_array_elem_type(elem)?;
        let sfx = self.rt_suffix(elem)?;
        let arena = self.arena_var().to_string();
        let h = self.gen_handle(array)?;
        let t = self.next_temp();

        let start = match start {
            Some(s) => self.gen_expression(s)?,
            None => "0LL".to_string(),
        };
        let end = match end {
            Some(e) => self.gen_expression(e)?,
            None => format!("__l{t}__"),
        };
        let step = match step {
            Some(s) => self.gen_expression(s)?,
            None => "1LL".to_string(),
        };

        let slice = format!(
            "(__extension__({{ RtHandle __h{t}__ = {h}; \
             int64_t __l{t}__ = rt_array_length({arena}, __h{t}__); \
             int64_t __b{t}__ = {start}; if (__b{t}__ < 0) __b{t}__ += __l{t}__; \
             int64_t __e{t}__ = {end}; if (__e{t}__ < 0) __e{t}__ += __l{t}__; \
             int64_t __s{t}__ = {step}; \
             int64_t __n{t}__ = __e{t}__ > __b{t}__ ? (__e{t}__ - __b{t}__ + __s{t}__ - 1) / __s{t}__ : 0; \
             RtHandle __r{t}__ = rt_array_alloc_{sfx}({arena}, __n{t}__, NULL); \
             {elem_c} *__src{t}__ = ({elem_c} *)SB_PEEK({arena}, __h{t}__); \
             {elem_c} *__dst{t}__ = ({elem_c} *)SB_PEEK({arena}, __r{t}__); \
             for (int64_t __k{t}__ = 0; __k{t}__ < __n{t}__; __k{t}__++) \
             __dst{t}__[__k{t}__] = __src{t}__[__b{t}__ + __k{t}__ * __s{t}__]; \
             __r{t}__; }}))"
        );
        if self.expr_as_handle {
            Ok(slice)
        } else {
            self.raw_from_handle(&slice, &arr_ty, &arena, false)
        }
    }

    fn gen_range(&mut self, start: &Expr, end: &Expr) -> Result<String> {
        let arena = self.arena_var().to_string();
        let s = self.gen_expression(start)?;
        let e = self.gen_expression(end)?;
        Ok(format!("rt_array_range({arena}, {s}, {e})"))
    }

    fn gen_sized_array_alloc(
        &mut self,
        element_type: &Type,
        size: &Expr,
        default_value: Option<&Expr>,
    ) -> Result<String> {
        let elem_c = self.c_array_elem_type(element_type)?;
        let sfx = self.rt_suffix(element_type)?;
        let arena = self.arena_var().to_string();
        let n = self.gen_expression(size)?;
        match default_value {
            None => Ok(format!("rt_array_alloc_{sfx}({arena}, {n}, NULL)")),
            Some(default) => {
                let v = if element_type.is_handle_type() {
                    self.gen_handle(default)?
                } else {
                    self.gen_expression(default)?
                };
                let t = self.next_temp();
                Ok(format!(
                    "(__extension__({{ int64_t __n{t}__ = {n}; \
                     RtHandle __a{t}__ = rt_array_alloc_{sfx}({arena}, __n{t}__, NULL); \
                     {elem_c} *__d{t}__ = ({elem_c} *)SB_PEEK({arena}, __a{t}__); \
                     for (int64_t __k{t}__ = 0; __k{t}__ < __n{t}__; __k{t}__++) \
                     __d{t}__[__k{t}__] = {v}; __a{t}__; }}))"
                ))
            }
        }
    }

    // ------------------------------------------------------------------
    // Interpolated strings
    // ------------------------------------------------------------------

    fn gen_interpolated(
        &mut self,
        parts: &[Expr],
        format_specs: &[Option<String>],
    ) -> Result<String> {
        let arena = self.arena_var().to_string();
        let t = self.next_temp();
        let mut body = format!("char *__str{t}__ = rt_string_with_capacity({arena}, 64); ");

        for (i, part) in parts.iter().enumerate() {
            let spec = format_specs.get(i).and_then(Option::as_ref);
            let part_ty = self.expr_ty(part)?.clone();
            let piece = match (&part.kind, spec) {
                (ExprKind::Literal(LiteralValue::Str(s)), None) => escape_c_string(s),
                (_, Some(spec)) => {
                    let f = self.rt_format_fn(&part_ty)?;
                    let v = if part_ty == Type::Str {
                        self.gen_raw(part)?
                    } else {
                        self.gen_expression(part)?
                    };
                    format!("{f}({arena}, {v}, {})", escape_c_string(spec))
                }
                (_, None) if part_ty == Type::Str => self.gen_raw(part)?,
                (_, None) => {
                    let f = self.rt_to_string_fn(&part_ty)?;
                    let v = self.gen_expression(part)?;
                    format!("{f}({arena}, {v})")
                }
            };
            body.push_str(&format!("__str{t}__ = rt_string_append(__str{t}__, {piece}); "));
        }

        let result = if self.expr_as_handle {
            format!("rt_managed_strdup({arena}, RT_HANDLE_NULL, __str{t}__)")
        } else {
            format!("__str{t}__")
        };
        Ok(format!("(__extension__({{ {body}{result}; }}))"))
    }

    // ------------------------------------------------------------------
    // Value/reference operators, type tests
    // ------------------------------------------------------------------

    fn gen_as_val(
        &mut self,
        operand: &Expr,
        cstr_to_str: bool,
        noop: bool,
        struct_deep_copy: bool,
    ) -> Result<String> {
        if noop {
            return self.gen_expression(operand);
        }
        if cstr_to_str {
            let arena = self.arena_var().to_string();
            let p = self.gen_expression(operand)?;
            let t = self.next_temp();
            return Ok(format!(
                "(__extension__({{ const char *__c{t}__ = {p}; \
                 __c{t}__ ? rt_managed_strdup({arena}, RT_HANDLE_NULL, __c{t}__) : RT_HANDLE_NULL; }}))"
            ));
        }
        if struct_deep_copy {
            let ty = self.expr_ty(operand)?.clone();
            let Type::Struct(s) = &ty else {
                return Err(CodegenError::Unsupported("as val deep copy of non-struct".into()));
            };
            let ctype = self.c_type(&ty)?;
            let arena = self.arena_var().to_string();
            let v = self.gen_expression(operand)?;
            let t = self.next_temp();
            let mut body = format!("{ctype} __v{t}__ = {v}; ");
            for field in s.fields.iter().filter(|f| f.ty.is_handle_type()) {
                let f = mangle(&field.name);
                body.push_str(&format!(
                    "__v{t}__.{f} = rt_managed_clone({arena}, {arena}, __v{t}__.{f}); "
                ));
            }
            body.push_str(&format!("__v{t}__;"));
            return Ok(format!("(__extension__({{ {body} }}))"));
        }
        // Primitives behind `as ref` pointers: dereference.
        let inner = self.gen_expression(operand)?;
        Ok(format!("(*{inner})"))
    }

    fn gen_as_ref(&mut self, operand: &Expr) -> Result<String> {
        let ty = self.expr_ty(operand)?.clone();
        if matches!(ty, Type::Array(_)) {
            // Arrays are already reference-shaped: the handle itself.
            return self.gen_handle(operand);
        }
        let inner = self.gen_expression(operand)?;
        Ok(format!("(&{inner})"))
    }

    fn gen_typeof(&mut self, operand: Option<&Expr>, type_literal: Option<&Type>) -> Result<String> {
        let name = match (operand, type_literal) {
            (_, Some(ty)) => self.type_display_name(ty),
            (Some(op), None) => {
                let op_ty = self.expr_ty(op)?.clone();
                if op_ty == Type::Any {
                    let arena = self.arena_var().to_string();
                    let v = self.gen_expression(op)?;
                    let call = format!("rt_any_type_name({arena}, {v})");
                    return if self.expr_as_handle {
                        Ok(format!("rt_managed_strdup({arena}, RT_HANDLE_NULL, {call})"))
                    } else {
                        Ok(call)
                    };
                }
                self.type_display_name(&op_ty)
            }
            (None, None) => {
                return Err(CodegenError::MissingResolved {
                    what: "operand",
                    node: "typeof",
                })
            }
        };
        let lit = escape_c_string(&name);
        if self.expr_as_handle && self.current_arena_var.is_some() {
            let arena = self.arena_var();
            Ok(format!("rt_managed_strdup({arena}, RT_HANDLE_NULL, {lit})"))
        } else {
            Ok(lit)
        }
    }

    fn gen_is(&mut self, operand: &Expr, check_type: &Type) -> Result<String> {
        let v = self.gen_expression(operand)?;
        match check_type {
            Type::Array(elem) => {
                let elem_tag = self.any_tag(elem)?;
                Ok(format!(
                    "(rt_any_get_tag({v}) == RT_ANY_ARRAY && rt_any_get_elem_tag({v}) == {elem_tag})"
                ))
            }
            Type::Struct(s) => {
                let name = escape_c_string(&s.name);
                Ok(format!("rt_any_is_struct_type({v}, {name})"))
            }
            other => {
                let tag = self.any_tag(other)?;
                Ok(format!("(rt_any_get_tag({v}) == {tag})"))
            }
        }
    }

    fn gen_as_type(&mut self, operand: &Expr, target: &Type) -> Result<String> {
        let op_ty = self.expr_ty(operand)?.clone();
        if op_ty == Type::Any {
            let f = self.unboxing_fn(target)?;
            let v = self.gen_expression(operand)?;
            if let Type::Struct(s) = target {
                let ctype = self.c_type(target)?;
                let name = escape_c_string(&s.name);
                return Ok(format!("(*({ctype} *)rt_any_to_struct({v}, {name}))"));
            }
            return Ok(format!("{f}({v})"));
        }
        // Concrete-to-concrete casts are plain C casts.
        let ctype = self.c_type(target)?;
        let v = self.gen_expression(operand)?;
        Ok(format!("(({ctype})({v}))"))
    }

    fn gen_sizeof(&mut self, type_operand: Option<&Type>, expr_operand: Option<&Expr>) -> Result<String> {
        match (type_operand, expr_operand) {
            (Some(ty), _) => Ok(format!("sizeof({})", self.c_type(ty)?)),
            (None, Some(e)) => {
                let v = self.gen_expression(e)?;
                Ok(format!("sizeof({v})"))
            }
            (None, None) => Err(CodegenError::MissingResolved {
                what: "operand",
                node: "sizeof",
            }),
        }
    }

    // ------------------------------------------------------------------
    // Structs and members
    // ------------------------------------------------------------------

    fn gen_struct_literal(
        &mut self,
        struct_name: &str,
        fields: &[sable_ast::FieldInit],
        struct_type: Option<&Type>,
        _fields_initialized: &[bool],
    ) -> Result<String> {
        let resolved = struct_type.and_then(Type::as_struct);
        let type_name = resolved
            .and_then(|s| s.c_alias.clone())
            .unwrap_or_else(|| struct_name.to_string());

        let mut inits = Vec::new();
        match resolved {
            Some(s) => {
                for field in &s.fields {
                    let c_field = field.c_alias.clone().unwrap_or_else(|| mangle(&field.name));
                    let value = if let Some(init) = fields.iter().find(|f| f.name == field.name) {
                        if field.ty.is_handle_type() {
                            self.gen_handle(&init.value)?
                        } else {
                            self.gen_expression(&init.value)?
                        }
                    } else if let Some(default) = &field.default_value {
                        if field.ty.is_handle_type() {
                            self.gen_handle(default)?
                        } else {
                            self.gen_expression(default)?
                        }
                    } else {
                        self.default_value(&field.ty).to_string()
                    };
                    inits.push(format!(".{c_field} = {value}"));
                }
            }
            None => {
                for init in fields {
                    let value = self.gen_expression(&init.value)?;
                    inits.push(format!(".{} = {value}", mangle(&init.name)));
                }
            }
        }

        let body = format!("{{ {} }}", inits.join(", "));
        // Inside an array compound literal the outer cast is omitted; the
        // array element type already establishes it, and strict compilers
        // reject the nested cast.
        if self.in_array_compound_literal {
            Ok(body)
        } else {
            Ok(format!("({type_name}){body}"))
        }
    }

    fn member_struct<'t>(&self, object_ty: &'t Type) -> Option<(&'t sable_ast::StructType, bool)> {
        match object_ty {
            Type::Struct(s) => Some((s, false)),
            Type::Pointer(inner) => match inner.as_ref() {
                Type::Struct(s) => Some((s, true)),
                _ => None,
            },
            _ => None,
        }
    }

    fn gen_member_access(&mut self, object: &Expr, field: &str) -> Result<String> {
        let obj_ty = self.expr_ty(object)?.clone();
        let Some((s, is_pointer)) = self.member_struct(&obj_ty) else {
            return Err(CodegenError::Unsupported("member access on non-struct".into()));
        };
        let c_field = s
            .field(field)
            .and_then(|f| f.c_alias.clone())
            .unwrap_or_else(|| mangle(field));
        let accessor = if is_pointer { "->" } else { "." };
        let field_ty = s.field(field).map(|f| f.ty.clone());
        let obj = self.gen_expression(object)?;
        let access = format!("{obj}{accessor}{c_field}");

        // Handle-typed fields convert to raw pointers on demand.
        if let Some(field_ty) = field_ty {
            if !self.expr_as_handle && self.current_arena_var.is_some() && field_ty.is_handle_type()
            {
                let arena = self.function_arena().to_string();
                return self.raw_from_handle(&access, &field_ty, &arena, false);
            }
        }
        Ok(access)
    }

    fn gen_member_assign(&mut self, object: &Expr, field: &str, value: &Expr) -> Result<String> {
        let obj_ty = self.expr_ty(object)?.clone();
        let Some((s, is_pointer)) = self.member_struct(&obj_ty) else {
            return Err(CodegenError::Unsupported("member assign on non-struct".into()));
        };
        let c_field = s
            .field(field)
            .and_then(|f| f.c_alias.clone())
            .unwrap_or_else(|| mangle(field));
        let handle_field = s.field(field).is_some_and(|f| f.ty.is_handle_type());
        let accessor = if is_pointer { "->" } else { "." };
        let obj = self.gen_expression(object)?;
        let v = if handle_field {
            self.gen_handle(value)?
        } else {
            self.gen_expression(value)?
        };
        Ok(format!("({obj}{accessor}{c_field} = {v})"))
    }

    fn gen_method_call(
        &mut self,
        object: Option<&Expr>,
        struct_name: Option<&str>,
        method: &str,
        args: &[Expr],
        is_static: bool,
    ) -> Result<String> {
        let (s, method_def, obj_ty) = if let Some(object) = object {
            let obj_ty = self.expr_ty(object)?.clone();
            let Some((s, _)) = self.member_struct(&obj_ty) else {
                return Err(CodegenError::Unsupported("method call on non-struct".into()));
            };
            (s.clone(), s.method(method).cloned(), Some(obj_ty))
        } else {
            let name = struct_name.ok_or(CodegenError::MissingResolved {
                what: "struct name",
                node: "static method call",
            })?;
            let Some(Type::Struct(s)) = self.symbols.lookup(name).map(|sym| sym.ty.clone()) else {
                return Err(CodegenError::UnknownSymbol(name.to_string()));
            };
            let method_def = s.method(method).cloned();
            (s, method_def, None)
        };
        let method_def = method_def.ok_or(CodegenError::MissingResolved {
            what: "method",
            node: "method call",
        })?;

        let c_name = method_def
            .c_alias
            .clone()
            .unwrap_or_else(|| mangle(&format!("{}_{}", s.name, method)));

        let mut lowered_args = Vec::new();
        if !method_def.is_native {
            lowered_args.push(self.arena_var().to_string());
        }
        if !is_static {
            let object = object.ok_or(CodegenError::MissingResolved {
                what: "receiver",
                node: "method call",
            })?;
            let obj = self.gen_expression(object)?;
            let pointer_recv = matches!(obj_ty, Some(Type::Pointer(_)));
            if pointer_recv {
                lowered_args.push(obj);
            } else if method_def.is_native && !s.pass_self_by_ref {
                lowered_args.push(obj);
            } else {
                lowered_args.push(format!("&{obj}"));
            }
        }
        for (i, arg) in args.iter().enumerate() {
            let param_ty = method_def.params.get(i).map(|p| p.ty.clone());
            lowered_args.push(self.gen_argument(arg, param_ty.as_ref(), method_def.is_native)?);
        }
        Ok(format!("{c_name}({})", lowered_args.join(", ")))
    }

    fn gen_static_call(
        &mut self,
        type_name: &str,
        method_name: &str,
        args: &[Expr],
        resolved: Option<&sable_ast::ResolvedMethod>,
    ) -> Result<String> {
        if resolved.is_none() && self.symbols.lookup(type_name).is_none() {
            return Err(CodegenError::MissingResolved {
                what: "method",
                node: "static call",
            });
        }
        self.gen_method_call(None, Some(type_name), method_name, args, true)
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Lower one call argument against the parameter type: handle-typed
    /// parameters receive handles, native callees receive raw pointers,
    /// `any` parameters box.
    pub(crate) fn gen_argument(
        &mut self,
        arg: &Expr,
        param_ty: Option<&Type>,
        native: bool,
    ) -> Result<String> {
        let arg_ty = self.expr_ty(arg)?.clone();
        if let Some(param_ty) = param_ty {
            if *param_ty == Type::Any && arg_ty != Type::Any {
                let v = if arg_ty.is_handle_type() {
                    self.gen_handle(arg)?
                } else {
                    self.gen_expression(arg)?
                };
                return self.box_value(&v, &arg_ty);
            }
            if param_ty.is_handle_type() {
                return if native {
                    self.gen_raw(arg)
                } else {
                    // The callee pins into its own arena: hand it a handle.
                    self.gen_handle(arg)
                };
            }
        } else if arg_ty.is_handle_type() {
            return if native {
                self.gen_raw(arg)
            } else {
                self.gen_handle(arg)
            };
        }
        self.gen_expression(arg)
    }

    fn gen_call(&mut self, expr: &Expr) -> Result<String> {
        let ExprKind::Call { callee, args, .. } = &expr.kind else {
            unreachable!("caller matched Call");
        };

        if let ExprKind::Variable { name } = &callee.kind {
            if let Some(symbol) = self.symbols.lookup(name).cloned() {
                if let Type::Function(f) = &symbol.ty {
                    let param_tys: Vec<Type> = f.params.clone();
                    if symbol.is_native {
                        // Native call: no arena argument, raw-pointer args.
                        let c_name = symbol
                            .c_alias
                            .clone()
                            .unwrap_or_else(|| name.to_string());
                        let mut lowered = Vec::new();
                        for (i, arg) in args.iter().enumerate() {
                            lowered.push(self.gen_argument(arg, param_tys.get(i), true)?);
                        }
                        return Ok(format!("{c_name}({})", lowered.join(", ")));
                    }
                    if symbol.is_function() {
                        let mangled = self.prefixed_name(&symbol, name);
                        let mut lowered = vec![self.arena_var().to_string()];
                        for (i, arg) in args.iter().enumerate() {
                            lowered.push(self.gen_argument(arg, param_tys.get(i), false)?);
                        }
                        return Ok(format!("{mangled}({})", lowered.join(", ")));
                    }
                    // Closure-typed variable: dynamic call.
                    return self.gen_closure_call(callee, f.clone().into(), args);
                }
            }
        }

        // Arbitrary callee expression: must be a closure or native pointer.
        let callee_ty = self.expr_ty(callee)?.clone();
        let Type::Function(f) = callee_ty else {
            return Err(CodegenError::Unsupported("call of non-function value".into()));
        };
        if f.is_native {
            let saved = self.in_callee_position;
            self.in_callee_position = true;
            let target = self.gen_expression(callee)?;
            self.in_callee_position = saved;
            let mut lowered = Vec::new();
            for (i, arg) in args.iter().enumerate() {
                lowered.push(self.gen_argument(arg, f.params.get(i), true)?);
            }
            return Ok(format!("{target}({})", lowered.join(", ")));
        }
        self.gen_closure_call(callee, Box::new(f), args)
    }

    fn gen_closure_call(
        &mut self,
        callee: &Expr,
        f: Box<sable_ast::FunctionType>,
        args: &[Expr],
    ) -> Result<String> {
        let saved = self.in_callee_position;
        self.in_callee_position = true;
        let target = self.gen_expression(callee)?;
        self.in_callee_position = saved;

        let t = self.next_temp();
        let ret_c = self.c_type(&f.return_type)?;
        let mut param_cts = vec!["void *".to_string(), "RtManagedArena *".to_string()];
        for p in &f.params {
            param_cts.push(self.c_type(p)?);
        }
        let mut lowered = vec![format!("__cl{t}__->env"), self.arena_var().to_string()];
        for (i, arg) in args.iter().enumerate() {
            lowered.push(self.gen_argument(arg, f.params.get(i), false)?);
        }
        Ok(format!(
            "(__extension__({{ SbClosure *__cl{t}__ = (SbClosure *){target}; \
             (({ret_c} (*)({}))__cl{t}__->fn)({}); }}))",
            param_cts.join(", "),
            lowered.join(", ")
        ))
    }
}
