//! Lambda hoisting, closure thunks, and thread spawn/sync lowering.

use crate::types::mangle;
use crate::{CodeGen, CodegenError, Result};
use sable_ast::{Expr, ExprKind, FunctionModifier, LambdaBody, LambdaExpr, Type};

impl CodeGen<'_> {
    // ------------------------------------------------------------------
    // Lambdas
    // ------------------------------------------------------------------

    /// Hoist a lambda to a top-level C function and yield the closure
    /// value expression at the capture site.
    pub(crate) fn gen_lambda_expr(&mut self, lambda: &LambdaExpr) -> Result<String> {
        let id = self.lambda_count;
        self.lambda_count += 1;

        if lambda.is_native {
            // Native callback lambdas carry no closure and use the C ABI.
            self.emit_lambda_function(lambda, id, true)?;
            return Ok(format!("__lambda_{id}__"));
        }

        self.emit_closure_struct(lambda, id)?;
        self.emit_lambda_function(lambda, id, false)?;

        // Allocation site: closures that are directly returned must live in
        // the caller's arena; everything else lives locally. Pinned
        // allocations keep the environment pointer stable.
        let arena = if self.allocate_closure_in_caller_arena {
            "__caller_arena__".to_string()
        } else {
            self.arena_var().to_string()
        };
        let t = self.next_temp();
        let mut body = format!(
            "__closure_{id}__ *__env{t}__ = (__closure_{id}__ *)SB_PEEK({arena}, \
             rt_managed_alloc_pinned({arena}, RT_HANDLE_NULL, sizeof(__closure_{id}__))); "
        );
        for capture in &lambda.captures {
            let member = mangle(&capture.name);
            // A lambda capturing the variable it initializes cannot read it
            // yet; the declaration emits a self-fix-up after the store.
            if self.current_decl_var.as_deref() == Some(capture.name.as_str()) {
                self.recursive_lambda_id = Some(id);
                body.push_str(&format!("__env{t}__->{member} = NULL; "));
            } else {
                let value = self.gen_expression(&Expr::typed(
                    ExprKind::Variable {
                        name: capture.name.clone(),
                    },
                    capture.ty.clone(),
                ))?;
                body.push_str(&format!("__env{t}__->{member} = {value}; "));
            }
        }
        body.push_str(&format!(
            "SbClosure *__fn{t}__ = (SbClosure *)SB_PEEK({arena}, \
             rt_managed_alloc_pinned({arena}, RT_HANDLE_NULL, sizeof(SbClosure))); \
             __fn{t}__->fn = (void *)__lambda_{id}__; __fn{t}__->env = __env{t}__; __fn{t}__;"
        ));
        Ok(format!("(__extension__({{ {body} }}))"))
    }

    fn emit_closure_struct(&mut self, lambda: &LambdaExpr, id: usize) -> Result<()> {
        let mut decl = format!("typedef struct __closure_{id}__ {{\n");
        for capture in &lambda.captures {
            let ctype = self.c_type(&capture.ty)?;
            decl.push_str(&format!("    {ctype} {};\n", mangle(&capture.name)));
        }
        decl.push_str(&format!("}} __closure_{id}__;\n"));
        self.lambda_forward_decls.push_str(&decl);
        Ok(())
    }

    fn emit_lambda_function(&mut self, lambda: &LambdaExpr, id: usize, native: bool) -> Result<()> {
        let ret = self.c_type(&lambda.return_type)?;
        let mut params = Vec::new();
        if !native {
            params.push("void *__env__".to_string());
            params.push("RtManagedArena *__caller_arena__".to_string());
        }
        for p in &lambda.params {
            let ctype = if native {
                self.c_native_param_type(&p.ty)?
            } else {
                self.c_type(&p.ty)?
            };
            params.push(format!("{ctype} {}", mangle(&p.name)));
        }
        let signature = format!(
            "static {ret} __lambda_{id}__({})",
            if params.is_empty() {
                "void".to_string()
            } else {
                params.join(", ")
            }
        );
        self.lambda_forward_decls.push_str(&format!("{signature};\n"));

        // Generate the body with the lambda's own arena context, then
        // append to the hoisted-definitions stream.
        let saved_out = std::mem::take(&mut self.out);
        let saved_cur = self.current_arena_var.clone();
        let saved_fn_arena = self.function_arena_var.clone();
        let saved_ret = self.current_return_type.clone();
        let saved_mod = self.current_func_modifier;
        let saved_tail = self.in_tail_call_function;
        self.in_tail_call_function = false;
        self.enclosing_lambdas.push(lambda.clone());

        self.out.push_str(&signature);
        self.out.push_str(" {\n");
        if !native {
            if !lambda.captures.is_empty() {
                self.out.push_str(&format!(
                    "    __closure_{id}__ *__cl__ = (__closure_{id}__ *)__env__;\n"
                ));
            } else {
                self.out.push_str("    (void)__env__;\n");
            }
            match lambda.modifier {
                FunctionModifier::Shared => {
                    self.out
                        .push_str("    RtManagedArena *__local_arena__ = __caller_arena__;\n");
                }
                _ => {
                    self.out.push_str(
                        "    RtManagedArena *__local_arena__ = rt_managed_arena_create_child(__caller_arena__);\n",
                    );
                }
            }
            self.current_arena_var = Some("__local_arena__".to_string());
            self.function_arena_var = Some("__local_arena__".to_string());
        } else {
            self.current_arena_var = None;
            self.function_arena_var = None;
        }
        self.current_return_type = Some(lambda.return_type.clone());
        self.current_func_modifier = lambda.modifier;

        match &lambda.body {
            LambdaBody::Expr(body) => {
                let destroys = !native && lambda.modifier != FunctionModifier::Shared;
                if lambda.return_type == Type::Void {
                    let v = self.gen_expression(body)?;
                    self.out.push_str(&format!("    {v};\n"));
                    if destroys {
                        self.out
                            .push_str("    rt_managed_arena_destroy_child(__local_arena__);\n");
                    }
                } else if lambda.return_type.is_handle_type() && !native {
                    let v = self.gen_handle(body)?;
                    self.out.push_str(&format!("    RtHandle __ret__ = {v};\n"));
                    if destroys {
                        self.out.push_str(
                            "    __ret__ = rt_managed_promote(__caller_arena__, __local_arena__, __ret__);\n",
                        );
                        self.out
                            .push_str("    rt_managed_arena_destroy_child(__local_arena__);\n");
                    }
                    self.out.push_str("    return __ret__;\n");
                } else {
                    let ctype = self.c_type(&lambda.return_type)?;
                    let v = self.gen_expression(body)?;
                    self.out.push_str(&format!("    {ctype} __ret__ = {v};\n"));
                    if destroys {
                        self.out
                            .push_str("    rt_managed_arena_destroy_child(__local_arena__);\n");
                    }
                    self.out.push_str("    return __ret__;\n");
                }
            }
            LambdaBody::Stmts(stmts) => {
                for stmt in stmts {
                    self.gen_statement(stmt, 1)?;
                }
                if lambda.return_type == Type::Void
                    && !native
                    && lambda.modifier != FunctionModifier::Shared
                {
                    self.out
                        .push_str("    rt_managed_arena_destroy_child(__local_arena__);\n");
                }
            }
        }
        self.out.push_str("}\n\n");

        let generated = std::mem::replace(&mut self.out, saved_out);
        self.lambda_definitions.push_str(&generated);

        self.enclosing_lambdas.pop();
        self.current_arena_var = saved_cur;
        self.function_arena_var = saved_fn_arena;
        self.current_return_type = saved_ret;
        self.current_func_modifier = saved_mod;
        self.in_tail_call_function = saved_tail;
        Ok(())
    }

    /// Wrap a named function in a closure so it can flow where closures
    /// are expected.
    pub(crate) fn gen_function_thunk(
        &mut self,
        mangled: &str,
        f: &sable_ast::FunctionType,
    ) -> Result<String> {
        let id = self.thunk_count;
        self.thunk_count += 1;

        let ret = self.c_type(&f.return_type)?;
        let mut params = vec!["void *__env__".to_string(), "RtManagedArena *__arena__".to_string()];
        let mut forward = Vec::new();
        for (i, p) in f.params.iter().enumerate() {
            let ctype = self.c_type(p)?;
            params.push(format!("{ctype} __a{i}__"));
            forward.push(format!("__a{i}__"));
        }
        let signature = format!("static {ret} __thunk_{id}__({})", params.join(", "));
        self.lambda_forward_decls.push_str(&format!("{signature};\n"));

        let call = format!("{mangled}(__arena__{})", {
            let rest = forward.join(", ");
            if rest.is_empty() {
                String::new()
            } else {
                format!(", {rest}")
            }
        });
        let body = if *f.return_type == Type::Void {
            format!("{signature} {{\n    (void)__env__;\n    {call};\n}}\n\n")
        } else {
            format!("{signature} {{\n    (void)__env__;\n    return {call};\n}}\n\n")
        };
        self.lambda_definitions.push_str(&body);

        let arena = self.arena_var().to_string();
        let t = self.next_temp();
        Ok(format!(
            "(__extension__({{ SbClosure *__fn{t}__ = (SbClosure *)SB_PEEK({arena}, \
             rt_managed_alloc_pinned({arena}, RT_HANDLE_NULL, sizeof(SbClosure))); \
             __fn{t}__->fn = (void *)__thunk_{id}__; __fn{t}__->env = NULL; __fn{t}__; }}))"
        ))
    }

    // ------------------------------------------------------------------
    // Threads
    // ------------------------------------------------------------------

    /// Lower a thread spawn: a context struct (header + result + args), a
    /// wrapper function running the user call, and a `pthread_create` at
    /// the spawn site. The expression value is the context pointer.
    pub(crate) fn gen_thread_spawn(
        &mut self,
        call: &Expr,
        modifier: FunctionModifier,
    ) -> Result<String> {
        let ExprKind::Call { callee, args, .. } = &call.kind else {
            return Err(CodegenError::Unsupported("thread spawn of non-call".into()));
        };
        let ExprKind::Variable { name } = &callee.kind else {
            return Err(CodegenError::Unsupported(
                "thread spawn of dynamic callee".into(),
            ));
        };
        let symbol = self
            .symbols
            .lookup(name)
            .cloned()
            .ok_or_else(|| CodegenError::UnknownSymbol(name.clone()))?;
        let Type::Function(fn_ty) = &symbol.ty else {
            return Err(CodegenError::Unsupported("thread spawn of non-function".into()));
        };
        let result_ty = self.expr_ty(call)?.clone();
        let fn_name = self.prefixed_name(&symbol, name);

        let id = self.thread_wrapper_count;
        self.thread_wrapper_count += 1;

        // Context struct: common header first so sync can address the
        // panic flag and arena without knowing the argument layout.
        let mut ctx = format!("typedef struct __thread_ctx_{id}__ {{\n    SbThreadCtxHeader hdr;\n");
        if result_ty != Type::Void {
            let ret_c = self.c_type(&result_ty)?;
            ctx.push_str(&format!("    {ret_c} value;\n"));
        }
        for (i, p) in fn_ty.params.iter().enumerate() {
            let ctype = self.c_type(p)?;
            ctx.push_str(&format!("    {ctype} arg{i};\n"));
        }
        ctx.push_str(&format!("}} __thread_ctx_{id}__;\n"));
        self.lambda_forward_decls.push_str(&ctx);

        // Wrapper: record panics into the header, run the call, store the
        // result.
        let mut wrapper = format!(
            "static void *__thread_wrapper_{id}__(void *__arg__) {{\n    \
             __thread_ctx_{id}__ *__ctx__ = (__thread_ctx_{id}__ *)__arg__;\n    \
             rt_thread_panic_guard(&__ctx__->hdr.has_panic, __ctx__->hdr.panic_msg, \
             sizeof __ctx__->hdr.panic_msg);\n"
        );
        let mut call_args = vec!["__ctx__->hdr.arena".to_string()];
        for i in 0..fn_ty.params.len() {
            call_args.push(format!("__ctx__->arg{i}"));
        }
        let invoke = format!("{fn_name}({})", call_args.join(", "));
        if result_ty == Type::Void {
            wrapper.push_str(&format!("    {invoke};\n"));
        } else {
            wrapper.push_str(&format!("    __ctx__->value = {invoke};\n"));
        }
        wrapper.push_str("    return NULL;\n}\n\n");
        self.lambda_definitions.push_str(&wrapper);

        // Spawn site. Shared threads run in the spawner's arena; private
        // (and default) threads own a fresh root so their transients never
        // touch the spawner's blocks.
        let arena = self.arena_var().to_string();
        let (thread_arena, owns) = match modifier {
            FunctionModifier::Shared => (arena.clone(), "0"),
            _ => ("rt_managed_arena_create()".to_string(), "1"),
        };
        let t = self.next_temp();
        let mut site = format!(
            "__thread_ctx_{id}__ *__ctx{t}__ = (__thread_ctx_{id}__ *)SB_PEEK({arena}, \
             rt_managed_alloc_pinned({arena}, RT_HANDLE_NULL, sizeof(__thread_ctx_{id}__))); \
             __ctx{t}__->hdr.arena = {thread_arena}; __ctx{t}__->hdr.owns_arena = {owns}; \
             __ctx{t}__->hdr.has_panic = 0; "
        );
        for (i, arg) in args.iter().enumerate() {
            let v = self.gen_argument(arg, fn_ty.params.get(i), false)?;
            site.push_str(&format!("__ctx{t}__->arg{i} = {v}; "));
        }
        site.push_str(&format!(
            "pthread_create(&__ctx{t}__->tid, NULL, __thread_wrapper_{id}__, __ctx{t}__); \
             (void *)__ctx{t}__;"
        ));
        Ok(format!("(__extension__({{ {site} }}))"))
    }

    /// Lower a thread sync: join, re-raise a stored panic, pull the result
    /// out (cloning handle-typed results into the awaiting arena), and
    /// tear down a privately owned thread arena.
    pub(crate) fn gen_thread_sync(&mut self, expr: &Expr, handle: &Expr) -> Result<String> {
        let result_ty = self.expr_ty(expr)?.clone();
        if matches!(handle.kind, ExprKind::SyncList { .. }) {
            return self.gen_sync_list_join(handle);
        }

        let arena = self.arena_var().to_string();
        let h = self.gen_expression(handle)?;
        let t = self.next_temp();

        let mut body = format!(
            "SbThreadCtxHeader *__hdr{t}__ = (SbThreadCtxHeader *)({h}); \
             pthread_join(__hdr{t}__->tid, NULL); \
             if (__hdr{t}__->has_panic) rt_panic(__hdr{t}__->panic_msg); "
        );
        let result = if result_ty == Type::Void {
            "(void)0".to_string()
        } else {
            let ret_c = self.c_type(&result_ty)?;
            body.push_str(&format!(
                "{ret_c} __val{t}__ = *({ret_c} *)((char *)__hdr{t}__ + sizeof(SbThreadCtxHeader)); "
            ));
            if result_ty.is_handle_type() {
                // Worker-arena handles are meaningless here: clone into the
                // awaiting arena before the worker arena dies.
                body.push_str(&format!(
                    "__val{t}__ = rt_managed_clone({arena}, __hdr{t}__->arena, __val{t}__); "
                ));
            }
            format!("__val{t}__")
        };
        body.push_str(&format!(
            "if (__hdr{t}__->owns_arena) rt_managed_arena_destroy(__hdr{t}__->arena); {result};"
        ));
        Ok(format!("(__extension__({{ {body} }}))"))
    }

    fn gen_sync_list_join(&mut self, list: &Expr) -> Result<String> {
        let ExprKind::SyncList { elements } = &list.kind else {
            return Err(CodegenError::Unsupported("sync of non-list".into()));
        };
        let mut body = String::new();
        for element in elements {
            let h = self.gen_expression(element)?;
            let t = self.next_temp();
            body.push_str(&format!(
                "{{ SbThreadCtxHeader *__hdr{t}__ = (SbThreadCtxHeader *)({h}); \
                 pthread_join(__hdr{t}__->tid, NULL); \
                 if (__hdr{t}__->has_panic) rt_panic(__hdr{t}__->panic_msg); \
                 if (__hdr{t}__->owns_arena) rt_managed_arena_destroy(__hdr{t}__->arena); }} "
            ));
        }
        body.push_str("(void)0;");
        Ok(format!("(__extension__({{ {body} }}))"))
    }

    /// A bare sync list evaluates to itself only inside a thread sync; any
    /// other position is a bug upstream.
    pub(crate) fn gen_sync_list(&mut self, _elements: &[Expr]) -> Result<String> {
        Err(CodegenError::Unsupported(
            "sync list outside a thread sync".into(),
        ))
    }
}
