//! Statement lowering, function generation, and the emission phases.

use crate::types::mangle;
use crate::{CodeGen, CodegenError, Result, ScopeArena};
use sable_ast::{
    BlockModifier, Expr, ExprKind, FunctionModifier, FunctionStmt, LiteralValue, Module, Stmt,
    StructDeclStmt, SyncModifier, Type, VarDeclStmt,
};
use tracing::trace;

impl CodeGen<'_> {
    fn line(&mut self, indent: usize, text: &str) {
        for _ in 0..indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    // ------------------------------------------------------------------
    // Preamble and module-level phases
    // ------------------------------------------------------------------

    pub(crate) fn emit_preamble(&mut self, filename: &str) {
        let top = &mut self.top;
        top.push_str(&format!("/* Generated by sablec from {filename} */\n"));
        top.push_str("#include <stdint.h>\n");
        top.push_str("#include <stdbool.h>\n");
        top.push_str("#include <stddef.h>\n");
        top.push_str("#include <string.h>\n");
        top.push_str("#include <pthread.h>\n");
        top.push_str("#include <sable_runtime.h>\n");
        let includes = self.pragma_includes.clone();
        for include in &includes {
            let formatted = if include.starts_with('<') {
                format!("#include {include}\n")
            } else {
                format!("#include \"{include}\"\n")
            };
            if !self.top.contains(&formatted) {
                self.top.push_str(&formatted);
            }
        }
        let links = self.pragma_links.clone();
        for link in &links {
            self.top.push_str(&format!("/* sable-link: {link} */\n"));
        }
        let sources = self.pragma_sources.clone();
        for (source, dir) in &sources {
            self.top
                .push_str(&format!("/* sable-source: {source} ({dir}) */\n"));
        }
        self.top.push('\n');
        // Raw-pointer extraction under the epoch contract: the pointer is
        // valid until the owning arena's next compaction pass.
        self.top.push_str(
            "#define SB_PEEK(arena, h) (__extension__({ \\\n\
             \x20   RtManagedArena *__sb_a__ = (arena); RtHandle __sb_h__ = (h); \\\n\
             \x20   void *__sb_p__ = rt_managed_pin(__sb_a__, __sb_h__); \\\n\
             \x20   rt_managed_unpin(__sb_a__, __sb_h__); __sb_p__; }))\n",
        );
        self.top.push_str(
            "#define SB_PEEK_ANY(root, h) (__extension__({ \\\n\
             \x20   RtManagedArena *__sb_a__ = (root); RtHandle __sb_h__ = (h); \\\n\
             \x20   void *__sb_p__ = rt_managed_pin_any(__sb_a__, __sb_h__); \\\n\
             \x20   rt_managed_unpin_any(__sb_a__, __sb_h__); __sb_p__; }))\n\n",
        );
        self.top
            .push_str("typedef struct { void *fn; void *env; } SbClosure;\n");
        self.top.push_str(
            "typedef struct { pthread_t tid; RtManagedArena *arena; int owns_arena; \
             int has_panic; char panic_msg[256]; } SbThreadCtxHeader;\n\n",
        );
    }

    pub(crate) fn emit_type_declarations(&mut self, module: &Module) -> Result<()> {
        for stmt in &module.statements {
            match stmt {
                Stmt::StructDecl(decl) => self.emit_struct_typedef(decl)?,
                Stmt::TypeDecl { name, ty } => match ty {
                    // Opaque aliases name types the pragma includes supply.
                    Type::Opaque(_) => {}
                    other => {
                        let ctype = self.c_type(other)?;
                        self.top.push_str(&format!("typedef {ctype} {name};\n"));
                    }
                },
                _ => {}
            }
        }
        // Forward declarations so definition order never matters.
        for f in module.functions() {
            if f.is_native {
                continue;
            }
            let sig = self.function_signature(f, None)?;
            self.top.push_str(&format!("{sig};\n"));
        }
        self.top.push('\n');
        Ok(())
    }

    fn emit_struct_typedef(&mut self, decl: &StructDeclStmt) -> Result<()> {
        // Native structs with an alias refer to a type the included C
        // headers already define.
        if decl.is_native && decl.c_alias.is_some() {
            return Ok(());
        }
        let name = decl.c_alias.clone().unwrap_or_else(|| decl.name.clone());
        let mut body = String::new();
        if decl.is_packed {
            body.push_str("#pragma pack(push, 1)\n");
        }
        body.push_str(&format!("typedef struct {name} {{\n"));
        for field in &decl.fields {
            let ctype = self.c_type(&field.ty)?;
            let c_field = field.c_alias.clone().unwrap_or_else(|| mangle(&field.name));
            body.push_str(&format!(
                "    {};\n",
                crate::types::declare(&ctype, &c_field)
            ));
        }
        body.push_str(&format!("}} {name};\n"));
        if decl.is_packed {
            body.push_str("#pragma pack(pop)\n");
        }
        self.top.push_str(&body);
        Ok(())
    }

    pub(crate) fn emit_globals(&mut self, module: &Module) -> Result<()> {
        for stmt in &module.statements {
            if let Stmt::VarDecl(decl) = stmt {
                let ctype = self.c_type(&decl.ty)?;
                let mangled = mangle(&decl.name);
                let init = self.default_value(&decl.ty);
                self.top.push_str(&format!("{ctype} {mangled} = {init};\n"));
                if decl.sync_modifier == SyncModifier::Atomic {
                    self.top
                        .push_str(&format!("char {mangled}__lock__ = 0;\n"));
                }
            }
        }
        self.top.push('\n');
        Ok(())
    }

    pub(crate) fn emit_functions(&mut self, module: &Module) -> Result<()> {
        for stmt in &module.statements {
            match stmt {
                Stmt::Function(f) if !f.is_native => self.gen_function(f, None)?,
                Stmt::StructDecl(decl) => {
                    for method in &decl.methods {
                        if method.is_native {
                            continue;
                        }
                        let Some(body) = &method.body else { continue };
                        let as_fn = FunctionStmt {
                            name: format!("{}_{}", decl.name, method.name),
                            params: method.params.clone(),
                            return_type: method.return_type.clone(),
                            body: body.clone(),
                            modifier: method.modifier,
                            is_native: false,
                            is_variadic: false,
                            c_alias: method.c_alias.clone(),
                        };
                        let self_param = if method.is_static {
                            None
                        } else {
                            Some(decl.c_alias.clone().unwrap_or_else(|| decl.name.clone()))
                        };
                        self.gen_function(&as_fn, self_param.as_deref())?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub(crate) fn emit_entry_point(&mut self, module: &Module) -> Result<()> {
        self.current_arena_var = Some("__main_arena__".to_string());
        self.function_arena_var = Some("__main_arena__".to_string());

        let mut body = String::new();
        body.push_str("int main(int argc, char **argv) {\n");
        body.push_str("    (void)argc; (void)argv;\n");
        body.push_str("    RtManagedArena *__main_arena__ = rt_managed_arena_create();\n");

        // Module-level declarations run before user main.
        for stmt in &module.statements {
            if let Stmt::VarDecl(decl) = stmt {
                if let Some(init) = &decl.initializer {
                    let mangled = mangle(&decl.name);
                    let v = if decl.ty.is_handle_type() {
                        self.gen_handle(init)?
                    } else {
                        self.gen_expression(init)?
                    };
                    body.push_str(&format!("    {mangled} = {v};\n"));
                }
            }
        }

        let user_main = module.functions().find(|f| f.name == "main" && !f.is_native);
        match user_main {
            Some(f) if f.return_type != Type::Void => {
                let ctype = self.c_type(&f.return_type)?;
                body.push_str(&format!(
                    "    {ctype} __code__ = sb_main(__main_arena__);\n"
                ));
                body.push_str("    rt_managed_arena_destroy(__main_arena__);\n");
                body.push_str("    return (int)__code__;\n");
            }
            Some(_) => {
                body.push_str("    sb_main(__main_arena__);\n");
                body.push_str("    rt_managed_arena_destroy(__main_arena__);\n");
                body.push_str("    return 0;\n");
            }
            None => {
                body.push_str("    rt_managed_arena_destroy(__main_arena__);\n");
                body.push_str("    return 0;\n");
            }
        }
        body.push_str("}\n");
        self.main_body = body;

        self.current_arena_var = None;
        self.function_arena_var = None;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    fn function_signature(&mut self, f: &FunctionStmt, self_type: Option<&str>) -> Result<String> {
        let ret = self.c_type(&f.return_type)?;
        let mut params = vec!["RtManagedArena *__caller_arena__".to_string()];
        if let Some(self_type) = self_type {
            params.push(format!("{self_type} *sb_self"));
        }
        for p in &f.params {
            let ctype = self.c_type(&p.ty)?;
            let mangled = mangle(&p.name);
            if p.mem_qualifier == sable_ast::MemoryQualifier::AsRef {
                params.push(format!("{ctype} *{mangled}"));
            } else {
                params.push(crate::types::declare(&ctype, &mangled));
            }
        }
        let name = f.c_alias.clone().unwrap_or_else(|| mangle(&f.name));
        Ok(crate::types::declare(
            &ret,
            &format!("{name}({})", params.join(", ")),
        ))
    }

    fn gen_function(&mut self, f: &FunctionStmt, self_type: Option<&str>) -> Result<()> {
        trace!(function = %f.name, "generating function");
        let saved_out = std::mem::take(&mut self.out);
        let saved_fn = self.current_function.take();
        let saved_ret = self.current_return_type.take();
        let saved_mod = self.current_func_modifier;
        let saved_cur = self.current_arena_var.take();
        let saved_fnar = self.function_arena_var.take();
        let saved_cleanup = std::mem::take(&mut self.cleanup_stack);
        let saved_tail = self.in_tail_call_function;
        let saved_tail_params = std::mem::take(&mut self.tail_call_params);
        let saved_depth = self.arena_depth;
        let saved_private = self.in_private_context;
        let saved_shared = self.in_shared_context;

        self.current_function = Some(f.name.clone());
        self.current_return_type = Some(f.return_type.clone());
        self.current_func_modifier = f.modifier;
        self.arena_depth += 1;

        let has_tail_calls = body_has_marked_tail_calls(&f.body);
        self.in_tail_call_function = has_tail_calls;
        self.tail_call_params = f.params.clone();

        let sig = self.function_signature(f, self_type)?;
        self.line(0, &format!("{sig} {{"));

        match f.modifier {
            FunctionModifier::Shared => {
                // Shared functions allocate straight into the caller's arena.
                self.line(1, "RtManagedArena *__local_arena__ = __caller_arena__;");
                self.in_shared_context = true;
            }
            FunctionModifier::Private => {
                self.line(
                    1,
                    "RtManagedArena *__local_arena__ = rt_managed_arena_create_child(__caller_arena__);",
                );
                self.in_private_context = true;
            }
            FunctionModifier::Default => {
                self.line(
                    1,
                    "RtManagedArena *__local_arena__ = rt_managed_arena_create_child(__caller_arena__);",
                );
            }
        }
        self.current_arena_var = Some("__local_arena__".to_string());
        self.function_arena_var = Some("__local_arena__".to_string());

        if has_tail_calls {
            self.line(0, "__tail_start__:;");
        }

        trace!(
            function = self.current_function.as_deref().unwrap_or(""),
            depth = self.arena_depth,
            shared = self.in_shared_context,
            private = self.in_private_context,
            "function arena context"
        );
        for stmt in &f.body {
            self.gen_statement(stmt, 1)?;
        }

        // Fall-through epilogue for void control paths.
        if f.return_type == Type::Void {
            if f.modifier != FunctionModifier::Shared {
                self.line(1, "rt_managed_arena_destroy_child(__local_arena__);");
            }
        } else if !f.body.last().is_some_and(stmt_always_returns) {
            // Non-void function whose body can fall off the end: return the
            // zero value after tearing the arena down.
            if f.modifier != FunctionModifier::Shared {
                self.line(1, "rt_managed_arena_destroy_child(__local_arena__);");
            }
            let zero = self.default_value(&f.return_type).to_string();
            if matches!(f.return_type, Type::Struct(_)) {
                let ctype = self.c_type(&f.return_type)?;
                self.line(1, &format!("return ({ctype}){zero};"));
            } else {
                self.line(1, &format!("return {zero};"));
            }
        }
        self.line(0, "}");
        self.line(0, "");

        let generated = std::mem::replace(&mut self.out, saved_out);
        self.function_definitions.push_str(&generated);

        self.current_function = saved_fn;
        self.current_return_type = saved_ret;
        self.current_func_modifier = saved_mod;
        self.current_arena_var = saved_cur;
        self.function_arena_var = saved_fnar;
        self.cleanup_stack = saved_cleanup;
        self.in_tail_call_function = saved_tail;
        self.tail_call_params = saved_tail_params;
        self.arena_depth = saved_depth;
        self.in_private_context = saved_private;
        self.in_shared_context = saved_shared;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    pub(crate) fn gen_statement(&mut self, stmt: &Stmt, indent: usize) -> Result<()> {
        match stmt {
            Stmt::Expression { expr } => {
                let lowered = self.gen_expression(expr)?;
                self.line(indent, &format!("{lowered};"));
                Ok(())
            }
            Stmt::VarDecl(decl) => self.gen_var_decl(decl, indent),
            Stmt::Return { value } => self.gen_return(value.as_ref(), indent),
            Stmt::Block {
                statements,
                modifier,
            } => self.gen_block(statements, *modifier, indent),
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let cond = self.gen_expression(condition)?;
                self.line(indent, &format!("if ({cond}) {{"));
                self.gen_statement_body(then_branch, indent + 1)?;
                match else_branch {
                    Some(else_branch) => {
                        self.line(indent, "} else {");
                        self.gen_statement_body(else_branch, indent + 1)?;
                        self.line(indent, "}");
                    }
                    None => self.line(indent, "}"),
                }
                Ok(())
            }
            Stmt::While {
                condition,
                body,
                is_shared,
            } => self.gen_while(condition, body, *is_shared, indent),
            Stmt::For {
                initializer,
                condition,
                increment,
                body,
                is_shared,
            } => self.gen_for(
                initializer.as_deref(),
                condition.as_ref(),
                increment.as_ref(),
                body,
                *is_shared,
                indent,
            ),
            Stmt::ForEach {
                var_name,
                iterable,
                body,
                is_shared,
            } => self.gen_for_each(var_name, iterable, body, *is_shared, indent),
            Stmt::Break => {
                self.emit_scope_unwind(indent, true);
                self.line(indent, "break;");
                Ok(())
            }
            Stmt::Continue => {
                self.emit_scope_unwind(indent, true);
                self.line(indent, "continue;");
                Ok(())
            }
            Stmt::Import {
                module, namespace, ..
            } => {
                let ns = namespace.as_deref().unwrap_or("-");
                self.line(indent, &format!("/* import {module} as {ns} */"));
                Ok(())
            }
            Stmt::Pragma { .. } => Ok(()), // collected before emission
            Stmt::TypeDecl { .. } | Stmt::StructDecl(_) => Ok(()), // lowered at module level
            Stmt::Lock { lock_expr, body } => self.gen_lock(lock_expr, body, indent),
            Stmt::Function(_) => Err(CodegenError::Unsupported(
                "nested function definition".into(),
            )),
        }
    }

    /// A statement used as a control-flow body: blocks inline their
    /// statements, anything else emits as a single statement.
    fn gen_statement_body(&mut self, stmt: &Stmt, indent: usize) -> Result<()> {
        match stmt {
            Stmt::Block {
                statements,
                modifier: BlockModifier::Default,
            } => {
                for stmt in statements {
                    self.gen_statement(stmt, indent)?;
                }
                Ok(())
            }
            other => self.gen_statement(other, indent),
        }
    }

    fn gen_var_decl(&mut self, decl: &VarDeclStmt, indent: usize) -> Result<()> {
        // Thread handles hold a context pointer until the sync point, not
        // the declared result type.
        let ctype = if matches!(
            decl.initializer.as_ref().map(|e| &e.kind),
            Some(ExprKind::ThreadSpawn { .. })
        ) {
            "void *".to_string()
        } else {
            self.c_type(&decl.ty)?
        };
        let mangled = mangle(&decl.name);

        self.current_decl_var = Some(decl.name.clone());
        self.recursive_lambda_id = None;
        let init = match &decl.initializer {
            Some(init) => {
                if decl.ty.is_handle_type() {
                    self.gen_handle(init)?
                } else if decl.ty == Type::Any {
                    let init_ty = self.expr_ty(init)?.clone();
                    if init_ty != Type::Any {
                        let v = if init_ty.is_handle_type() {
                            self.gen_handle(init)?
                        } else {
                            self.gen_expression(init)?
                        };
                        self.box_value(&v, &init_ty)?
                    } else {
                        self.gen_expression(init)?
                    }
                } else {
                    self.gen_expression(init)?
                }
            }
            None => {
                let zero = self.default_value(&decl.ty).to_string();
                if matches!(decl.ty, Type::Struct(_)) {
                    format!("({ctype}){zero}")
                } else {
                    zero
                }
            }
        };
        let fix_up = self.recursive_lambda_id.take();
        self.current_decl_var = None;

        if decl.mem_qualifier == sable_ast::MemoryQualifier::AsRef && decl.ty.is_primitive() {
            // `as ref` primitives live in the arena so their address can
            // outlive the C stack frame.
            let arena = self.arena_var().to_string();
            let t = self.next_temp();
            self.line(
                indent,
                &format!(
                    "{ctype} *{mangled} = ({ctype} *)SB_PEEK({arena}, \
                     rt_managed_alloc_pinned({arena}, RT_HANDLE_NULL, sizeof({ctype})));"
                ),
            );
            self.line(indent, &format!("{ctype} __init{t}__ = {init};"));
            self.line(indent, &format!("*{mangled} = __init{t}__;"));
        } else {
            self.line(indent, &format!("{ctype} {mangled} = {init};"));
        }
        if decl.sync_modifier == SyncModifier::Atomic {
            self.line(indent, &format!("char {mangled}__lock__ = 0;"));
        }
        if let Some(id) = fix_up {
            // The lambda captured the variable it initializes: patch the
            // closure environment now that the storage exists.
            self.line(
                indent,
                &format!(
                    "((__closure_{id}__ *)((SbClosure *){mangled})->env)->{mangled} = {mangled};"
                ),
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Returns
    // ------------------------------------------------------------------

    /// Destroy loop and private-block arenas on an early exit. With
    /// `stop_at_loop`, unwinding stops after the innermost loop arena
    /// (break/continue); otherwise the whole stack unwinds (return).
    fn emit_scope_unwind(&mut self, indent: usize, stop_at_loop: bool) {
        let stack = self.cleanup_stack.clone();
        for entry in stack.iter().rev() {
            match entry {
                ScopeArena::Loop(var) => {
                    self.line(indent, &format!("rt_managed_arena_destroy_child({var});"));
                    if stop_at_loop {
                        return;
                    }
                }
                ScopeArena::Private(var) => {
                    self.line(indent, &format!("rt_managed_arena_destroy_child({var});"));
                }
            }
        }
    }

    fn gen_return(&mut self, value: Option<&Expr>, indent: usize) -> Result<()> {
        // Tail-call-marked self calls overwrite the parameters and jump
        // back to the top of the function.
        if self.in_tail_call_function {
            if let Some(Expr {
                kind:
                    ExprKind::Call {
                        args,
                        is_tail_call: true,
                        ..
                    },
                ..
            }) = value
            {
                let params = self.tail_call_params.clone();
                self.line(indent, "{");
                let mut temps = Vec::new();
                for (param, arg) in params.iter().zip(args.iter()) {
                    let ctype = self.c_type(&param.ty)?;
                    let t = self.next_temp();
                    let v = if param.ty.is_handle_type() {
                        self.gen_handle(arg)?
                    } else {
                        self.gen_expression(arg)?
                    };
                    // A temporary per parameter: the argument expressions
                    // may read the parameters being overwritten.
                    self.line(indent + 1, &format!("{ctype} __tc{t}__ = {v};"));
                    temps.push((mangle(&param.name), t));
                }
                for (name, t) in temps {
                    self.line(indent + 1, &format!("{name} = __tc{t}__;"));
                }
                self.emit_scope_unwind(indent + 1, false);
                self.line(indent + 1, "goto __tail_start__;");
                self.line(indent, "}");
                return Ok(());
            }
        }

        let ret_ty = self.current_return_type.clone().unwrap_or(Type::Void);
        let shared = self.current_func_modifier == FunctionModifier::Shared;
        let t = self.next_temp();

        match (&ret_ty, value) {
            (Type::Void, _) | (_, None) => {
                self.emit_scope_unwind(indent, false);
                if !shared {
                    self.line(indent, "rt_managed_arena_destroy_child(__local_arena__);");
                }
                self.line(indent, "return;");
            }
            (ty, Some(value)) if ty.is_handle_type() => {
                let v = self.gen_handle(value)?;
                self.line(indent, &format!("RtHandle __ret{t}__ = {v};"));
                if !shared {
                    // The result must outlive this function's arena.
                    self.line(
                        indent,
                        &format!(
                            "__ret{t}__ = rt_managed_promote(__caller_arena__, __local_arena__, __ret{t}__);"
                        ),
                    );
                }
                self.emit_scope_unwind(indent, false);
                if !shared {
                    self.line(indent, "rt_managed_arena_destroy_child(__local_arena__);");
                }
                self.line(indent, &format!("return __ret{t}__;"));
            }
            (Type::Struct(s), Some(value)) => {
                let ctype = self.c_type(&ret_ty)?;
                let v = self.gen_expression(value)?;
                self.line(indent, &format!("{ctype} __ret{t}__ = {v};"));
                if !shared {
                    // Deep-promote: struct results carry their handle
                    // fields into the caller's arena.
                    for field in s.fields.iter().filter(|f| f.ty.is_handle_type()) {
                        let f = field
                            .c_alias
                            .clone()
                            .unwrap_or_else(|| mangle(&field.name));
                        self.line(
                            indent,
                            &format!(
                                "__ret{t}__.{f} = rt_managed_promote(__caller_arena__, __local_arena__, __ret{t}__.{f});"
                            ),
                        );
                    }
                }
                self.emit_scope_unwind(indent, false);
                if !shared {
                    self.line(indent, "rt_managed_arena_destroy_child(__local_arena__);");
                }
                self.line(indent, &format!("return __ret{t}__;"));
            }
            (_, Some(value)) => {
                let ctype = self.c_type(&ret_ty)?;
                // Closures built in a return position must live in the
                // caller's arena: the local one dies before the call ends.
                let returns_lambda = matches!(value.kind, ExprKind::Lambda(_));
                if returns_lambda {
                    self.allocate_closure_in_caller_arena = true;
                }
                let v = self.gen_expression(value)?;
                self.allocate_closure_in_caller_arena = false;
                self.line(indent, &format!("{ctype} __ret{t}__ = {v};"));
                self.emit_scope_unwind(indent, false);
                if !shared {
                    self.line(indent, "rt_managed_arena_destroy_child(__local_arena__);");
                }
                self.line(indent, &format!("return __ret{t}__;"));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    fn gen_block(
        &mut self,
        statements: &[Stmt],
        modifier: BlockModifier,
        indent: usize,
    ) -> Result<()> {
        match modifier {
            BlockModifier::Default => {
                self.line(indent, "{");
                for stmt in statements {
                    self.gen_statement(stmt, indent + 1)?;
                }
                self.line(indent, "}");
            }
            BlockModifier::Shared => {
                // Shared blocks reuse the enclosing arena: no push.
                let saved = self.in_shared_context;
                self.in_shared_context = true;
                self.line(indent, "{");
                for stmt in statements {
                    self.gen_statement(stmt, indent + 1)?;
                }
                self.line(indent, "}");
                self.in_shared_context = saved;
            }
            BlockModifier::Private => {
                let label = self.next_label();
                let var = format!("__private_arena_{label}__");
                let parent = self.arena_var().to_string();
                self.line(indent, "{");
                self.line(
                    indent + 1,
                    &format!("RtManagedArena *{var} = rt_managed_arena_create_child({parent});"),
                );
                let saved_cur = self.current_arena_var.replace(var.clone());
                let saved_private = self.in_private_context;
                self.in_private_context = true;
                self.arena_depth += 1;
                self.cleanup_stack.push(ScopeArena::Private(var.clone()));

                for stmt in statements {
                    self.gen_statement(stmt, indent + 1)?;
                }

                self.cleanup_stack.pop();
                self.arena_depth -= 1;
                self.in_private_context = saved_private;
                self.current_arena_var = saved_cur;
                self.line(indent + 1, &format!("rt_managed_arena_destroy_child({var});"));
                self.line(indent, "}");
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Loops
    // ------------------------------------------------------------------

    /// Emit a loop body wrapped in a per-iteration arena unless the loop is
    /// `shared`. The arena is destroyed at the bottom of each iteration;
    /// break and continue destroy it through the cleanup stack.
    fn gen_loop_body(&mut self, body: &Stmt, is_shared: bool, indent: usize) -> Result<()> {
        if is_shared {
            return self.gen_statement_body(body, indent);
        }
        let label = self.next_label();
        let var = format!("__loop_arena_{label}__");
        let parent = self.arena_var().to_string();
        self.line(
            indent,
            &format!("RtManagedArena *{var} = rt_managed_arena_create_child({parent});"),
        );
        let saved_cur = self.current_arena_var.replace(var.clone());
        self.arena_depth += 1;
        self.cleanup_stack.push(ScopeArena::Loop(var.clone()));

        self.gen_statement_body(body, indent)?;

        self.cleanup_stack.pop();
        self.arena_depth -= 1;
        self.current_arena_var = saved_cur;
        self.line(indent, &format!("rt_managed_arena_destroy_child({var});"));
        Ok(())
    }

    fn gen_while(
        &mut self,
        condition: &Expr,
        body: &Stmt,
        is_shared: bool,
        indent: usize,
    ) -> Result<()> {
        let cond = self.gen_expression(condition)?;
        self.line(indent, &format!("while ({cond}) {{"));
        self.gen_loop_body(body, is_shared, indent + 1)?;
        self.line(indent, "}");
        Ok(())
    }

    fn gen_for(
        &mut self,
        initializer: Option<&Stmt>,
        condition: Option<&Expr>,
        increment: Option<&Expr>,
        body: &Stmt,
        is_shared: bool,
        indent: usize,
    ) -> Result<()> {
        self.line(indent, "{");
        let counter = self.trackable_counter(initializer, increment);
        if let Some(init) = initializer {
            self.gen_statement(init, indent + 1)?;
        }
        let cond = match condition {
            Some(c) => self.gen_expression(c)?,
            None => "1".to_string(),
        };
        let incr = match increment {
            Some(i) => self.gen_expression(i)?,
            None => String::new(),
        };
        self.line(indent + 1, &format!("for (; {cond}; {incr}) {{"));
        if let Some(name) = &counter {
            self.push_loop_counter(name);
        }
        self.gen_loop_body(body, is_shared, indent + 2)?;
        if counter.is_some() {
            self.pop_loop_counter();
        }
        self.line(indent + 1, "}");
        self.line(indent, "}");
        Ok(())
    }

    /// An induction variable initialized to a non-negative literal and
    /// stepped by increment is provably non-negative inside the loop.
    fn trackable_counter(
        &self,
        initializer: Option<&Stmt>,
        increment: Option<&Expr>,
    ) -> Option<String> {
        let Some(Stmt::VarDecl(decl)) = initializer else {
            return None;
        };
        let non_negative_init = matches!(
            decl.initializer.as_ref().map(|e| &e.kind),
            Some(ExprKind::Literal(LiteralValue::Int(v))) if *v >= 0
        );
        if !non_negative_init {
            return None;
        }
        match increment.map(|e| &e.kind) {
            Some(ExprKind::Increment { operand }) => match &operand.kind {
                ExprKind::Variable { name } if *name == decl.name => Some(decl.name.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    fn gen_for_each(
        &mut self,
        var_name: &str,
        iterable: &Expr,
        body: &Stmt,
        is_shared: bool,
        indent: usize,
    ) -> Result<()> {
        let mangled = mangle(var_name);

        // Ranges iterate without materializing an array.
        if let ExprKind::Range { start, end } = &iterable.kind {
            let s = self.gen_expression(start)?;
            let e = self.gen_expression(end)?;
            let track = matches!(&start.kind, ExprKind::Literal(LiteralValue::Int(v)) if *v >= 0);
            self.line(
                indent,
                &format!("for (int64_t {mangled} = {s}; {mangled} < {e}; {mangled}++) {{"),
            );
            if track {
                self.push_loop_counter(var_name);
            }
            self.gen_loop_body(body, is_shared, indent + 1)?;
            if track {
                self.pop_loop_counter();
            }
            self.line(indent, "}");
            return Ok(());
        }

        let iter_ty = self.expr_ty(iterable)?.clone();
        let Type::Array(elem) = &iter_ty else {
            return Err(CodegenError::Unsupported("for-each over non-array".into()));
        };
        let elem_c = self.c_array_elem_type(elem)?;
        let arena = self.arena_var().to_string();
        let h = self.gen_handle(iterable)?;
        let t = self.next_temp();

        self.line(indent, "{");
        self.line(indent + 1, &format!("RtHandle __it{t}__ = {h};"));
        self.line(
            indent + 1,
            &format!("int64_t __len{t}__ = rt_array_length({arena}, __it{t}__);"),
        );
        self.line(
            indent + 1,
            &format!("for (int64_t __i{t}__ = 0; __i{t}__ < __len{t}__; __i{t}__++) {{"),
        );
        self.line(
            indent + 2,
            &format!(
                "{elem_c} {mangled} = (({elem_c} *)SB_PEEK({arena}, __it{t}__))[__i{t}__];"
            ),
        );
        self.gen_loop_body(body, is_shared, indent + 2)?;
        self.line(indent + 1, "}");
        self.line(indent, "}");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lock
    // ------------------------------------------------------------------

    fn gen_lock(&mut self, lock_expr: &Expr, body: &Stmt, indent: usize) -> Result<()> {
        let ExprKind::Variable { name } = &lock_expr.kind else {
            return Err(CodegenError::Unsupported("lock target".into()));
        };
        let lock_var = format!("{}__lock__", mangle(name));
        self.line(
            indent,
            &format!("while (__atomic_test_and_set(&{lock_var}, __ATOMIC_ACQUIRE)) {{ }}"),
        );
        self.gen_statement_body(body, indent)?;
        self.line(
            indent,
            &format!("__atomic_clear(&{lock_var}, __ATOMIC_RELEASE);"),
        );
        Ok(())
    }
}

/// True when every control path through `stmt` returns.
fn stmt_always_returns(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::Return { .. } => true,
        Stmt::Block { statements, .. } => statements.last().is_some_and(stmt_always_returns),
        Stmt::If {
            then_branch,
            else_branch,
            ..
        } => match else_branch {
            Some(else_branch) => stmt_always_returns(then_branch) && stmt_always_returns(else_branch),
            None => false,
        },
        _ => false,
    }
}

/// True when the optimizer marked any tail call in the body.
fn body_has_marked_tail_calls(body: &[Stmt]) -> bool {
    fn expr_marked(expr: &Expr) -> bool {
        matches!(
            expr.kind,
            ExprKind::Call {
                is_tail_call: true,
                ..
            }
        )
    }
    fn stmt_marked(stmt: &Stmt) -> bool {
        match stmt {
            Stmt::Return { value: Some(value) } => expr_marked(value),
            Stmt::Block { statements, .. } => statements.iter().any(stmt_marked),
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => {
                stmt_marked(then_branch)
                    || else_branch.as_deref().is_some_and(stmt_marked)
            }
            Stmt::While { body, .. } | Stmt::For { body, .. } | Stmt::ForEach { body, .. } => {
                stmt_marked(body)
            }
            _ => false,
        }
    }
    body.iter().any(stmt_marked)
}
