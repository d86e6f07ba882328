//! C code generator.
//!
//! Translates an annotated module into a C translation unit. The generator
//! is a visitor over the AST with a mutable [`CodeGen`] state object; it
//! trusts the type checker and escape analysis and re-runs neither.
//!
//! Three disciplines drive the non-obvious parts of the lowering:
//!
//! - **Arena nesting.** Function bodies, loop bodies, and scope-modifier
//!   blocks each decide whether to own a child arena, alias their parent
//!   (`shared`), or isolate themselves (`private`). Arena pointers are C
//!   locals (`__main_arena__`, `__local_arena__`, per-loop and per-block
//!   names).
//! - **Handle discipline.** String- and array-typed expressions have two
//!   evaluation modes: *handle mode* yields `RtHandle` values for storage
//!   and cross-arena traffic, *raw mode* yields a pointer extracted under
//!   the epoch contract. [`CodeGen::expr_as_handle`] flips at the contract
//!   points described on each lowering.
//! - **Return promotion.** Handle-typed results are promoted into the
//!   caller's arena before the local arena dies; global stores promote to
//!   the program root; struct returns deep-promote their handle fields.
//!
//! Output is assembled from buffered streams: top-of-file declarations,
//! hoisted lambdas and thunks, user functions, and the entry-point wrapper.
//! Unsupported AST shapes and missing resolver results are fatal
//! ([`CodegenError`]); recovery belongs to the parser, not here.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod expr;
mod externs;
mod lambda;
mod pragma;
mod stmt;
mod types;

use sable_ast::{FunctionModifier, Module, SymbolTable, Type};
use thiserror::Error;

/// Fatal code-generation errors. The generator aborts on the first one.
#[derive(Debug, Error)]
pub enum CodegenError {
    /// The AST contains a shape this lowering does not support.
    #[error("unsupported construct: {0}")]
    Unsupported(String),
    /// A field the resolver should have filled is missing.
    #[error("missing resolved {what} on {node}")]
    MissingResolved {
        /// What was expected (e.g. "type", "method").
        what: &'static str,
        /// The node kind it was expected on.
        node: &'static str,
    },
    /// A name the symbol table should know is absent.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
}

/// Result alias for generator internals.
pub type Result<T> = std::result::Result<T, CodegenError>;

/// Arithmetic lowering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArithmeticMode {
    /// Runtime helpers that trap on overflow (default).
    #[default]
    Checked,
    /// Native C operators. Division and modulo still go through runtime
    /// helpers for the zero check.
    Unchecked,
}

/// Scope cleanup entries tracked for break/continue/return paths.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ScopeArena {
    /// A per-iteration loop arena.
    Loop(String),
    /// A private-block arena.
    Private(String),
}

/// The generator's mutable state. One per module; never shared.
pub struct CodeGen<'a> {
    symbols: &'a SymbolTable,

    // Counters for unique names.
    temp_count: usize,
    label_count: usize,
    lambda_count: usize,
    thread_wrapper_count: usize,
    thunk_count: usize,

    // Function context.
    current_function: Option<String>,
    current_return_type: Option<Type>,
    current_func_modifier: FunctionModifier,

    // Arena context.
    arena_depth: usize,
    in_shared_context: bool,
    in_private_context: bool,
    current_arena_var: Option<String>,
    function_arena_var: Option<String>,

    // Loop and private-block cleanup tracking, innermost last.
    cleanup_stack: Vec<ScopeArena>,
    // Induction variables provably non-negative.
    loop_counter_names: Vec<String>,

    // Lambda lowering.
    enclosing_lambdas: Vec<sable_ast::LambdaExpr>,
    current_decl_var: Option<String>,
    recursive_lambda_id: Option<usize>,
    allocate_closure_in_caller_arena: bool,

    // Namespacing for imported modules.
    namespace_prefix: Option<String>,
    current_canonical_module: Option<String>,

    // Expression evaluation modes.
    expr_as_handle: bool,
    in_array_compound_literal: bool,
    in_callee_position: bool,
    arithmetic_mode: ArithmeticMode,

    // Tail-call lowering state.
    in_tail_call_function: bool,
    tail_call_params: Vec<sable_ast::Parameter>,

    // Pragma collections (deduplicated in order of first sighting).
    pragma_includes: Vec<String>,
    pragma_links: Vec<String>,
    pragma_sources: Vec<(String, String)>,

    // Buffered emission streams.
    top: String,
    lambda_forward_decls: String,
    lambda_definitions: String,
    function_definitions: String,
    main_body: String,
    out: String,
}

impl<'a> CodeGen<'a> {
    /// Fresh generator over a resolved symbol table.
    pub fn new(symbols: &'a SymbolTable) -> Self {
        Self {
            symbols,
            temp_count: 0,
            label_count: 0,
            lambda_count: 0,
            thread_wrapper_count: 0,
            thunk_count: 0,
            current_function: None,
            current_return_type: None,
            current_func_modifier: FunctionModifier::Default,
            arena_depth: 0,
            in_shared_context: false,
            in_private_context: false,
            current_arena_var: None,
            function_arena_var: None,
            cleanup_stack: Vec::new(),
            loop_counter_names: Vec::new(),
            enclosing_lambdas: Vec::new(),
            current_decl_var: None,
            recursive_lambda_id: None,
            allocate_closure_in_caller_arena: false,
            namespace_prefix: None,
            current_canonical_module: None,
            expr_as_handle: false,
            in_array_compound_literal: false,
            in_callee_position: false,
            arithmetic_mode: ArithmeticMode::default(),
            in_tail_call_function: false,
            tail_call_params: Vec::new(),
            pragma_includes: Vec::new(),
            pragma_links: Vec::new(),
            pragma_sources: Vec::new(),
            top: String::new(),
            lambda_forward_decls: String::new(),
            lambda_definitions: String::new(),
            function_definitions: String::new(),
            main_body: String::new(),
            out: String::new(),
        }
    }

    /// Select checked or unchecked arithmetic lowering.
    pub fn set_arithmetic_mode(&mut self, mode: ArithmeticMode) {
        self.arithmetic_mode = mode;
    }

    /// Namespace prefix applied to globals and functions of an imported
    /// module, and the canonical module name used for its statics.
    pub fn set_namespace(&mut self, prefix: Option<String>, canonical: Option<String>) {
        self.namespace_prefix = prefix;
        self.current_canonical_module = canonical;
    }

    /// Generate the C translation unit for `module`.
    pub fn generate(&mut self, module: &Module) -> Result<String> {
        self.collect_pragmas(module);
        self.emit_preamble(&module.filename);
        self.emit_type_declarations(module)?;
        self.emit_native_externs(module)?;
        self.emit_globals(module)?;
        self.emit_functions(module)?;
        self.emit_entry_point(module)?;

        let mut output = String::new();
        output.push_str(&self.top);
        output.push('\n');
        output.push_str(&self.lambda_forward_decls);
        if !self.lambda_forward_decls.is_empty() {
            output.push('\n');
        }
        output.push_str(&self.lambda_definitions);
        if !self.lambda_definitions.is_empty() {
            output.push('\n');
        }
        output.push_str(&self.function_definitions);
        output.push('\n');
        output.push_str(&self.main_body);
        Ok(output)
    }

    // ------------------------------------------------------------------
    // Small shared helpers
    // ------------------------------------------------------------------

    fn next_temp(&mut self) -> usize {
        let t = self.temp_count;
        self.temp_count += 1;
        t
    }

    fn next_label(&mut self) -> usize {
        let l = self.label_count;
        self.label_count += 1;
        l
    }

    /// The arena expression for the current scope, or `NULL` outside any
    /// arena context.
    fn arena_var(&self) -> &str {
        self.current_arena_var.as_deref().unwrap_or("NULL")
    }

    /// The arena that pins function-level locals.
    fn function_arena(&self) -> &str {
        self.function_arena_var
            .as_deref()
            .or(self.current_arena_var.as_deref())
            .unwrap_or("NULL")
    }

    /// The arena escaping allocations should target: values that outlive
    /// the current scope go to the function arena instead of a loop or
    /// private-block arena.
    fn alloc_arena_for(&self, expr: &sable_ast::Expr) -> String {
        if expr.escape.escapes_scope && !self.in_private_context {
            self.function_arena().to_string()
        } else {
            self.arena_var().to_string()
        }
    }

    fn push_loop_counter(&mut self, name: &str) {
        self.loop_counter_names.push(name.to_string());
    }

    fn pop_loop_counter(&mut self) {
        self.loop_counter_names.pop();
    }

    fn is_tracked_loop_counter(&self, name: &str) -> bool {
        self.loop_counter_names.iter().any(|n| n == name)
    }
}


#[cfg(test)]
#[path = "expr_codegen_tests.rs"]
mod expr_codegen_tests;
