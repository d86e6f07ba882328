//! Compilation pipeline: optimizer passes, then C code generation.
//!
//! The pipeline accepts a fully annotated [`Module`] (parsing, name
//! resolution, type checking, and escape analysis happen upstream) and
//! produces a C translation unit plus statistics:
//!
//! 1. Optimize (unless disabled): dead-code elimination, tail-call
//!    marking, string-literal merging.
//! 2. Generate: the code generator lowers the module against the resolved
//!    symbol table.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use sable_ast::{Module, SymbolTable};
use sable_codegen::{ArithmeticMode, CodeGen};
use sable_optimizer::{Optimizer, OptimizerStats};
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span};

/// Pipeline options.
#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    /// Run the optimizer sequence before code generation.
    pub optimize: bool,
    /// Checked (trapping) or unchecked arithmetic lowering.
    pub arithmetic_mode: ArithmeticMode,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            optimize: true,
            arithmetic_mode: ArithmeticMode::Checked,
        }
    }
}

/// Statistics from one compilation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CompileStats {
    /// Optimizer pass counters (zeroed when optimization is disabled).
    pub optimizer: OptimizerStats,
    /// Lines in the emitted C translation unit.
    pub emitted_lines: usize,
}

/// A compiled module: C source plus statistics.
#[derive(Debug, Clone)]
pub struct CompiledModule {
    /// The C translation unit.
    pub c_source: String,
    /// Pipeline statistics.
    pub stats: CompileStats,
}

/// Run the pipeline over `module`, mutating it in place (the optimizer
/// rewrites the AST) and returning the generated C.
pub fn compile_module(
    module: &mut Module,
    symbols: &SymbolTable,
    options: CompileOptions,
) -> Result<CompiledModule> {
    let mut stats = CompileStats::default();

    if options.optimize {
        let span = info_span!("optimize", module = %module.filename);
        let _guard = span.enter();
        let mut optimizer = Optimizer::new();
        optimizer.optimize_module(module);
        stats.optimizer = *optimizer.stats();
        debug!(stats = ?stats.optimizer, "optimizer passes complete");
    }

    let c_source = {
        let span = info_span!("codegen", module = %module.filename);
        let _guard = span.enter();
        let mut generator = CodeGen::new(symbols);
        generator.set_arithmetic_mode(options.arithmetic_mode);
        generator
            .generate(module)
            .with_context(|| format!("generating C for {}", module.filename))?
    };
    stats.emitted_lines = c_source.lines().count();

    Ok(CompiledModule { c_source, stats })
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod pipeline_tests;
