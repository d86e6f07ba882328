//! End-to-end pipeline tests: annotated module in, C text out.

use super::*;
use sable_ast::{
    BinaryOp, Expr, ExprKind, FunctionStmt, FunctionType, Parameter, Stmt, Symbol, SymbolKind,
    Type, VarDeclStmt,
};

fn fn_symbol(name: &str, params: Vec<Type>, ret: Type) -> Symbol {
    Symbol::new(
        name,
        Type::Function(FunctionType {
            return_type: Box::new(ret),
            params,
            param_mem_quals: Vec::new(),
            is_variadic: false,
            is_native: false,
            has_body: true,
            typedef_name: None,
        }),
        SymbolKind::Function,
    )
}

fn countdown_module() -> (Module, SymbolTable) {
    // f(n): if n <= 0 => return 0; return f(n - 1 + 0)
    // plus an unused variable and unreachable code for the optimizer.
    let n = || Expr::var("n", Type::Int);
    let fn_ty = Type::Function(FunctionType {
        return_type: Box::new(Type::Int),
        params: vec![Type::Int],
        param_mem_quals: Vec::new(),
        is_variadic: false,
        is_native: false,
        has_body: true,
        typedef_name: None,
    });

    let mut condition = Expr::binary(BinaryOp::Le, n(), Expr::int(0));
    condition.ty = Some(Type::Bool);

    let mut module = Module::new("countdown.sbl");
    module.push(Stmt::Function(FunctionStmt::new(
        "f",
        vec![Parameter::new("n", Type::Int)],
        Type::Int,
        vec![
            Stmt::VarDecl(VarDeclStmt::new("unused", Type::Int, Some(Expr::int(0)))),
            Stmt::If {
                condition,
                then_branch: Box::new(Stmt::Return {
                    value: Some(Expr::int(0)),
                }),
                else_branch: None,
            },
            Stmt::Return {
                value: Some(Expr::typed(
                    ExprKind::Call {
                        callee: Box::new(Expr::var("f", fn_ty)),
                        args: vec![Expr::binary(
                            BinaryOp::Add,
                            Expr::binary(BinaryOp::Sub, n(), Expr::int(1)),
                            Expr::int(0),
                        )],
                        is_tail_call: false,
                    },
                    Type::Int,
                )),
            },
            Stmt::expr(Expr::int(99)),
        ],
    )));

    let mut symbols = SymbolTable::new();
    symbols.declare(fn_symbol("f", vec![Type::Int], Type::Int));
    symbols.declare(Symbol::new("n", Type::Int, SymbolKind::Param));
    (module, symbols)
}

#[test]
fn pipeline_optimizes_then_generates() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (mut module, symbols) = countdown_module();
    let compiled = compile_module(&mut module, &symbols, CompileOptions::default()).unwrap();

    // The optimizer did its job...
    assert!(compiled.stats.optimizer.statements_removed >= 1);
    assert!(compiled.stats.optimizer.variables_removed >= 1);
    assert!(compiled.stats.optimizer.noops_removed >= 1);
    assert_eq!(compiled.stats.optimizer.tail_calls_marked, 1);

    // ...and the generator lowered the marked call to a jump.
    assert!(compiled.c_source.contains("__tail_start__:;"));
    assert!(compiled.c_source.contains("goto __tail_start__;"));
    assert!(!compiled.c_source.contains("sb_unused"));
    assert!(compiled.stats.emitted_lines > 10);
}

#[test]
fn pipeline_without_optimization_keeps_the_call() {
    let (mut module, symbols) = countdown_module();
    let options = CompileOptions {
        optimize: false,
        ..CompileOptions::default()
    };
    let compiled = compile_module(&mut module, &symbols, options).unwrap();

    assert_eq!(compiled.stats.optimizer, OptimizerStats::default());
    assert!(!compiled.c_source.contains("goto __tail_start__;"));
    assert!(compiled.c_source.contains("sb_f(__local_arena__"));
}

#[test]
fn unchecked_mode_threads_through_to_lowering() {
    let mut symbols = SymbolTable::new();
    symbols.declare(fn_symbol("sum", vec![Type::Int, Type::Int], Type::Int));
    symbols.declare(Symbol::new("a", Type::Int, SymbolKind::Param));
    symbols.declare(Symbol::new("b", Type::Int, SymbolKind::Param));

    let mut module = Module::new("sum.sbl");
    module.push(Stmt::Function(FunctionStmt::new(
        "sum",
        vec![Parameter::new("a", Type::Int), Parameter::new("b", Type::Int)],
        Type::Int,
        vec![Stmt::Return {
            value: Some(Expr::binary(
                BinaryOp::Add,
                Expr::var("a", Type::Int),
                Expr::var("b", Type::Int),
            )),
        }],
    )));

    let checked =
        compile_module(&mut module.clone(), &symbols, CompileOptions::default()).unwrap();
    assert!(checked.c_source.contains("rt_add_i64(sb_a, sb_b)"));

    let unchecked = compile_module(
        &mut module,
        &symbols,
        CompileOptions {
            optimize: true,
            arithmetic_mode: ArithmeticMode::Unchecked,
        },
    )
    .unwrap();
    assert!(unchecked.c_source.contains("(sb_a + sb_b)"));
}

#[test]
fn generated_module_has_entry_wrapper_and_runtime_include() {
    let mut symbols = SymbolTable::new();
    symbols.declare(fn_symbol("main", vec![], Type::Int));

    let mut module = Module::new("app.sbl");
    module.push(Stmt::Function(FunctionStmt::new(
        "main",
        vec![],
        Type::Int,
        vec![Stmt::Return {
            value: Some(Expr::int(0)),
        }],
    )));

    let compiled = compile_module(&mut module, &symbols, CompileOptions::default()).unwrap();
    assert!(compiled.c_source.contains("#include <sable_runtime.h>"));
    assert!(compiled
        .c_source
        .contains("RtManagedArena *__main_arena__ = rt_managed_arena_create();"));
    assert!(compiled
        .c_source
        .contains("rt_managed_arena_destroy(__main_arena__);"));

    // The output is a plain text artifact the driver hands to a C compiler.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.c");
    std::fs::write(&path, &compiled.c_source).unwrap();
    assert!(std::fs::metadata(&path).unwrap().len() > 0);
}
