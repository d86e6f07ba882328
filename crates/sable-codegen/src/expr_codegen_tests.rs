//! Expression-lowering tests: literal suffixes, handle/raw modes, index
//! adjustment, assignment discipline, interpolation.

use super::*;
use sable_ast::{
    BinaryOp, Expr, ExprKind, FieldInit, FunctionType, LiteralValue, MemoryQualifier, StructField,
    StructType, Symbol, SymbolKind, SymbolTable, Type,
};

fn arena_gen(symbols: &SymbolTable) -> CodeGen<'_> {
    let mut g = CodeGen::new(symbols);
    g.current_arena_var = Some("__local_arena__".to_string());
    g.function_arena_var = Some("__local_arena__".to_string());
    g
}

fn lower(gen: &mut CodeGen<'_>, expr: &Expr) -> String {
    gen.gen_expression(expr).expect("lowering")
}

// ----------------------------------------------------------------------
// Literals
// ----------------------------------------------------------------------

#[test]
fn integer_literal_suffixes() {
    let symbols = SymbolTable::new();
    let mut gen = arena_gen(&symbols);

    assert_eq!(lower(&mut gen, &Expr::int(7)), "7LL");
    assert_eq!(
        lower(
            &mut gen,
            &Expr::typed(ExprKind::Literal(LiteralValue::Int(7)), Type::Uint)
        ),
        "7ULL"
    );
    assert_eq!(
        lower(
            &mut gen,
            &Expr::typed(ExprKind::Literal(LiteralValue::Int(7)), Type::Uint32)
        ),
        "7U"
    );
    assert_eq!(
        lower(
            &mut gen,
            &Expr::typed(ExprKind::Literal(LiteralValue::Int(7)), Type::Int32)
        ),
        "7"
    );
}

#[test]
fn float_literals_get_decimal_points() {
    let symbols = SymbolTable::new();
    let mut gen = arena_gen(&symbols);

    assert_eq!(lower(&mut gen, &Expr::double(2.0)), "2.0");
    assert_eq!(lower(&mut gen, &Expr::double(1.5)), "1.5");
    assert_eq!(
        lower(
            &mut gen,
            &Expr::typed(ExprKind::Literal(LiteralValue::Double(3.0)), Type::Float)
        ),
        "3.0f"
    );
}

#[test]
fn string_literal_modes() {
    let symbols = SymbolTable::new();
    let mut gen = arena_gen(&symbols);

    let lit = Expr::str("hello");
    assert_eq!(gen.gen_raw(&lit).unwrap(), "\"hello\"");
    assert_eq!(
        gen.gen_handle(&lit).unwrap(),
        "rt_managed_strdup(__local_arena__, RT_HANDLE_NULL, \"hello\")"
    );
}

#[test]
fn nil_lowers_to_null_or_null_handle() {
    let symbols = SymbolTable::new();
    let mut gen = arena_gen(&symbols);

    let nil_ptr = Expr::typed(ExprKind::Literal(LiteralValue::Nil), Type::Nil);
    assert_eq!(lower(&mut gen, &nil_ptr), "NULL");

    let nil_str = Expr::typed(ExprKind::Literal(LiteralValue::Nil), Type::Str);
    assert_eq!(gen.gen_handle(&nil_str).unwrap(), "RT_HANDLE_NULL");
}

#[test]
fn char_literals_escape() {
    let symbols = SymbolTable::new();
    let mut gen = arena_gen(&symbols);
    let c = Expr::typed(ExprKind::Literal(LiteralValue::Char('\n')), Type::Char);
    assert_eq!(lower(&mut gen, &c), "'\\n'");
}

// ----------------------------------------------------------------------
// Arithmetic
// ----------------------------------------------------------------------

#[test]
fn checked_arithmetic_uses_runtime_helpers() {
    let mut symbols = SymbolTable::new();
    symbols.declare(Symbol::new("a", Type::Int, SymbolKind::Local));
    symbols.declare(Symbol::new("b", Type::Int, SymbolKind::Local));
    let mut gen = arena_gen(&symbols);

    let sum = Expr::binary(BinaryOp::Add, Expr::var("a", Type::Int), Expr::var("b", Type::Int));
    assert_eq!(lower(&mut gen, &sum), "rt_add_i64(sb_a, sb_b)");
}

#[test]
fn unchecked_arithmetic_uses_native_operators() {
    let mut symbols = SymbolTable::new();
    symbols.declare(Symbol::new("a", Type::Int, SymbolKind::Local));
    symbols.declare(Symbol::new("b", Type::Int, SymbolKind::Local));
    let mut gen = arena_gen(&symbols);
    gen.set_arithmetic_mode(ArithmeticMode::Unchecked);

    let sum = Expr::binary(BinaryOp::Add, Expr::var("a", Type::Int), Expr::var("b", Type::Int));
    assert_eq!(lower(&mut gen, &sum), "(sb_a + sb_b)");
}

#[test]
fn division_always_goes_through_runtime() {
    let mut symbols = SymbolTable::new();
    symbols.declare(Symbol::new("a", Type::Int, SymbolKind::Local));
    symbols.declare(Symbol::new("b", Type::Int, SymbolKind::Local));
    let mut gen = arena_gen(&symbols);
    gen.set_arithmetic_mode(ArithmeticMode::Unchecked);

    let div = Expr::binary(BinaryOp::Div, Expr::var("a", Type::Int), Expr::var("b", Type::Int));
    assert_eq!(lower(&mut gen, &div), "rt_div_i64(sb_a, sb_b)");
    let rem = Expr::binary(BinaryOp::Mod, Expr::var("a", Type::Int), Expr::var("b", Type::Int));
    assert_eq!(lower(&mut gen, &rem), "rt_mod_i64(sb_a, sb_b)");
}

#[test]
fn constant_expressions_fold() {
    let symbols = SymbolTable::new();
    let mut gen = arena_gen(&symbols);

    let e = Expr::binary(BinaryOp::Add, Expr::int(2), Expr::int(3));
    assert_eq!(lower(&mut gen, &e), "5LL");

    let nested = Expr::binary(BinaryOp::Mul, Expr::binary(BinaryOp::Add, Expr::int(2), Expr::int(3)), Expr::int(4));
    assert_eq!(lower(&mut gen, &nested), "20LL");
}

#[test]
fn comparison_lowers_natively() {
    let mut symbols = SymbolTable::new();
    symbols.declare(Symbol::new("a", Type::Int, SymbolKind::Local));
    let mut gen = arena_gen(&symbols);

    let mut cmp = Expr::binary(BinaryOp::Le, Expr::var("a", Type::Int), Expr::int(0));
    cmp.ty = Some(Type::Bool);
    assert_eq!(lower(&mut gen, &cmp), "(sb_a <= 0LL)");
}

#[test]
fn string_equality_goes_through_strcmp() {
    let mut symbols = SymbolTable::new();
    symbols.declare(Symbol::new("s", Type::Str, SymbolKind::Local));
    let mut gen = arena_gen(&symbols);

    let mut eq = Expr::binary(BinaryOp::Eq, Expr::var("s", Type::Str), Expr::str("x"));
    eq.ty = Some(Type::Bool);
    let lowered = lower(&mut gen, &eq);
    assert!(lowered.starts_with("(strcmp("));
    assert!(lowered.ends_with("== 0)"));
}

// ----------------------------------------------------------------------
// Variables: modes and pin arenas
// ----------------------------------------------------------------------

#[test]
fn local_string_raw_mode_peeks_function_arena() {
    let mut symbols = SymbolTable::new();
    symbols.declare(Symbol::new("s", Type::Str, SymbolKind::Local));
    let mut gen = arena_gen(&symbols);

    let v = Expr::var("s", Type::Str);
    assert_eq!(
        gen.gen_raw(&v).unwrap(),
        "((char *)SB_PEEK(__local_arena__, sb_s))"
    );
    assert_eq!(gen.gen_handle(&v).unwrap(), "sb_s");
}

#[test]
fn param_raw_mode_uses_tree_searching_pin() {
    let mut symbols = SymbolTable::new();
    symbols.declare(Symbol::new("s", Type::Str, SymbolKind::Param));
    let mut gen = arena_gen(&symbols);

    let v = Expr::var("s", Type::Str);
    assert_eq!(
        gen.gen_raw(&v).unwrap(),
        "((char *)SB_PEEK_ANY(__caller_arena__, sb_s))"
    );
}

#[test]
fn global_handle_clones_before_use() {
    let mut symbols = SymbolTable::new();
    symbols.declare(Symbol::new("g", Type::Str, SymbolKind::Global));
    let mut gen = arena_gen(&symbols);

    let v = Expr::var("g", Type::Str);
    assert_eq!(
        gen.gen_handle(&v).unwrap(),
        "rt_managed_clone(__local_arena__, __main_arena__, sb_g)"
    );
    assert_eq!(
        gen.gen_raw(&v).unwrap(),
        "((char *)SB_PEEK(__local_arena__, rt_managed_clone(__local_arena__, __main_arena__, sb_g)))"
    );
}

#[test]
fn as_ref_variable_dereferences() {
    let mut symbols = SymbolTable::new();
    let mut sym = Symbol::new("x", Type::Int, SymbolKind::Local);
    sym.mem_qualifier = MemoryQualifier::AsRef;
    symbols.declare(sym);
    let mut gen = arena_gen(&symbols);

    assert_eq!(lower(&mut gen, &Expr::var("x", Type::Int)), "(*sb_x)");
}

// ----------------------------------------------------------------------
// Indexing
// ----------------------------------------------------------------------

fn int_array_var(symbols: &mut SymbolTable) -> Expr {
    symbols.declare(Symbol::new("xs", Type::array(Type::Int), SymbolKind::Local));
    Expr::var("xs", Type::array(Type::Int))
}

#[test]
fn array_access_adjusts_negative_indices() {
    let mut symbols = SymbolTable::new();
    let xs = int_array_var(&mut symbols);
    let mut gen = arena_gen(&symbols);

    let access = Expr::typed(
        ExprKind::ArrayAccess {
            array: Box::new(xs),
            index: Box::new(Expr::var("i", Type::Int)),
        },
        Type::Int,
    );
    let lowered = lower(&mut gen, &access);
    assert!(lowered.contains("if (__i0__ < 0) __i0__ += rt_array_length"));
}

#[test]
fn literal_index_elides_adjustment() {
    let mut symbols = SymbolTable::new();
    let xs = int_array_var(&mut symbols);
    let mut gen = arena_gen(&symbols);

    let access = Expr::typed(
        ExprKind::ArrayAccess {
            array: Box::new(xs),
            index: Box::new(Expr::int(2)),
        },
        Type::Int,
    );
    let lowered = lower(&mut gen, &access);
    assert!(!lowered.contains("rt_array_length"), "constant index needs no adjust");
}

#[test]
fn tracked_loop_counter_elides_adjustment() {
    let mut symbols = SymbolTable::new();
    let xs = int_array_var(&mut symbols);
    let mut gen = arena_gen(&symbols);
    gen.push_loop_counter("i");

    let access = Expr::typed(
        ExprKind::ArrayAccess {
            array: Box::new(xs),
            index: Box::new(Expr::var("i", Type::Int)),
        },
        Type::Int,
    );
    let lowered = lower(&mut gen, &access);
    assert!(!lowered.contains("rt_array_length"));
    gen.pop_loop_counter();
}

// ----------------------------------------------------------------------
// Assignment discipline
// ----------------------------------------------------------------------

#[test]
fn global_string_assignment_promotes_to_root() {
    let mut symbols = SymbolTable::new();
    symbols.declare(Symbol::new("g", Type::Str, SymbolKind::Global));
    let mut gen = arena_gen(&symbols);

    let assign = Expr::typed(
        ExprKind::Assign {
            name: "g".into(),
            value: Box::new(Expr::str("fresh")),
        },
        Type::Str,
    );
    let lowered = lower(&mut gen, &assign);
    assert!(lowered.contains("rt_managed_mark_dead(__main_arena__, sb_g)"));
    assert!(lowered.contains("rt_managed_promote(__main_arena__, __local_arena__"));
}

#[test]
fn local_string_assignment_marks_old_dead() {
    let mut symbols = SymbolTable::new();
    symbols.declare(Symbol::new("s", Type::Str, SymbolKind::Local));
    let mut gen = arena_gen(&symbols);

    let assign = Expr::typed(
        ExprKind::Assign {
            name: "s".into(),
            value: Box::new(Expr::str("next")),
        },
        Type::Str,
    );
    let lowered = lower(&mut gen, &assign);
    assert!(lowered.contains("rt_managed_mark_dead(__local_arena__, sb_s)"));
    assert!(lowered.contains("sb_s = __h"));
}

#[test]
fn any_assignment_boxes_concrete_values() {
    let mut symbols = SymbolTable::new();
    symbols.declare(Symbol::new("x", Type::Any, SymbolKind::Local));
    let mut gen = arena_gen(&symbols);

    let assign = Expr::typed(
        ExprKind::Assign {
            name: "x".into(),
            value: Box::new(Expr::int(5)),
        },
        Type::Any,
    );
    assert_eq!(lower(&mut gen, &assign), "(sb_x = rt_any_from_int(5LL))");
}

#[test]
fn typed_array_converts_when_assigned_to_any_array() {
    let mut symbols = SymbolTable::new();
    symbols.declare(Symbol::new("xs", Type::array(Type::Any), SymbolKind::Local));
    symbols.declare(Symbol::new("src", Type::array(Type::Int), SymbolKind::Local));
    let mut gen = arena_gen(&symbols);

    let assign = Expr::typed(
        ExprKind::Assign {
            name: "xs".into(),
            value: Box::new(Expr::var("src", Type::array(Type::Int))),
        },
        Type::array(Type::Any),
    );
    let lowered = lower(&mut gen, &assign);
    assert!(lowered.contains("rt_array_to_any_i64(__local_arena__"));
}

// ----------------------------------------------------------------------
// Interpolation
// ----------------------------------------------------------------------

#[test]
fn interpolation_builds_with_string_helpers() {
    let mut symbols = SymbolTable::new();
    symbols.declare(Symbol::new("n", Type::Int, SymbolKind::Local));
    let mut gen = arena_gen(&symbols);

    let interp = Expr::typed(
        ExprKind::Interpolated {
            parts: vec![Expr::str("count="), Expr::var("n", Type::Int)],
            format_specs: vec![None, None],
        },
        Type::Str,
    );
    let lowered = gen.gen_raw(&interp).unwrap();
    assert!(lowered.contains("rt_string_with_capacity(__local_arena__, 64)"));
    assert!(lowered.contains("rt_string_append(__str0__, \"count=\")"));
    assert!(lowered.contains("rt_to_string_int(__local_arena__, sb_n)"));

    let as_handle = gen.gen_handle(&interp).unwrap();
    assert!(as_handle.contains("rt_managed_strdup(__local_arena__, RT_HANDLE_NULL, __str1__)"));
}

#[test]
fn format_specs_route_through_format_helpers() {
    let mut symbols = SymbolTable::new();
    symbols.declare(Symbol::new("pi", Type::Double, SymbolKind::Local));
    let mut gen = arena_gen(&symbols);

    let interp = Expr::typed(
        ExprKind::Interpolated {
            parts: vec![Expr::var("pi", Type::Double)],
            format_specs: vec![Some(".2".into())],
        },
        Type::Str,
    );
    let lowered = gen.gen_raw(&interp).unwrap();
    assert!(lowered.contains("rt_format_double(__local_arena__, sb_pi, \".2\")"));
}

// ----------------------------------------------------------------------
// Type operators
// ----------------------------------------------------------------------

#[test]
fn typeof_known_type_is_a_constant() {
    let symbols = SymbolTable::new();
    let mut gen = arena_gen(&symbols);

    let e = Expr::typed(
        ExprKind::Typeof {
            operand: None,
            type_literal: Some(Type::Int),
        },
        Type::Str,
    );
    assert_eq!(gen.gen_raw(&e).unwrap(), "\"int\"");
}

#[test]
fn is_on_array_checks_container_and_element_tags() {
    let mut symbols = SymbolTable::new();
    symbols.declare(Symbol::new("v", Type::Any, SymbolKind::Local));
    let mut gen = arena_gen(&symbols);

    let e = Expr::typed(
        ExprKind::Is {
            operand: Box::new(Expr::var("v", Type::Any)),
            check_type: Type::array(Type::Int),
        },
        Type::Bool,
    );
    assert_eq!(
        lower(&mut gen, &e),
        "(rt_any_get_tag(sb_v) == RT_ANY_ARRAY && rt_any_get_elem_tag(sb_v) == RT_ANY_INT)"
    );
}

#[test]
fn is_on_struct_compares_runtime_type_id() {
    let mut symbols = SymbolTable::new();
    symbols.declare(Symbol::new("v", Type::Any, SymbolKind::Local));
    let mut gen = arena_gen(&symbols);

    let e = Expr::typed(
        ExprKind::Is {
            operand: Box::new(Expr::var("v", Type::Any)),
            check_type: Type::Struct(StructType::named("Point")),
        },
        Type::Bool,
    );
    assert_eq!(lower(&mut gen, &e), "rt_any_is_struct_type(sb_v, \"Point\")");
}

#[test]
fn as_type_unboxes_any_and_casts_concrete() {
    let mut symbols = SymbolTable::new();
    symbols.declare(Symbol::new("v", Type::Any, SymbolKind::Local));
    symbols.declare(Symbol::new("n", Type::Int, SymbolKind::Local));
    let mut gen = arena_gen(&symbols);

    let unbox = Expr::typed(
        ExprKind::AsType {
            operand: Box::new(Expr::var("v", Type::Any)),
            target_type: Type::Int,
        },
        Type::Int,
    );
    assert_eq!(lower(&mut gen, &unbox), "rt_any_to_int(sb_v)");

    let cast = Expr::typed(
        ExprKind::AsType {
            operand: Box::new(Expr::var("n", Type::Int)),
            target_type: Type::Double,
        },
        Type::Double,
    );
    assert_eq!(lower(&mut gen, &cast), "((double)(sb_n))");
}

// ----------------------------------------------------------------------
// Struct literals
// ----------------------------------------------------------------------

fn point_type() -> StructType {
    let mut s = StructType::named("Point");
    s.fields.push(StructField::new("x", Type::Double));
    s.fields.push(StructField::new("y", Type::Double));
    s
}

#[test]
fn struct_literal_fills_defaults_and_zeroes() {
    let symbols = SymbolTable::new();
    let mut gen = arena_gen(&symbols);

    let lit = Expr::typed(
        ExprKind::StructLiteral {
            struct_name: "Point".into(),
            fields: vec![FieldInit {
                name: "x".into(),
                value: Expr::double(1.5),
            }],
            struct_type: Some(Type::Struct(point_type())),
            fields_initialized: vec![true, false],
        },
        Type::Struct(point_type()),
    );
    assert_eq!(
        lower(&mut gen, &lit),
        "(Point){ .sb_x = 1.5, .sb_y = 0.0 }"
    );
}

#[test]
fn struct_literal_in_array_compound_omits_cast() {
    let symbols = SymbolTable::new();
    let mut gen = arena_gen(&symbols);
    gen.in_array_compound_literal = true;

    let lit = Expr::typed(
        ExprKind::StructLiteral {
            struct_name: "Point".into(),
            fields: vec![],
            struct_type: Some(Type::Struct(point_type())),
            fields_initialized: vec![false, false],
        },
        Type::Struct(point_type()),
    );
    let lowered = lower(&mut gen, &lit);
    assert!(
        lowered.starts_with("{ "),
        "no outer cast inside array compound literals: {lowered}"
    );
}

// ----------------------------------------------------------------------
// Calls
// ----------------------------------------------------------------------

#[test]
fn user_call_passes_current_arena_and_handle_args() {
    let mut symbols = SymbolTable::new();
    symbols.declare(Symbol::new(
        "consume",
        Type::Function(FunctionType {
            return_type: Box::new(Type::Void),
            params: vec![Type::Str],
            param_mem_quals: Vec::new(),
            is_variadic: false,
            is_native: false,
            has_body: true,
            typedef_name: None,
        }),
        SymbolKind::Function,
    ));
    let mut gen = arena_gen(&symbols);

    let call = Expr::typed(
        ExprKind::Call {
            callee: Box::new(Expr::var(
                "consume",
                Type::Function(FunctionType {
                    return_type: Box::new(Type::Void),
                    params: vec![Type::Str],
                    param_mem_quals: Vec::new(),
                    is_variadic: false,
                    is_native: false,
                    has_body: true,
                    typedef_name: None,
                }),
            )),
            args: vec![Expr::str("data")],
            is_tail_call: false,
        },
        Type::Void,
    );
    let lowered = lower(&mut gen, &call);
    assert!(lowered.starts_with("sb_consume(__local_arena__, "));
    assert!(
        lowered.contains("rt_managed_strdup"),
        "handle-typed parameters receive handles: {lowered}"
    );
}

#[test]
fn native_call_receives_raw_pointers_without_arena() {
    let mut symbols = SymbolTable::new();
    let mut sym = Symbol::new(
        "puts_like",
        Type::Function(FunctionType {
            return_type: Box::new(Type::Int),
            params: vec![Type::Str],
            param_mem_quals: Vec::new(),
            is_variadic: false,
            is_native: true,
            has_body: false,
            typedef_name: None,
        }),
        SymbolKind::Function,
    );
    sym.is_native = true;
    symbols.declare(sym);
    symbols.declare(Symbol::new("s", Type::Str, SymbolKind::Local));
    let mut gen = arena_gen(&symbols);

    let call = Expr::typed(
        ExprKind::Call {
            callee: Box::new(Expr::var("puts_like", Type::Int)),
            args: vec![Expr::var("s", Type::Str)],
            is_tail_call: false,
        },
        Type::Int,
    );
    assert_eq!(
        lower(&mut gen, &call),
        "puts_like(((char *)SB_PEEK(__local_arena__, sb_s)))"
    );
}
