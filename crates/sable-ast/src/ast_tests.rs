//! Unit tests for the AST and type algebra.

use super::*;

#[test]
fn struct_equality_is_by_name() {
    let mut a = StructType::named("Point");
    a.fields.push(StructField::new("x", Type::Double));

    // Same name, different (unresolved forward-reference) shape.
    let b = StructType::named("Point");
    let c = StructType::named("Vector");

    assert_eq!(Type::Struct(a.clone()), Type::Struct(b));
    assert_ne!(Type::Struct(a), Type::Struct(c));
}

#[test]
fn nested_array_dims() {
    let t1 = Type::array(Type::Int);
    let t2 = Type::array(Type::array(Type::Int));
    let t3 = Type::array(Type::array(Type::array(Type::Double)));

    assert_eq!(t1.array_dims(), 1);
    assert_eq!(t2.array_dims(), 2);
    assert_eq!(t3.array_dims(), 3);
    assert_eq!(Type::Int.array_dims(), 0);
}

#[test]
fn handle_types() {
    assert!(Type::Str.is_handle_type());
    assert!(Type::array(Type::Int).is_handle_type());
    assert!(!Type::Int.is_handle_type());
    assert!(!Type::pointer(Type::Char).is_handle_type());
}

#[test]
fn struct_layout_with_padding() {
    let mut s = StructType::named("Mixed");
    s.fields.push(StructField::new("flag", Type::Bool));
    s.fields.push(StructField::new("value", Type::Double));
    s.fields.push(StructField::new("count", Type::Int32));
    s.compute_layout();

    assert_eq!(s.fields[0].offset, 0);
    assert_eq!(s.fields[1].offset, 8, "double aligns to 8");
    assert_eq!(s.fields[2].offset, 16);
    assert_eq!(s.alignment, 8);
    assert_eq!(s.size, 24, "size rounds up to alignment");
}

#[test]
fn packed_struct_layout() {
    let mut s = StructType::named("Packed");
    s.is_packed = true;
    s.fields.push(StructField::new("flag", Type::Bool));
    s.fields.push(StructField::new("value", Type::Double));
    s.compute_layout();

    assert_eq!(s.fields[1].offset, 1, "packed struct has no padding");
    assert_eq!(s.size, 9);
    assert_eq!(s.alignment, 1);
}

#[test]
fn escape_info_helpers() {
    let mut e = Expr::str("hello");
    assert!(!e.escape.escapes_scope);

    e.mark_escapes();
    e.mark_needs_heap();
    assert!(e.escape.escapes_scope);
    assert!(e.escape.needs_heap_allocation);

    e.clear_escape_info();
    assert_eq!(e.escape, EscapeInfo::default());
}

#[test]
fn literal_zero_one_detection() {
    assert!(Expr::int(0).is_literal_zero());
    assert!(Expr::double(0.0).is_literal_zero());
    assert!(Expr::int(1).is_literal_one());
    assert!(Expr::double(1.0).is_literal_one());
    assert!(!Expr::int(2).is_literal_one());
    assert!(!Expr::var("x", Type::Int).is_literal_zero());
}

#[test]
fn symbol_table_shadowing() {
    let mut table = SymbolTable::new();
    table.declare(Symbol::new("x", Type::Int, SymbolKind::Global));
    assert_eq!(table.depth(), 0);

    table.push_scope();
    table.declare(Symbol::new("x", Type::Str, SymbolKind::Local));

    let inner = table.lookup("x").unwrap();
    assert_eq!(inner.ty, Type::Str);
    assert_eq!(inner.scope_depth, 1);

    table.pop_scope();
    let outer = table.lookup("x").unwrap();
    assert_eq!(outer.ty, Type::Int);
    assert_eq!(outer.kind, SymbolKind::Global);
}

#[test]
fn symbol_table_global_lookup_skips_locals() {
    let mut table = SymbolTable::new();
    table.push_scope();
    table.declare(Symbol::new("y", Type::Bool, SymbolKind::Local));

    assert!(table.lookup("y").is_some());
    assert!(table.lookup_global("y").is_none());
}

#[test]
fn module_functions_iterator() {
    let mut module = Module::new("demo.sbl");
    module.push(Stmt::VarDecl(VarDeclStmt::new(
        "g",
        Type::Int,
        Some(Expr::int(1)),
    )));
    module.push(Stmt::Function(FunctionStmt::new(
        "main",
        vec![],
        Type::Int,
        vec![Stmt::Return {
            value: Some(Expr::int(0)),
        }],
    )));

    let names: Vec<_> = module.functions().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["main"]);
}

#[test]
fn expr_serializes_round_trip() {
    let e = Expr::binary(BinaryOp::Add, Expr::int(2), Expr::int(3));
    let json = serde_json::to_string(&e).unwrap();
    let back: Expr = serde_json::from_str(&json).unwrap();
    assert_eq!(e, back);
}
