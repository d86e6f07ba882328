//! Expression nodes.

use crate::stmt::Stmt;
use crate::types::{FunctionModifier, Parameter, Type};
use serde::{Deserialize, Serialize};

/// Source location for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLoc {
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

/// Escape-analysis metadata, set during type checking and consumed by the
/// code generator as an oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EscapeInfo {
    /// The expression result escapes its declaring scope.
    pub escapes_scope: bool,
    /// The expression needs heap allocation (large size or escapes).
    pub needs_heap_allocation: bool,
}

/// Literal payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralValue {
    /// Integer literal (any integer kind; the node's type picks the width).
    Int(i64),
    /// Floating literal (double or float per the node's type).
    Double(f64),
    /// String literal.
    Str(String),
    /// Character literal.
    Char(char),
    /// Boolean literal.
    Bool(bool),
    /// `nil`.
    Nil,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `&&`
    And,
    /// `||`
    Or,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Logical not.
    Not,
    /// Bitwise complement.
    BitNot,
}

/// A field initializer inside a struct literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInit {
    /// Field name.
    pub name: String,
    /// Value expression.
    pub value: Expr,
}

/// Weak reference to a resolved method, stored as ids rather than pointers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedMethod {
    /// Name of the struct type owning the method.
    pub struct_name: String,
    /// Index into the struct's method table.
    pub method_index: usize,
}

/// A captured variable on a lambda, filled during type checking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    /// Captured variable name.
    pub name: String,
    /// Its type at the capture site.
    pub ty: Type,
}

/// Lambda body: single expression or statement list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LambdaBody {
    /// Expression-bodied lambda.
    Expr(Box<Expr>),
    /// Statement-bodied lambda.
    Stmts(Vec<Stmt>),
}

/// A lambda expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LambdaExpr {
    /// Parameters.
    pub params: Vec<Parameter>,
    /// Return type.
    pub return_type: Type,
    /// Body.
    pub body: LambdaBody,
    /// `shared` / `private` modifier.
    pub modifier: FunctionModifier,
    /// Native callback lambda: no closures, C-compatible.
    pub is_native: bool,
    /// Captured free variables, filled during type checking.
    pub captures: Vec<Capture>,
}

/// The expression variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    /// Literal value.
    Literal(LiteralValue),
    /// Variable reference.
    Variable {
        /// Referenced name.
        name: String,
    },
    /// Binary operator application.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Unary operator application.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// Assignment to a named variable.
    Assign {
        /// Target name.
        name: String,
        /// Value.
        value: Box<Expr>,
    },
    /// Indexed assignment `a[i] = v`.
    IndexAssign {
        /// Array expression.
        array: Box<Expr>,
        /// Index expression.
        index: Box<Expr>,
        /// Value.
        value: Box<Expr>,
    },
    /// Compound assignment `x += v`, `x -= v`, ...
    CompoundAssign {
        /// Left-hand side (variable, array index, or member).
        target: Box<Expr>,
        /// The underlying operation.
        op: BinaryOp,
        /// Right-hand side.
        value: Box<Expr>,
    },
    /// Function call.
    Call {
        /// Callee expression.
        callee: Box<Expr>,
        /// Arguments.
        args: Vec<Expr>,
        /// Marked by the optimizer for tail-call lowering.
        is_tail_call: bool,
    },
    /// Array literal.
    Array {
        /// Elements.
        elements: Vec<Expr>,
    },
    /// Array element access `a[i]`.
    ArrayAccess {
        /// Array expression.
        array: Box<Expr>,
        /// Index expression.
        index: Box<Expr>,
    },
    /// Array slice `a[s..e..st]`; missing bounds mean begin/end/1.
    ArraySlice {
        /// Array expression.
        array: Box<Expr>,
        /// Start, or `None` for the beginning.
        start: Option<Box<Expr>>,
        /// End, or `None` for the end.
        end: Option<Box<Expr>>,
        /// Step, or `None` for 1.
        step: Option<Box<Expr>>,
        /// Slicing a pointer type (set by the type checker).
        from_pointer: bool,
    },
    /// Range `s..e`.
    Range {
        /// Start (inclusive).
        start: Box<Expr>,
        /// End (exclusive).
        end: Box<Expr>,
    },
    /// Spread `...a` inside an array literal.
    Spread {
        /// The array being spread.
        array: Box<Expr>,
    },
    /// Pre/post increment `x++`.
    Increment {
        /// Operand.
        operand: Box<Expr>,
    },
    /// Pre/post decrement `x--`.
    Decrement {
        /// Operand.
        operand: Box<Expr>,
    },
    /// Interpolated string: a sequence of parts with optional format specs.
    Interpolated {
        /// The parts, literal or computed.
        parts: Vec<Expr>,
        /// Per-part format specification, parallel to `parts`.
        format_specs: Vec<Option<String>>,
    },
    /// Lambda.
    Lambda(LambdaExpr),
    /// Static call `Type.method(args)`.
    StaticCall {
        /// Type name.
        type_name: String,
        /// Method name.
        method_name: String,
        /// Arguments.
        args: Vec<Expr>,
        /// Resolved method (set during type checking).
        resolved: Option<ResolvedMethod>,
    },
    /// Sized array allocation `T[n]` or `T[n; default]`.
    SizedArrayAlloc {
        /// Element type.
        element_type: Type,
        /// Size expression (must evaluate to int).
        size: Box<Expr>,
        /// Optional default value for all elements.
        default_value: Option<Box<Expr>>,
    },
    /// Thread spawn `&f(args)`.
    ThreadSpawn {
        /// The call to run on the new thread.
        call: Box<Expr>,
        /// shared/private arena modifier for the thread.
        modifier: FunctionModifier,
    },
    /// Thread sync `h!` or `[h1, h2]!`.
    ThreadSync {
        /// The handle or sync list to wait on.
        handle: Box<Expr>,
        /// True when syncing a list of thread handles.
        is_list: bool,
    },
    /// Sync list `[r1, r2, r3]`.
    SyncList {
        /// The handles.
        elements: Vec<Expr>,
    },
    /// `as val` - copy semantics.
    AsVal {
        /// Operand.
        operand: Box<Expr>,
        /// `*char => str` null-terminated conversion.
        cstr_to_str: bool,
        /// Operand is already an array; nothing to do.
        noop: bool,
        /// Struct deep copy (array fields cloned independently).
        struct_deep_copy: bool,
    },
    /// `as ref` - pointer to the value.
    AsRef {
        /// Operand.
        operand: Box<Expr>,
    },
    /// `typeof(value)` or `typeof(T)`.
    Typeof {
        /// Value operand; `None` if a type literal.
        operand: Option<Box<Expr>>,
        /// Type literal; `None` if a value.
        type_literal: Option<Type>,
    },
    /// `x is T`.
    Is {
        /// The `any` value to check.
        operand: Box<Expr>,
        /// The type to check against.
        check_type: Type,
    },
    /// `x as T` cast.
    AsType {
        /// The value to cast.
        operand: Box<Expr>,
        /// The target type.
        target_type: Type,
    },
    /// Struct literal `Point { x: 1.0, y: 2.0 }`.
    StructLiteral {
        /// Struct type name.
        struct_name: String,
        /// Explicit field initializers.
        fields: Vec<FieldInit>,
        /// Resolved struct type (set during type checking).
        struct_type: Option<Type>,
        /// Per-field explicit-initialization flags, indexed by the struct's
        /// field order (set during type checking).
        fields_initialized: Vec<bool>,
    },
    /// Member access `point.x`.
    MemberAccess {
        /// Object expression.
        object: Box<Expr>,
        /// Field name.
        field: String,
        /// Field index in the struct (set during type checking).
        field_index: Option<usize>,
    },
    /// Member assignment `point.x = v`.
    MemberAssign {
        /// Object expression.
        object: Box<Expr>,
        /// Field name.
        field: String,
        /// Value.
        value: Box<Expr>,
    },
    /// `sizeof(T)` or `sizeof expr`.
    Sizeof {
        /// Type operand; `None` if an expression.
        type_operand: Option<Type>,
        /// Expression operand; `None` if a type.
        expr_operand: Option<Box<Expr>>,
    },
    /// Method call `point.magnitude()` or `Point.create()`.
    MethodCall {
        /// Instance; `None` for static calls.
        object: Option<Box<Expr>>,
        /// For static calls: the struct type name.
        struct_name: Option<String>,
        /// Method name.
        method: String,
        /// Arguments.
        args: Vec<Expr>,
        /// Resolved method (set during type checking).
        resolved: Option<ResolvedMethod>,
        /// Static method call (`Type.method()`).
        is_static: bool,
    },
}

/// An expression node: kind plus resolved type and escape metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    /// The variant.
    pub kind: ExprKind,
    /// Resolved type, filled by the type checker.
    pub ty: Option<Type>,
    /// Escape-analysis record.
    pub escape: EscapeInfo,
    /// Source location for diagnostics.
    pub loc: Option<SourceLoc>,
}

impl Expr {
    /// Create an untyped expression.
    pub fn new(kind: ExprKind) -> Self {
        Self {
            kind,
            ty: None,
            escape: EscapeInfo::default(),
            loc: None,
        }
    }

    /// Create an expression with a resolved type.
    pub fn typed(kind: ExprKind, ty: Type) -> Self {
        Self {
            kind,
            ty: Some(ty),
            escape: EscapeInfo::default(),
            loc: None,
        }
    }

    /// Integer literal of the default `int` type.
    pub fn int(value: i64) -> Self {
        Self::typed(ExprKind::Literal(LiteralValue::Int(value)), Type::Int)
    }

    /// Double literal.
    pub fn double(value: f64) -> Self {
        Self::typed(ExprKind::Literal(LiteralValue::Double(value)), Type::Double)
    }

    /// String literal.
    pub fn str(value: impl Into<String>) -> Self {
        Self::typed(ExprKind::Literal(LiteralValue::Str(value.into())), Type::Str)
    }

    /// Boolean literal.
    pub fn bool(value: bool) -> Self {
        Self::typed(ExprKind::Literal(LiteralValue::Bool(value)), Type::Bool)
    }

    /// Typed variable reference.
    pub fn var(name: impl Into<String>, ty: Type) -> Self {
        Self::typed(ExprKind::Variable { name: name.into() }, ty)
    }

    /// Binary application; the result type is the left operand's.
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        let ty = left.ty.clone();
        Self {
            kind: ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            ty,
            escape: EscapeInfo::default(),
            loc: None,
        }
    }

    /// Unary application; the result type is the operand's.
    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        let ty = operand.ty.clone();
        Self {
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            ty,
            escape: EscapeInfo::default(),
            loc: None,
        }
    }

    /// Direct call of a named function.
    pub fn call(name: impl Into<String>, fn_ty: Type, args: Vec<Expr>, result: Type) -> Self {
        Self::typed(
            ExprKind::Call {
                callee: Box::new(Expr::var(name, fn_ty)),
                args,
                is_tail_call: false,
            },
            result,
        )
    }

    /// Mark this expression as escaping its scope.
    pub fn mark_escapes(&mut self) {
        self.escape.escapes_scope = true;
    }

    /// Mark this expression as needing heap allocation.
    pub fn mark_needs_heap(&mut self) {
        self.escape.needs_heap_allocation = true;
    }

    /// Clear the escape record.
    pub fn clear_escape_info(&mut self) {
        self.escape = EscapeInfo::default();
    }

    /// True when the literal is integer-or-double zero.
    pub fn is_literal_zero(&self) -> bool {
        match &self.kind {
            ExprKind::Literal(LiteralValue::Int(v)) => *v == 0,
            ExprKind::Literal(LiteralValue::Double(v)) => *v == 0.0,
            _ => false,
        }
    }

    /// True when the literal is integer-or-double one.
    pub fn is_literal_one(&self) -> bool {
        match &self.kind {
            ExprKind::Literal(LiteralValue::Int(v)) => *v == 1,
            ExprKind::Literal(LiteralValue::Double(v)) => *v == 1.0,
            _ => false,
        }
    }

    /// True when this is a string literal.
    pub fn is_string_literal(&self) -> bool {
        matches!(self.kind, ExprKind::Literal(LiteralValue::Str(_)))
    }
}
