//! Type mapping, name mangling, literal escaping, and constant folding.

use crate::{CodeGen, CodegenError, Result};
use sable_ast::{BinaryOp, Expr, ExprKind, LiteralValue, Type, UnaryOp};

impl CodeGen<'_> {
    /// The C type a declaration of `ty` uses. In arena context, strings and
    /// arrays are handle-typed.
    pub(crate) fn c_type(&self, ty: &Type) -> Result<String> {
        Ok(match ty {
            Type::Int | Type::Long => "int64_t".into(),
            Type::Int32 => "int32_t".into(),
            Type::Uint => "uint64_t".into(),
            Type::Uint32 => "uint32_t".into(),
            Type::Double => "double".into(),
            Type::Float => "float".into(),
            Type::Char => "char".into(),
            Type::Bool => "bool".into(),
            Type::Byte => "uint8_t".into(),
            Type::Void => "void".into(),
            Type::Nil => "void *".into(),
            Type::Any => "RtAny".into(),
            Type::Str | Type::Array(_) => "RtHandle".into(),
            Type::Pointer(base) => format!("{} *", self.c_type(base)?),
            Type::Opaque(name) => name.clone(),
            Type::Function(f) => {
                if f.is_native {
                    match &f.typedef_name {
                        Some(name) => name.clone(),
                        None => {
                            let mut params = Vec::new();
                            for p in &f.params {
                                params.push(self.c_native_param_type(p)?);
                            }
                            format!(
                                "{} (*)({})",
                                self.c_type(&f.return_type)?,
                                if params.is_empty() {
                                    "void".to_string()
                                } else {
                                    params.join(", ")
                                }
                            )
                        }
                    }
                } else {
                    "SbClosure *".into()
                }
            }
            Type::Struct(s) => s.c_alias.clone().unwrap_or_else(|| s.name.clone()),
        })
    }

    /// Parameter type for a native (C) function signature: raw pointers
    /// instead of handles.
    pub(crate) fn c_native_param_type(&self, ty: &Type) -> Result<String> {
        Ok(match ty {
            Type::Str => "const char *".into(),
            Type::Array(elem) => format!("{} *", self.c_type(elem)?),
            other => self.c_type(other)?,
        })
    }

    /// Element type used when indexing arrays of `elem`.
    pub(crate) fn c_array_elem_type(&self, elem: &Type) -> Result<String> {
        self.c_type(elem)
    }

    /// The default (zero) value for a type.
    pub(crate) fn default_value(&self, ty: &Type) -> &'static str {
        match ty {
            Type::Double | Type::Float => "0.0",
            Type::Bool => "false",
            Type::Str | Type::Array(_) => "RT_HANDLE_NULL",
            Type::Nil | Type::Pointer(_) | Type::Function(_) | Type::Opaque(_) => "NULL",
            Type::Struct(_) => "{0}",
            Type::Any => "rt_any_nil()",
            _ => "0",
        }
    }

    /// Runtime-helper suffix for an element type (`rt_array_alloc_<sfx>`,
    /// `rt_add_<sfx>`, ...).
    pub(crate) fn rt_suffix(&self, ty: &Type) -> Result<&'static str> {
        Ok(match ty {
            Type::Int | Type::Long => "i64",
            Type::Int32 => "i32",
            Type::Uint => "u64",
            Type::Uint32 => "u32",
            Type::Double => "f64",
            Type::Float => "f32",
            Type::Char => "i8",
            Type::Bool | Type::Byte => "u8",
            Type::Str | Type::Array(_) => "h",
            Type::Any => "any",
            Type::Struct(_) => "struct",
            Type::Pointer(_) | Type::Opaque(_) | Type::Function(_) => "ptr",
            Type::Void | Type::Nil => {
                return Err(CodegenError::Unsupported(
                    "void/nil element type in runtime helper".into(),
                ))
            }
        })
    }

    /// The `rt_to_string_*` helper converting `ty` for interpolation.
    pub(crate) fn rt_to_string_fn(&self, ty: &Type) -> Result<&'static str> {
        Ok(match ty {
            Type::Int | Type::Long => "rt_to_string_int",
            Type::Int32 => "rt_to_string_int32",
            Type::Uint | Type::Uint32 => "rt_to_string_uint",
            Type::Double | Type::Float => "rt_to_string_double",
            Type::Bool => "rt_to_string_bool",
            Type::Char => "rt_to_string_char",
            Type::Byte => "rt_to_string_byte",
            Type::Any => "rt_to_string_any",
            _ => {
                return Err(CodegenError::Unsupported(format!(
                    "interpolation of type {ty:?}"
                )))
            }
        })
    }

    /// The `rt_format_*` helper applying a format spec.
    pub(crate) fn rt_format_fn(&self, ty: &Type) -> Result<&'static str> {
        Ok(match ty {
            Type::Int | Type::Int32 | Type::Long => "rt_format_int",
            Type::Uint | Type::Uint32 => "rt_format_uint",
            Type::Double | Type::Float => "rt_format_double",
            Type::Str => "rt_format_string",
            _ => {
                return Err(CodegenError::Unsupported(format!(
                    "format spec on type {ty:?}"
                )))
            }
        })
    }

    /// Boxing helper lifting a concrete value into `RtAny`.
    pub(crate) fn boxing_fn(&self, ty: &Type) -> Result<String> {
        Ok(match ty {
            Type::Int | Type::Int32 | Type::Long => "rt_any_from_int".into(),
            Type::Uint | Type::Uint32 => "rt_any_from_uint".into(),
            Type::Double | Type::Float => "rt_any_from_double".into(),
            Type::Bool => "rt_any_from_bool".into(),
            Type::Char => "rt_any_from_char".into(),
            Type::Byte => "rt_any_from_byte".into(),
            Type::Str => "rt_any_from_string".into(),
            Type::Array(_) => "rt_any_from_array".into(),
            Type::Nil => "rt_any_nil".into(),
            Type::Struct(_) => "rt_any_from_struct".into(),
            _ => return Err(CodegenError::Unsupported(format!("boxing type {ty:?}"))),
        })
    }

    /// Unboxing helper extracting a concrete value from `RtAny`.
    pub(crate) fn unboxing_fn(&self, ty: &Type) -> Result<String> {
        Ok(match ty {
            Type::Int | Type::Int32 | Type::Long => "rt_any_to_int".into(),
            Type::Uint | Type::Uint32 => "rt_any_to_uint".into(),
            Type::Double | Type::Float => "rt_any_to_double".into(),
            Type::Bool => "rt_any_to_bool".into(),
            Type::Char => "rt_any_to_char".into(),
            Type::Byte => "rt_any_to_byte".into(),
            Type::Str => "rt_any_to_string".into(),
            Type::Array(_) => "rt_any_to_array".into(),
            _ => return Err(CodegenError::Unsupported(format!("unboxing type {ty:?}"))),
        })
    }

    /// Runtime tag constant for a type (`RT_ANY_*`).
    pub(crate) fn any_tag(&self, ty: &Type) -> Result<&'static str> {
        Ok(match ty {
            Type::Int | Type::Int32 | Type::Long => "RT_ANY_INT",
            Type::Uint | Type::Uint32 => "RT_ANY_UINT",
            Type::Double | Type::Float => "RT_ANY_DOUBLE",
            Type::Bool => "RT_ANY_BOOL",
            Type::Char => "RT_ANY_CHAR",
            Type::Byte => "RT_ANY_BYTE",
            Type::Str => "RT_ANY_STRING",
            Type::Array(_) => "RT_ANY_ARRAY",
            Type::Nil => "RT_ANY_NIL",
            Type::Struct(_) => "RT_ANY_STRUCT",
            _ => return Err(CodegenError::Unsupported(format!("any tag for {ty:?}"))),
        })
    }

    /// Human-readable type name for `typeof` constants.
    pub(crate) fn type_display_name(&self, ty: &Type) -> String {
        match ty {
            Type::Int => "int".into(),
            Type::Int32 => "int32".into(),
            Type::Uint => "uint".into(),
            Type::Uint32 => "uint32".into(),
            Type::Long => "long".into(),
            Type::Double => "double".into(),
            Type::Float => "float".into(),
            Type::Char => "char".into(),
            Type::Str => "str".into(),
            Type::Bool => "bool".into(),
            Type::Byte => "byte".into(),
            Type::Void => "void".into(),
            Type::Nil => "nil".into(),
            Type::Any => "any".into(),
            Type::Array(elem) => format!("{}[]", self.type_display_name(elem)),
            Type::Pointer(base) => format!("*{}", self.type_display_name(base)),
            Type::Opaque(name) => name.clone(),
            Type::Function(_) => "fn".into(),
            Type::Struct(s) => s.name.clone(),
        }
    }
}

/// Mangle a source identifier into the generated-C namespace.
pub(crate) fn mangle(name: &str) -> String {
    format!("sb_{name}")
}

/// Join a C type and a declarator without doubling spaces after a `*`.
pub(crate) fn declare(base: &str, name: &str) -> String {
    if base.ends_with('*') {
        format!("{base}{name}")
    } else {
        format!("{base} {name}")
    }
}

/// Escape a string for a C string literal (quotes included).
pub(crate) fn escape_c_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Escape a char for a C character literal (quotes included).
pub(crate) fn escape_char_literal(ch: char) -> String {
    match ch {
        '\'' => "'\\''".into(),
        '\\' => "'\\\\'".into(),
        '\n' => "'\\n'".into(),
        '\t' => "'\\t'".into(),
        '\r' => "'\\r'".into(),
        '\0' => "'\\0'".into(),
        c if (c as u32) < 0x20 || (c as u32) > 0x7e => format!("'\\x{:02x}'", c as u32),
        c => format!("'{c}'"),
    }
}

/// The native C operator for a binary op, or `None` when only a runtime
/// helper can lower it (division and modulo need the zero check).
pub(crate) fn native_c_operator(op: BinaryOp) -> Option<&'static str> {
    Some(match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::And => "&&",
        BinaryOp::Or => "||",
        BinaryOp::BitAnd => "&",
        BinaryOp::BitOr => "|",
        BinaryOp::BitXor => "^",
        BinaryOp::Shl => "<<",
        BinaryOp::Shr => ">>",
        BinaryOp::Div | BinaryOp::Mod => return None,
    })
}

/// True when the op is arithmetic and participates in checked lowering.
pub(crate) fn is_checked_arith(op: BinaryOp) -> bool {
    matches!(op, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul)
}

/// Fold a compile-time constant expression to a value, when possible.
/// Integer division by zero is never folded (the runtime panics instead).
pub(crate) fn fold_constant(expr: &Expr) -> Option<LiteralValue> {
    match &expr.kind {
        ExprKind::Literal(v @ (LiteralValue::Int(_) | LiteralValue::Double(_))) => Some(v.clone()),
        ExprKind::Unary {
            op: UnaryOp::Neg,
            operand,
        } => match fold_constant(operand)? {
            LiteralValue::Int(v) => Some(LiteralValue::Int(v.checked_neg()?)),
            LiteralValue::Double(v) => Some(LiteralValue::Double(-v)),
            _ => None,
        },
        ExprKind::Binary { op, left, right } => {
            let l = fold_constant(left)?;
            let r = fold_constant(right)?;
            match (l, r) {
                (LiteralValue::Int(a), LiteralValue::Int(b)) => {
                    let v = match op {
                        BinaryOp::Add => a.checked_add(b)?,
                        BinaryOp::Sub => a.checked_sub(b)?,
                        BinaryOp::Mul => a.checked_mul(b)?,
                        BinaryOp::Div => a.checked_div(b)?,
                        BinaryOp::Mod => a.checked_rem(b)?,
                        _ => return None,
                    };
                    Some(LiteralValue::Int(v))
                }
                (LiteralValue::Double(a), LiteralValue::Double(b)) => {
                    let v = match op {
                        BinaryOp::Add => a + b,
                        BinaryOp::Sub => a - b,
                        BinaryOp::Mul => a * b,
                        BinaryOp::Div if b != 0.0 => a / b,
                        _ => return None,
                    };
                    Some(LiteralValue::Double(v))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// True when an index expression is provably non-negative: a literal
/// constant `>= 0` or a tracked loop counter.
pub(crate) fn index_provably_non_negative(gen: &CodeGen<'_>, index: &Expr) -> bool {
    match &index.kind {
        ExprKind::Literal(LiteralValue::Int(v)) => *v >= 0,
        ExprKind::Variable { name } => gen.is_tracked_loop_counter(name),
        _ => false,
    }
}
