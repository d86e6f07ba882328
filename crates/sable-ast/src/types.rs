//! The type algebra shared by every compiler phase.

use crate::expr::Expr;
use serde::{Deserialize, Serialize};

/// Memory qualifier for variables and parameters.
///
/// `Default` means reference semantics for arrays and value semantics for
/// primitives; `AsVal` forces a copy; `AsRef` heap-allocates a primitive so
/// it can be shared by address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MemoryQualifier {
    /// Default behavior for the type.
    #[default]
    Default,
    /// `as val` - explicit copy semantics.
    AsVal,
    /// `as ref` - heap allocation for primitives, address-of otherwise.
    AsRef,
}

/// Sync modifier for thread-safe atomic variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncModifier {
    /// No synchronization.
    #[default]
    None,
    /// `sync` keyword - lowered to atomic operations.
    Atomic,
}

/// Block modifier controlling arena nesting for a `{ ... }` scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlockModifier {
    /// Normal block with its own arena.
    #[default]
    Default,
    /// `shared` block - allocates into the parent's arena.
    Shared,
    /// `private` block - isolated arena; only primitives escape.
    Private,
}

/// Function modifier controlling arena ownership for a function body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FunctionModifier {
    /// Normal function with its own arena.
    #[default]
    Default,
    /// `shared` function - uses the caller's arena.
    Shared,
    /// `private` function - isolated arena; only primitives return.
    Private,
}

/// A function or method parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name.
    pub name: String,
    /// Declared type.
    pub ty: Type,
    /// `as val` / `as ref` modifier.
    pub mem_qualifier: MemoryQualifier,
    /// `sync` modifier.
    pub sync_modifier: SyncModifier,
}

impl Parameter {
    /// Create a parameter with default qualifiers.
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            mem_qualifier: MemoryQualifier::Default,
            sync_modifier: SyncModifier::None,
        }
    }
}

/// A struct field definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructField {
    /// Field name.
    pub name: String,
    /// Field type.
    pub ty: Type,
    /// Byte offset within the struct, computed by [`StructType::compute_layout`].
    pub offset: usize,
    /// Optional default-value expression.
    pub default_value: Option<Expr>,
    /// C name alias from `#pragma alias`.
    pub c_alias: Option<String>,
}

impl StructField {
    /// Create a field with no default and no alias. Offset is filled later.
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            offset: 0,
            default_value: None,
            c_alias: None,
        }
    }
}

/// A struct method definition. `body` is `None` for native declarations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructMethod {
    /// Method name.
    pub name: String,
    /// Parameters, excluding the implicit `self`.
    pub params: Vec<Parameter>,
    /// Return type.
    pub return_type: Type,
    /// Body statements; `None` for native declarations.
    pub body: Option<Vec<crate::stmt::Stmt>>,
    /// `shared` / `private` modifier.
    pub modifier: FunctionModifier,
    /// Declared with `static`.
    pub is_static: bool,
    /// Declared with `native`.
    pub is_native: bool,
    /// C function name alias from `#pragma alias`.
    pub c_alias: Option<String>,
}

/// A resolved struct type.
///
/// Equality is by name: after resolution two struct types with the same name
/// denote the same type, and forward references are patched to share it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructType {
    /// Struct name.
    pub name: String,
    /// Field definitions in declaration order.
    pub fields: Vec<StructField>,
    /// Method definitions.
    pub methods: Vec<StructMethod>,
    /// Total size in bytes, computed during type checking.
    pub size: usize,
    /// Alignment requirement in bytes.
    pub alignment: usize,
    /// Declared with `native struct` (allows pointer fields).
    pub is_native: bool,
    /// Preceded by `#pragma pack(1)`.
    pub is_packed: bool,
    /// `as ref` - native methods receive self by pointer.
    pub pass_self_by_ref: bool,
    /// C type name alias from `#pragma alias`.
    pub c_alias: Option<String>,
}

impl PartialEq for StructType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl StructType {
    /// Create an empty struct type with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            methods: Vec::new(),
            size: 0,
            alignment: 1,
            is_native: false,
            is_packed: false,
            pass_self_by_ref: false,
            c_alias: None,
        }
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a field's index by name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Look up a method by name.
    pub fn method(&self, name: &str) -> Option<&StructMethod> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Compute field offsets, total size, and alignment.
    ///
    /// Packed structs use byte alignment throughout. Size is rounded up to
    /// the struct alignment so arrays of the struct stay aligned.
    pub fn compute_layout(&mut self) {
        let mut offset = 0usize;
        let mut max_align = 1usize;
        for field in &mut self.fields {
            let (fsize, falign) = field.ty.size_and_alignment();
            let align = if self.is_packed { 1 } else { falign };
            offset = offset.div_ceil(align) * align;
            field.offset = offset;
            offset += fsize;
            max_align = max_align.max(align);
        }
        self.alignment = max_align;
        self.size = offset.div_ceil(max_align) * max_align;
    }
}

/// A function type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionType {
    /// Return type.
    pub return_type: Box<Type>,
    /// Parameter types.
    pub params: Vec<Type>,
    /// Memory qualifiers for each parameter; empty when all are default.
    pub param_mem_quals: Vec<MemoryQualifier>,
    /// Accepts variadic arguments.
    pub is_variadic: bool,
    /// C-compatible function pointer (native callback type).
    pub is_native: bool,
    /// Has a sable body (as opposed to a true extern).
    pub has_body: bool,
    /// Typedef name for native callback types.
    pub typedef_name: Option<String>,
}

/// The type of an expression or declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Type {
    /// 64-bit signed integer (default integer type).
    Int,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit unsigned integer.
    Uint,
    /// 32-bit unsigned integer.
    Uint32,
    /// 64-bit signed integer (alias width of `Int`, distinct kind).
    Long,
    /// 64-bit float.
    Double,
    /// 32-bit float.
    Float,
    /// Single character.
    Char,
    /// Managed string; lowered to a handle in generated code.
    Str,
    /// Boolean.
    Bool,
    /// Unsigned byte.
    Byte,
    /// No value.
    Void,
    /// The `nil` literal's type.
    Nil,
    /// Runtime-tagged union; conversions require explicit boxing or `is`/`as`.
    Any,
    /// Managed array. `Array(Array(T))` is the canonical 2D form.
    Array(Box<Type>),
    /// Raw pointer to the base type (C interop).
    Pointer(Box<Type>),
    /// Opaque named type such as `FILE`.
    Opaque(String),
    /// Function type.
    Function(FunctionType),
    /// Resolved struct type.
    Struct(StructType),
}

impl Type {
    /// Make an array of `element`.
    pub fn array(element: Type) -> Self {
        Type::Array(Box::new(element))
    }

    /// Make a pointer to `base`.
    pub fn pointer(base: Type) -> Self {
        Type::Pointer(Box::new(base))
    }

    /// Structural equality, except structs compare by name.
    ///
    /// `PartialEq` already implements this (see [`StructType`]); the method
    /// exists so call sites read as a deliberate semantic choice.
    pub fn equals(&self, other: &Type) -> bool {
        self == other
    }

    /// True for types lowered to arena handles in generated code.
    pub fn is_handle_type(&self) -> bool {
        matches!(self, Type::Str | Type::Array(_))
    }

    /// True for scalar primitives stored by value.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Type::Int
                | Type::Int32
                | Type::Uint
                | Type::Uint32
                | Type::Long
                | Type::Double
                | Type::Float
                | Type::Char
                | Type::Bool
                | Type::Byte
        )
    }

    /// True for integer kinds (signed or unsigned, any width).
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Type::Int | Type::Int32 | Type::Uint | Type::Uint32 | Type::Long | Type::Byte
        )
    }

    /// Element type of an array, or `None`.
    pub fn element_type(&self) -> Option<&Type> {
        match self {
            Type::Array(elem) => Some(elem),
            _ => None,
        }
    }

    /// Array nesting depth: `T` → 0, `T[]` → 1, `T[][]` → 2, ...
    pub fn array_dims(&self) -> usize {
        match self {
            Type::Array(elem) => 1 + elem.array_dims(),
            _ => 0,
        }
    }

    /// Size and alignment in bytes for struct layout purposes.
    ///
    /// Handle types occupy one 8-byte slot; structs use their computed
    /// layout.
    pub fn size_and_alignment(&self) -> (usize, usize) {
        match self {
            Type::Bool | Type::Byte | Type::Char => (1, 1),
            Type::Int32 | Type::Uint32 | Type::Float => (4, 4),
            Type::Int | Type::Uint | Type::Long | Type::Double => (8, 8),
            Type::Struct(s) => (s.size.max(1), s.alignment.max(1)),
            // Handles, pointers, functions, strings, arrays, any: one slot.
            _ => (8, 8),
        }
    }

    /// The struct type, if this is a struct.
    pub fn as_struct(&self) -> Option<&StructType> {
        match self {
            Type::Struct(s) => Some(s),
            _ => None,
        }
    }
}
