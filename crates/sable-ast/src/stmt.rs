//! Statement nodes and modules.

use crate::expr::Expr;
use crate::types::{
    BlockModifier, FunctionModifier, MemoryQualifier, Parameter, StructField, StructMethod,
    SyncModifier, Type,
};
use serde::{Deserialize, Serialize};

/// Pragma directive kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PragmaKind {
    /// `#pragma include "<header>"`.
    Include,
    /// `#pragma link "lib"`.
    Link,
    /// `#pragma source "file.c"`.
    Source,
    /// `#pragma pack(1)` / `#pragma pack()`.
    Pack,
    /// `#pragma alias "c_name"` - applies to the next native declaration.
    Alias,
}

/// A variable declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDeclStmt {
    /// Variable name.
    pub name: String,
    /// Declared type.
    pub ty: Type,
    /// Optional initializer.
    pub initializer: Option<Expr>,
    /// `as val` / `as ref` modifier.
    pub mem_qualifier: MemoryQualifier,
    /// `sync` modifier for atomic variables.
    pub sync_modifier: SyncModifier,
}

impl VarDeclStmt {
    /// Declaration with default qualifiers.
    pub fn new(name: impl Into<String>, ty: Type, initializer: Option<Expr>) -> Self {
        Self {
            name: name.into(),
            ty,
            initializer,
            mem_qualifier: MemoryQualifier::Default,
            sync_modifier: SyncModifier::None,
        }
    }
}

/// A function definition or native declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionStmt {
    /// Function name.
    pub name: String,
    /// Parameters.
    pub params: Vec<Parameter>,
    /// Return type.
    pub return_type: Type,
    /// Body statements; empty for native declarations.
    pub body: Vec<Stmt>,
    /// `shared` / `private` modifier.
    pub modifier: FunctionModifier,
    /// Declared with `native`.
    pub is_native: bool,
    /// Variadic parameter list (`...`).
    pub is_variadic: bool,
    /// C function name alias from `#pragma alias`.
    pub c_alias: Option<String>,
}

impl FunctionStmt {
    /// Definition with default modifier and no alias.
    pub fn new(
        name: impl Into<String>,
        params: Vec<Parameter>,
        return_type: Type,
        body: Vec<Stmt>,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            return_type,
            body,
            modifier: FunctionModifier::Default,
            is_native: false,
            is_variadic: false,
            c_alias: None,
        }
    }
}

/// A struct declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructDeclStmt {
    /// Struct name.
    pub name: String,
    /// Field definitions.
    pub fields: Vec<StructField>,
    /// Method definitions.
    pub methods: Vec<StructMethod>,
    /// Declared with `native struct`.
    pub is_native: bool,
    /// Preceded by `#pragma pack(1)`.
    pub is_packed: bool,
    /// `as ref` - native methods receive self by pointer.
    pub pass_self_by_ref: bool,
    /// C type name alias.
    pub c_alias: Option<String>,
}

/// The statement variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// Expression statement.
    Expression {
        /// The expression.
        expr: Expr,
    },
    /// Variable declaration.
    VarDecl(VarDeclStmt),
    /// Function definition.
    Function(FunctionStmt),
    /// `return [value]`.
    Return {
        /// Optional return value.
        value: Option<Expr>,
    },
    /// `{ ... }` block with an optional arena modifier.
    Block {
        /// Statements.
        statements: Vec<Stmt>,
        /// shared/private arena modifier.
        modifier: BlockModifier,
    },
    /// `if` with optional else.
    If {
        /// Condition.
        condition: Expr,
        /// Then branch.
        then_branch: Box<Stmt>,
        /// Else branch.
        else_branch: Option<Box<Stmt>>,
    },
    /// `while` loop.
    While {
        /// Condition.
        condition: Expr,
        /// Body.
        body: Box<Stmt>,
        /// `shared` loop: no per-iteration arena.
        is_shared: bool,
    },
    /// C-style `for` loop.
    For {
        /// Initializer.
        initializer: Option<Box<Stmt>>,
        /// Condition.
        condition: Option<Expr>,
        /// Increment.
        increment: Option<Expr>,
        /// Body.
        body: Box<Stmt>,
        /// `shared` loop: no per-iteration arena.
        is_shared: bool,
    },
    /// `for x in iterable` loop.
    ForEach {
        /// Loop variable name.
        var_name: String,
        /// Iterable expression (array or range).
        iterable: Expr,
        /// Body.
        body: Box<Stmt>,
        /// `shared` loop: no per-iteration arena.
        is_shared: bool,
    },
    /// `break`.
    Break,
    /// `continue`.
    Continue,
    /// Module import, optionally namespaced.
    Import {
        /// Module name.
        module: String,
        /// Optional namespace identifier.
        namespace: Option<String>,
        /// The module was also imported without a namespace.
        also_imported_directly: bool,
    },
    /// `#pragma` directive.
    Pragma {
        /// Directive kind.
        kind: PragmaKind,
        /// Directive value (e.g. `<math.h>` or `m`).
        value: String,
        /// Directory of the declaring source file, for `source` pragmas.
        source_dir: Option<String>,
    },
    /// Type alias declaration (e.g. opaque `FILE`).
    TypeDecl {
        /// Alias name.
        name: String,
        /// Underlying type.
        ty: Type,
    },
    /// Struct declaration.
    StructDecl(StructDeclStmt),
    /// `lock(expr) => body` synchronized block.
    Lock {
        /// The sync variable to lock on.
        lock_expr: Expr,
        /// Block body.
        body: Box<Stmt>,
    },
}

impl Stmt {
    /// Expression statement helper.
    pub fn expr(expr: Expr) -> Self {
        Stmt::Expression { expr }
    }

    /// Plain block with default modifier.
    pub fn block(statements: Vec<Stmt>) -> Self {
        Stmt::Block {
            statements,
            modifier: BlockModifier::Default,
        }
    }
}

/// A parsed, annotated module: the unit of compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Top-level statements.
    pub statements: Vec<Stmt>,
    /// Source file name for diagnostics.
    pub filename: String,
}

impl Module {
    /// Empty module.
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            statements: Vec::new(),
            filename: filename.into(),
        }
    }

    /// Append a top-level statement.
    pub fn push(&mut self, stmt: Stmt) {
        self.statements.push(stmt);
    }

    /// Iterate over top-level function definitions.
    pub fn functions(&self) -> impl Iterator<Item = &FunctionStmt> {
        self.statements.iter().filter_map(|s| match s {
            Stmt::Function(f) => Some(f),
            _ => None,
        })
    }
}
