//! Native extern declaration emission.

use crate::types::{declare, mangle};
use crate::{CodeGen, Result};
use sable_ast::{FunctionStmt, Module, Stmt, Type};

/// C standard library names that must not be re-externed: their prototypes
/// come from the pragma includes, and a conflicting declaration is a
/// compile error on strict toolchains.
const C_STDLIB_NAMES: &[&str] = &[
    // stdlib.h
    "atoi", "atol", "atoll", "atof", "strtol", "strtoll", "strtoul", "strtoull", "strtod",
    "strtof", "strtold", "malloc", "calloc", "realloc", "free", "abort", "exit", "_Exit",
    "atexit", "at_quick_exit", "quick_exit", "system", "getenv", "abs", "labs", "llabs", "div",
    "ldiv", "lldiv", "rand", "srand", "qsort", "bsearch", "mblen", "mbtowc", "wctomb",
    "mbstowcs", "wcstombs",
    // string.h
    "strlen", "strcmp", "strncmp", "strcpy", "strncpy", "strcat", "strncat", "memcpy",
    "memmove", "memcmp", "memset", "memchr", "strchr", "strrchr", "strstr", "strtok",
    "strerror", "strpbrk", "strspn", "strcspn", "strcoll", "strxfrm",
    // stdio.h
    "printf", "fprintf", "sprintf", "snprintf", "vprintf", "vfprintf", "vsprintf", "vsnprintf",
    "scanf", "fscanf", "sscanf", "fopen", "fclose", "fread", "fwrite", "fgets", "fputs",
    "gets", "puts", "getchar", "putchar", "getc", "putc", "fgetc", "fputc", "ungetc", "fseek",
    "ftell", "rewind", "feof", "ferror", "clearerr", "perror", "remove", "rename", "tmpfile",
    "tmpnam", "fflush", "freopen", "setbuf", "setvbuf", "fgetpos", "fsetpos",
    // setjmp.h
    "setjmp", "longjmp",
];

/// True when `name` belongs to the C standard library allow-list.
pub(crate) fn is_c_stdlib_function(name: &str) -> bool {
    C_STDLIB_NAMES.contains(&name)
}

impl CodeGen<'_> {
    /// Emit `extern` declarations for every native function the module
    /// declares, deduplicated and skipping C standard library names.
    pub(crate) fn emit_native_externs(&mut self, module: &Module) -> Result<()> {
        let mut seen = Vec::new();
        for stmt in &module.statements {
            let Stmt::Function(f) = stmt else { continue };
            if !f.is_native {
                continue;
            }
            let c_name = f.c_alias.clone().unwrap_or_else(|| f.name.clone());
            if is_c_stdlib_function(&c_name) || seen.contains(&c_name) {
                continue;
            }
            seen.push(c_name.clone());
            let decl = self.native_extern_declaration(f, &c_name)?;
            self.top.push_str(&decl);
        }
        if !seen.is_empty() {
            self.top.push('\n');
        }
        Ok(())
    }

    fn native_extern_declaration(&mut self, f: &FunctionStmt, c_name: &str) -> Result<String> {
        // Native signatures use raw C types: char* for strings, element
        // pointers for arrays. (Arena-taking natives keep handle types and
        // lead with the arena parameter.)
        let takes_arena = f
            .params
            .first()
            .is_some_and(|p| matches!(p.ty, Type::Opaque(ref n) if n == "RtManagedArena"));
        let ret = match &f.return_type {
            Type::Str if takes_arena => "RtHandle".to_string(),
            Type::Str => "char *".to_string(),
            Type::Array(_) if takes_arena => "RtHandle".to_string(),
            Type::Array(elem) => format!("{} *", self.c_type(elem)?),
            other => self.c_type(other)?,
        };
        let mut params = Vec::new();
        for p in &f.params {
            let base = if takes_arena {
                self.c_type(&p.ty)?
            } else {
                self.c_native_param_type(&p.ty)?
            };
            // `as ref` primitives and structs arrive by pointer.
            if p.mem_qualifier == sable_ast::MemoryQualifier::AsRef {
                params.push(format!("{base} *{}", mangle(&p.name)));
            } else {
                params.push(declare(&base, &mangle(&p.name)));
            }
        }
        if f.is_variadic {
            params.push("...".to_string());
        }
        let params = if params.is_empty() {
            "void".to_string()
        } else {
            params.join(", ")
        };
        Ok(format!(
            "extern {};\n",
            declare(&ret, &format!("{c_name}({params})"))
        ))
    }
}
