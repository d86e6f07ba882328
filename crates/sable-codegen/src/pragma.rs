//! Pragma collection.
//!
//! `#pragma` directives surface as statements; before emission the
//! generator walks the module and accumulates include, link, and source
//! lists (deduplicated in first-sighting order). `pack` and `alias`
//! pragmas act during parsing/resolution and carry nothing to collect.

use crate::CodeGen;
use sable_ast::{Module, PragmaKind, Stmt};

impl CodeGen<'_> {
    /// Walk the module and collect pragma directives.
    pub(crate) fn collect_pragmas(&mut self, module: &Module) {
        for stmt in &module.statements {
            self.collect_pragmas_stmt(stmt);
        }
    }

    fn collect_pragmas_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Pragma {
                kind,
                value,
                source_dir,
            } => match kind {
                PragmaKind::Include => self.add_pragma_include(value),
                PragmaKind::Link => self.add_pragma_link(value),
                PragmaKind::Source => {
                    let dir = source_dir.clone().unwrap_or_else(|| ".".to_string());
                    self.add_pragma_source(value, &dir);
                }
                PragmaKind::Pack | PragmaKind::Alias => {}
            },
            Stmt::Block { statements, .. } => {
                for stmt in statements {
                    self.collect_pragmas_stmt(stmt);
                }
            }
            Stmt::Function(f) => {
                for stmt in &f.body {
                    self.collect_pragmas_stmt(stmt);
                }
            }
            _ => {}
        }
    }

    pub(crate) fn add_pragma_include(&mut self, include: &str) {
        if !self.pragma_includes.iter().any(|i| i == include) {
            self.pragma_includes.push(include.to_string());
        }
    }

    pub(crate) fn add_pragma_link(&mut self, link: &str) {
        if !self.pragma_links.iter().any(|l| l == link) {
            self.pragma_links.push(link.to_string());
        }
    }

    pub(crate) fn add_pragma_source(&mut self, source: &str, dir: &str) {
        if !self.pragma_sources.iter().any(|(s, _)| s == source) {
            self.pragma_sources
                .push((source.to_string(), dir.to_string()));
        }
    }
}
