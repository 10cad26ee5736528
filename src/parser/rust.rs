//! Rust dependency extraction using syn for AST parsing
//!
//! Architecture: Adapter - Translates syn item trees into graph edges
//! - `use` trees are flattened and grouped by module path, one edge per path per item
//! - `mod foo;` declarations become edges to the child module file
//! - Paths that stay inside the file (inline modules) never become edges

use super::LanguageParser;
use crate::domain::{
    Dependency, DependencyKind, ExportedSymbol, GuardianError, GuardianResult, ImportedName,
    Language, SymbolKind,
};
use syn::visit::Visit;

/// Parser for `.rs` files
#[derive(Debug, Clone, Default)]
pub struct RustParser;

impl RustParser {
    pub fn new() -> Self {
        Self
    }
}

impl LanguageParser for RustParser {
    fn language(&self) -> Language {
        Language::Rust
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["rs"]
    }

    fn index_files(&self) -> &'static [&'static str] {
        &["mod.rs", "lib.rs", "main.rs"]
    }

    fn extract_imports(&self, source_id: &str, content: &str) -> GuardianResult<Vec<Dependency>> {
        let syntax_tree =
            syn::parse_file(content).map_err(|e| GuardianError::parse(source_id, e.to_string()))?;

        let mut visitor = UseVisitor { source: source_id, depth: 0, dependencies: Vec::new() };
        visitor.visit_file(&syntax_tree);
        Ok(visitor.dependencies)
    }

    fn extract_exports(&self, content: &str) -> GuardianResult<Vec<ExportedSymbol>> {
        let syntax_tree =
            syn::parse_file(content).map_err(|e| GuardianError::parse("<rust>", e.to_string()))?;

        let exports = syntax_tree
            .items
            .iter()
            .filter_map(|item| {
                let (vis, ident, kind) = match item {
                    syn::Item::Fn(f) => (&f.vis, &f.sig.ident, SymbolKind::Function),
                    syn::Item::Struct(s) => (&s.vis, &s.ident, SymbolKind::Class),
                    syn::Item::Enum(e) => (&e.vis, &e.ident, SymbolKind::Enum),
                    syn::Item::Trait(t) => (&t.vis, &t.ident, SymbolKind::Interface),
                    syn::Item::Type(t) => (&t.vis, &t.ident, SymbolKind::Type),
                    syn::Item::Const(c) => (&c.vis, &c.ident, SymbolKind::Constant),
                    syn::Item::Static(s) => (&s.vis, &s.ident, SymbolKind::Variable),
                    syn::Item::Mod(m) => (&m.vis, &m.ident, SymbolKind::Module),
                    _ => return None,
                };
                matches!(vis, syn::Visibility::Public(_))
                    .then(|| ExportedSymbol::new(ident.to_string(), kind, span_line(ident.span())))
            })
            .collect();

        Ok(exports)
    }

    /// Candidates are anchored at the project root and derived from module-path rules:
    /// `crate` is the nearest `src` directory, `self` the current module's directory,
    /// and each `super` one directory up from there.
    fn resolution_candidates(&self, dependency: &Dependency) -> Vec<String> {
        let source = dependency.source.as_str();

        if dependency.kind == DependencyKind::ModDecl {
            return vec![format!("/{}", join(&children_dir(source), &dependency.specifier))];
        }

        let segments: Vec<&str> = dependency.specifier.split("::").collect();
        let (base, rest) = match segments.first().copied() {
            Some("crate") => (crate_root(source), &segments[1..]),
            Some("self") => (children_dir(source), &segments[1..]),
            Some("super") => {
                let ups = segments.iter().take_while(|s| **s == "super").count();
                let mut base = children_dir(source);
                for _ in 0..ups {
                    base = parent(&base).to_string();
                }
                (base, &segments[ups..])
            }
            _ => return Vec::new(),
        };

        let module = rest.iter().fold(base, |acc, seg| join(&acc, seg));
        let mut candidates: Vec<String> = dependency
            .imports
            .iter()
            .filter(|name| name.name != "*" && name.name != "self")
            .map(|name| format!("/{}", join(&module, &name.name)))
            .collect();

        let mut current = module;
        for _ in 0..=rest.len() {
            candidates.push(format!("/{current}"));
            current = parent(&current).to_string();
        }
        candidates
    }
}

struct UseVisitor<'a> {
    source: &'a str,
    /// Nesting depth of inline `mod x { ... }` blocks
    depth: usize,
    dependencies: Vec<Dependency>,
}

impl<'ast> Visit<'ast> for UseVisitor<'_> {
    fn visit_item_use(&mut self, item: &'ast syn::ItemUse) {
        let start = item.use_token.span.start();
        let mut leaves = Vec::new();
        flatten_use_tree(&item.tree, &mut Vec::new(), &mut leaves);
        let external_root = item.leading_colon.is_some();

        let mut grouped: Vec<(String, Vec<ImportedName>)> = Vec::new();
        for (prefix, name) in leaves {
            let Some(specifier) = self.rebase(&prefix, &name, external_root) else {
                continue;
            };
            match grouped.iter_mut().find(|(spec, _)| *spec == specifier) {
                Some((_, names)) => names.push(name),
                None => grouped.push((specifier, vec![name])),
            }
        }

        for (specifier, names) in grouped {
            self.dependencies.push(
                Dependency::new(
                    self.source,
                    specifier,
                    DependencyKind::Use,
                    start.line as u32,
                    start.column as u32 + 1,
                )
                .with_imports(names),
            );
        }
    }

    fn visit_item_mod(&mut self, item: &'ast syn::ItemMod) {
        match &item.content {
            Some(_) => {
                self.depth += 1;
                syn::visit::visit_item_mod(self, item);
                self.depth -= 1;
            }
            None if self.depth == 0 => {
                let start = item.mod_token.span.start();
                self.dependencies.push(Dependency::new(
                    self.source,
                    item.ident.to_string(),
                    DependencyKind::ModDecl,
                    start.line as u32,
                    start.column as u32 + 1,
                ));
            }
            None => {}
        }
    }

    fn visit_item_extern_crate(&mut self, item: &'ast syn::ItemExternCrate) {
        let start = item.extern_token.span.start();
        let mut name = ImportedName::named(item.ident.to_string());
        if let Some((_, alias)) = &item.rename {
            name = name.with_alias(alias.to_string());
        }
        self.dependencies.push(
            Dependency::new(
                self.source,
                item.ident.to_string(),
                DependencyKind::ExternCrate,
                start.line as u32,
                start.column as u32 + 1,
            )
            .with_imports(vec![name]),
        );
    }
}

impl UseVisitor<'_> {
    /// Turn a use-path prefix into a specifier as seen from the file's top level.
    /// Returns `None` for paths that resolve inside the file.
    fn rebase(&self, prefix: &[String], name: &ImportedName, external_root: bool) -> Option<String> {
        let mut path: Vec<String> = prefix.to_vec();
        if path.is_empty() {
            // `use foo;` or `use foo as bar;`: the name is the module
            path.push(name.name.clone());
        }
        if external_root || self.depth == 0 {
            return Some(path.join("::"));
        }

        match path[0].as_str() {
            "self" => None,
            "super" => {
                let ups = path.iter().take_while(|s| *s == "super").count();
                if ups <= self.depth {
                    return None;
                }
                let mut rebased = vec!["super".to_string(); ups - self.depth];
                rebased.extend(path[ups..].iter().cloned());
                Some(rebased.join("::"))
            }
            _ => Some(path.join("::")),
        }
    }
}

fn flatten_use_tree(
    tree: &syn::UseTree,
    prefix: &mut Vec<String>,
    leaves: &mut Vec<(Vec<String>, ImportedName)>,
) {
    match tree {
        syn::UseTree::Path(path) => {
            prefix.push(path.ident.to_string());
            flatten_use_tree(&path.tree, prefix, leaves);
            prefix.pop();
        }
        syn::UseTree::Name(name) => {
            leaves.push((prefix.clone(), ImportedName::named(name.ident.to_string())));
        }
        syn::UseTree::Rename(rename) => {
            let imported =
                ImportedName::named(rename.ident.to_string()).with_alias(rename.rename.to_string());
            leaves.push((prefix.clone(), imported));
        }
        syn::UseTree::Glob(_) => {
            let mut imported = ImportedName::named("*");
            imported.is_namespace = true;
            leaves.push((prefix.clone(), imported));
        }
        syn::UseTree::Group(group) => {
            for item in &group.items {
                flatten_use_tree(item, prefix, leaves);
            }
        }
    }
}

fn span_line(span: proc_macro2::Span) -> u32 {
    span.start().line as u32
}

fn parent(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Directory holding the child modules of the module defined by `source`
fn children_dir(source: &str) -> String {
    let dir = parent(source);
    let file = source.rsplit('/').next().unwrap_or(source);
    match file.trim_end_matches(".rs") {
        "mod" | "lib" | "main" => dir.to_string(),
        stem => join(dir, stem),
    }
}

/// Nearest enclosing `src` directory, else the file's own directory
fn crate_root(source: &str) -> String {
    let dir = parent(source);
    let segments: Vec<&str> = dir.split('/').collect();
    match segments.iter().rposition(|s| *s == "src") {
        Some(idx) => segments[..=idx].join("/"),
        None => dir.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
use std::collections::{BTreeMap, HashMap};
use crate::graph::DependencyGraph;
use super::{line_col, LanguageParser as Parser};
extern crate serde;

pub mod helpers;
mod inline {
    use super::*;
    use crate::domain::Severity;
}

pub fn visible() {}
fn hidden() {}
pub struct Thing;
pub trait Behaviour {}
"#;

    #[test]
    fn test_extract_imports() {
        let deps = RustParser::new().extract_imports("src/parser/rust.rs", SOURCE).unwrap();
        let specs: Vec<_> = deps.iter().map(|d| (d.specifier.as_str(), d.kind)).collect();

        assert_eq!(
            specs,
            vec![
                ("std::collections", DependencyKind::Use),
                ("crate::graph", DependencyKind::Use),
                ("super", DependencyKind::Use),
                ("serde", DependencyKind::ExternCrate),
                ("helpers", DependencyKind::ModDecl),
                ("crate::domain", DependencyKind::Use),
            ]
        );
        assert_eq!(deps[0].imports.len(), 2);
        assert_eq!(deps[0].line, 2);
        assert_eq!(deps[2].imports[1].alias.as_deref(), Some("Parser"));
    }

    #[test]
    fn test_invalid_source_is_a_parse_error() {
        let result = RustParser::new().extract_imports("src/bad.rs", "fn broken( {");
        assert!(matches!(result, Err(GuardianError::Parse { .. })));
    }

    #[test]
    fn test_exports_are_public_items() {
        let exports = RustParser::new().extract_exports(SOURCE).unwrap();
        let names: Vec<_> = exports.iter().map(|e| (e.name.as_str(), e.kind)).collect();

        assert_eq!(
            names,
            vec![
                ("helpers", SymbolKind::Module),
                ("visible", SymbolKind::Function),
                ("Thing", SymbolKind::Class),
                ("Behaviour", SymbolKind::Interface),
            ]
        );
    }

    #[test]
    fn test_resolution_candidates() {
        let parser = RustParser::new();
        let crate_path = Dependency::new("src/parser/rust.rs", "crate::graph", DependencyKind::Use, 1, 1)
            .with_imports(vec![ImportedName::named("DependencyGraph")]);
        let super_path = Dependency::new("src/parser/rust.rs", "super", DependencyKind::Use, 1, 1);
        let module = Dependency::new("src/lib.rs", "graph", DependencyKind::ModDecl, 1, 1);
        let nested = Dependency::new("src/scanner.rs", "filter", DependencyKind::ModDecl, 1, 1);
        let external = Dependency::new("src/lib.rs", "std::fmt", DependencyKind::Use, 1, 1);

        assert_eq!(
            parser.resolution_candidates(&crate_path),
            vec!["/src/graph/DependencyGraph", "/src/graph", "/src"]
        );
        assert_eq!(parser.resolution_candidates(&super_path), vec!["/src/parser"]);
        assert_eq!(parser.resolution_candidates(&module), vec!["/src/graph"]);
        assert_eq!(parser.resolution_candidates(&nested), vec!["/src/scanner/filter"]);
        assert!(parser.resolution_candidates(&external).is_empty());
    }

    #[test]
    fn test_module_directories() {
        assert_eq!(children_dir("src/lib.rs"), "src");
        assert_eq!(children_dir("src/graph/mod.rs"), "src/graph");
        assert_eq!(children_dir("src/graph.rs"), "src/graph");
        assert_eq!(crate_root("crates/core/src/a/b.rs"), "crates/core/src");
        assert_eq!(crate_root("build.rs"), "");
    }
}
