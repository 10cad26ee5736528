//! Python dependency extraction
//!
//! Architecture: Adapter - Line-oriented regex heuristics over comment-masked source
//! - `import a.b` and `from x import y` both become edges
//! - Relative imports map onto path candidates; absolute modules are tried from the root

use super::{line_col, LanguageParser};
use crate::domain::{
    Dependency, DependencyKind, ExportedSymbol, GuardianResult, ImportedName, Language, SymbolKind,
};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref IMPORT: Regex = Regex::new(r"(?m)^[ \t]*import[ \t]+([\w.]+(?:[ \t]+as[ \t]+\w+)?(?:[ \t]*,[ \t]*[\w.]+(?:[ \t]+as[ \t]+\w+)?)*)")
        .expect("import regex is valid");
    static ref FROM_IMPORT: Regex = Regex::new(
        r"(?m)^[ \t]*from[ \t]+(\.*[\w.]*)[ \t]+import[ \t]+(\([^)]*\)|[^\n]+)"
    )
    .expect("from-import regex is valid");
    static ref DEF: Regex = Regex::new(r"(?m)^(?:async[ \t]+)?(def|class)[ \t]+([A-Za-z]\w*)")
        .expect("definition regex is valid");
    static ref CONSTANT: Regex = Regex::new(r"(?m)^([A-Z][A-Z0-9_]*)[ \t]*(?::[^=\n]+)?=[^=]")
        .expect("constant regex is valid");
}

#[derive(Debug, Clone, Default)]
pub struct PythonParser;

impl PythonParser {
    pub fn new() -> Self {
        Self
    }
}

impl LanguageParser for PythonParser {
    fn language(&self) -> Language {
        Language::Python
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["py", "pyi"]
    }

    fn index_files(&self) -> &'static [&'static str] {
        &["__init__.py"]
    }

    fn extract_imports(&self, source_id: &str, content: &str) -> GuardianResult<Vec<Dependency>> {
        let masked = mask_comments(content);
        let mut deps = Vec::new();

        for caps in IMPORT.captures_iter(&masked) {
            let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            let (line, column) = line_col(content, start + leading_ws(&masked[start..]));
            for item in caps[1].split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let mut parts = item.split_whitespace();
                let module = parts.next().unwrap_or_default();
                let alias = parts.nth(1);
                let mut name = ImportedName::named(module);
                name.is_namespace = true;
                if let Some(alias) = alias {
                    name = name.with_alias(alias);
                }
                deps.push(
                    Dependency::new(source_id, module, DependencyKind::Import, line, column)
                        .with_imports(vec![name]),
                );
            }
        }

        for caps in FROM_IMPORT.captures_iter(&masked) {
            let module = &caps[1];
            if module.is_empty() {
                continue;
            }
            let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            let (line, column) = line_col(content, start + leading_ws(&masked[start..]));
            deps.push(
                Dependency::new(source_id, module, DependencyKind::FromImport, line, column)
                    .with_imports(parse_names(&caps[2])),
            );
        }

        deps.sort_by_key(|d| (d.line, d.column));
        Ok(deps)
    }

    fn extract_exports(&self, content: &str) -> GuardianResult<Vec<ExportedSymbol>> {
        let mut exports = Vec::new();

        for caps in DEF.captures_iter(content) {
            let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            let (line, _) = line_col(content, start);
            let kind = if &caps[1] == "class" { SymbolKind::Class } else { SymbolKind::Function };
            exports.push(ExportedSymbol::new(&caps[2], kind, line));
        }

        for caps in CONSTANT.captures_iter(content) {
            let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            let (line, _) = line_col(content, start);
            exports.push(ExportedSymbol::new(&caps[1], SymbolKind::Constant, line));
        }

        exports.sort_by_key(|e| e.line);
        Ok(exports)
    }

    fn resolution_candidates(&self, dependency: &Dependency) -> Vec<String> {
        let spec = dependency.specifier.as_str();
        let dots = spec.chars().take_while(|c| *c == '.').count();

        if dots == 0 {
            // Absolute module; only a project-local package can resolve
            return vec![format!("/{}", spec.replace('.', "/"))];
        }

        let prefix = if dots == 1 { "./".to_string() } else { "../".repeat(dots - 1) };
        let rest = spec[dots..].replace('.', "/");

        if !rest.is_empty() {
            return vec![format!("{prefix}{rest}")];
        }

        // `from . import x`: each imported name may be a submodule, else the package itself
        let mut candidates: Vec<String> = dependency
            .imports
            .iter()
            .filter(|name| name.name != "*")
            .map(|name| format!("{prefix}{}", name.name))
            .collect();
        candidates.push(prefix.trim_end_matches('/').to_string());
        candidates
    }
}

fn parse_names(clause: &str) -> Vec<ImportedName> {
    clause
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|item| {
            let mut parts = item.split_whitespace();
            let name = parts.next().unwrap_or_default();
            let imported = match parts.nth(1) {
                Some(alias) => ImportedName::named(name).with_alias(alias),
                None => ImportedName::named(name),
            };
            ImportedName { is_namespace: name == "*", ..imported }
        })
        .collect()
}

fn leading_ws(text: &str) -> usize {
    text.len() - text.trim_start_matches([' ', '\t']).len()
}

/// Blank out `#` comments outside string literals, keeping offsets intact
fn mask_comments(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for line in content.split_inclusive('\n') {
        let mut quote: Option<char> = None;
        let mut cut = None;
        let mut escaped = false;
        for (i, c) in line.char_indices() {
            match quote {
                Some(q) => {
                    if escaped {
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == q {
                        quote = None;
                    }
                }
                None => match c {
                    '\'' | '"' => quote = Some(c),
                    '#' => {
                        cut = Some(i);
                        break;
                    }
                    _ => {}
                },
            }
        }
        match cut {
            Some(i) => {
                out.push_str(&line[..i]);
                let tail = &line[i..];
                let newline = tail.ends_with('\n');
                let blank = tail.len() - usize::from(newline);
                out.extend(std::iter::repeat(' ').take(blank));
                if newline {
                    out.push('\n');
                }
            }
            None => out.push_str(line),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imports(content: &str) -> Vec<Dependency> {
        PythonParser::new().extract_imports("pkg/app.py", content).unwrap()
    }

    #[test]
    fn test_import_statements() {
        let deps = imports(
            "import os\nimport numpy as np, pkg.util\n# import hidden\nfrom .models import User, Group as G\nfrom .. import helpers\nfrom typing import (\n    List,\n    Dict,\n)\n",
        );
        let specs: Vec<_> = deps.iter().map(|d| d.specifier.as_str()).collect();

        assert_eq!(specs, vec!["os", "numpy", "pkg.util", ".models", "..", "typing"]);
        assert_eq!(deps[1].imports[0].alias.as_deref(), Some("np"));
        assert_eq!(deps[3].kind, DependencyKind::FromImport);
        assert_eq!(deps[3].line, 4);
        assert_eq!(deps[3].imports[1].alias.as_deref(), Some("G"));
        assert_eq!(deps[5].imports.len(), 2);
    }

    #[test]
    fn test_resolution_candidates() {
        let parser = PythonParser::new();
        let relative = Dependency::new("pkg/app.py", ".models", DependencyKind::FromImport, 1, 1);
        let parent = Dependency::new("pkg/app.py", "..core.db", DependencyKind::FromImport, 1, 1);
        let absolute = Dependency::new("pkg/app.py", "pkg.util", DependencyKind::Import, 1, 1);
        let bare = Dependency::new("pkg/app.py", ".", DependencyKind::FromImport, 1, 1)
            .with_imports(vec![ImportedName::named("helpers")]);

        assert_eq!(parser.resolution_candidates(&relative), vec!["./models"]);
        assert_eq!(parser.resolution_candidates(&parent), vec!["../core/db"]);
        assert_eq!(parser.resolution_candidates(&absolute), vec!["/pkg/util"]);
        assert_eq!(parser.resolution_candidates(&bare), vec!["./helpers", "."]);
    }

    #[test]
    fn test_exports_skip_private_names() {
        let exports = PythonParser::new()
            .extract_exports(
                "MAX_SIZE = 10\n_hidden = 1\nclass Service:\n    def method(self):\n        pass\ndef _private():\n    pass\nasync def fetch():\n    pass\n",
            )
            .unwrap();
        let names: Vec<_> = exports.iter().map(|e| e.name.as_str()).collect();

        assert_eq!(names, vec!["MAX_SIZE", "Service", "fetch"]);
    }

    #[test]
    fn test_hash_inside_string_is_not_a_comment() {
        let masked = mask_comments("x = '#not'  # real\n");
        assert!(masked.starts_with("x = '#not'"));
        assert!(!masked.contains("real"));
        assert_eq!(masked.len(), "x = '#not'  # real\n".len());
    }
}
