//! TypeScript and JavaScript dependency extraction
//!
//! Architecture: Adapter - Regex heuristics over comment-masked source
//! - Static, side-effect, type-only, re-export, require and dynamic imports become edges
//! - Exported declarations and export lists become symbols
//! - Precision is best-effort; template strings and exotic syntax may be missed

use super::{line_col, LanguageParser};
use crate::domain::{
    Dependency, DependencyKind, ExportedSymbol, GuardianResult, ImportedName, Language, SymbolKind,
};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref IMPORT_FROM: Regex = Regex::new(
        r#"(?m)^[ \t]*import\s+(type\s+)?((?:[\w$]+\s*,?\s*)?(?:\*\s*as\s+[\w$]+|\{[^}]*\})?)\s*from\s*['"]([^'"\n]+)['"]"#
    )
    .expect("static import regex is valid");
    static ref SIDE_EFFECT: Regex =
        Regex::new(r#"(?m)^[ \t]*import\s*['"]([^'"\n]+)['"]"#).expect("side-effect regex is valid");
    static ref RE_EXPORT: Regex = Regex::new(
        r#"(?m)^[ \t]*export\s+(type\s+)?(\*(?:\s*as\s+[\w$]+)?|\{[^}]*\})\s*from\s*['"]([^'"\n]+)['"]"#
    )
    .expect("re-export regex is valid");
    static ref REQUIRE: Regex = Regex::new(r#"\brequire\s*\(\s*['"]([^'"\n]+)['"]\s*\)"#)
        .expect("require regex is valid");
    static ref DYNAMIC: Regex = Regex::new(r#"\bimport\s*\(\s*['"]([^'"\n]+)['"]\s*\)"#)
        .expect("dynamic import regex is valid");
    static ref EXPORT_DECL: Regex = Regex::new(
        r"(?m)^[ \t]*export\s+(default\s+)?(?:declare\s+)?(?:abstract\s+)?(?:async\s+)?(function\*?|class|interface|type|const\s+enum|enum|const|let|var|namespace|module)\s+([\w$]+)"
    )
    .expect("export declaration regex is valid");
    static ref EXPORT_DEFAULT: Regex = Regex::new(r"(?m)^[ \t]*export\s+default\s+([\w$]+)")
        .expect("export default regex is valid");
    static ref EXPORT_LIST: Regex = Regex::new(r"(?m)^[ \t]*export\s+(?:type\s+)?\{([^}]*)\}")
        .expect("export list regex is valid");
}

const DEFAULT_KEYWORDS: &[&str] =
    &["function", "class", "abstract", "async", "interface", "declare", "enum", "const"];

/// Parser for the ECMAScript family
#[derive(Debug, Clone)]
pub struct EcmaScriptParser {
    language: Language,
}

impl EcmaScriptParser {
    pub fn typescript() -> Self {
        Self { language: Language::TypeScript }
    }

    pub fn javascript() -> Self {
        Self { language: Language::JavaScript }
    }
}

impl LanguageParser for EcmaScriptParser {
    fn language(&self) -> Language {
        self.language
    }

    fn extensions(&self) -> &'static [&'static str] {
        match self.language {
            Language::TypeScript => &["ts", "tsx", "mts", "cts"],
            _ => &["js", "jsx", "mjs", "cjs"],
        }
    }

    fn index_files(&self) -> &'static [&'static str] {
        &["index.ts", "index.tsx", "index.js", "index.jsx", "index.mjs", "index.cjs"]
    }

    fn extract_imports(&self, source_id: &str, content: &str) -> GuardianResult<Vec<Dependency>> {
        let masked = mask_comments(content);
        let mut deps = Vec::new();

        for caps in IMPORT_FROM.captures_iter(&masked) {
            let whole = caps.get(0).map(|m| m.start()).unwrap_or(0);
            let spec = &caps[3];
            let type_only = caps.get(1).is_some();
            let kind = if type_only { DependencyKind::TypeImport } else { DependencyKind::Import };
            let (line, column) = line_col(content, first_non_space(&masked, whole));
            deps.push(
                Dependency::new(source_id, spec, kind, line, column)
                    .with_imports(parse_import_clause(&caps[2])),
            );
        }

        for caps in SIDE_EFFECT.captures_iter(&masked) {
            let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            let (line, column) = line_col(content, first_non_space(&masked, start));
            deps.push(Dependency::new(source_id, &caps[1], DependencyKind::SideEffect, line, column));
        }

        for caps in RE_EXPORT.captures_iter(&masked) {
            let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            let (line, column) = line_col(content, first_non_space(&masked, start));
            let mut dep = Dependency::new(source_id, &caps[3], DependencyKind::ReExport, line, column)
                .with_imports(parse_import_clause(&caps[2]));
            dep.is_type_only = caps.get(1).is_some();
            deps.push(dep);
        }

        for caps in REQUIRE.captures_iter(&masked) {
            let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            let (line, column) = line_col(content, start);
            deps.push(Dependency::new(source_id, &caps[1], DependencyKind::Require, line, column));
        }

        for caps in DYNAMIC.captures_iter(&masked) {
            let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            let (line, column) = line_col(content, start);
            deps.push(Dependency::new(
                source_id,
                &caps[1],
                DependencyKind::DynamicImport,
                line,
                column,
            ));
        }

        deps.sort_by_key(|d| (d.line, d.column));
        Ok(deps)
    }

    fn extract_exports(&self, content: &str) -> GuardianResult<Vec<ExportedSymbol>> {
        let masked = mask_comments(content);
        let mut exports = Vec::new();

        for caps in EXPORT_DECL.captures_iter(&masked) {
            let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            let (line, _) = line_col(content, start);
            let keyword = caps[2].split_whitespace().last().unwrap_or_default();
            let kind = match keyword.trim_end_matches('*') {
                "function" => SymbolKind::Function,
                "class" => SymbolKind::Class,
                "interface" => SymbolKind::Interface,
                "type" => SymbolKind::Type,
                "enum" => SymbolKind::Enum,
                "const" => SymbolKind::Constant,
                "namespace" | "module" => SymbolKind::Namespace,
                _ => SymbolKind::Variable,
            };
            let mut symbol = ExportedSymbol::new(&caps[3], kind, line);
            symbol.is_default = caps.get(1).is_some();
            exports.push(symbol);
        }

        for caps in EXPORT_DEFAULT.captures_iter(&masked) {
            if DEFAULT_KEYWORDS.contains(&&caps[1]) {
                continue;
            }
            let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            let (line, _) = line_col(content, start);
            let mut symbol = ExportedSymbol::new(&caps[1], SymbolKind::Variable, line);
            symbol.is_default = true;
            exports.push(symbol);
        }

        for caps in EXPORT_LIST.captures_iter(&masked) {
            let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            let (line, _) = line_col(content, start);
            for item in caps[1].split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let item = item.trim_start_matches("type ").trim();
                let exported = item.rsplit(" as ").next().unwrap_or(item).trim();
                let mut symbol = ExportedSymbol::new(exported, SymbolKind::Variable, line);
                symbol.is_default = exported == "default";
                exports.push(symbol);
            }
        }

        Ok(exports)
    }
}

/// Parse the clause between `import` and `from`
fn parse_import_clause(clause: &str) -> Vec<ImportedName> {
    let clause = clause.trim();
    let mut names = Vec::new();

    let (head, braces) = match (clause.find('{'), clause.rfind('}')) {
        (Some(open), Some(close)) if close > open => (&clause[..open], Some(&clause[open + 1..close])),
        _ => (clause, None),
    };

    for part in head.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if let Some(ns) = part.strip_prefix('*') {
            let alias = ns.trim().trim_start_matches("as").trim();
            names.push(ImportedName {
                name: "*".to_string(),
                alias: (!alias.is_empty()).then(|| alias.to_string()),
                is_default: false,
                is_namespace: true,
            });
        } else {
            names.push(ImportedName {
                name: part.to_string(),
                alias: None,
                is_default: true,
                is_namespace: false,
            });
        }
    }

    if let Some(inner) = braces {
        for item in inner.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let item = item.trim_start_matches("type ").trim();
            let mut parts = item.splitn(2, " as ");
            let name = parts.next().unwrap_or_default().trim();
            let imported = match parts.next() {
                Some(alias) => ImportedName::named(name).with_alias(alias.trim()),
                None => ImportedName::named(name),
            };
            names.push(ImportedName { is_default: name == "default", ..imported });
        }
    }

    names
}

fn first_non_space(text: &str, from: usize) -> usize {
    text[from..].find(|c: char| !c.is_whitespace()).map(|i| from + i).unwrap_or(from)
}

/// Blank out `//` and `/* */` comments, keeping byte offsets and newlines intact
pub(crate) fn mask_comments(content: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Code,
        Str(char),
        Line,
        Block,
    }

    let mut out = String::with_capacity(content.len());
    let mut state = State::Code;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    state = State::Line;
                    out.push(' ');
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = State::Block;
                    out.push_str("  ");
                }
                '\'' | '"' | '`' => {
                    state = State::Str(c);
                    out.push(c);
                }
                _ => out.push(c),
            },
            State::Str(quote) => {
                out.push(c);
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == quote || (c == '\n' && quote != '`') {
                    state = State::Code;
                }
            }
            State::Line => {
                if c == '\n' {
                    state = State::Code;
                    out.push('\n');
                } else {
                    push_blank(&mut out, c);
                }
            }
            State::Block => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Code;
                    out.push_str("  ");
                } else if c == '\n' {
                    out.push('\n');
                } else {
                    push_blank(&mut out, c);
                }
            }
        }
    }

    out
}

fn push_blank(out: &mut String, c: char) {
    for _ in 0..c.len_utf8() {
        out.push(' ');
    }
}
