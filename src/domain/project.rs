//! Project data model: files, the dependencies between them, and the symbols they export

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Source languages the scanner knows how to route to a parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    TypeScript,
    JavaScript,
    Python,
    Rust,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TypeScript => "typescript",
            Self::JavaScript => "javascript",
            Self::Python => "python",
            Self::Rust => "rust",
        }
    }

    /// Detect the language from a file extension (without the leading dot)
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "ts" | "tsx" | "mts" | "cts" => Some(Self::TypeScript),
            "js" | "jsx" | "mjs" | "cjs" => Some(Self::JavaScript),
            "py" | "pyi" => Some(Self::Python),
            "rs" => Some(Self::Rust),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file node in the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFile {
    /// Absolute path on disk
    pub path: PathBuf,
    /// POSIX-normalized path relative to the project root; the node key
    pub relative_path: String,
    pub language: Language,
    pub extension: String,
    /// Layer name, when the file falls inside a configured layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
    /// SHA-256 of the file's text
    pub content_hash: String,
    /// Symbols the file exports, as reported by its parser
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exports: Vec<ExportedSymbol>,
}

/// How a dependency was expressed in source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyKind {
    Import,
    Require,
    DynamicImport,
    ReExport,
    SideEffect,
    TypeImport,
    /// Python `from x import y`
    FromImport,
    /// Rust `use` declaration
    Use,
    /// Rust `mod foo;` declaration
    ModDecl,
    /// Rust `extern crate`
    ExternCrate,
}

/// One name brought in by an import statement
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedName {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_namespace: bool,
}

impl ImportedName {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), alias: None, is_default: false, is_namespace: false }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

/// An edge payload: one import site in a source file.
///
/// `target` is the node id of the resolved file when the specifier resolves inside the
/// project, and the raw specifier otherwise. The raw text is always kept in `specifier`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub source: String,
    pub target: String,
    pub specifier: String,
    #[serde(rename = "type")]
    pub kind: DependencyKind,
    pub line: u32,
    pub column: u32,
    #[serde(default)]
    pub imports: Vec<ImportedName>,
    #[serde(default)]
    pub is_dynamic: bool,
    #[serde(default)]
    pub is_type_only: bool,
}

impl Dependency {
    /// Create an unresolved dependency whose target is the raw specifier
    pub fn new(
        source: impl Into<String>,
        specifier: impl Into<String>,
        kind: DependencyKind,
        line: u32,
        column: u32,
    ) -> Self {
        let specifier = specifier.into();
        Self {
            source: source.into(),
            target: specifier.clone(),
            specifier,
            is_dynamic: matches!(kind, DependencyKind::DynamicImport),
            is_type_only: matches!(kind, DependencyKind::TypeImport),
            kind,
            line,
            column,
            imports: Vec::new(),
        }
    }

    pub fn with_imports(mut self, imports: Vec<ImportedName>) -> Self {
        self.imports = imports;
        self
    }

    /// Whether the specifier is a path relative to the importing file or project root
    pub fn is_relative(&self) -> bool {
        is_relative_specifier(&self.specifier)
    }

    /// Whether the scanner resolved this edge to a project file
    pub fn is_resolved(&self) -> bool {
        self.target != self.specifier
    }
}

/// Whether a module specifier names a path rather than a package.
///
/// Covers `./x`, `../x`, root-anchored `/x` and Python's dotted relative form `.x`.
pub fn is_relative_specifier(specifier: &str) -> bool {
    specifier.starts_with('.') || specifier.starts_with('/')
}

/// Kinds of exported symbols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Class,
    Interface,
    Type,
    Enum,
    Variable,
    Constant,
    Namespace,
    Module,
}

/// A symbol a file makes visible to others
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedSymbol {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SymbolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_annotation: Option<String>,
}

impl ExportedSymbol {
    pub fn new(name: impl Into<String>, kind: SymbolKind, line: u32) -> Self {
        Self { name: name.into(), kind, line: Some(line), is_default: false, type_annotation: None }
    }
}

/// Convert a path to the POSIX form used as a node key.
///
/// `.` segments are dropped and `..` pops the previous segment; the result never
/// starts with `./` and always uses `/`.
pub fn normalize_relative(path: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("ts", Some(Language::TypeScript))]
    #[case("TSX", Some(Language::TypeScript))]
    #[case("mjs", Some(Language::JavaScript))]
    #[case("py", Some(Language::Python))]
    #[case("rs", Some(Language::Rust))]
    #[case("md", None)]
    fn test_language_from_extension(#[case] ext: &str, #[case] expected: Option<Language>) {
        assert_eq!(Language::from_extension(ext), expected);
    }

    #[rstest]
    #[case("./util", true)]
    #[case("../shared/x", true)]
    #[case("/src/app", true)]
    #[case("..models", true)]
    #[case("react", false)]
    #[case("@scope/pkg", false)]
    #[case("crate::graph", false)]
    fn test_relative_specifier(#[case] spec: &str, #[case] expected: bool) {
        assert_eq!(is_relative_specifier(spec), expected);
    }

    #[test]
    fn test_normalize_relative() {
        assert_eq!(normalize_relative(Path::new("./src/app/../ui/Page.ts")), "src/ui/Page.ts");
        assert_eq!(normalize_relative(Path::new("src/./lib.rs")), "src/lib.rs");
    }

    #[test]
    fn test_new_dependency_is_unresolved() {
        let dep = Dependency::new("src/a.ts", "./b", DependencyKind::DynamicImport, 3, 1);
        assert_eq!(dep.target, "./b");
        assert!(dep.is_dynamic);
        assert!(dep.is_relative());
        assert!(!dep.is_resolved());
    }
}
