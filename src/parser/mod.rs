//! Language parser capability
//!
//! Architecture: Ports and Adapters - Parsers are pluggable adapters behind one trait
//! - Each parser extracts dependencies and exports from raw text for one language
//! - The registry selects a parser per file by capability match
//! - Parsers are heuristic; their precision is an approximation, not a contract

pub mod ecmascript;
pub mod python;
pub mod rust;

use crate::domain::{Dependency, ExportedSymbol, GuardianResult, Language, ProjectFile};
use std::sync::Arc;

pub use ecmascript::EcmaScriptParser;
pub use python::PythonParser;
pub use rust::RustParser;

/// Everything a parser extracts from one file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFile {
    pub dependencies: Vec<Dependency>,
    pub exports: Vec<ExportedSymbol>,
}

/// Contract every language parser implements
pub trait LanguageParser: Send + Sync {
    /// Language this parser handles
    fn language(&self) -> Language;

    /// File extensions (without the dot) this parser accepts
    fn extensions(&self) -> &'static [&'static str];

    /// Files tried when a specifier names a directory
    fn index_files(&self) -> &'static [&'static str] {
        &[]
    }

    /// Whether this parser can handle the given file
    fn can_parse(&self, file: &ProjectFile) -> bool {
        self.extensions().iter().any(|ext| ext.eq_ignore_ascii_case(&file.extension))
    }

    /// Extract dependencies whose `source` is `source_id`; targets are left as raw specifiers
    fn extract_imports(&self, source_id: &str, content: &str) -> GuardianResult<Vec<Dependency>>;

    /// Extract exported symbols
    fn extract_exports(&self, content: &str) -> GuardianResult<Vec<ExportedSymbol>>;

    /// Parse a file into dependencies and exports
    fn parse(&self, file: &ProjectFile, content: &str) -> GuardianResult<ParsedFile> {
        Ok(ParsedFile {
            dependencies: self.extract_imports(&file.relative_path, content)?,
            exports: self.extract_exports(content)?,
        })
    }

    /// Path-like candidates for resolving a dependency, tried in order.
    ///
    /// A candidate starting with `/` is anchored at the project root; any other candidate
    /// is relative to the importing file's directory. An empty list means the dependency
    /// is external to the project.
    fn resolution_candidates(&self, dependency: &Dependency) -> Vec<String> {
        if dependency.is_relative() {
            vec![dependency.specifier.clone()]
        } else {
            Vec::new()
        }
    }

    /// Release any resources held by the parser
    fn dispose(&self) {}
}

/// Ordered set of parsers; the first capability match wins
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn LanguageParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in parser
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EcmaScriptParser::typescript()));
        registry.register(Arc::new(EcmaScriptParser::javascript()));
        registry.register(Arc::new(PythonParser::new()));
        registry.register(Arc::new(RustParser::new()));
        registry
    }

    /// Registry restricted to the given languages; an empty list keeps every parser
    pub fn for_languages(languages: &[Language]) -> Self {
        let mut registry = Self::with_defaults();
        if !languages.is_empty() {
            registry.parsers.retain(|p| languages.contains(&p.language()));
        }
        registry
    }

    pub fn register(&mut self, parser: Arc<dyn LanguageParser>) {
        tracing::debug!("Registering {} parser", parser.language());
        self.parsers.push(parser);
    }

    /// Select the parser for a file by capability match
    pub fn for_file(&self, file: &ProjectFile) -> Option<&Arc<dyn LanguageParser>> {
        self.parsers.iter().find(|parser| parser.can_parse(file))
    }

    /// Whether any parser accepts the extension
    pub fn supports_extension(&self, extension: &str) -> bool {
        self.parsers
            .iter()
            .any(|p| p.extensions().iter().any(|ext| ext.eq_ignore_ascii_case(extension)))
    }

    /// Language of the first parser accepting the extension
    pub fn language_for_extension(&self, extension: &str) -> Option<Language> {
        self.parsers
            .iter()
            .find(|p| p.extensions().iter().any(|ext| ext.eq_ignore_ascii_case(extension)))
            .map(|p| p.language())
    }

    /// Every extension known to the registry, in registration order without duplicates
    pub fn extensions(&self) -> Vec<&'static str> {
        let mut all = Vec::new();
        for ext in self.parsers.iter().flat_map(|p| p.extensions().iter().copied()) {
            if !all.contains(&ext) {
                all.push(ext);
            }
        }
        all
    }

    /// Every index file name known to the registry, without duplicates
    pub fn index_files(&self) -> Vec<&'static str> {
        let mut all = Vec::new();
        for name in self.parsers.iter().flat_map(|p| p.index_files().iter().copied()) {
            if !all.contains(&name) {
                all.push(name);
            }
        }
        all
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    /// Dispose every parser
    pub fn dispose_all(&self) {
        for parser in &self.parsers {
            parser.dispose();
        }
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.parsers.iter().map(|p| p.language())).finish()
    }
}

/// 1-based line and column of a byte offset
pub(crate) fn line_col(content: &str, offset: usize) -> (u32, u32) {
    let before = &content[..offset.min(content.len())];
    let line = before.matches('\n').count() as u32 + 1;
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let column = before[line_start..].chars().count() as u32 + 1;
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::file;

    #[test]
    fn test_capability_match() {
        let registry = ParserRegistry::with_defaults();
        let mut ts = file("src/a.ts");
        ts.extension = "ts".into();
        let mut py = file("pkg/mod.py");
        py.extension = "py".into();
        let mut md = file("README.md");
        md.extension = "md".into();

        assert_eq!(registry.for_file(&ts).map(|p| p.language()), Some(Language::TypeScript));
        assert_eq!(registry.for_file(&py).map(|p| p.language()), Some(Language::Python));
        assert!(registry.for_file(&md).is_none());
    }

    #[test]
    fn test_language_restriction() {
        let registry = ParserRegistry::for_languages(&[Language::Rust]);
        assert_eq!(registry.len(), 1);
        assert!(registry.supports_extension("rs"));
        assert!(!registry.supports_extension("ts"));
        assert_eq!(ParserRegistry::for_languages(&[]).len(), 4);
    }

    #[test]
    fn test_line_col() {
        let content = "first\nsecond line\nthird";
        assert_eq!(line_col(content, 0), (1, 1));
        assert_eq!(line_col(content, 6), (2, 1));
        assert_eq!(line_col(content, 13), (2, 8));
    }
}
