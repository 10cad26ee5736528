//! Module specifier resolution
//!
//! Turns the path-like candidates a parser offers into node ids by probing, in order,
//! the exact path, each known extension, and each known index file.

use crate::domain::Dependency;
use crate::parser::{LanguageParser, ParserRegistry};

/// Resolves dependencies against a set of existing project files
pub(crate) struct Resolver<F>
where
    F: Fn(&str) -> bool,
{
    extensions: Vec<&'static str>,
    index_files: Vec<&'static str>,
    exists: F,
}

impl<F> Resolver<F>
where
    F: Fn(&str) -> bool,
{
    /// `exists` answers whether a root-relative POSIX path is a scannable project file
    pub(crate) fn new(registry: &ParserRegistry, parser: &dyn LanguageParser, exists: F) -> Self {
        let mut extensions: Vec<&'static str> = parser.extensions().to_vec();
        for ext in registry.extensions() {
            if !extensions.contains(&ext) {
                extensions.push(ext);
            }
        }

        let mut index_files: Vec<&'static str> = parser.index_files().to_vec();
        for index in registry.index_files() {
            if !index_files.contains(&index) {
                index_files.push(index);
            }
        }

        Self { extensions, index_files, exists }
    }

    /// Point each dependency's `target` at the node it resolves to, if any.
    /// A file never resolves to itself.
    pub(crate) fn resolve_all(&self, parser: &dyn LanguageParser, dependencies: &mut [Dependency]) {
        for dependency in dependencies.iter_mut() {
            let candidates = parser.resolution_candidates(dependency);
            let resolved = candidates
                .iter()
                .filter_map(|c| self.resolve_candidate(&dependency.source, c))
                .find(|target| *target != dependency.source);
            match resolved {
                Some(target) => dependency.target = target,
                None => dependency.target = dependency.specifier.clone(),
            }
        }
    }

    /// Resolve one candidate; `/`-prefixed candidates are anchored at the project root
    pub(crate) fn resolve_candidate(&self, source: &str, candidate: &str) -> Option<String> {
        let base = match candidate.strip_prefix('/') {
            Some(anchored) => normalize_within(anchored)?,
            None => {
                let dir = source.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
                normalize_within(&format!("{dir}/{candidate}"))?
            }
        };

        if !base.is_empty() && (self.exists)(&base) {
            return Some(base);
        }

        if !base.is_empty() && !base.ends_with('/') {
            for ext in &self.extensions {
                let path = format!("{base}.{ext}");
                if (self.exists)(&path) {
                    return Some(path);
                }
            }
        }

        for index in &self.index_files {
            let path = if base.is_empty() { index.to_string() } else { format!("{base}/{index}") };
            if (self.exists)(&path) {
                return Some(path);
            }
        }

        None
    }
}

/// Normalize a POSIX path, returning `None` if `..` climbs above the root
pub(crate) fn normalize_within(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}
