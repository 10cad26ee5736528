//! Path filtering using include/exclude glob patterns
//!
//! Architectural Principle: Service Layer - PathFilter owns the rules for deciding what gets scanned
//! - Include patterns select candidates; an empty include list selects everything
//! - Exclude patterns are applied afterwards and always win
//! - Patterns are matched against POSIX paths relative to the project root

use crate::config::PatternsConfig;
use crate::domain::{GuardianError, GuardianResult};
use std::path::Path;

/// Decides which project files the scanner and watcher consider
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    include: Vec<FilterPattern>,
    exclude: Vec<FilterPattern>,
}

#[derive(Debug, Clone)]
struct FilterPattern {
    pattern: glob::Pattern,
    /// Original pattern string for debugging
    original: String,
}

impl FilterPattern {
    fn parse(original: &str) -> GuardianResult<Self> {
        let trimmed = original.strip_prefix('/').unwrap_or(original);
        let trimmed = match trimmed.strip_suffix('/') {
            Some(dir) => format!("{dir}/**"),
            None => trimmed.to_string(),
        };
        let pattern = glob::Pattern::new(&trimmed)
            .map_err(|e| GuardianError::pattern(format!("Invalid pattern '{original}': {e}")))?;
        Ok(Self { pattern, original: original.to_string() })
    }

    /// gitignore-style: patterns without a slash match the file name anywhere
    fn matches(&self, relative: &str) -> bool {
        if self.original.trim_end_matches('/').contains('/') {
            return self.pattern.matches(relative);
        }
        let name = relative.rsplit('/').next().unwrap_or(relative);
        self.pattern.matches(name) || self.pattern.matches(relative)
    }
}

impl PathFilter {
    /// Create a filter from include and exclude pattern lists
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> GuardianResult<Self> {
        Ok(Self {
            include: include.iter().map(|p| FilterPattern::parse(p.as_ref())).collect::<Result<_, _>>()?,
            exclude: exclude.iter().map(|p| FilterPattern::parse(p.as_ref())).collect::<Result<_, _>>()?,
        })
    }

    pub fn from_config(patterns: &PatternsConfig) -> GuardianResult<Self> {
        Self::new(&patterns.include, &patterns.exclude)
    }

    /// Whether a root-relative POSIX path should be scanned
    pub fn matches(&self, relative: &str) -> bool {
        let included =
            self.include.is_empty() || self.include.iter().any(|pattern| pattern.matches(relative));
        included && !self.is_excluded(relative)
    }

    /// Whether any exclude pattern matches
    pub fn is_excluded(&self, relative: &str) -> bool {
        self.exclude.iter().any(|pattern| pattern.matches(relative))
    }

    /// Whether a directory can be skipped entirely during discovery
    pub fn prunes_dir(&self, relative_dir: &str) -> bool {
        !relative_dir.is_empty() && self.is_excluded(&format!("{relative_dir}/_"))
    }

    pub fn add_exclude(&mut self, pattern: &str) -> GuardianResult<()> {
        self.exclude.push(FilterPattern::parse(pattern)?);
        Ok(())
    }

    /// Get debug information about patterns and their matches
    pub fn debug_patterns<P: AsRef<Path>>(&self, relative: P) -> Vec<String> {
        let relative = crate::domain::normalize_relative(relative.as_ref());
        let describe = |kind: &str, pattern: &FilterPattern| {
            format!(
                "{kind} {} -> {}",
                pattern.original,
                if pattern.matches(&relative) { "MATCH" } else { "no match" }
            )
        };
        self.include
            .iter()
            .map(|p| describe("include", p))
            .chain(self.exclude.iter().map(|p| describe("exclude", p)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("src/app/service.ts", true)]
    #[case("src/ui/Page.tsx", true)]
    #[case("src/app/service.test.ts", false)]
    #[case("node_modules/react/index.js", false)]
    #[case("src/vendor/node_modules/x.js", false)]
    #[case("scripts/build.ts", false)]
    #[case("src/generated/api.ts", false)]
    fn test_include_then_exclude(#[case] path: &str, #[case] expected: bool) {
        let filter = PathFilter::new(
            &["src/**"],
            &["**/node_modules/**", "*.test.ts", "/src/generated/"],
        )
        .unwrap();
        assert_eq!(filter.matches(path), expected, "{path}");
    }

    #[test]
    fn test_empty_include_selects_everything() {
        let filter = PathFilter::new::<&str>(&[], &[]).unwrap();
        assert!(filter.matches("anything/at/all.py"));
    }

    #[test]
    fn test_prunes_excluded_directories() {
        let filter = PathFilter::from_config(&PatternsConfig::default()).unwrap();
        assert!(filter.prunes_dir("node_modules"));
        assert!(filter.prunes_dir("packages/web/node_modules"));
        assert!(filter.prunes_dir("target"));
        assert!(!filter.prunes_dir("src"));
        assert!(!filter.prunes_dir(""));
    }

    #[test]
    fn test_invalid_pattern() {
        let result = PathFilter::new(&["[invalid"], &[]);
        assert!(matches!(result, Err(GuardianError::Pattern { .. })));
    }

    #[test]
    fn test_debug_patterns() {
        let filter = PathFilter::new(&["src/**"], &["*.md"]).unwrap();
        let info = filter.debug_patterns("src/README.md");
        assert_eq!(info, vec!["include src/** -> MATCH", "exclude *.md -> MATCH"]);
    }
}
